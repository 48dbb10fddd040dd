//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::app::pipeline::{RunConfig, RunOutput};
use crate::models::Drift;
use crate::report::{CurveResiduals, DelayComparison, compare_delays};

/// Format the run summary (data set, fit state, per-curve offsets).
pub fn format_run_summary(run: &RunOutput, config: &RunConfig) -> String {
    let mut out = String::new();

    out.push_str("=== td - time-delay estimation ===\n");
    let sample = &config.sample;
    let n_samples: usize = run.observations.iter().map(|o| o.len()).sum();
    out.push_str(&format!(
        "Data: {} curves, {} samples | seasons={} cadence={:.1}d noise={:.3}mag seed={}\n",
        run.observations.len(),
        n_samples,
        sample.seasons,
        sample.cadence,
        sample.noise,
        sample.seed,
    ));
    out.push_str(&format!(
        "Rough: {} it, knot step {:.0}d | Fine: {}\n",
        config.align.rough.iterations,
        config.align.rough.knot_step,
        if config.rough_only {
            "skipped".to_string()
        } else {
            format!(
                "{} it, knot step {:.0}d, {:?} knot search",
                config.align.fine.iterations, config.align.fine.knot_step, config.align.fine.bok_method
            )
        },
    ));
    out.push_str(&format!(
        "Spline: {} interior knots, r2={:.3} over {} samples ({} stages)\n",
        run.spline.interior_knots().len(),
        run.r2,
        run.spline.data().real_count(),
        run.history.len(),
    ));

    out.push_str("\nCurves:\n");
    out.push_str(
        format!(
            "{:<8} {:>10} {:>10} {:>12} {:<12}\n",
            "curve", "t_shift", "m_shift", "f_shift", "drift"
        )
        .trim_end(),
    );
    out.push('\n');
    for obs in &run.observations {
        let drift = match obs.drift() {
            Some(d) => format!("{} ({})", d.kind_name(), d.parameter_count()),
            None => "-".to_string(),
        };
        out.push_str(
            format!(
                "{:<8} {:>10.3} {:>10.4} {:>12.3e} {:<12}\n",
                truncate(obs.label(), 8),
                obs.time_shift(),
                obs.mag_shift(),
                obs.flux_shift(),
                drift
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

/// Format estimated vs true delays for a run.
pub fn format_delays(run: &RunOutput) -> String {
    format_delay_table(&compare_delays(&run.delays, &run.sample.true_delays))
}

/// Format a delay comparison table.
pub fn format_delay_table(rows: &[DelayComparison]) -> String {
    let mut out = String::new();
    out.push_str("Delays (days):\n");
    out.push_str(format!("{:<8} {:>10} {:>10} {:>10}\n", "pair", "estimate", "truth", "error").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<8} {:-<10} {:-<10} {:-<10}\n", "", "", "", "").trim_end());
    out.push('\n');
    for r in rows {
        out.push_str(
            format!(
                "{:<8} {:>10.3} {:>10} {:>10}\n",
                truncate(&r.name, 8),
                r.estimated,
                fmt_opt(r.truth),
                fmt_opt(r.error()),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Format per-curve residual statistics.
pub fn format_residuals(rows: &[CurveResiduals]) -> String {
    let mut out = String::new();
    out.push_str("Residuals against the spline:\n");
    out.push_str(format!("{:<8} {:>6} {:>10} {:>10} {:>8}\n", "curve", "n", "mean", "rms", "chi2/n").trim_end());
    out.push('\n');
    for r in rows {
        out.push_str(
            format!(
                "{:<8} {:>6} {:>10.4} {:>10.4} {:>8.3}\n",
                truncate(&r.label, 8),
                r.samples,
                r.mean,
                r.rms,
                r.reduced_chi2
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:.3}"),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_table_shows_errors_when_truth_is_known() {
        let rows = vec![
            DelayComparison {
                name: "AB".into(),
                estimated: -4.75,
                truth: Some(-5.0),
            },
            DelayComparison {
                name: "AC".into(),
                estimated: -20.0,
                truth: None,
            },
        ];
        let table = format_delay_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[3].starts_with("AB"));
        assert!(lines[3].contains("-4.750"));
        assert!(lines[3].ends_with("0.250"));
        assert!(lines[4].ends_with('-'));
    }

    #[test]
    fn long_labels_are_truncated() {
        assert_eq!(truncate("ABCDEFGHIJ", 8), "ABCDEFG.");
        assert_eq!(truncate("A", 8), "A");
    }

    #[test]
    fn residual_table_has_one_row_per_curve() {
        let rows = vec![CurveResiduals {
            label: "A".into(),
            samples: 10,
            mean: 0.0,
            rms: 0.01,
            reduced_chi2: 1.0,
        }];
        let table = format_residuals(&rows);
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().last().unwrap().starts_with("A"));
    }
}
