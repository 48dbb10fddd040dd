use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use td_curves::domain::{BokConfig, KnotPlacement, KnotSearchMethod};
use td_curves::spline::{KnotOptimizer, Norm, ObservationSet, RegressionSpline};

const DEGREE: usize = 3;

fn sample_times() -> Vec<f64> {
    (0..200).map(|i| i as f64 * 0.5).collect()
}

/// Sorted interior knots in (0, 99.5), at least 2 days apart.
fn spaced_knots(raw: Vec<f64>) -> Vec<f64> {
    let mut knots: Vec<f64> = raw.into_iter().map(|u| 2.0 + u * 95.0).collect();
    knots.sort_by(f64::total_cmp);
    let mut out: Vec<f64> = Vec::with_capacity(knots.len());
    for k in knots {
        if out.last().is_none_or(|last| k - last >= 2.0) {
            out.push(k);
        }
    }
    out
}

fn spline_for(values: Vec<f64>, interior: Vec<f64>) -> RegressionSpline {
    let n = values.len();
    let data = ObservationSet::from_samples(sample_times(), values, vec![0.1; n], None).unwrap();
    RegressionSpline::new(data, DEGREE, &KnotPlacement::Explicit(interior)).unwrap()
}

fn assert_knot_invariants(spline: &RegressionSpline) {
    let (start, end) = spline.domain();
    let interior = spline.interior_knots();
    assert!(interior.windows(2).all(|w| w[1] > w[0]), "interior not increasing: {interior:?}");
    assert!(interior[0] > start && interior[interior.len() - 1] < end);
    let knots = spline.knots();
    assert_eq!(knots.len(), interior.len() + 2 * (DEGREE + 1));
    assert!(knots[..=DEGREE].iter().all(|&k| k == start));
    assert!(knots[knots.len() - DEGREE - 1..].iter().all(|&k| k == end));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn relocation_keeps_knots_valid_and_never_worsens_the_fit(
        raw_knots in prop::collection::vec(0.0f64..1.0, 1..10),
        values in prop::collection::vec(-1.0f64..1.0, 200),
        method in prop_oneof![Just(KnotSearchMethod::Scan), Just(KnotSearchMethod::Random), Just(KnotSearchMethod::Local)],
        eps in 0.5f64..3.0,
    ) {
        let mut spline = spline_for(values, spaced_knots(raw_knots));
        spline.solve_coefficients().unwrap();
        let config = BokConfig { eps, tests: 6, method, seed: 11, ..BokConfig::default() };
        let mut optimizer = KnotOptimizer::new(&config).unwrap();
        for _ in 0..2 {
            let pass = spline.relocate_knots(&mut optimizer).unwrap();
            prop_assert!(pass.after <= pass.before * (1.0 + 1e-12) + 1e-12);
            assert_knot_invariants(&spline);
        }
    }

    #[test]
    fn coefficients_are_deterministic(
        raw_knots in prop::collection::vec(0.0f64..1.0, 1..10),
        values in prop::collection::vec(-1.0f64..1.0, 200),
    ) {
        let mut first = spline_for(values, spaced_knots(raw_knots));
        let mut second = first.clone();
        first.solve_coefficients().unwrap();
        second.solve_coefficients().unwrap();
        prop_assert_eq!(first.coefficients(), second.coefficients());

        let before = first.coefficients().to_vec();
        first.solve_coefficients().unwrap();
        prop_assert_eq!(first.coefficients(), &before[..]);
    }

    #[test]
    fn cubic_signals_are_reproduced(
        raw_knots in prop::collection::vec(0.0f64..1.0, 1..10),
        coefs in prop::collection::vec(-2.0f64..2.0, 4),
    ) {
        let cubic = |t: f64| {
            let x = t / 100.0;
            coefs[0] + x * (coefs[1] + x * (coefs[2] + x * coefs[3]))
        };
        let values = sample_times().into_iter().map(cubic).collect();
        let mut spline = spline_for(values, spaced_knots(raw_knots));
        spline.solve_coefficients().unwrap();
        for t in [0.0, 13.3, 50.0, 77.7, 99.0] {
            prop_assert!((spline.evaluate(t) - cubic(t)).abs() < 1e-7);
        }
        prop_assert!(spline.misfit(false, Norm::L2).unwrap() < 1e-10);
    }
}
