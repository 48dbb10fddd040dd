use approx::assert_abs_diff_eq;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use td_curves::data::{ImageConfig, SampleConfig, generate_sample};
use td_curves::domain::{
    Criterion, FineConfig, KnotPlacement, Observation, RoughConfig, ShiftDescent, SplineFitConfig, StabilizationConfig,
};
use td_curves::fit::{AlignmentOptimizer, ShiftMethod, ShiftSearchOptions, fit_spline, optimize_time_shifts};
use td_curves::models::{DriftFitOptions, DriftSpec};
use td_curves::spline::RegressionSpline;

fn assert_delays_within(optimizer: &AlignmentOptimizer, truth: &[td_curves::fit::Delay], tol: f64) {
    let estimated = optimizer.delays(true);
    assert_eq!(estimated.len(), truth.len());
    for (est, t) in estimated.iter().zip(truth) {
        assert_eq!(est.name(), t.name());
        assert!(
            (est.days - t.days).abs() <= tol,
            "{}: estimated {:.3}, true {:.3}",
            est.name(),
            est.days,
            t.days
        );
    }
}

#[test]
fn four_image_sample_recovers_the_true_delays() {
    let config = SampleConfig {
        noise: 0.001,
        ..SampleConfig::default()
    };
    let sample = generate_sample(&config).unwrap();
    let starts: Vec<f64> = sample.observations.iter().map(Observation::time_shift).collect();
    assert_eq!(starts, [0.0, -5.0, -20.0, -60.0]);
    let mut optimizer = AlignmentOptimizer::new(sample.observations.clone()).unwrap();

    let rough = RoughConfig {
        knot_step: 30.0,
        ..RoughConfig::default()
    };
    optimizer.run_rough(&rough).unwrap();
    assert_delays_within(&optimizer, &sample.true_delays, 2.0);

    let r2 = optimizer.run_fine(&FineConfig::default()).unwrap();
    assert_delays_within(&optimizer, &sample.true_delays, 0.2);
    assert!(!optimizer.is_stale());
    assert_abs_diff_eq!(optimizer.last_r2().unwrap(), r2);
}

#[test]
fn identical_curves_have_zero_delay() {
    let config = SampleConfig {
        seasons: 2,
        noise: 1e-6,
        images: vec![ImageConfig::new("A", 0.0, 0.0)],
        ..SampleConfig::default()
    };
    let a = generate_sample(&config).unwrap().observations.remove(0);
    let b = Observation::new("B", a.times().to_vec(), a.values().to_vec(), a.errors().to_vec()).unwrap();

    let mut optimizer = AlignmentOptimizer::new(vec![a, b]).unwrap();
    optimizer
        .run_rough(&RoughConfig {
            iterations: 2,
            knot_step: 30.0,
            ..RoughConfig::default()
        })
        .unwrap();
    optimizer
        .run_fine(&FineConfig {
            iterations: 1,
            stabilize_iterations: 1,
            ..FineConfig::default()
        })
        .unwrap();

    let delays = optimizer.delays(true);
    assert_eq!(delays.len(), 1);
    assert_abs_diff_eq!(delays[0].days, 0.0, epsilon = 1e-9);
}

/// A smooth reference spanning 0..400 days.
fn reference_spline() -> RegressionSpline {
    let config = SampleConfig {
        seasons: 1,
        season_length: 400.0,
        cadence: 1.0,
        noise: 1e-4,
        images: vec![ImageConfig::new("A", 0.0, 0.0)],
        ..SampleConfig::default()
    };
    let sample = generate_sample(&config).unwrap();
    let fit = SplineFitConfig {
        knots: KnotPlacement::Step(10.0),
        stabilization: StabilizationConfig {
            enabled: false,
            ..StabilizationConfig::default()
        },
        ..SplineFitConfig::default()
    };
    fit_spline(&sample.observations, &fit).unwrap()
}

#[test]
fn single_shift_is_recovered_with_noise_dependent_accuracy() {
    let spline = reference_spline();
    let true_shift = 7.3;
    let times: Vec<f64> = (0..250).map(|i| 20.0 + i as f64 * 1.3).collect();

    for (sigma, tol) in [(0.002, 0.15), (0.02, 0.6)] {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = Normal::new(0.0, sigma).unwrap();
        let values = times
            .iter()
            .map(|&t| spline.evaluate(t + true_shift) + noise.sample(&mut rng))
            .collect();
        let mut obs = Observation::new("B", times.clone(), values, vec![sigma; times.len()]).unwrap();
        obs.set_time_shift(5.0);
        let mut curves = vec![obs];

        let brute = ShiftSearchOptions {
            method: ShiftMethod::Brute { step: 0.5, radius: 10 },
            refit_drift: None,
            criterion: Criterion::R2,
        };
        optimize_time_shifts(&mut curves, &spline, &brute).unwrap();
        let descent = ShiftSearchOptions {
            method: ShiftMethod::Descent(ShiftDescent {
                xtol: 0.01,
                ftol: 1e-6,
                max_evals: 200,
            }),
            refit_drift: None,
            criterion: Criterion::R2,
        };
        optimize_time_shifts(&mut curves, &spline, &descent).unwrap();

        let found = curves[0].time_shift();
        assert!((found - true_shift).abs() < tol, "sigma {sigma}: shift {found:.3}");
    }
}

#[test]
fn rough_regime_anchors_on_the_first_curve_when_every_curve_drifts() {
    let poly = DriftSpec::Polynomial {
        params: 2,
        season_gap: 60.0,
    };
    let config = SampleConfig {
        seasons: 2,
        images: vec![
            ImageConfig::new("A", 0.0, 0.0).with_drift(0.05, poly.clone()),
            ImageConfig::new("B", -10.0, 0.4).with_drift(0.05, poly),
        ],
        ..SampleConfig::default()
    };
    let sample = generate_sample(&config).unwrap();
    let mut optimizer = AlignmentOptimizer::new(sample.observations).unwrap();
    assert_eq!(optimizer.rough_anchors(), vec![0]);

    optimizer
        .run_rough(&RoughConfig {
            iterations: 2,
            knot_step: 30.0,
            ..RoughConfig::default()
        })
        .unwrap();
    assert!(optimizer.observations().iter().all(Observation::has_drift));
    assert!(optimizer.last_r2().unwrap().is_finite());
}

#[test]
fn drift_refit_during_the_search_keeps_a_drift_on_the_accepted_curve() {
    let spline = reference_spline();
    let times: Vec<f64> = (0..200).map(|i| 30.0 + i as f64 * 1.5).collect();
    let values = times
        .iter()
        .map(|&t| spline.evaluate(t + 4.0) + 0.001 * (t - 150.0))
        .collect();
    let mut obs = Observation::new("B", times.clone(), values, vec![0.01; times.len()]).unwrap();
    let drift = DriftSpec::Polynomial {
        params: 2,
        season_gap: 60.0,
    }
    .build(&obs)
    .unwrap();
    obs.set_drift(drift);
    let mut curves = vec![obs];

    let options = ShiftSearchOptions {
        method: ShiftMethod::Brute { step: 0.5, radius: 12 },
        refit_drift: Some(DriftFitOptions::default()),
        criterion: Criterion::R2,
    };
    optimize_time_shifts(&mut curves, &spline, &options).unwrap();
    assert!((curves[0].time_shift() - 4.0).abs() <= 0.5);
    assert!(curves[0].has_drift());
}
