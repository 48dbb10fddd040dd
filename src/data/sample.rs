//! Synthetic multi-image light curves with known delays.
//!
//! One intrinsic source signal is observed through several images. Image `k` sees
//! `signal(t + true_shift_k) + mag_offset_k + drift_k(t) + noise`, so shifting its
//! curve by `true_shift_k` realigns it with the source. All images share the same
//! observing nights, grouped in seasons.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::Observation;
use crate::error::AppError;
use crate::fit::Delay;
use crate::models::DriftSpec;

/// Number of sinusoids summed into the source signal.
const SIGNAL_COMPONENTS: usize = 6;

/// One lensed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub label: String,
    /// Shift that realigns this image with the source.
    pub true_shift: f64,
    /// Shift the generated curve starts from.
    pub initial_shift: f64,
    pub mag_offset: f64,
    /// Amplitude (mag) of the simulated slow drift; zero disables it.
    pub drift_amplitude: f64,
    /// Period (days) of the simulated drift.
    pub drift_period: f64,
    /// Drift model attached to the generated curve.
    pub drift_model: Option<DriftSpec>,
}

impl ImageConfig {
    pub fn new(label: &str, true_shift: f64, mag_offset: f64) -> Self {
        Self {
            label: label.to_string(),
            true_shift,
            initial_shift: true_shift,
            mag_offset,
            drift_amplitude: 0.0,
            drift_period: 6000.0,
            drift_model: None,
        }
    }

    pub fn with_initial_shift(mut self, shift: f64) -> Self {
        self.initial_shift = shift;
        self
    }

    pub fn with_drift(mut self, amplitude: f64, model: DriftSpec) -> Self {
        self.drift_amplitude = amplitude;
        self.drift_model = Some(model);
        self
    }
}

/// Survey and source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub seed: u64,
    pub seasons: usize,
    /// Length of one observing season (days).
    pub season_length: f64,
    /// Gap between seasons (days).
    pub season_gap: f64,
    /// Mean spacing of observing nights (days).
    pub cadence: f64,
    /// Relative jitter of the spacing, in `[0, 1)`.
    pub cadence_jitter: f64,
    /// 1-sigma photometric error (mag).
    pub noise: f64,
    pub base_mag: f64,
    /// Peak-to-peak scale of the source variability (mag).
    pub signal_amplitude: f64,
    /// Shortest variability timescale (days).
    pub signal_timescale: f64,
    pub images: Vec<ImageConfig>,
}

impl Default for SampleConfig {
    /// Four images A–D with delays AB = −6.44, AC = −26.2, AD = −65 days, starting
    /// from shifts 0, −5, −20 and −60; B, C and D drift and carry polynomial drift
    /// models.
    fn default() -> Self {
        let poly = |params, season_gap| DriftSpec::Polynomial { params, season_gap };
        Self {
            seed: 42,
            seasons: 4,
            season_length: 220.0,
            season_gap: 145.0,
            cadence: 3.0,
            cadence_jitter: 0.4,
            noise: 0.01,
            base_mag: 18.0,
            signal_amplitude: 1.0,
            signal_timescale: 80.0,
            images: vec![
                ImageConfig::new("A", 0.0, 0.0),
                ImageConfig::new("B", -6.44, 0.3)
                    .with_initial_shift(-5.0)
                    .with_drift(0.05, poly(2, 60.0)),
                ImageConfig::new("C", -26.2, 0.8)
                    .with_initial_shift(-20.0)
                    .with_drift(0.08, poly(3, 600.0)),
                ImageConfig::new("D", -65.0, 1.2)
                    .with_initial_shift(-60.0)
                    .with_drift(0.08, poly(3, 600.0)),
            ],
        }
    }
}

/// Smooth random source signal: a sum of seeded sinusoids.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSignal {
    base: f64,
    /// (amplitude, angular frequency, phase)
    components: Vec<(f64, f64, f64)>,
}

impl SourceSignal {
    pub fn value(&self, t: f64) -> f64 {
        self.base
            + self
                .components
                .iter()
                .map(|(a, w, p)| a * (w * t + p).sin())
                .sum::<f64>()
    }
}

/// Generated curves and the truth they were built from.
#[derive(Debug, Clone)]
pub struct SampleData {
    pub observations: Vec<Observation>,
    pub signal: SourceSignal,
    /// Delays implied by the true shifts, in image order.
    pub true_delays: Vec<Delay>,
}

pub fn generate_sample(config: &SampleConfig) -> Result<SampleData, AppError> {
    validate(config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = Normal::new(0.0, config.noise).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let signal = random_signal(&mut rng, config);
    let times = observing_nights(&mut rng, config);

    let mut observations = Vec::with_capacity(config.images.len());
    for image in &config.images {
        let phase = rng.gen_range(0.0..std::f64::consts::TAU);
        let omega = std::f64::consts::TAU / image.drift_period;
        let values = times
            .iter()
            .map(|&t| {
                let drift = image.drift_amplitude * (omega * t + phase).sin();
                signal.value(t + image.true_shift) + image.mag_offset + drift + noise.sample(&mut rng)
            })
            .collect();
        let mut obs = Observation::new(image.label.clone(), times.clone(), values, vec![config.noise; times.len()])?
            .with_telescope("synthetic");
        obs.set_time_shift(image.initial_shift);
        if let Some(spec) = &image.drift_model {
            obs.set_drift(spec.build(&obs)?);
        }
        observations.push(obs);
    }

    let mut true_delays = Vec::new();
    for (i, a) in config.images.iter().enumerate() {
        for b in &config.images[i + 1..] {
            true_delays.push(Delay {
                from: a.label.clone(),
                to: b.label.clone(),
                days: b.true_shift - a.true_shift,
            });
        }
    }

    Ok(SampleData {
        observations,
        signal,
        true_delays,
    })
}

fn validate(config: &SampleConfig) -> Result<(), AppError> {
    if config.images.is_empty() {
        return Err(AppError::new(2, "At least one image is required."));
    }
    if config.seasons == 0 {
        return Err(AppError::new(2, "Season count must be > 0."));
    }
    let positive = [
        config.season_length,
        config.cadence,
        config.noise,
        config.signal_timescale,
    ];
    if positive.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return Err(AppError::new(
            2,
            "Season length, cadence, noise and timescale must be finite and > 0.",
        ));
    }
    if !(0.0..1.0).contains(&config.cadence_jitter) {
        return Err(AppError::new(2, "Cadence jitter must be in [0, 1)."));
    }
    if !(config.season_gap.is_finite() && config.season_gap >= 0.0) {
        return Err(AppError::new(2, "Season gap must be >= 0."));
    }
    if config.images.iter().any(|i| !(i.drift_period.is_finite() && i.drift_period > 0.0)) {
        return Err(AppError::new(2, "Drift periods must be > 0."));
    }
    Ok(())
}

fn random_signal(rng: &mut StdRng, config: &SampleConfig) -> SourceSignal {
    // Timescales spread between the shortest one and ten times that; slower
    // components get larger amplitudes.
    let components = (0..SIGNAL_COMPONENTS)
        .map(|k| {
            let scale = config.signal_timescale * 10f64.powf(k as f64 / (SIGNAL_COMPONENTS - 1) as f64);
            let weight = (scale / config.signal_timescale).sqrt();
            let amplitude = weight * rng.gen_range(0.5..1.0);
            let omega = std::f64::consts::TAU / scale;
            (amplitude, omega, rng.gen_range(0.0..std::f64::consts::TAU))
        })
        .collect::<Vec<_>>();
    let total: f64 = components.iter().map(|c| c.0).sum();
    let norm = 0.5 * config.signal_amplitude / total;
    SourceSignal {
        base: config.base_mag,
        components: components.into_iter().map(|(a, w, p)| (a * norm, w, p)).collect(),
    }
}

fn observing_nights(rng: &mut StdRng, config: &SampleConfig) -> Vec<f64> {
    let mut times = Vec::new();
    for s in 0..config.seasons {
        let start = s as f64 * (config.season_length + config.season_gap);
        let end = start + config.season_length;
        let mut t = start;
        while t <= end {
            times.push(t);
            let jitter = if config.cadence_jitter > 0.0 {
                rng.gen_range(-config.cadence_jitter..config.cadence_jitter)
            } else {
                0.0
            };
            t += config.cadence * (1.0 + jitter);
        }
    }
    times
}
