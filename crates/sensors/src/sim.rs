//! Stateful water-quality sensor simulator for local development.
//!
//! Models the behaviour the station's filters and automation need to see:
//! - Temporal coherence via random walk with mean reversion
//! - Slow drift away from the centre (fouling, evaporation)
//! - Per-sample ADC electronic noise
//! - Occasional spikes
//! - A thermometer that converts lazily and can drop off the bus

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Result};

use crate::{AnalogInput, TemperatureSensor, DISCONNECTED_C};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Hovers near each channel's centre. Low noise, rare spikes.
    Stable,
    /// Slow drift away from the centre with moderate noise. Exercises the
    /// automation thresholds over a few minutes.
    Drifting,
    /// High noise, ~10% spike rate, thermometer occasionally disconnected.
    /// Tests the smoothing filter and the disconnected-probe fallback.
    Noisy,
    /// Analog inputs behave like `Stable` but the thermometer never answers.
    Disconnected,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drifting" => Self::Drifting,
            "noisy" => Self::Noisy,
            "disconnected" => Self::Disconnected,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Drifting => write!(f, "drifting"),
            Self::Noisy => write!(f, "noisy"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

struct Profile {
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    dropout_prob: f32,
}

impl Profile {
    /// Sigmas are fractions of full scale.
    fn for_scenario(scenario: Scenario) -> Self {
        let (drift, walk, rev, noise, spike_prob, spike, dropout) = match scenario {
            Scenario::Stable => (0.0, 0.001, 0.05, 0.002, 0.002_f32, 0.05, 0.0_f32),
            Scenario::Drifting => (0.0004, 0.003, 0.005, 0.004, 0.01, 0.08, 0.0),
            Scenario::Noisy => (0.0, 0.006, 0.03, 0.02, 0.10, 0.2, 0.05),
            Scenario::Disconnected => (0.0, 0.001, 0.05, 0.002, 0.002, 0.05, 1.0),
        };
        Self {
            drift_per_sample: drift,
            walk_sigma: walk,
            mean_reversion: rev,
            noise_sigma: noise,
            spike_prob,
            spike_sigma: spike,
            dropout_prob: dropout,
        }
    }
}

// ---------------------------------------------------------------------------
// Analog inputs
// ---------------------------------------------------------------------------

struct LineState {
    /// Current "true" signal level in ADC counts. Evolves each sample.
    base: f64,
    center: f64,
}

/// Simulated multi-line ADC.
pub struct WaterSim {
    lines: HashMap<u8, LineState>,
    full_scale: f64,
    profile: Profile,
}

impl WaterSim {
    /// Create a simulator for the given `(line, centre)` pairs. The centre
    /// is a fraction of `full_scale` (0.0..=1.0) the line hovers around.
    pub fn new(scenario: Scenario, lines: &[(u8, f64)], full_scale: u16) -> Self {
        let full_scale = f64::from(full_scale);
        let lines = lines
            .iter()
            .map(|&(line, frac)| {
                let center = frac.clamp(0.0, 1.0) * full_scale;
                let jitter = gaussian(0.0, full_scale * 0.01);
                (
                    line,
                    LineState {
                        base: (center + jitter).clamp(0.0, full_scale),
                        center,
                    },
                )
            })
            .collect();

        Self {
            lines,
            full_scale,
            profile: Profile::for_scenario(scenario),
        }
    }
}

impl AnalogInput for WaterSim {
    fn sample(&mut self, line: u8) -> Result<u16> {
        let fs = self.full_scale;
        let p = &self.profile;
        let Some(state) = self.lines.get_mut(&line) else {
            bail!("simulated ADC has no input line {line}");
        };

        let pull = p.mean_reversion * (state.center - state.base);
        let walk = gaussian(0.0, p.walk_sigma * fs);
        let drift = p.drift_per_sample * fs;
        state.base = (state.base + pull + walk + drift).clamp(0.0, fs);

        let noise = gaussian(0.0, p.noise_sigma * fs);
        let spike = if fastrand::f32() < p.spike_prob {
            gaussian(0.0, p.spike_sigma * fs)
        } else {
            0.0
        };

        Ok((state.base + noise + spike).round().clamp(0.0, fs) as u16)
    }
}

// ---------------------------------------------------------------------------
// Thermometer
// ---------------------------------------------------------------------------

/// Simulated one-wire thermometer. A conversion requested with
/// [`TemperatureSensor::request_conversion`] is latched on the next read;
/// without a request the previous conversion is returned again.
pub struct SimThermometer {
    celsius: f64,
    center: f64,
    pending: bool,
    last: f32,
    dropout_prob: f32,
}

impl SimThermometer {
    pub fn new(scenario: Scenario, center_c: f64) -> Self {
        Self {
            celsius: center_c,
            center: center_c,
            pending: false,
            last: DISCONNECTED_C,
            dropout_prob: Profile::for_scenario(scenario).dropout_prob,
        }
    }
}

impl TemperatureSensor for SimThermometer {
    fn request_conversion(&mut self) -> bool {
        self.pending = true;
        true
    }

    fn read_celsius(&mut self) -> Option<f32> {
        if !self.pending {
            return Some(self.last);
        }
        self.pending = false;

        if fastrand::f32() < self.dropout_prob {
            self.last = DISCONNECTED_C;
            return Some(self.last);
        }

        let pull = 0.05 * (self.center - self.celsius);
        self.celsius = (self.celsius + pull + gaussian(0.0, 0.05)).clamp(-10.0, 60.0);
        // DS18B20 resolution at 12 bits is 1/16 °C.
        self.last = ((self.celsius * 16.0).round() / 16.0) as f32;
        Some(self.last)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
