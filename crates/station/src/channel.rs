//! Per-sensor exponential smoothing from raw ADC counts to filtered voltage.

use aquamon_sensors::AnalogInput;
use serde::Serialize;
use tracing::warn;

/// Converter geometry shared by every analog channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcScale {
    pub full_scale: u16,
    pub reference_voltage: f64,
}

pub struct AnalogChannel {
    line: u8,
    alpha: f64,
    scale: AdcScale,
    smoothed_raw: f64,
    voltage: f64,
    percent: f64,
    has_first_sample: bool,
}

impl AnalogChannel {
    pub fn new(line: u8, alpha: f64, scale: AdcScale) -> Self {
        Self {
            line,
            alpha,
            scale,
            smoothed_raw: 0.0,
            voltage: 0.0,
            percent: 0.0,
            has_first_sample: false,
        }
    }

    /// Ingest one raw sample. The first sample seeds the filter directly so
    /// the channel does not warm up from zero.
    pub fn update(&mut self, raw: u16) {
        let raw = f64::from(raw);
        if self.has_first_sample {
            self.smoothed_raw += self.alpha * (raw - self.smoothed_raw);
        } else {
            self.smoothed_raw = raw;
            self.has_first_sample = true;
        }

        let fraction = self.smoothed_raw.round() / f64::from(self.scale.full_scale);
        self.voltage = fraction * self.scale.reference_voltage;
        self.percent = fraction * 100.0;
    }

    pub fn line(&self) -> u8 {
        self.line
    }

    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn reading(&self) -> Reading {
        Reading {
            voltage: self.voltage(),
            percent: self.percent(),
        }
    }
}

// ---------------------------------------------------------------------------
// The station's four analog channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Reading {
    pub voltage: f64,
    pub percent: f64,
}

/// Immutable per-tick view of every channel, swapped into shared state as a
/// whole so readers never see a partially updated set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelReadings {
    pub ph: Reading,
    pub turbidity: Reading,
    pub oxygen: Reading,
    pub potentiometer: Reading,
}

pub struct Channels {
    pub ph: AnalogChannel,
    pub turbidity: AnalogChannel,
    pub oxygen: AnalogChannel,
    pub potentiometer: AnalogChannel,
}

impl Channels {
    /// Sample every channel once. A failed read leaves that channel's
    /// filter untouched for this tick.
    pub fn update_from<A: AnalogInput + ?Sized>(&mut self, input: &mut A) {
        for (name, ch) in [
            ("ph", &mut self.ph),
            ("turbidity", &mut self.turbidity),
            ("oxygen", &mut self.oxygen),
            ("potentiometer", &mut self.potentiometer),
        ] {
            match input.sample(ch.line()) {
                Ok(raw) => ch.update(raw),
                Err(e) => warn!(channel = name, line = ch.line(), "adc sample failed: {e:#}"),
            }
        }
    }

    pub fn readings(&self) -> ChannelReadings {
        ChannelReadings {
            ph: self.ph.reading(),
            turbidity: self.turbidity.reading(),
            oxygen: self.oxygen.reading(),
            potentiometer: self.potentiometer.reading(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
