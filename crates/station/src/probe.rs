//! Two-phase, non-blocking driver for the digital temperature probe.
//!
//! ```text
//! Idle ──[interval elapsed]──▶ Requested ──[result available]──▶ Ready ──[consumed]──▶ Idle
//! ```
//!
//! A conversion is not polled before the interval has elapsed, and a probe
//! that is still converting keeps the machine in `Requested`.
//!
//! The acquisition loop calls [`TemperatureProbe::collect_if_ready`] before
//! [`TemperatureProbe::request_if_due`] on every tick, so a conversion that
//! is due is always read before the next one is started.

use std::time::{Duration, Instant};

use aquamon_sensors::TemperatureSensor;
use tracing::{debug, info, warn};

use crate::calibration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeState {
    Idle,
    Requested { since: Instant },
    Ready { raw_c: f32 },
}

pub struct TemperatureProbe<T> {
    sensor: T,
    interval: Duration,
    state: ProbeState,
    last_request: Option<Instant>,
    cached: f64,
    has_reading: bool,
    disconnected: bool,
}

impl<T: TemperatureSensor> TemperatureProbe<T> {
    pub fn new(sensor: T, interval: Duration) -> Self {
        Self {
            sensor,
            interval,
            state: ProbeState::Idle,
            last_request: None,
            cached: 0.0,
            has_reading: false,
            disconnected: false,
        }
    }

    /// Whether a conversion has completed since start-up. Until then the
    /// value returned by [`Self::collect_if_ready`] is a placeholder.
    pub fn has_reading(&self) -> bool {
        self.has_reading
    }

    /// Start a conversion if none is outstanding and the conversion interval
    /// has passed since the previous request. Returns whether one was issued.
    pub fn request_if_due(&mut self, now: Instant) -> bool {
        if matches!(self.state, ProbeState::Requested { .. }) {
            return false;
        }
        let due = self
            .last_request
            .map_or(true, |at| now.saturating_duration_since(at) >= self.interval);
        if !due {
            return false;
        }

        if !self.sensor.request_conversion() {
            debug!("temperature sensor busy, request not taken");
            return false;
        }
        self.last_request = Some(now);
        self.state = ProbeState::Requested { since: now };
        debug!("temperature conversion requested");
        true
    }

    /// Read the outstanding conversion once it has had time to finish.
    /// Otherwise returns the previous temperature unchanged.
    pub fn collect_if_ready(&mut self, now: Instant) -> f64 {
        if let ProbeState::Requested { since } = self.state {
            if now.saturating_duration_since(since) >= self.interval {
                if let Some(raw_c) = self.sensor.read_celsius() {
                    self.state = ProbeState::Ready { raw_c };
                }
            }
        }

        if let ProbeState::Ready { raw_c } = self.state {
            self.state = ProbeState::Idle;
            self.consume(raw_c);
        }
        self.cached
    }

    fn consume(&mut self, raw_c: f32) {
        self.has_reading = true;
        match calibration::probe_temperature(raw_c) {
            Ok(celsius) => {
                if self.disconnected {
                    info!(celsius, "temperature probe reconnected");
                    self.disconnected = false;
                }
                self.cached = celsius;
            }
            Err(e) => {
                if !self.disconnected {
                    warn!("{e}; reporting 0 °C until it recovers");
                    self.disconnected = true;
                }
                self.cached = calibration::temperature(raw_c);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
