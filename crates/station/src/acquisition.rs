//! Fixed-cadence acquisition loop.
//!
//! Every tick samples all analog channels and publishes their readings.
//! Three independent timers ride on the same tick:
//!
//! ```text
//! temperature (750 ms)  collect the finished conversion, then request the next
//! commit       (50 ms)  calibrate, append to history, automate, assert, publish
//!                        (automation waits for the first temperature conversion)
//! display     (500 ms)  refresh the two status lines
//! ```
//!
//! Nothing here waits on hardware: analog reads are single-shot and the
//! temperature probe is driven through its request/collect state machine.

use std::time::{Duration, Instant};

use aquamon_sensors::{AnalogInput, TemperatureSensor};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::calibration::Calibration;
use crate::channel::Channels;
use crate::display::{display_lines, Display};
use crate::probe::TemperatureProbe;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub tick: Duration,
    pub commit: Duration,
    pub temperature: Duration,
    pub display: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            commit: Duration::from_millis(50),
            temperature: Duration::from_millis(750),
            display: Duration::from_millis(500),
        }
    }
}

/// Interval timer polled with an explicit `now`. Due on the first poll.
struct Every {
    interval: Duration,
    last: Option<Instant>,
}

impl Every {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(at) if now.saturating_duration_since(at) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct Acquisition<A, T, D> {
    input: A,
    channels: Channels,
    probe: TemperatureProbe<T>,
    display: D,
    calibration: Calibration,
    tick: Duration,
    commit: Every,
    refresh: Every,
    station: SharedState,
}

impl<A, T, D> Acquisition<A, T, D>
where
    A: AnalogInput,
    T: TemperatureSensor,
    D: Display,
{
    pub fn new(
        station: SharedState,
        input: A,
        channels: Channels,
        thermometer: T,
        display: D,
        calibration: Calibration,
        timing: Timing,
    ) -> Self {
        Self {
            input,
            channels,
            probe: TemperatureProbe::new(thermometer, timing.temperature),
            display,
            calibration,
            tick: timing.tick,
            commit: Every::new(timing.commit),
            refresh: Every::new(timing.display),
            station,
        }
    }

    /// One pass of the loop at time `now`.
    pub async fn tick(&mut self, now: Instant) {
        self.channels.update_from(&mut self.input);
        let readings = self.channels.readings();
        self.station.publish_readings(readings).await;

        // Collect before requesting so a due result is never overwritten.
        let temperature = self.probe.collect_if_ready(now);
        self.probe.request_if_due(now);

        if self.commit.due(now) {
            let sample = self.calibration.sample(&readings, temperature);
            // Until the first conversion lands the temperature is a
            // placeholder, so relays are left alone.
            if self.probe.has_reading() {
                self.station.commit(sample, &readings).await;
            } else {
                self.station.record(sample).await;
            }
        }

        if self.refresh.due(now) {
            let latest = self.station.latest().await;
            self.display.show(&display_lines(latest.as_ref()));
        }
    }

    /// Run forever at the configured tick. Intended to be the main task.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_ms = self.tick.as_millis() as u64,
            commit_ms = self.commit.interval.as_millis() as u64,
            "acquisition started"
        );

        loop {
            ticker.tick().await;
            self.tick(Instant::now()).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
