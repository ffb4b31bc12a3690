use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::info;

use crate::broadcast::StateBroadcaster;
use crate::calibration::CalibratedSample;
use crate::channel::ChannelReadings;
use crate::error::StationError;
use crate::history::{Field, HistoryBuffer};
use crate::outputs::RelayOutputs;
use crate::relay::{AutomationRules, Mode, RelayBank, RelayId, RelaySnapshot};

/// Buffered snapshots per push subscriber before it counts as lagging.
pub(crate) const BROADCAST_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<Station>;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Per-quantity bands, keyed like the dashboard's series. Only `suhu.min`
/// drives a relay; the rest are for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub ph: Band,
    pub turb: Band,
    pub oks: Band,
    pub suhu: Band,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ph: Band::new(6.5, 8.5),
            turb: Band::new(0.0, 25.0),
            oks: Band::new(5.0, 12.0),
            suhu: Band::new(20.0, 30.0),
        }
    }
}

impl Thresholds {
    pub fn band(&self, field: Field) -> Band {
        match field {
            Field::Ph => self.ph,
            Field::Turbidity => self.turb,
            Field::Oxygen => self.oks,
            Field::Temperature => self.suhu,
        }
    }

    fn band_mut(&mut self, field: Field) -> &mut Band {
        match field {
            Field::Ph => &mut self.ph,
            Field::Turbidity => &mut self.turb,
            Field::Oxygen => &mut self.oks,
            Field::Temperature => &mut self.suhu,
        }
    }

    /// Replace one band. `sensor` is a series key (`ph`, `turb`, `oks`, `suhu`).
    pub fn update(&mut self, sensor: &str, min: f64, max: f64) -> Result<(), StationError> {
        let field = Field::from_key(sensor)
            .ok_or_else(|| StationError::InvalidArgument(format!("unknown sensor '{sensor}'")))?;
        if !min.is_finite() || !max.is_finite() {
            return Err(StationError::InvalidArgument(
                "threshold bounds must be finite".into(),
            ));
        }
        if min >= max {
            return Err(StationError::InvalidArgument(format!(
                "min ({min}) must be less than max ({max})"
            )));
        }
        *self.band_mut(field) = Band::new(min, max);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON responses (what the API returns)
// ---------------------------------------------------------------------------

/// Every retained sample as four parallel arrays, oldest first.
#[derive(Debug, Serialize)]
pub struct Series {
    pub ph: Vec<f64>,
    pub turb: Vec<f64>,
    pub oks: Vec<f64>,
    pub suhu: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub samples: usize,
    pub history_capacity: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_commit: Option<OffsetDateTime>,
    pub subscribers: usize,
    pub relays: RelaySnapshot,
}

// ---------------------------------------------------------------------------
// Station
// ---------------------------------------------------------------------------

/// Everything the acquisition loop and the request handlers share. One lock
/// per structure; there is no transaction spanning two of them.
pub struct Station {
    channels: RwLock<ChannelReadings>,
    history: RwLock<HistoryBuffer>,
    last_commit: RwLock<Option<OffsetDateTime>>,
    relays: RwLock<RelayBank>,
    thresholds: RwLock<Thresholds>,
    /// Only locked while the relay write guard is held.
    outputs: Mutex<RelayOutputs>,
    rules: AutomationRules,
    broadcaster: StateBroadcaster,
    started_at: Instant,
}

impl Station {
    pub fn new(
        relays: RelayBank,
        outputs: RelayOutputs,
        history_capacity: usize,
        thresholds: Thresholds,
        rules: AutomationRules,
    ) -> Self {
        let broadcaster = StateBroadcaster::new(BROADCAST_CAPACITY);
        // Seed so the first subscriber gets a snapshot before any change.
        broadcaster.push_if_changed(&relays.snapshot());

        Self {
            channels: RwLock::new(ChannelReadings::default()),
            history: RwLock::new(HistoryBuffer::new(history_capacity)),
            last_commit: RwLock::new(None),
            relays: RwLock::new(relays),
            thresholds: RwLock::new(thresholds),
            outputs: Mutex::new(outputs),
            rules,
            broadcaster,
            started_at: Instant::now(),
        }
    }

    // -- Acquisition side ---------------------------------------------------

    /// Swap in the latest channel readings as a whole.
    pub async fn publish_readings(&self, readings: ChannelReadings) {
        *self.channels.write().await = readings;
    }

    /// Append a committed sample to history without evaluating automation.
    pub async fn record(&self, sample: CalibratedSample) {
        self.history.write().await.append(sample);
        *self.last_commit.write().await = Some(OffsetDateTime::now_utc());
    }

    /// Append a committed sample, then run automation (in automatic mode),
    /// assert the outputs and publish. Returns whether any relay changed.
    pub async fn commit(&self, sample: CalibratedSample, readings: &ChannelReadings) -> bool {
        self.record(sample).await;

        let rules = AutomationRules {
            low_temperature_c: self.thresholds.read().await.suhu.min,
            ..self.rules
        };

        let mut relays = self.relays.write().await;
        let changed = relays.run_automation(&rules, &sample, readings);
        if changed {
            info!(states = ?relays.states(), "automation changed relays");
        }
        self.assert_and_publish(&relays);
        changed
    }

    // -- Control side -------------------------------------------------------

    pub async fn command_relay(&self, id: RelayId, on: bool) -> Result<RelaySnapshot, StationError> {
        let mut relays = self.relays.write().await;
        relays.command(id, on)?;
        info!(relay = %id, on, "manual relay command");
        Ok(self.assert_and_publish(&relays))
    }

    pub async fn set_mode(&self, mode: Mode) -> RelaySnapshot {
        let mut relays = self.relays.write().await;
        if relays.set_mode(mode) {
            info!(%mode, "mode changed");
        }
        self.assert_and_publish(&relays)
    }

    pub async fn update_threshold(
        &self,
        sensor: &str,
        min: f64,
        max: f64,
    ) -> Result<Thresholds, StationError> {
        let mut thresholds = self.thresholds.write().await;
        thresholds.update(sensor, min, max)?;
        info!(sensor, min, max, "threshold updated");
        Ok(*thresholds)
    }

    /// Caller holds the relay write guard, so pin changes and broadcasts are
    /// ordered exactly like the transitions that caused them.
    fn assert_and_publish(&self, relays: &RelayBank) -> RelaySnapshot {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(relays.states());
        let snapshot = relays.snapshot();
        self.broadcaster.push_if_changed(&snapshot);
        snapshot
    }

    // -- Readers ------------------------------------------------------------

    pub async fn readings(&self) -> ChannelReadings {
        *self.channels.read().await
    }

    pub async fn latest(&self) -> Option<CalibratedSample> {
        self.history.read().await.latest()
    }

    /// All four series taken under one read lock.
    pub async fn series(&self) -> Series {
        let history = self.history.read().await;
        Series {
            ph: history.snapshot(Field::Ph),
            turb: history.snapshot(Field::Turbidity),
            oks: history.snapshot(Field::Oxygen),
            suhu: history.snapshot(Field::Temperature),
        }
    }

    pub async fn relay_snapshot(&self) -> RelaySnapshot {
        self.relays.read().await.snapshot()
    }

    pub async fn mode(&self) -> Mode {
        self.relays.read().await.mode()
    }

    pub async fn thresholds(&self) -> Thresholds {
        *self.thresholds.read().await
    }

    pub fn broadcaster(&self) -> &StateBroadcaster {
        &self.broadcaster
    }

    pub async fn status(&self) -> StatusResponse {
        let (samples, history_capacity) = {
            let history = self.history.read().await;
            (history.len(), history.capacity())
        };
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            samples,
            history_capacity,
            last_commit: *self.last_commit.read().await,
            subscribers: self.broadcaster.subscriber_count(),
            relays: self.relay_snapshot().await,
        }
    }

    #[cfg(all(test, not(feature = "gpio")))]
    pub(crate) fn output_levels(&self) -> Vec<bool> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applied()
            .to_vec()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
