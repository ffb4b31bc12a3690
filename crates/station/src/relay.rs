//! Logical relay state and the auto/manual arbitration rule.
//!
//! In [`Mode::Automatic`] the threshold rules are the only writer of relay
//! state and manual commands are rejected outright. In [`Mode::Manual`] only
//! explicit commands write, and automation is not evaluated. The bank owns
//! booleans only; electrical polarity lives in `outputs`.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::calibration::CalibratedSample;
use crate::channel::ChannelReadings;
use crate::error::StationError;

// ---------------------------------------------------------------------------
// Closed vocabularies parsed at the boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "auto")]
    Automatic,
    #[serde(rename = "manual")]
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Automatic => "auto",
            Mode::Manual => "manual",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Mode::Automatic),
            "manual" => Ok(Mode::Manual),
            other => Err(StationError::InvalidArgument(format!(
                "unknown mode '{other}' (use auto/manual)"
            ))),
        }
    }
}

/// Zero-based relay index. Written and parsed as the 1-based `relay<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayId(pub usize);

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay{}", self.0 + 1)
    }
}

impl FromStr for RelayId {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Plain decimal only: no sign, no leading zeros.
        let n: usize = s
            .strip_prefix("relay")
            .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
            .filter(|d| d.len() == 1 || !d.starts_with('0'))
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| StationError::InvalidArgument(format!("unknown relay id '{s}'")))?;
        match n.checked_sub(1) {
            Some(index) => Ok(RelayId(index)),
            None => Err(StationError::InvalidTarget(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

impl FromStr for Switch {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Switch::On),
            "off" => Ok(Switch::Off),
            other => Err(StationError::InvalidArgument(format!(
                "unknown relay state '{other}' (use on/off)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Automation rules
// ---------------------------------------------------------------------------

/// Threshold rules evaluated in automatic mode. Only the two target relays
/// are automated; every other relay keeps its state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationRules {
    pub low_temperature_relay: usize,
    /// Relay is on while the water is colder than this.
    pub low_temperature_c: f64,
    pub potentiometer_relay: usize,
    /// Relay is on while the potentiometer reads above this percentage.
    pub potentiometer_above_percent: f64,
}

// ---------------------------------------------------------------------------
// Relay bank
// ---------------------------------------------------------------------------

pub struct RelayBank {
    states: Vec<bool>,
    mode: Mode,
}

/// Full relay state as pushed to subscribers and served by `/relay-status`:
/// `{"relay1":false,...,"mode":"auto"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub states: Vec<bool>,
    pub mode: Mode,
}

impl Serialize for RelaySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.states.len() + 1))?;
        for (i, on) in self.states.iter().enumerate() {
            map.serialize_entry(&RelayId(i).to_string(), on)?;
        }
        map.serialize_entry("mode", &self.mode)?;
        map.end()
    }
}

impl RelayBank {
    /// All relays start off.
    pub fn new(count: usize, mode: Mode) -> Self {
        Self {
            states: vec![false; count],
            mode,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Takes effect immediately; relay states are left as they are.
    /// Returns whether the mode actually changed.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        changed
    }

    pub fn command(&mut self, id: RelayId, on: bool) -> Result<(), StationError> {
        if self.mode == Mode::Automatic {
            return Err(StationError::RejectedByMode);
        }
        let slot = self
            .states
            .get_mut(id.0)
            .ok_or_else(|| StationError::InvalidTarget(id.to_string()))?;
        *slot = on;
        Ok(())
    }

    /// Evaluate the threshold rules and apply all resulting changes as one
    /// transition. A no-op in manual mode. Returns whether any relay changed.
    pub fn run_automation(
        &mut self,
        rules: &AutomationRules,
        sample: &CalibratedSample,
        readings: &ChannelReadings,
    ) -> bool {
        if self.mode != Mode::Automatic {
            return false;
        }

        let desired = [
            (
                rules.low_temperature_relay,
                sample.temperature < rules.low_temperature_c,
            ),
            (
                rules.potentiometer_relay,
                readings.potentiometer.percent > rules.potentiometer_above_percent,
            ),
        ];

        let mut next = self.states.clone();
        for (index, on) in desired {
            if let Some(slot) = next.get_mut(index) {
                *slot = on;
            }
        }

        let changed = next != self.states;
        self.states = next;
        changed
    }

    pub fn states(&self) -> &[bool] {
        &self.states
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            states: self.states.clone(),
            mode: self.mode,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Reading;

    fn rules() -> AutomationRules {
        AutomationRules {
            low_temperature_relay: 0,
            low_temperature_c: 20.0,
            potentiometer_relay: 1,
            potentiometer_above_percent: 50.0,
        }
    }

    fn sample_at(temperature: f64) -> CalibratedSample {
        CalibratedSample {
            temperature,
            ..CalibratedSample::default()
        }
    }

    fn pot_at(percent: f64) -> ChannelReadings {
        ChannelReadings {
            potentiometer: Reading {
                voltage: 0.0,
                percent,
            },
            ..ChannelReadings::default()
        }
    }

    // -- Parsing -----------------------------------------------------------

    #[test]
    fn relay_id_parses_one_based() {
        assert_eq!("relay1".parse::<RelayId>().unwrap(), RelayId(0));
        assert_eq!(" relay5 ".parse::<RelayId>().unwrap(), RelayId(4));
        assert_eq!(RelayId(2).to_string(), "relay3");
    }

    #[test]
    fn relay_id_rejects_garbage() {
        assert!(matches!(
            "pump1".parse::<RelayId>(),
            Err(StationError::InvalidArgument(_))
        ));
        assert!(matches!(
            "relay".parse::<RelayId>(),
            Err(StationError::InvalidArgument(_))
        ));
        assert!(matches!(
            "relay0".parse::<RelayId>(),
            Err(StationError::InvalidTarget(_))
        ));
    }

    #[test]
    fn relay_id_requires_plain_decimal() {
        for id in ["relay+1", "relay01", "relay00", "relay 1", "relay1.0", "relay-1"] {
            assert!(
                matches!(id.parse::<RelayId>(), Err(StationError::InvalidArgument(_))),
                "{id} was accepted"
            );
        }
        assert_eq!("relay10".parse::<RelayId>().unwrap(), RelayId(9));
    }

    #[test]
    fn switch_and_mode_parse_case_insensitively() {
        assert_eq!("ON".parse::<Switch>().unwrap(), Switch::On);
        assert_eq!(" off\n".parse::<Switch>().unwrap(), Switch::Off);
        assert!("toggle".parse::<Switch>().is_err());
        assert_eq!("Auto".parse::<Mode>().unwrap(), Mode::Automatic);
        assert_eq!("manual".parse::<Mode>().unwrap(), Mode::Manual);
        assert!("monitor".parse::<Mode>().is_err());
    }

    // -- Arbitration ---------------------------------------------------------

    #[test]
    fn automatic_mode_rejects_every_command() {
        for prior in [false, true] {
            let mut bank = RelayBank::new(5, Mode::Manual);
            for i in 0..5 {
                bank.command(RelayId(i), prior).unwrap();
            }
            bank.set_mode(Mode::Automatic);
            for i in 0..5 {
                for on in [false, true] {
                    assert_eq!(
                        bank.command(RelayId(i), on),
                        Err(StationError::RejectedByMode)
                    );
                }
            }
            assert!(bank.states().iter().all(|&s| s == prior));
        }
    }

    #[test]
    fn manual_command_mutates_only_the_target() {
        let mut bank = RelayBank::new(4, Mode::Automatic);
        bank.set_mode(Mode::Manual);
        bank.command(RelayId(2), true).unwrap();
        assert_eq!(bank.states(), &[false, false, true, false]);
    }

    #[test]
    fn out_of_range_target_rejected() {
        let mut bank = RelayBank::new(4, Mode::Manual);
        assert_eq!(
            bank.command(RelayId(4), true),
            Err(StationError::InvalidTarget("relay5".into()))
        );
        assert!(bank.states().iter().all(|&s| !s));
    }

    #[test]
    fn set_mode_leaves_states_alone() {
        let mut bank = RelayBank::new(2, Mode::Manual);
        bank.command(RelayId(1), true).unwrap();
        assert!(bank.set_mode(Mode::Automatic));
        assert!(!bank.set_mode(Mode::Automatic));
        assert_eq!(bank.states(), &[false, true]);
    }

    // -- Automation ----------------------------------------------------------

    #[test]
    fn cold_water_turns_low_temperature_relay_on() {
        let mut bank = RelayBank::new(4, Mode::Automatic);
        assert!(bank.run_automation(&rules(), &sample_at(18.0), &pot_at(0.0)));
        assert_eq!(bank.states(), &[true, false, false, false]);

        // Same inputs again: nothing changes.
        assert!(!bank.run_automation(&rules(), &sample_at(18.0), &pot_at(0.0)));

        assert!(bank.run_automation(&rules(), &sample_at(20.0), &pot_at(0.0)));
        assert_eq!(bank.states(), &[false, false, false, false]);
    }

    #[test]
    fn potentiometer_above_threshold_turns_second_relay_on() {
        let mut bank = RelayBank::new(4, Mode::Automatic);
        assert!(bank.run_automation(&rules(), &sample_at(25.0), &pot_at(75.0)));
        assert_eq!(bank.states(), &[false, true, false, false]);
        assert!(!bank.run_automation(&rules(), &sample_at(25.0), &pot_at(50.0000001)));
        assert!(bank.run_automation(&rules(), &sample_at(25.0), &pot_at(50.0)));
        assert_eq!(bank.states(), &[false, false, false, false]);
    }

    #[test]
    fn automation_leaves_unmapped_relays_alone() {
        let mut bank = RelayBank::new(5, Mode::Manual);
        bank.command(RelayId(3), true).unwrap();
        bank.command(RelayId(4), true).unwrap();
        bank.set_mode(Mode::Automatic);
        bank.run_automation(&rules(), &sample_at(18.0), &pot_at(90.0));
        assert_eq!(bank.states(), &[true, true, false, true, true]);
    }

    #[test]
    fn automation_is_skipped_in_manual_mode() {
        let mut bank = RelayBank::new(2, Mode::Manual);
        assert!(!bank.run_automation(&rules(), &sample_at(0.0), &pot_at(100.0)));
        assert_eq!(bank.states(), &[false, false]);
    }

    #[test]
    fn automation_tolerates_rules_beyond_bank() {
        let mut bank = RelayBank::new(1, Mode::Automatic);
        bank.run_automation(&rules(), &sample_at(10.0), &pot_at(90.0));
        assert_eq!(bank.states(), &[true]);
    }

    // -- Snapshot ------------------------------------------------------------

    #[test]
    fn snapshot_serializes_relay_keys_and_mode() {
        let mut bank = RelayBank::new(3, Mode::Manual);
        bank.command(RelayId(1), true).unwrap();
        let json = serde_json::to_value(bank.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"relay1": false, "relay2": true, "relay3": false, "mode": "manual"})
        );
    }
}
