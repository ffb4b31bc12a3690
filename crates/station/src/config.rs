//! TOML config file loading and validation for channels, calibration,
//! relays and automation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::acquisition::Timing;
use crate::calibration::Calibration;
use crate::channel::{AdcScale, AnalogChannel, Channels};
use crate::history::Field;
use crate::relay::{AutomationRules, Mode};
use crate::state::{Band, Thresholds};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub history_capacity: usize,
    pub initial_mode: Mode,
    pub timing: TimingConfig,
    pub adc: AdcConfig,
    pub channels: ChannelsConfig,
    pub calibration: Calibration,
    pub relays: Vec<RelayEntry>,
    pub automation: AutomationConfig,
    pub thresholds: Thresholds,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub commit_ms: u64,
    pub temperature_ms: u64,
    pub display_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub full_scale: u16,
    pub reference_voltage: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChannelEntry {
    pub line: u8,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub ph: ChannelEntry,
    pub turbidity: ChannelEntry,
    pub oxygen: ChannelEntry,
    pub potentiometer: ChannelEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayEntry {
    pub name: String,
    pub gpio_pin: i64,
}

/// Relay indices here are zero-based positions in `relays`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub low_temperature_relay: usize,
    pub potentiometer_relay: usize,
    pub potentiometer_above_percent: f64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_ALPHA: f64 = 0.1;

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_capacity: 30,
            initial_mode: Mode::Automatic,
            timing: TimingConfig::default(),
            adc: AdcConfig::default(),
            channels: ChannelsConfig::default(),
            calibration: Calibration::default(),
            relays: default_relays(),
            automation: AutomationConfig::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            commit_ms: 50,
            temperature_ms: 750,
            display_ms: 500,
        }
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            full_scale: 4095,
            reference_voltage: 3.3,
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        let entry = |line| ChannelEntry {
            line,
            alpha: DEFAULT_ALPHA,
        };
        Self {
            ph: entry(0),
            turbidity: entry(1),
            oxygen: entry(2),
            potentiometer: entry(3),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            low_temperature_relay: 0,
            potentiometer_relay: 1,
            potentiometer_above_percent: 50.0,
        }
    }
}

fn default_relays() -> Vec<RelayEntry> {
    [14, 27, 26, 25]
        .into_iter()
        .enumerate()
        .map(|(i, gpio_pin)| RelayEntry {
            name: format!("relay{}", i + 1),
            gpio_pin,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

const MAX_RELAYS: usize = 8;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_general(&mut errors);
        self.validate_channels(&mut errors);
        self.validate_relays(&mut errors);
        self.validate_automation(&mut errors);
        self.validate_thresholds(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_general(&self, errors: &mut Vec<String>) {
        if self.history_capacity == 0 {
            errors.push("history_capacity must be positive".into());
        }

        // ── Timing (all must be positive) ───────────────────
        for (name, ms) in [
            ("tick_ms", self.timing.tick_ms),
            ("commit_ms", self.timing.commit_ms),
            ("temperature_ms", self.timing.temperature_ms),
            ("display_ms", self.timing.display_ms),
        ] {
            if ms == 0 {
                errors.push(format!("timing.{name} must be positive"));
            }
        }
        if self.timing.tick_ms > 0 && self.timing.commit_ms < self.timing.tick_ms {
            errors.push(format!(
                "timing.commit_ms ({}) is shorter than tick_ms ({})",
                self.timing.commit_ms, self.timing.tick_ms
            ));
        }

        // ── ADC scale ───────────────────────────────────────
        if self.adc.full_scale == 0 {
            errors.push("adc.full_scale must be positive".into());
        }
        if !(self.adc.reference_voltage > 0.0) {
            errors.push(format!(
                "adc.reference_voltage must be positive, got {}",
                self.adc.reference_voltage
            ));
        }

        // ── Calibration ─────────────────────────────────────
        let cal = &self.calibration;
        if cal.turbidity_clear_v <= cal.turbidity_dirty_v {
            errors.push(format!(
                "calibration.turbidity_clear_v ({}) must be greater than turbidity_dirty_v ({})",
                cal.turbidity_clear_v, cal.turbidity_dirty_v
            ));
        }
        if !(cal.ntu_max > 0.0) {
            errors.push(format!(
                "calibration.ntu_max must be positive, got {}",
                cal.ntu_max
            ));
        }
        if !(cal.oxygen_cal_mv > 0.0) {
            errors.push(format!(
                "calibration.oxygen_cal_mv must be positive, got {}",
                cal.oxygen_cal_mv
            ));
        }
        if !(0.0..=40.0).contains(&cal.oxygen_cal_temp_c) {
            errors.push(format!(
                "calibration.oxygen_cal_temp_c {} out of range [0, 40]",
                cal.oxygen_cal_temp_c
            ));
        }
    }

    fn validate_channels(&self, errors: &mut Vec<String>) {
        let mut seen_lines: HashSet<u8> = HashSet::new();

        for (name, ch) in self.channels.entries() {
            if !(ch.alpha > 0.0 && ch.alpha < 1.0) {
                errors.push(format!(
                    "channel '{name}': alpha {} out of range (0, 1)",
                    ch.alpha
                ));
            }
            if !seen_lines.insert(ch.line) {
                errors.push(format!(
                    "channel '{name}': line {} is already used by another channel",
                    ch.line
                ));
            }
        }
    }

    fn validate_relays(&self, errors: &mut Vec<String>) {
        if self.relays.is_empty() || self.relays.len() > MAX_RELAYS {
            errors.push(format!(
                "relays: {} configured, expected 1-{MAX_RELAYS}",
                self.relays.len()
            ));
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, r) in self.relays.iter().enumerate() {
            let ctx = || {
                if r.name.is_empty() {
                    format!("relays[{i}]")
                } else {
                    format!("relay '{}'", r.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if r.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&r.name) {
                errors.push(format!("{}: duplicate name", ctx()));
            }

            // ── GPIO pin whitelist ──────────────────────────────
            if !VALID_GPIO_PINS.contains(&r.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    r.gpio_pin
                ));
            } else if !seen_pins.insert(r.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is already used by another relay",
                    ctx(),
                    r.gpio_pin
                ));
            }
        }
    }

    fn validate_automation(&self, errors: &mut Vec<String>) {
        let a = &self.automation;
        for (name, index) in [
            ("low_temperature_relay", a.low_temperature_relay),
            ("potentiometer_relay", a.potentiometer_relay),
        ] {
            if index >= self.relays.len() {
                errors.push(format!(
                    "automation.{name} {index} has no matching relay ({} configured)",
                    self.relays.len()
                ));
            }
        }
        if a.low_temperature_relay == a.potentiometer_relay {
            errors.push(format!(
                "automation: low_temperature_relay and potentiometer_relay are both {}",
                a.low_temperature_relay
            ));
        }
        if !(0.0..=100.0).contains(&a.potentiometer_above_percent) {
            errors.push(format!(
                "automation.potentiometer_above_percent {} out of range [0, 100]",
                a.potentiometer_above_percent
            ));
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        for field in Field::ALL {
            let Band { min, max } = self.thresholds.band(field);
            if !(min < max) {
                errors.push(format!(
                    "thresholds.{}: min ({min}) must be less than max ({max})",
                    field.key()
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions into runtime types
// ---------------------------------------------------------------------------

impl ChannelsConfig {
    fn entries(&self) -> [(&'static str, ChannelEntry); 4] {
        [
            ("ph", self.ph),
            ("turbidity", self.turbidity),
            ("oxygen", self.oxygen),
            ("potentiometer", self.potentiometer),
        ]
    }
}

impl Config {
    pub fn scale(&self) -> AdcScale {
        AdcScale {
            full_scale: self.adc.full_scale,
            reference_voltage: self.adc.reference_voltage,
        }
    }

    pub fn build_channels(&self) -> Channels {
        let scale = self.scale();
        let make = |e: ChannelEntry| AnalogChannel::new(e.line, e.alpha, scale);
        Channels {
            ph: make(self.channels.ph),
            turbidity: make(self.channels.turbidity),
            oxygen: make(self.channels.oxygen),
            potentiometer: make(self.channels.potentiometer),
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            tick: Duration::from_millis(self.timing.tick_ms),
            commit: Duration::from_millis(self.timing.commit_ms),
            temperature: Duration::from_millis(self.timing.temperature_ms),
            display: Duration::from_millis(self.timing.display_ms),
        }
    }

    /// `low_temperature_c` is taken from `thresholds.suhu.min`.
    pub fn automation_rules(&self) -> AutomationRules {
        AutomationRules {
            low_temperature_relay: self.automation.low_temperature_relay,
            low_temperature_c: self.thresholds.suhu.min,
            potentiometer_relay: self.automation.potentiometer_relay,
            potentiometer_above_percent: self.automation.potentiometer_above_percent,
        }
    }

    /// Validated pins, in relay order.
    pub fn relay_pins(&self) -> Vec<u8> {
        self.relays
            .iter()
            .filter_map(|r| u8::try_from(r.gpio_pin).ok())
            .collect()
    }

    pub fn relay_names(&self) -> Vec<String> {
        self.relays.iter().map(|r| r.name.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file means
/// built-in defaults.
pub fn load(path: &str) -> Result<Config> {
    let config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        info!(path, "config file not found, using defaults");
        Config::default()
    };
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.history_capacity, 30);
        assert_eq!(config.initial_mode, Mode::Automatic);
        assert_eq!(config.relays.len(), 4);
        assert_eq!(config.relay_pins(), vec![14, 27, 26, 25]);
        assert_eq!(config.thresholds.suhu.min, 20.0);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
history_capacity = 60
initial_mode = "manual"

[timing]
commit_ms = 100

[adc]
full_scale = 32767
reference_voltage = 4.096

[channels]
ph = { line = 3 }
turbidity = { line = 2, alpha = 0.2 }
oxygen = { line = 1 }
potentiometer = { line = 0 }

[calibration]
ph_slope = -6.0

[[relays]]
name = "heater"
gpio_pin = 17

[[relays]]
name = "pump"
gpio_pin = 27

[[relays]]
name = "aerator"
gpio_pin = 22

[automation]
potentiometer_above_percent = 70.0

[thresholds]
suhu = { min = 22.0, max = 28.0 }
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.initial_mode, Mode::Manual);
        assert_eq!(config.timing.commit_ms, 100);
        assert_eq!(config.timing.tick_ms, 10);
        assert_eq!(config.channels.ph.line, 3);
        assert_eq!(config.channels.ph.alpha, 0.1);
        assert_eq!(config.channels.turbidity.alpha, 0.2);
        assert_eq!(config.calibration.ph_slope, -6.0);
        assert_eq!(config.calibration.ph_intercept, 21.34);
        assert_eq!(config.relay_pins(), vec![17, 27, 22]);
        assert_eq!(config.relay_names(), vec!["heater", "pump", "aerator"]);

        let rules = config.automation_rules();
        assert_eq!(rules.low_temperature_c, 22.0);
        assert_eq!(rules.potentiometer_above_percent, 70.0);
        assert_eq!(config.timing().commit, Duration::from_millis(100));
    }

    #[test]
    fn unknown_mode_fails_to_parse() {
        assert!(toml::from_str::<Config>("initial_mode = \"turbo\"").is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn default_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn five_relays_pass() {
        let mut cfg = valid_config();
        cfg.relays.push(RelayEntry {
            name: "relay5".into(),
            gpio_pin: 4,
        });
        cfg.validate().unwrap();
    }

    // -- General ------------------------------------------------------------

    #[test]
    fn zero_history_rejected() {
        let mut cfg = valid_config();
        cfg.history_capacity = 0;
        assert_validation_err(&cfg, "history_capacity must be positive");
    }

    #[test]
    fn zero_timing_rejected() {
        let mut cfg = valid_config();
        cfg.timing.temperature_ms = 0;
        assert_validation_err(&cfg, "timing.temperature_ms must be positive");
    }

    #[test]
    fn commit_faster_than_tick_rejected() {
        let mut cfg = valid_config();
        cfg.timing.commit_ms = 5;
        assert_validation_err(&cfg, "shorter than tick_ms");
    }

    #[test]
    fn bad_reference_voltage_rejected() {
        let mut cfg = valid_config();
        cfg.adc.reference_voltage = f64::NAN;
        assert_validation_err(&cfg, "adc.reference_voltage must be positive");
    }

    #[test]
    fn inverted_turbidity_points_rejected() {
        let mut cfg = valid_config();
        cfg.calibration.turbidity_dirty_v = 2.0;
        assert_validation_err(&cfg, "turbidity_clear_v");
    }

    // -- Channels -------------------------------------------------------------

    #[test]
    fn alpha_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.channels.oxygen.alpha = 1.0;
        assert_validation_err(&cfg, "channel 'oxygen': alpha 1 out of range");
    }

    #[test]
    fn shared_line_rejected() {
        let mut cfg = valid_config();
        cfg.channels.potentiometer.line = 0;
        assert_validation_err(&cfg, "channel 'potentiometer': line 0 is already used");
    }

    // -- Relays -----------------------------------------------------------------

    #[test]
    fn no_relays_rejected() {
        let mut cfg = valid_config();
        cfg.relays.clear();
        assert_validation_err(&cfg, "relays: 0 configured");
    }

    #[test]
    fn too_many_relays_rejected() {
        let mut cfg = valid_config();
        cfg.relays = (0..9)
            .map(|i| RelayEntry {
                name: format!("r{i}"),
                gpio_pin: 2 + i,
            })
            .collect();
        assert_validation_err(&cfg, "relays: 9 configured");
    }

    #[test]
    fn duplicate_relay_name_rejected() {
        let mut cfg = valid_config();
        cfg.relays[1].name = "relay1".into();
        assert_validation_err(&cfg, "duplicate name");
    }

    #[test]
    fn reserved_gpio_pin_rejected() {
        let mut cfg = valid_config();
        cfg.relays[0].gpio_pin = 1;
        assert_validation_err(&cfg, "gpio_pin 1 is not a valid BCM GPIO pin");
    }

    #[test]
    fn gpio_pin_above_header_rejected() {
        let mut cfg = valid_config();
        cfg.relays[0].gpio_pin = 28;
        assert_validation_err(&cfg, "gpio_pin 28 is not a valid BCM GPIO pin");
    }

    #[test]
    fn duplicate_gpio_pin_rejected() {
        let mut cfg = valid_config();
        cfg.relays[1].gpio_pin = 14;
        assert_validation_err(&cfg, "gpio_pin 14 is already used");
    }

    // -- Automation ---------------------------------------------------------------

    #[test]
    fn automation_target_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.automation.potentiometer_relay = 4;
        assert_validation_err(&cfg, "automation.potentiometer_relay 4 has no matching relay");
    }

    #[test]
    fn automation_targets_must_differ() {
        let mut cfg = valid_config();
        cfg.automation.potentiometer_relay = 0;
        assert_validation_err(&cfg, "are both 0");
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let mut cfg = valid_config();
        cfg.thresholds.ph = Band::new(8.0, 6.0);
        assert_validation_err(&cfg, "thresholds.ph: min (8) must be less than max (6)");
    }

    // -- Multiple errors ------------------------------------------------------

    #[test]
    fn all_errors_reported_at_once() {
        let mut cfg = valid_config();
        cfg.history_capacity = 0;
        cfg.relays[0].gpio_pin = 0;
        cfg.channels.ph.alpha = 0.0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
    }

    // -- Load -------------------------------------------------------------------

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = load("/nonexistent/aquamon.toml").unwrap();
        assert_eq!(cfg.relays.len(), 4);
    }

    #[test]
    fn load_reports_invalid_file() {
        let path = std::env::temp_dir().join(format!("aquamon-test-{}.toml", std::process::id()));
        std::fs::write(&path, "history_capacity = 0\n").unwrap();
        let err = load(path.to_str().unwrap()).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(format!("{err:#}").contains("history_capacity"));
    }
}
