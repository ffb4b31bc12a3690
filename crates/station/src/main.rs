mod acquisition;
mod broadcast;
mod calibration;
mod channel;
mod config;
mod display;
mod error;
mod history;
mod outputs;
mod probe;
mod protocol;
mod relay;
mod state;
mod web;

use anyhow::Result;
use aquamon_sensors::{AnalogInput, TemperatureSensor};
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use acquisition::Acquisition;
use config::Config;
use display::LogDisplay;
use outputs::RelayOutputs;
use relay::RelayBank;
use state::Station;

type Backends = (Box<dyn AnalogInput>, Box<dyn TemperatureSensor>);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "aquamon.toml".to_string());
    let cfg = config::load(&config_path)?;

    info!(
        relays = cfg.relays.len(),
        history = cfg.history_capacity,
        mode = %cfg.initial_mode,
        "config loaded from {config_path}"
    );

    // ── Relay outputs ───────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let mut outputs =
        RelayOutputs::new(&cfg.relay_pins(), active_low)?.with_names(cfg.relay_names());
    outputs.all_off();

    // ── Shared state ────────────────────────────────────────────────
    let station = Arc::new(Station::new(
        RelayBank::new(cfg.relays.len(), cfg.initial_mode),
        outputs,
        cfg.history_capacity,
        cfg.thresholds,
        cfg.automation_rules(),
    ));

    // ── Sensors + acquisition ───────────────────────────────────────
    let (input, thermometer) = sensor_backends(&cfg)?;
    let acquisition = Acquisition::new(
        Arc::clone(&station),
        input,
        cfg.build_channels(),
        thermometer,
        LogDisplay,
        cfg.calibration,
        cfg.timing(),
    );

    // ── Run ─────────────────────────────────────────────────────────
    // The loop never returns; a web server failure ends the process.
    tokio::select! {
        res = web::serve(station) => res,
        () = acquisition.run() => Ok(()),
    }
}

/// Simulated probes centred on healthy water: pH 7, a little turbidity,
/// oxygen near saturation and 24 °C.
#[cfg(not(feature = "adc"))]
fn sensor_backends(cfg: &Config) -> Result<Backends> {
    use aquamon_sensors::sim::{Scenario, SimThermometer, WaterSim};

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let cal = &cfg.calibration;
    let vref = cfg.adc.reference_voltage;
    let ph_center = if cal.ph_slope == 0.0 {
        0.5
    } else {
        (7.0 - cal.ph_intercept) / cal.ph_slope / vref
    };

    let ch = &cfg.channels;
    let lines = [
        (ch.ph.line, ph_center),
        (ch.turbidity.line, 0.4),
        (ch.oxygen.line, 0.45),
        (ch.potentiometer.line, 0.5),
    ];

    info!(%scenario, "using simulated sensors (no hardware)");
    Ok((
        Box::new(WaterSim::new(scenario, &lines, cfg.adc.full_scale)),
        Box::new(SimThermometer::new(scenario, 24.0)),
    ))
}

/// ADS1115 over I2C for the analog probes, DS18B20 over one-wire for
/// temperature.
#[cfg(feature = "adc")]
fn sensor_backends(cfg: &Config) -> Result<Backends> {
    use anyhow::bail;
    use aquamon_sensors::ads1115::{self, Ads1115};
    use aquamon_sensors::onewire::W1Thermometer;
    use tracing::warn;

    let ch = &cfg.channels;
    for line in [ch.ph.line, ch.turbidity.line, ch.oxygen.line, ch.potentiometer.line] {
        if line > ads1115::MAX_LINE {
            bail!("ADS1115 has inputs 0-{}, channel configured on {line}", ads1115::MAX_LINE);
        }
    }
    if cfg.adc.full_scale != ads1115::FULL_SCALE {
        warn!(
            configured = cfg.adc.full_scale,
            expected = ads1115::FULL_SCALE,
            "adc.full_scale does not match the ADS1115"
        );
    }

    let addr = ads1115::parse_address(
        &env::var("ADS1115_ADDR").unwrap_or_else(|_| "0x48".to_string()),
    )?;
    let adc = Ads1115::new(addr)?;

    let thermometer = match env::var("W1_DEVICE") {
        Ok(id) => W1Thermometer::new(&id),
        Err(_) => W1Thermometer::discover()?,
    };

    info!(addr = format!("{addr:#04x}"), "using ADS1115 + DS18B20");
    Ok((Box::new(adc), Box::new(thermometer)))
}
