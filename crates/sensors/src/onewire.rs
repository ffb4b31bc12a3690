//! DS18B20 thermometer through the Linux `w1` sysfs interface.
//!
//! Reading `w1_slave` blocks for the whole conversion (~750 ms at 12-bit
//! resolution), so each requested conversion runs on a short-lived worker
//! thread and `read_celsius` only polls for its result. While the worker is
//! running, reads report `None` and further requests are refused.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{Context, Result};

use crate::{TemperatureSensor, DISCONNECTED_C};

const W1_DEVICES: &str = "/sys/bus/w1/devices";

/// DS18B20 family code prefix in the w1 device id.
const DS18B20_FAMILY: &str = "28-";

pub struct W1Thermometer {
    path: PathBuf,
    in_flight: Option<Receiver<f32>>,
    last: f32,
}

impl W1Thermometer {
    /// Bind to a device id such as `28-0316a2799dff`.
    pub fn new(device_id: &str) -> Self {
        Self::at_path(Path::new(W1_DEVICES).join(device_id).join("w1_slave"))
    }

    /// Bind to the first DS18B20 found on the bus.
    pub fn discover() -> Result<Self> {
        let entries = fs::read_dir(W1_DEVICES)
            .with_context(|| format!("failed to list {W1_DEVICES} (is the w1-gpio overlay loaded?)"))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(id) = name.to_str().filter(|n| n.starts_with(DS18B20_FAMILY)) {
                tracing::info!(device = id, "ds18b20 discovered");
                return Ok(Self::new(id));
            }
        }
        anyhow::bail!("no DS18B20 found under {W1_DEVICES}")
    }

    fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            in_flight: None,
            last: DISCONNECTED_C,
        }
    }
}

impl TemperatureSensor for W1Thermometer {
    fn request_conversion(&mut self) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        let (tx, rx) = mpsc::channel();
        let path = self.path.clone();
        thread::spawn(move || {
            let celsius = match fs::read_to_string(&path) {
                Ok(body) => parse_w1_slave(&body).unwrap_or(DISCONNECTED_C),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "w1 read failed: {e}");
                    DISCONNECTED_C
                }
            };
            // Receiver may be gone if the station is shutting down.
            let _ = tx.send(celsius);
        });
        self.in_flight = Some(rx);
        true
    }

    fn read_celsius(&mut self) -> Option<f32> {
        if let Some(rx) = &self.in_flight {
            match rx.try_recv() {
                Ok(celsius) => self.last = celsius,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => self.last = DISCONNECTED_C,
            }
            self.in_flight = None;
        }
        Some(self.last)
    }
}

/// Parse the two-line `w1_slave` format:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
///
/// Returns `None` on a CRC failure or a malformed body.
pub fn parse_w1_slave(body: &str) -> Option<f32> {
    let mut lines = body.lines();
    let crc_line = lines.next()?;
    if !crc_line.trim_end().ends_with("YES") {
        return None;
    }
    let (_, milli) = lines.next()?.rsplit_once("t=")?;
    let milli: i32 = milli.trim().parse().ok()?;
    Some(milli as f32 / 1000.0)
}

// ===========================================================================
// Tests
// ===========================================================================
