//! ADS1115 16-bit ADC driver over I2C for the analog water-quality probes.
//!
//! Reads single-ended channels at PGA ±4.096 V, 860 SPS, single-shot mode.
//! Configure the station with `full_scale = 32767` and
//! `reference_voltage = 4.096` when using this backend.

use rppal::i2c::I2c;
use std::{thread, time::Duration};

use anyhow::{ensure, Context, Result};

use crate::AnalogInput;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS      : write 1 to start single-shot conversion
//   [14:12] MUX     : input multiplexer (channel selection)
//   [11:9]  PGA     : programmable gain amplifier
//   [8]     MODE    : 0 = continuous, 1 = single-shot
//   [7:5]   DR      : data rate
//   [4:2]   comparator mode/polarity/latch
//   [1:0]   COMP_QUE: 11 = disable comparator (default)

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
/// DR=111 (860 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_111_0_0_0_11;

/// MUX values for single-ended reads (AINx vs GND).
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

pub const MAX_LINE: u8 = 3;

/// Single-ended full scale (15-bit unsigned).
pub const FULL_SCALE: u16 = 32767;

/// Conversion time at 860 SPS is ~1.2 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(2);

/// Bit 15 of the config register reads back 1 once the conversion is done.
const OS_READY_BIT: u16 = 1 << 15;

fn config_for_line(line: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(line)] << MUX_SHIFT)
}

/// Parse an I2C address such as `"0x48"` or `"72"`.
pub fn parse_address(s: &str) -> Result<u16> {
    let s = s.trim();
    let addr = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .with_context(|| format!("invalid I2C address {s:?}"))?;
    ensure!(
        (0x48..=0x4B).contains(&addr),
        "ADS1115 address {addr:#04x} must be 0x48-0x4b"
    );
    Ok(addr)
}

pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    /// Open I2C bus 1 and address the ADS1115 at `addr`.
    pub fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(addr = format_args!("0x{addr:02x}"), "ads1115 initialised");

        Ok(Self { i2c })
    }

    fn read_line(&mut self, line: u8) -> Result<i16> {
        let config = config_for_line(line);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

impl AnalogInput for Ads1115 {
    fn sample(&mut self, line: u8) -> Result<u16> {
        ensure!(
            line <= MAX_LINE,
            "ADS1115 input {line} out of range (0-{MAX_LINE})"
        );
        let raw = self
            .read_line(line)
            .with_context(|| format!("ads1115 read failed on AIN{line}"))?;
        // Single-ended reads are non-negative; clamp against bus corruption.
        Ok(raw.max(0) as u16)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- Config register construction -----------------------------------------

    #[test]
    fn config_register_per_line() {
        assert_eq!(config_for_line(0), 0xC3E3);
        assert_eq!(config_for_line(1), 0xD3E3);
        assert_eq!(config_for_line(2), 0xE3E3);
        assert_eq!(config_for_line(3), 0xF3E3);
    }

    #[test]
    fn config_base_has_correct_pga() {
        let pga = (CONFIG_BASE >> 9) & 0b111;
        assert_eq!(pga, 0b001, "PGA should be ±4.096 V");
    }

    #[test]
    fn config_base_is_single_shot() {
        assert_eq!((CONFIG_BASE >> 8) & 1, 1);
    }

    #[test]
    fn config_base_data_rate_860sps() {
        assert_eq!((CONFIG_BASE >> 5) & 0b111, 0b111);
    }

    // -- Address parsing ------------------------------------------------------

    #[test]
    fn parse_address_hex_and_decimal() {
        assert_eq!(parse_address("0x48").unwrap(), 0x48);
        assert_eq!(parse_address(" 0X49 ").unwrap(), 0x49);
        assert_eq!(parse_address("74").unwrap(), 0x4A);
    }

    #[test]
    fn parse_address_rejects_garbage_and_out_of_range() {
        assert!(parse_address("zz").is_err());
        assert!(parse_address("0x27").is_err());
    }
}
