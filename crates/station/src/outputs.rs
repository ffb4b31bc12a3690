//! Relay output pins. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation records and logs pin changes.
//!
//! Only logical on/off crosses this boundary. Polarity is resolved here:
//! most relay boards are active-low, so "on" drives the pin LOW.

use anyhow::Result;
use tracing::{debug, info};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// Pin level for a logical relay state. `true` = HIGH.
pub fn pin_level(on: bool, active_low: bool) -> bool {
    on != active_low
}

// ---------------------------------------------------------------------------
// Real GPIO relay board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct RelayOutputs {
    pins: Vec<OutputPin>,
    names: Vec<String>,
    applied: Vec<bool>,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl RelayOutputs {
    pub fn new(gpio_pins: &[u8], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::with_capacity(gpio_pins.len());

        for &pin_num in gpio_pins {
            let mut pin = gpio.get(pin_num)?.into_output();
            // Fail-safe: every relay starts off.
            if pin_level(false, active_low) {
                pin.set_high();
            } else {
                pin.set_low();
            }
            pins.push(pin);
        }

        info!(count = pins.len(), active_low, "relay outputs initialised");
        Ok(Self {
            names: default_names(pins.len()),
            applied: vec![false; pins.len()],
            pins,
            active_low,
        })
    }

    fn drive(&mut self, index: usize, on: bool) {
        let high = pin_level(on, self.active_low);
        if let Some(pin) = self.pins.get_mut(index) {
            if high {
                pin.set_high();
            } else {
                pin.set_low();
            }
            self.applied[index] = on;
            debug!(relay = %self.names[index], on, pin = pin.pin(), "relay output set");
        }
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct RelayOutputs {
    gpio_pins: Vec<u8>,
    names: Vec<String>,
    applied: Vec<bool>,
    active_low: bool,
    /// Electrical level last written per pin, `true` = HIGH.
    levels: Vec<bool>,
}

#[cfg(not(feature = "gpio"))]
impl RelayOutputs {
    pub fn new(gpio_pins: &[u8], active_low: bool) -> Result<Self> {
        for (i, pin) in gpio_pins.iter().enumerate() {
            debug!(relay = i + 1, gpio = pin, "[mock-gpio] registered relay (not wired)");
        }
        info!(count = gpio_pins.len(), "[mock-gpio] relay outputs initialised (no hardware)");
        Ok(Self {
            gpio_pins: gpio_pins.to_vec(),
            names: default_names(gpio_pins.len()),
            applied: vec![false; gpio_pins.len()],
            active_low,
            levels: vec![pin_level(false, active_low); gpio_pins.len()],
        })
    }

    fn drive(&mut self, index: usize, on: bool) {
        if let Some(level) = self.levels.get_mut(index) {
            *level = pin_level(on, self.active_low);
            self.applied[index] = on;
            debug!(
                relay = %self.names[index],
                on,
                gpio = self.gpio_pins[index],
                "[mock-gpio] relay output set"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Shared behaviour
// ---------------------------------------------------------------------------

fn default_names(count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("relay{n}")).collect()
}

impl RelayOutputs {
    /// Label relays in the logs. Relays without a name keep `relay<N>`.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (slot, name) in self.names.iter_mut().zip(names) {
            *slot = name.into();
        }
        for (n, name) in self.names.iter().enumerate() {
            debug!(relay = n + 1, name = %name, "relay labelled");
        }
        self
    }

    /// Bring the pins in line with the logical states. Only pins whose state
    /// differs from what was last applied are written.
    pub fn apply(&mut self, states: &[bool]) {
        for (index, &on) in states.iter().enumerate() {
            if self.applied.get(index).is_some_and(|&prev| prev != on) {
                self.drive(index, on);
            }
        }
    }

    pub fn all_off(&mut self) {
        for index in 0..self.applied.len() {
            self.drive(index, false);
        }
    }

    #[cfg(test)]
    pub fn applied(&self) -> &[bool] {
        &self.applied
    }

    #[cfg(test)]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// ===========================================================================
// Tests
// ===========================================================================
