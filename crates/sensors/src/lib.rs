//! Hardware boundary for the water-quality station.
//!
//! The station core never touches buses or pins directly. It pulls raw
//! analog counts through [`AnalogInput`] and drives the digital thermometer
//! through the two-phase [`TemperatureSensor`] protocol. The `sim` feature
//! (default) provides a stateful simulator for development without
//! hardware; `adc` enables the ADS1115 driver over I2C.

#[cfg(feature = "adc")]
pub mod ads1115;
pub mod onewire;
#[cfg(feature = "sim")]
pub mod sim;

/// Reading reported by a DS18B20-style probe that has dropped off the bus.
pub const DISCONNECTED_C: f32 = -127.0;

/// A source of raw ADC counts, one sample per input line per call.
pub trait AnalogInput: Send {
    /// Read one raw sample from `line`. Values are already clamped to the
    /// converter's full-scale range.
    fn sample(&mut self, line: u8) -> anyhow::Result<u16>;
}

/// Digital temperature probe with latent conversion.
///
/// `request_conversion` must return immediately; the result becomes
/// available to `read_celsius` once the conversion has finished.
pub trait TemperatureSensor: Send {
    /// Start a conversion. Returns `false` if the backend is still busy with
    /// the previous one and the request was not taken.
    fn request_conversion(&mut self) -> bool;

    /// Result of the most recent conversion in °C, [`DISCONNECTED_C`] when
    /// the probe is not responding, or `None` while a conversion is still
    /// running.
    fn read_celsius(&mut self) -> Option<f32>;
}

impl<T: AnalogInput + ?Sized> AnalogInput for Box<T> {
    fn sample(&mut self, line: u8) -> anyhow::Result<u16> {
        (**self).sample(line)
    }
}

impl<T: TemperatureSensor + ?Sized> TemperatureSensor for Box<T> {
    fn request_conversion(&mut self) -> bool {
        (**self).request_conversion()
    }

    fn read_celsius(&mut self) -> Option<f32> {
        (**self).read_celsius()
    }
}
