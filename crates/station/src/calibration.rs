//! Transfer functions from filtered channel voltage to physical units.
//!
//! Every function here is pure and total: undefined or sentinel inputs map
//! to the quantity's rest value (0) instead of an error, so a bad probe can
//! never push garbage into the automation rules.

use aquamon_sensors::DISCONNECTED_C;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelReadings;
use crate::error::StationError;

/// Dissolved-oxygen saturation in mg/L at 0..=40 °C, one entry per degree.
const OXYGEN_SATURATION_MG_L: [f64; 41] = [
    14.46, 14.22, 13.82, 13.44, 13.09, 12.74, 12.42, 12.11, 11.81, 11.53, 11.26, 11.01, 10.77,
    10.53, 10.30, 10.08, 9.86, 9.66, 9.46, 9.27, 9.08, 8.90, 8.73, 8.57, 8.41, 8.25, 8.11, 7.96,
    7.82, 7.69, 7.56, 7.43, 7.30, 7.18, 7.07, 6.95, 6.84, 6.73, 6.63, 6.53, 6.41,
];

/// Galvanic probe output shift per °C away from the calibration point.
const OXYGEN_MV_PER_C: f64 = 35.0;

/// Per-device calibration constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub ph_slope: f64,
    pub ph_intercept: f64,
    /// Voltage at or below which the water reads as maximally turbid.
    pub turbidity_dirty_v: f64,
    /// Voltage at or above which the water reads as perfectly clear.
    pub turbidity_clear_v: f64,
    pub ntu_max: f64,
    /// Probe output in saturated water at `oxygen_cal_temp_c`.
    pub oxygen_cal_mv: f64,
    pub oxygen_cal_temp_c: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            ph_slope: -5.70,
            ph_intercept: 21.34,
            turbidity_dirty_v: 0.0,
            turbidity_clear_v: 1.53,
            ntu_max: 100.0,
            oxygen_cal_mv: 1600.0,
            oxygen_cal_temp_c: 25.0,
        }
    }
}

/// The four physical readings committed once per commit tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CalibratedSample {
    pub ph: f64,
    pub turbidity: f64,
    pub oxygen: f64,
    pub temperature: f64,
}

impl Calibration {
    /// Calibrate one set of channel readings against the current probe
    /// temperature.
    pub fn sample(&self, readings: &ChannelReadings, temperature_c: f64) -> CalibratedSample {
        CalibratedSample {
            ph: ph(readings.ph.voltage, self.ph_slope, self.ph_intercept),
            turbidity: turbidity(
                readings.turbidity.voltage,
                self.turbidity_dirty_v,
                self.turbidity_clear_v,
                self.ntu_max,
            ),
            oxygen: dissolved_oxygen(
                readings.oxygen.voltage,
                temperature_c,
                self.oxygen_cal_mv,
                self.oxygen_cal_temp_c,
            ),
            temperature: temperature_c,
        }
    }
}

pub fn ph(voltage: f64, slope: f64, intercept: f64) -> f64 {
    slope * voltage + intercept
}

/// Inverse linear map of the clamped voltage onto `[0, ntu_max]`.
pub fn turbidity(voltage: f64, dirty_v: f64, clear_v: f64, ntu_max: f64) -> f64 {
    if clear_v <= dirty_v {
        return 0.0;
    }
    let v = voltage.clamp(dirty_v, clear_v);
    let ntu = ntu_max * (clear_v - v) / (clear_v - dirty_v);
    ntu.clamp(0.0, ntu_max)
}

/// Saturation concentration at a whole-degree index, 0..=40 °C.
pub fn oxygen_saturation(index_c: usize) -> f64 {
    OXYGEN_SATURATION_MG_L[index_c.min(OXYGEN_SATURATION_MG_L.len() - 1)]
}

/// Single-point temperature-compensated dissolved oxygen in mg/L.
pub fn dissolved_oxygen(voltage: f64, temperature_c: f64, cal_mv: f64, cal_temp_c: f64) -> f64 {
    let index = if temperature_c.is_nan() {
        0
    } else {
        temperature_c.clamp(0.0, 40.0).round() as usize
    };
    let saturation_mv = cal_mv + OXYGEN_MV_PER_C * (index as f64 - cal_temp_c);
    if saturation_mv <= 0.0 {
        return 0.0;
    }
    voltage * 1000.0 * oxygen_saturation(index) / saturation_mv
}

/// Validate a raw probe reading.
pub fn probe_temperature(raw_c: f32) -> Result<f64, StationError> {
    if raw_c == DISCONNECTED_C || !raw_c.is_finite() {
        return Err(StationError::SensorDisconnected);
    }
    Ok(f64::from(raw_c))
}

/// Probe reading in °C, with the disconnected sentinel mapped to 0.
pub fn temperature(raw_c: f32) -> f64 {
    probe_temperature(raw_c).unwrap_or(0.0)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Reading;
    use proptest::prelude::*;

    const CLEAR: f64 = 1.53;

    // -- pH --------------------------------------------------------------

    #[test]
    fn ph_linear_fit() {
        let cal = Calibration::default();
        assert!((ph(2.5, cal.ph_slope, cal.ph_intercept) - 7.09).abs() < 1e-9);
        assert!((ph(0.0, cal.ph_slope, cal.ph_intercept) - 21.34).abs() < 1e-9);
    }

    // -- Turbidity -------------------------------------------------------

    #[test]
    fn turbidity_endpoints() {
        assert_eq!(turbidity(0.0, 0.0, CLEAR, 100.0), 100.0);
        assert_eq!(turbidity(-0.5, 0.0, CLEAR, 100.0), 100.0);
        assert_eq!(turbidity(CLEAR, 0.0, CLEAR, 100.0), 0.0);
        assert_eq!(turbidity(3.3, 0.0, CLEAR, 100.0), 0.0);
    }

    #[test]
    fn turbidity_midpoint() {
        let ntu = turbidity(CLEAR / 2.0, 0.0, CLEAR, 100.0);
        assert!((ntu - 50.0).abs() < 1e-9, "got {ntu}");
    }

    #[test]
    fn turbidity_degenerate_bounds_read_zero() {
        assert_eq!(turbidity(1.0, 1.5, 1.5, 100.0), 0.0);
    }

    // -- Dissolved oxygen ------------------------------------------------

    #[test]
    fn oxygen_at_calibration_point_equals_table() {
        let mg_l = dissolved_oxygen(1.6, 25.0, 1600.0, 25.0);
        assert!((mg_l - 8.25).abs() < 1e-9, "got {mg_l}");
    }

    #[test]
    fn oxygen_compensates_for_temperature() {
        // At 20 °C the saturation voltage is 1600 - 5*35 = 1425 mV.
        let mg_l = dissolved_oxygen(1.425, 20.0, 1600.0, 25.0);
        assert!((mg_l - 9.08).abs() < 1e-9, "got {mg_l}");
    }

    #[test]
    fn oxygen_temperature_is_clamped_into_table() {
        let hot = dissolved_oxygen(1.0, 80.0, 1600.0, 25.0);
        let at_40 = dissolved_oxygen(1.0, 40.0, 1600.0, 25.0);
        assert_eq!(hot, at_40);
        let cold = dissolved_oxygen(1.0, -5.0, 1600.0, 25.0);
        let at_0 = dissolved_oxygen(1.0, 0.0, 1600.0, 25.0);
        assert_eq!(cold, at_0);
    }

    #[test]
    fn oxygen_non_positive_saturation_reads_zero() {
        assert_eq!(dissolved_oxygen(1.0, 0.0, 100.0, 25.0), 0.0);
    }

    #[test]
    fn oxygen_table_is_monotonic() {
        for t in 1..=40 {
            assert!(oxygen_saturation(t) < oxygen_saturation(t - 1));
        }
        assert_eq!(oxygen_saturation(99), oxygen_saturation(40));
    }

    // -- Temperature -----------------------------------------------------

    #[test]
    fn temperature_passthrough() {
        assert_eq!(temperature(23.5), 23.5);
        assert_eq!(temperature(-4.0), -4.0);
    }

    #[test]
    fn disconnected_probe_maps_to_zero() {
        assert_eq!(temperature(DISCONNECTED_C), 0.0);
        assert_eq!(temperature(f32::NAN), 0.0);
        assert_eq!(
            probe_temperature(DISCONNECTED_C),
            Err(StationError::SensorDisconnected)
        );
    }

    // -- Whole sample ----------------------------------------------------

    #[test]
    fn sample_combines_all_channels() {
        let readings = ChannelReadings {
            ph: Reading {
                voltage: 2.5,
                percent: 0.0,
            },
            turbidity: Reading {
                voltage: CLEAR,
                percent: 0.0,
            },
            oxygen: Reading {
                voltage: 1.6,
                percent: 0.0,
            },
            potentiometer: Reading::default(),
        };
        let s = Calibration::default().sample(&readings, 25.0);
        assert!((s.ph - 7.09).abs() < 1e-9);
        assert_eq!(s.turbidity, 0.0);
        assert!((s.oxygen - 8.25).abs() < 1e-9);
        assert_eq!(s.temperature, 25.0);
    }

    proptest! {
        #[test]
        fn turbidity_is_bounded_and_non_increasing(a in -1.0f64..4.0, b in -1.0f64..4.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let t_lo = turbidity(lo, 0.0, CLEAR, 100.0);
            let t_hi = turbidity(hi, 0.0, CLEAR, 100.0);
            prop_assert!((0.0..=100.0).contains(&t_lo));
            prop_assert!((0.0..=100.0).contains(&t_hi));
            prop_assert!(t_hi <= t_lo);
        }
    }
}
