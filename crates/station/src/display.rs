//! Local two-line status display.

use tracing::debug;

use crate::calibration::CalibratedSample;

/// Somewhere to put the two status lines. Rendering is up to the sink.
pub trait Display: Send {
    fn show(&mut self, lines: &[String; 2]);
}

/// Default sink: logs the lines at debug level.
pub struct LogDisplay;

impl Display for LogDisplay {
    fn show(&mut self, lines: &[String; 2]) {
        debug!(line1 = %lines[0], line2 = %lines[1], "display");
    }
}

/// Format the latest sample, or zeros before the first commit.
pub fn display_lines(latest: Option<&CalibratedSample>) -> [String; 2] {
    let (ph, temperature) = latest.map_or((0.0, 0.0), |s| (s.ph, s.temperature));
    [format!("pH: {ph:.2}"), format!("Temp: {temperature:.2} C")]
}
