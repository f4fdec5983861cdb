//! Magnification calibration and length formatting.
//!
//! The instrument is calibrated as "metres spanned by the full field of view at
//! 1x". At magnification `M` and a scan whose longer axis has `N` pixels, one
//! pixel covers `m_per_fov / M / N` metres.

use serde::{Deserialize, Serialize};

use crate::scan::ScanGeometry;

/// Field-of-view calibration loaded from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnificationCalibration {
    /// Metres spanned by the full field at unit magnification.
    pub m_per_fov: f64,
}

impl MagnificationCalibration {
    /// Edge length of one pixel in metres.
    #[must_use]
    pub fn pixel_size(&self, magnification: f64, geometry: &ScanGeometry) -> f64 {
        let full_fov_pixels = geometry.width().max(geometry.height()) as f64;
        self.m_per_fov / magnification / full_fov_pixels
    }

    /// Physical length of a line measured in pixels.
    #[must_use]
    pub fn measure(&self, pixels: f64, magnification: f64, geometry: &ScanGeometry) -> f64 {
        pixels * self.pixel_size(magnification, geometry)
    }
}

/// Format a length in metres with an SI prefix (mm, µm, nm) and five decimals.
///
/// Lengths above 1 m or at or below 1 nm are printed in plain metres.
#[must_use]
pub fn format_length(meters: f64) -> String {
    if meters <= 1.0 && meters > 1e-3 {
        format!("{:.5} mm", meters * 1e3)
    } else if meters <= 1e-3 && meters > 1e-6 {
        format!("{:.5} µm", meters * 1e6)
    } else if meters <= 1e-6 && meters > 1e-9 {
        format!("{:.5} nm", meters * 1e9)
    } else {
        format!("{:.5} m", meters)
    }
}
