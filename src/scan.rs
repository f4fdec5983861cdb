//! Raster scan description types.
//!
//! A raster scan sweeps the beam over an X/Y grid of DAC codes. Each axis is a
//! [`ScanRange`]; together they form a [`ScanGeometry`], which fixes the frame
//! size. A [`ScanRequest`] adds the acquisition parameters sent to the device
//! for one session step.

use serde::{Deserialize, Serialize};

use crate::error::RangeError;

/// Width of the DAC field in codes (14-bit deflection DACs).
pub const DAC_FIELD: u32 = 16384;

/// Step values are expressed in 1/256 of a DAC code.
pub const STEP_FRACTION: u32 = 256;

/// One axis of a raster scan.
///
/// `count` and `step` are strictly positive; this is enforced by [`ScanRange::new`]
/// and the type is immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScanRange {
    start: u32,
    count: u32,
    step: u32,
}

impl ScanRange {
    /// Create a validated scan axis.
    pub fn new(start: u32, count: u32, step: u32) -> Result<Self, RangeError> {
        if count == 0 {
            return Err(RangeError::ZeroCount);
        }
        if step == 0 {
            return Err(RangeError::ZeroStep);
        }
        Ok(Self { start, count, step })
    }

    /// First DAC code of the axis.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Number of samples along the axis.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Distance between samples, in 1/256 DAC codes.
    #[must_use]
    pub fn step(&self) -> u32 {
        self.step
    }
}

/// The pair of axes that defines a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScanGeometry {
    /// Horizontal axis (row width).
    pub x: ScanRange,
    /// Vertical axis (row count).
    pub y: ScanRange,
}

impl ScanGeometry {
    /// Combine two axes.
    #[must_use]
    pub fn new(x: ScanRange, y: ScanRange) -> Self {
        Self { x, y }
    }

    /// Geometry spanning the whole DAC field at the given resolution.
    ///
    /// The longer axis covers the full field; both axes share the same step so
    /// pixels stay square.
    pub fn full_field(x_resolution: u32, y_resolution: u32) -> Result<Self, RangeError> {
        for res in [x_resolution, y_resolution] {
            if res == 0 || res > DAC_FIELD {
                return Err(RangeError::Resolution(res));
            }
        }
        let full_fov_pixels = x_resolution.max(y_resolution);
        let step = DAC_FIELD * STEP_FRACTION / full_fov_pixels;
        Ok(Self {
            x: ScanRange::new(0, x_resolution, step)?,
            y: ScanRange::new(0, y_resolution, step)?,
        })
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.x.count as usize
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.y.count as usize
    }

    /// Total pixels in one frame.
    #[must_use]
    pub fn pixels(&self) -> usize {
        self.width() * self.height()
    }
}

/// Which beam column a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeamType {
    /// Scanning electron column.
    #[default]
    Electron,
    /// Focused ion column.
    Ion,
}

/// How a session drives the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// One full raster, then stop.
    Single,
    /// Repeat full rasters until interrupted.
    Live,
    /// Open-ended device stream until interrupted.
    Free,
}

impl ScanMode {
    /// Whether the device stream for this mode ends on its own.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        !matches!(self, ScanMode::Free)
    }
}

/// Parameters for one streaming scan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    /// Session cookie echoed by the device.
    pub cookie: u16,
    /// Frame geometry.
    pub geometry: ScanGeometry,
    /// Dwell per pixel, in device ticks.
    pub dwell: u16,
    /// Beam to scan.
    pub beam: BeamType,
    /// Chunk latency hint forwarded to the device.
    pub latency: u32,
    /// Bounded raster or free-running stream.
    pub mode: ScanMode,
}
