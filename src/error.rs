//! Custom error types for the acquisition pipeline.
//!
//! This module defines one error enum per concern and the aggregate `ScanError`
//! returned by the high-level pipeline API. Using the `thiserror` crate, every
//! lower-level error converts into `ScanError` through `#[from]`, so the `?`
//! operator composes across the frame, device, and configuration layers.
//!
//! ## Error Hierarchy
//!
//! - **`Shape`**: A chunk or fill request did not match the frame geometry. This
//!   is a contract violation by the producer side and aborts the session; data is
//!   never silently truncated or padded.
//! - **`Range`**: A scan axis was built with a zero count or zero step.
//! - **`Capture`**: The device failed while a chunk was being retrieved, or the
//!   consumer side went away mid-session.
//! - **`Config`**: Configuration could not be loaded or failed validation.
//! - **`Export`**: An export sink could not persist the canvas.
//! - **`Join`**: The display thread panicked or was cancelled.
//!
//! Backpressure is never an error. A producer that runs out of credits simply
//! waits.

use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Geometry contract violations between incoming samples and a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// A full-frame fill was given the wrong number of samples.
    #[error("expected {expected} samples for a full frame, got {actual}")]
    FillLength {
        /// Samples required (`width * height`).
        expected: usize,
        /// Samples supplied.
        actual: usize,
    },

    /// A row fill was given a sample count that is not a whole number of rows.
    #[error("invalid shape: {len} samples is not a multiple of row width {width}")]
    PartialRow {
        /// Samples supplied.
        len: usize,
        /// Frame width.
        width: usize,
    },

    /// A display quantum that cannot be written as whole rows.
    #[error("quantum of {quantum} samples is invalid for a {width}x{height} frame")]
    InvalidQuantum {
        /// Offending quantum.
        quantum: usize,
        /// Frame width.
        width: usize,
        /// Frame height.
        height: usize,
    },
}

/// Invalid scan axis parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Sample count must be strictly positive.
    #[error("scan range count must be greater than 0")]
    ZeroCount,

    /// Step must be strictly positive.
    #[error("scan range step must be greater than 0")]
    ZeroStep,

    /// Requested resolution is zero or wider than the DAC field.
    #[error("resolution {0} is outside the supported range 1..={max}", max = crate::scan::DAC_FIELD)]
    Resolution(u32),
}

/// Failures reported by the device connection.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device replied with something the connection could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is gone.
    #[error("device disconnected")]
    Disconnected,
}

/// Errors that abort a capture session on the producer side.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Device I/O failed while retrieving a chunk or sending a control command.
    #[error("device error during capture: {0}")]
    Device(#[from] DeviceError),

    /// The consumer closed the credit pool after failing.
    #[error("credit pool closed by the display loop")]
    CreditPoolClosed,

    /// The consumer dropped its end of the chunk queue.
    #[error("chunk queue closed by the display loop")]
    QueueClosed,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Figment could not extract the configuration.
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are logically invalid.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Top-level error for pipeline sessions.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Frame geometry violation.
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Invalid scan axis.
    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    /// Producer-side failure.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Configuration failure.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An export sink failed to persist the frame.
    #[error("Export error: {0}")]
    Export(#[from] std::io::Error),

    /// The display thread did not finish cleanly.
    #[error("Display thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<DeviceError> for ScanError {
    fn from(err: DeviceError) -> Self {
        ScanError::Capture(CaptureError::Device(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_display() {
        let err = ShapeError::PartialRow { len: 10, width: 4 };
        assert_eq!(
            err.to_string(),
            "invalid shape: 10 samples is not a multiple of row width 4"
        );
    }

    #[test]
    fn test_device_error_nests_into_scan_error() {
        let err: ScanError = DeviceError::Protocol("bad header".into()).into();
        assert!(matches!(
            err,
            ScanError::Capture(CaptureError::Device(DeviceError::Protocol(_)))
        ));
        assert!(err.to_string().contains("bad header"));
    }

    #[test]
    fn test_resolution_error_mentions_field() {
        let err = RangeError::Resolution(0);
        assert_eq!(
            err.to_string(),
            "resolution 0 is outside the supported range 1..=16384"
        );
    }
}
