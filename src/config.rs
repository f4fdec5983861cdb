//! Pipeline configuration using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`PipelineConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `RASTER_`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! RASTER_TARGET_FPS=60
//! RASTER_CREDIT_CAPACITY=16
//! RASTER_BEAM=ion
//! ```
//!
//! # Example
//!
//! ```no_run
//! use raster_daq::config::PipelineConfig;
//!
//! let config = PipelineConfig::load(Some("microscope.toml".as_ref()))?;
//! println!("Refresh target: {} fps", config.target_fps);
//! # Ok::<(), raster_daq::error::ConfigError>(())
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::calibration::MagnificationCalibration;
use crate::credit::DEFAULT_CREDIT_CAPACITY;
use crate::error::ConfigError;
use crate::scan::BeamType;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RASTER_";

/// Settings consumed by the capture/display pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Display refresh target used to size the display quantum.
    pub target_fps: f64,
    /// Nanoseconds per device dwell tick.
    pub dwell_unit_ns: u64,
    /// Chunks allowed in flight between capture and display.
    pub credit_capacity: usize,
    /// Chunk latency hint forwarded with each scan request.
    pub latency: u32,
    /// Significant bits per device sample.
    pub sample_bits: u32,
    /// Beam used for external control and scans.
    pub beam: BeamType,
    /// Optional magnification calibration for length measurements.
    pub mag_cal: Option<MagnificationCalibration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            dwell_unit_ns: 125,
            credit_capacity: DEFAULT_CREDIT_CAPACITY,
            latency: 65536,
            sample_bits: 14,
            beam: BeamType::Electron,
            mag_cal: None,
        }
    }
}

impl PipelineConfig {
    /// Figment with defaults, the optional TOML file, and environment overrides.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load and validate the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(path))
    }

    /// Extract and validate from an existing figment.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: PipelineConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot drive a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(ConfigError::Validation(format!(
                "target_fps must be a positive number, got {}",
                self.target_fps
            )));
        }
        if self.dwell_unit_ns == 0 {
            return Err(ConfigError::Validation(
                "dwell_unit_ns must be greater than 0".into(),
            ));
        }
        if self.credit_capacity == 0 {
            return Err(ConfigError::Validation(
                "credit_capacity must be greater than 0".into(),
            ));
        }
        if !(1..=16).contains(&self.sample_bits) {
            return Err(ConfigError::Validation(format!(
                "sample_bits must be within 1..=16, got {}",
                self.sample_bits
            )));
        }
        if let Some(cal) = &self.mag_cal {
            if !(cal.m_per_fov.is_finite() && cal.m_per_fov > 0.0) {
                return Err(ConfigError::Validation(
                    "mag_cal.m_per_fov must be a positive number".into(),
                ));
            }
        }
        Ok(())
    }

    /// Dwell time in nanoseconds for a dwell given in device ticks.
    #[must_use]
    pub fn dwell_ns(&self, dwell: u16) -> u64 {
        u64::from(dwell) * self.dwell_unit_ns
    }
}
