//! Device connection capability.
//!
//! The pipeline never touches the wire protocol. It talks to the instrument
//! through [`ScanDevice`], which offers two kinds of exchange:
//!
//! - **Single response**: a [`ControlCommand`] is sent and acknowledged once
//!   (synchronize, external beam control).
//! - **Streaming response**: a [`ScanRequest`] yields an ordered stream of
//!   sample chunks, finite for a bounded raster and open-ended for free scan.
//!
//! Which kind a command is gets decided where the command is built, through
//! [`DeviceCommand`], rather than discovered at runtime.

pub mod mock;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::DeviceError;
use crate::scan::{BeamType, ScanRequest};

/// Ordered chunks of 16-bit samples produced by a streaming exchange.
pub type ChunkStream<'a> = BoxStream<'a, Result<Vec<u16>, DeviceError>>;

/// Commands acknowledged with a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlCommand {
    /// Reset the device's command stream and select its idle raster mode.
    Synchronize {
        /// Cookie the device echoes back.
        cookie: u16,
        /// Leave the beam in raster mode once idle.
        raster_mode: bool,
    },
    /// Hand the beam's X/Y/video signals to (or back from) the scan interface.
    ExternalCtrl {
        /// Take control when true, release it when false.
        enable: bool,
        /// Beam column to switch.
        beam: BeamType,
    },
}

/// A device exchange tagged with its response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceCommand {
    /// Exactly one response.
    Single(ControlCommand),
    /// A stream of sample chunks.
    Streaming(ScanRequest),
}

impl DeviceCommand {
    /// Whether the exchange produces a chunk stream.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, DeviceCommand::Streaming(_))
    }
}

impl From<ControlCommand> for DeviceCommand {
    fn from(command: ControlCommand) -> Self {
        DeviceCommand::Single(command)
    }
}

impl From<ScanRequest> for DeviceCommand {
    fn from(request: ScanRequest) -> Self {
        DeviceCommand::Streaming(request)
    }
}

/// Connection to raster scanning hardware.
///
/// Implementations own the transport. The pipeline drives one session at a
/// time and holds `&mut self` for its duration.
#[async_trait]
pub trait ScanDevice: Send {
    /// Send a single-response command and wait for its acknowledgement.
    async fn transfer(&mut self, command: ControlCommand) -> Result<(), DeviceError>;

    /// Start a streaming scan.
    ///
    /// Chunks arrive in raster order. A bounded request ends after
    /// `geometry.pixels()` samples; a free scan runs until the stream is dropped.
    fn scan(&mut self, request: ScanRequest) -> ChunkStream<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{ScanGeometry, ScanMode};

    #[test]
    fn test_command_tagging() {
        let control: DeviceCommand = ControlCommand::Synchronize {
            cookie: 1,
            raster_mode: true,
        }
        .into();
        assert!(!control.is_streaming());

        let request = ScanRequest {
            cookie: 2,
            geometry: ScanGeometry::full_field(16, 16).unwrap(),
            dwell: 1,
            beam: BeamType::Electron,
            latency: 65536,
            mode: ScanMode::Single,
        };
        assert!(DeviceCommand::from(request).is_streaming());
    }
}
