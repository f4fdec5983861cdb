//! Mock scan device.
//!
//! Simulates the scan interface for tests and for the `raster_scan` binary
//! without physical hardware. All delays use `tokio::time::sleep`, never
//! `std::thread::sleep`.
//!
//! # Behavior
//!
//! - Each raster yields `geometry.pixels()` samples, sample `i` of a raster
//!   being `i` masked to 14 bits, so a captured canvas is easy to predict
//! - Chunks are `chunk_len` samples (the last chunk of a raster may be shorter)
//! - Free scans never end on their own
//! - An optional failure is injected after a fixed number of chunks
//! - Every command received is recorded

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::debug;

use crate::device::{ChunkStream, ControlCommand, DeviceCommand, ScanDevice};
use crate::error::DeviceError;
use crate::scan::ScanRequest;

/// Mask applied to simulated samples (14-bit ADC).
pub const MOCK_SAMPLE_MASK: usize = 0x3FFF;

/// Simulated scan device with predictable output.
///
/// Clones share the command history and chunk counter, so a test can keep a
/// clone after handing the device to a pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let device = MockScanDevice::new(4096).with_chunk_delay(Duration::from_millis(1));
/// let mut pipeline = ScanPipeline::new(device, PipelineConfig::default());
/// ```
#[derive(Debug, Clone)]
pub struct MockScanDevice {
    chunk_len: usize,
    chunk_delay: Option<Duration>,
    fail_after: Option<usize>,
    history: Arc<Mutex<Vec<DeviceCommand>>>,
    chunks_sent: Arc<AtomicUsize>,
}

impl MockScanDevice {
    /// Create a mock that streams `chunk_len` samples per chunk.
    ///
    /// # Panics
    /// Panics if `chunk_len` is 0.
    #[must_use]
    pub fn new(chunk_len: usize) -> Self {
        assert!(chunk_len > 0, "chunk length must be greater than 0");
        Self {
            chunk_len,
            chunk_delay: None,
            fail_after: None,
            history: Arc::new(Mutex::new(Vec::new())),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep before producing each chunk.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Fail with an I/O error once `chunks` chunks have been delivered.
    #[must_use]
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Commands received so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.history.lock().clone()
    }

    /// Chunks delivered so far across all scans.
    #[must_use]
    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent.load(Ordering::Acquire)
    }

    /// The sample the mock emits at raster position `index`.
    #[must_use]
    pub fn sample_at(index: usize) -> u16 {
        (index & MOCK_SAMPLE_MASK) as u16
    }
}

struct MockStream {
    offset: usize,
    /// `None` for a free scan.
    total: Option<usize>,
    chunk_len: usize,
    chunk_delay: Option<Duration>,
    fail_after: Option<usize>,
    chunks_sent: Arc<AtomicUsize>,
    done: bool,
}

impl MockStream {
    async fn next_chunk(mut self) -> Option<(Result<Vec<u16>, DeviceError>, Self)> {
        if self.done {
            return None;
        }
        let len = match self.total {
            Some(total) if self.offset >= total => return None,
            Some(total) => self.chunk_len.min(total - self.offset),
            None => self.chunk_len,
        };

        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(limit) = self.fail_after {
            if self.chunks_sent.load(Ordering::Acquire) >= limit {
                self.done = true;
                let err = io::Error::new(io::ErrorKind::ConnectionReset, "mock link dropped");
                return Some((Err(DeviceError::Io(err)), self));
            }
        }

        let chunk = (self.offset..self.offset + len)
            .map(MockScanDevice::sample_at)
            .collect();
        self.offset += len;
        self.chunks_sent.fetch_add(1, Ordering::AcqRel);
        Some((Ok(chunk), self))
    }
}

#[async_trait]
impl ScanDevice for MockScanDevice {
    async fn transfer(&mut self, command: ControlCommand) -> Result<(), DeviceError> {
        debug!(?command, "MockScanDevice: control command");
        self.history.lock().push(DeviceCommand::Single(command));
        Ok(())
    }

    fn scan(&mut self, request: ScanRequest) -> ChunkStream<'_> {
        debug!(
            cookie = request.cookie,
            width = request.geometry.width(),
            height = request.geometry.height(),
            mode = ?request.mode,
            "MockScanDevice: scan requested"
        );
        let total = request
            .mode
            .is_bounded()
            .then(|| request.geometry.pixels());
        self.history.lock().push(DeviceCommand::Streaming(request));

        let state = MockStream {
            offset: 0,
            total,
            chunk_len: self.chunk_len,
            chunk_delay: self.chunk_delay,
            fail_after: self.fail_after,
            chunks_sent: Arc::clone(&self.chunks_sent),
            done: false,
        };
        stream::unfold(state, MockStream::next_chunk).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{BeamType, ScanGeometry, ScanMode, ScanRange};

    fn request(width: u32, height: u32, mode: ScanMode) -> ScanRequest {
        ScanRequest {
            cookie: 7,
            geometry: ScanGeometry::new(
                ScanRange::new(0, width, 1).unwrap(),
                ScanRange::new(0, height, 1).unwrap(),
            ),
            dwell: 1,
            beam: BeamType::Electron,
            latency: 65536,
            mode,
        }
    }

    #[tokio::test]
    async fn test_bounded_scan_yields_one_raster() {
        let mut device = MockScanDevice::new(5);
        let chunks: Vec<_> = device
            .scan(request(4, 3, ScanMode::Single))
            .collect()
            .await;

        let lens: Vec<usize> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(lens, vec![5, 5, 2]);

        let samples: Vec<u16> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        let expected: Vec<u16> = (0..12).collect();
        assert_eq!(samples, expected);
        assert_eq!(device.chunks_sent(), 3);
    }

    #[tokio::test]
    async fn test_free_scan_is_open_ended() {
        let mut device = MockScanDevice::new(4);
        let chunks: Vec<_> = device
            .scan(request(2, 2, ScanMode::Free))
            .take(10)
            .collect()
            .await;
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks[9].as_ref().unwrap()[0], 36);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut device = MockScanDevice::new(2).fail_after(2);
        let chunks: Vec<_> = device
            .scan(request(4, 4, ScanMode::Single))
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_ok());
        assert!(matches!(chunks[2], Err(DeviceError::Io(_))));
    }

    #[tokio::test]
    async fn test_records_commands() {
        let mut device = MockScanDevice::new(16);
        let command = ControlCommand::ExternalCtrl {
            enable: true,
            beam: BeamType::Electron,
        };
        device.transfer(command).await.unwrap();
        let _ = device.scan(request(4, 4, ScanMode::Single));

        let history = device.commands();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], DeviceCommand::Single(command));
        assert!(history[1].is_streaming());
    }

    #[test]
    fn test_sample_mask() {
        assert_eq!(MockScanDevice::sample_at(0x4001), 1);
    }
}
