//! Capture/display session orchestration.
//!
//! A session wires one [`CaptureLoop`] (async, on the caller's task) to one
//! [`DisplayLoop`] (blocking thread) through an unbounded queue whose depth is
//! bounded by a [`CreditPool`]:
//!
//! ```text
//!   device ──chunks──> CaptureLoop ──(chunk, credit)──> queue ──> DisplayLoop ──> RenderSink
//!                          ^                                          │
//!                          └──────────── credit returned ─────────────┘
//! ```
//!
//! [`ScanPipeline`] owns the device, the frame (reused between sessions of the
//! same geometry), the render sink, and the interrupt flag. Callers get a
//! [`SessionReport`] once the display loop has drained everything the
//! producer enqueued.
//!
//! # Example
//!
//! ```no_run
//! use raster_daq::config::PipelineConfig;
//! use raster_daq::device::mock::MockScanDevice;
//! use raster_daq::pipeline::ScanPipeline;
//! use raster_daq::scan::ScanGeometry;
//!
//! # async fn run() -> raster_daq::error::ScanResult<()> {
//! let mut pipeline = ScanPipeline::new(MockScanDevice::new(4096), PipelineConfig::default());
//! let report = pipeline.capture_single(ScanGeometry::full_field(512, 512)?, 2).await?;
//! println!("{} updates", report.updates);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod display;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::accumulator::ChunkAccumulator;
use crate::config::PipelineConfig;
use crate::credit::{Credit, CreditPool};
use crate::device::ScanDevice;
use crate::error::ScanResult;
use crate::frame::Frame;
use crate::scan::{ScanGeometry, ScanMode};
use crate::sink::{ExportSink, NullRenderSink, RenderSink};

pub use capture::{CaptureLoop, CapturePlan, CaptureStats};
pub use display::{DisplayLoop, DisplayOutcome, DisplayStats};

/// A chunk waiting in the display queue, holding the credit it was sent with.
#[derive(Debug)]
pub struct QueuedChunk {
    /// 1-based position within the session.
    pub sequence: u64,
    /// Raw device samples.
    pub samples: Vec<u16>,
    /// Returned to the pool when the chunk has been written (or dropped).
    pub credit: Credit,
}

/// Producer lifecycle, observable through [`ScanPipeline::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No session in progress.
    #[default]
    Idle,
    /// Requesting and enqueueing chunks.
    Running,
    /// No more requests; the display loop is finishing the queue.
    Draining,
}

/// Sticky stop request shared with the UI or a signal handler.
///
/// Once set it stays set until the next session starts.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    /// Ask the running session to stop requesting chunks.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wrapping 16-bit cookie counter used to tag requests to the device.
#[derive(Debug, Clone, Default)]
pub struct SessionCookies {
    next: u16,
}

impl SessionCookies {
    /// Take the next cookie.
    pub fn issue(&mut self) -> u16 {
        let cookie = self.next;
        self.next = self.next.wrapping_add(1);
        cookie
    }

    /// The cookie the next request will carry.
    #[must_use]
    pub fn peek(&self) -> u16 {
        self.next
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Mode the session ran in.
    pub mode: ScanMode,
    /// Chunks the producer enqueued.
    pub chunks: u64,
    /// Samples the producer enqueued.
    pub samples: u64,
    /// Rasters the device completed.
    pub rasters: u64,
    /// Render updates published.
    pub updates: u64,
    /// Samples that never filled a quantum.
    pub residual: usize,
    /// Samples per display update.
    pub quantum: usize,
    /// Row where the next write would have landed.
    pub cursor: usize,
    /// Whether the session ended on the interrupt flag.
    pub interrupted: bool,
    /// Most credits ever outstanding at once.
    pub peak_outstanding: usize,
    /// Pool size for this session.
    pub credit_capacity: usize,
    /// Credits still outstanding after the drain; zero for a healthy session.
    pub outstanding_after: usize,
    /// Wall time from first request to drained queue.
    pub elapsed: Duration,
}

/// Owns a scan device and runs capture sessions against it.
pub struct ScanPipeline<D> {
    device: D,
    config: PipelineConfig,
    interrupt: InterruptHandle,
    state: watch::Sender<CaptureState>,
    cookies: SessionCookies,
    frame: Option<Frame>,
    render: Option<Box<dyn RenderSink>>,
}

impl<D: ScanDevice> ScanPipeline<D> {
    /// Create an idle pipeline. Updates are discarded until a render sink is set.
    #[must_use]
    pub fn new(device: D, config: PipelineConfig) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            device,
            config,
            interrupt: InterruptHandle::default(),
            state,
            cookies: SessionCookies::default(),
            frame: None,
            render: None,
        }
    }

    /// Builder form of [`set_render_sink`](Self::set_render_sink).
    #[must_use]
    pub fn with_render_sink(mut self, sink: impl RenderSink + 'static) -> Self {
        self.set_render_sink(sink);
        self
    }

    /// Replace the sink that receives frame updates.
    pub fn set_render_sink(&mut self, sink: impl RenderSink + 'static) {
        self.render = Some(Box::new(sink));
    }

    /// Handle for stopping a session from another task or thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Request the running session to stop.
    pub fn interrupt(&self) {
        self.interrupt.set();
    }

    /// Current producer state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Observe producer state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// The pipeline settings.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The frame from the last session, if any.
    #[must_use]
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// The underlying device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the underlying device between sessions.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Acquire one raster and stop.
    pub async fn capture_single(
        &mut self,
        geometry: ScanGeometry,
        dwell: u16,
    ) -> ScanResult<SessionReport> {
        self.run_session(geometry, dwell, ScanMode::Single).await
    }

    /// Acquire rasters back to back until interrupted.
    pub async fn capture_live(
        &mut self,
        geometry: ScanGeometry,
        dwell: u16,
    ) -> ScanResult<SessionReport> {
        self.run_session(geometry, dwell, ScanMode::Live).await
    }

    /// Stream one open-ended raster until interrupted.
    pub async fn free_scan(
        &mut self,
        geometry: ScanGeometry,
        dwell: u16,
    ) -> ScanResult<SessionReport> {
        self.run_session(geometry, dwell, ScanMode::Free).await
    }

    /// Run one complete session and wait for the display loop to drain.
    ///
    /// Clears any pending interrupt first. Invalid settings are rejected before
    /// the device is touched. Device failures and shape errors
    /// abort the session; in every case all credits are back in the pool and
    /// the state is [`CaptureState::Idle`] when this returns.
    pub async fn run_session(
        &mut self,
        geometry: ScanGeometry,
        dwell: u16,
        mode: ScanMode,
    ) -> ScanResult<SessionReport> {
        self.config.validate()?;
        self.interrupt.clear();
        let started = Instant::now();

        let frame = match self.frame.take() {
            Some(frame) if frame.matches(&geometry) => {
                debug!("Reusing frame from previous session");
                frame
            }
            _ => Frame::new(geometry, self.config.sample_bits),
        };
        let accumulator = ChunkAccumulator::for_refresh(
            frame,
            self.config.dwell_ns(dwell),
            self.config.target_fps,
        );
        let quantum = accumulator.quantum();

        let credits = CreditPool::new(self.config.credit_capacity);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let render = self
            .render
            .take()
            .unwrap_or_else(|| Box::new(NullRenderSink) as Box<dyn RenderSink>);

        let display = DisplayLoop::new(queue_rx, accumulator, Arc::clone(&credits), render);
        let display_task = tokio::task::spawn_blocking(move || display.run());

        let plan = CapturePlan {
            geometry,
            dwell,
            mode,
            latency: self.config.latency,
            beam: self.config.beam,
        };
        let capture = CaptureLoop::new(
            &mut self.device,
            Arc::clone(&credits),
            queue_tx,
            self.interrupt.clone(),
            &self.state,
            &mut self.cookies,
        );
        let capture_result = capture.run(plan).await;

        let joined = display_task.await;
        self.state.send_replace(CaptureState::Idle);
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "Display thread did not complete");
                return Err(err.into());
            }
        };

        self.frame = Some(outcome.frame);
        self.render = Some(outcome.render);

        let outstanding_after = credits.outstanding();
        if outstanding_after != 0 {
            warn!(outstanding_after, "Credits still outstanding after drain");
        }

        outcome.result?;
        let stats = capture_result?;

        let report = SessionReport {
            mode,
            chunks: stats.chunks,
            samples: stats.samples,
            rasters: stats.rasters,
            updates: outcome.stats.updates,
            residual: outcome.stats.residual,
            quantum,
            cursor: self.frame.as_ref().map_or(0, Frame::cursor),
            interrupted: stats.interrupted,
            peak_outstanding: credits.peak_outstanding(),
            credit_capacity: credits.capacity(),
            outstanding_after,
            elapsed: started.elapsed(),
        };
        info!(
            mode = ?report.mode,
            chunks = report.chunks,
            updates = report.updates,
            interrupted = report.interrupted,
            peak_outstanding = report.peak_outstanding,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Session complete"
        );
        Ok(report)
    }

    /// Hand the current frame to `sink` as 8- and 16-bit images.
    ///
    /// Returns `Ok(false)` when no frame has been captured yet.
    pub fn export(&self, sink: &mut dyn ExportSink) -> ScanResult<bool> {
        let Some(frame) = &self.frame else {
            warn!("Export requested before any frame was captured");
            return Ok(false);
        };
        let bundle = frame.export_bundle();
        info!(name = %bundle.name_hint, width = bundle.width, height = bundle.height, "Exporting frame");
        sink.export(bundle)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockScanDevice;
    use crate::scan::ScanRange;
    use tracing_test::traced_test;

    fn geometry(width: u32, height: u32) -> ScanGeometry {
        ScanGeometry::new(
            ScanRange::new(0, width, 1).unwrap(),
            ScanRange::new(0, height, 1).unwrap(),
        )
    }

    #[test]
    fn test_cookies_wrap() {
        let mut cookies = SessionCookies { next: u16::MAX };
        assert_eq!(cookies.issue(), u16::MAX);
        assert_eq!(cookies.issue(), 0);
        assert_eq!(cookies.peek(), 1);
    }

    #[test]
    fn test_interrupt_is_sticky_until_cleared() {
        let handle = InterruptHandle::default();
        let other = handle.clone();
        assert!(!handle.is_set());
        other.set();
        other.set();
        assert!(handle.is_set());
        handle.clear();
        assert!(!other.is_set());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_session_logs_lifecycle() {
        let mut pipeline = ScanPipeline::new(MockScanDevice::new(4), PipelineConfig::default());
        let report = pipeline.capture_single(geometry(4, 3), 1).await.unwrap();

        assert_eq!(report.updates, 1);
        assert!(logs_contain("Capture started"));
        assert!(logs_contain("Device back in idle raster mode"));
        assert!(logs_contain("Session complete"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reuse_logged_for_matching_geometry() {
        let mut pipeline = ScanPipeline::new(MockScanDevice::new(4), PipelineConfig::default());
        pipeline.capture_single(geometry(4, 3), 1).await.unwrap();
        assert!(!logs_contain("Reusing frame"));

        pipeline.capture_single(geometry(4, 3), 1).await.unwrap();
        assert!(logs_contain("Reusing frame"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_device_failure_logged_as_abort() {
        let device = MockScanDevice::new(4).fail_after(1);
        let mut pipeline = ScanPipeline::new(device, PipelineConfig::default());
        let result = pipeline.capture_single(geometry(4, 3), 1).await;

        assert!(result.is_err());
        assert!(logs_contain("Capture aborted"));
        assert_eq!(pipeline.state(), CaptureState::Idle);
    }
}
