//! Producer side: drives the device and feeds the chunk queue.
//!
//! # State machine
//!
//! ```text
//! Idle --run()--> Running --(stream exhausted | interrupt)--> Draining --(display drained)--> Idle
//! ```
//!
//! The loop takes a credit before every chunk request, so at most
//! `credit_capacity` chunks are ever waiting for the display loop. The
//! interrupt flag is checked before each new request; once it is seen no
//! further chunks are requested, but everything already queued is left for the
//! display loop to reassemble.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::credit::CreditPool;
use crate::device::{ControlCommand, ScanDevice};
use crate::error::CaptureError;
use crate::pipeline::{CaptureState, InterruptHandle, QueuedChunk, SessionCookies};
use crate::scan::{BeamType, ScanGeometry, ScanMode, ScanRequest};

/// What a capture session should scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePlan {
    /// Frame geometry.
    pub geometry: ScanGeometry,
    /// Dwell per pixel, in device ticks.
    pub dwell: u16,
    /// Single raster, repeated rasters, or free-running stream.
    pub mode: ScanMode,
    /// Chunk latency hint for the device.
    pub latency: u32,
    /// Beam to scan.
    pub beam: BeamType,
}

/// Counters reported by the producer at the end of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Chunks enqueued.
    pub chunks: u64,
    /// Samples enqueued.
    pub samples: u64,
    /// Rasters the device finished.
    pub rasters: u64,
    /// Whether the session stopped because of the interrupt flag.
    pub interrupted: bool,
}

/// One producer run, borrowing the device for its duration.
pub struct CaptureLoop<'a, D: ScanDevice + ?Sized> {
    device: &'a mut D,
    credits: Arc<CreditPool>,
    queue: mpsc::UnboundedSender<QueuedChunk>,
    interrupt: InterruptHandle,
    state: &'a watch::Sender<CaptureState>,
    cookies: &'a mut SessionCookies,
}

impl<'a, D: ScanDevice + ?Sized> CaptureLoop<'a, D> {
    /// Wire the producer to its device, credit pool, and queue.
    pub fn new(
        device: &'a mut D,
        credits: Arc<CreditPool>,
        queue: mpsc::UnboundedSender<QueuedChunk>,
        interrupt: InterruptHandle,
        state: &'a watch::Sender<CaptureState>,
        cookies: &'a mut SessionCookies,
    ) -> Self {
        Self {
            device,
            credits,
            queue,
            interrupt,
            state,
            cookies,
        }
    }

    /// Run the session to completion, interrupt, or failure.
    ///
    /// The device is always handed back to idle raster mode and the beam
    /// released before returning; a failure while doing so after a successful
    /// session is reported, but never masks an earlier error. The queue sender
    /// is dropped on return so the display loop can finish draining.
    pub async fn run(mut self, plan: CapturePlan) -> Result<CaptureStats, CaptureError> {
        self.state.send_replace(CaptureState::Running);
        info!(
            width = plan.geometry.width(),
            height = plan.geometry.height(),
            dwell = plan.dwell,
            mode = ?plan.mode,
            credits = self.credits.capacity(),
            "Capture started"
        );

        let mut stats = CaptureStats::default();
        let result = match self
            .device
            .transfer(ControlCommand::ExternalCtrl {
                enable: true,
                beam: plan.beam,
            })
            .await
        {
            Ok(()) => self.stream_rasters(&plan, &mut stats).await,
            Err(err) => Err(err.into()),
        };

        self.state.send_replace(CaptureState::Draining);
        let restore = self.restore_idle(plan.beam).await;

        match (&result, restore) {
            (Err(err), _) => warn!(error = %err, chunks = stats.chunks, "Capture aborted"),
            (Ok(()), Err(err)) => return Err(err),
            (Ok(()), Ok(())) => info!(
                chunks = stats.chunks,
                samples = stats.samples,
                rasters = stats.rasters,
                interrupted = stats.interrupted,
                "Capture finished, draining display queue"
            ),
        }
        result.map(|()| stats)
    }

    async fn stream_rasters(
        &mut self,
        plan: &CapturePlan,
        stats: &mut CaptureStats,
    ) -> Result<(), CaptureError> {
        let Self {
            device,
            credits,
            queue,
            interrupt,
            cookies,
            ..
        } = self;

        loop {
            if interrupt.is_set() {
                stats.interrupted = true;
                break;
            }

            let request = ScanRequest {
                cookie: cookies.issue(),
                geometry: plan.geometry,
                dwell: plan.dwell,
                beam: plan.beam,
                latency: plan.latency,
                mode: plan.mode,
            };
            debug!(cookie = request.cookie, "Requesting raster");
            let mut stream = device.scan(request);

            let mut exhausted = false;
            while !interrupt.is_set() {
                let credit = credits.acquire().await?;
                let Some(next) = stream.next().await else {
                    exhausted = true;
                    break;
                };
                let samples = next?;

                stats.chunks += 1;
                stats.samples += samples.len() as u64;
                trace!(
                    sequence = stats.chunks,
                    len = samples.len(),
                    outstanding = credits.outstanding(),
                    "Enqueueing chunk"
                );
                queue
                    .send(QueuedChunk {
                        sequence: stats.chunks,
                        samples,
                        credit,
                    })
                    .map_err(|_| CaptureError::QueueClosed)?;
            }

            if !exhausted {
                info!(chunks = stats.chunks, "Interrupt set, no further scan requests");
                stats.interrupted = true;
                break;
            }
            stats.rasters += 1;
            if plan.mode != ScanMode::Live {
                break;
            }
        }
        Ok(())
    }

    async fn restore_idle(&mut self, beam: BeamType) -> Result<(), CaptureError> {
        let cookie = self.cookies.issue();
        self.device
            .transfer(ControlCommand::Synchronize {
                cookie,
                raster_mode: true,
            })
            .await?;
        self.device
            .transfer(ControlCommand::ExternalCtrl {
                enable: false,
                beam,
            })
            .await?;
        debug!(cookie, "Device back in idle raster mode");
        Ok(())
    }
}
