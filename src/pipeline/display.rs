//! Consumer side: reassembles queued chunks into the frame.
//!
//! Runs on a blocking thread (`spawn_blocking`) so a slow render sink never
//! stalls the async runtime driving the device. The credit attached to each
//! chunk is returned only after the chunk has been written and every resulting
//! update rendered, which is what throttles the producer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::accumulator::ChunkAccumulator;
use crate::credit::CreditPool;
use crate::error::ShapeError;
use crate::frame::Frame;
use crate::pipeline::QueuedChunk;
use crate::sink::RenderSink;

/// Counters reported by the consumer at the end of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    /// Chunks dequeued and written.
    pub chunks: u64,
    /// Samples dequeued.
    pub samples: u64,
    /// Render updates published.
    pub updates: u64,
    /// Samples left over at the end that did not make up a whole row.
    pub residual: usize,
}

/// Everything the display loop hands back once the queue is drained.
pub struct DisplayOutcome {
    /// The reassembled frame, ready for reuse by the next session.
    pub frame: Frame,
    /// The render sink, handed back to its owner.
    pub render: Box<dyn RenderSink>,
    /// Counters for the session report.
    pub stats: DisplayStats,
    /// First shape error hit, if any.
    pub result: Result<(), ShapeError>,
}

/// One consumer run.
pub struct DisplayLoop {
    queue: mpsc::UnboundedReceiver<QueuedChunk>,
    accumulator: ChunkAccumulator,
    credits: Arc<CreditPool>,
    render: Box<dyn RenderSink>,
}

impl DisplayLoop {
    /// Wire the consumer to its queue, accumulator, and render sink.
    pub fn new(
        queue: mpsc::UnboundedReceiver<QueuedChunk>,
        accumulator: ChunkAccumulator,
        credits: Arc<CreditPool>,
        render: Box<dyn RenderSink>,
    ) -> Self {
        Self {
            queue,
            accumulator,
            credits,
            render,
        }
    }

    /// Drain the queue until the producer hangs up.
    ///
    /// Blocks the calling thread. Once the queue is closed and empty, whole
    /// rows still short of a quantum are written and rendered as a final
    /// update. A shape error is fatal to the session: the credit pool is closed
    /// so a waiting producer wakes up, and anything still queued is dropped,
    /// returning its credits.
    pub fn run(mut self) -> DisplayOutcome {
        let mut stats = DisplayStats::default();
        let mut result = Ok(());

        while let Some(chunk) = self.queue.blocking_recv() {
            let QueuedChunk {
                sequence,
                samples,
                credit,
            } = chunk;

            let render = &mut self.render;
            match self
                .accumulator
                .accumulate(&samples, |frame| render.render(frame.update()))
            {
                Ok(produced) => {
                    stats.chunks += 1;
                    stats.samples += samples.len() as u64;
                    stats.updates += produced as u64;
                    trace!(
                        sequence,
                        produced,
                        residual = self.accumulator.residual_len(),
                        "Chunk written"
                    );
                    credit.release();
                }
                Err(err) => {
                    error!(sequence, error = %err, "Frame reassembly failed, aborting session");
                    drop(credit);
                    self.abort();
                    result = Err(err);
                    break;
                }
            }
        }

        if result.is_ok() {
            let render = &mut self.render;
            match self.accumulator.flush() {
                Ok(Some(frame)) => {
                    render.render(frame.update());
                    stats.updates += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    error!(error = %err, "Writing trailing rows failed");
                    result = Err(err);
                }
            }
        }

        stats.residual = self.accumulator.residual_len();
        debug!(
            chunks = stats.chunks,
            updates = stats.updates,
            residual = stats.residual,
            cursor = self.accumulator.frame().cursor(),
            "Display queue drained"
        );

        DisplayOutcome {
            frame: self.accumulator.into_frame(),
            render: self.render,
            stats,
            result,
        }
    }

    fn abort(&mut self) {
        self.credits.close();
        self.queue.close();
        let mut dropped = 0usize;
        while self.queue.blocking_recv().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded queued chunks after failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{ScanGeometry, ScanRange};
    use crate::sink::FrameUpdate;

    fn accumulator(width: u32, height: u32, quantum: usize) -> ChunkAccumulator {
        let geometry = ScanGeometry::new(
            ScanRange::new(0, width, 1).unwrap(),
            ScanRange::new(0, height, 1).unwrap(),
        );
        ChunkAccumulator::new(Frame::new(geometry, 14), quantum).unwrap()
    }

    #[tokio::test]
    async fn test_drains_queue_and_returns_credits() {
        let credits = CreditPool::new(4);
        let (tx, rx) = mpsc::unbounded_channel();
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let sink = move |update: FrameUpdate<'_>| {
            let _ = seen_tx.send(update.cursor);
        };

        let display = DisplayLoop::new(rx, accumulator(4, 3, 4), Arc::clone(&credits), Box::new(sink));
        let handle = tokio::task::spawn_blocking(move || display.run());

        for (sequence, chunk) in [vec![1u16, 2, 3], vec![4, 5, 6, 7, 8], vec![9, 10, 11, 12]]
            .into_iter()
            .enumerate()
        {
            let credit = credits.acquire().await.unwrap();
            tx.send(QueuedChunk {
                sequence: sequence as u64 + 1,
                samples: chunk,
                credit,
            })
            .unwrap();
        }
        drop(tx);

        let outcome = handle.await.unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.stats.chunks, 3);
        assert_eq!(outcome.stats.samples, 12);
        assert_eq!(outcome.stats.updates, 3);
        assert_eq!(outcome.stats.residual, 0);
        assert_eq!(outcome.frame.canvas(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(seen_rx.try_iter().collect::<Vec<_>>(), vec![1, 2, 0]);
        assert_eq!(credits.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_trailing_rows_written_when_producer_stops_early() {
        let credits = CreditPool::new(2);
        let (tx, rx) = mpsc::unbounded_channel();
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let sink = move |update: FrameUpdate<'_>| {
            let _ = seen_tx.send(update.cursor);
        };
        let display = DisplayLoop::new(rx, accumulator(4, 2, 8), Arc::clone(&credits), Box::new(sink));
        let handle = tokio::task::spawn_blocking(move || display.run());

        let credit = credits.acquire().await.unwrap();
        tx.send(QueuedChunk {
            sequence: 1,
            samples: vec![1, 2, 3, 4, 5],
            credit,
        })
        .unwrap();
        drop(tx);

        let outcome = handle.await.unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.stats.updates, 1);
        assert_eq!(outcome.stats.residual, 1);
        assert_eq!(outcome.frame.row(0), &[1, 2, 3, 4]);
        assert_eq!(outcome.frame.cursor(), 1);
        assert_eq!(seen_rx.try_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(credits.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_shape_error_closes_pool_and_discards_queue() {
        let credits = CreditPool::new(3);
        let (tx, rx) = mpsc::unbounded_channel();
        let geometry = ScanGeometry::new(
            ScanRange::new(0, 4, 1).unwrap(),
            ScanRange::new(0, 3, 1).unwrap(),
        );
        // 5 samples per update cannot be written as whole rows of 4
        let accumulator = ChunkAccumulator::with_unchecked_quantum(Frame::new(geometry, 14), 5);

        for (sequence, samples) in [vec![1u16; 6], vec![2u16; 4]].into_iter().enumerate() {
            let credit = credits.acquire().await.unwrap();
            tx.send(QueuedChunk {
                sequence: sequence as u64 + 1,
                samples,
                credit,
            })
            .unwrap();
        }
        assert_eq!(credits.outstanding(), 2);

        let display = DisplayLoop::new(
            rx,
            accumulator,
            Arc::clone(&credits),
            Box::new(crate::sink::NullRenderSink),
        );
        let outcome = tokio::task::spawn_blocking(move || display.run())
            .await
            .unwrap();

        assert_eq!(outcome.result, Err(ShapeError::PartialRow { len: 5, width: 4 }));
        assert_eq!(outcome.stats.chunks, 0);
        assert_eq!(outcome.stats.updates, 0);
        assert_eq!(outcome.frame.canvas(), &[0; 12]);

        assert_eq!(credits.outstanding(), 0);
        assert!(credits.is_closed());
        assert!(matches!(
            credits.acquire().await,
            Err(crate::error::CaptureError::CreditPoolClosed)
        ));
        assert!(tx.is_closed());
    }
}
