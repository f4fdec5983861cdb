//! Chunk-to-quantum reassembly.
//!
//! The device delivers samples in whatever chunk sizes its transport produces.
//! The display wants updates of a size that matches its refresh rate. The
//! [`ChunkAccumulator`] sits between the two: it buffers incoming chunks in a
//! FIFO residual buffer and releases exactly one display quantum at a time into
//! [`Frame::fill_rows`], always row-aligned.
//!
//! Because a plain `Iterator` cannot hand out `&Frame` while it keeps mutating
//! the frame, updates are pulled with [`ChunkAccumulator::next_update`] (a
//! lending loop) or observed through the callback taken by
//! [`ChunkAccumulator::accumulate`].

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::ShapeError;
use crate::frame::Frame;

/// Samples that fit in one display refresh at the given dwell time.
///
/// Returns the whole frame (`width * height`) when a full raster completes
/// within one refresh period (or when `dwell_time_ns` is zero). Otherwise the
/// sample count is floored to whole rows, and never drops below one row even
/// if a single row takes longer than a refresh period.
///
/// # Panics
/// Panics if `width` or `height` is zero.
#[must_use]
pub fn compute_quantum(width: usize, height: usize, dwell_time_ns: u64, target_fps: f64) -> usize {
    assert!(width > 0 && height > 0, "frame dimensions must be non-zero");
    let pixels = width * height;
    if dwell_time_ns == 0 || target_fps.is_nan() || target_fps <= 0.0 {
        return pixels;
    }

    let period_ns = 1e9 / target_fps;
    let dwells_per_refresh = period_ns / dwell_time_ns as f64;
    if dwells_per_refresh > pixels as f64 {
        return pixels;
    }

    let rows = (dwells_per_refresh as usize / width).max(1);
    (rows * width).min(pixels)
}

/// Buffers arbitrarily sized chunks and writes them to a frame one quantum at a time.
#[derive(Debug)]
pub struct ChunkAccumulator {
    frame: Frame,
    quantum: usize,
    /// Samples received but not yet written; shorter than one quantum between calls.
    residual: VecDeque<u16>,
    scratch: Vec<u16>,
    updates: u64,
}

impl ChunkAccumulator {
    /// Wrap `frame` with an explicit quantum.
    ///
    /// The quantum must be non-zero, at most one frame, and a whole number of rows.
    pub fn new(frame: Frame, quantum: usize) -> Result<Self, ShapeError> {
        if quantum == 0 || quantum > frame.pixels() || quantum % frame.width() != 0 {
            return Err(ShapeError::InvalidQuantum {
                quantum,
                width: frame.width(),
                height: frame.height(),
            });
        }
        Ok(Self::build(frame, quantum))
    }

    fn build(frame: Frame, quantum: usize) -> Self {
        debug!(
            width = frame.width(),
            height = frame.height(),
            quantum,
            rows_per_update = quantum / frame.width(),
            "Prepared chunk accumulator"
        );
        Self {
            frame,
            quantum,
            residual: VecDeque::with_capacity(quantum * 2),
            scratch: Vec::with_capacity(quantum),
            updates: 0,
        }
    }

    /// Skip quantum validation, for exercising failure paths downstream.
    #[cfg(test)]
    pub(crate) fn with_unchecked_quantum(frame: Frame, quantum: usize) -> Self {
        Self::build(frame, quantum)
    }

    /// Quantum sized for the display refresh rate.
    #[must_use]
    pub fn for_refresh(frame: Frame, dwell_time_ns: u64, target_fps: f64) -> Self {
        let quantum = compute_quantum(frame.width(), frame.height(), dwell_time_ns, target_fps);
        Self::build(frame, quantum)
    }

    /// Publish only complete frames.
    #[must_use]
    pub fn whole_frame(frame: Frame) -> Self {
        let quantum = frame.pixels();
        Self::build(frame, quantum)
    }

    /// Samples per update.
    #[must_use]
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Samples waiting for the next quantum.
    #[must_use]
    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }

    /// Number of quanta written so far.
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// The frame being reassembled.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Give the frame back, discarding any residual samples.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Append a chunk to the residual buffer without writing anything.
    pub fn push(&mut self, chunk: &[u16]) {
        self.residual.extend(chunk.iter().copied());
        trace!(
            chunk_len = chunk.len(),
            residual = self.residual.len(),
            "buffered chunk"
        );
    }

    /// Write the oldest quantum if one is buffered and return the updated frame.
    ///
    /// Returns `Ok(None)` once fewer than `quantum` samples remain.
    pub fn next_update(&mut self) -> Result<Option<&Frame>, ShapeError> {
        if self.residual.len() < self.quantum {
            return Ok(None);
        }
        self.scratch.clear();
        self.scratch.extend(self.residual.drain(..self.quantum));
        self.frame.fill_rows(&self.scratch)?;
        self.updates += 1;
        Ok(Some(&self.frame))
    }

    /// Write whatever whole rows are still buffered, even if they fall short of a quantum.
    ///
    /// Called once the input has ended, so a raster whose length is not a
    /// multiple of the quantum still lands on the canvas in full. A trailing
    /// partial row stays buffered. Returns `Ok(None)` when no whole row is left.
    pub fn flush(&mut self) -> Result<Option<&Frame>, ShapeError> {
        let width = self.frame.width();
        let len = self.residual.len() / width * width;
        if len == 0 {
            return Ok(None);
        }
        self.scratch.clear();
        self.scratch.extend(self.residual.drain(..len));
        self.frame.fill_rows(&self.scratch)?;
        self.updates += 1;
        trace!(
            rows = len / width,
            residual = self.residual.len(),
            "flushed trailing rows"
        );
        Ok(Some(&self.frame))
    }

    /// Buffer `chunk` and write every complete quantum, calling `on_update` after each.
    ///
    /// Returns how many updates were produced (zero, one, or many).
    pub fn accumulate<F>(&mut self, chunk: &[u16], mut on_update: F) -> Result<usize, ShapeError>
    where
        F: FnMut(&Frame),
    {
        self.push(chunk);
        let mut produced = 0;
        while let Some(frame) = self.next_update()? {
            on_update(frame);
            produced += 1;
        }
        Ok(produced)
    }
}
