//! Fixed-size raster canvas with a wraparound row cursor.
//!
//! The device emits one continuous raster with no frame boundaries, so the
//! canvas behaves as a circular buffer over *rows*. Incoming rows are written at
//! the cursor; when they run past the bottom, the remainder overwrites the top
//! of the canvas. During a live scan this gives a persistent image that is
//! refreshed in place, while a single-shot capture is just the degenerate case
//! of one full pass starting at row 0.
//!
//! # Invariants
//!
//! - `canvas.len() == width * height`, fixed at creation
//! - `cursor < height` after every operation
//!
//! # Example
//!
//! ```
//! use raster_daq::frame::Frame;
//! use raster_daq::scan::{ScanGeometry, ScanRange};
//!
//! let x = ScanRange::new(0, 4, 1)?;
//! let y = ScanRange::new(0, 3, 1)?;
//! let mut frame = Frame::new(ScanGeometry::new(x, y), 14);
//!
//! frame.fill_rows(&[1; 8])?; // two rows
//! assert_eq!(frame.cursor(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use tracing::trace;

use crate::error::ShapeError;
use crate::scan::ScanGeometry;
use crate::sink::{ExportBundle, FrameUpdate};

/// Row-major canvas of 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    geometry: ScanGeometry,
    width: usize,
    height: usize,
    /// Significant bits in each device sample.
    sample_bits: u32,
    canvas: Vec<u16>,
    /// Row where the next write lands.
    cursor: usize,
}

impl Frame {
    /// Create a zeroed canvas for `geometry`.
    ///
    /// `sample_bits` is the device sample depth used by the scaling helpers;
    /// it is clamped to `1..=16`.
    #[must_use]
    pub fn new(geometry: ScanGeometry, sample_bits: u32) -> Self {
        let width = geometry.width();
        let height = geometry.height();
        Self {
            geometry,
            width,
            height,
            sample_bits: sample_bits.clamp(1, 16),
            canvas: vec![0; width * height],
            cursor: 0,
        }
    }

    /// The scan geometry this canvas was sized for.
    #[must_use]
    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    /// Whether a scan with `geometry` can reuse this canvas.
    #[must_use]
    pub fn matches(&self, geometry: &ScanGeometry) -> bool {
        self.geometry == *geometry
    }

    /// Row width in samples.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Total samples in the canvas.
    #[must_use]
    pub fn pixels(&self) -> usize {
        self.canvas.len()
    }

    /// Row index of the next write.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Device sample depth.
    #[must_use]
    pub fn sample_bits(&self) -> u32 {
        self.sample_bits
    }

    /// Raw canvas in row-major order.
    #[must_use]
    pub fn canvas(&self) -> &[u16] {
        &self.canvas
    }

    /// One row of the canvas.
    ///
    /// # Panics
    /// Panics if `y >= height`.
    #[must_use]
    pub fn row(&self, y: usize) -> &[u16] {
        &self.canvas[y * self.width..(y + 1) * self.width]
    }

    /// Borrowed view handed to render sinks.
    #[must_use]
    pub fn update(&self) -> FrameUpdate<'_> {
        FrameUpdate {
            canvas: &self.canvas,
            width: self.width,
            height: self.height,
            cursor: self.cursor,
            sample_bits: self.sample_bits,
        }
    }

    /// Replace the whole canvas and reset the cursor to the top.
    pub fn fill(&mut self, pixels: &[u16]) -> Result<(), ShapeError> {
        if pixels.len() != self.canvas.len() {
            return Err(ShapeError::FillLength {
                expected: self.canvas.len(),
                actual: pixels.len(),
            });
        }
        self.canvas.copy_from_slice(pixels);
        self.cursor = 0;
        Ok(())
    }

    /// Write whole rows at the cursor, wrapping past the bottom onto the top.
    ///
    /// `pixels.len()` must be a multiple of the row width. Rows that run past
    /// the last row overwrite the canvas from row 0, and the cursor ends up
    /// just after the last row written.
    pub fn fill_rows(&mut self, pixels: &[u16]) -> Result<(), ShapeError> {
        if pixels.len() % self.width != 0 {
            return Err(ShapeError::PartialRow {
                len: pixels.len(),
                width: self.width,
            });
        }
        let rows = pixels.len() / self.width;
        let start = self.cursor;

        if rows == self.height && self.cursor == 0 {
            return self.fill(pixels);
        }

        if self.cursor + rows <= self.height {
            self.write_rows(self.cursor, pixels);
            self.cursor += rows;
            if self.cursor == self.height {
                self.cursor = 0;
            }
        } else {
            let remaining_rows = self.height - self.cursor;
            let (remaining, rewrite) = pixels.split_at(remaining_rows * self.width);
            self.write_rows(self.cursor, remaining);

            // The rewrite part normally fits above the old cursor. Longer input
            // keeps wrapping so the cursor never leaves the canvas.
            let frame_len = self.canvas.len();
            for pass in rewrite.chunks(frame_len) {
                self.write_rows(0, pass);
            }
            self.cursor = (start + rows) % self.height;
        }

        trace!(rows, start, cursor = self.cursor, "filled rows");
        Ok(())
    }

    fn write_rows(&mut self, row: usize, pixels: &[u16]) {
        let offset = row * self.width;
        self.canvas[offset..offset + pixels.len()].copy_from_slice(pixels);
    }

    /// Canvas rescaled from the device sample depth to `bits` (clamped to `1..=16`).
    ///
    /// Wider targets shift left, narrower targets shift right. Samples above
    /// the device depth saturate at the target maximum.
    #[must_use]
    pub fn as_scaled(&self, bits: u32) -> Vec<u16> {
        self.canvas
            .iter()
            .map(|&v| rescale_sample(v, self.sample_bits, bits))
            .collect()
    }

    /// Canvas as 8-bit samples for display or export.
    #[must_use]
    pub fn as_u8(&self) -> Vec<u8> {
        self.canvas
            .iter()
            .map(|&v| sample_to_u8(v, self.sample_bits))
            .collect()
    }

    /// Canvas stretched to the full 16-bit range.
    #[must_use]
    pub fn as_u16(&self) -> Vec<u16> {
        self.as_scaled(16)
    }

    /// Everything an export sink needs to persist the current canvas.
    #[must_use]
    pub fn export_bundle(&self) -> ExportBundle {
        let name_hint = format!("saved{}", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
        ExportBundle {
            width: self.width,
            height: self.height,
            image_u8: self.as_u8(),
            image_u16: self.as_u16(),
            name_hint,
        }
    }
}

/// Rescale one sample from `from_bits` to `to_bits` of depth (both clamped to `1..=16`).
///
/// The value is first clamped to the largest `from_bits` sample, so a reading
/// outside the declared depth saturates instead of wrapping.
#[must_use]
pub fn rescale_sample(value: u16, from_bits: u32, to_bits: u32) -> u16 {
    let from_bits = from_bits.clamp(1, 16);
    let to_bits = to_bits.clamp(1, 16);
    let value = value.min(sample_max(from_bits));
    if to_bits >= from_bits {
        value << (to_bits - from_bits)
    } else {
        value >> (from_bits - to_bits)
    }
}

/// One sample of `from_bits` depth reduced to 8 bits.
#[must_use]
pub fn sample_to_u8(value: u16, from_bits: u32) -> u8 {
    u8::try_from(rescale_sample(value, from_bits, 8)).unwrap_or(u8::MAX)
}

fn sample_max(bits: u32) -> u16 {
    u16::MAX >> (16 - bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanRange;

    fn frame(width: u32, height: u32) -> Frame {
        let x = ScanRange::new(0, width, 1).unwrap();
        let y = ScanRange::new(0, height, 1).unwrap();
        Frame::new(ScanGeometry::new(x, y), 14)
    }

    fn rows(first: u16, count: usize, width: usize) -> Vec<u16> {
        (0..count)
            .flat_map(|r| std::iter::repeat(first + r as u16).take(width))
            .collect()
    }

    #[test]
    fn test_fill_replaces_canvas_and_resets_cursor() {
        let mut frame = frame(4, 3);
        frame.fill_rows(&rows(1, 2, 4)).unwrap();
        assert_eq!(frame.cursor(), 2);

        let pixels: Vec<u16> = (0..12).collect();
        frame.fill(&pixels).unwrap();
        assert_eq!(frame.canvas(), pixels.as_slice());
        assert_eq!(frame.cursor(), 0);
    }

    #[test]
    fn test_fill_length_mismatch() {
        let mut frame = frame(4, 3);
        let err = frame.fill(&[0; 11]).unwrap_err();
        assert_eq!(
            err,
            ShapeError::FillLength {
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn test_fill_rows_rejects_partial_row() {
        let mut frame = frame(4, 3);
        let err = frame.fill_rows(&[0; 6]).unwrap_err();
        assert_eq!(err, ShapeError::PartialRow { len: 6, width: 4 });
        assert_eq!(frame.cursor(), 0);
    }

    #[test]
    fn test_fill_rows_exact_fill_wraps_cursor_to_zero() {
        let mut frame = frame(4, 3);
        frame.fill_rows(&rows(1, 1, 4)).unwrap();
        frame.fill_rows(&rows(2, 2, 4)).unwrap();
        assert_eq!(frame.cursor(), 0);
        assert_eq!(frame.row(0), &[1; 4]);
        assert_eq!(frame.row(2), &[3; 4]);
    }

    #[test]
    fn test_fill_rows_wraparound_scenario() {
        let mut frame = frame(4, 3);
        let a = rows(10, 2, 4);
        let b = rows(20, 2, 4);

        frame.fill_rows(&a).unwrap();
        assert_eq!(frame.cursor(), 2);

        frame.fill_rows(&b).unwrap();
        assert_eq!(frame.cursor(), 1);
        assert_eq!(frame.row(0), &b[4..8]);
        assert_eq!(frame.row(1), &a[4..8]);
        assert_eq!(frame.row(2), &b[0..4]);
    }

    #[test]
    fn test_fill_rows_full_frame_at_nonzero_cursor() {
        let mut frame = frame(2, 3);
        frame.fill_rows(&rows(1, 1, 2)).unwrap();
        frame.fill_rows(&rows(5, 3, 2)).unwrap();
        // rows 5,6 land on 1,2; row 7 overwrites row 0
        assert_eq!(frame.row(0), &[7, 7]);
        assert_eq!(frame.row(1), &[5, 5]);
        assert_eq!(frame.row(2), &[6, 6]);
        assert_eq!(frame.cursor(), 1);
    }

    #[test]
    fn test_fill_rows_longer_than_canvas_keeps_cursor_in_bounds() {
        let mut frame = frame(1, 3);
        frame.fill_rows(&[1]).unwrap();
        frame.fill_rows(&[2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(frame.cursor(), 2);
        assert_eq!(frame.canvas(), &[7, 8, 6]);
    }

    #[test]
    fn test_partitioned_fill_matches_single_fill() {
        let pixels: Vec<u16> = (0..20).collect();
        let mut whole = frame(4, 5);
        whole.fill_rows(&pixels[..16]).unwrap();

        let mut parts = frame(4, 5);
        for part in [&pixels[..4], &pixels[4..12], &pixels[12..16]] {
            parts.fill_rows(part).unwrap();
        }
        assert_eq!(whole, parts);
    }

    #[test]
    fn test_scaling() {
        let mut frame = frame(2, 1);
        frame.fill(&[0x3FFF, 0x0040]).unwrap();
        assert_eq!(frame.as_u16(), vec![0xFFFC, 0x0100]);
        assert_eq!(frame.as_u8(), vec![0xFF, 0x01]);
        assert_eq!(frame.as_scaled(14), vec![0x3FFF, 0x0040]);
    }

    #[test]
    fn test_scaling_saturates_out_of_range_samples() {
        let mut frame = frame(3, 1);
        frame.fill(&[0xFFFF, 0x4000, 0x3FFF]).unwrap();
        assert_eq!(frame.as_u8(), vec![0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.as_scaled(14), vec![0x3FFF; 3]);
        assert_eq!(frame.as_u16(), vec![0xFFFC; 3]);
        assert_eq!(frame.update().to_u8(), frame.as_u8());
    }

    #[test]
    fn test_shallow_samples_widen_to_u8() {
        let x = ScanRange::new(0, 3, 1).unwrap();
        let y = ScanRange::new(0, 1, 1).unwrap();
        let mut frame = Frame::new(ScanGeometry::new(x, y), 6);
        frame.fill(&[0x3F, 0x01, 0x00]).unwrap();
        assert_eq!(frame.as_u8(), vec![0xFC, 0x04, 0x00]);
        assert_eq!(frame.update().to_u8(), frame.as_u8());
    }

    #[test]
    fn test_rescale_sample_bounds() {
        assert_eq!(rescale_sample(0x3FFF, 14, 8), 0xFF);
        assert_eq!(rescale_sample(0x01, 1, 16), 0x8000);
        assert_eq!(rescale_sample(0xFFFF, 16, 16), 0xFFFF);
        assert_eq!(rescale_sample(0xFFFF, 0, 8), 0x80);
        assert_eq!(sample_to_u8(0x8000, 14), 0xFF);
        assert_eq!(sample_to_u8(0x0003, 2), 0xC0);
    }

    #[test]
    fn test_export_bundle() {
        let mut frame = frame(2, 2);
        frame.fill(&[0, 64, 128, 0x3FFF]).unwrap();
        let bundle = frame.export_bundle();
        assert_eq!(bundle.width, 2);
        assert_eq!(bundle.height, 2);
        assert_eq!(bundle.image_u8, vec![0, 1, 2, 255]);
        assert!(bundle.name_hint.starts_with("saved"));
    }
}
