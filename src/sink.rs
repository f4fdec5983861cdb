//! Output collaborators: rendering and export.
//!
//! The pipeline does not decide how frames are drawn or stored. It hands a
//! borrowed [`FrameUpdate`] to a [`RenderSink`] after every display quantum,
//! and an owned [`ExportBundle`] to an [`ExportSink`] on request.
//!
//! Closures work as sinks directly, which keeps tests short:
//!
//! ```
//! use raster_daq::sink::{FrameUpdate, RenderSink};
//!
//! let mut updates = 0;
//! let mut sink = |update: FrameUpdate<'_>| updates += update.cursor;
//! sink.render(FrameUpdate { canvas: &[0; 4], width: 2, height: 2, cursor: 1, sample_bits: 14 });
//! ```

use std::io;

use tokio::sync::watch;

use crate::frame::sample_to_u8;

/// Borrowed view of a frame right after an update.
#[derive(Debug, Clone, Copy)]
pub struct FrameUpdate<'a> {
    /// Whole canvas, row-major.
    pub canvas: &'a [u16],
    /// Row width.
    pub width: usize,
    /// Row count.
    pub height: usize,
    /// Row where the next write will land.
    pub cursor: usize,
    /// Significant bits per sample.
    pub sample_bits: u32,
}

impl FrameUpdate<'_> {
    /// Canvas reduced to 8 bits for display.
    #[must_use]
    pub fn to_u8(&self) -> Vec<u8> {
        self.canvas
            .iter()
            .map(|&v| sample_to_u8(v, self.sample_bits))
            .collect()
    }
}

/// Receives every frame update published by the display loop.
///
/// Called on the display thread, so implementations must be `Send`.
pub trait RenderSink: Send {
    /// Present one update.
    fn render(&mut self, update: FrameUpdate<'_>);
}

impl<F> RenderSink for F
where
    F: FnMut(FrameUpdate<'_>) + Send,
{
    fn render(&mut self, update: FrameUpdate<'_>) {
        self(update)
    }
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn render(&mut self, _update: FrameUpdate<'_>) {}
}

/// Owned 8-bit image ready for a display widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySnapshot {
    /// 8-bit pixels, row-major.
    pub pixels: Vec<u8>,
    /// Row width.
    pub width: usize,
    /// Row count.
    pub height: usize,
    /// Row where the next write will land (drawn as the scan line).
    pub cursor: usize,
    /// Monotonic update counter.
    pub sequence: u64,
}

/// Publishes the latest update on a `watch` channel.
///
/// A GUI polling at its own rate always sees the newest image; intermediate
/// updates it was too slow to see are skipped.
#[derive(Debug)]
pub struct WatchRenderSink {
    sender: watch::Sender<Option<DisplaySnapshot>>,
    sequence: u64,
}

impl WatchRenderSink {
    /// Create the sink and the receiver a display widget should hold.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Option<DisplaySnapshot>>) {
        let (sender, receiver) = watch::channel(None);
        (
            Self {
                sender,
                sequence: 0,
            },
            receiver,
        )
    }
}

impl RenderSink for WatchRenderSink {
    fn render(&mut self, update: FrameUpdate<'_>) {
        self.sequence += 1;
        let snapshot = DisplaySnapshot {
            pixels: update.to_u8(),
            width: update.width,
            height: update.height,
            cursor: update.cursor,
            sequence: self.sequence,
        };
        // No receivers left is fine: nobody is looking.
        self.sender.send_replace(Some(snapshot));
    }
}

/// Full canvas prepared for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    /// Row width.
    pub width: usize,
    /// Row count.
    pub height: usize,
    /// Canvas scaled to 8 bits.
    pub image_u8: Vec<u8>,
    /// Canvas scaled to 16 bits.
    pub image_u16: Vec<u16>,
    /// Suggested file stem (timestamped).
    pub name_hint: String,
}

/// Persists exported frames. File formats are the implementor's business.
pub trait ExportSink {
    /// Store one bundle.
    fn export(&mut self, bundle: ExportBundle) -> io::Result<()>;
}

impl<F> ExportSink for F
where
    F: FnMut(ExportBundle) -> io::Result<()>,
{
    fn export(&mut self, bundle: ExportBundle) -> io::Result<()> {
        self(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_to_u8() {
        let canvas = [0x3FFF, 0x0040, 0x0000, 0x1000];
        let update = FrameUpdate {
            canvas: &canvas,
            width: 2,
            height: 2,
            cursor: 0,
            sample_bits: 14,
        };
        assert_eq!(update.to_u8(), vec![0xFF, 0x01, 0x00, 0x40]);
    }

    #[test]
    fn test_watch_sink_keeps_latest() {
        let (mut sink, receiver) = WatchRenderSink::new();
        let canvas = [0u16; 4];
        for cursor in 0..3 {
            sink.render(FrameUpdate {
                canvas: &canvas,
                width: 2,
                height: 2,
                cursor: cursor % 2,
                sample_bits: 14,
            });
        }
        let latest = receiver.borrow().clone().unwrap();
        assert_eq!(latest.sequence, 3);
        assert_eq!(latest.cursor, 0);
        assert_eq!(latest.pixels.len(), 4);
    }

    #[test]
    fn test_closure_export_sink() {
        let mut names = Vec::new();
        let mut sink = |bundle: ExportBundle| -> io::Result<()> {
            names.push(bundle.name_hint);
            Ok(())
        };
        sink.export(ExportBundle {
            width: 1,
            height: 1,
            image_u8: vec![0],
            image_u16: vec![0],
            name_hint: "saved_test".into(),
        })
        .unwrap();
        assert_eq!(names, vec!["saved_test".to_string()]);
    }
}
