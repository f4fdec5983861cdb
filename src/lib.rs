//! Core library for streaming raster-scan acquisition.
//!
//! A scanning instrument emits one continuous stream of 16-bit samples with no
//! frame boundaries. This crate turns that stream into a live image:
//!
//! - [`credit`] bounds how many chunks may be in flight between the device and
//!   the display, so a slow display throttles acquisition instead of growing a
//!   queue without limit.
//! - [`accumulator`] re-slices arbitrarily sized chunks into whole-row display
//!   quanta sized for the refresh rate.
//! - [`frame`] is the wraparound canvas the quanta are written into.
//! - [`pipeline`] runs the producer and consumer loops for single, live, and
//!   free-scan sessions, with a sticky interrupt and a clean drain.
//!
//! The device itself sits behind the [`device::ScanDevice`] trait; a simulated
//! device is available in [`device::mock`].

pub mod accumulator;
pub mod calibration;
pub mod config;
pub mod credit;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod scan;
pub mod sink;

pub use error::{ScanError, ScanResult};
pub use pipeline::{CaptureState, InterruptHandle, ScanPipeline, SessionReport};
