//! User-space driver for LSC PCIe camera interface boards.
//!
//! A [`Driver`] owns up to [`MAX_BOARDS`] [`Board`]s. Each board reaches its
//! hardware through a [`RegisterAccess`] facade and a [`DmaBuffer`] provided by
//! the OS glue, or through [`sim::SimBoard`] when there is no hardware.

pub mod addressing;
pub mod board;
pub mod config;
pub mod dma;
pub mod error;
pub mod hardware;
pub mod ingest;
pub mod measurement;
pub mod notify;
pub mod platform;
pub mod registers;
pub mod sim;
pub mod special_pixels;
pub mod user_buffer;

pub use addressing::{Geometry, ScanPosition};
pub use board::Board;
pub use config::{CameraSettings, Conf, MeasurementSettings};
pub use dma::DmaBuffer;
pub use error::{BoardError, BoardResult, DriverStatus};
pub use measurement::{calc_measure_time_in_seconds, AbortHandle, Driver};
pub use registers::{AddressSpace, RegisterAccess};
pub use special_pixels::SpecialPixels;

/// Boards a single driver instance can address.
pub const MAX_BOARDS: usize = 5;
