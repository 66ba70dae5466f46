//! Layout of the user buffer.
//!
//! Pixels vary fastest, then cameras, then samples, then blocks:
//! `index = pixel + camera·P + sample·C·P + block·nos·C·P`.
//! The special pixel offsets rely on this order.

use crate::error::{BoardError, BoardResult};

/// Dimensions of one board's measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub pixel: u32,
    pub camcnt: u32,
    pub nos: u32,
    pub nob: u32,
}

/// 0-based position of one camera scan inside the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanPosition {
    pub sample: u32,
    pub block: u32,
    pub camera: u32,
}

impl Geometry {
    /// A configured camera count of 0 is treated as 1.
    pub fn new(pixel: u32, camcnt: u32, nos: u32, nob: u32) -> Self {
        Self {
            pixel,
            camcnt: camcnt.max(1),
            nos,
            nob,
        }
    }

    /// Number of 16 bit samples in the whole buffer.
    pub fn len(&self) -> u64 {
        self.pixel as u64 * self.camcnt as u64 * self.nos as u64 * self.nob as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.len() * std::mem::size_of::<u16>() as u64
    }

    /// Number of single-camera scans in the whole measurement.
    pub fn total_scans(&self) -> u64 {
        self.camcnt as u64 * self.nos as u64 * self.nob as u64
    }

    pub fn index(&self, pixel: u32, sample: u32, block: u32, camera: u32) -> BoardResult<usize> {
        check("pixel", pixel, self.pixel)?;
        check("sample", sample, self.nos)?;
        check("block", block, self.nob)?;
        check("camera", camera, self.camcnt)?;
        let p = self.pixel as u64;
        let c = self.camcnt as u64;
        let index = pixel as u64
            + camera as u64 * p
            + sample as u64 * c * p
            + block as u64 * self.nos as u64 * c * p;
        Ok(index as usize)
    }

    /// Number of single-camera scans acquired before the given one. Inverse
    /// of [`Geometry::scan_position`].
    pub fn scan_ordinal(&self, sample: u32, block: u32, camera: u32) -> BoardResult<u64> {
        check("sample", sample, self.nos)?;
        check("block", block, self.nob)?;
        check("camera", camera, self.camcnt)?;
        let c = self.camcnt as u64;
        Ok(camera as u64 + sample as u64 * c + block as u64 * self.nos as u64 * c)
    }

    /// Position of the `n`-th single-camera scan, counting all cameras.
    pub fn scan_position(&self, n: u64) -> ScanPosition {
        let camcnt = self.camcnt as u64;
        let nos = self.nos.max(1) as u64;
        let per_camera = n / camcnt;
        ScanPosition {
            sample: (per_camera % nos) as u32,
            block: (per_camera / nos) as u32,
            camera: (n % camcnt) as u32,
        }
    }
}

fn check(name: &'static str, value: u32, limit: u32) -> BoardResult<()> {
    if value >= limit {
        return Err(BoardError::OutOfRange {
            name,
            value: value as u64,
            limit: limit as u64,
        });
    }
    Ok(())
}
