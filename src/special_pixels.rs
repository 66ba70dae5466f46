//! Hardware metadata stamped into fixed pixels of every scan.

use crate::error::{BoardError, BoardResult};

pub const PIXEL_CAMERA_STATUS: usize = 0;
pub const PIXEL_FPGA_VER: usize = 1;
pub const PIXEL_BLOCK_INDEX_HIGH_S1_S2: usize = 2;
pub const PIXEL_BLOCK_INDEX_LOW: usize = 3;
pub const PIXEL_SCAN_INDEX_HIGH: usize = 4;
pub const PIXEL_SCAN_INDEX_LOW: usize = 5;
pub const PIXEL_IMPACT_SIGNAL_1_HIGH: usize = 6;
pub const PIXEL_IMPACT_SIGNAL_1_LOW: usize = 7;
pub const PIXEL_IMPACT_SIGNAL_2_HIGH: usize = 8;
pub const PIXEL_IMPACT_SIGNAL_2_LOW: usize = 9;
/// Counted back from the last pixel.
pub const PIXEL_SCAN_INDEX2_HIGH: usize = 1;
pub const PIXEL_SCAN_INDEX2_LOW: usize = 0;

pub const CAMERA_STATUS_BIT_OVER_TEMP: u16 = 0x0001;
pub const CAMERA_STATUS_BIT_TEMP_GOOD: u16 = 0x0002;
pub const CAMERA_STATUS_BIT_3001: u16 = 0x2000;
pub const CAMERA_STATUS_BIT_3010: u16 = 0x4000;
pub const CAMERA_STATUS_BIT_3030: u16 = 0x8000;

pub const FPGA_VER_MAJOR_BITS: u16 = 0x00FF;
pub const FPGA_VER_MINOR_SHIFT: u16 = 8;

pub const BLOCK_INDEX_HIGH_BITS: u16 = 0x3FFF;
pub const BIT_S1: u16 = 0x4000;
pub const BIT_S2: u16 = 0x8000;

/// Scans shorter than this carry no trailing scan index 2.
pub const MIN_PIXEL_FOR_ALL_SPECIAL_PIXELS: usize = 64;

/// Number of leading pixels a decoder needs to read.
pub const fn prefix_len(last_pixel: usize) -> usize {
    last_pixel + 1
}

fn join(high: u16, low: u16) -> u32 {
    (high as u32) << 16 | low as u32
}

pub fn over_temp(scan: &[u16]) -> bool {
    scan[PIXEL_CAMERA_STATUS] & CAMERA_STATUS_BIT_OVER_TEMP != 0
}

pub fn temp_good(scan: &[u16]) -> bool {
    scan[PIXEL_CAMERA_STATUS] & CAMERA_STATUS_BIT_TEMP_GOOD != 0
}

/// 30 bit counter; the two upper bits of the high word carry S1 and S2.
pub fn block_index(scan: &[u16]) -> u32 {
    join(
        scan[PIXEL_BLOCK_INDEX_HIGH_S1_S2] & BLOCK_INDEX_HIGH_BITS,
        scan[PIXEL_BLOCK_INDEX_LOW],
    )
}

pub fn scan_index(scan: &[u16]) -> u32 {
    join(scan[PIXEL_SCAN_INDEX_HIGH], scan[PIXEL_SCAN_INDEX_LOW])
}

pub fn s1_state(scan: &[u16]) -> bool {
    scan[PIXEL_BLOCK_INDEX_HIGH_S1_S2] & BIT_S1 != 0
}

pub fn s2_state(scan: &[u16]) -> bool {
    scan[PIXEL_BLOCK_INDEX_HIGH_S1_S2] & BIT_S2 != 0
}

/// TDC 1 or DSC 1, depending on the daughter board.
pub fn impact_signal_1(scan: &[u16]) -> u32 {
    join(
        scan[PIXEL_IMPACT_SIGNAL_1_HIGH],
        scan[PIXEL_IMPACT_SIGNAL_1_LOW],
    )
}

/// TDC 2 or DSC 2, depending on the daughter board.
pub fn impact_signal_2(scan: &[u16]) -> u32 {
    join(
        scan[PIXEL_IMPACT_SIGNAL_2_HIGH],
        scan[PIXEL_IMPACT_SIGNAL_2_LOW],
    )
}

/// Scan index as the ingest side sees it: the high word from the front of
/// the scan and the low word from the last pixel, which the FPGA writes last.
pub fn scan_index_for_ingest(scan: &[u16]) -> u32 {
    join(
        scan[PIXEL_SCAN_INDEX_HIGH],
        scan[scan.len() - 1 - PIXEL_SCAN_INDEX2_LOW],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecialPixels {
    pub over_temp: bool,
    pub temp_good: bool,
    pub block_index: u32,
    pub scan_index: u32,
    pub s1_state: bool,
    pub s2_state: bool,
    pub impact_signal_1: u32,
    pub impact_signal_2: u32,
    pub scan_index_2: u32,
    pub camera_system_3001: bool,
    pub camera_system_3010: bool,
    pub camera_system_3030: bool,
    pub fpga_ver_major: u16,
    pub fpga_ver_minor: u16,
}

impl SpecialPixels {
    /// Decodes a complete scan. Needs more than 63 pixels.
    pub fn decode(scan: &[u16]) -> BoardResult<Self> {
        if scan.len() < MIN_PIXEL_FOR_ALL_SPECIAL_PIXELS {
            return Err(BoardError::InvalidPixelCount(scan.len() as u32));
        }
        let last = scan.len() - 1;
        let status = scan[PIXEL_CAMERA_STATUS];
        let fpga_ver = scan[PIXEL_FPGA_VER];
        Ok(Self {
            over_temp: over_temp(scan),
            temp_good: temp_good(scan),
            block_index: block_index(scan),
            scan_index: scan_index(scan),
            s1_state: s1_state(scan),
            s2_state: s2_state(scan),
            impact_signal_1: impact_signal_1(scan),
            impact_signal_2: impact_signal_2(scan),
            scan_index_2: join(
                scan[last - PIXEL_SCAN_INDEX2_HIGH],
                scan[last - PIXEL_SCAN_INDEX2_LOW],
            ),
            camera_system_3001: status & CAMERA_STATUS_BIT_3001 != 0,
            camera_system_3010: status & CAMERA_STATUS_BIT_3010 != 0,
            camera_system_3030: status & CAMERA_STATUS_BIT_3030 != 0,
            fpga_ver_major: fpga_ver & FPGA_VER_MAJOR_BITS,
            fpga_ver_minor: fpga_ver >> FPGA_VER_MINOR_SHIFT,
        })
    }
}

/// Writes the counters the FPGA stamps into a scan. Used by the simulator
/// and by tests.
pub fn stamp(scan: &mut [u16], block_index: u32, scan_index: u32) {
    let last = scan.len() - 1;
    scan[PIXEL_BLOCK_INDEX_HIGH_S1_S2] = (scan[PIXEL_BLOCK_INDEX_HIGH_S1_S2]
        & !BLOCK_INDEX_HIGH_BITS)
        | ((block_index >> 16) as u16 & BLOCK_INDEX_HIGH_BITS);
    scan[PIXEL_BLOCK_INDEX_LOW] = block_index as u16;
    scan[PIXEL_SCAN_INDEX_HIGH] = (scan_index >> 16) as u16;
    scan[PIXEL_SCAN_INDEX_LOW] = scan_index as u16;
    scan[last - PIXEL_SCAN_INDEX2_HIGH] = (scan_index >> 16) as u16;
    scan[last - PIXEL_SCAN_INDEX2_LOW] = scan_index as u16;
}
