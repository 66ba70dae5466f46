//! Register map of the PCIe board and the access facade the OS glue provides.
//!
//! Each board exposes two address spaces: the DMA controller registers and
//! the S0 space holding the measurement control registers of the FPGA.
//! Multi-byte registers are little endian. Several 8 bit registers live
//! inside a 32 bit register; e.g. XCKMSB is the most significant byte of
//! the XCK register, so its bit 6 is bit 30 of XCK.

use crate::error::DriverStatus;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum AddressSpace {
    Dma,
    S0,
}

//========== S0 registers ==============

pub const S0_DBR: u16 = 0x00;
pub const S0_CTRLA: u16 = 0x04; // [7:0] trigger and input states
pub const S0_CTRLB: u16 = 0x05; // [2:0] STI, [5:3] BTI
pub const S0_CTRLC: u16 = 0x06; // [1] S1, [2] S2
pub const S0_XCK: u16 = 0x08; // [27:0] scan timer in us, [30] scan timer on
pub const S0_XCKMSB: u16 = 0x0B;
pub const S0_PIXREG: u16 = 0x10; // [15:0] pixel count
pub const S0_FF_FLAGS: u16 = 0x12; // [7] FIFO valid, [3] FIFO overflow
pub const S0_BTRIGREG: u16 = 0x14; // [6] software trigger, [7] FIFO reset
pub const S0_BTIMER: u16 = 0x18; // [30:0] block timer in us, [31] enable
pub const S0_SEC: u16 = 0x1C; // scan exposure control
pub const S0_SDAT: u16 = 0x20; // [30:0] scan delay after trigger in 10 ns, [31] enable
pub const S0_TOR_TOCNT: u16 = 0x24; // [6:0] trigger output divider, [7] enable
pub const S0_TOR_TICNT: u16 = 0x26; // [6:0] trigger input divider, [7] enable
pub const S0_XCKDLY: u16 = 0x2C; // [30:0] XCK delay in 10 ns, [31] enable
pub const S0_IRQREG: u16 = 0x38; // [30] DMA started by hardware
pub const S0_PCIEFLAGS: u16 = 0x40;
pub const S0_NOS: u16 = 0x44;
pub const S0_NOB: u16 = 0x48;
pub const S0_DMA_BUF_SIZE_IN_SCANS: u16 = 0x4C; // [30:0] size, [31] counter reset
pub const S0_DMAS_PER_INTR: u16 = 0x50; // [30:0] scans per part, [31] counter reset
pub const S0_BLOCKINDEX: u16 = 0x54; // [30:0] block counter, [31] counter reset
pub const S0_SCANINDEX: u16 = 0x58; // [30:0] scan counter, [31] counter reset
pub const S0_CAMCNT: u16 = 0x5C; // [3:0] camera count
pub const S0_BDAT: u16 = 0x84; // [30:0] block delay after trigger in 10 ns, [31] enable
pub const S0_BEC: u16 = 0x88; // [30:0] block exposure control in 10 ns, [31] enable
pub const S0_BSLOPE: u16 = 0x8C; // 0 negative, 1 positive, 2 both
pub const S0_A1DSC: u16 = 0x90; // actual value of delay stage counter 1
pub const S0_L1DSC: u16 = 0x94; // last value of delay stage counter 1
pub const S0_A2DSC: u16 = 0x98;
pub const S0_L2DSC: u16 = 0x9C;
pub const S0_DSCCTRL: u16 = 0xA8; // [0] reset DSC 1, [1] DSC 1 up, [8] reset DSC 2, [9] DSC 2 up

pub const CTRLA_BITINDEX_BOTH_SLOPE: u32 = 3;
pub const CTRLA_BITINDEX_SLOPE: u32 = 4;
pub const CTRLA_BIT_DIR_TRIGIN: u8 = 0x20;
pub const CTRLA_BIT_TSTART: u8 = 0x40;

pub const CTRLB_BITS_STI: u8 = 0x07;
pub const CTRLB_BITINDEX_BTI0: u8 = 3;
pub const CTRLB_BITS_BTI: u8 = 0x38;

pub const CTRLC_BIT_S1: u8 = 0x02;
pub const CTRLC_BIT_S2: u8 = 0x04;

pub const XCK_BITS_STIME: u32 = 0x0FFF_FFFF;
pub const XCKMSB_BITINDEX_STIMER_ON: u32 = 6;
pub const XCKMSB_BIT_STIMER_ON: u8 = 1 << XCKMSB_BITINDEX_STIMER_ON;

pub const FF_FLAGS_BIT_VALID: u8 = 0x80;
pub const FF_FLAGS_BIT_OVERFLOW: u8 = 0x08;

pub const BTRIGREG_BITINDEX_SWTRIG: u32 = 6;
pub const BTRIGREG_BITINDEX_RSFIFO: u32 = 7;

pub const BTIMER_BIT_ENABLE: u32 = 0x8000_0000;

/// Enable bit shared by the delay and exposure control registers.
pub const DELAY_BIT_ENABLE: u32 = 0x8000_0000;

pub const TOR_BITS_DIVIDER: u8 = 0x7F;
pub const TOR_BIT_ENABLE: u8 = 0x80;

pub const DSCCTRL_BIT_RESET_1: u32 = 0x001;
pub const DSCCTRL_BIT_DIR_1: u32 = 0x002;
pub const DSCCTRL_BIT_RESET_2: u32 = 0x100;
pub const DSCCTRL_BIT_DIR_2: u32 = 0x200;

pub const IRQREG_BIT_HW_DMA_START: u32 = 0x4000_0000;

pub const PCIEFLAGS_BITINDEX_ENRSTIMERHW: u32 = 2;
pub const PCIEFLAGS_BITINDEX_BLOCKTRIG: u32 = 4;
pub const PCIEFLAGS_BITINDEX_MEASUREON: u32 = 5;
pub const PCIEFLAGS_BITINDEX_BLOCKON: u32 = 6;
pub const PCIEFLAGS_BITINDEX_IS_TDC: u32 = 28;
pub const PCIEFLAGS_BITINDEX_IS_DSC: u32 = 29;
pub const PCIEFLAGS_BITINDEX_ERROR_SFP1: u32 = 30;

/// Bit 31 of the counter registers pulses a reset of that counter.
pub const COUNTER_RESET_BITINDEX: u32 = 31;

pub const CAMCNT_BITS: u32 = 0x0F;

//========== DMA registers =============

pub const DMA_DCSR: u16 = 0x00; // [0] initiator reset

/// The hardware ring is split into this many parts; one interrupt per part.
pub const DMA_BUFFER_PARTS: u32 = 2;

/// Byte/word/dword access to the two register spaces of one board.
///
/// Implemented by the OS glue (or by [`crate::sim::SimBoard`]). The bit
/// helpers are read-modify-write sequences; implementations backed by
/// hardware with atomic set/clear registers may override them.
pub trait RegisterAccess: Send + Sync {
    fn read_u8(&self, space: AddressSpace, address: u16) -> Result<u8, DriverStatus>;
    fn read_u16(&self, space: AddressSpace, address: u16) -> Result<u16, DriverStatus>;
    fn read_u32(&self, space: AddressSpace, address: u16) -> Result<u32, DriverStatus>;
    fn write_u8(&self, space: AddressSpace, address: u16, data: u8) -> Result<(), DriverStatus>;
    fn write_u16(&self, space: AddressSpace, address: u16, data: u16)
        -> Result<(), DriverStatus>;
    fn write_u32(&self, space: AddressSpace, address: u16, data: u32)
        -> Result<(), DriverStatus>;

    /// Writes only the bits selected by `mask`.
    fn write_bits_u32(
        &self,
        space: AddressSpace,
        address: u16,
        data: u32,
        mask: u32,
    ) -> Result<(), DriverStatus> {
        let current = self.read_u32(space, address)?;
        self.write_u32(space, address, (current & !mask) | (data & mask))
    }

    fn write_bits_u8(
        &self,
        space: AddressSpace,
        address: u16,
        data: u8,
        mask: u8,
    ) -> Result<(), DriverStatus> {
        let current = self.read_u8(space, address)?;
        self.write_u8(space, address, (current & !mask) | (data & mask))
    }

    fn set_bit_u32(&self, space: AddressSpace, address: u16, bit: u32) -> Result<(), DriverStatus> {
        self.write_bits_u32(space, address, u32::MAX, 1 << bit)
    }

    fn reset_bit_u32(
        &self,
        space: AddressSpace,
        address: u16,
        bit: u32,
    ) -> Result<(), DriverStatus> {
        self.write_bits_u32(space, address, 0, 1 << bit)
    }

    /// 0 -> 1 -> 0
    fn pulse_bit_u32(
        &self,
        space: AddressSpace,
        address: u16,
        bit: u32,
    ) -> Result<(), DriverStatus> {
        self.set_bit_u32(space, address, bit)?;
        self.reset_bit_u32(space, address, bit)
    }

    fn set_bit_u8(&self, space: AddressSpace, address: u16, bit: u32) -> Result<(), DriverStatus> {
        self.write_bits_u8(space, address, 0xFF, 1 << bit)
    }

    fn reset_bit_u8(&self, space: AddressSpace, address: u16, bit: u32) -> Result<(), DriverStatus> {
        self.write_bits_u8(space, address, 0, 1 << bit)
    }

    fn pulse_bit_u8(&self, space: AddressSpace, address: u16, bit: u32) -> Result<(), DriverStatus> {
        self.set_bit_u8(space, address, bit)?;
        self.reset_bit_u8(space, address, bit)
    }
}
