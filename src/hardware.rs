use crate::error::{BoardError, BoardResult, DriverStatus};
use crate::registers::*;
use log::{debug, info};
use std::sync::Arc;

/// Source polled by [`BoardHardware::read_block_trigger_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTrigger {
    /// Always high.
    Always,
    /// External trigger input I.
    Input,
    S1,
    S2,
    S1AndS2,
    /// Block trigger start flag of CTRLA.
    TStart,
}

impl From<u8> for BlockTrigger {
    fn from(channel: u8) -> Self {
        match channel {
            1 => Self::Input,
            2 => Self::S1,
            3 => Self::S2,
            4 => Self::S1AndS2,
            5 => Self::TStart,
            _ => Self::Always,
        }
    }
}

/// Control bits and value registers of one delay stage counter.
struct DscRegisters {
    reset: u32,
    dir: u32,
    actual: u16,
    last: u16,
}

fn dsc_registers(dsc: u8) -> BoardResult<DscRegisters> {
    match dsc {
        1 => Ok(DscRegisters {
            reset: DSCCTRL_BIT_RESET_1,
            dir: DSCCTRL_BIT_DIR_1,
            actual: S0_A1DSC,
            last: S0_L1DSC,
        }),
        2 => Ok(DscRegisters {
            reset: DSCCTRL_BIT_RESET_2,
            dir: DSCCTRL_BIT_DIR_2,
            actual: S0_A2DSC,
            last: S0_L2DSC,
        }),
        _ => Err(BoardError::OutOfRange {
            name: "dsc",
            value: dsc as u64,
            limit: 3,
        }),
    }
}

/// Register programming of one PCIe board.
#[derive(Clone)]
pub struct BoardHardware {
    drvno: usize,
    regs: Arc<dyn RegisterAccess>,
}

impl std::fmt::Debug for BoardHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardHardware")
            .field("drvno", &self.drvno)
            .finish_non_exhaustive()
    }
}

impl BoardHardware {
    pub fn new(drvno: usize, regs: Arc<dyn RegisterAccess>) -> Self {
        Self { drvno, regs }
    }

    pub fn drvno(&self) -> usize {
        self.drvno
    }

    pub fn set_measure_on(&self) -> Result<(), DriverStatus> {
        info!("Board {}: set measure on", self.drvno);
        self.regs
            .set_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_MEASUREON)
    }

    pub fn reset_measure_on(&self) -> Result<(), DriverStatus> {
        info!("Board {}: reset measure on", self.drvno);
        self.regs
            .reset_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_MEASUREON)
    }

    pub fn set_block_on(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: set block on", self.drvno);
        self.regs
            .set_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_BLOCKON)
    }

    pub fn reset_block_on(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: reset block on", self.drvno);
        self.regs
            .reset_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_BLOCKON)
    }

    pub fn is_measure_on(&self) -> Result<bool, DriverStatus> {
        let flags = self.regs.read_u32(AddressSpace::S0, S0_PCIEFLAGS)?;
        Ok(flags & (1 << PCIEFLAGS_BITINDEX_MEASUREON) != 0)
    }

    pub fn is_block_on(&self) -> Result<bool, DriverStatus> {
        let flags = self.regs.read_u32(AddressSpace::S0, S0_PCIEFLAGS)?;
        Ok(flags & (1 << PCIEFLAGS_BITINDEX_BLOCKON) != 0)
    }

    pub fn start_stimer(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: start scan timer", self.drvno);
        self.regs
            .set_bit_u8(AddressSpace::S0, S0_XCKMSB, XCKMSB_BITINDEX_STIMER_ON)
    }

    pub fn stop_stimer(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: stop scan timer", self.drvno);
        self.regs
            .reset_bit_u8(AddressSpace::S0, S0_XCKMSB, XCKMSB_BITINDEX_STIMER_ON)
    }

    pub fn is_timer_on(&self) -> Result<bool, DriverStatus> {
        let msb = self.regs.read_u8(AddressSpace::S0, S0_XCKMSB)?;
        Ok(msb & XCKMSB_BIT_STIMER_ON != 0)
    }

    pub fn do_software_trigger(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: software trigger", self.drvno);
        self.regs
            .pulse_bit_u8(AddressSpace::S0, S0_BTRIGREG, BTRIGREG_BITINDEX_SWTRIG)
    }

    pub fn reset_fifo(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: reset FIFO", self.drvno);
        self.regs
            .pulse_bit_u8(AddressSpace::S0, S0_BTRIGREG, BTRIGREG_BITINDEX_RSFIFO)
    }

    /// Pulses the initiator reset of the DMA engine.
    pub fn reset_dma(&self) -> Result<(), DriverStatus> {
        info!("Board {}: reset DMA", self.drvno);
        self.regs.write_bits_u32(AddressSpace::Dma, DMA_DCSR, 1, 1)?;
        self.regs.write_bits_u32(AddressSpace::Dma, DMA_DCSR, 0, 1)
    }

    /// Checks fiber link and camera presence. With `camcnt == 0` there is no
    /// camera to find and this always succeeds.
    pub fn find_cam(&self, camcnt: u32) -> BoardResult<()> {
        if camcnt == 0 {
            return Ok(());
        }
        let flags = self.regs.read_u32(AddressSpace::S0, S0_PCIEFLAGS)?;
        if flags & (1 << PCIEFLAGS_BITINDEX_ERROR_SFP1) != 0 {
            info!("Board {}: fiber or camera error", self.drvno);
            return Err(BoardError::CameraNotFound(self.drvno));
        }
        Ok(())
    }

    pub fn reset_hardware_counter(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: reset hardware counter", self.drvno);
        for address in [
            S0_DMAS_PER_INTR,
            S0_DMA_BUF_SIZE_IN_SCANS,
            S0_BLOCKINDEX,
            S0_SCANINDEX,
        ] {
            self.regs
                .pulse_bit_u32(AddressSpace::S0, address, COUNTER_RESET_BITINDEX)?;
        }
        Ok(())
    }

    /// Advances the hardware block counter and restarts the scan counter.
    pub fn count_blocks_by_hardware(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: increase hardware block counter", self.drvno);
        self.regs
            .pulse_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_BLOCKTRIG)?;
        self.regs
            .pulse_bit_u32(AddressSpace::S0, S0_SCANINDEX, COUNTER_RESET_BITINDEX)
    }

    pub fn set_dma_buf_regs(
        &self,
        dma_buffer_size_in_scans: u32,
        nos: u32,
        nob: u32,
    ) -> Result<(), DriverStatus> {
        let dmas_per_interrupt = dma_buffer_size_in_scans / DMA_BUFFER_PARTS;
        debug!(
            "Board {}: DMA buffer {} scans, {} scans per interrupt",
            self.drvno, dma_buffer_size_in_scans, dmas_per_interrupt
        );
        let space = AddressSpace::S0;
        self.regs.write_u32(space, S0_DMA_BUF_SIZE_IN_SCANS, dma_buffer_size_in_scans)?;
        self.regs.write_u32(space, S0_DMAS_PER_INTR, dmas_per_interrupt)?;
        self.regs.write_u32(space, S0_NOS, nos)?;
        self.regs.write_u32(space, S0_NOB, nob)
    }

    pub fn set_pixel_count(&self, pixel: u32) -> BoardResult<()> {
        let pixel = u16::try_from(pixel).map_err(|_| BoardError::InvalidPixelCount(pixel))?;
        self.regs.write_u16(AddressSpace::S0, S0_PIXREG, pixel)?;
        Ok(())
    }

    pub fn set_camcnt(&self, camcnt: u32) -> Result<(), DriverStatus> {
        self.regs
            .write_bits_u32(AddressSpace::S0, S0_CAMCNT, camcnt, CAMCNT_BITS)
    }

    pub fn set_sti(&self, sti_mode: u8) -> Result<(), DriverStatus> {
        debug!("Board {}: STI {}", self.drvno, sti_mode);
        self.regs
            .write_bits_u8(AddressSpace::S0, S0_CTRLB, sti_mode, CTRLB_BITS_STI)
    }

    pub fn set_bti(&self, bti_mode: u8) -> Result<(), DriverStatus> {
        debug!("Board {}: BTI {}", self.drvno, bti_mode);
        self.regs.write_bits_u8(
            AddressSpace::S0,
            S0_CTRLB,
            bti_mode << CTRLB_BITINDEX_BTI0,
            CTRLB_BITS_BTI,
        )
    }

    /// Scan timer period; leaves the timer-on bit untouched.
    pub fn set_stimer(&self, stime_in_microsec: u32) -> Result<(), DriverStatus> {
        self.regs.write_bits_u32(
            AddressSpace::S0,
            S0_XCK,
            stime_in_microsec,
            XCK_BITS_STIME,
        )
    }

    /// Block timer period; 0 disables it.
    pub fn set_btimer(&self, btime_in_microsec: u32) -> Result<(), DriverStatus> {
        let data = if btime_in_microsec == 0 {
            0
        } else {
            btime_in_microsec | BTIMER_BIT_ENABLE
        };
        self.regs.write_u32(AddressSpace::S0, S0_BTIMER, data)
    }

    /// Zeroes the delay after trigger and exposure control registers.
    pub fn clear_all_user_regs(&self) -> Result<(), DriverStatus> {
        debug!("Board {}: clear all user registers", self.drvno);
        for address in [S0_BDAT, S0_BEC, S0_SDAT, S0_SEC] {
            self.regs.write_u32(AddressSpace::S0, address, 0)?;
        }
        Ok(())
    }

    /// Scan trigger slope: 0 high, 1 low, 2 both.
    pub fn set_sslope(&self, sslope: u8) -> BoardResult<()> {
        debug!("Board {}: scan slope {}", self.drvno, sslope);
        let (slope, both) = match sslope {
            0 => (true, false),
            1 => (false, false),
            2 => (true, true),
            _ => {
                return Err(BoardError::OutOfRange {
                    name: "sslope",
                    value: sslope as u64,
                    limit: 3,
                })
            }
        };
        self.write_flag_u8(S0_CTRLA, CTRLA_BITINDEX_SLOPE, slope)?;
        self.write_flag_u8(S0_CTRLA, CTRLA_BITINDEX_BOTH_SLOPE, both)?;
        Ok(())
    }

    /// Block trigger slope: 0 negative, 1 positive, 2 both.
    pub fn set_bslope(&self, bslope: u32) -> BoardResult<()> {
        debug!("Board {}: block slope {}", self.drvno, bslope);
        if bslope > 2 {
            return Err(BoardError::OutOfRange {
                name: "bslope",
                value: bslope as u64,
                limit: 3,
            });
        }
        self.regs.write_u32(AddressSpace::S0, S0_BSLOPE, bslope)?;
        Ok(())
    }

    pub fn set_sdat(&self, sdat_in_10ns: u32) -> BoardResult<()> {
        debug!("Board {}: SDAT {} x 10 ns", self.drvno, sdat_in_10ns);
        self.write_delay(S0_SDAT, "sdat_in_10ns", sdat_in_10ns)
    }

    pub fn set_bdat(&self, bdat_in_10ns: u32) -> BoardResult<()> {
        debug!("Board {}: BDAT {} x 10 ns", self.drvno, bdat_in_10ns);
        self.write_delay(S0_BDAT, "bdat_in_10ns", bdat_in_10ns)
    }

    /// Block exposure control.
    pub fn set_bec(&self, bec_in_10ns: u32) -> BoardResult<()> {
        debug!("Board {}: BEC {} x 10 ns", self.drvno, bec_in_10ns);
        self.write_delay(S0_BEC, "bec_in_10ns", bec_in_10ns)
    }

    pub fn set_xckdelay(&self, xckdelay_in_10ns: u32) -> BoardResult<()> {
        debug!("Board {}: XCK delay {} x 10 ns", self.drvno, xckdelay_in_10ns);
        self.write_delay(S0_XCKDLY, "xckdelay_in_10ns", xckdelay_in_10ns)
    }

    /// Trigger input divider: use every n-th trigger, 0 uses all.
    pub fn set_ticnt(&self, divider: u8) -> BoardResult<()> {
        debug!("Board {}: TICNT {}", self.drvno, divider);
        self.write_divider(S0_TOR_TICNT, "ticnt", divider)
    }

    /// Trigger output divider: forward every n-th trigger, 0 forwards all.
    pub fn set_tocnt(&self, divider: u8) -> BoardResult<()> {
        debug!("Board {}: TOCNT {}", self.drvno, divider);
        self.write_divider(S0_TOR_TOCNT, "tocnt", divider)
    }

    /// Pulses the reset of delay stage counter 1 or 2.
    pub fn reset_dsc(&self, dsc: u8) -> BoardResult<()> {
        let bits = dsc_registers(dsc)?;
        info!("Board {}: reset DSC {}", self.drvno, dsc);
        self.regs
            .write_bits_u32(AddressSpace::S0, S0_DSCCTRL, bits.reset, bits.reset)?;
        self.regs
            .write_bits_u32(AddressSpace::S0, S0_DSCCTRL, 0, bits.reset)?;
        Ok(())
    }

    /// Counting direction of delay stage counter 1 or 2.
    pub fn set_dir_dsc(&self, dsc: u8, up: bool) -> BoardResult<()> {
        let bits = dsc_registers(dsc)?;
        debug!("Board {}: DSC {} counts {}", self.drvno, dsc, if up { "up" } else { "down" });
        let data = if up { bits.dir } else { 0 };
        self.regs
            .write_bits_u32(AddressSpace::S0, S0_DSCCTRL, data, bits.dir)?;
        Ok(())
    }

    /// Actual and last value of delay stage counter 1 or 2.
    pub fn get_dsc(&self, dsc: u8) -> BoardResult<(u32, u32)> {
        let bits = dsc_registers(dsc)?;
        let actual = self.regs.read_u32(AddressSpace::S0, bits.actual)?;
        let last = self.regs.read_u32(AddressSpace::S0, bits.last)?;
        Ok((actual, last))
    }

    fn write_flag_u8(&self, address: u16, bit: u32, on: bool) -> Result<(), DriverStatus> {
        if on {
            self.regs.set_bit_u8(AddressSpace::S0, address, bit)
        } else {
            self.regs.reset_bit_u8(AddressSpace::S0, address, bit)
        }
    }

    /// Delay in 10 ns steps; 0 disables it.
    fn write_delay(&self, address: u16, name: &'static str, in_10ns: u32) -> BoardResult<()> {
        if in_10ns & DELAY_BIT_ENABLE != 0 {
            return Err(BoardError::OutOfRange {
                name,
                value: in_10ns as u64,
                limit: DELAY_BIT_ENABLE as u64,
            });
        }
        let data = if in_10ns == 0 {
            0
        } else {
            in_10ns | DELAY_BIT_ENABLE
        };
        self.regs.write_u32(AddressSpace::S0, address, data)?;
        Ok(())
    }

    fn write_divider(&self, address: u16, name: &'static str, divider: u8) -> BoardResult<()> {
        if divider > TOR_BITS_DIVIDER {
            return Err(BoardError::OutOfRange {
                name,
                value: divider as u64,
                limit: TOR_BITS_DIVIDER as u64 + 1,
            });
        }
        let data = if divider == 0 {
            0
        } else {
            divider | TOR_BIT_ENABLE
        };
        self.regs.write_u8(AddressSpace::S0, address, data)?;
        Ok(())
    }

    /// With hardware stop the FPGA clears the timer-on bit after NOS scans.
    pub fn set_hardware_timer_stop_mode(&self, stop_by_hardware: bool) -> Result<(), DriverStatus> {
        if stop_by_hardware {
            self.regs
                .set_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_ENRSTIMERHW)
        } else {
            self.regs
                .reset_bit_u32(AddressSpace::S0, S0_PCIEFLAGS, PCIEFLAGS_BITINDEX_ENRSTIMERHW)
        }
    }

    pub fn set_dma_start_mode(&self, start_by_hardware: bool) -> Result<(), DriverStatus> {
        let data = if start_by_hardware {
            IRQREG_BIT_HW_DMA_START
        } else {
            0
        };
        self.regs
            .write_bits_u32(AddressSpace::S0, S0_IRQREG, data, IRQREG_BIT_HW_DMA_START)
    }

    pub fn is_tdc(&self) -> Result<bool, DriverStatus> {
        let flags = self.regs.read_u32(AddressSpace::S0, S0_PCIEFLAGS)?;
        Ok(flags & (1 << PCIEFLAGS_BITINDEX_IS_TDC) != 0)
    }

    pub fn is_dsc(&self) -> Result<bool, DriverStatus> {
        let flags = self.regs.read_u32(AddressSpace::S0, S0_PCIEFLAGS)?;
        Ok(flags & (1 << PCIEFLAGS_BITINDEX_IS_DSC) != 0)
    }

    pub fn read_block_trigger_state(&self, trigger: BlockTrigger) -> Result<bool, DriverStatus> {
        let state = match trigger {
            BlockTrigger::Always => true,
            BlockTrigger::Input => {
                self.regs.read_u8(AddressSpace::S0, S0_CTRLA)? & CTRLA_BIT_DIR_TRIGIN != 0
            }
            BlockTrigger::S1 => {
                self.regs.read_u8(AddressSpace::S0, S0_CTRLC)? & CTRLC_BIT_S1 != 0
            }
            BlockTrigger::S2 => {
                self.regs.read_u8(AddressSpace::S0, S0_CTRLC)? & CTRLC_BIT_S2 != 0
            }
            BlockTrigger::S1AndS2 => {
                let ctrlc = self.regs.read_u8(AddressSpace::S0, S0_CTRLC)?;
                ctrlc & (CTRLC_BIT_S1 | CTRLC_BIT_S2) == CTRLC_BIT_S1 | CTRLC_BIT_S2
            }
            BlockTrigger::TStart => {
                self.regs.read_u8(AddressSpace::S0, S0_CTRLA)? & CTRLA_BIT_TSTART != 0
            }
        };
        Ok(state)
    }

    /// True while the FIFO holds at least one complete line.
    pub fn check_fifo_flags(&self) -> Result<bool, DriverStatus> {
        let flags = self.regs.read_u8(AddressSpace::S0, S0_FF_FLAGS)?;
        Ok(flags & FF_FLAGS_BIT_VALID != 0)
    }

    /// Sticky until the next FIFO reset.
    pub fn check_fifo_overflow(&self) -> Result<bool, DriverStatus> {
        let flags = self.regs.read_u8(AddressSpace::S0, S0_FF_FLAGS)?;
        Ok(flags & FF_FLAGS_BIT_OVERFLOW != 0)
    }
}
