//! Simulated PCIe board.
//!
//! [`SimBoard`] emulates the FPGA side of one board well enough to run the
//! whole measurement loop without hardware: it answers register accesses,
//! keeps the block and scan counters and, once the scan timer and block on
//! are both set, writes `nos × camcnt` stamped scans into its DMA ring from a
//! generator thread. With an interrupt handler registered it raises one
//! interrupt per filled DMA part, otherwise it waits for the polling side to
//! clear each slot before reusing it.

use crate::dma::DmaBuffer;
use crate::error::DriverStatus;
use crate::ingest::{InterruptHandler, MIN_PIXEL_FOR_INGEST};
use crate::registers::*;
use crate::special_pixels::{self, stamp};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace, warn};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const REGISTER_SPACE_LEN: usize = 0x100;

/// FPGA version stamped into pixel 1: major 2, minor 1.
pub const SIM_FPGA_VERSION: u16 = 0x0102;

/// Data value the simulator writes into `pixel` of a scan.
pub fn sim_pixel_value(block_index: u32, scan_index: u32, camera: u32, pixel: usize) -> u16 {
    (block_index
        .wrapping_mul(1000)
        .wrapping_add(scan_index.wrapping_mul(10))
        .wrapping_add(camera * 3)
        .wrapping_add(pixel as u32)) as u16
}

/// Builds the scan the simulator produces for the given counters.
pub fn sim_scan(pixel: usize, block_index: u32, scan_index: u32, camera: u32) -> Vec<u16> {
    let mut scan: Vec<u16> = (0..pixel)
        .map(|p| sim_pixel_value(block_index, scan_index, camera, p))
        .collect();
    scan[special_pixels::PIXEL_CAMERA_STATUS] = special_pixels::CAMERA_STATUS_BIT_TEMP_GOOD;
    scan[special_pixels::PIXEL_FPGA_VER] = SIM_FPGA_VERSION;
    scan[special_pixels::PIXEL_BLOCK_INDEX_HIGH_S1_S2] = 0;
    stamp(&mut scan, block_index, scan_index);
    scan
}

enum Command {
    StartBlock { generation: u64 },
    Shutdown,
}

/// Side effect of a register write.
enum RegisterEvent {
    None,
    StartBlock { generation: u64 },
    Cancel,
}

struct Registers {
    s0: [u8; REGISTER_SPACE_LEN],
    dma: [u8; REGISTER_SPACE_LEN],
}

impl Registers {
    fn space(&self, space: AddressSpace) -> &[u8; REGISTER_SPACE_LEN] {
        match space {
            AddressSpace::S0 => &self.s0,
            AddressSpace::Dma => &self.dma,
        }
    }

    fn space_mut(&mut self, space: AddressSpace) -> &mut [u8; REGISTER_SPACE_LEN] {
        match space {
            AddressSpace::S0 => &mut self.s0,
            AddressSpace::Dma => &mut self.dma,
        }
    }

    fn raw_u32(&self, space: AddressSpace, address: u16) -> u32 {
        let a = address as usize;
        let b = self.space(space);
        u32::from_le_bytes([b[a], b[a + 1], b[a + 2], b[a + 3]])
    }

    fn set_raw_u32(&mut self, space: AddressSpace, address: u16, value: u32) {
        let a = address as usize;
        self.space_mut(space)[a..a + 4].copy_from_slice(&value.to_le_bytes());
    }
}

struct Inner {
    regs: Mutex<Registers>,
    ring: Mutex<Vec<u16>>,
    handler: Mutex<Option<InterruptHandler>>,

    block_counter: AtomicU64,
    scan_counter: AtomicU64,
    /// Next ring word the generator writes.
    write_pos: AtomicUsize,
    /// Scans written into the current DMA part.
    part_fill: AtomicU64,
    /// Bumped to cancel the block in flight.
    generation: AtomicU64,
    busy: AtomicBool,
    shutdown: AtomicBool,
    scan_period: Mutex<Duration>,
    noise: AtomicU16,

    block_trigger: AtomicBool,
    camera_lost: AtomicBool,
    fail_writes: AtomicBool,
    write_count: AtomicU64,
    dma_reset_count: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn regs(&self) -> MutexGuard<'_, Registers> {
        lock(&self.regs)
    }

    fn s0(&self, address: u16) -> u32 {
        self.regs().raw_u32(AddressSpace::S0, address)
    }

    /// Register value as the driver sees it, with live hardware state
    /// overlaid on the stored bits.
    fn read_reg(&self, regs: &Registers, space: AddressSpace, address: u16) -> u32 {
        let raw = regs.raw_u32(space, address);
        if space == AddressSpace::Dma {
            return raw;
        }
        match address {
            S0_CTRLA => {
                let tstart = CTRLA_BIT_TSTART as u32;
                if self.block_trigger.load(Ordering::SeqCst) {
                    raw | tstart
                } else {
                    raw & !tstart
                }
            }
            S0_PCIEFLAGS => {
                let error = 1 << PCIEFLAGS_BITINDEX_ERROR_SFP1;
                if self.camera_lost.load(Ordering::SeqCst) {
                    raw | error
                } else {
                    raw & !error
                }
            }
            S0_BLOCKINDEX => {
                (raw & (1 << COUNTER_RESET_BITINDEX))
                    | (self.block_counter.load(Ordering::SeqCst) as u32 & !(1 << COUNTER_RESET_BITINDEX))
            }
            S0_SCANINDEX => {
                (raw & (1 << COUNTER_RESET_BITINDEX))
                    | (self.scan_counter.load(Ordering::SeqCst) as u32 & !(1 << COUNTER_RESET_BITINDEX))
            }
            _ => raw,
        }
    }

    fn read_bytes(&self, space: AddressSpace, address: u16, out: &mut [u8]) -> Result<(), DriverStatus> {
        if address as usize + out.len() > REGISTER_SPACE_LEN {
            return Err(DriverStatus::ReadFailed);
        }
        let regs = self.regs();
        for (i, byte) in out.iter_mut().enumerate() {
            let a = address as usize + i;
            let aligned = (a & !3) as u16;
            let value = self.read_reg(&regs, space, aligned);
            *byte = value.to_le_bytes()[a & 3];
        }
        Ok(())
    }

    fn write_bytes(&self, space: AddressSpace, address: u16, data: &[u8]) -> Result<RegisterEvent, DriverStatus> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DriverStatus::WriteFailed);
        }
        if address as usize + data.len() > REGISTER_SPACE_LEN {
            return Err(DriverStatus::WriteFailed);
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);

        let mut regs = self.regs();
        let aligned = address & !3;
        let old = regs.raw_u32(space, aligned);
        let a = address as usize;
        regs.space_mut(space)[a..a + data.len()].copy_from_slice(data);
        let new = regs.raw_u32(space, aligned);
        let event = self.write_reg(&mut regs, space, aligned, old, new);
        if let RegisterEvent::Cancel = event {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
        }
        Ok(event)
    }

    /// Emulates the reaction of the FPGA to a register write.
    fn write_reg(&self, regs: &mut Registers, space: AddressSpace, address: u16, old: u32, new: u32) -> RegisterEvent {
        let rising = |bit: u32| old & (1 << bit) == 0 && new & (1 << bit) != 0;
        let falling = |bit: u32| old & (1 << bit) != 0 && new & (1 << bit) == 0;

        if space == AddressSpace::Dma {
            if address == DMA_DCSR && rising(0) {
                debug!("sim: DMA initiator reset");
                self.dma_reset_count.fetch_add(1, Ordering::SeqCst);
                return RegisterEvent::Cancel;
            }
            return RegisterEvent::None;
        }

        match address {
            S0_BLOCKINDEX if rising(COUNTER_RESET_BITINDEX) => {
                self.block_counter.store(0, Ordering::SeqCst);
            }
            S0_SCANINDEX if rising(COUNTER_RESET_BITINDEX) => {
                self.scan_counter.store(0, Ordering::SeqCst);
            }
            S0_DMA_BUF_SIZE_IN_SCANS if rising(COUNTER_RESET_BITINDEX) => {
                self.write_pos.store(0, Ordering::SeqCst);
                lock(&self.ring).fill(0);
            }
            S0_DMAS_PER_INTR if rising(COUNTER_RESET_BITINDEX) => {
                self.part_fill.store(0, Ordering::SeqCst);
            }
            S0_PCIEFLAGS if rising(PCIEFLAGS_BITINDEX_BLOCKTRIG) => {
                self.block_counter.fetch_add(1, Ordering::SeqCst);
            }
            S0_DSCCTRL => {
                for (reset, actual, last) in [
                    (DSCCTRL_BIT_RESET_1, S0_A1DSC, S0_L1DSC),
                    (DSCCTRL_BIT_RESET_2, S0_A2DSC, S0_L2DSC),
                ] {
                    if old & reset == 0 && new & reset != 0 {
                        regs.set_raw_u32(AddressSpace::S0, actual, 0);
                        regs.set_raw_u32(AddressSpace::S0, last, 0);
                    }
                }
            }
            _ => {}
        }

        let timer_bit = XCKMSB_BITINDEX_STIMER_ON + 24;
        if address == S0_XCK && falling(timer_bit) && self.busy.load(Ordering::SeqCst) {
            debug!("sim: scan timer stopped during block");
            return RegisterEvent::Cancel;
        }

        let timer_on = regs.raw_u32(AddressSpace::S0, S0_XCK) & (1 << timer_bit) != 0;
        let block_on = regs.raw_u32(AddressSpace::S0, S0_PCIEFLAGS) & (1 << PCIEFLAGS_BITINDEX_BLOCKON) != 0;
        if timer_on && block_on && !self.busy.swap(true, Ordering::SeqCst) {
            return RegisterEvent::StartBlock {
                generation: self.generation.load(Ordering::SeqCst),
            };
        }
        RegisterEvent::None
    }

    fn clear_timer(&self) {
        let mut regs = self.regs();
        let xck = regs.raw_u32(AddressSpace::S0, S0_XCK);
        regs.set_raw_u32(AddressSpace::S0, S0_XCK, xck & !(1 << (XCKMSB_BITINDEX_STIMER_ON + 24)));
    }

    fn cancelled(&self, generation: u64) -> bool {
        self.shutdown.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation
    }

    fn ring_len(&self) -> usize {
        lock(&self.ring).len()
    }

    /// Writes one block of scans. Returns false when cancelled.
    fn generate_block(&self, generation: u64) -> bool {
        let nos = self.s0(S0_NOS) as u64;
        let camcnt = match self.s0(S0_CAMCNT) & CAMCNT_BITS {
            0 => 1,
            n => n,
        };
        let pixel = (self.s0(S0_PIXREG) & 0xFFFF) as usize;
        let ring_scans = (self.s0(S0_DMA_BUF_SIZE_IN_SCANS) & !(1 << COUNTER_RESET_BITINDEX)) as usize;
        let part_scans = (self.s0(S0_DMAS_PER_INTR) & !(1 << COUNTER_RESET_BITINDEX)) as u64;
        let ring_words = (ring_scans * pixel).min(self.ring_len());
        if pixel < MIN_PIXEL_FOR_INGEST || ring_words < pixel {
            warn!("sim: cannot write {pixel} pixel scans into a {ring_words} word ring");
            return true;
        }
        let period = *lock(&self.scan_period);
        let noise = self.noise.load(Ordering::SeqCst);
        let mut rng = rand::rng();
        let block = self.block_counter.load(Ordering::SeqCst) as u32;
        debug!("sim: block {block}, {nos} samples of {camcnt} cameras");

        for _ in 0..nos {
            let scan_index = self.scan_counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            for camera in 0..camcnt {
                let mut scan = sim_scan(pixel, block, scan_index, camera);
                let data = MIN_PIXEL_FOR_INGEST..pixel - 2;
                if noise > 0 && !data.is_empty() {
                    // leading and trailing special pixels stay exact
                    for value in &mut scan[data] {
                        *value = value.wrapping_add(rng.random_range(0..=noise));
                    }
                }
                let handler = lock(&self.handler).clone();
                let mut pos = self.write_pos.load(Ordering::SeqCst);
                if pos + pixel > ring_words {
                    pos = 0;
                }
                if handler.is_none() && !self.wait_for_free_slot(pos, generation) {
                    return false;
                }
                if self.cancelled(generation) {
                    return false;
                }
                lock(&self.ring)[pos..pos + pixel].copy_from_slice(&scan);
                let next = if pos + pixel >= ring_words { 0 } else { pos + pixel };
                self.write_pos.store(next, Ordering::SeqCst);
                trace!("sim: scan {scan_index} of block {block} at {pos}");

                let fill = self.part_fill.fetch_add(1, Ordering::SeqCst) + 1;
                if part_scans > 0 && fill == part_scans {
                    self.part_fill.store(0, Ordering::SeqCst);
                    if let Some(handler) = handler {
                        if let Err(e) = handler.on_interrupt(self) {
                            warn!("sim: interrupt handler failed: {e}");
                        }
                    }
                }
            }
            if !period.is_zero() {
                thread::sleep(period);
            }
        }
        true
    }

    /// Polling mode: the ingest side zeroes a slot once it copied the scan.
    fn wait_for_free_slot(&self, pos: usize, generation: u64) -> bool {
        loop {
            if self.cancelled(generation) {
                return false;
            }
            let occupied = lock(&self.ring)[pos + special_pixels::PIXEL_BLOCK_INDEX_LOW] != 0;
            if !occupied {
                return true;
            }
            thread::yield_now();
        }
    }
}

impl DmaBuffer for Inner {
    fn len(&self) -> usize {
        self.ring_len()
    }

    fn read(&self, offset: usize, dest: &mut [u16]) {
        let ring = lock(&self.ring);
        dest.copy_from_slice(&ring[offset..offset + dest.len()]);
    }

    fn clear(&self, offset: usize, len: usize) {
        lock(&self.ring)[offset..offset + len].fill(0);
    }

    fn physical_address(&self) -> u64 {
        0
    }
}

fn run_generator(inner: Arc<Inner>, rx: Receiver<Command>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::StartBlock { generation } => {
                if inner.cancelled(generation) {
                    continue;
                }
                let completed = inner.generate_block(generation);
                if completed && !inner.cancelled(generation) {
                    // Hardware timer stop after NOS scans.
                    inner.busy.store(false, Ordering::SeqCst);
                    inner.clear_timer();
                }
            }
            Command::Shutdown => break,
        }
    }
}

/// A board without hardware. Implements both [`RegisterAccess`] and
/// [`DmaBuffer`]; hand the same `Arc` to [`crate::board::Board::new`] twice.
pub struct SimBoard {
    inner: Arc<Inner>,
    tx: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SimBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBoard")
            .field("ring_len", &self.inner.ring_len())
            .field("write_count", &self.write_count())
            .finish_non_exhaustive()
    }
}

impl SimBoard {
    /// Creates a board with a DMA ring of `ring_words` 16 bit words.
    pub fn new(ring_words: usize) -> Arc<Self> {
        let inner = Arc::new(Inner {
            regs: Mutex::new(Registers {
                s0: [0; REGISTER_SPACE_LEN],
                dma: [0; REGISTER_SPACE_LEN],
            }),
            ring: Mutex::new(vec![0; ring_words]),
            handler: Mutex::new(None),
            block_counter: AtomicU64::new(0),
            scan_counter: AtomicU64::new(0),
            write_pos: AtomicUsize::new(0),
            part_fill: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            scan_period: Mutex::new(Duration::ZERO),
            noise: AtomicU16::new(0),
            block_trigger: AtomicBool::new(true),
            camera_lost: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_count: AtomicU64::new(0),
            dma_reset_count: AtomicU64::new(0),
        });
        let (tx, rx) = unbounded();
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("lsc-sim".into())
            .spawn(move || run_generator(worker_inner, rx))
            .map_err(|e| warn!("sim: generator thread not started: {e}"))
            .ok();
        Arc::new(Self {
            inner,
            tx,
            worker: Mutex::new(worker),
        })
    }

    /// Delay between two samples.
    pub fn set_scan_period(&self, period: Duration) {
        *lock(&self.inner.scan_period) = period;
    }

    /// Adds uniform noise in `0..=amplitude` to every data pixel.
    pub fn set_noise(&self, amplitude: u16) {
        self.inner.noise.store(amplitude, Ordering::SeqCst);
    }

    /// Level of the block trigger input (TSTART). High by default.
    pub fn set_block_trigger(&self, high: bool) {
        self.inner.block_trigger.store(high, Ordering::SeqCst);
    }

    /// Reports a fiber or camera error.
    pub fn set_camera_lost(&self, lost: bool) {
        self.inner.camera_lost.store(lost, Ordering::SeqCst);
    }

    /// Makes every register write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful register writes so far.
    pub fn write_count(&self) -> u64 {
        self.inner.write_count.load(Ordering::SeqCst)
    }

    pub fn dma_reset_count(&self) -> u64 {
        self.inner.dma_reset_count.load(Ordering::SeqCst)
    }

    pub fn block_counter(&self) -> u64 {
        self.inner.block_counter.load(Ordering::SeqCst)
    }

    fn write(&self, space: AddressSpace, address: u16, data: &[u8]) -> Result<(), DriverStatus> {
        if let RegisterEvent::StartBlock { generation } = self.inner.write_bytes(space, address, data)? {
            self.tx
                .send(Command::StartBlock { generation })
                .map_err(|_| DriverStatus::WriteFailed)?;
        }
        Ok(())
    }
}

impl RegisterAccess for SimBoard {
    fn read_u8(&self, space: AddressSpace, address: u16) -> Result<u8, DriverStatus> {
        let mut b = [0u8; 1];
        self.inner.read_bytes(space, address, &mut b)?;
        Ok(b[0])
    }

    fn read_u16(&self, space: AddressSpace, address: u16) -> Result<u16, DriverStatus> {
        let mut b = [0u8; 2];
        self.inner.read_bytes(space, address, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&self, space: AddressSpace, address: u16) -> Result<u32, DriverStatus> {
        let mut b = [0u8; 4];
        self.inner.read_bytes(space, address, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn write_u8(&self, space: AddressSpace, address: u16, data: u8) -> Result<(), DriverStatus> {
        self.write(space, address, &[data])
    }

    fn write_u16(&self, space: AddressSpace, address: u16, data: u16) -> Result<(), DriverStatus> {
        self.write(space, address, &data.to_le_bytes())
    }

    fn write_u32(&self, space: AddressSpace, address: u16, data: u32) -> Result<(), DriverStatus> {
        self.write(space, address, &data.to_le_bytes())
    }
}

impl DmaBuffer for SimBoard {
    fn len(&self) -> usize {
        self.inner.ring_len()
    }

    fn read(&self, offset: usize, dest: &mut [u16]) {
        self.inner.read(offset, dest)
    }

    fn clear(&self, offset: usize, len: usize) {
        self.inner.clear(offset, len)
    }

    fn physical_address(&self) -> u64 {
        0
    }

    fn register_interrupt_handler(&self, handler: Option<InterruptHandler>) {
        *lock(&self.inner.handler) = handler;
    }
}

impl Drop for SimBoard {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Command::Shutdown);
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            // The generator may hold the last reference through an
            // interrupt handler; it must not join itself.
            let on_worker = worker.thread().id() == thread::current().id();
            if !on_worker && worker.join().is_err() {
                warn!("sim: generator thread panicked");
            }
        }
    }
}
