use crate::addressing::{Geometry, ScanPosition};
use crate::config::CameraSettings;
use crate::dma::DmaBuffer;
use crate::error::{BoardError, BoardResult};
use crate::hardware::BoardHardware;
use crate::ingest::{IngestContext, IngestPipeline, InterruptIngest, PollingIngest};
use crate::platform::Platform;
use crate::registers::RegisterAccess;
use crate::user_buffer::UserBuffer;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// State one ingest pipeline produces and the controller and accessors consume.
#[derive(Debug, Default)]
pub struct BoardShared {
    pub(crate) user_buffer: RwLock<Option<UserBuffer>>,
    /// Single-camera scans copied in the current block set.
    pub(crate) scan_total: AtomicU64,
    pub(crate) interrupt_count: AtomicU64,
    pub(crate) all_interrupts_done: AtomicBool,
}

impl BoardShared {
    pub(crate) fn reset_counters(&self, all_interrupts_done: bool) {
        self.scan_total.store(0, Ordering::SeqCst);
        self.interrupt_count.store(0, Ordering::SeqCst);
        self.all_interrupts_done
            .store(all_interrupts_done, Ordering::SeqCst);
    }
}

/// Per-board configuration fixed by the last successful initialisation.
pub(crate) struct BoardSetup {
    pub camera: CameraSettings,
    pub geometry: Geometry,
    pub pipeline: Box<dyn IngestPipeline>,
}

/// One PCIe board with its user buffer and ingest pipeline.
pub struct Board {
    drvno: usize,
    hardware: BoardHardware,
    dma: Arc<dyn DmaBuffer>,
    shared: Arc<BoardShared>,
    setup: Mutex<Option<BoardSetup>>,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("drvno", &self.drvno)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl Board {
    pub fn new(drvno: usize, regs: Arc<dyn RegisterAccess>, dma: Arc<dyn DmaBuffer>) -> Self {
        Self {
            drvno,
            hardware: BoardHardware::new(drvno, regs),
            dma,
            shared: Arc::new(BoardShared::default()),
            setup: Mutex::new(None),
        }
    }

    pub fn drvno(&self) -> usize {
        self.drvno
    }

    pub fn hardware(&self) -> &BoardHardware {
        &self.hardware
    }

    pub(crate) fn lock_setup(&self) -> MutexGuard<'_, Option<BoardSetup>> {
        self.setup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dimensions of the current user buffer. Does not block while a
    /// measurement runs.
    pub fn geometry(&self) -> Option<Geometry> {
        self.user_buffer().as_ref().map(|buffer| buffer.geometry())
    }

    /// Software side of the initialisation: user buffer and ingest pipeline.
    pub(crate) fn init_software(
        &self,
        camera: &CameraSettings,
        nos: u32,
        nob: u32,
        poll_interval: Duration,
        platform: &dyn Platform,
    ) -> BoardResult<()> {
        let geometry = Geometry::new(camera.pixel, camera.camcnt, nos, nob);
        let ctx = IngestContext {
            drvno: self.drvno,
            geometry,
            dma_buffer_size_in_scans: camera.dma_buffer_size_in_scans,
            dma: Arc::clone(&self.dma),
            shared: Arc::clone(&self.shared),
            poll_interval,
        };
        ctx.validate()?;

        let mut setup = self.lock_setup();
        // Stops a previous pipeline and unregisters its interrupt handler.
        *setup = None;
        self.allocate(geometry, platform)?;
        let pipeline: Box<dyn IngestPipeline> = if camera.use_software_polling {
            Box::new(PollingIngest::new(ctx))
        } else {
            let pipeline = InterruptIngest::new(ctx);
            debug!(
                "Board {}: {} interrupts expected per block set",
                self.drvno,
                pipeline.expected_interrupts()
            );
            Box::new(pipeline)
        };
        *setup = Some(BoardSetup {
            camera: camera.clone(),
            geometry,
            pipeline,
        });
        Ok(())
    }

    /// Register side of the initialisation.
    pub(crate) fn init_pcie_board(&self, camera: &CameraSettings, nos: u32, nob: u32) -> BoardResult<()> {
        info!("Board {}: init PCIe board", self.drvno);
        let hw = &self.hardware;
        hw.stop_stimer()?;
        hw.reset_fifo()?;
        hw.set_dma_buf_regs(camera.dma_buffer_size_in_scans, nos, nob)?;
        hw.clear_all_user_regs()?;
        hw.set_pixel_count(camera.pixel)?;
        hw.set_camcnt(camera.camcnt)?;
        hw.set_sslope(camera.sslope)?;
        hw.set_bslope(camera.bslope)?;
        hw.set_sti(camera.sti_mode)?;
        hw.set_bti(camera.bti_mode)?;
        hw.set_stimer(camera.stime_in_microsec)?;
        hw.set_btimer(camera.btime_in_microsec)?;
        hw.set_sdat(camera.sdat_in_10ns)?;
        hw.set_bdat(camera.bdat_in_10ns)?;
        hw.set_bec(camera.bec_in_10ns)?;
        hw.set_xckdelay(camera.xckdelay_in_10ns)?;
        hw.set_hardware_timer_stop_mode(true)?;
        hw.set_dma_start_mode(true)?;
        hw.set_ticnt(camera.ticnt)?;
        hw.set_tocnt(camera.tocnt)?;
        Ok(())
    }

    /// Replaces the user buffer with a fresh zeroed one sized for the
    /// current geometry.
    pub fn allocate_user_memory(&self, platform: &dyn Platform) -> BoardResult<()> {
        let geometry = self
            .lock_setup()
            .as_ref()
            .map(|setup| setup.geometry)
            .ok_or_else(|| BoardError::InvalidSettings(format!("board {} not initialised", self.drvno)))?;
        self.allocate(geometry, platform)
    }

    fn allocate(&self, geometry: Geometry, platform: &dyn Platform) -> BoardResult<()> {
        let (free, total) = platform.free_and_total_physical_memory()?;
        debug!(
            "Board {}: {} bytes needed, {} of {} bytes free",
            self.drvno,
            geometry.size_in_bytes(),
            free,
            total
        );
        let mut guard = self.user_buffer_mut();
        *guard = None;
        *guard = Some(UserBuffer::allocate(geometry, free)?);
        Ok(())
    }

    pub(crate) fn reset_buffer_write_pos(&self) -> BoardResult<()> {
        self.user_buffer_mut()
            .as_mut()
            .ok_or(BoardError::NoUserBuffer(self.drvno))?
            .reset_write_pos();
        Ok(())
    }

    /// Read access to the user buffer. Regions past the current scan count
    /// may still be written by the ingest pipeline.
    pub fn user_buffer(&self) -> RwLockReadGuard<'_, Option<UserBuffer>> {
        self.shared
            .user_buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn user_buffer_mut(&self) -> RwLockWriteGuard<'_, Option<UserBuffer>> {
        self.shared
            .user_buffer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scan_total(&self) -> u64 {
        self.shared.scan_total.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> u64 {
        self.shared.interrupt_count.load(Ordering::SeqCst)
    }

    pub fn all_interrupts_done(&self) -> bool {
        self.shared.all_interrupts_done.load(Ordering::SeqCst)
    }

    /// Position of the scan `offset` scans after the last one copied, or
    /// `None` when that lies before the first scan.
    pub fn get_scan_number(&self, offset: i64) -> BoardResult<Option<ScanPosition>> {
        let geometry = self
            .geometry()
            .ok_or_else(|| BoardError::InvalidSettings(format!("board {} not initialised", self.drvno)))?;
        let last = i64::try_from(self.scan_total()).unwrap_or(i64::MAX) - 1;
        let ordinal = last.checked_add(offset).ok_or(BoardError::OutOfRange {
            name: "offset",
            value: offset.unsigned_abs(),
            limit: i64::MAX as u64,
        })?;
        if ordinal < 0 {
            return Ok(None);
        }
        Ok(Some(geometry.scan_position(ordinal as u64)))
    }

    /// Unchecked against the ingest progress; [`crate::Driver::get_frame`]
    /// refuses scans a running measurement has not copied yet.
    pub fn get_frame(&self, sample: u32, block: u32, camera: u32, dest: &mut [u16]) -> BoardResult<()> {
        self.user_buffer()
            .as_ref()
            .ok_or(BoardError::NoUserBuffer(self.drvno))?
            .extract_frame(sample, block, camera, dest)
    }
}
