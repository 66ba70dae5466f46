//! The measurement controller.
//!
//! [`Driver::start_measurement`] runs the whole acquisition on the calling
//! thread: arm all selected boards, loop over the blocks, wait for the ingest
//! pipelines and repeat while continuous mode is on. Only one measurement
//! runs at a time; [`AbortHandle`] cancels it from any thread.

use crate::addressing::{Geometry, ScanPosition};
use crate::board::{Board, BoardSetup};
use crate::config::{CameraSettings, MeasurementSettings};
use crate::error::{BoardError, BoardResult, DriverStatus};
use crate::hardware::{BlockTrigger, BoardHardware};
use crate::notify::{MeasurementObserver, NoopObserver};
use crate::platform::Platform;
use crate::special_pixels::{self, SpecialPixels};
use crate::MAX_BOARDS;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayViewMut1};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

/// Flags shared between the controller, the ingest pipelines and abort handles.
#[derive(Debug, Default)]
pub struct RunState {
    pub(crate) running: AtomicBool,
    pub(crate) abort: AtomicBool,
    pub(crate) continuous: AtomicBool,
    pub(crate) measurement_count: AtomicU64,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous.load(Ordering::SeqCst)
    }

    pub fn measurement_count(&self) -> u64 {
        self.measurement_count.load(Ordering::SeqCst)
    }
}

/// Cancels a running measurement from another thread.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    run: Arc<RunState>,
}

impl AbortHandle {
    /// The controller notices at its next busy-wait iteration.
    pub fn abort(&self) {
        self.run.abort.store(true, Ordering::SeqCst);
    }

    /// Ends continuous mode after the current block set without aborting.
    pub fn stop_continuous(&self) {
        self.run.continuous.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }
}

/// Clears the running flag on every exit path.
struct RunningGuard<'a> {
    run: &'a RunState,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.run.running.store(false, Ordering::SeqCst);
    }
}

/// A selected board together with its locked setup for one measurement.
struct ActiveBoard<'a> {
    board: &'a Board,
    setup: &'a mut BoardSetup,
}

impl ActiveBoard<'_> {
    fn hw(&self) -> &BoardHardware {
        self.board.hardware()
    }
}

pub fn calc_measure_time_in_seconds(nos: u32, nob: u32, exposure_time_in_ms: f64) -> f64 {
    nos as f64 * nob as f64 * exposure_time_in_ms / 1000.0
}

pub struct Driver {
    boards: Vec<Board>,
    settings: RwLock<Option<MeasurementSettings>>,
    run: Arc<RunState>,
    platform: Arc<dyn Platform>,
    observer: Arc<dyn MeasurementObserver>,
}

impl Driver {
    pub fn new(boards: Vec<Board>, platform: Arc<dyn Platform>) -> BoardResult<Self> {
        if boards.len() > MAX_BOARDS {
            return Err(BoardError::InvalidBoard(boards.len() - 1));
        }
        for (index, board) in boards.iter().enumerate() {
            if board.drvno() != index {
                return Err(BoardError::InvalidBoard(board.drvno()));
            }
        }
        Ok(Self {
            boards,
            settings: RwLock::new(None),
            run: Arc::new(RunState::default()),
            platform,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn MeasurementObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn number_of_boards(&self) -> usize {
        self.boards.len()
    }

    pub fn board(&self, drvno: usize) -> BoardResult<&Board> {
        self.boards.get(drvno).ok_or(BoardError::InvalidBoard(drvno))
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            run: Arc::clone(&self.run),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    pub fn measurement_count(&self) -> u64 {
        self.run.measurement_count()
    }

    pub fn settings(&self) -> Option<MeasurementSettings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Claims the single-flight flag.
    fn begin(&self) -> BoardResult<RunningGuard<'_>> {
        self.run
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BoardError::AlreadyRunning)?;
        Ok(RunningGuard { run: &self.run })
    }

    fn selected(&self, settings: &MeasurementSettings) -> BoardResult<Vec<&Board>> {
        if settings.board_sel == 0 {
            return Err(BoardError::NoBoardSelected);
        }
        settings
            .selected_boards()
            .map(|drvno| self.board(drvno))
            .collect()
    }

    fn active_settings(&self) -> BoardResult<MeasurementSettings> {
        self.settings()
            .ok_or_else(|| BoardError::InvalidSettings("measurement not initialised".into()))
    }

    //========== initialisation ==============

    /// Validates the settings and initialises software and registers of
    /// every selected board.
    pub fn init_measurement(
        &self,
        settings: &MeasurementSettings,
        cameras: &[CameraSettings],
    ) -> BoardResult<()> {
        let _running = self.begin()?;
        info!("*** Init measurement ***");
        if settings.nos < 2 {
            return Err(BoardError::InvalidSettings(format!(
                "nos = {} must be at least 2",
                settings.nos
            )));
        }
        if settings.nob < 1 {
            return Err(BoardError::InvalidSettings("nob must be at least 1".into()));
        }
        let boards = self.selected(settings)?;
        let poll_interval = Duration::from_micros(settings.poll_interval_us);
        for board in boards {
            let camera = cameras.get(board.drvno()).ok_or_else(|| {
                BoardError::InvalidSettings(format!("no camera settings for board {}", board.drvno()))
            })?;
            info!(
                "Board {}: {} pixel, {} cameras, {} DMA scans, {}",
                board.drvno(),
                camera.pixel,
                camera.camcnt,
                camera.dma_buffer_size_in_scans,
                if camera.use_software_polling {
                    "software polling"
                } else {
                    "interrupts"
                }
            );
            board.init_software(
                camera,
                settings.nos,
                settings.nob,
                poll_interval,
                self.platform.as_ref(),
            )?;
            board.init_pcie_board(camera, settings.nos, settings.nob)?;
        }
        self.run
            .continuous
            .store(settings.continuous, Ordering::SeqCst);
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        info!("*** Init measurement done ***");
        Ok(())
    }

    /// Reallocates the user buffer of one board for the current settings.
    pub fn allocate_user_memory(&self, drvno: usize) -> BoardResult<()> {
        if self.is_running() {
            return Err(BoardError::AlreadyRunning);
        }
        self.board(drvno)?
            .allocate_user_memory(self.platform.as_ref())
    }

    pub fn set_continuous_measurement(&self, on: bool) {
        self.run.continuous.store(on, Ordering::SeqCst);
    }

    //========== measurement ==============

    /// Runs the measurement to completion on the calling thread.
    ///
    /// Returns `AlreadyRunning` without touching any register when another
    /// measurement is active, and `Aborted` after an abort request.
    pub fn start_measurement(&self) -> BoardResult<()> {
        let _running = self.begin()?;
        let settings = self.active_settings()?;
        let boards = self.selected(&settings)?;
        let mut guards: Vec<_> = boards.iter().map(|board| board.lock_setup()).collect();
        let mut active = boards
            .iter()
            .zip(guards.iter_mut())
            .map(|(&board, guard)| {
                guard
                    .as_mut()
                    .map(|setup| ActiveBoard { board, setup })
                    .ok_or_else(|| {
                        BoardError::InvalidSettings(format!("board {} not initialised", board.drvno()))
                    })
            })
            .collect::<BoardResult<Vec<_>>>()?;

        let result = self.run_measurement(&settings, &mut active);
        for board in active.iter_mut() {
            board.setup.pipeline.stop();
        }
        match &result {
            Ok(()) => info!("*** Measurement done ***"),
            Err(e) if e.is_abortion() => info!("*** Measurement aborted ***"),
            Err(e) => warn!("Measurement failed: {e}"),
        }
        result
    }

    fn run_measurement(
        &self,
        settings: &MeasurementSettings,
        active: &mut [ActiveBoard<'_>],
    ) -> BoardResult<()> {
        info!("*** Start measurement ***");
        self.run.abort.store(false, Ordering::SeqCst);
        self.run
            .continuous
            .store(settings.continuous, Ordering::SeqCst);
        self.run.measurement_count.store(0, Ordering::SeqCst);

        for board in active.iter() {
            if board.setup.camera.write_to_disk {
                self.observer.start_disk_writer(board.board.drvno());
            }
        }
        for board in active.iter() {
            board.hw().set_measure_on()?;
        }
        self.observer.measure_start();

        loop {
            let count = self.run.measurement_count.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Measurement count: {count}");
            for board in active.iter() {
                board.hw().reset_hardware_counter()?;
            }
            for board in active.iter() {
                board.board.reset_buffer_write_pos()?;
            }
            for board in active.iter_mut() {
                board.setup.pipeline.start(&self.run)?;
            }

            self.platform.raise_priority()?;
            let blocks = self.run_blocks(settings, active);
            let restored = self.platform.restore_priority();
            blocks?;
            restored?;

            self.wait_for_ingest(settings, active)?;
            for board in active.iter_mut() {
                board.hw().stop_stimer()?;
                board.setup.pipeline.finish()?;
            }
            self.observer.all_blocks_done(count);

            if !self.run.is_continuous() || self.run.is_aborted() {
                break;
            }
            self.pause(Duration::from_micros(settings.cont_pause_in_microseconds));
            if self.run.is_aborted() {
                return self.abort_boards(active.iter().map(|b| b.board));
            }
            if !self.run.is_continuous() {
                break;
            }
        }

        if self.run.is_aborted() {
            return self.abort_boards(active.iter().map(|b| b.board));
        }
        for board in active.iter() {
            board.hw().reset_measure_on()?;
        }
        self.observer.measure_done();
        Ok(())
    }

    fn run_blocks(&self, settings: &MeasurementSettings, active: &[ActiveBoard<'_>]) -> BoardResult<()> {
        let reference = active[0].hw();
        for block in 0..settings.nob {
            for board in active {
                board.hw().count_blocks_by_hardware()?;
            }
            // Only the first selected board is checked for the block trigger.
            if let Err(e) = self.wait_for_block_trigger(reference, settings) {
                return match e {
                    BoardError::Aborted => self.abort_boards(active.iter().map(|b| b.board)),
                    e => Err(e),
                };
            }
            debug!("Block {block} triggered");
            self.observer.block_start(block);

            // The timer is stopped by hardware after NOS scans, so it has to
            // be restarted for every block.
            for board in active {
                board.hw().start_stimer()?;
                board.hw().set_block_on()?;
                if board.setup.camera.use_sw_trig {
                    board.hw().do_software_trigger()?;
                }
            }

            loop {
                let mut any_timer_on = false;
                for board in active {
                    match board.hw().find_cam(board.setup.camera.camcnt) {
                        Ok(()) => {}
                        Err(BoardError::CameraNotFound(drvno)) => {
                            return self
                                .abort_boards(active.iter().map(|b| b.board))
                                .map_err(|e| match e {
                                    BoardError::Aborted => BoardError::CameraNotFound(drvno),
                                    e => e,
                                });
                        }
                        Err(e) => return Err(e),
                    }
                    if self.run.is_aborted() {
                        return self.abort_boards(active.iter().map(|b| b.board));
                    }
                    any_timer_on |= board.hw().is_timer_on()?;
                }
                if !any_timer_on {
                    break;
                }
                self.backoff(settings);
            }

            for board in active {
                board.hw().reset_block_on()?;
            }
            self.observer.block_done(block);
        }
        Ok(())
    }

    fn wait_for_block_trigger(
        &self,
        hw: &BoardHardware,
        settings: &MeasurementSettings,
    ) -> BoardResult<()> {
        debug!("Board {}: wait for block trigger", hw.drvno());
        loop {
            if self.run.is_aborted() {
                return Err(BoardError::Aborted);
            }
            if hw.read_block_trigger_state(BlockTrigger::TStart)? {
                return Ok(());
            }
            self.backoff(settings);
        }
    }

    fn wait_for_ingest(
        &self,
        settings: &MeasurementSettings,
        active: &mut [ActiveBoard<'_>],
    ) -> BoardResult<()> {
        loop {
            let mut all_done = true;
            for board in active.iter_mut() {
                all_done &= board.setup.pipeline.poll_done()?;
            }
            if all_done {
                return Ok(());
            }
            if self.run.is_aborted() {
                return self.abort_boards(active.iter().map(|b| b.board));
            }
            self.backoff(settings);
        }
    }

    fn backoff(&self, settings: &MeasurementSettings) {
        if settings.poll_interval_us == 0 {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_micros(settings.poll_interval_us));
        }
    }

    /// Sleeps between two block sets; returns early on abort or when
    /// continuous mode is switched off.
    fn pause(&self, duration: Duration) {
        const SLICE: Duration = Duration::from_millis(10);
        let until = Instant::now() + duration;
        loop {
            if self.run.is_aborted() || !self.run.is_continuous() {
                return;
            }
            let now = Instant::now();
            if now >= until {
                return;
            }
            thread::sleep(SLICE.min(until - now));
        }
    }

    /// Stops timers, clears block and measure on and resets the DMA engine
    /// of every given board. Always ends in `Aborted` unless a register
    /// access fails first.
    fn abort_boards<'b>(&self, boards: impl Iterator<Item = &'b Board>) -> BoardResult<()> {
        info!("Abort measurement");
        for board in boards {
            let hw = board.hardware();
            hw.stop_stimer()?;
            hw.reset_block_on()?;
            hw.reset_measure_on()?;
            hw.reset_dma()?;
        }
        Err(BoardError::Aborted)
    }

    /// Requests an abort. When no measurement is running the selected boards
    /// are reset right away.
    pub fn abort_measurement(&self) -> BoardResult<()> {
        self.run.abort.store(true, Ordering::SeqCst);
        if self.run.is_running() {
            return Ok(());
        }
        let Some(settings) = self.settings() else {
            return Ok(());
        };
        let boards = self.selected(&settings)?;
        match self.abort_boards(boards.into_iter()) {
            Err(BoardError::Aborted) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Returns once no selected board has block on set.
    pub fn wait_for_block_ready(&self) -> BoardResult<()> {
        self.wait_while_any(|hw| hw.is_block_on())
    }

    /// Returns once no selected board has measure on set.
    pub fn wait_for_measure_ready(&self) -> BoardResult<()> {
        self.wait_while_any(|hw| hw.is_measure_on())
    }

    fn wait_while_any(
        &self,
        mut is_on: impl FnMut(&BoardHardware) -> Result<bool, DriverStatus>,
    ) -> BoardResult<()> {
        let settings = self.active_settings()?;
        let boards = self.selected(&settings)?;
        loop {
            let mut any_on = false;
            for board in &boards {
                any_on |= is_on(board.hardware())?;
            }
            if !any_on {
                return Ok(());
            }
            if self.run.is_aborted() {
                return Err(BoardError::Aborted);
            }
            self.backoff(&settings);
        }
    }

    //========== accessors ==============

    /// While a measurement runs only scans the ingest pipeline already
    /// copied may be read.
    fn ensure_acquired(
        &self,
        board: &Board,
        geometry: &Geometry,
        sample: u32,
        block: u32,
        camera: u32,
    ) -> BoardResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        if geometry.scan_ordinal(sample, block, camera)? >= board.scan_total() {
            return Err(BoardError::NotYetAcquired {
                drvno: board.drvno(),
                sample,
                block,
                camera,
            });
        }
        Ok(())
    }

    /// Copies `dest.len()` samples starting at pixel 0 of the given scan.
    ///
    /// During a measurement, scans not copied yet fail with
    /// [`BoardError::NotYetAcquired`].
    pub fn get_frame(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
        dest: &mut [u16],
    ) -> BoardResult<()> {
        let board = self.board(drvno)?;
        let geometry = board.geometry().ok_or(BoardError::NoUserBuffer(drvno))?;
        self.ensure_acquired(board, &geometry, sample, block, camera)?;
        board.get_frame(sample, block, camera, dest)
    }

    /// Sample and block of the scan `offset` scans after the last copied one.
    pub fn get_scan_number(&self, drvno: usize, offset: i64) -> BoardResult<Option<ScanPosition>> {
        self.board(drvno)?.get_scan_number(offset)
    }

    /// Sample and block of the last copied scan; `None` before the first one.
    pub fn get_current_scan_number(&self, drvno: usize) -> BoardResult<Option<ScanPosition>> {
        self.get_scan_number(drvno, 0)
    }

    fn read_prefix(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
        len: usize,
    ) -> BoardResult<Vec<u16>> {
        let board = self.board(drvno)?;
        let pixel = board
            .geometry()
            .ok_or(BoardError::NoUserBuffer(drvno))?
            .pixel;
        if (pixel as usize) < len {
            return Err(BoardError::InvalidPixelCount(pixel));
        }
        let mut data = vec![0u16; len];
        self.get_frame(drvno, sample, block, camera, &mut data)?;
        Ok(data)
    }

    pub fn get_camera_status_over_temp(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
    ) -> BoardResult<bool> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_CAMERA_STATUS);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::over_temp(&data))
    }

    pub fn get_camera_status_temp_good(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
    ) -> BoardResult<bool> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_CAMERA_STATUS);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::temp_good(&data))
    }

    pub fn get_block_index(&self, drvno: usize, sample: u32, block: u32, camera: u32) -> BoardResult<u32> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_BLOCK_INDEX_LOW);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::block_index(&data))
    }

    pub fn get_scan_index(&self, drvno: usize, sample: u32, block: u32, camera: u32) -> BoardResult<u32> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_SCAN_INDEX_LOW);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::scan_index(&data))
    }

    pub fn get_s1_state(&self, drvno: usize, sample: u32, block: u32, camera: u32) -> BoardResult<bool> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_BLOCK_INDEX_HIGH_S1_S2);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::s1_state(&data))
    }

    pub fn get_s2_state(&self, drvno: usize, sample: u32, block: u32, camera: u32) -> BoardResult<bool> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_BLOCK_INDEX_HIGH_S1_S2);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::s2_state(&data))
    }

    pub fn get_impact_signal_1(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
    ) -> BoardResult<u32> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_IMPACT_SIGNAL_1_LOW);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::impact_signal_1(&data))
    }

    pub fn get_impact_signal_2(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
    ) -> BoardResult<u32> {
        let len = special_pixels::prefix_len(special_pixels::PIXEL_IMPACT_SIGNAL_2_LOW);
        let data = self.read_prefix(drvno, sample, block, camera, len)?;
        Ok(special_pixels::impact_signal_2(&data))
    }

    /// Decodes every special pixel of one scan. Needs more than 63 pixels.
    pub fn get_all_special_pixel_information(
        &self,
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
    ) -> BoardResult<SpecialPixels> {
        let board = self.board(drvno)?;
        let pixel = board
            .geometry()
            .ok_or(BoardError::NoUserBuffer(drvno))?
            .pixel;
        if (pixel as usize) < special_pixels::MIN_PIXEL_FOR_ALL_SPECIAL_PIXELS {
            return Err(BoardError::InvalidPixelCount(pixel));
        }
        let data = self.read_prefix(drvno, sample, block, camera, pixel as usize)?;
        SpecialPixels::decode(&data)
    }

    /// All samples of one block of one camera as a `nos × pixel` array.
    pub fn get_one_block_of_one_camera(
        &self,
        drvno: usize,
        block: u32,
        camera: u32,
    ) -> BoardResult<Array2<u16>> {
        let board = self.board(drvno)?;
        let guard = board.user_buffer();
        let buffer = guard.as_ref().ok_or(BoardError::NoUserBuffer(drvno))?;
        let geometry = buffer.geometry();
        self.ensure_acquired(board, &geometry, geometry.nos.saturating_sub(1), block, camera)?;
        let mut data = Array2::<u16>::zeros((geometry.nos as usize, geometry.pixel as usize));
        for (sample, mut row) in data.rows_mut().into_iter().enumerate() {
            let scan = buffer.scan(sample as u32, block, camera)?;
            row.assign(&ndarray::ArrayView1::from(scan));
        }
        Ok(data)
    }

    /// Mean and RMS noise of one pixel over samples `first_sample..last_sample`
    /// of block 0.
    pub fn calc_trms(
        &self,
        drvno: usize,
        first_sample: u32,
        last_sample: u32,
        pixel: u32,
        camera: u32,
    ) -> BoardResult<(f64, f64)> {
        let board = self.board(drvno)?;
        let guard = board.user_buffer();
        let buffer = guard.as_ref().ok_or(BoardError::NoUserBuffer(drvno))?;
        let geometry = buffer.geometry();
        let nos = geometry.nos;
        if first_sample >= last_sample || last_sample > nos {
            return Err(BoardError::OutOfRange {
                name: "last_sample",
                value: last_sample as u64,
                limit: nos as u64 + 1,
            });
        }
        self.ensure_acquired(board, &geometry, last_sample - 1, 0, camera)?;
        let values = (first_sample..last_sample)
            .map(|sample| Ok(buffer.address(pixel, sample, 0, camera)?[0] as f64))
            .collect::<BoardResult<Array1<f64>>>()?;
        Ok(rms(values))
    }

    /// Overwrites the user buffer with a recognisable pattern.
    pub fn fill_user_buffer_with_dummy_data(&self, drvno: usize) -> BoardResult<()> {
        let board = self.board(drvno)?;
        let mut guard = board.user_buffer_mut();
        let buffer = guard.as_mut().ok_or(BoardError::NoUserBuffer(drvno))?;
        let pixel = buffer.geometry().pixel as usize;
        for (scan, chunk) in buffer.as_mut_slice().chunks_mut(pixel).enumerate() {
            let add = (scan % 2) as u16 * 1000;
            let mut row = ArrayViewMut1::from(chunk);
            row.indexed_iter_mut()
                .for_each(|(p, v)| *v = (p as u16).wrapping_mul(10).wrapping_add(add));
        }
        Ok(())
    }

    /// User memory of all initialised boards in MiB.
    pub fn calc_ram_usage_in_mb(&self) -> f64 {
        let bytes: u64 = self
            .boards
            .iter()
            .filter_map(|board| board.geometry())
            .map(|geometry| geometry.size_in_bytes())
            .sum();
        bytes as f64 / 1_048_576.0
    }
}

fn rms(values: Array1<f64>) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.sum() / n;
    let sum_var = values.mapv(|v| (v - mean).powi(2)).sum();
    (mean, (sum_var / (n + 1.0)).sqrt())
}
