//! Moves scans from the hardware DMA ring into the user buffer.
//!
//! Two pipelines share one contract: [`IngestPipeline::start`] arms them for
//! a block set, [`IngestPipeline::poll_done`] reports completion and
//! [`IngestPipeline::finish`] collects scans that never filled a complete
//! DMA part.

use crate::addressing::Geometry;
use crate::board::BoardShared;
use crate::dma::DmaBuffer;
use crate::error::{BoardError, BoardResult};
use crate::measurement::RunState;
use crate::registers::DMA_BUFFER_PARTS;
use crate::special_pixels::{block_index, scan_index_for_ingest, PIXEL_IMPACT_SIGNAL_2_LOW};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Time the polling thread keeps looking for in-flight scans after the
/// measurement stopped.
pub const STOP_GRACE: Duration = Duration::from_millis(100);

/// Smallest scan that holds every leading special pixel.
pub const MIN_PIXEL_FOR_INGEST: usize = PIXEL_IMPACT_SIGNAL_2_LOW + 1;

pub trait IngestPipeline: Send {
    /// Arms the pipeline for one block set. Called after the user buffer
    /// write position has been reset.
    fn start(&mut self, run: &Arc<RunState>) -> BoardResult<()>;

    /// Non-blocking. `Ok(true)` once every expected scan has been copied or
    /// the pipeline gave up after a stop.
    fn poll_done(&mut self) -> BoardResult<bool>;

    /// Copies scans left in the ring that did not complete a DMA part.
    fn finish(&mut self) -> BoardResult<()>;

    /// Disarms the pipeline and waits for any worker to exit.
    fn stop(&mut self);
}

/// Everything a pipeline needs to know about its board.
#[derive(Clone)]
pub struct IngestContext {
    pub drvno: usize,
    pub geometry: Geometry,
    pub dma_buffer_size_in_scans: u32,
    pub dma: Arc<dyn DmaBuffer>,
    pub shared: Arc<BoardShared>,
    pub poll_interval: Duration,
}

impl IngestContext {
    fn scan_words(&self) -> usize {
        self.geometry.pixel as usize
    }

    /// Ring length in words as programmed into the board.
    fn ring_words(&self) -> usize {
        self.dma_buffer_size_in_scans as usize * self.scan_words()
    }

    fn part_scans(&self) -> u32 {
        self.dma_buffer_size_in_scans / DMA_BUFFER_PARTS
    }

    /// Scans must carry the leading special pixels, and the ring must hold
    /// whole scans and split into equal non-empty parts.
    pub fn validate(&self) -> BoardResult<()> {
        if (self.geometry.pixel as usize) < MIN_PIXEL_FOR_INGEST {
            return Err(BoardError::InvalidPixelCount(self.geometry.pixel));
        }
        if self.part_scans() == 0 || self.dma_buffer_size_in_scans % DMA_BUFFER_PARTS != 0 {
            return Err(BoardError::InvalidSettings(format!(
                "board {}: dma_buffer_size_in_scans must be a non-zero multiple of {}, got {}",
                self.drvno, DMA_BUFFER_PARTS, self.dma_buffer_size_in_scans
            )));
        }
        if self.dma.len() < self.ring_words() {
            return Err(BoardError::InvalidSettings(format!(
                "board {}: DMA buffer holds {} words, {} needed",
                self.drvno,
                self.dma.len(),
                self.ring_words()
            )));
        }
        Ok(())
    }

    /// Number of part-ready interrupts one block set produces.
    pub fn expected_interrupts(&self) -> u64 {
        self.geometry.total_scans() / self.part_scans() as u64
    }
}

/// Hardware stamps are 1-based; the mirror of scan `n` is its position plus one.
fn mirror_for(geometry: &Geometry, n: u64) -> (u32, u32) {
    let pos = geometry.scan_position(n);
    (pos.sample + 1, pos.block + 1)
}

//========== polling ==============

/// One background thread per board that waits for each scan's stamps to
/// match the expected counters before copying it.
pub struct PollingIngest {
    ctx: IngestContext,
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    done_rx: Option<Receiver<BoardResult<u64>>>,
    done: bool,
}

impl PollingIngest {
    pub fn new(ctx: IngestContext) -> Self {
        Self {
            ctx,
            stopped: Arc::new(AtomicBool::new(false)),
            worker: None,
            done_rx: None,
            done: false,
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Board {}: polling thread panicked", self.ctx.drvno);
            }
        }
    }
}

impl IngestPipeline for PollingIngest {
    fn start(&mut self, run: &Arc<RunState>) -> BoardResult<()> {
        self.stop();
        self.stopped = Arc::new(AtomicBool::new(false));
        self.done = false;
        self.ctx.shared.reset_counters(false);

        let (done_tx, done_rx) = bounded(1);
        let ctx = self.ctx.clone();
        let run = Arc::clone(run);
        let stopped = Arc::clone(&self.stopped);
        let worker = thread::Builder::new()
            .name(format!("lsc-poll-{}", self.ctx.drvno))
            .spawn(move || poll_dma_buffer_to_user_buffer(ctx, run, stopped, done_tx))
            .map_err(|_| BoardError::IngestFailed(self.ctx.drvno))?;
        self.worker = Some(worker);
        self.done_rx = Some(done_rx);
        Ok(())
    }

    fn poll_done(&mut self) -> BoardResult<bool> {
        if self.done {
            return Ok(true);
        }
        let Some(rx) = &self.done_rx else {
            return Ok(true);
        };
        match rx.try_recv() {
            Ok(result) => {
                let copied = result?;
                debug!("Board {}: polling copied {} scans", self.ctx.drvno, copied);
                self.done = true;
                self.join_worker();
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(BoardError::IngestFailed(self.ctx.drvno)),
        }
    }

    /// The polling thread copies every scan itself.
    fn finish(&mut self) -> BoardResult<()> {
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.join_worker();
        self.done_rx = None;
    }
}

impl Drop for PollingIngest {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_dma_buffer_to_user_buffer(
    ctx: IngestContext,
    run: Arc<RunState>,
    stopped: Arc<AtomicBool>,
    done_tx: Sender<BoardResult<u64>>,
) {
    info!("Board {}: poll DMA buffer to user buffer started", ctx.drvno);
    let result = copy_loop(&ctx, &run, &stopped);
    ctx.shared.all_interrupts_done.store(true, Ordering::SeqCst);
    let _ = done_tx.send(result);
}

fn copy_loop(ctx: &IngestContext, run: &RunState, stopped: &AtomicBool) -> BoardResult<u64> {
    let scan_words = ctx.scan_words();
    let ring_words = ctx.ring_words();
    let mut scan = vec![0u16; scan_words];
    let mut read_pos = 0usize;
    let mut remaining = ctx.geometry.total_scans();
    let mut copied = 0u64;
    let mut mirror = mirror_for(&ctx.geometry, 0);
    let mut give_up_at: Option<Instant> = None;

    while remaining > 0 {
        ctx.dma.read(read_pos, &mut scan);
        let stamps = (scan_index_for_ingest(&scan), block_index(&scan));
        if stamps == mirror {
            {
                let mut guard = ctx
                    .shared
                    .user_buffer
                    .write()
                    .map_err(|_| BoardError::IngestFailed(ctx.drvno))?;
                let buffer = guard.as_mut().ok_or(BoardError::NoUserBuffer(ctx.drvno))?;
                buffer.push(&scan)?;
            }
            ctx.dma.clear(read_pos, scan_words);
            read_pos += scan_words;
            if read_pos >= ring_words {
                read_pos = 0;
            }
            remaining -= 1;
            copied += 1;
            let total = ctx.shared.scan_total.fetch_add(1, Ordering::SeqCst) + 1;
            mirror = mirror_for(&ctx.geometry, total);
            trace!("Board {}: scan {} copied", ctx.drvno, total);
            if give_up_at.is_some() {
                give_up_at = Some(Instant::now() + STOP_GRACE);
            }
            continue;
        }

        let run_stopped =
            run.is_aborted() || !run.is_running() || stopped.load(Ordering::SeqCst);
        if give_up_at.is_none() && run_stopped {
            info!(
                "Board {}: measurement stopped, waiting {:?} for last scans",
                ctx.drvno, STOP_GRACE
            );
            give_up_at = Some(Instant::now() + STOP_GRACE);
        }
        if let Some(deadline) = give_up_at {
            if Instant::now() >= deadline {
                info!("Board {}: polling stopped with {} scans missing", ctx.drvno, remaining);
                break;
            }
        }
        if ctx.poll_interval.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(ctx.poll_interval);
        }
    }
    Ok(copied)
}

//========== interrupt ==============

struct InterruptState {
    ctx: IngestContext,
    expected: u64,
    armed: AtomicBool,
}

/// Called by the OS glue each time the board reports a full DMA part.
///
/// Cheap to clone; every clone feeds the same board.
#[derive(Clone)]
pub struct InterruptHandler {
    state: Arc<InterruptState>,
}

impl std::fmt::Debug for InterruptHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandler")
            .field("drvno", &self.state.ctx.drvno)
            .field("expected", &self.state.expected)
            .finish()
    }
}

impl InterruptHandler {
    /// Copies the next DMA part into the user buffer.
    pub fn on_interrupt(&self, dma: &dyn DmaBuffer) -> BoardResult<()> {
        let state = &self.state;
        let ctx = &state.ctx;
        if !state.armed.load(Ordering::SeqCst) {
            trace!("Board {}: interrupt while disarmed", ctx.drvno);
            return Ok(());
        }
        let count = ctx.shared.interrupt_count.load(Ordering::SeqCst);
        if count >= state.expected {
            warn!("Board {}: surplus interrupt {}", ctx.drvno, count + 1);
            return Ok(());
        }
        let part_scans = ctx.part_scans() as usize;
        let part_words = part_scans * ctx.scan_words();
        let offset = (count % DMA_BUFFER_PARTS as u64) as usize * part_words;
        copy_from_ring(ctx, dma, offset, part_words)?;
        ctx.shared
            .scan_total
            .fetch_add(part_scans as u64, Ordering::SeqCst);
        let count = count + 1;
        ctx.shared.interrupt_count.store(count, Ordering::SeqCst);
        trace!("Board {}: interrupt {}/{}", ctx.drvno, count, state.expected);
        if count == state.expected {
            ctx.shared.all_interrupts_done.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn copy_from_ring(
    ctx: &IngestContext,
    dma: &dyn DmaBuffer,
    offset: usize,
    words: usize,
) -> BoardResult<()> {
    let mut part = vec![0u16; words];
    dma.read(offset, &mut part);
    let mut guard = ctx
        .shared
        .user_buffer
        .write()
        .map_err(|_| BoardError::IngestFailed(ctx.drvno))?;
    let buffer = guard.as_mut().ok_or(BoardError::NoUserBuffer(ctx.drvno))?;
    buffer.push(&part)
}

/// Pipeline driven by part-ready interrupts of the OS glue.
pub struct InterruptIngest {
    handler: InterruptHandler,
}

impl InterruptIngest {
    /// Registers the handler with the board's DMA buffer.
    pub fn new(ctx: IngestContext) -> Self {
        let expected = ctx.expected_interrupts();
        let handler = InterruptHandler {
            state: Arc::new(InterruptState {
                ctx,
                expected,
                armed: AtomicBool::new(false),
            }),
        };
        handler
            .state
            .ctx
            .dma
            .register_interrupt_handler(Some(handler.clone()));
        Self { handler }
    }

    pub fn handler(&self) -> InterruptHandler {
        self.handler.clone()
    }

    pub fn expected_interrupts(&self) -> u64 {
        self.handler.state.expected
    }
}

impl IngestPipeline for InterruptIngest {
    fn start(&mut self, _run: &Arc<RunState>) -> BoardResult<()> {
        let state = &self.handler.state;
        state.ctx.shared.reset_counters(state.expected == 0);
        state.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn poll_done(&mut self) -> BoardResult<bool> {
        Ok(self
            .handler
            .state
            .ctx
            .shared
            .all_interrupts_done
            .load(Ordering::SeqCst))
    }

    fn finish(&mut self) -> BoardResult<()> {
        let ctx = &self.handler.state.ctx;
        let part_scans = ctx.part_scans() as u64;
        let rest = ctx.geometry.total_scans() % part_scans;
        if rest == 0 {
            return Ok(());
        }
        let count = ctx.shared.interrupt_count.load(Ordering::SeqCst);
        let part_words = part_scans as usize * ctx.scan_words();
        let offset = (count % DMA_BUFFER_PARTS as u64) as usize * part_words;
        debug!("Board {}: copying {} remaining scans", ctx.drvno, rest);
        copy_from_ring(ctx, ctx.dma.as_ref(), offset, rest as usize * ctx.scan_words())?;
        ctx.shared.scan_total.fetch_add(rest, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.handler.state.armed.store(false, Ordering::SeqCst);
    }
}

impl Drop for InterruptIngest {
    fn drop(&mut self) {
        self.stop();
        self.handler.state.ctx.dma.register_interrupt_handler(None);
    }
}
