use crossbeam_channel::Sender;
use time::OffsetDateTime;

/// Hooks fired by the measurement loop. All of them are fire-and-forget;
/// a slow observer delays the measurement.
pub trait MeasurementObserver: Send + Sync {
    fn measure_start(&self) {}
    fn measure_done(&self) {}
    fn block_start(&self, _block: u32) {}
    fn block_done(&self, _block: u32) {}
    fn all_blocks_done(&self, _measurement: u64) {}
    /// Called once per board that has `write_to_disk` enabled, before the
    /// hardware is armed.
    fn start_disk_writer(&self, _board: usize) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MeasurementObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasurementEvent {
    Start(OffsetDateTime),
    BlockStart(u32),
    BlockDone(u32),
    AllBlocksDone(u64),
    Done,
    DiskWriterStarted(usize),
}

/// Forwards every notification as a [`MeasurementEvent`].
///
/// A disconnected receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<MeasurementEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<MeasurementEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: MeasurementEvent) {
        let _ = self.tx.send(event);
    }
}

impl MeasurementObserver for ChannelObserver {
    fn measure_start(&self) {
        self.send(MeasurementEvent::Start(OffsetDateTime::now_utc()));
    }

    fn measure_done(&self) {
        self.send(MeasurementEvent::Done);
    }

    fn block_start(&self, block: u32) {
        self.send(MeasurementEvent::BlockStart(block));
    }

    fn block_done(&self, block: u32) {
        self.send(MeasurementEvent::BlockDone(block));
    }

    fn all_blocks_done(&self, measurement: u64) {
        self.send(MeasurementEvent::AllBlocksDone(measurement));
    }

    fn start_disk_writer(&self, board: usize) {
        self.send(MeasurementEvent::DiskWriterStarted(board));
    }
}
