use crate::ingest::InterruptHandler;

/// The hardware ring the FPGA writes scans into.
///
/// Provided by the OS glue, which maps the buffer at setup time. Offsets and
/// lengths are in 16 bit words. Implementations must tolerate concurrent
/// hardware writes to regions the caller is not reading.
pub trait DmaBuffer: Send + Sync {
    /// Ring length in words.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `dest.len()` words starting at `offset`.
    fn read(&self, offset: usize, dest: &mut [u16]);

    /// Zeroes `len` words starting at `offset`.
    fn clear(&self, offset: usize, len: usize);

    /// Bus address programmed into the DMA engine.
    fn physical_address(&self) -> u64;

    fn size_in_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<u16>()
    }

    /// Installs the handler the OS glue calls on every part-ready interrupt.
    /// `None` disables interrupt delivery.
    fn register_interrupt_handler(&self, _handler: Option<InterruptHandler>) {}
}
