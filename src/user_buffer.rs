use crate::addressing::Geometry;
use crate::error::{BoardError, BoardResult};
use log::debug;

/// Linear buffer holding the complete measurement of one board.
///
/// The capacity always equals the product of the four dimensions of its
/// [`Geometry`]; writes past the end are rejected, not truncated.
#[derive(Debug)]
pub struct UserBuffer {
    data: Vec<u16>,
    geometry: Geometry,
    write_pos: usize,
}

impl UserBuffer {
    /// Allocates a zeroed buffer for `geometry`.
    ///
    /// Fails with `NotEnoughRam` when more than `available` bytes would be
    /// needed, without allocating anything.
    pub fn allocate(geometry: Geometry, available: u64) -> BoardResult<Self> {
        let needed = geometry.size_in_bytes();
        if needed > available {
            return Err(BoardError::NotEnoughRam { needed, available });
        }
        let len = usize::try_from(geometry.len()).map_err(|_| BoardError::AllocationFailed)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| BoardError::AllocationFailed)?;
        data.resize(len, 0);
        debug!("Allocated user buffer of {needed} bytes");
        Ok(Self {
            data,
            geometry,
            write_pos: 0,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }

    /// Position of the next ingest write, in samples.
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Samples still to be written before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.write_pos
    }

    pub fn reset_write_pos(&mut self) {
        self.write_pos = 0;
    }

    /// Appends `src` at the write cursor and advances it.
    pub fn push(&mut self, src: &[u16]) -> BoardResult<()> {
        self.write_at(self.write_pos, src)?;
        self.write_pos += src.len();
        Ok(())
    }

    pub fn write_at(&mut self, position: usize, src: &[u16]) -> BoardResult<()> {
        let end = position
            .checked_add(src.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(BoardError::BufferOverflow {
                position,
                len: src.len(),
                capacity: self.data.len(),
            })?;
        self.data[position..end].copy_from_slice(src);
        Ok(())
    }

    /// View starting at the given coordinate and running to the end of the buffer.
    pub fn address(&self, pixel: u32, sample: u32, block: u32, camera: u32) -> BoardResult<&[u16]> {
        let index = self.geometry.index(pixel, sample, block, camera)?;
        Ok(&self.data[index..])
    }

    /// Copies `dest.len()` samples starting at pixel 0 of the given scan.
    pub fn extract_frame(
        &self,
        sample: u32,
        block: u32,
        camera: u32,
        dest: &mut [u16],
    ) -> BoardResult<()> {
        let start = self.geometry.index(0, sample, block, camera)?;
        let end = start
            .checked_add(dest.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(BoardError::BufferOverflow {
                position: start,
                len: dest.len(),
                capacity: self.data.len(),
            })?;
        dest.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    /// One full scan of one camera.
    pub fn scan(&self, sample: u32, block: u32, camera: u32) -> BoardResult<&[u16]> {
        let start = self.geometry.index(0, sample, block, camera)?;
        Ok(&self.data[start..start + self.geometry.pixel as usize])
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u16] {
        &mut self.data
    }
}
