use framescan_core::types::GpuId;

use crate::FrameError;

/// One pooled device allocation, sized to a whole work item of frames and
/// pinned to a single GPU for its lifetime. The buffer value itself moves
/// between the load and evaluate stages, so at any instant exactly one
/// worker (or the free queue) owns it.
#[derive(Debug)]
pub struct FrameBuffer {
    gpu: GpuId,
    index: usize,
    frame_size: usize,
    data: Box<[u8]>,
}

impl FrameBuffer {
    pub fn new(gpu: GpuId, index: usize, frame_size: usize, frames: usize) -> Self {
        Self {
            gpu,
            index,
            frame_size,
            data: vec![0u8; frame_size * frames].into_boxed_slice(),
        }
    }

    pub fn gpu(&self) -> GpuId {
        self.gpu
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn slots(&self) -> usize {
        if self.frame_size == 0 {
            0
        } else {
            self.data.len() / self.frame_size
        }
    }

    pub fn slot(&self, slot: usize) -> Result<&[u8], FrameError> {
        self.slot_range(slot)
            .map(|(start, end)| &self.data[start..end])
    }

    pub fn slot_mut(&mut self, slot: usize) -> Result<&mut [u8], FrameError> {
        self.slot_range(slot)
            .map(|(start, end)| &mut self.data[start..end])
    }

    fn slot_range(&self, slot: usize) -> Result<(usize, usize), FrameError> {
        let slots = self.slots();
        if slot >= slots {
            return Err(FrameError::SlotOutOfRange { slot, slots });
        }
        let start = slot * self.frame_size;
        Ok((start, start + self.frame_size))
    }
}
