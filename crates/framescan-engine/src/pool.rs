use crossbeam_channel::{Receiver, Sender};

use framescan_core::config::EngineConfig;
use framescan_core::types::GpuId;
use framescan_frame::buffer::FrameBuffer;

use crate::EngineError;

/// Allocate the node's buffer pool — `tasks_in_queue_per_gpu` buffers per
/// GPU, each holding a whole work item of frames — and pre-enqueue every
/// buffer so load workers can start immediately.
pub fn seed_buffers(
    cfg: &EngineConfig,
    frame_size: usize,
    tx: &Sender<FrameBuffer>,
) -> Result<usize, EngineError> {
    let mut seeded = 0;
    for gpu in 0..cfg.gpus_per_node {
        for index in 0..cfg.tasks_in_queue_per_gpu {
            let buffer = FrameBuffer::new(
                GpuId(gpu),
                index,
                frame_size,
                cfg.frames_per_work_item(),
            );
            tx.send(buffer)
                .map_err(|_| EngineError::QueueClosed("empty_buffers"))?;
            seeded += 1;
        }
    }
    Ok(seeded)
}

/// Reclaim the free buffers once every worker has joined. Returns how many
/// came back; with no worker failures this equals the seeded count.
pub fn drain_buffers(rx: &Receiver<FrameBuffer>) -> usize {
    let mut reclaimed = 0;
    while rx.try_recv().is_ok() {
        reclaimed += 1;
    }
    reclaimed
}
