use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use framescan_core::paths::SidecarPaths;
use framescan_core::types::{PixelFormat, VideoMetadata, WorkItem};
use framescan_frame::buffer::FrameBuffer;
use framescan_storage::StorageBackend;
use framescan_video::decode::{DecoderFactory, Frame};
use framescan_video::sidecar;

use crate::queues::{EvalWork, LoadWork};
use crate::stats::LoadStats;
use crate::EngineError;

/// One I/O + decode thread. Owns its own storage backend (backends are not
/// assumed thread-safe) and runs until it observes a shutdown entry.
pub struct LoadWorker {
    pub rank: u32,
    pub worker_index: usize,
    pub videos: Arc<Vec<PathBuf>>,
    pub metadata: Arc<Vec<VideoMetadata>>,
    pub work_items: Arc<Vec<WorkItem>>,
    pub storage: Box<dyn StorageBackend>,
    pub decoder_factory: Arc<dyn DecoderFactory>,
    pub load_work: Receiver<LoadWork>,
    pub empty_buffers: Receiver<FrameBuffer>,
    pub eval_work: Vec<Sender<EvalWork>>,
    pub stats: LoadStats,
    /// Raised by any worker that failed; checked while waiting on a buffer
    /// so a dead evaluate stage cannot leave this thread blocked forever.
    pub fault: Arc<AtomicBool>,
}

impl LoadWorker {
    pub fn run(mut self) -> Result<LoadStats, EngineError> {
        loop {
            let pop_start = Instant::now();
            let entry = self
                .load_work
                .recv()
                .map_err(|_| EngineError::QueueClosed("load_work"))?;
            let LoadWork::Item(work_item_index) = entry else {
                break;
            };
            let mut idle = pop_start.elapsed();
            let task_start = Instant::now();

            let item = self.work_items[work_item_index];
            let video_path = &self.videos[item.video_index];
            let meta = self.metadata[item.video_index];
            let sidecars = SidecarPaths::for_video(video_path);

            let io_start = Instant::now();
            let keyframes = sidecar::load_keyframe_index(self.storage.as_ref(), &sidecars.iframes)?;
            let file = self.storage.open_random_read(&sidecars.processed)?;
            let open_io = io_start.elapsed();

            // The backpressure point: when evaluation is slow every buffer is
            // outstanding and this pop blocks until one is recycled.
            let wait_start = Instant::now();
            let mut buffer = self.acquire_buffer()?;
            idle += wait_start.elapsed();

            let gpu = buffer.gpu();
            let mut decoder = self
                .decoder_factory
                .open(file, &keyframes, &meta, Some(gpu))?;
            decoder.seek(item.start_frame)?;

            let mut copy_time = Duration::ZERO;
            for slot in 0..item.len() as usize {
                let frame = decoder.decode()?;
                let copy_start = Instant::now();
                copy_frame_into(&frame, buffer.slot_mut(slot)?, &meta)?;
                copy_time += copy_start.elapsed();
            }

            let decoder_times = decoder.times();
            self.stats.idle.record(idle);
            self.stats.io.record(open_io + decoder_times.io);
            self.stats.decode.record(decoder_times.decode);
            self.stats.copy.record(copy_time);

            debug!(
                rank = self.rank,
                worker = self.worker_index,
                work_item = work_item_index,
                gpu = gpu.0,
                "work item loaded"
            );

            let eval_tx = self
                .eval_work
                .get(gpu.0)
                .ok_or(EngineError::UnknownGpu { gpu })?;
            eval_tx
                .send(EvalWork::Task {
                    work_item: work_item_index,
                    buffer,
                })
                .map_err(|_| EngineError::QueueClosed("eval_work"))?;

            self.stats.task.record(task_start.elapsed());
        }

        self.stats.summary().log(self.rank, self.worker_index);
        Ok(self.stats)
    }

    fn acquire_buffer(&self) -> Result<FrameBuffer, EngineError> {
        loop {
            if self.fault.load(Ordering::Relaxed) {
                return Err(EngineError::Aborted);
            }
            match self.empty_buffers.recv_timeout(Duration::from_millis(50)) {
                Ok(buffer) => return Ok(buffer),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::QueueClosed("empty_buffers"));
                }
            }
        }
    }
}

/// Copy a decoded frame's planes into one buffer slot, honoring each plane's
/// linesize, producing the packed layout the evaluate stage reads.
fn copy_frame_into(
    frame: &Frame,
    slot: &mut [u8],
    meta: &VideoMetadata,
) -> Result<(), EngineError> {
    if frame.width != meta.width
        || frame.height != meta.height
        || frame.pixel_format != meta.pixel_format
    {
        return Err(EngineError::FrameMismatch {
            got_width: frame.width,
            got_height: frame.height,
            got_format: frame.pixel_format,
            width: meta.width,
            height: meta.height,
            format: meta.pixel_format,
        });
    }

    let w = meta.width as usize;
    let h = meta.height as usize;
    let plane_shapes: &[(usize, usize)] = match meta.pixel_format {
        // (rows, packed row bytes) per plane.
        PixelFormat::Nv12 => &[(h, w), (h.div_ceil(2), 2 * w.div_ceil(2))],
        PixelFormat::Rgb24 => &[(h, w * 3)],
    };
    if frame.planes.len() != plane_shapes.len() {
        return Err(EngineError::FrameMismatch {
            got_width: frame.width,
            got_height: frame.height,
            got_format: frame.pixel_format,
            width: meta.width,
            height: meta.height,
            format: meta.pixel_format,
        });
    }

    let mut offset = 0;
    for (plane, (rows, row_bytes)) in frame.planes.iter().zip(plane_shapes) {
        for row in 0..*rows {
            let src = &plane.data[row * plane.linesize..row * plane.linesize + row_bytes];
            slot[offset..offset + row_bytes].copy_from_slice(src);
            offset += row_bytes;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use framescan_video::decode::FramePlane;

    #[test]
    fn padded_linesizes_are_stripped_on_copy() -> anyhow::Result<()> {
        let meta = VideoMetadata {
            width: 2,
            height: 2,
            frames: 1,
            pixel_format: PixelFormat::Rgb24,
        };
        // 6 packed bytes per row plus 2 bytes of padding.
        let frame = Frame {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgb24,
            planes: vec![FramePlane {
                data: vec![1, 2, 3, 4, 5, 6, 99, 99, 7, 8, 9, 10, 11, 12, 99, 99],
                linesize: 8,
            }],
        };
        let mut slot = vec![0u8; meta.frame_size()];
        copy_frame_into(&frame, &mut slot, &meta)?;
        assert_eq!(slot, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        Ok(())
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let meta = VideoMetadata {
            width: 4,
            height: 4,
            frames: 1,
            pixel_format: PixelFormat::Rgb24,
        };
        let frame = Frame {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgb24,
            planes: vec![FramePlane {
                data: vec![0; 12],
                linesize: 6,
            }],
        };
        let mut slot = vec![0u8; meta.frame_size()];
        let err = copy_frame_into(&frame, &mut slot, &meta).unwrap_err();
        assert!(matches!(err, EngineError::FrameMismatch { .. }));
    }
}
