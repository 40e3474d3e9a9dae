use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use framescan_core::config::EngineConfig;
use framescan_core::types::{GpuId, WorkItem};
use framescan_frame::buffer::FrameBuffer;
use framescan_frame::preprocess::FramePreprocessor;
use framescan_net::{NetInput, NetworkEvaluator};

use crate::queues::EvalWork;
use crate::stats::EvalStats;
use crate::EngineError;

/// One inference thread, bound to a single GPU. Consumes filled buffers from
/// its `eval_work` queue, runs them through the network as
/// `⌊N / batch_size⌋` full batches plus at most one short batch, then
/// returns the buffer to the free pool.
pub struct EvalWorker {
    pub rank: u32,
    pub gpu: GpuId,
    pub cfg: EngineConfig,
    pub work_items: Arc<Vec<WorkItem>>,
    pub evaluator: Box<dyn NetworkEvaluator>,
    pub preprocessor: FramePreprocessor,
    pub input: NetInput,
    pub eval_work: Receiver<EvalWork>,
    pub empty_buffers: Sender<FrameBuffer>,
    pub stats: EvalStats,
    pub processed: Vec<usize>,
}

/// What an evaluate worker hands back when it joins.
pub struct EvalOutcome {
    pub stats: EvalStats,
    /// Work-item indices this worker evaluated, in completion order.
    pub processed: Vec<usize>,
}

impl EvalWorker {
    pub fn run(mut self) -> Result<EvalOutcome, EngineError> {
        loop {
            let pop_start = Instant::now();
            let entry = self
                .eval_work
                .recv()
                .map_err(|_| EngineError::QueueClosed("eval_work"))?;
            let EvalWork::Task { work_item, buffer } = entry else {
                break;
            };
            self.stats.idle.record(pop_start.elapsed());
            let task_start = Instant::now();

            if buffer.gpu() != self.gpu {
                return Err(EngineError::BufferGpuMismatch {
                    buffer: buffer.index(),
                    buffer_gpu: buffer.gpu(),
                    worker_gpu: self.gpu,
                });
            }

            let item = self.work_items[work_item];
            self.evaluate_item(&buffer, item)?;
            self.processed.push(work_item);

            debug!(
                rank = self.rank,
                gpu = self.gpu.0,
                work_item,
                frames = item.len(),
                "work item evaluated"
            );

            self.empty_buffers
                .send(buffer)
                .map_err(|_| EngineError::QueueClosed("empty_buffers"))?;
            self.stats.task.record(task_start.elapsed());
        }

        self.stats.summary().log(self.rank, self.gpu);
        Ok(EvalOutcome {
            stats: self.stats,
            processed: self.processed,
        })
    }

    fn evaluate_item(&mut self, buffer: &FrameBuffer, item: WorkItem) -> Result<(), EngineError> {
        let frames = item.len() as usize;
        let batch = self.cfg.batch_size;
        let full_batches = frames / batch;
        let tail = frames % batch;

        if full_batches > 0 {
            self.ensure_batch(batch)?;
            for b in 0..full_batches {
                self.run_batch(buffer, b * batch, batch)?;
            }
        }
        // Tail frames get a separately shaped forward pass; they are never
        // padded or dropped.
        if tail > 0 {
            self.ensure_batch(tail)?;
            self.run_batch(buffer, full_batches * batch, tail)?;
        }
        Ok(())
    }

    fn ensure_batch(&mut self, batch: usize) -> Result<(), EngineError> {
        if self.input.batch() != batch {
            self.evaluator.set_batch_size(batch)?;
            self.input.resize_batch(batch);
        }
        Ok(())
    }

    fn run_batch(
        &mut self,
        buffer: &FrameBuffer,
        frame_offset: usize,
        batch: usize,
    ) -> Result<(), EngineError> {
        for i in 0..batch {
            let stream = i % self.cfg.cuda_streams;
            let packed = buffer.slot(frame_offset + i)?;
            self.preprocessor
                .prepare_into(stream, packed, self.input.slot_mut(i))?;
        }
        self.preprocessor.synchronize()?;
        self.evaluator.forward(&self.input)?;
        Ok(())
    }
}
