use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine tuning knobs. Built once at startup and passed by reference to
/// every component; there is no runtime reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// GPUs available on each node; one evaluate worker per GPU.
    pub gpus_per_node: usize,
    /// Network input batch size.
    pub batch_size: usize,
    /// Batches per work item; a work item fills one frame buffer.
    pub batches_per_work_item: usize,
    /// Frame buffers (and queued tasks) maintained per GPU.
    pub tasks_in_queue_per_gpu: usize,
    /// Threads performing I/O and decode per node.
    pub load_workers_per_node: usize,
    /// Asynchronous device streams used by each evaluate worker.
    pub cuda_streams: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gpus_per_node: 1,
            batch_size: 64,
            batches_per_work_item: 4,
            tasks_in_queue_per_gpu: 4,
            load_workers_per_node: 2,
            cuda_streams: 32,
        }
    }
}

impl EngineConfig {
    pub fn frames_per_work_item(&self) -> usize {
        self.batch_size * self.batches_per_work_item
    }

    /// Local backlog threshold above which a node stops pulling work.
    pub fn high_water_mark(&self) -> usize {
        self.gpus_per_node * self.tasks_in_queue_per_gpu
    }

    pub fn buffers_per_node(&self) -> usize {
        self.gpus_per_node * self.tasks_in_queue_per_gpu
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("gpus_per_node", self.gpus_per_node),
            ("batch_size", self.batch_size),
            ("batches_per_work_item", self.batches_per_work_item),
            ("tasks_in_queue_per_gpu", self.tasks_in_queue_per_gpu),
            ("load_workers_per_node", self.load_workers_per_node),
            ("cuda_streams", self.cuda_streams),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroField { field });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    ZeroField { field: &'static str },
}
