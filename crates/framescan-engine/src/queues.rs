use crossbeam_channel::{bounded, Receiver, Sender};

use framescan_core::config::EngineConfig;
use framescan_frame::buffer::FrameBuffer;

/// Entry on a node's `load_work` queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWork {
    Item(usize),
    /// Observed on the next pop; the load worker returns cleanly.
    Shutdown,
}

/// Entry on a per-GPU `eval_work` queue. The filled buffer and its work item
/// travel as one indivisible token, so an evaluate worker can never pick up
/// a work item without the frames that belong to it.
#[derive(Debug)]
pub enum EvalWork {
    Task { work_item: usize, buffer: FrameBuffer },
    Shutdown,
}

/// The three queue families of one node. All are bounded MPMC FIFO with
/// blocking pops; push and pop are the linearization points.
pub struct NodeQueues {
    pub load_work_tx: Sender<LoadWork>,
    pub load_work_rx: Receiver<LoadWork>,
    pub empty_buffers_tx: Sender<FrameBuffer>,
    pub empty_buffers_rx: Receiver<FrameBuffer>,
    pub eval_work: Vec<(Sender<EvalWork>, Receiver<EvalWork>)>,
}

impl NodeQueues {
    pub fn new(cfg: &EngineConfig) -> Self {
        // Extra headroom beyond the high-water mark keeps the shutdown
        // entries from blocking behind a full queue at teardown.
        let (load_work_tx, load_work_rx) =
            bounded(cfg.high_water_mark() + cfg.load_workers_per_node);
        let (empty_buffers_tx, empty_buffers_rx) = bounded(cfg.buffers_per_node());
        let eval_work = (0..cfg.gpus_per_node)
            .map(|_| bounded(cfg.tasks_in_queue_per_gpu + 1))
            .collect();
        Self {
            load_work_tx,
            load_work_rx,
            empty_buffers_tx,
            empty_buffers_rx,
            eval_work,
        }
    }

    /// Entries currently queued on this node, the quantity the pull
    /// scheduler compares against the high-water mark.
    pub fn backlog(&self) -> usize {
        self.load_work_rx.len()
            + self
                .eval_work
                .iter()
                .map(|(_, rx)| rx.len())
                .sum::<usize>()
    }
}
