//! Worker and dispatcher telemetry, reported once on exit under target
//! `framescan_stats`. Diagnostic only; nothing reads these back.

use framescan_core::types::GpuId;
use framescan_observe::metrics::{Counter, DurationAgg, DurationAggSnapshot, Gauge};
use tracing::info;

/// Master-side dispatch accounting, logged once the last work item has been
/// handed out.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Items the master pushed into its own `load_work` queue.
    pub local_items: Counter,
    /// Items handed to remote nodes over the wire.
    pub remote_items: Counter,
    /// Deepest local backlog the dispatcher observed.
    pub backlog_high_water: Gauge,
}

impl DispatchStats {
    pub fn log(&self, rank: u32) {
        info!(
            target: "framescan_stats",
            event = "dispatch_done",
            rank,
            local_items = self.local_items.get(),
            remote_items = self.remote_items.get(),
            backlog_high_water = self.backlog_high_water.get(),
            "work item dispatch complete"
        );
    }
}

#[derive(Debug, Default)]
pub struct LoadStats {
    pub task: DurationAgg,
    pub idle: DurationAgg,
    pub io: DurationAgg,
    pub decode: DurationAgg,
    pub copy: DurationAgg,
}

impl LoadStats {
    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            task: self.task.snapshot(),
            idle: self.idle.snapshot(),
            io: self.io.snapshot(),
            decode: self.decode.snapshot(),
            copy: self.copy.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSummary {
    pub task: DurationAggSnapshot,
    pub idle: DurationAggSnapshot,
    pub io: DurationAggSnapshot,
    pub decode: DurationAggSnapshot,
    pub copy: DurationAggSnapshot,
}

impl LoadSummary {
    pub fn log(&self, rank: u32, worker: usize) {
        let task_ms = self.task.total_ms();
        let idle_ms = self.idle.total_ms();
        info!(
            target: "framescan_stats",
            event = "load_worker_done",
            rank,
            worker,
            tasks = self.task.count,
            total_ms = task_ms,
            mean_ms = self.task.mean_ms(),
            std_dev_ms = self.task.std_dev_ms(),
            idle_ms,
            idle_pct = share(idle_ms, idle_ms + task_ms),
            io_pct = share(self.io.total_ms(), task_ms),
            decode_pct = share(self.decode.total_ms(), task_ms),
            copy_pct = share(self.copy.total_ms(), task_ms),
            "load worker finished"
        );
    }
}

#[derive(Debug, Default)]
pub struct EvalStats {
    pub task: DurationAgg,
    pub idle: DurationAgg,
}

impl EvalStats {
    pub fn summary(&self) -> EvalSummary {
        EvalSummary {
            task: self.task.snapshot(),
            idle: self.idle.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvalSummary {
    pub task: DurationAggSnapshot,
    pub idle: DurationAggSnapshot,
}

impl EvalSummary {
    pub fn log(&self, rank: u32, gpu: GpuId) {
        let task_ms = self.task.total_ms();
        let idle_ms = self.idle.total_ms();
        info!(
            target: "framescan_stats",
            event = "eval_worker_done",
            rank,
            gpu = gpu.0,
            tasks = self.task.count,
            total_ms = task_ms,
            mean_ms = self.task.mean_ms(),
            std_dev_ms = self.task.std_dev_ms(),
            idle_ms,
            idle_pct = share(idle_ms, idle_ms + task_ms),
            "evaluate worker finished"
        );
    }
}

fn share(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn summaries_capture_recorded_samples() {
        let stats = LoadStats::default();
        stats.task.record(Duration::from_millis(20));
        stats.idle.record(Duration::from_millis(5));

        let summary = stats.summary();
        assert_eq!(summary.task.count, 1);
        assert!((summary.task.total_ms() - 20.0).abs() < 1.0);
        assert!((summary.idle.total_ms() - 5.0).abs() < 1.0);
    }

    #[test]
    fn share_guards_division_by_zero() {
        assert_eq!(share(10.0, 0.0), 0.0);
        assert!((share(1.0, 4.0) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dispatch_stats_accumulate() {
        let stats = DispatchStats::default();
        stats.local_items.inc();
        stats.local_items.inc();
        stats.remote_items.inc();
        stats.backlog_high_water.max(3);
        stats.backlog_high_water.max(1);

        assert_eq!(stats.local_items.get(), 2);
        assert_eq!(stats.remote_items.get(), 1);
        assert_eq!(stats.backlog_high_water.get(), 3);
    }
}
