//! Pull-based work distribution.
//!
//! The master self-assigns into its own `load_work` queue whenever its local
//! backlog is below the high-water mark, and otherwise services blocking
//! receives from remote nodes. Each pass self-assigns at most one item and
//! then services at most one pending remote request, so local consumption
//! cannot starve the rest of the cluster.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use framescan_cluster::{Cluster, ClusterError, NO_MORE_WORK};
use framescan_core::config::EngineConfig;
use framescan_observe::metrics::Counter;

use crate::queues::{LoadWork, NodeQueues};
use crate::stats::DispatchStats;
use crate::EngineError;

/// How long the master blocks on a remote receive before re-observing its
/// local backlog; also the node coordinator's backlog poll interval.
const DISPATCH_POLL: Duration = Duration::from_millis(10);
const BACKLOG_POLL: Duration = Duration::from_millis(1);

/// Master side: hand out `0..num_items`, then exactly one [`NO_MORE_WORK`]
/// per remote node, then return.
pub fn run_master_dispatch(
    cluster: &dyn Cluster,
    cfg: &EngineConfig,
    queues: &NodeQueues,
    num_items: usize,
    fault: &AtomicBool,
) -> Result<(), EngineError> {
    let high_water = cfg.high_water_mark();
    let remote_nodes = cluster.num_nodes() > 1;
    let stats = DispatchStats::default();
    let mut next_index = 0usize;

    while next_index < num_items {
        if fault.load(Ordering::Relaxed) {
            return Ok(());
        }

        let backlog = queues.backlog();
        stats.backlog_high_water.max(backlog as u64);

        if backlog < high_water {
            if next_index % 10 == 0 {
                debug!(remaining = num_items - next_index, "work items left");
            }
            queues
                .load_work_tx
                .send(LoadWork::Item(next_index))
                .map_err(|_| EngineError::QueueClosed("load_work"))?;
            stats.local_items.inc();
            next_index += 1;

            if remote_nodes && next_index < num_items {
                if let Some(rank) = cluster.recv_request(Duration::ZERO)? {
                    cluster.reply(rank, next_index as i32)?;
                    stats.remote_items.inc();
                    next_index += 1;
                }
            }
        } else if remote_nodes {
            if let Some(rank) = cluster.recv_request(DISPATCH_POLL)? {
                cluster.reply(rank, next_index as i32)?;
                stats.remote_items.inc();
                next_index += 1;
            }
        } else {
            // Saturated and alone: pace the backlog poll.
            cluster.recv_request(DISPATCH_POLL)?;
        }
    }

    stats.log(cluster.rank());

    let mut workers_done = 1;
    while workers_done < cluster.num_nodes() {
        if fault.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(rank) = cluster.recv_request(DISPATCH_POLL)? {
            cluster.reply(rank, NO_MORE_WORK)?;
            workers_done += 1;
            debug!(rank, workers_done, "node released");
        }
    }
    Ok(())
}

/// Node side: whenever the local backlog drops below the high-water mark,
/// send a "more work" token and block on the reply; a [`NO_MORE_WORK`] reply
/// ends the loop.
pub fn run_node_requests(
    cluster: &dyn Cluster,
    cfg: &EngineConfig,
    queues: &NodeQueues,
    fault: &AtomicBool,
) -> Result<(), EngineError> {
    let high_water = cfg.high_water_mark();
    let received = Counter::default();
    loop {
        if fault.load(Ordering::Relaxed) {
            return Ok(());
        }
        if queues.backlog() < high_water {
            let reply = match cluster.request_work() {
                Ok(reply) => reply,
                Err(ClusterError::Disconnected(_)) if fault.load(Ordering::Relaxed) => {
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            if reply < 0 {
                info!(
                    target: "framescan_stats",
                    event = "node_released",
                    rank = cluster.rank(),
                    received_items = received.get(),
                    "no more work"
                );
                return Ok(());
            }
            queues
                .load_work_tx
                .send(LoadWork::Item(reply as usize))
                .map_err(|_| EngineError::QueueClosed("load_work"))?;
            received.inc();
        } else {
            std::thread::sleep(BACKLOG_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framescan_cluster::channel::ChannelCluster;
    use framescan_cluster::solo::SoloCluster;
    use framescan_core::config::EngineConfig;

    fn small_cfg() -> EngineConfig {
        EngineConfig {
            gpus_per_node: 1,
            batch_size: 2,
            batches_per_work_item: 2,
            tasks_in_queue_per_gpu: 8,
            load_workers_per_node: 1,
            cuda_streams: 2,
        }
    }

    #[test]
    fn solo_master_pushes_every_item_locally() -> anyhow::Result<()> {
        let cfg = small_cfg();
        let queues = NodeQueues::new(&cfg);
        let fault = AtomicBool::new(false);

        run_master_dispatch(&SoloCluster, &cfg, &queues, 5, &fault)?;

        let mut got = Vec::new();
        while let Ok(entry) = queues.load_work_rx.try_recv() {
            got.push(entry);
        }
        assert_eq!(
            got,
            (0..5).map(LoadWork::Item).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn remote_node_receives_items_then_release() -> anyhow::Result<()> {
        let cfg = small_cfg();
        let mut group = ChannelCluster::group(2);
        let node_cluster = group.pop().ok_or_else(|| anyhow::anyhow!("node"))?;
        let master_cluster = group.pop().ok_or_else(|| anyhow::anyhow!("master"))?;

        // Saturate the master's local backlog so every item is offered to
        // the remote side.
        let master_cfg = EngineConfig {
            tasks_in_queue_per_gpu: 1,
            ..cfg
        };
        let master_queues = NodeQueues::new(&master_cfg);
        master_queues.load_work_tx.send(LoadWork::Item(999))?;

        let master = std::thread::spawn(move || -> Result<(), EngineError> {
            let fault = AtomicBool::new(false);
            run_master_dispatch(&master_cluster, &master_cfg, &master_queues, 3, &fault)
        });

        let node_queues = NodeQueues::new(&cfg);
        let fault = AtomicBool::new(false);
        run_node_requests(&node_cluster, &cfg, &node_queues, &fault)?;

        master
            .join()
            .map_err(|_| anyhow::anyhow!("master panicked"))??;

        let mut got = Vec::new();
        while let Ok(entry) = node_queues.load_work_rx.try_recv() {
            got.push(entry);
        }
        // The pre-seeded entry keeps the master saturated, so every real
        // item flows to the remote node.
        assert_eq!(
            got,
            vec![LoadWork::Item(0), LoadWork::Item(1), LoadWork::Item(2)]
        );
        Ok(())
    }

    #[test]
    fn fault_stops_the_dispatcher() -> anyhow::Result<()> {
        let cfg = small_cfg();
        let queues = NodeQueues::new(&cfg);
        let fault = AtomicBool::new(true);

        run_master_dispatch(&SoloCluster, &cfg, &queues, 100, &fault)?;
        assert_eq!(queues.backlog(), 0);
        Ok(())
    }
}
