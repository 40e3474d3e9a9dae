use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::{Cluster, ClusterError, MASTER_RANK};

/// In-process transport: every rank lives in the same process and talks over
/// channels. Used by multi-node tests and single-machine group runs; the
/// semantics match the TCP transport exactly.
pub struct ChannelCluster {
    rank: u32,
    nodes: u32,
    request_tx: Sender<u32>,
    request_rx: Option<Receiver<u32>>,
    reply_txs: Vec<Option<Sender<i32>>>,
    reply_rx: Option<Receiver<i32>>,
}

impl ChannelCluster {
    /// Build one connected transport per rank; element `0` is the master.
    pub fn group(nodes: u32) -> Vec<ChannelCluster> {
        let (request_tx, request_rx) = unbounded::<u32>();

        let mut reply_txs: Vec<Option<Sender<i32>>> = vec![None];
        let mut reply_rxs: Vec<Option<Receiver<i32>>> = vec![None];
        for _ in 1..nodes {
            let (tx, rx) = bounded::<i32>(1);
            reply_txs.push(Some(tx));
            reply_rxs.push(Some(rx));
        }

        (0..nodes)
            .map(|rank| ChannelCluster {
                rank,
                nodes,
                request_tx: request_tx.clone(),
                request_rx: (rank == MASTER_RANK).then(|| request_rx.clone()),
                reply_txs: if rank == MASTER_RANK {
                    reply_txs.clone()
                } else {
                    Vec::new()
                },
                reply_rx: reply_rxs
                    .get(rank as usize)
                    .and_then(|rx| rx.as_ref())
                    .cloned(),
            })
            .collect()
    }
}

impl Cluster for ChannelCluster {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn num_nodes(&self) -> u32 {
        self.nodes
    }

    fn request_work(&self) -> Result<i32, ClusterError> {
        let reply_rx = self.reply_rx.as_ref().ok_or(ClusterError::NoPeers)?;
        self.request_tx
            .send(self.rank)
            .map_err(|_| ClusterError::Disconnected(MASTER_RANK))?;
        reply_rx
            .recv()
            .map_err(|_| ClusterError::Disconnected(MASTER_RANK))
    }

    fn recv_request(&self, timeout: Duration) -> Result<Option<u32>, ClusterError> {
        let request_rx = self.request_rx.as_ref().ok_or(ClusterError::NoPeers)?;
        match request_rx.recv_timeout(timeout) {
            Ok(rank) => Ok(Some(rank)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // The struct holds its own sender clone, so this cannot fire
            // while the master is alive.
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn reply(&self, node: u32, value: i32) -> Result<(), ClusterError> {
        let tx = self
            .reply_txs
            .get(node as usize)
            .and_then(|tx| tx.as_ref())
            .ok_or(ClusterError::BadRank {
                rank: node,
                nodes: self.nodes,
            })?;
        tx.send(value).map_err(|_| ClusterError::Disconnected(node))
    }
}
