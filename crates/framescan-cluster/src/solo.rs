use std::time::Duration;

use crate::{Cluster, ClusterError};

/// Single-node transport: the master is the only consumer, so there is never
/// a peer to talk to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloCluster;

impl Cluster for SoloCluster {
    fn rank(&self) -> u32 {
        0
    }

    fn num_nodes(&self) -> u32 {
        1
    }

    fn request_work(&self) -> Result<i32, ClusterError> {
        Err(ClusterError::NoPeers)
    }

    fn recv_request(&self, timeout: Duration) -> Result<Option<u32>, ClusterError> {
        // Nothing will ever arrive; pace the dispatcher's poll loop instead
        // of spinning.
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn reply(&self, node: u32, _value: i32) -> Result<(), ClusterError> {
        Err(ClusterError::BadRank { rank: node, nodes: 1 })
    }
}
