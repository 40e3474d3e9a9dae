#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Inter-node work distribution transport.
//!
//! The protocol is deliberately tiny: a node sends the master one i32 "more
//! work" token (value ignored) and blocks on a one-i32 reply — either a
//! work-item index or [`NO_MORE_WORK`]. No other framing exists. Three
//! transports implement it: solo (single node), in-process channels (tests
//! and single-machine groups), and TCP.

pub mod channel;
pub mod solo;
pub mod tcp;

use std::time::Duration;

use thiserror::Error;

/// Reply telling a node the dispatcher is exhausted.
pub const NO_MORE_WORK: i32 = -1;

/// The request token. The master ignores the value; only arrival matters.
pub const MORE_WORK_TOKEN: i32 = 1;

pub const MASTER_RANK: u32 = 0;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("rank {rank} out of range for {nodes} nodes")]
    BadRank { rank: u32, nodes: u32 },
    #[error("this transport has no peers")]
    NoPeers,
    #[error("peer {0} disconnected")]
    Disconnected(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Point-to-point work-token transport between one master and its nodes.
pub trait Cluster: Send + Sync {
    fn rank(&self) -> u32;

    fn num_nodes(&self) -> u32;

    fn is_master(&self) -> bool {
        self.rank() == MASTER_RANK
    }

    /// Node side: send one "more work" token to the master and block until
    /// the reply arrives.
    fn request_work(&self) -> Result<i32, ClusterError>;

    /// Master side: wait up to `timeout` for a token from any node. Returns
    /// the requesting rank, or `None` on timeout.
    fn recv_request(&self, timeout: Duration) -> Result<Option<u32>, ClusterError>;

    /// Master side: reply to `node` with a work-item index or [`NO_MORE_WORK`].
    fn reply(&self, node: u32, value: i32) -> Result<(), ClusterError>;
}
