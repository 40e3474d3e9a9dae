use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::{Cluster, ClusterError, MASTER_RANK, MORE_WORK_TOKEN};

/// TCP transport. Every message on the wire is exactly one big-endian i32;
/// the only extra traffic is a one-i32 rank handshake when a node connects.
///
/// The master keeps one write-side stream per node and a reader thread per
/// connection that forwards each arriving token, tagged with its rank, into
/// a single request channel — a blocking receive from any source.
pub struct TcpCluster {
    rank: u32,
    nodes: u32,
    // Master side.
    requests: Option<Receiver<u32>>,
    _request_tx: Option<Sender<u32>>,
    peers: Vec<Option<Mutex<TcpStream>>>,
    // Node side.
    master: Option<Mutex<TcpStream>>,
}

impl TcpCluster {
    /// Bind `listen` and wait for `nodes - 1` peers to connect and handshake.
    pub fn master(listen: impl ToSocketAddrs, nodes: u32) -> Result<Self, ClusterError> {
        let listener = TcpListener::bind(listen)?;
        Self::master_with_listener(listener, nodes)
    }

    pub fn master_with_listener(
        listener: TcpListener,
        nodes: u32,
    ) -> Result<Self, ClusterError> {
        let (request_tx, requests) = unbounded::<u32>();
        let mut peers: Vec<Option<Mutex<TcpStream>>> = Vec::new();
        peers.resize_with(nodes as usize, || None);

        for _ in 1..nodes {
            let (mut stream, addr) = listener.accept()?;
            stream.set_nodelay(true)?;
            let rank = stream.read_i32::<BigEndian>()?;
            let rank = u32::try_from(rank).map_err(|_| ClusterError::BadRank {
                rank: rank.max(0) as u32,
                nodes,
            })?;
            let slot = peers
                .get_mut(rank as usize)
                .filter(|slot| slot.is_none())
                .filter(|_| rank != MASTER_RANK)
                .ok_or(ClusterError::BadRank { rank, nodes })?;
            debug!(rank, peer = %addr, "cluster peer connected");

            let reader = stream.try_clone()?;
            let tx = request_tx.clone();
            std::thread::Builder::new()
                .name(format!("cluster-rx-{rank}"))
                .spawn(move || forward_tokens(reader, rank, tx))?;

            *slot = Some(Mutex::new(stream));
        }

        Ok(Self {
            rank: MASTER_RANK,
            nodes,
            requests: Some(requests),
            _request_tx: Some(request_tx),
            peers,
            master: None,
        })
    }

    /// Connect to the master and handshake as `rank`.
    pub fn node(
        master_addr: impl ToSocketAddrs,
        rank: u32,
        nodes: u32,
    ) -> Result<Self, ClusterError> {
        if rank == MASTER_RANK || rank >= nodes {
            return Err(ClusterError::BadRank { rank, nodes });
        }
        let mut stream = TcpStream::connect(master_addr)?;
        stream.set_nodelay(true)?;
        stream.write_i32::<BigEndian>(rank as i32)?;
        Ok(Self {
            rank,
            nodes,
            requests: None,
            _request_tx: None,
            peers: Vec::new(),
            master: Some(Mutex::new(stream)),
        })
    }
}

fn forward_tokens(mut reader: TcpStream, rank: u32, tx: Sender<u32>) {
    loop {
        match reader.read_i32::<BigEndian>() {
            Ok(_token) => {
                if tx.send(rank).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return,
            Err(err) => {
                warn!(rank, error = %err, "cluster peer read failed");
                return;
            }
        }
    }
}

impl Cluster for TcpCluster {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn num_nodes(&self) -> u32 {
        self.nodes
    }

    fn request_work(&self) -> Result<i32, ClusterError> {
        let stream = self.master.as_ref().ok_or(ClusterError::NoPeers)?;
        let mut stream = stream
            .lock()
            .map_err(|_| ClusterError::Disconnected(MASTER_RANK))?;
        stream.write_i32::<BigEndian>(MORE_WORK_TOKEN)?;
        Ok(stream.read_i32::<BigEndian>()?)
    }

    fn recv_request(&self, timeout: Duration) -> Result<Option<u32>, ClusterError> {
        let requests = self.requests.as_ref().ok_or(ClusterError::NoPeers)?;
        match requests.recv_timeout(timeout) {
            Ok(rank) => Ok(Some(rank)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn reply(&self, node: u32, value: i32) -> Result<(), ClusterError> {
        let stream = self
            .peers
            .get(node as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(ClusterError::BadRank {
                rank: node,
                nodes: self.nodes,
            })?;
        let mut stream = stream.lock().map_err(|_| ClusterError::Disconnected(node))?;
        stream.write_i32::<BigEndian>(value)?;
        Ok(())
    }
}
