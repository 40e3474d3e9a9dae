#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Pipelined producer/consumer execution engine.
//!
//! One master distributes work-item indices across the cluster on demand.
//! On every node, load workers pop work items, decode the frames into a free
//! GPU buffer, and hand the filled buffer to the evaluate worker bound to
//! that buffer's GPU; evaluate workers run preprocessing plus inference in
//! streamed batches and recycle the buffer. Backpressure comes from the
//! fixed buffer pool and the dispatcher's high-water mark — a slow GPU
//! cannot cause the master to over-commit work to its node.

pub mod eval;
pub mod load;
pub mod pool;
pub mod queues;
pub mod runtime;
pub mod scheduler;
pub mod stats;

pub use runtime::{Engine, EngineReport};

use thiserror::Error;

use framescan_core::types::{GpuId, PixelFormat};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] framescan_core::config::ConfigError),
    #[error(transparent)]
    Metadata(#[from] framescan_core::types::MetadataError),
    #[error("no videos to process")]
    NoVideos,
    #[error("{videos} video paths but {metadata} metadata records")]
    VideoCountMismatch { videos: usize, metadata: usize },
    #[error(
        "all videos must share one frame layout: video {video} is \
         {got_width}x{got_height} {got_format:?}, expected {width}x{height} {format:?}"
    )]
    MixedResolutions {
        video: usize,
        got_width: u32,
        got_height: u32,
        got_format: PixelFormat,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    #[error("{0} work items exceed the i32 wire protocol range")]
    TooManyWorkItems(usize),
    #[error("work item references unknown gpu {gpu}")]
    UnknownGpu { gpu: GpuId },
    #[error("buffer {buffer} pinned to {buffer_gpu} arrived at evaluate worker for {worker_gpu}")]
    BufferGpuMismatch {
        buffer: usize,
        buffer_gpu: GpuId,
        worker_gpu: GpuId,
    },
    #[error(
        "decoded frame does not match video metadata: got {got_width}x{got_height} \
         {got_format:?}, expected {width}x{height} {format:?}"
    )]
    FrameMismatch {
        got_width: u32,
        got_height: u32,
        got_format: PixelFormat,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    #[error("queue {0} closed")]
    QueueClosed(&'static str),
    #[error("aborting after a failure elsewhere in the pipeline")]
    Aborted,
    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] framescan_storage::StorageError),
    #[error(transparent)]
    Video(#[from] framescan_video::VideoError),
    #[error(transparent)]
    Decode(#[from] framescan_video::decode::DecodeError),
    #[error(transparent)]
    Frame(#[from] framescan_frame::FrameError),
    #[error(transparent)]
    Net(#[from] framescan_net::NetError),
    #[error(transparent)]
    Cluster(#[from] framescan_cluster::ClusterError),
}
