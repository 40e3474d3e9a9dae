#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, info_span};

use framescan_cluster::tcp::TcpCluster;
use framescan_cluster::solo::SoloCluster;
use framescan_cluster::{Cluster, MASTER_RANK};
use framescan_core::config::EngineConfig;
use framescan_core::paths::SidecarPaths;
use framescan_engine::Engine;
use framescan_net::CountingEvaluatorFactory;
use framescan_storage::StorageConfig;
use framescan_video::decode::RawFrameDecoderFactory;
use framescan_video::preprocess::{ensure_preprocessed, CommandPreprocessor};
use framescan_video::sidecar::load_video_metadata;

#[derive(Debug, Parser)]
#[command(name = "framescan", about = "Distributed video-analysis engine")]
struct Args {
    /// File which contains paths to video files to process.
    #[arg(long = "video_paths_file", env = "FRAMESCAN_VIDEO_PATHS_FILE")]
    video_paths_file: PathBuf,

    /// Number of GPUs per node.
    #[arg(long = "gpus_per_node", env = "FRAMESCAN_GPUS_PER_NODE", default_value_t = 1)]
    gpus_per_node: usize,

    /// Neural net input batch size.
    #[arg(long = "batch_size", env = "FRAMESCAN_BATCH_SIZE", default_value_t = 64)]
    batch_size: usize,

    /// Number of batches in each work item.
    #[arg(
        long = "batches_per_work_item",
        env = "FRAMESCAN_BATCHES_PER_WORK_ITEM",
        default_value_t = 4
    )]
    batches_per_work_item: usize,

    /// Number of tasks a node will try to maintain in the work queue per GPU.
    #[arg(
        long = "tasks_in_queue_per_gpu",
        env = "FRAMESCAN_TASKS_IN_QUEUE_PER_GPU",
        default_value_t = 4
    )]
    tasks_in_queue_per_gpu: usize,

    /// Number of worker threads processing load jobs per node.
    #[arg(
        long = "load_workers_per_node",
        env = "FRAMESCAN_LOAD_WORKERS_PER_NODE",
        default_value_t = 2
    )]
    load_workers_per_node: usize,

    /// Number of device streams used for image preprocessing.
    #[arg(long = "cuda_streams", env = "FRAMESCAN_CUDA_STREAMS", default_value_t = 32)]
    cuda_streams: usize,

    /// Storage root videos and sidecars are read from: a directory or
    /// `s3://bucket/prefix`.
    #[arg(long = "storage_root", env = "FRAMESCAN_STORAGE_ROOT", default_value = ".")]
    storage_root: String,

    /// External command the master invokes for each unprocessed video, as
    /// `<cmd> <video> <processed> <metadata> <iframes>`.
    #[arg(
        long = "preprocess_cmd",
        env = "FRAMESCAN_PREPROCESS_CMD",
        default_value = "framescan-preprocess"
    )]
    preprocess_cmd: String,

    /// This node's rank; rank 0 is the master.
    #[arg(long = "rank", env = "FRAMESCAN_RANK", default_value_t = 0)]
    rank: u32,

    /// Total nodes in the cluster.
    #[arg(long = "num_nodes", env = "FRAMESCAN_NUM_NODES", default_value_t = 1)]
    num_nodes: u32,

    /// Master address for the work-token protocol (bound on the master,
    /// connected to by every other rank).
    #[arg(
        long = "master_addr",
        env = "FRAMESCAN_MASTER_ADDR",
        default_value = "127.0.0.1:7750"
    )]
    master_addr: String,

    /// Square input size of the reference evaluator.
    #[arg(long = "input_dim", env = "FRAMESCAN_INPUT_DIM", default_value_t = 227)]
    input_dim: usize,
}

fn main() -> ExitCode {
    framescan_observe::logging::init_tracing();

    // Both `--help` and a missing required option leave with exit code 1.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "framescan failed");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let span = info_span!("framescan", rank = args.rank, nodes = args.num_nodes);
    let _guard = span.enter();

    let storage_config = StorageConfig::from_root(&args.storage_root)?;
    let storage = storage_config.connect()?;

    let videos = read_video_paths(&args.video_paths_file)?;

    let preprocessor = CommandPreprocessor::new(&args.preprocess_cmd);
    let ready = ensure_preprocessed(
        storage.as_ref(),
        &videos,
        &preprocessor,
        args.rank == MASTER_RANK,
    )?;
    if !ready {
        info!("inputs were not preprocessed yet; rerun to evaluate");
        return Ok(ExitCode::SUCCESS);
    }

    let mut metadata = Vec::with_capacity(videos.len());
    for video in &videos {
        let sidecars = SidecarPaths::for_video(video);
        let meta = load_video_metadata(storage.as_ref(), &sidecars.metadata)
            .with_context(|| format!("reading metadata for {}", video.display()))?;
        metadata.push(meta);
    }
    drop(storage);

    let cfg = EngineConfig {
        gpus_per_node: args.gpus_per_node,
        batch_size: args.batch_size,
        batches_per_work_item: args.batches_per_work_item,
        tasks_in_queue_per_gpu: args.tasks_in_queue_per_gpu,
        load_workers_per_node: args.load_workers_per_node,
        cuda_streams: args.cuda_streams,
    };
    let engine = Engine::new(
        cfg,
        videos,
        metadata,
        storage_config,
        Arc::new(RawFrameDecoderFactory),
        Arc::new(CountingEvaluatorFactory::new(args.input_dim, cfg.batch_size)),
    )?;

    let cluster: Box<dyn Cluster> = if args.num_nodes <= 1 {
        Box::new(SoloCluster)
    } else if args.rank == MASTER_RANK {
        Box::new(TcpCluster::master(args.master_addr.as_str(), args.num_nodes)?)
    } else {
        Box::new(TcpCluster::node(
            args.master_addr.as_str(),
            args.rank,
            args.num_nodes,
        )?)
    };

    let report = engine.run(cluster.as_ref())?;
    info!(
        work_items = report.work_item_count,
        evaluated = report.processed.len(),
        buffers = report.buffers_reclaimed,
        "run finished"
    );
    Ok(ExitCode::SUCCESS)
}

fn read_video_paths(path: &PathBuf) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading video paths file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_option_is_enforced() {
        let err = Args::try_parse_from(["framescan"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn tuning_knobs_use_underscore_names() {
        let args = Args::try_parse_from([
            "framescan",
            "--video_paths_file",
            "videos.txt",
            "--gpus_per_node",
            "2",
            "--batch_size",
            "32",
            "--batches_per_work_item",
            "8",
            "--tasks_in_queue_per_gpu",
            "3",
            "--load_workers_per_node",
            "5",
        ])
        .expect("args must parse");
        assert_eq!(args.gpus_per_node, 2);
        assert_eq!(args.batch_size, 32);
        assert_eq!(args.batches_per_work_item, 8);
        assert_eq!(args.tasks_in_queue_per_gpu, 3);
        assert_eq!(args.load_workers_per_node, 5);
        assert_eq!(args.rank, 0);
        assert_eq!(args.num_nodes, 1);
    }

    #[test]
    fn video_paths_file_skips_blank_lines() -> Result<()> {
        let mut root = std::env::temp_dir();
        root.push(format!(
            "framescan-cli-paths-{}-{}",
            std::process::id(),
            framescan_observe::time::unix_time_ms()
        ));
        std::fs::create_dir_all(&root)?;
        let file = root.join("videos.txt");
        std::fs::write(&file, "a.mp4\n\n  \nb/c.mp4\n")?;

        let videos = read_video_paths(&file)?;
        assert_eq!(videos, vec![PathBuf::from("a.mp4"), PathBuf::from("b/c.mp4")]);
        Ok(())
    }
}
