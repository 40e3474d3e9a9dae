use std::path::{Path, PathBuf};
use std::sync::Arc;

use framescan_cluster::solo::SoloCluster;
use framescan_core::config::EngineConfig;
use framescan_core::paths::SidecarPaths;
use framescan_core::types::{PixelFormat, VideoMetadata};
use framescan_engine::queues::{EvalWork, LoadWork, NodeQueues};
use framescan_engine::runtime::{drain_count, shutdown_eval_stage, shutdown_load_stage};
use framescan_engine::{Engine, EngineError};
use framescan_net::CountingEvaluatorFactory;
use framescan_storage::StorageConfig;
use framescan_video::decode::RawFrameDecoderFactory;
use framescan_video::sidecar::{self, KeyframeIndex};

fn temp_root(test_name: &str) -> anyhow::Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "framescan-engine-{test_name}-{}-{}",
        std::process::id(),
        framescan_observe::time::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

fn make_video(root: &Path, name: &str, meta: VideoMetadata) -> anyhow::Result<PathBuf> {
    let video = root.join(format!("{name}.mp4"));
    std::fs::write(&video, b"original container")?;

    let sidecars = SidecarPaths::for_video(&video);
    let frame_size = meta.frame_size();
    let mut stream = Vec::with_capacity(frame_size * meta.frames as usize);
    for frame in 0..meta.frames {
        stream.extend(std::iter::repeat_n((frame % 251) as u8, frame_size));
    }
    std::fs::write(&sidecars.processed, stream)?;

    let mut metadata_bytes = Vec::new();
    sidecar::write_video_metadata(&mut metadata_bytes, &meta)?;
    std::fs::write(&sidecars.metadata, metadata_bytes)?;

    let mut iframe_bytes = Vec::new();
    sidecar::write_keyframe_index(
        &mut iframe_bytes,
        &KeyframeIndex {
            positions: vec![0],
            timestamps: vec![0],
        },
    )?;
    std::fs::write(&sidecars.iframes, iframe_bytes)?;
    Ok(video)
}

/// Exactly one shutdown entry per load worker and one per evaluate queue.
#[test]
fn teardown_pushes_the_expected_sentinels() {
    let cfg = EngineConfig {
        gpus_per_node: 3,
        load_workers_per_node: 4,
        ..EngineConfig::default()
    };
    let queues = NodeQueues::new(&cfg);

    shutdown_load_stage(&queues.load_work_tx, cfg.load_workers_per_node);
    let load_entries = drain_count(&queues.load_work_rx);
    assert_eq!(load_entries.len(), 4);
    assert!(load_entries
        .iter()
        .all(|entry| matches!(entry, LoadWork::Shutdown)));

    shutdown_eval_stage(queues.eval_work.iter().map(|(tx, _)| tx));
    for (_, rx) in &queues.eval_work {
        let entries = drain_count(rx);
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], EvalWork::Shutdown));
    }
}

/// Multi-GPU fan-out: work lands on both GPUs, every buffer returns home,
/// and the run terminates with no thread left blocked.
#[test]
fn multi_gpu_run_conserves_buffers_and_terminates() -> anyhow::Result<()> {
    let root = temp_root("multi-gpu")?;
    let meta = VideoMetadata {
        width: 4,
        height: 4,
        frames: 16,
        pixel_format: PixelFormat::Rgb24,
    };
    let video = make_video(&root, "clip", meta)?;

    let cfg = EngineConfig {
        gpus_per_node: 2,
        batch_size: 2,
        batches_per_work_item: 1,
        tasks_in_queue_per_gpu: 2,
        load_workers_per_node: 2,
        cuda_streams: 2,
    };
    let engine = Engine::new(
        cfg,
        vec![video],
        vec![meta],
        StorageConfig::from_root(&root.display().to_string())?,
        Arc::new(RawFrameDecoderFactory),
        Arc::new(CountingEvaluatorFactory::new(4, cfg.batch_size)),
    )?;
    let report = engine.run(&SoloCluster)?;

    assert_eq!(report.work_item_count, 8);
    let mut items: Vec<usize> = report.processed.iter().map(|(_, i)| *i).collect();
    items.sort_unstable();
    assert_eq!(items, (0..8).collect::<Vec<_>>());

    // All four buffers (two per GPU) came back to the free pool.
    assert_eq!(report.buffers_reclaimed, 4);
    assert_eq!(report.eval.len(), 2);
    assert_eq!(report.load.len(), 2);
    Ok(())
}

/// A corrupt stream is fatal: the run fails with the decoder's error instead
/// of hanging any worker.
#[test]
fn decoder_failure_fails_the_run_without_hanging() -> anyhow::Result<()> {
    let root = temp_root("decode-fail")?;
    let meta = VideoMetadata {
        width: 4,
        height: 4,
        frames: 8,
        pixel_format: PixelFormat::Rgb24,
    };
    let video = make_video(&root, "clip", meta)?;

    // Truncate the processed stream so the decoder factory rejects it.
    let processed = SidecarPaths::for_video(&video).processed;
    let bytes = std::fs::read(&processed)?;
    std::fs::write(&processed, &bytes[..bytes.len() / 2])?;

    let cfg = EngineConfig {
        gpus_per_node: 1,
        batch_size: 2,
        batches_per_work_item: 1,
        tasks_in_queue_per_gpu: 1,
        load_workers_per_node: 2,
        cuda_streams: 1,
    };
    let engine = Engine::new(
        cfg,
        vec![video],
        vec![meta],
        StorageConfig::from_root(&root.display().to_string())?,
        Arc::new(RawFrameDecoderFactory),
        Arc::new(CountingEvaluatorFactory::new(4, cfg.batch_size)),
    )?;

    let err = engine
        .run(&SoloCluster)
        .err()
        .ok_or_else(|| anyhow::anyhow!("run must fail on a corrupt stream"))?;
    match err {
        EngineError::Decode(_) | EngineError::Video(_) => {}
        other => anyhow::bail!("unexpected error: {other}"),
    }
    Ok(())
}
