use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use framescan_cluster::solo::SoloCluster;
use framescan_core::config::EngineConfig;
use framescan_core::paths::SidecarPaths;
use framescan_core::types::{PixelFormat, VideoMetadata};
use framescan_engine::Engine;
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

/// With a single pooled buffer and a slow network, the load stage must spend
/// measurable time blocked on the free-buffer queue — the pool is the only
/// flow control there is.
#[test]
fn slow_evaluation_backpressures_the_load_stage() -> anyhow::Result<()> {
    let root = temp_root("slow-eval")?;
    let meta = VideoMetadata {
        width: 4,
        height: 4,
        frames: 12,
        pixel_format: PixelFormat::Rgb24,
    };
    let video = make_video(&root, "clip", meta)?;

    let cfg = EngineConfig {
        gpus_per_node: 1,
        batch_size: 2,
        batches_per_work_item: 1,
        tasks_in_queue_per_gpu: 1,
        load_workers_per_node: 2,
        cuda_streams: 2,
    };
    let delay = Duration::from_millis(30);
    let evaluators = CountingEvaluatorFactory::new(4, cfg.batch_size).with_delay(delay);
    let forward_log = evaluators.forward_log();

    let engine = Engine::new(
        cfg,
        vec![video],
        vec![meta],
        StorageConfig::from_root(&root.display().to_string())?,
        Arc::new(RawFrameDecoderFactory),
        Arc::new(evaluators),
    )?;
    let report = engine.run(&SoloCluster)?;

    // 12 frames, 2 per item: all six items evaluated despite one buffer.
    assert_eq!(report.work_item_count, 6);
    assert_eq!(report.processed.len(), 6);
    assert_eq!(report.buffers_reclaimed, 1);

    let forwards = forward_log
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned"))?
        .len();
    assert_eq!(forwards, 6);

    // Every evaluation holds the only buffer for >= 30ms, so the load side
    // must have been waiting on it for a large share of the run.
    let total_idle_ms: f64 = report.load.iter().map(|s| s.idle.total_ms()).sum();
    assert!(
        total_idle_ms >= 50.0,
        "load workers only waited {total_idle_ms:.1}ms with one buffer and a slow evaluator"
    );
    Ok(())
}
