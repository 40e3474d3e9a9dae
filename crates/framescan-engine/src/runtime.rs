use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use framescan_cluster::Cluster;
use framescan_core::config::EngineConfig;
use framescan_core::plan::plan_work_items;
use framescan_core::types::{GpuId, VideoMetadata};
use framescan_frame::preprocess::FramePreprocessor;
use framescan_net::{EvaluatorFactory, NetInput};
use framescan_storage::StorageConfig;
use framescan_video::decode::DecoderFactory;

use crate::eval::EvalWorker;
use crate::load::LoadWorker;
use crate::pool;
use crate::queues::{EvalWork, LoadWork, NodeQueues};
use crate::scheduler;
use crate::stats::{EvalStats, EvalSummary, LoadStats, LoadSummary};
use crate::EngineError;

/// The per-node execution engine. Construct once, then [`run`](Engine::run)
/// with this process's cluster transport; every node constructs the same
/// engine from the same inputs and regenerates the same work-item plan.
pub struct Engine {
    cfg: EngineConfig,
    videos: Arc<Vec<PathBuf>>,
    metadata: Arc<Vec<VideoMetadata>>,
    storage: StorageConfig,
    decoder_factory: Arc<dyn DecoderFactory>,
    evaluator_factory: Arc<dyn EvaluatorFactory>,
}

/// What one node observed over a run.
#[derive(Debug, Default)]
pub struct EngineReport {
    /// Size of the cluster-wide work-item plan.
    pub work_item_count: usize,
    /// `(gpu, work_item)` pairs evaluated on this node, in completion order.
    pub processed: Vec<(GpuId, usize)>,
    /// Free buffers reclaimed after all workers joined.
    pub buffers_reclaimed: usize,
    pub load: Vec<LoadSummary>,
    pub eval: Vec<EvalSummary>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        videos: Vec<PathBuf>,
        metadata: Vec<VideoMetadata>,
        storage: StorageConfig,
        decoder_factory: Arc<dyn DecoderFactory>,
        evaluator_factory: Arc<dyn EvaluatorFactory>,
    ) -> Result<Self, EngineError> {
        cfg.validate()?;
        if videos.is_empty() {
            return Err(EngineError::NoVideos);
        }
        if videos.len() != metadata.len() {
            return Err(EngineError::VideoCountMismatch {
                videos: videos.len(),
                metadata: metadata.len(),
            });
        }
        for meta in &metadata {
            meta.validate()?;
        }
        // The buffer pool's slot size comes from the first video, and it
        // depends on the pixel format as much as on the resolution (RGB24
        // frames are twice the size of NV12 at equal dimensions). Admitting
        // a video with any larger frame layout would let a load worker write
        // past its buffer.
        let first = metadata[0];
        for (video, meta) in metadata.iter().enumerate() {
            if meta.width != first.width
                || meta.height != first.height
                || meta.pixel_format != first.pixel_format
            {
                return Err(EngineError::MixedResolutions {
                    video,
                    got_width: meta.width,
                    got_height: meta.height,
                    got_format: meta.pixel_format,
                    width: first.width,
                    height: first.height,
                    format: first.pixel_format,
                });
            }
        }
        Ok(Self {
            cfg,
            videos: Arc::new(videos),
            metadata: Arc::new(metadata),
            storage,
            decoder_factory,
            evaluator_factory,
        })
    }

    pub fn run(&self, cluster: &dyn Cluster) -> Result<EngineReport, EngineError> {
        let work_items = Arc::new(plan_work_items(
            &self.metadata,
            self.cfg.frames_per_work_item(),
        ));
        if work_items.len() > i32::MAX as usize {
            return Err(EngineError::TooManyWorkItems(work_items.len()));
        }
        if cluster.is_master() {
            info!(
                work_items = work_items.len(),
                nodes = cluster.num_nodes(),
                videos = self.videos.len(),
                "planned work items"
            );
        }

        let queues = NodeQueues::new(&self.cfg);
        let frame_size = self.metadata[0].frame_size();
        let seeded = pool::seed_buffers(&self.cfg, frame_size, &queues.empty_buffers_tx)?;
        let fault = Arc::new(AtomicBool::new(false));

        let mut load_handles = Vec::new();
        for worker_index in 0..self.cfg.load_workers_per_node {
            let worker = LoadWorker {
                rank: cluster.rank(),
                worker_index,
                videos: self.videos.clone(),
                metadata: self.metadata.clone(),
                work_items: work_items.clone(),
                storage: self.storage.connect()?,
                decoder_factory: self.decoder_factory.clone(),
                load_work: queues.load_work_rx.clone(),
                empty_buffers: queues.empty_buffers_rx.clone(),
                eval_work: queues.eval_work.iter().map(|(tx, _)| tx.clone()).collect(),
                stats: LoadStats::default(),
                fault: fault.clone(),
            };
            let fault = fault.clone();
            let handle = std::thread::Builder::new()
                .name(format!("load-{worker_index}"))
                .spawn(move || {
                    let result = worker.run();
                    if result.is_err() {
                        fault.store(true, Ordering::Relaxed);
                    }
                    result
                })?;
            load_handles.push(handle);
        }

        let first = self.metadata[0];
        let mut eval_handles = Vec::new();
        for gpu in (0..self.cfg.gpus_per_node).map(GpuId) {
            let mut evaluator = self.evaluator_factory.create(gpu)?;
            let dim = evaluator.input_size();
            let mean = evaluator.mean_image().clone();
            let preprocessor = FramePreprocessor::new(
                dim,
                self.cfg.cuda_streams,
                first.width,
                first.height,
                first.pixel_format,
                &mean.pixels,
                mean.width,
                mean.height,
            )?;
            evaluator.set_batch_size(self.cfg.batch_size)?;
            let worker = EvalWorker {
                rank: cluster.rank(),
                gpu,
                cfg: self.cfg,
                work_items: work_items.clone(),
                evaluator,
                preprocessor,
                input: NetInput::new(self.cfg.batch_size, dim),
                eval_work: queues.eval_work[gpu.0].1.clone(),
                empty_buffers: queues.empty_buffers_tx.clone(),
                stats: EvalStats::default(),
                processed: Vec::new(),
            };
            let fault = fault.clone();
            let handle = std::thread::Builder::new()
                .name(format!("eval-{gpu}"))
                .spawn(move || {
                    let result = worker.run();
                    if result.is_err() {
                        fault.store(true, Ordering::Relaxed);
                    }
                    result
                })?;
            eval_handles.push((gpu, handle));
        }

        // This thread is the node's control loop: the master dispatches,
        // every other rank requests.
        let control_result = if cluster.is_master() {
            scheduler::run_master_dispatch(cluster, &self.cfg, &queues, work_items.len(), &fault)
        } else {
            scheduler::run_node_requests(cluster, &self.cfg, &queues, &fault)
        };
        if control_result.is_err() {
            fault.store(true, Ordering::Relaxed);
        }
        let mut first_error = control_result.err();

        let mut report = EngineReport {
            work_item_count: work_items.len(),
            ..EngineReport::default()
        };

        // Teardown order matters: load workers drain and join before the
        // evaluate queues see their shutdown entries, and buffers are
        // reclaimed only after every worker has joined.
        shutdown_load_stage(&queues.load_work_tx, self.cfg.load_workers_per_node);
        for handle in load_handles {
            match handle.join() {
                Ok(Ok(stats)) => report.load.push(stats.summary()),
                Ok(Err(err)) => absorb(&mut first_error, err),
                Err(_) => absorb(
                    &mut first_error,
                    EngineError::WorkerPanic("load worker".to_string()),
                ),
            }
        }

        shutdown_eval_stage(queues.eval_work.iter().map(|(tx, _)| tx));
        for (gpu, handle) in eval_handles {
            match handle.join() {
                Ok(Ok(outcome)) => {
                    report.eval.push(outcome.stats.summary());
                    report
                        .processed
                        .extend(outcome.processed.into_iter().map(|item| (gpu, item)));
                }
                Ok(Err(err)) => absorb(&mut first_error, err),
                Err(_) => absorb(
                    &mut first_error,
                    EngineError::WorkerPanic(format!("evaluate worker {gpu}")),
                ),
            }
        }

        report.buffers_reclaimed = pool::drain_buffers(&queues.empty_buffers_rx);
        if first_error.is_none() && report.buffers_reclaimed != seeded {
            warn!(
                seeded,
                reclaimed = report.buffers_reclaimed,
                "buffer pool not fully reclaimed"
            );
        }

        info!(
            rank = cluster.rank(),
            evaluated = report.processed.len(),
            buffers = report.buffers_reclaimed,
            "engine run complete"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

/// Push one shutdown entry per load worker; each worker consumes exactly one
/// on its way out.
pub fn shutdown_load_stage(tx: &Sender<LoadWork>, workers: usize) {
    for _ in 0..workers {
        let _ = tx.send(LoadWork::Shutdown);
    }
}

/// Push one shutdown entry into every per-GPU evaluate queue.
pub fn shutdown_eval_stage<'a>(txs: impl Iterator<Item = &'a Sender<EvalWork>>) {
    for tx in txs {
        let _ = tx.send(EvalWork::Shutdown);
    }
}

/// Keep the most meaningful failure: a real error always beats the
/// secondary [`EngineError::Aborted`] a worker reports when it shut down in
/// reaction to someone else's fault.
fn absorb(first: &mut Option<EngineError>, err: EngineError) {
    let replace = match first {
        None => true,
        Some(EngineError::Aborted) => !matches!(err, EngineError::Aborted),
        Some(_) => false,
    };
    if replace {
        *first = Some(err);
    }
}

/// Count entries currently sitting in a queue receiver without consuming
/// anything else; test support for sentinel accounting.
pub fn drain_count<T>(rx: &Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(entry) = rx.try_recv() {
        out.push(entry);
    }
    out
}
