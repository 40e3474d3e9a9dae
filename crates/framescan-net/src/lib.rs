#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Neural-network evaluator seam. The engine drives any implementation of
//! [`NetworkEvaluator`]; the in-tree [`CountingEvaluator`] records forward
//! passes so runs are observable without a real network backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use framescan_core::types::GpuId;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("input shape mismatch: got batch {got_batch} dim {got_dim}, expected batch {expected_batch} dim {expected_dim}")]
    ShapeMismatch {
        got_batch: usize,
        got_dim: usize,
        expected_batch: usize,
        expected_dim: usize,
    },
    #[error("device error: {0}")]
    Device(String),
}

/// Mean image subtracted from every network input, stored as packed f32 RGB
/// at its native resolution; the evaluate stage resizes it once at startup.
#[derive(Debug, Clone)]
pub struct MeanImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
}

impl MeanImage {
    pub fn constant(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize * 3],
        }
    }
}

/// The network's mutable input tensor, shaped `{batch, 3, dim, dim}` with
/// per-frame slots the preprocessing streams copy into.
#[derive(Debug, Clone)]
pub struct NetInput {
    batch: usize,
    dim: usize,
    data: Vec<f32>,
}

impl NetInput {
    pub fn new(batch: usize, dim: usize) -> Self {
        Self {
            batch,
            dim,
            data: vec![0.0; batch * 3 * dim * dim],
        }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn resize_batch(&mut self, batch: usize) {
        if batch != self.batch {
            self.batch = batch;
            self.data.resize(batch * 3 * self.dim * self.dim, 0.0);
        }
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut [f32] {
        let stride = 3 * self.dim * self.dim;
        &mut self.data[index * stride..(index + 1) * stride]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// A network bound to one GPU.
pub trait NetworkEvaluator: Send {
    /// Side length of the square network input.
    fn input_size(&self) -> usize;

    fn mean_image(&self) -> &MeanImage;

    /// Reshape the network input for a new batch size. Called when a work
    /// item's tail batch is shorter than the configured batch size.
    fn set_batch_size(&mut self, batch: usize) -> Result<(), NetError>;

    fn forward(&mut self, input: &NetInput) -> Result<(), NetError>;
}

/// Creates one evaluator per GPU at engine startup.
pub trait EvaluatorFactory: Send + Sync {
    fn create(&self, gpu: GpuId) -> Result<Box<dyn NetworkEvaluator>, NetError>;
}

/// Recorded forward pass: which GPU ran it and at what batch size.
pub type ForwardLog = Arc<Mutex<Vec<(GpuId, usize)>>>;

/// Reference evaluator: validates shapes, records every forward pass, and
/// optionally sleeps to emulate a slow network.
pub struct CountingEvaluator {
    gpu: GpuId,
    dim: usize,
    batch: usize,
    mean: MeanImage,
    delay: Duration,
    log: ForwardLog,
}

impl NetworkEvaluator for CountingEvaluator {
    fn input_size(&self) -> usize {
        self.dim
    }

    fn mean_image(&self) -> &MeanImage {
        &self.mean
    }

    fn set_batch_size(&mut self, batch: usize) -> Result<(), NetError> {
        self.batch = batch;
        Ok(())
    }

    fn forward(&mut self, input: &NetInput) -> Result<(), NetError> {
        if input.batch() != self.batch || input.dim() != self.dim {
            return Err(NetError::ShapeMismatch {
                got_batch: input.batch(),
                got_dim: input.dim(),
                expected_batch: self.batch,
                expected_dim: self.dim,
            });
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Ok(mut log) = self.log.lock() {
            log.push((self.gpu, input.batch()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct CountingEvaluatorFactory {
    dim: usize,
    batch: usize,
    delay: Duration,
    log: ForwardLog,
}

impl CountingEvaluatorFactory {
    pub fn new(dim: usize, batch: usize) -> Self {
        Self {
            dim,
            batch,
            delay: Duration::ZERO,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Emulate a slow network; every forward pass sleeps this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn forward_log(&self) -> ForwardLog {
        self.log.clone()
    }
}

impl EvaluatorFactory for CountingEvaluatorFactory {
    fn create(&self, gpu: GpuId) -> Result<Box<dyn NetworkEvaluator>, NetError> {
        Ok(Box::new(CountingEvaluator {
            gpu,
            dim: self.dim,
            batch: self.batch,
            mean: MeanImage::constant(self.dim as u32, self.dim as u32, 0.0),
            delay: self.delay,
            log: self.log.clone(),
        }))
    }
}
