#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod buffer;
pub mod image;
pub mod preprocess;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame slot {slot} out of range for buffer of {slots} slots")]
    SlotOutOfRange { slot: usize, slots: usize },
    #[error("{what} size mismatch: got {got}, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("invalid dimensions {width}x{height}")]
    BadDimensions { width: u32, height: u32 },
}
