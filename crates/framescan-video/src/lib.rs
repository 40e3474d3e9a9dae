#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod decode;
pub mod preprocess;
pub mod sidecar;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Storage(#[from] framescan_storage::StorageError),
    #[error(transparent)]
    Sidecar(#[from] sidecar::SidecarError),
    #[error(transparent)]
    Decode(#[from] decode::DecodeError),
    #[error(transparent)]
    Preprocess(#[from] preprocess::PreprocessError),
}
