#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod posix;
#[cfg(feature = "s3")]
pub mod s3;

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("read past end of {path}: offset {offset} + len {len} > size {size}")]
    OutOfRange {
        path: String,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("unsupported storage root: {0}")]
    UnsupportedRoot(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub exists: bool,
    pub size: u64,
}

/// Handle for positioned reads from one stored object.
pub trait RandomReadFile: Send {
    fn size(&self) -> u64;

    /// Fill `buf` from `offset`. Short objects are an error, not a short read.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    fn read_all(&mut self) -> Result<Vec<u8>, StorageError> {
        let size = usize::try_from(self.size())
            .map_err(|_| StorageError::Runtime("object too large for memory".to_string()))?;
        let mut buf = vec![0u8; size];
        self.read_at(0, &mut buf)?;
        Ok(buf)
    }
}

/// Random-read storage. Backends are not assumed thread-safe: each worker
/// connects its own instance from a shared [`StorageConfig`].
pub trait StorageBackend: Send {
    fn open_random_read(&self, path: &Path) -> Result<Box<dyn RandomReadFile>, StorageError>;
    fn get_file_info(&self, path: &Path) -> Result<FileInfo, StorageError>;
}

/// Where a node reads videos and sidecars from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Posix { root: PathBuf },
    #[cfg(feature = "s3")]
    S3 { bucket: String, prefix: String },
}

impl StorageConfig {
    /// Parse a storage root: `s3://bucket/prefix` selects the S3 backend,
    /// anything else is a filesystem root.
    pub fn from_root(root: &str) -> Result<Self, StorageError> {
        let trimmed = root.trim();
        if trimmed.is_empty() {
            return Err(StorageError::UnsupportedRoot(root.to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("s3://") {
            #[cfg(feature = "s3")]
            {
                let (bucket, prefix) = s3::parse_bucket_prefix(rest)?;
                return Ok(StorageConfig::S3 { bucket, prefix });
            }
            #[cfg(not(feature = "s3"))]
            {
                let _ = rest;
                return Err(StorageError::UnsupportedRoot(format!(
                    "s3://... requires feature 's3' (got {root:?})"
                )));
            }
        }

        Ok(StorageConfig::Posix {
            root: PathBuf::from(trimmed),
        })
    }

    pub fn connect(&self) -> Result<Box<dyn StorageBackend>, StorageError> {
        match self {
            StorageConfig::Posix { root } => Ok(Box::new(posix::PosixStorage::new(root.clone()))),
            #[cfg(feature = "s3")]
            StorageConfig::S3 { bucket, prefix } => Ok(Box::new(s3::S3Storage::from_env(
                bucket.clone(),
                prefix.clone(),
            )?)),
        }
    }
}
