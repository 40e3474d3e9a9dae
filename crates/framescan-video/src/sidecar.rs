//! Binary sidecar files written by the preprocessor and consumed by the
//! load stage: a per-video metadata record and the keyframe index used to
//! seek the processed stream. Both are little-endian with a 4-byte magic and
//! a u16 version so format drift fails loudly.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use framescan_core::types::{PixelFormat, VideoMetadata};
use framescan_storage::StorageBackend;

use crate::VideoError;

pub const METADATA_MAGIC: [u8; 4] = *b"FSMD";
pub const IFRAME_MAGIC: [u8; 4] = *b"FSIF";
pub const SIDECAR_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("bad sidecar magic (expected {expected:?})")]
    BadMagic { expected: [u8; 4] },
    #[error("unsupported sidecar version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown pixel format tag {0}")]
    UnknownPixelFormat(u8),
    #[error("keyframe index truncated: declared {declared} entries, read {read}")]
    Truncated { declared: u32, read: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte positions and timestamps of the keyframes in one processed video.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyframeIndex {
    pub positions: Vec<u64>,
    pub timestamps: Vec<i64>,
}

impl KeyframeIndex {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

pub fn write_video_metadata(
    w: &mut impl Write,
    meta: &VideoMetadata,
) -> Result<(), SidecarError> {
    w.write_all(&METADATA_MAGIC)?;
    w.write_u16::<LittleEndian>(SIDECAR_VERSION)?;
    w.write_u32::<LittleEndian>(meta.width)?;
    w.write_u32::<LittleEndian>(meta.height)?;
    w.write_u32::<LittleEndian>(meta.frames)?;
    w.write_u8(meta.pixel_format.tag())?;
    Ok(())
}

pub fn read_video_metadata(r: &mut impl Read) -> Result<VideoMetadata, SidecarError> {
    expect_magic(r, METADATA_MAGIC)?;
    expect_version(r)?;
    let width = r.read_u32::<LittleEndian>()?;
    let height = r.read_u32::<LittleEndian>()?;
    let frames = r.read_u32::<LittleEndian>()?;
    let tag = r.read_u8()?;
    let pixel_format =
        PixelFormat::from_tag(tag).ok_or(SidecarError::UnknownPixelFormat(tag))?;
    Ok(VideoMetadata {
        width,
        height,
        frames,
        pixel_format,
    })
}

pub fn write_keyframe_index(
    w: &mut impl Write,
    index: &KeyframeIndex,
) -> Result<(), SidecarError> {
    debug_assert_eq!(index.positions.len(), index.timestamps.len());
    w.write_all(&IFRAME_MAGIC)?;
    w.write_u16::<LittleEndian>(SIDECAR_VERSION)?;
    w.write_u32::<LittleEndian>(index.positions.len() as u32)?;
    for pos in &index.positions {
        w.write_u64::<LittleEndian>(*pos)?;
    }
    for ts in &index.timestamps {
        w.write_i64::<LittleEndian>(*ts)?;
    }
    Ok(())
}

pub fn read_keyframe_index(r: &mut impl Read) -> Result<KeyframeIndex, SidecarError> {
    expect_magic(r, IFRAME_MAGIC)?;
    expect_version(r)?;
    let count = r.read_u32::<LittleEndian>()?;
    let mut positions = Vec::with_capacity(count as usize);
    for read in 0..count {
        positions.push(r.read_u64::<LittleEndian>().map_err(|_| {
            SidecarError::Truncated {
                declared: count,
                read: read as usize,
            }
        })?);
    }
    let mut timestamps = Vec::with_capacity(count as usize);
    for read in 0..count {
        timestamps.push(r.read_i64::<LittleEndian>().map_err(|_| {
            SidecarError::Truncated {
                declared: count,
                read: read as usize,
            }
        })?);
    }
    Ok(KeyframeIndex {
        positions,
        timestamps,
    })
}

/// Read and decode one video's metadata sidecar through the storage backend.
pub fn load_video_metadata(
    storage: &dyn StorageBackend,
    path: &Path,
) -> Result<VideoMetadata, VideoError> {
    let mut file = storage.open_random_read(path)?;
    let bytes = file.read_all()?;
    Ok(read_video_metadata(&mut Cursor::new(bytes))?)
}

/// Read and decode one video's keyframe index through the storage backend.
pub fn load_keyframe_index(
    storage: &dyn StorageBackend,
    path: &Path,
) -> Result<KeyframeIndex, VideoError> {
    let mut file = storage.open_random_read(path)?;
    let bytes = file.read_all()?;
    Ok(read_keyframe_index(&mut Cursor::new(bytes))?)
}

fn expect_magic(r: &mut impl Read, expected: [u8; 4]) -> Result<(), SidecarError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != expected {
        return Err(SidecarError::BadMagic { expected });
    }
    Ok(())
}

fn expect_version(r: &mut impl Read) -> Result<(), SidecarError> {
    let version = r.read_u16::<LittleEndian>()?;
    if version != SIDECAR_VERSION {
        return Err(SidecarError::UnsupportedVersion(version));
    }
    Ok(())
}
