use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordinal of a GPU within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GpuId(pub usize);

impl std::fmt::Display for GpuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar luma followed by interleaved half-resolution chroma.
    Nv12,
    /// Packed 8-bit RGB.
    Rgb24,
}

impl PixelFormat {
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        match self {
            PixelFormat::Nv12 => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
            PixelFormat::Rgb24 => w * h * 3,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            PixelFormat::Nv12 => 0,
            PixelFormat::Rgb24 => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PixelFormat::Nv12),
            1 => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// Per-video record read from the metadata sidecar. Immutable after load and
/// shared read-only by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub pixel_format: PixelFormat,
}

impl VideoMetadata {
    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.width == 0 || self.height == 0 {
            return Err(MetadataError::EmptyDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("video dimensions must be non-zero (got {width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },
}

/// A contiguous half-open range of frames `[start_frame, end_frame)` from one
/// video, sized to at most one buffer's worth of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub video_index: usize,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl WorkItem {
    pub fn len(&self) -> u32 {
        self.end_frame.saturating_sub(self.start_frame)
    }

    pub fn is_empty(&self) -> bool {
        self.start_frame >= self.end_frame
    }

    pub fn contains(&self, frame: u32) -> bool {
        self.start_frame <= frame && frame < self.end_frame
    }
}
