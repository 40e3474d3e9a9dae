use std::time::{Duration, Instant};

use thiserror::Error;

use framescan_core::types::{GpuId, PixelFormat, VideoMetadata};
use framescan_storage::{RandomReadFile, StorageError};

use crate::sidecar::KeyframeIndex;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("seek past end: frame {frame} of {frames}")]
    SeekOutOfRange { frame: u32, frames: u32 },
    #[error("decode past end of stream at frame {frame}")]
    EndOfStream { frame: u32 },
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One decoded frame. Planes carry their own linesize because decoders may
/// pad rows; consumers must copy row by row.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub planes: Vec<FramePlane>,
}

#[derive(Debug, Clone)]
pub struct FramePlane {
    pub data: Vec<u8>,
    pub linesize: usize,
}

/// Cumulative clocks a decoder keeps for the load worker's exit report.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderTimes {
    pub io: Duration,
    pub decode: Duration,
}

pub trait VideoDecoder: Send {
    fn seek(&mut self, frame: u32) -> Result<(), DecodeError>;
    fn decode(&mut self) -> Result<Frame, DecodeError>;
    fn times(&self) -> DecoderTimes {
        DecoderTimes::default()
    }
}

/// Opens a decoder over a random-read handle plus the keyframe index. Load
/// workers call this once per work item; `gpu` is the device a hardware
/// decoder should bind, ignored by software decoders.
pub trait DecoderFactory: Send + Sync {
    fn open(
        &self,
        file: Box<dyn RandomReadFile>,
        keyframes: &KeyframeIndex,
        metadata: &VideoMetadata,
        gpu: Option<GpuId>,
    ) -> Result<Box<dyn VideoDecoder>, DecodeError>;
}

/// Reference decoder for processed streams stored as packed frames of the
/// metadata's pixel format. Seeks are exact byte offsets, so the keyframe
/// index is only sanity-checked here; codec-backed factories use it to pick
/// the closest seek point.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFrameDecoderFactory;

impl DecoderFactory for RawFrameDecoderFactory {
    fn open(
        &self,
        file: Box<dyn RandomReadFile>,
        keyframes: &KeyframeIndex,
        metadata: &VideoMetadata,
        _gpu: Option<GpuId>,
    ) -> Result<Box<dyn VideoDecoder>, DecodeError> {
        if keyframes.positions.len() != keyframes.timestamps.len() {
            return Err(DecodeError::Corrupt(format!(
                "keyframe index length mismatch: {} positions, {} timestamps",
                keyframes.positions.len(),
                keyframes.timestamps.len()
            )));
        }
        let frame_size = metadata.frame_size() as u64;
        let expected = frame_size * u64::from(metadata.frames);
        if file.size() < expected {
            return Err(DecodeError::Corrupt(format!(
                "stream holds {} bytes, {expected} required for {} frames",
                file.size(),
                metadata.frames
            )));
        }
        Ok(Box::new(RawFrameDecoder {
            file,
            metadata: *metadata,
            next_frame: 0,
            scratch: vec![0u8; metadata.frame_size()],
            times: DecoderTimes::default(),
        }))
    }
}

struct RawFrameDecoder {
    file: Box<dyn RandomReadFile>,
    metadata: VideoMetadata,
    next_frame: u32,
    scratch: Vec<u8>,
    times: DecoderTimes,
}

impl VideoDecoder for RawFrameDecoder {
    fn seek(&mut self, frame: u32) -> Result<(), DecodeError> {
        if frame > self.metadata.frames {
            return Err(DecodeError::SeekOutOfRange {
                frame,
                frames: self.metadata.frames,
            });
        }
        self.next_frame = frame;
        Ok(())
    }

    fn decode(&mut self) -> Result<Frame, DecodeError> {
        if self.next_frame >= self.metadata.frames {
            return Err(DecodeError::EndOfStream {
                frame: self.next_frame,
            });
        }
        let frame_size = self.metadata.frame_size() as u64;
        let offset = frame_size * u64::from(self.next_frame);

        let io_start = Instant::now();
        self.file.read_at(offset, &mut self.scratch)?;
        self.times.io += io_start.elapsed();

        let unpack_start = Instant::now();
        let frame = unpack_planes(&self.metadata, &self.scratch);
        self.times.decode += unpack_start.elapsed();

        self.next_frame += 1;
        Ok(frame)
    }

    fn times(&self) -> DecoderTimes {
        self.times
    }
}

fn unpack_planes(metadata: &VideoMetadata, packed: &[u8]) -> Frame {
    let w = metadata.width as usize;
    let h = metadata.height as usize;
    let planes = match metadata.pixel_format {
        PixelFormat::Nv12 => {
            let luma = w * h;
            let chroma_rows = h.div_ceil(2);
            let chroma_linesize = 2 * w.div_ceil(2);
            vec![
                FramePlane {
                    data: packed[..luma].to_vec(),
                    linesize: w,
                },
                FramePlane {
                    data: packed[luma..luma + chroma_linesize * chroma_rows].to_vec(),
                    linesize: chroma_linesize,
                },
            ]
        }
        PixelFormat::Rgb24 => vec![FramePlane {
            data: packed.to_vec(),
            linesize: w * 3,
        }],
    };
    Frame {
        width: metadata.width,
        height: metadata.height,
        pixel_format: metadata.pixel_format,
        planes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framescan_storage::posix::PosixStorage;
    use framescan_storage::StorageBackend;
    use std::path::PathBuf;

    fn temp_root(test_name: &str) -> anyhow::Result<PathBuf> {
        let mut root = std::env::temp_dir();
        root.push(format!(
            "framescan-video-{test_name}-{}-{}",
            std::process::id(),
            framescan_observe::time::unix_time_ms()
        ));
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }

    fn nv12_meta(frames: u32) -> VideoMetadata {
        VideoMetadata {
            width: 4,
            height: 2,
            frames,
            pixel_format: PixelFormat::Nv12,
        }
    }

    fn write_stream(root: &std::path::Path, meta: &VideoMetadata) -> anyhow::Result<()> {
        let frame_size = meta.frame_size();
        let mut bytes = Vec::new();
        for frame in 0..meta.frames {
            bytes.extend(std::iter::repeat_n(frame as u8, frame_size));
        }
        std::fs::write(root.join("stream.bin"), bytes)?;
        Ok(())
    }

    #[test]
    fn seek_then_decode_reads_the_right_frames() -> anyhow::Result<()> {
        let root = temp_root("seek")?;
        let meta = nv12_meta(5);
        write_stream(&root, &meta)?;

        let storage = PosixStorage::new(&root);
        let file = storage.open_random_read(std::path::Path::new("stream.bin"))?;
        let mut decoder =
            RawFrameDecoderFactory.open(file, &KeyframeIndex::default(), &meta, None)?;

        decoder.seek(3)?;
        let frame = decoder.decode()?;
        assert_eq!(frame.planes.len(), 2);
        assert!(frame.planes[0].data.iter().all(|b| *b == 3));

        let frame = decoder.decode()?;
        assert!(frame.planes[0].data.iter().all(|b| *b == 4));

        let err = decoder.decode().unwrap_err();
        assert!(matches!(err, DecodeError::EndOfStream { frame: 5 }));
        Ok(())
    }

    #[test]
    fn undersized_stream_is_rejected_at_open() -> anyhow::Result<()> {
        let root = temp_root("short")?;
        let meta = nv12_meta(4);
        write_stream(&root, &nv12_meta(2))?;

        let storage = PosixStorage::new(&root);
        let file = storage.open_random_read(std::path::Path::new("stream.bin"))?;
        let err = RawFrameDecoderFactory
            .open(file, &KeyframeIndex::default(), &meta, None)
            .err()
            .ok_or_else(|| anyhow::anyhow!("open must fail"))?;
        assert!(matches!(err, DecodeError::Corrupt(_)));
        Ok(())
    }

    #[test]
    fn decoder_accumulates_io_time() -> anyhow::Result<()> {
        let root = temp_root("times")?;
        let meta = nv12_meta(2);
        write_stream(&root, &meta)?;

        let storage = PosixStorage::new(&root);
        let file = storage.open_random_read(std::path::Path::new("stream.bin"))?;
        let mut decoder =
            RawFrameDecoderFactory.open(file, &KeyframeIndex::default(), &meta, None)?;
        decoder.decode()?;
        let times = decoder.times();
        assert!(times.io > Duration::ZERO);
        Ok(())
    }
}
