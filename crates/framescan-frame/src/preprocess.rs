use framescan_core::types::PixelFormat;

use crate::image;
use crate::FrameError;

/// Per-GPU preprocessing state for the evaluate stage: a ring of scratch
/// tensors (one set per stream) in the four working forms — RGBA, RGB,
/// float RGB, normalized float — plus the mean image, resized once at
/// construction and reused for every frame.
pub struct FramePreprocessor {
    dim: usize,
    frame_width: usize,
    frame_height: usize,
    format: PixelFormat,
    mean: Vec<f32>,
    scratch: Vec<Scratch>,
}

struct Scratch {
    rgba: Vec<u8>,
    rgb: Vec<u8>,
    resized: Vec<u8>,
    float_rgb: Vec<f32>,
    normed: Vec<f32>,
}

impl FramePreprocessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dim: usize,
        streams: usize,
        frame_width: u32,
        frame_height: u32,
        format: PixelFormat,
        mean_pixels: &[f32],
        mean_width: u32,
        mean_height: u32,
    ) -> Result<Self, FrameError> {
        if dim == 0 || streams == 0 {
            return Err(FrameError::BadDimensions {
                width: dim as u32,
                height: streams as u32,
            });
        }
        if frame_width == 0 || frame_height == 0 {
            return Err(FrameError::BadDimensions {
                width: frame_width,
                height: frame_height,
            });
        }
        let mean_len = mean_width as usize * mean_height as usize * 3;
        if mean_pixels.len() != mean_len {
            return Err(FrameError::SizeMismatch {
                what: "mean image",
                got: mean_pixels.len(),
                expected: mean_len,
            });
        }

        let mut mean = vec![0.0f32; dim * dim * 3];
        image::resize_bilinear_rgb_f32(
            mean_pixels,
            mean_width as usize,
            mean_height as usize,
            &mut mean,
            dim,
            dim,
        );

        let w = frame_width as usize;
        let h = frame_height as usize;
        let scratch = (0..streams)
            .map(|_| Scratch {
                rgba: vec![0u8; w * h * 4],
                rgb: vec![0u8; w * h * 3],
                resized: vec![0u8; dim * dim * 3],
                float_rgb: vec![0.0f32; dim * dim * 3],
                normed: vec![0.0f32; dim * dim * 3],
            })
            .collect();

        Ok(Self {
            dim,
            frame_width: w,
            frame_height: h,
            format,
            mean,
            scratch,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.dim
    }

    /// Run the preprocessing chain for one packed frame on the given stream's
    /// scratch set and write the normalized result into the network input
    /// slot: color-convert, resize to `(dim, dim)`, convert to float,
    /// subtract the mean.
    pub fn prepare_into(
        &mut self,
        stream: usize,
        packed_frame: &[u8],
        out_slot: &mut [f32],
    ) -> Result<(), FrameError> {
        let expected = self
            .format
            .frame_size(self.frame_width as u32, self.frame_height as u32);
        if packed_frame.len() != expected {
            return Err(FrameError::SizeMismatch {
                what: "frame",
                got: packed_frame.len(),
                expected,
            });
        }
        if out_slot.len() != self.dim * self.dim * 3 {
            return Err(FrameError::SizeMismatch {
                what: "network input slot",
                got: out_slot.len(),
                expected: self.dim * self.dim * 3,
            });
        }

        let scratch_len = self.scratch.len();
        let s = &mut self.scratch[stream % scratch_len];
        let (w, h, dim) = (self.frame_width, self.frame_height, self.dim);

        let rgb: &[u8] = match self.format {
            PixelFormat::Nv12 => {
                let luma = w * h;
                let uv_linesize = 2 * w.div_ceil(2);
                image::nv12_to_rgba(
                    &packed_frame[..luma],
                    w,
                    &packed_frame[luma..],
                    uv_linesize,
                    w,
                    h,
                    &mut s.rgba,
                );
                image::rgba_to_rgb(&s.rgba, &mut s.rgb);
                &s.rgb
            }
            PixelFormat::Rgb24 => packed_frame,
        };

        image::resize_bilinear_rgb(rgb, w, h, &mut s.resized, dim, dim);
        image::rgb_to_f32(&s.resized, &mut s.float_rgb);
        image::subtract_mean(&s.float_rgb, &self.mean, &mut s.normed);
        out_slot.copy_from_slice(&s.normed);
        Ok(())
    }

    /// Barrier between the per-frame enqueue loop and the forward pass. The
    /// host reference executes eagerly, so this only exists as the hook a
    /// stream-backed implementation completes its async work in.
    pub fn synchronize(&mut self) -> Result<(), FrameError> {
        Ok(())
    }
}
