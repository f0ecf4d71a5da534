//! Frame buffers and preprocessing.
//!
//! - `Frame`: RGB8 image handed over by the frame source, already rotated and
//!   format-normalized. Rotation metadata is carried for consumers only.
//! - `Preprocessor`: turns a frame into the model's input tensor.
//! - `ResizeNormalize`: default preprocessor (bilinear resize, optional
//!   contrast/brightness lift, `/255` normalization, NHWC layout).
//!
//! Working buffers are reserved with `try_reserve_exact` so allocation
//! failure surfaces as `InferenceError::ResourceExhausted` instead of aborting.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

use crate::detect::backend::{InferenceError, Stage, Tensor};

/// Default cap on frame size. Larger frames are not processed.
pub const MAX_FRAME_BYTES: usize = 20 * 1024 * 1024;

/// Bytes per RGB8 pixel.
pub const CHANNELS: usize = 3;

/// RGB8 frame, row-major, tightly packed.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation the source applied, in degrees.
    pub rotation_degrees: u16,
}

/// Why a frame cannot be processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDefect {
    Empty,
    ZeroDimension,
    LengthMismatch { expected: usize, actual: usize },
    TooLarge { bytes: usize, limit: usize },
}

impl std::fmt::Display for FrameDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameDefect::Empty => write!(f, "empty pixel buffer"),
            FrameDefect::ZeroDimension => write!(f, "zero frame dimension"),
            FrameDefect::LengthMismatch { expected, actual } => {
                write!(f, "expected {} RGB bytes, received {}", expected, actual)
            }
            FrameDefect::TooLarge { bytes, limit } => {
                write!(f, "frame of {} bytes exceeds limit of {}", bytes, limit)
            }
        }
    }
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
            rotation_degrees: 0,
        }
    }

    pub fn with_rotation(mut self, degrees: u16) -> Self {
        self.rotation_degrees = degrees % 360;
        self
    }

    /// Solid-color frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Check that the buffer is usable for inference.
    pub fn check(&self, max_bytes: usize) -> Result<(), FrameDefect> {
        if self.pixels.is_empty() {
            return Err(FrameDefect::Empty);
        }
        if self.width == 0 || self.height == 0 {
            return Err(FrameDefect::ZeroDimension);
        }
        if self.pixels.len() > max_bytes {
            return Err(FrameDefect::TooLarge {
                bytes: self.pixels.len(),
                limit: max_bytes,
            });
        }
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(CHANNELS));
        match expected {
            Some(expected) if expected == self.pixels.len() => Ok(()),
            Some(expected) => Err(FrameDefect::LengthMismatch {
                expected,
                actual: self.pixels.len(),
            }),
            None => Err(FrameDefect::TooLarge {
                bytes: usize::MAX,
                limit: max_bytes,
            }),
        }
    }
}

/// What the pipeline asks of the preprocessor for one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreprocessRequest {
    /// Square model input edge.
    pub input_size: u32,
    /// Intermediate square resample edge for auxiliary scales.
    pub resample_size: Option<u32>,
    /// Apply the contrast/brightness lift.
    pub enhance: bool,
}

/// Frame to input-tensor conversion.
pub trait Preprocessor: Send {
    fn prepare(&self, frame: &Frame, request: PreprocessRequest) -> Result<Tensor, InferenceError>;
}

/// Bilinear resize + optional enhancement + `/255` into NHWC `[1, S, S, 3]`.
#[derive(Clone, Copy, Debug)]
pub struct ResizeNormalize {
    pub contrast: f32,
    pub brightness: f32,
}

impl Default for ResizeNormalize {
    fn default() -> Self {
        Self {
            contrast: 1.1,
            brightness: 10.0,
        }
    }
}

impl Preprocessor for ResizeNormalize {
    fn prepare(&self, frame: &Frame, request: PreprocessRequest) -> Result<Tensor, InferenceError> {
        frame
            .check(usize::MAX)
            .map_err(|defect| InferenceError::InvalidInput(defect.to_string()))?;
        let size = request.input_size;
        if size == 0 {
            return Err(InferenceError::InvalidInput("input size is zero".into()));
        }

        let mut pixels = match request.resample_size {
            Some(intermediate) if intermediate > 0 => {
                let scaled = resize_rgb(
                    frame.pixels(),
                    frame.width,
                    frame.height,
                    intermediate,
                    intermediate,
                )?;
                resize_rgb(&scaled, intermediate, intermediate, size, size)?
            }
            _ => resize_rgb(frame.pixels(), frame.width, frame.height, size, size)?,
        };

        if request.enhance {
            for value in pixels.iter_mut() {
                *value = (*value as f32 * self.contrast + self.brightness).clamp(0.0, 255.0) as u8;
            }
        }

        let mut data = try_buffer::<f32>(pixels.len())?;
        data.extend(pixels.iter().map(|&v| v as f32 / 255.0));
        Tensor::new(vec![1, size as usize, size as usize, CHANNELS], data)
    }
}

/// Bilinear (triangle filter) RGB8 resize.
///
/// The output size is reserved up front so an allocation failure is reported
/// as `ResourceExhausted` before the resampler allocates.
pub fn resize_rgb(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> Result<Vec<u8>, InferenceError> {
    let source = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(src_w, src_h, src)
        .filter(|_| src_w > 0 && src_h > 0)
        .ok_or_else(|| {
            InferenceError::InvalidInput(format!(
                "source buffer does not hold {}x{} RGB pixels",
                src_w, src_h
            ))
        })?;
    let len = (dst_w as usize)
        .checked_mul(dst_h as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| InferenceError::resource_exhausted(Stage::Preprocess, "resize overflow"))?;
    let mut out = try_buffer::<u8>(len)?;
    if (src_w, src_h) == (dst_w, dst_h) {
        out.extend_from_slice(&src[..len]);
        return Ok(out);
    }
    // the resampler allocates its own output, the reservation only checks headroom
    drop(out);
    Ok(imageops::resize(&source, dst_w, dst_h, FilterType::Triangle).into_raw())
}

fn try_buffer<T>(len: usize) -> Result<Vec<T>, InferenceError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        InferenceError::resource_exhausted(
            Stage::Preprocess,
            format!("cannot reserve {} elements: {}", len, e),
        )
    })?;
    Ok(buf)
}
