//! Frame acquisition: decoded frames, frame sources, and the capture buffer.
//!
//! A `FrameSource` supplies RGBA frames at its native resolution. The tracking
//! loop advances the source every tick, and when the detector is free draws the
//! current frame into its `CaptureBuffer` at render dimensions and hands the
//! pixels to the detector channel.

pub mod buffer;
pub mod sequence;

use anyhow::{Result, bail};

use crate::config::FeedSpec;
use crate::error::SetupError;

pub use buffer::CaptureBuffer;
pub use sequence::{ImageSequenceSource, StillFrameSource};

/// Samples per pixel (RGBA).
pub const CHANNELS: usize = 4;

/// A decoded RGBA frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA samples, `width * height * CHANNELS` bytes.
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            bail!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// RGBA value at (x, y). Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.data[offset..offset + CHANNELS]);
        out
    }
}

/// Native dimensions reported by a source once its metadata is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceGeometry {
    pub native_width: u32,
    pub native_height: u32,
    /// Aspect ratio reported by the source, when it differs from the pixel ratio
    /// (e.g. anamorphic video). `None` means `native_width / native_height`.
    pub aspect_ratio: Option<f64>,
}

impl SourceGeometry {
    pub fn new(native_width: u32, native_height: u32) -> Self {
        Self {
            native_width,
            native_height,
            aspect_ratio: None,
        }
    }

    /// Effective aspect ratio; not validated.
    pub fn ratio(&self) -> f64 {
        self.aspect_ratio
            .unwrap_or(self.native_width as f64 / self.native_height as f64)
    }
}

/// A live camera or file-backed video feed.
pub trait FrameSource: Send {
    /// Native geometry, fixed for the lifetime of the source.
    fn geometry(&self) -> SourceGeometry;

    /// Step to the frame for this tick. Called once per tick whether or not the
    /// frame is sent, so playback keeps the source's pace while the detector is
    /// busy. Must not block.
    fn advance(&mut self) {}

    /// The frame to present now, or `None` if nothing is available.
    fn current_frame(&self) -> Option<&Frame>;
}

/// Open the feed named in the configuration.
pub fn open_feed(feed: &FeedSpec) -> Result<Box<dyn FrameSource>, SetupError> {
    match feed {
        FeedSpec::Camera => Err(SetupError::FeedUnavailable(
            "no camera capture backend is available; configure a file feed".to_string(),
        )),
        FeedSpec::File(path) => {
            let source = ImageSequenceSource::open(path, true)
                .map_err(|e| SetupError::FeedUnavailable(format!("{e:#}")))?;
            Ok(Box::new(source))
        }
    }
}
