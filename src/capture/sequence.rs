//! File-backed and in-memory frame sources.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use super::{Frame, FrameSource, SourceGeometry};

/// Extensions decoded by `ImageSequenceSource`.
const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A source that always presents the same frame.
pub struct StillFrameSource {
    frame: Frame,
    aspect_ratio: Option<f64>,
}

impl StillFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            aspect_ratio: None,
        }
    }

    /// Report an aspect ratio different from the pixel ratio.
    pub fn with_aspect_ratio(mut self, aspect_ratio: f64) -> Self {
        self.aspect_ratio = Some(aspect_ratio);
        self
    }
}

impl FrameSource for StillFrameSource {
    fn geometry(&self) -> SourceGeometry {
        SourceGeometry {
            native_width: self.frame.width,
            native_height: self.frame.height,
            aspect_ratio: self.aspect_ratio,
        }
    }

    fn current_frame(&self) -> Option<&Frame> {
        Some(&self.frame)
    }
}

/// Plays back an image file or a directory of frames, one frame per tick.
///
/// Every frame is decoded in `open`, so playback never touches the disk. All
/// frames must share the dimensions of the first decodable one; frames that
/// fail to decode or differ in size are dropped from the sequence with a warning.
pub struct ImageSequenceSource {
    frames: Vec<Frame>,
    geometry: SourceGeometry,
    /// Index of the frame on show; `None` before the first `advance`.
    cursor: Option<usize>,
    looping: bool,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(path: P, looping: bool) -> Result<Self> {
        let path = path.as_ref();
        let paths = if path.is_dir() {
            list_frames(path)?
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            bail!("feed {:?} does not exist", path);
        };

        if paths.is_empty() {
            bail!("no frames found in {:?}", path);
        }

        let mut frames: Vec<Frame> = Vec::with_capacity(paths.len());
        for frame_path in &paths {
            let frame = match load_frame(frame_path) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping {:?}: {:#}", frame_path, e);
                    continue;
                }
            };
            if let Some(first) = frames.first() {
                if (frame.width, frame.height) != (first.width, first.height) {
                    warn!(
                        "Skipping {:?}: {}x{} does not match feed size {}x{}",
                        frame_path, frame.width, frame.height, first.width, first.height
                    );
                    continue;
                }
            }
            frames.push(frame);
        }

        let Some(first) = frames.first() else {
            bail!("no decodable frames in {:?}", path);
        };
        let geometry = SourceGeometry::new(first.width, first.height);
        debug!(
            frames = frames.len(),
            skipped = paths.len() - frames.len(),
            width = first.width,
            height = first.height,
            "opened image sequence"
        );

        Ok(Self {
            frames,
            geometry,
            cursor: None,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether a non-looping sequence has played every frame.
    pub fn is_finished(&self) -> bool {
        !self.looping && self.cursor == Some(self.frames.len())
    }
}

impl FrameSource for ImageSequenceSource {
    fn geometry(&self) -> SourceGeometry {
        self.geometry
    }

    fn advance(&mut self) {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(if next < self.frames.len() {
            next
        } else if self.looping {
            0
        } else {
            self.frames.len()
        });
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.cursor.and_then(|c| self.frames.get(c))
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("Failed to decode {:?}", path))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Frame::new(width, height, image.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32, value: u8) {
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba([value, 0, 0, 255]));
        image.save(path).unwrap();
    }

    fn red(source: &ImageSequenceSource) -> Option<u8> {
        source.current_frame().map(|f| f.pixel(0, 0)[0])
    }

    #[test]
    fn test_still_source_reports_geometry() {
        let mut source = StillFrameSource::new(Frame::filled(640, 480, [0, 0, 0, 255]));
        assert_eq!(source.geometry(), SourceGeometry::new(640, 480));
        source.advance();
        assert!(source.current_frame().is_some());

        let source = source.with_aspect_ratio(2.0);
        assert_eq!(source.geometry().aspect_ratio, Some(2.0));
    }

    #[test]
    fn test_sequence_plays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("frame_002.png"), 4, 2, 20);
        write_png(&dir.path().join("frame_001.png"), 4, 2, 10);
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), false).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.geometry(), SourceGeometry::new(4, 2));
        assert_eq!(red(&source), None);

        source.advance();
        assert_eq!(red(&source), Some(10));
        // Reading does not move playback.
        assert_eq!(red(&source), Some(10));
        source.advance();
        assert_eq!(red(&source), Some(20));
        source.advance();
        assert_eq!(red(&source), None);
        assert!(source.is_finished());
        source.advance();
        assert_eq!(red(&source), None);
    }

    #[test]
    fn test_sequence_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 3, 3, 7);
        write_png(&dir.path().join("b.png"), 3, 3, 8);

        let mut source = ImageSequenceSource::open(dir.path(), true).unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            source.advance();
            seen.push(red(&source).unwrap());
        }
        assert_eq!(seen, vec![7, 8, 7, 8, 7]);
        assert!(!source.is_finished());
    }

    #[test]
    fn test_playback_does_not_read_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 3, 3, 1);
        write_png(&dir.path().join("b.png"), 3, 3, 2);

        let mut source = ImageSequenceSource::open(dir.path(), false).unwrap();
        drop(dir);

        source.advance();
        assert_eq!(red(&source), Some(1));
        source.advance();
        assert_eq!(red(&source), Some(2));
    }

    #[test]
    fn test_mismatched_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 4, 4, 1);
        write_png(&dir.path().join("b.png"), 8, 8, 2);
        write_png(&dir.path().join("c.png"), 4, 4, 3);

        let mut source = ImageSequenceSource::open(dir.path(), false).unwrap();
        assert_eq!(source.len(), 2);
        source.advance();
        assert_eq!(red(&source), Some(1));
        source.advance();
        assert_eq!(red(&source), Some(3));
    }

    #[test]
    fn test_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path(), true).is_err());
    }

    #[test]
    fn test_undecodable_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), "not a png").unwrap();
        assert!(ImageSequenceSource::open(dir.path(), true).is_err());
    }
}
