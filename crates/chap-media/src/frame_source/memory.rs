use image::RgbImage;
use std::fmt;
use std::sync::Arc;

use super::FrameSource;
use crate::error::{MediaError, MediaResult};

type FrameFn = dyn Fn(u64) -> RgbImage + Send + Sync;

#[derive(Clone)]
enum Frames {
    Owned(Vec<RgbImage>),
    Generated { count: u64, render: Arc<FrameFn> },
}

/// Frames held in memory or rendered on demand.
///
/// Used for replaying captured clips and for synthetic video in tests. A
/// decode failure can be injected at a given index.
#[derive(Clone)]
pub struct MemoryFrameSource {
    frames: Frames,
    fps: f64,
    position: u64,
    decode_error_at: Option<u64>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames: Frames::Owned(frames),
            fps,
            position: 0,
            decode_error_at: None,
        }
    }

    /// A `count`-frame stream whose frames are produced by `render(index)`.
    pub fn from_fn<F>(count: u64, fps: f64, render: F) -> Self
    where
        F: Fn(u64) -> RgbImage + Send + Sync + 'static,
    {
        Self {
            frames: Frames::Generated {
                count,
                render: Arc::new(render),
            },
            fps,
            position: 0,
            decode_error_at: None,
        }
    }

    /// Make reading frame `frame_index` fail with a decode error.
    pub fn with_decode_error_at(mut self, frame_index: u64) -> Self {
        self.decode_error_at = Some(frame_index);
        self
    }

    pub fn len(&self) -> u64 {
        match &self.frames {
            Frames::Owned(frames) => frames.len() as u64,
            Frames::Generated { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn frame(&self, index: u64) -> Option<RgbImage> {
        match &self.frames {
            Frames::Owned(frames) => usize::try_from(index)
                .ok()
                .and_then(|i| frames.get(i))
                .cloned(),
            Frames::Generated { count, render } => (index < *count).then(|| render(index)),
        }
    }
}

impl fmt::Debug for MemoryFrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFrameSource")
            .field("frames", &self.len())
            .field("fps", &self.fps)
            .field("position", &self.position)
            .field("decode_error_at", &self.decode_error_at)
            .finish()
    }
}

impl FrameSource for MemoryFrameSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.len())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, frame_index: u64) -> MediaResult<()> {
        self.position = frame_index;
        Ok(())
    }

    fn read_next(&mut self) -> MediaResult<Option<RgbImage>> {
        let index = self.position;
        if self.decode_error_at == Some(index) {
            return Err(MediaError::decode(index, "injected decode failure"));
        }

        let frame = self.frame(index);
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_sequential_reads_and_eof() {
        let frames = vec![
            RgbImage::from_pixel(2, 2, Rgb([1, 1, 1])),
            RgbImage::from_pixel(2, 2, Rgb([2, 2, 2])),
        ];
        let mut source = MemoryFrameSource::new(frames, 30.0);
        assert_eq!(source.frame_count(), Some(2));
        assert_eq!(source.read_next().unwrap().unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(source.position(), 1);
        assert_eq!(source.read_next().unwrap().unwrap().get_pixel(0, 0)[0], 2);
        assert!(source.read_next().unwrap().is_none());
        assert_eq!(source.position(), 2);
    }

    #[test]
    fn test_injected_decode_error() {
        let frames = vec![RgbImage::new(2, 2); 4];
        let mut source = MemoryFrameSource::new(frames, 30.0).with_decode_error_at(2);
        source.seek(2).unwrap();
        let err = source.read_next().unwrap_err();
        assert!(matches!(err, MediaError::Decode { frame_index: 2, .. }));
    }

    #[test]
    fn test_generated_frames() {
        let mut source =
            MemoryFrameSource::from_fn(3, 10.0, |i| RgbImage::from_pixel(1, 1, Rgb([i as u8, 0, 0])));
        assert_eq!(source.read_at(2).unwrap().unwrap().get_pixel(0, 0)[0], 2);
        assert!(source.read_next().unwrap().is_none());
        assert!(source.read_at(7).unwrap().is_none());
    }
}
