//! Frame source backed by OpenCV's `VideoCapture`.

use image::RgbImage;
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_POS_FRAMES};
use std::path::Path;

use super::FrameSource;
use crate::error::{MediaError, MediaResult};

pub struct OpenCvFrameSource {
    capture: VideoCapture,
    fps: f64,
    frame_count: Option<u64>,
    position: u64,
}

impl OpenCvFrameSource {
    pub fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| MediaError::InvalidVideo(format!("non UTF-8 path: {}", path.display())))?;

        let capture = VideoCapture::from_file(path_str, CAP_ANY)
            .map_err(|e| MediaError::InvalidVideo(format!("Failed to open video: {}", e)))?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(MediaError::InvalidVideo(format!(
                "Cannot open video: {}",
                path.display()
            )));
        }

        let fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MediaError::InvalidVideo(format!(
                "{} has invalid frame rate {}",
                path.display(),
                fps
            )));
        }
        let frame_count = capture
            .get(CAP_PROP_FRAME_COUNT)
            .ok()
            .filter(|n| *n > 0.0)
            .map(|n| n as u64);

        Ok(Self {
            capture,
            fps,
            frame_count,
            position: 0,
        })
    }
}

impl FrameSource for OpenCvFrameSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, frame_index: u64) -> MediaResult<()> {
        if frame_index == self.position {
            return Ok(());
        }
        self.capture
            .set(CAP_PROP_POS_FRAMES, frame_index as f64)
            .map_err(|e| MediaError::decode(frame_index, format!("seek failed: {}", e)))?;
        self.position = frame_index;
        Ok(())
    }

    fn read_next(&mut self) -> MediaResult<Option<RgbImage>> {
        let index = self.position;
        let mut bgr = Mat::default();
        let ok = self
            .capture
            .read(&mut bgr)
            .map_err(|e| MediaError::decode(index, e.to_string()))?;
        if !ok || bgr.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        opencv::imgproc::cvt_color_def(&bgr, &mut rgb, opencv::imgproc::COLOR_BGR2RGB)
            .map_err(|e| MediaError::decode(index, format!("color conversion failed: {}", e)))?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb
            .data_bytes()
            .map_err(|e| MediaError::decode(index, format!("failed to get frame data: {}", e)))?
            .to_vec();
        let frame = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| MediaError::decode(index, "frame buffer size mismatch"))?;

        self.position += 1;
        Ok(Some(frame))
    }
}
