//! Sequential, seekable access to decoded frames.
//!
//! Frames are 3-channel RGB, row-major ([`RgbImage`]). A source has a read
//! cursor: [`FrameSource::position`] is the index of the frame the next
//! [`FrameSource::read_next`] returns. Opening is the implementation's
//! constructor; closing is `Drop`.
//!
//! Implementations:
//! - [`FfmpegFrameSource`]: ffmpeg rawvideo pipe (default)
//! - [`MemoryFrameSource`]: pre-decoded frames (tests, replay)
//! - `OpenCvFrameSource`: OpenCV `VideoCapture` (feature `opencv`)

#[cfg(feature = "opencv")]
mod capture;
mod ffmpeg;
mod memory;

#[cfg(feature = "opencv")]
pub use capture::OpenCvFrameSource;
pub use ffmpeg::{FfmpegFrameSource, DEFAULT_HISTORY};
pub use memory::MemoryFrameSource;

use image::RgbImage;
use std::ops::{Deref, DerefMut};
use tracing::warn;

use crate::error::MediaResult;

/// A decoded video stream with a movable read cursor.
pub trait FrameSource: Send {
    /// Frames per second.
    fn frame_rate(&self) -> f64;

    /// Total frames, when the container reports it.
    fn frame_count(&self) -> Option<u64>;

    /// Index of the frame the next `read_next` returns.
    fn position(&self) -> u64;

    /// Move the cursor. Seeking past the end is allowed; reads then return `None`.
    fn seek(&mut self, frame_index: u64) -> MediaResult<()>;

    /// Decode the frame at the cursor and advance. `None` at end of stream.
    fn read_next(&mut self) -> MediaResult<Option<RgbImage>>;

    /// Seek then read.
    fn read_at(&mut self, frame_index: u64) -> MediaResult<Option<RgbImage>> {
        self.seek(frame_index)?;
        self.read_next()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn frame_count(&self) -> Option<u64> {
        (**self).frame_count()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn seek(&mut self, frame_index: u64) -> MediaResult<()> {
        (**self).seek(frame_index)
    }

    fn read_next(&mut self) -> MediaResult<Option<RgbImage>> {
        (**self).read_next()
    }
}

/// Borrows a source and puts its cursor back when done.
///
/// Call [`CursorGuard::restore`] on the normal path to observe seek errors.
/// If the guard is dropped instead (early return, `?`, panic) the cursor is
/// restored on drop and a failure is only logged.
pub struct CursorGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    saved: u64,
    armed: bool,
}

impl<'a, S: FrameSource + ?Sized> CursorGuard<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        let saved = source.position();
        Self {
            source,
            saved,
            armed: true,
        }
    }

    /// Position the cursor will be restored to.
    pub fn saved_position(&self) -> u64 {
        self.saved
    }

    /// Restore the cursor now and report the result.
    pub fn restore(mut self) -> MediaResult<()> {
        self.armed = false;
        self.source.seek(self.saved)
    }
}

impl<S: FrameSource + ?Sized> Deref for CursorGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &*self.source
    }
}

impl<S: FrameSource + ?Sized> DerefMut for CursorGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut *self.source
    }
}

impl<S: FrameSource + ?Sized> Drop for CursorGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.source.seek(self.saved) {
            warn!(position = self.saved, "Failed to restore frame cursor: {}", e);
        }
    }
}
