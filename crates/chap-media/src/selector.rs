//! Picks the frame handed to character recognition.
//!
//! The round-start caption animates in, so the accepted frame itself is often
//! a poor picture of the name plates. Two later frames are considered
//! (`index + alt` and `index + default`, `alt < default`) and the one with
//! more contrast in the crop region wins, with a bias toward the default.

use image::RgbImage;
use tracing::debug;

use crate::error::MediaResult;
use crate::frame_source::{CursorGuard, FrameSource};
use crate::params::DetectionParameters;
use crate::preprocess::gray_std_dev;
use crate::region::Region;

/// Which frame the selector used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetChoice {
    /// `index + recognize_frame_offset_alt`
    Alternate,
    /// `index + recognize_frame_offset`
    Default,
    /// Neither candidate decoded; the accepted frame is used.
    Accepted,
}

/// Frame chosen for recognition.
#[derive(Debug, Clone)]
pub struct SelectedFrame {
    pub frame: RgbImage,
    pub frame_index: u64,
    pub choice: OffsetChoice,
}

#[derive(Debug, Clone)]
pub struct RecognitionFrameSelector {
    crop_region: Region,
    default_offset: u64,
    alt_offset: u64,
    threshold: f64,
}

impl RecognitionFrameSelector {
    pub fn new(crop_region: Region, default_offset: u64, alt_offset: u64, threshold: f64) -> Self {
        Self {
            crop_region,
            default_offset,
            alt_offset,
            threshold,
        }
    }

    pub fn from_params(params: &DetectionParameters) -> Self {
        Self::new(
            params.crop_region,
            params.recognize_frame_offset,
            params.recognize_frame_offset_alt,
            params.recognize_frame_offset_threshold,
        )
    }

    /// Decide between the candidates given their contrast.
    ///
    /// `None` means the candidate could not be decoded.
    pub fn choose(q_alt: Option<f64>, q_default: Option<f64>, threshold: f64) -> OffsetChoice {
        match (q_alt, q_default) {
            (Some(alt), Some(default)) if alt - default >= threshold => OffsetChoice::Alternate,
            (Some(_), Some(_)) => OffsetChoice::Default,
            (Some(_), None) => OffsetChoice::Alternate,
            (None, Some(_)) => OffsetChoice::Default,
            (None, None) => OffsetChoice::Accepted,
        }
    }

    /// Select the recognition frame for a detection accepted at `index`.
    ///
    /// `accepted_crop` is the crop of the accepted frame, used when neither
    /// candidate decodes. The source cursor is left where it was.
    pub fn select<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        index: u64,
        accepted_crop: RgbImage,
    ) -> MediaResult<SelectedFrame> {
        let mut guard = CursorGuard::new(source);

        let default = self.fetch(&mut *guard, index + self.default_offset);
        let alt = if self.alt_offset == self.default_offset {
            None
        } else {
            self.fetch(&mut *guard, index + self.alt_offset)
        };
        guard.restore()?;

        let choice = Self::choose(
            alt.as_ref().map(|(_, q)| *q),
            default.as_ref().map(|(_, q)| *q),
            self.threshold,
        );
        debug!(
            frame_index = index,
            quality_alt = alt.as_ref().map(|(_, q)| *q),
            quality_default = default.as_ref().map(|(_, q)| *q),
            choice = ?choice,
            "Selected recognition frame"
        );

        let selected = match (choice, alt, default) {
            (OffsetChoice::Alternate, Some((frame, _)), _) => SelectedFrame {
                frame,
                frame_index: index + self.alt_offset,
                choice,
            },
            (OffsetChoice::Default, _, Some((frame, _))) => SelectedFrame {
                frame,
                frame_index: index + self.default_offset,
                choice,
            },
            _ => SelectedFrame {
                frame: accepted_crop,
                frame_index: index,
                choice: OffsetChoice::Accepted,
            },
        };
        Ok(selected)
    }

    /// Crop and score one candidate. Decode errors and end of stream yield `None`.
    fn fetch<S: FrameSource + ?Sized>(&self, source: &mut S, frame_index: u64) -> Option<(RgbImage, f64)> {
        match source.read_at(frame_index) {
            Ok(Some(frame)) => {
                let crop = self.crop_region.crop(&frame)?;
                let quality = gray_std_dev(&crop);
                Some((crop, quality))
            }
            Ok(None) => None,
            Err(e) => {
                debug!(frame_index, "Recognition candidate failed to decode: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::MemoryFrameSource;
    use image::Rgb;

    /// Frame whose crop area has contrast proportional to `level`.
    fn frame_with_contrast(level: u8) -> RgbImage {
        let mut img = RgbImage::from_pixel(40, 20, Rgb([100, 100, 100]));
        for y in 0..20 {
            for x in (0..40).step_by(2) {
                let v = 100u8.saturating_add(level);
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        img
    }

    fn selector() -> RecognitionFrameSelector {
        RecognitionFrameSelector::new(Region::new(0, 0, 40, 20).unwrap(), 6, 4, 5.0)
    }

    #[test]
    fn test_choose_rules() {
        use OffsetChoice::*;
        assert_eq!(RecognitionFrameSelector::choose(Some(30.0), Some(20.0), 5.0), Alternate);
        assert_eq!(RecognitionFrameSelector::choose(Some(25.0), Some(20.0), 5.0), Alternate);
        assert_eq!(RecognitionFrameSelector::choose(Some(24.9), Some(20.0), 5.0), Default);
        assert_eq!(RecognitionFrameSelector::choose(Some(10.0), Some(20.0), 5.0), Default);
        assert_eq!(RecognitionFrameSelector::choose(Some(1.0), None, 5.0), Alternate);
        assert_eq!(RecognitionFrameSelector::choose(None, Some(1.0), 5.0), Default);
        assert_eq!(RecognitionFrameSelector::choose(None, None, 5.0), Accepted);
    }

    #[test]
    fn test_high_contrast_alternate_wins() {
        let mut frames = vec![frame_with_contrast(0); 12];
        frames[4] = frame_with_contrast(80);
        frames[6] = frame_with_contrast(10);
        let mut source = MemoryFrameSource::new(frames, 30.0);
        source.seek(1).unwrap();

        let crop = frame_with_contrast(0);
        let selected = selector().select(&mut source, 0, crop).unwrap();
        assert_eq!(selected.choice, OffsetChoice::Alternate);
        assert_eq!(selected.frame_index, 4);
        assert_eq!(source.position(), 1);
    }

    #[test]
    fn test_default_wins_without_enough_gain() {
        let mut frames = vec![frame_with_contrast(0); 12];
        frames[4] = frame_with_contrast(24);
        frames[6] = frame_with_contrast(20);
        let mut source = MemoryFrameSource::new(frames, 30.0);

        let selected = selector()
            .select(&mut source, 0, frame_with_contrast(0))
            .unwrap();
        assert_eq!(selected.choice, OffsetChoice::Default);
        assert_eq!(selected.frame_index, 6);
    }

    #[test]
    fn test_falls_back_when_candidates_missing() {
        // Stream ends before index + 4.
        let frames = vec![frame_with_contrast(0); 3];
        let mut source = MemoryFrameSource::new(frames, 30.0);
        let accepted = frame_with_contrast(33);

        let selected = selector().select(&mut source, 0, accepted.clone()).unwrap();
        assert_eq!(selected.choice, OffsetChoice::Accepted);
        assert_eq!(selected.frame_index, 0);
        assert_eq!(selected.frame, accepted);
    }

    #[test]
    fn test_decode_error_uses_other_candidate() {
        let frames = vec![frame_with_contrast(50); 12];
        let mut source = MemoryFrameSource::new(frames, 30.0).with_decode_error_at(6);
        let selected = selector()
            .select(&mut source, 0, frame_with_contrast(0))
            .unwrap();
        assert_eq!(selected.choice, OffsetChoice::Alternate);
        assert_eq!(selected.frame_index, 4);
    }

    #[test]
    fn test_equal_offsets_collapse() {
        let frames = vec![frame_with_contrast(50); 12];
        let mut source = MemoryFrameSource::new(frames, 30.0);
        let selector = RecognitionFrameSelector::new(Region::new(0, 0, 40, 20).unwrap(), 5, 5, 0.0);
        let selected = selector.select(&mut source, 0, frame_with_contrast(0)).unwrap();
        assert_eq!(selected.choice, OffsetChoice::Default);
        assert_eq!(selected.frame_index, 5);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let frames: Vec<RgbImage> = (0..12).map(|i| frame_with_contrast(i * 7)).collect();
        let mut a = MemoryFrameSource::new(frames.clone(), 30.0);
        let mut b = MemoryFrameSource::new(frames, 30.0);

        let first = selector().select(&mut a, 2, frame_with_contrast(0)).unwrap();
        let second = selector().select(&mut b, 2, frame_with_contrast(0)).unwrap();
        assert_eq!(first.frame_index, second.frame_index);
        assert_eq!(first.frame, second.frame);
    }
}
