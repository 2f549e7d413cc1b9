//! Pixel rectangles used for search and crop regions.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned rectangle `(x1, y1, x2, y2)` with exclusive right/bottom edges.
///
/// Serialized as a 4-element array, the way detection profiles store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "[u32; 4]")]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    /// Create a region, checking that coordinates are ordered.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, String> {
        if x1 >= x2 || y1 >= y2 {
            return Err(format!(
                "region ({}, {}, {}, {}) must satisfy x1 < x2 and y1 < y2",
                x1, y1, x2, y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Intersect with a `width x height` frame. `None` when nothing overlaps.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let x2 = self.x2.min(width);
        let y2 = self.y2.min(height);
        if self.x1 >= x2 || self.y1 >= y2 {
            return None;
        }
        Some(Region {
            x1: self.x1,
            y1: self.y1,
            x2,
            y2,
        })
    }

    /// Copy the part of `frame` covered by this region.
    ///
    /// Regions extending past the frame edge are clipped.
    pub fn crop(&self, frame: &RgbImage) -> Option<RgbImage> {
        let r = self.clamp_to(frame.width(), frame.height())?;
        Some(imageops::crop_imm(frame, r.x1, r.y1, r.width(), r.height()).to_image())
    }
}

impl TryFrom<Vec<i64>> for Region {
    type Error = String;

    fn try_from(values: Vec<i64>) -> Result<Self, Self::Error> {
        if values.len() != 4 {
            return Err(format!(
                "region must have exactly 4 coordinates, got {}",
                values.len()
            ));
        }
        let mut coords = [0u32; 4];
        for (slot, v) in coords.iter_mut().zip(&values) {
            *slot = u32::try_from(*v)
                .map_err(|_| format!("region coordinate out of range: {}", v))?;
        }
        Region::new(coords[0], coords[1], coords[2], coords[3])
    }
}

impl From<Region> for [u32; 4] {
    fn from(r: Region) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}
