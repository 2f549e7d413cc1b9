//! Reference patterns (positive and decoy templates).

use image::RgbImage;
use std::path::Path;
use tracing::debug;

use crate::correlation::{MatchScore, PreparedTemplate};
use crate::error::{MediaError, MediaResult};
use crate::preprocess::{self, EdgeMap};

/// A named, preprocessed template. Immutable once built.
#[derive(Debug, Clone)]
pub struct ReferencePattern {
    name: String,
    edges: EdgeMap,
    template: PreparedTemplate,
}

impl ReferencePattern {
    /// Build from an RGB image; runs the same preprocessing as frames.
    pub fn from_image(name: impl Into<String>, image: &RgbImage) -> Self {
        Self::from_edges(name, preprocess::prepare(image))
    }

    /// Build from an already computed edge map.
    pub fn from_edges(name: impl Into<String>, edges: EdgeMap) -> Self {
        let template = PreparedTemplate::new(&edges);
        Self {
            name: name.into(),
            edges,
            template,
        }
    }

    /// Load an image file. The file stem becomes the pattern name.
    pub fn load(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::config(format!(
                "template image not found: {}",
                path.display()
            )));
        }

        let image = image::open(path)
            .map_err(|e| {
                MediaError::config(format!("cannot read template {}: {}", path.display(), e))
            })?
            .to_rgb8();

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let pattern = Self::from_image(name, &image);
        debug!(
            pattern = %pattern.name,
            width = pattern.edges.width(),
            height = pattern.edges.height(),
            "Loaded reference pattern"
        );
        Ok(pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edges(&self) -> &EdgeMap {
        &self.edges
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.edges.dimensions()
    }

    /// Fail unless this pattern fits inside a `width x height` region.
    pub fn check_fits(&self, width: u32, height: u32) -> MediaResult<()> {
        if self.template.fits_in(width, height) {
            return Ok(());
        }
        let (pw, ph) = self.dimensions();
        Err(MediaError::PatternTooLarge {
            name: self.name.clone(),
            pattern_width: pw,
            pattern_height: ph,
            region_width: width,
            region_height: height,
        })
    }

    /// Best score of this pattern over an edge map.
    pub fn best_match(&self, edges: &EdgeMap) -> MediaResult<MatchScore> {
        self.template
            .best_match(edges)
            .ok_or_else(|| match self.check_fits(edges.width(), edges.height()) {
                Err(e) => e,
                Ok(()) => MediaError::internal("correlation produced no placement"),
            })
    }
}
