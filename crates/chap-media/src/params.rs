//! Detection profiles.
//!
//! Profiles live in a JSON file shaped like:
//!
//! ```json
//! { "profiles": { "production": { "threshold": 0.32, ... } } }
//! ```
//!
//! The `DETECTION_PROFILE` environment variable overrides the profile name
//! requested by the caller. Any problem with the file or the selected
//! profile is a [`MediaError::Config`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};
use crate::region::Region;

/// Environment variable overriding the profile name.
pub const PROFILE_ENV: &str = "DETECTION_PROFILE";

/// Profile used when nothing else is configured.
pub const DEFAULT_PROFILE: &str = "production";

fn default_recognize_frame_offset() -> u64 {
    6
}

fn default_recognize_frame_offset_alt() -> u64 {
    4
}

fn default_recognize_frame_offset_threshold() -> f64 {
    5.0
}

/// Tuning for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParameters {
    /// Name of the profile these values came from
    #[serde(default)]
    pub profile: String,

    /// Positive reference image
    pub template_path: PathBuf,

    /// Decoy reference images
    #[serde(default)]
    pub reject_templates: Vec<PathBuf>,

    /// Minimum positive score to consider a frame
    pub threshold: f64,

    /// Decoy score at or above which a frame counts as a decoy
    pub reject_threshold: f64,

    /// Minimum spacing between accepted detections
    pub min_interval_sec: f64,

    /// Sample every Nth frame
    pub frame_interval: u64,

    /// Frames inspected after a candidate
    pub post_check_frames: u64,

    /// Decoy frames in the lookahead window that reject a candidate
    pub post_check_reject_limit: u64,

    pub search_region: Region,
    pub crop_region: Region,

    #[serde(default = "default_recognize_frame_offset")]
    pub recognize_frame_offset: u64,

    #[serde(default = "default_recognize_frame_offset_alt")]
    pub recognize_frame_offset_alt: u64,

    /// Required contrast gain for the alternate offset to win
    #[serde(default = "default_recognize_frame_offset_threshold")]
    pub recognize_frame_offset_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    profiles: BTreeMap<String, serde_json::Value>,
}

impl DetectionParameters {
    /// Load `profile` (or `$DETECTION_PROFILE`) from the profile file at `path`.
    pub fn load(path: impl AsRef<Path>, profile: &str) -> MediaResult<Self> {
        let profile = resolve_profile_name(profile);
        let profiles = read_profiles(path.as_ref())?;

        let raw = profiles.get(&profile).ok_or_else(|| {
            let available: Vec<&str> = profiles.keys().map(String::as_str).collect();
            MediaError::config(format!(
                "profile '{}' not found. Available profiles: {}",
                profile,
                available.join(", ")
            ))
        })?;

        let mut params: DetectionParameters = serde_json::from_value(raw.clone())
            .map_err(|e| MediaError::config(format!("profile '{}': {}", profile, e)))?;
        params.profile = profile;
        params.validate()?;

        info!(profile = %params.profile, "Loaded detection parameters");
        Ok(params)
    }

    /// Check value ranges and cross-field constraints.
    pub fn validate(&self) -> MediaResult<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(MediaError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )))
            }
        };
        unit("threshold", self.threshold)?;
        unit("reject_threshold", self.reject_threshold)?;

        if !self.min_interval_sec.is_finite() || self.min_interval_sec < 0.0 {
            return Err(MediaError::config(format!(
                "min_interval_sec must be non-negative, got {}",
                self.min_interval_sec
            )));
        }

        if self.frame_interval < 1 {
            return Err(MediaError::config("frame_interval must be at least 1"));
        }

        if !self.recognize_frame_offset_threshold.is_finite()
            || self.recognize_frame_offset_threshold < 0.0
        {
            return Err(MediaError::config(format!(
                "recognize_frame_offset_threshold must be non-negative, got {}",
                self.recognize_frame_offset_threshold
            )));
        }

        if self.recognize_frame_offset_alt > self.recognize_frame_offset {
            return Err(MediaError::config(format!(
                "recognize_frame_offset_alt ({}) must not exceed recognize_frame_offset ({})",
                self.recognize_frame_offset_alt, self.recognize_frame_offset
            )));
        }

        if self.lookahead_enabled() && self.post_check_reject_limit == 0 {
            warn!(
                profile = %self.profile,
                "post_check_reject_limit is 0 with lookahead enabled; every candidate will be rejected"
            );
        }

        Ok(())
    }

    /// Lookahead runs only with decoys configured and a non-empty window.
    pub fn lookahead_enabled(&self) -> bool {
        !self.reject_templates.is_empty() && self.post_check_frames > 0
    }

    /// Log every parameter at info level.
    pub fn log_params(&self) {
        info!(
            profile = %self.profile,
            template_path = %self.template_path.display(),
            reject_templates = self.reject_templates.len(),
            threshold = self.threshold,
            reject_threshold = self.reject_threshold,
            min_interval_sec = self.min_interval_sec,
            frame_interval = self.frame_interval,
            post_check_frames = self.post_check_frames,
            post_check_reject_limit = self.post_check_reject_limit,
            search_region = %self.search_region,
            crop_region = %self.crop_region,
            recognize_frame_offset = self.recognize_frame_offset,
            recognize_frame_offset_alt = self.recognize_frame_offset_alt,
            recognize_frame_offset_threshold = self.recognize_frame_offset_threshold,
            "Detection parameters"
        );
    }
}

/// Names of every profile in the file at `path`.
pub fn available_profiles(path: impl AsRef<Path>) -> MediaResult<Vec<String>> {
    Ok(read_profiles(path.as_ref())?.into_keys().collect())
}

/// `$DETECTION_PROFILE` when set and non-empty, else `requested`.
pub fn resolve_profile_name(requested: &str) -> String {
    std::env::var(PROFILE_ENV)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| requested.to_string())
}

fn read_profiles(path: &Path) -> MediaResult<BTreeMap<String, serde_json::Value>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MediaError::config(format!(
            "cannot read detection config {}: {}",
            path.display(),
            e
        ))
    })?;

    let file: ProfileFile = serde_json::from_str(&content).map_err(|e| {
        MediaError::config(format!("invalid detection config {}: {}", path.display(), e))
    })?;

    Ok(file.profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const PROFILES: &str = r#"{
        "profiles": {
            "production": {
                "template_path": "templates/round1.png",
                "reject_templates": ["templates/round2.png", "templates/final.png"],
                "threshold": 0.32,
                "reject_threshold": 0.35,
                "min_interval_sec": 2.0,
                "post_check_frames": 10,
                "post_check_reject_limit": 2,
                "search_region": [575, 333, 1500, 800],
                "crop_region": [339, 886, 1748, 980],
                "frame_interval": 2
            },
            "test": {
                "template_path": "templates/round1.png",
                "reject_templates": [],
                "threshold": 0.5,
                "reject_threshold": 0.35,
                "min_interval_sec": 1.0,
                "post_check_frames": 0,
                "post_check_reject_limit": 2,
                "search_region": [0, 0, 100, 100],
                "crop_region": [0, 0, 50, 50],
                "frame_interval": 1,
                "recognize_frame_offset": 3,
                "recognize_frame_offset_alt": 3
            },
            "broken": {
                "template_path": "t.png",
                "threshold": 1.5,
                "reject_threshold": 0.35,
                "min_interval_sec": 2.0,
                "post_check_frames": 10,
                "post_check_reject_limit": 2,
                "search_region": [0, 0, 100, 100],
                "crop_region": [0, 0, 50, 50],
                "frame_interval": 2
            }
        }
    }"#;

    fn write_profiles(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_production_profile() {
        std::env::remove_var(PROFILE_ENV);
        let file = write_profiles(PROFILES);
        let params = DetectionParameters::load(file.path(), "production").unwrap();

        assert_eq!(params.profile, "production");
        assert_eq!(params.threshold, 0.32);
        assert_eq!(params.reject_templates.len(), 2);
        assert_eq!(params.search_region, Region::new(575, 333, 1500, 800).unwrap());
        assert_eq!(params.recognize_frame_offset, 6);
        assert_eq!(params.recognize_frame_offset_alt, 4);
        assert_eq!(params.recognize_frame_offset_threshold, 5.0);
        assert!(params.lookahead_enabled());
    }

    #[test]
    #[serial]
    fn test_env_overrides_profile_name() {
        let file = write_profiles(PROFILES);
        std::env::set_var(PROFILE_ENV, "test");
        let result = DetectionParameters::load(file.path(), "production");
        std::env::remove_var(PROFILE_ENV);

        let params = result.unwrap();
        assert_eq!(params.profile, "test");
        assert!(!params.lookahead_enabled());
    }

    #[test]
    #[serial]
    fn test_unknown_profile_lists_available() {
        std::env::remove_var(PROFILE_ENV);
        let file = write_profiles(PROFILES);
        let err = DetectionParameters::load(file.path(), "legacy").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("legacy"));
        assert!(msg.contains("broken, production, test"));
        assert!(err.is_config_error());
    }

    #[test]
    #[serial]
    fn test_out_of_range_threshold_is_rejected() {
        std::env::remove_var(PROFILE_ENV);
        let file = write_profiles(PROFILES);
        let err = DetectionParameters::load(file.path(), "broken").unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    #[serial]
    fn test_missing_file_is_config_error() {
        std::env::remove_var(PROFILE_ENV);
        let err = DetectionParameters::load("/nonexistent/detection.json", "production").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    #[serial]
    fn test_available_profiles() {
        let file = write_profiles(PROFILES);
        let names = available_profiles(file.path()).unwrap();
        assert_eq!(names, vec!["broken", "production", "test"]);
    }

    #[test]
    #[serial]
    fn test_validate_offsets() {
        std::env::remove_var(PROFILE_ENV);
        let file = write_profiles(PROFILES);
        let mut params = DetectionParameters::load(file.path(), "production").unwrap();

        params.recognize_frame_offset_alt = 7;
        assert!(params.validate().is_err());

        params.recognize_frame_offset_alt = 6;
        assert!(params.validate().is_ok());

        params.frame_interval = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_bad_region_is_parse_error() {
        std::env::remove_var(PROFILE_ENV);
        let bad = PROFILES.replace("[575, 333, 1500, 800]", "[575, 333, 1500]");
        let file = write_profiles(&bad);
        let err = DetectionParameters::load(file.path(), "production").unwrap_err();
        assert!(err.to_string().contains("4 coordinates"));
    }

    #[test]
    #[serial]
    fn test_shipped_profiles_are_valid() {
        std::env::remove_var(PROFILE_ENV);
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/detection_params.json");
        for name in available_profiles(&path).unwrap() {
            let params = DetectionParameters::load(&path, &name).unwrap();
            assert_eq!(params.profile, name);
        }
        let production = DetectionParameters::load(&path, DEFAULT_PROFILE).unwrap();
        assert_eq!(production.crop_region, Region::new(339, 886, 1748, 980).unwrap());
    }
}
