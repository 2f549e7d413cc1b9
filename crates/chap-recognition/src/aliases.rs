//! Character name normalization.
//!
//! The alias file maps every spelling the recognizer may return (English,
//! katakana, abbreviations) to one canonical name:
//!
//! ```json
//! { "characters": { "ryu": { "canonical": "Ryu", "aliases": ["リュウ", "RYU"] } } }
//! ```
//!
//! Matching is case-insensitive on trimmed input. With a table loaded, names
//! it does not know become [`UNKNOWN_CHARACTER`]; without one, names pass
//! through unchanged.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chap_models::UNKNOWN_CHARACTER;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{RecognitionError, RecognitionResult};

#[derive(Debug, Deserialize)]
struct AliasFile {
    characters: BTreeMap<String, CharacterEntry>,
}

#[derive(Debug, Deserialize)]
struct CharacterEntry {
    canonical: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Lookup table from alias to canonical character name.
#[derive(Debug, Clone, Default)]
pub struct CharacterAliases {
    map: HashMap<String, String>,
    loaded: bool,
}

impl CharacterAliases {
    /// A table that passes every name through.
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> RecognitionResult<Self> {
        let file: AliasFile = serde_json::from_str(json)
            .map_err(|e| RecognitionError::config(format!("Invalid alias file: {}", e)))?;

        let mut map = HashMap::new();
        for entry in file.characters.into_values() {
            let canonical = entry.canonical.trim().to_string();
            if canonical.is_empty() {
                return Err(RecognitionError::config("Alias entry with empty canonical name"));
            }
            map.insert(canonical.to_lowercase(), canonical.clone());
            for alias in entry.aliases {
                map.insert(alias.trim().to_lowercase(), canonical.clone());
            }
        }
        Ok(Self { map, loaded: true })
    }

    pub fn load(path: impl AsRef<Path>) -> RecognitionResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RecognitionError::config(format!("Cannot read alias file {}: {}", path.display(), e))
        })?;
        let aliases = Self::from_json(&json)?;
        info!(path = %path.display(), aliases = aliases.len(), "Loaded character aliases");
        Ok(aliases)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Canonical name for `raw`.
    pub fn normalize(&self, raw: &str) -> String {
        let key = raw.trim();
        if key.is_empty() {
            return UNKNOWN_CHARACTER.to_string();
        }
        if !self.loaded {
            return key.to_string();
        }
        match self.map.get(&key.to_lowercase()) {
            Some(canonical) => canonical.clone(),
            None => {
                debug!(raw = key, "Unrecognized character name");
                UNKNOWN_CHARACTER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "characters": {
            "ryu": {"canonical": "Ryu", "aliases": ["リュウ", "RYU"]},
            "chunli": {"canonical": "Chun-Li", "aliases": ["春麗", "チュンリー", "Chun Li"]}
        }
    }"#;

    #[test]
    fn test_aliases_normalize_case_insensitively() {
        let aliases = CharacterAliases::from_json(SAMPLE).unwrap();
        assert_eq!(aliases.normalize("リュウ"), "Ryu");
        assert_eq!(aliases.normalize("ryu"), "Ryu");
        assert_eq!(aliases.normalize("  chun li "), "Chun-Li");
        assert_eq!(aliases.normalize("Chun-Li"), "Chun-Li");
    }

    #[test]
    fn test_unknown_names_map_to_sentinel() {
        let aliases = CharacterAliases::from_json(SAMPLE).unwrap();
        assert_eq!(aliases.normalize("Akuma"), UNKNOWN_CHARACTER);
        assert_eq!(aliases.normalize(""), UNKNOWN_CHARACTER);
    }

    #[test]
    fn test_passthrough_keeps_names() {
        let aliases = CharacterAliases::passthrough();
        assert_eq!(aliases.normalize(" Akuma "), "Akuma");
        assert_eq!(aliases.normalize(""), UNKNOWN_CHARACTER);
    }

    #[test]
    fn test_invalid_files_are_config_errors() {
        assert!(matches!(
            CharacterAliases::from_json("{}"),
            Err(RecognitionError::Config(_))
        ));
        assert!(CharacterAliases::from_json(
            r#"{"characters": {"x": {"canonical": " ", "aliases": []}}}"#
        )
        .is_err());
        assert!(CharacterAliases::load("/nonexistent/aliases.json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let aliases = CharacterAliases::load(&path).unwrap();
        assert_eq!(aliases.len(), 6);
        assert_eq!(aliases.normalize("春麗"), "Chun-Li");
    }

    #[test]
    fn test_shipped_alias_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/character_aliases.json");
        let aliases = CharacterAliases::load(path).unwrap();
        assert_eq!(aliases.normalize("豪鬼"), "Akuma");
        assert_eq!(aliases.normalize("ベガ"), "M.Bison");
        assert_eq!(aliases.normalize("Vega"), "M.Bison");
    }
}
