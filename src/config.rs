//
// config.rs
// Dicom-WSI-rs
//
// Loads the YAML conversion configuration and exposes typed accessors for the keys the converter understands.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::ConfigurationError;

pub const KEY_WSI_FILE: &str = "WSIFile";
pub const KEY_TILE_SIZE: &str = "TileSize";
pub const KEY_COMPRESSION: &str = "Compression";
pub const KEY_JPEG_QUALITY: &str = "JpegQuality";
pub const KEY_MAX_LEVELS: &str = "MaxLevels";
pub const KEY_INCLUDE_ASSOCIATED: &str = "IncludeAssociated";
pub const KEY_ATTRIBUTES: &str = "Attributes";
pub const KEY_STUDY_UID: &str = "StudyInstanceUID";
pub const KEY_SERIES_UID: &str = "SeriesInstanceUID";

/// Keys consumed by the built-in converter. Anything else is passed through untouched.
pub const RECOGNIZED_KEYS: &[&str] = &[
    KEY_WSI_FILE,
    KEY_TILE_SIZE,
    KEY_COMPRESSION,
    KEY_JPEG_QUALITY,
    KEY_MAX_LEVELS,
    KEY_INCLUDE_ASSOCIATED,
    KEY_ATTRIBUTES,
    KEY_STUDY_UID,
    KEY_SERIES_UID,
];

pub const DEFAULT_TILE_SIZE: u32 = 512;
pub const MIN_TILE_SIZE: u32 = 16;
pub const MAX_TILE_SIZE: u32 = 4096;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Pixel data encoding for the generated frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Compression {
    /// Native frames, Explicit VR Little Endian.
    None,
    /// JPEG Baseline (Process 1) fragments.
    Jpeg,
}

/// Key/value mapping loaded from the YAML configuration file.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    source: PathBuf,
    values: Mapping,
}

impl ConversionConfig {
    /// Read and parse `path`. Only the presence of a string `WSIFile` is checked here.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text, path)?;
        debug!("Loaded configuration {:?} with {} key(s)", path, config.values.len());
        Ok(config)
    }

    /// Parse an in-memory document. `source` is only used for messages and relative paths.
    pub fn from_yaml_str(text: &str, source: &Path) -> Result<Self, ConfigurationError> {
        let document: Value =
            serde_yaml::from_str(text).map_err(|err| ConfigurationError::ParseConfig {
                path: source.to_path_buf(),
                source: err,
            })?;

        let values = match document {
            Value::Mapping(map) => map,
            _ => return Err(ConfigurationError::NotAMapping(source.to_path_buf())),
        };

        match values.get(KEY_WSI_FILE) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(_) => {
                return Err(ConfigurationError::InvalidValue {
                    key: KEY_WSI_FILE,
                    message: "expected a non-empty path string".to_string(),
                })
            }
            None => return Err(ConfigurationError::MissingWsiFile(source.to_path_buf())),
        }

        Ok(Self {
            source: source.to_path_buf(),
            values,
        })
    }

    /// Path of the YAML file this configuration came from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Raw mapping, including keys the built-in converter ignores.
    pub fn values(&self) -> &Mapping {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// `WSIFile` exactly as written in the document.
    pub fn wsi_file(&self) -> &str {
        // Presence and type are checked in `from_yaml_str`.
        self.values
            .get(KEY_WSI_FILE)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Top-level keys that no part of this crate consumes.
    pub fn unrecognized_keys(&self) -> Vec<String> {
        self.values
            .keys()
            .map(|k| match k {
                Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "<non-string key>".to_string()),
            })
            .filter(|k| !RECOGNIZED_KEYS.contains(&k.as_str()))
            .collect()
    }

    pub fn tile_size(&self) -> Result<u32, ConfigurationError> {
        let Some(value) = self.get(KEY_TILE_SIZE) else {
            return Ok(DEFAULT_TILE_SIZE);
        };
        let size = value
            .as_u64()
            .ok_or_else(|| invalid(KEY_TILE_SIZE, "expected a positive integer"))?;
        if !(MIN_TILE_SIZE as u64..=MAX_TILE_SIZE as u64).contains(&size) {
            return Err(invalid(
                KEY_TILE_SIZE,
                format!("{} is outside {}..={}", size, MIN_TILE_SIZE, MAX_TILE_SIZE),
            ));
        }
        Ok(size as u32)
    }

    pub fn compression(&self) -> Result<Compression, ConfigurationError> {
        let Some(value) = self.get(KEY_COMPRESSION) else {
            return Ok(Compression::None);
        };
        let name = value
            .as_str()
            .ok_or_else(|| invalid(KEY_COMPRESSION, "expected `none` or `jpeg`"))?;
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "jpeg" => Ok(Compression::Jpeg),
            other => Err(invalid(
                KEY_COMPRESSION,
                format!("unknown compression `{}`", other),
            )),
        }
    }

    pub fn jpeg_quality(&self) -> Result<u8, ConfigurationError> {
        let Some(value) = self.get(KEY_JPEG_QUALITY) else {
            return Ok(DEFAULT_JPEG_QUALITY);
        };
        match value.as_u64() {
            Some(q @ 1..=100) => Ok(q as u8),
            _ => Err(invalid(KEY_JPEG_QUALITY, "expected an integer in 1..=100")),
        }
    }

    pub fn max_levels(&self) -> Result<Option<usize>, ConfigurationError> {
        let Some(value) = self.get(KEY_MAX_LEVELS) else {
            return Ok(None);
        };
        match value.as_u64() {
            Some(n) if n >= 1 => Ok(Some(n as usize)),
            _ => Err(invalid(KEY_MAX_LEVELS, "expected an integer >= 1")),
        }
    }

    pub fn include_associated(&self) -> Result<bool, ConfigurationError> {
        match self.get(KEY_INCLUDE_ASSOCIATED) {
            None => Ok(true),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| invalid(KEY_INCLUDE_ASSOCIATED, "expected true or false")),
        }
    }

    /// Extra attributes as (keyword, text value) pairs, in document order.
    pub fn attributes(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        let Some(value) = self.get(KEY_ATTRIBUTES) else {
            return Ok(Vec::new());
        };
        let map = value
            .as_mapping()
            .ok_or_else(|| invalid(KEY_ATTRIBUTES, "expected a mapping of keyword to value"))?;

        map.iter()
            .map(|(k, v)| {
                let keyword = k
                    .as_str()
                    .ok_or_else(|| invalid(KEY_ATTRIBUTES, "keywords must be strings"))?;
                let text = scalar_to_string(v).ok_or_else(|| {
                    invalid(
                        KEY_ATTRIBUTES,
                        format!("value for `{}` must be a scalar", keyword),
                    )
                })?;
                Ok((keyword.to_string(), text))
            })
            .collect()
    }

    pub fn study_instance_uid(&self) -> Result<Option<String>, ConfigurationError> {
        self.uid_override(KEY_STUDY_UID)
    }

    pub fn series_instance_uid(&self) -> Result<Option<String>, ConfigurationError> {
        self.uid_override(KEY_SERIES_UID)
    }

    fn uid_override(&self, key: &'static str) -> Result<Option<String>, ConfigurationError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let uid = value
            .as_str()
            .ok_or_else(|| invalid(key, "expected a UID string"))?;
        if !crate::uid::is_valid_uid(uid) {
            return Err(invalid(key, format!("`{}` is not a valid DICOM UID", uid)));
        }
        Ok(Some(uid.to_string()))
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key,
        message: message.into(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
