//
// request.rs
// Dicom-WSI-rs
//
// Assembles a validated ConversionRequest from the command-line inputs and the YAML configuration.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ConversionConfig;
use crate::error::ConfigurationError;
use crate::storage::{self, OutputDir};

/// One conversion: built once per invocation and never mutated.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_name: String,
    pub config: ConversionConfig,
}

impl ConversionRequest {
    /// Validate the CLI inputs against each other and the loaded configuration.
    ///
    /// Nothing is written to disk here; a rejected request leaves no trace.
    pub fn new(
        input_path: &Path,
        output_dir: &Path,
        output_name: &str,
        config: ConversionConfig,
    ) -> Result<Self, ConfigurationError> {
        let input_path = canonical_input(input_path)?;

        storage::check_output_name(output_name)?;
        OutputDir::check(output_dir)?;

        let yaml_path = resolve_wsi_file(&config)?;
        if yaml_path != input_path {
            return Err(ConfigurationError::InputMismatch {
                cli: input_path,
                yaml: yaml_path,
            });
        }
        debug!("Input {:?} matches WSIFile", input_path);

        Ok(Self {
            input_path,
            output_dir: output_dir.to_path_buf(),
            output_name: output_name.to_string(),
            config,
        })
    }
}

fn canonical_input(path: &Path) -> Result<PathBuf, ConfigurationError> {
    let canonical = path
        .canonicalize()
        .map_err(|_| ConfigurationError::InputNotFound(path.to_path_buf()))?;
    if !canonical.is_file() {
        return Err(ConfigurationError::InputNotAFile(path.to_path_buf()));
    }
    File::open(&canonical).map_err(|source| ConfigurationError::InputUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(canonical)
}

/// `WSIFile` is tried relative to the working directory first, then next to the YAML file.
fn resolve_wsi_file(config: &ConversionConfig) -> Result<PathBuf, ConfigurationError> {
    let declared = PathBuf::from(config.wsi_file());
    if let Ok(found) = declared.canonicalize() {
        return Ok(found);
    }

    if declared.is_relative() {
        if let Some(dir) = config.source().parent() {
            if let Ok(found) = dir.join(&declared).canonicalize() {
                return Ok(found);
            }
        }
    }

    Err(ConfigurationError::InputNotFound(declared))
}
