//
// error.rs
// Dicom-WSI-rs
//
// Error taxonomy: configuration problems are reported by the wrapper, converter failures pass through untouched.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use thiserror::Error;

/// Problems with the command-line inputs or the YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Input TIFF not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Input TIFF is not a regular file: {0}")]
    InputNotAFile(PathBuf),

    #[error("Input TIFF {path} cannot be read: {source}")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read YAML configuration {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML configuration {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML configuration {0} must be a mapping at the top level")]
    NotAMapping(PathBuf),

    #[error("YAML configuration {0} has no `WSIFile` key")]
    MissingWsiFile(PathBuf),

    /// `-w` and `WSIFile` point at different files.
    #[error("CLI input {cli} and WSIFile {yaml} refer to different files")]
    InputMismatch { cli: PathBuf, yaml: PathBuf },

    #[error("Invalid value for `{key}`: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Output name must not be empty")]
    EmptyOutputName,

    /// The prefix is used verbatim, so it must be a single file-name component.
    #[error("Output name {0:?} cannot be used in a file name")]
    UnsafeOutputName(String),

    #[error("Output path exists but is not a directory: {0}")]
    OutputNotADirectory(PathBuf),

    #[error("Output directory {0} is not writable")]
    OutputNotWritable(PathBuf),
}

/// Failures raised while converting pages into DICOM instances.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("Failed to build file meta group: {0}")]
    Meta(#[from] dicom::object::meta::Error),

    #[error("Failed to write DICOM file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: dicom::object::WriteError,
    },

    #[error("Unsupported color type on page {page}: {color_type}")]
    UnsupportedColorType { page: usize, color_type: String },

    #[error("Page {page} uses planar configuration {planar}; only interleaved samples are supported")]
    PlanarLayout { page: usize, planar: u32 },

    #[error("Chunk {chunk} of page {page} decoded to {actual} samples, expected {expected}")]
    SampleCount {
        page: usize,
        chunk: u32,
        actual: usize,
        expected: usize,
    },

    #[error("JPEG compression requires 8-bit samples, page {page} has {bits}")]
    JpegBitDepth { page: usize, bits: u16 },

    #[error("No pages left to convert in {0}")]
    NoPages(PathBuf),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Everything the wrapper can return.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
