//
// lib.rs
// Dicom-WSI-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Public surface of the library: the CLI adapter, its configuration and the conversion engine it drives.
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod metadata;
pub mod models;
pub mod request;
pub mod storage;
pub mod uid;

pub use cli::{execute, run as run_cli, Cli};
pub use config::ConversionConfig;
pub use convert::{Converter, WsiConverter};
pub use error::{ConfigurationError, ConversionError, Error};
pub use models::ConversionReport;
pub use request::ConversionRequest;
