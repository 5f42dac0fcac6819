//
// cli.rs
// Dicom-WSI-rs
//
// Defines the CLI surface with Clap, loads the YAML configuration and hands the assembled request to the converter.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use crate::config::ConversionConfig;
use crate::convert::{self, Converter, WsiConverter};
use crate::error::{ConversionError, Error};
use crate::models::ConversionReport;
use crate::request::ConversionRequest;

/// Exit status for configuration problems.
pub const EXIT_CONFIGURATION: u8 = 2;
/// Exit status for everything else, converter failures included.
pub const EXIT_FAILURE: u8 = 1;

/// Convert a TIFF whole-slide image into DICOM files.
#[derive(Parser, Debug, Clone)]
#[command(name = "dicom-wsi")]
#[command(version, about = "TIFF whole-slide image to DICOM converter", long_about = None)]
pub struct Cli {
    /// Source TIFF file
    #[arg(short = 'w', long = "wsi")]
    pub wsi: PathBuf,

    /// Directory for the generated DICOM files (created if missing)
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,

    /// Prefix for the generated file names
    #[arg(short = 'p', long = "prefix")]
    pub prefix: String,

    /// YAML configuration file (must contain `WSIFile`)
    #[arg(short = 'y', long = "yaml")]
    pub yaml: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write the conversion report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Load the configuration, validate the request and delegate to `converter`.
pub fn execute(cli: &Cli, converter: &dyn Converter) -> Result<ConversionReport, Error> {
    let config = ConversionConfig::load(&cli.yaml)?;
    let request = ConversionRequest::new(&cli.wsi, &cli.output_dir, &cli.prefix, config)?;
    Ok(convert::run(&request, converter)?)
}

pub fn run(cli: Cli) -> ExitCode {
    match run_with(&cli, &WsiConverter) {
        Ok(report) => {
            info!(
                "Wrote {} instance(s), {} frame(s) to {:?}",
                report.instances.len(),
                report.total_frames(),
                report.output_dir
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(exit_status_for(&err))
        }
    }
}

fn run_with(cli: &Cli, converter: &dyn Converter) -> anyhow::Result<ConversionReport> {
    let report = execute(cli, converter)?;
    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("Failed to write report to {:?}", path))?;
    }
    Ok(report)
}

pub fn exit_status_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Configuration(_))
        | Some(Error::Conversion(ConversionError::Configuration(_))) => EXIT_CONFIGURATION,
        _ => EXIT_FAILURE,
    }
}
