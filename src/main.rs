//
// main.rs
// Dicom-WSI-rs
//
// Entry point: sets up logging, then hands off to the CLI layer which runs the single conversion pass.
//
// Thales Matheus Mendonça Santos - November 2025

use std::process::ExitCode;

use clap::Parser;
use dicom_wsi::cli::{self, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    cli::run(cli)
}

/// Initialize the tracing/logging subsystem. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dicom_wsi=debug"
    } else {
        "dicom_wsi=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
