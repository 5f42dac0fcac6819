//
// models.rs
// Dicom-WSI-rs
//
// Serializable summaries of a conversion run, printed by the CLI and optionally written as JSON.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::convert::source::ImageFlavor;

/// One DICOM instance written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub path: PathBuf,
    pub page_index: usize,
    pub flavor: ImageFlavor,
    pub total_columns: u32,
    pub total_rows: u32,
    pub tile_size: u32,
    pub number_of_frames: u32,
    pub sop_instance_uid: String,
    pub transfer_syntax: String,
}

/// Everything a conversion produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub instances: Vec<InstanceSummary>,
}

impl ConversionReport {
    pub fn total_frames(&self) -> u64 {
        self.instances
            .iter()
            .map(|i| i.number_of_frames as u64)
            .sum()
    }
}
