//! The conversion engine behind the CLI.
//!
//! The wrapper only knows the [`Converter`] contract: a validated
//! [`ConversionRequest`] goes in, DICOM files land in the output directory and
//! a [`ConversionReport`] comes back. [`WsiConverter`] is the built-in engine;
//! it re-wraps each TIFF page as a tiled VL Whole Slide Microscopy instance.

pub mod encode;
pub mod source;
pub mod tiles;
pub mod writer;

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Compression;
use crate::error::ConversionError;
use crate::metadata;
use crate::models::{ConversionReport, InstanceSummary};
use crate::request::ConversionRequest;
use crate::storage::OutputDir;
use crate::uid::UidSeed;

use self::encode::FrameEncoder;
use self::source::{ImageFlavor, PageInfo, Spacing, TiffSlide};
use self::writer::{InstanceContext, SlideIdentity};

/// Pixel spacing assumed when neither the page nor the base level records one (0.25 um).
pub const FALLBACK_SPACING_MM: f64 = 0.00025;

/// Anything that can turn a request into files on disk.
pub trait Converter {
    fn convert(&self, request: &ConversionRequest) -> Result<ConversionReport, ConversionError>;
}

/// TIFF pages to tiled DICOM instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsiConverter;

impl Converter for WsiConverter {
    fn convert(&self, request: &ConversionRequest) -> Result<ConversionReport, ConversionError> {
        let config = &request.config;
        let encoder = FrameEncoder {
            tile_size: config.tile_size()?,
            compression: config.compression()?,
            jpeg_quality: config.jpeg_quality()?,
        };
        let max_levels = config.max_levels()?;
        let include_associated = config.include_associated()?;
        let extra = metadata::resolve_attributes(&config.attributes()?)?;
        for key in config.unrecognized_keys() {
            debug!("Configuration key `{}` is not used by the built-in converter", key);
        }

        let seed = UidSeed::from_file(&request.input_path, &request.output_name)?;
        let slide_identity = SlideIdentity {
            study_uid: match config.study_instance_uid()? {
                Some(uid) => uid,
                None => seed.derive("study"),
            },
            series_uid: match config.series_instance_uid()? {
                Some(uid) => uid,
                None => seed.derive("series"),
            },
            frame_of_reference_uid: seed.derive("frame-of-reference"),
            dimension_organization_uid: seed.derive("dimension-organization"),
            specimen_uid: seed.derive("specimen"),
            container_identifier: request.output_name.clone(),
        };
        debug!("UID seed {} for {:?}", seed.fingerprint(), request.input_path);

        let mut slide = TiffSlide::open(&request.input_path)?;
        let selected = select_pages(slide.pages(), max_levels, include_associated);
        if selected.is_empty() {
            return Err(ConversionError::NoPages(request.input_path.clone()));
        }
        let slide_acquired = slide_datetime(slide.pages(), &request.input_path)?;
        let base_level = slide
            .pages()
            .iter()
            .find(|p| p.flavor == ImageFlavor::Volume)
            .cloned();

        let output = OutputDir::create(&request.output_dir)?;
        info!(
            "Converting {} of {} page(s) from {:?} into {:?}",
            selected.len(),
            slide.pages().len(),
            request.input_path,
            output.root()
        );

        let mut instances = Vec::with_capacity(selected.len());
        for (position, selection) in selected.iter().enumerate() {
            let page = &selection.page;
            let mut reader = slide.page_reader(page)?;
            let layout = *reader.layout();

            let mut sink = encoder.begin(layout.bits_allocated, page.index)?;
            let mut top = 0;
            while top < layout.height {
                let rows = encoder.tile_size.min(layout.height - top);
                let band = reader.read_band(top, rows)?;
                encoder.push_band(&mut sink, &band)?;
                top += rows;
            }
            let frames = sink.finish();
            let number_of_frames = frames.frame_count;

            let ctx = InstanceContext {
                slide: &slide_identity,
                sop_instance_uid: seed.derive(&format!("instance-{}", page.index)),
                instance_number: position + 1,
                volume_level: selection.volume_level,
                page,
                acquired: page.acquired.unwrap_or(slide_acquired),
                pixel_spacing: pixel_spacing(page, base_level.as_ref()),
                tile_size: encoder.tile_size,
                compression: encoder.compression,
                extra: &extra,
            };
            let path =
                output.instance_path(&request.output_name, position, page.flavor.as_str());
            let obj = writer::build_instance(&ctx, &layout, frames);
            writer::write_instance(obj, &ctx, &path)?;

            info!(
                "  page {} ({}) {}x{} -> {} frame(s) in {:?}",
                page.index,
                page.flavor.as_str(),
                page.width,
                page.height,
                number_of_frames,
                path
            );

            instances.push(InstanceSummary {
                path,
                page_index: page.index,
                flavor: page.flavor,
                total_columns: layout.width,
                total_rows: layout.height,
                tile_size: encoder.tile_size,
                number_of_frames,
                sop_instance_uid: ctx.sop_instance_uid.clone(),
                transfer_syntax: ctx.transfer_syntax_uid().to_string(),
            });
        }

        if encoder.compression == Compression::Jpeg {
            debug!("Frames encoded as JPEG Baseline at quality {}", encoder.jpeg_quality);
        }

        Ok(ConversionReport {
            source: request.input_path.clone(),
            output_dir: output.root().to_path_buf(),
            study_instance_uid: slide_identity.study_uid,
            series_instance_uid: slide_identity.series_uid,
            instances,
        })
    }
}

/// The first `DateTime` recorded on any page, else the file's modification time.
fn slide_datetime(pages: &[PageInfo], path: &Path) -> Result<NaiveDateTime, ConversionError> {
    if let Some(acquired) = pages.iter().find_map(|p| p.acquired) {
        return Ok(acquired);
    }
    let modified = fs::metadata(path)?.modified()?;
    debug!("No TIFF DateTime in {:?}; using its modification time", path);
    Ok(DateTime::<Utc>::from(modified).naive_utc())
}

/// The page's own spacing, else the base level's scaled by the size ratio.
pub fn pixel_spacing(page: &PageInfo, base: Option<&PageInfo>) -> Spacing {
    if let Some(spacing) = page.pixel_spacing {
        return spacing;
    }
    let scaled = base
        .filter(|_| page.flavor == ImageFlavor::Volume)
        .filter(|base| page.width > 0 && page.height > 0 && base.index != page.index)
        .and_then(|base| {
            base.pixel_spacing.map(|spacing| {
                spacing.scaled(
                    base.width as f64 / page.width as f64,
                    base.height as f64 / page.height as f64,
                )
            })
        });
    scaled.unwrap_or_else(|| {
        warn!(
            "Page {} records no resolution; assuming {} mm per pixel",
            page.index, FALLBACK_SPACING_MM
        );
        Spacing {
            x_mm: FALLBACK_SPACING_MM,
            y_mm: FALLBACK_SPACING_MM,
        }
    })
}

/// A page chosen for conversion and its rank among volume pages.
#[derive(Debug, Clone)]
pub struct SelectedPage {
    pub page: PageInfo,
    pub volume_level: Option<usize>,
}

/// Volume pages in file order (capped by `max_levels`), then associated images.
pub fn select_pages(
    pages: &[PageInfo],
    max_levels: Option<usize>,
    include_associated: bool,
) -> Vec<SelectedPage> {
    let volumes = pages
        .iter()
        .filter(|p| p.flavor == ImageFlavor::Volume)
        .take(max_levels.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(level, page)| SelectedPage {
            page: page.clone(),
            volume_level: Some(level),
        });

    let associated = pages
        .iter()
        .filter(|p| include_associated && p.flavor != ImageFlavor::Volume)
        .map(|page| SelectedPage {
            page: page.clone(),
            volume_level: None,
        });

    volumes.chain(associated).collect()
}

/// Hand the request to `converter`. Its errors are returned as they are.
pub fn run(
    request: &ConversionRequest,
    converter: &dyn Converter,
) -> Result<ConversionReport, ConversionError> {
    converter.convert(request)
}
