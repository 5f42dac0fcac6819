//! Page-level access to a TIFF slide, backed by the `tiff` decoder.
//!
//! Every IFD becomes a [`PageInfo`]. Pages are classified from their
//! `ImageDescription`: Aperio-style files label the slide label and macro
//! photos there, everything else is treated as a pyramid level in file order.
//!
//! Pixels are never decoded a whole page at a time. A [`BandReader`] walks the
//! page's own tiles or strips and assembles horizontal bands, so memory stays
//! bounded by one band plus one row of source chunks.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, warn};

use crate::error::ConversionError;

/// Safety limit on the number of IFDs scanned.
const MAX_PAGES: usize = 256;

/// TIFF compression code for "new style" JPEG.
const COMPRESSION_JPEG: u32 = 7;

const RESOLUTION_UNIT_INCH: u32 = 2;
const RESOLUTION_UNIT_CENTIMETER: u32 = 3;

/// What a page depicts. Serialized into file names and the Image Type attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFlavor {
    Volume,
    Label,
    Overview,
}

impl ImageFlavor {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFlavor::Volume => "VOLUME",
            ImageFlavor::Label => "LABEL",
            ImageFlavor::Overview => "OVERVIEW",
        }
    }

    pub fn from_description(description: Option<&str>) -> Self {
        let Some(text) = description else {
            return ImageFlavor::Volume;
        };
        let lower = text.to_ascii_lowercase();
        if lower.contains("label") {
            ImageFlavor::Label
        } else if lower.contains("macro") {
            ImageFlavor::Overview
        } else {
            ImageFlavor::Volume
        }
    }
}

/// Physical size of one pixel, in millimetres.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Spacing {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl Spacing {
    pub fn scaled(self, x_factor: f64, y_factor: f64) -> Self {
        Self {
            x_mm: self.x_mm * x_factor,
            y_mm: self.y_mm * y_factor,
        }
    }
}

/// Header-level facts about one IFD, read without decoding pixels.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub flavor: ImageFlavor,
    pub description: Option<String>,
    pub acquired: Option<NaiveDateTime>,
    pub pixel_spacing: Option<Spacing>,
}

/// Decoded samples, interleaved (chunky) when there is more than one per pixel.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
        }
    }
}

/// A rectangle of decoded pixels: a whole page or one band of it.
#[derive(Debug, Clone)]
pub struct PagePixels {
    pub width: u32,
    pub height: u32,
    /// 1 (grayscale) or 3 (RGB).
    pub samples_per_pixel: u16,
    pub samples: Samples,
}

impl PagePixels {
    pub fn bits_allocated(&self) -> u16 {
        match self.samples {
            Samples::U8(_) => 8,
            Samples::U16(_) => 16,
        }
    }
}

/// Pixel format and chunk geometry of one page.
#[derive(Debug, Copy, Clone)]
pub struct PageLayout {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Samples per pixel after alpha removal.
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    stored_samples: usize,
    chunk_width: u32,
    chunk_height: u32,
}

impl PageLayout {
    /// Layout of an image held in one chunk.
    #[cfg(test)]
    pub(crate) fn single_chunk(
        index: usize,
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_allocated: u16,
    ) -> Self {
        Self {
            index,
            width,
            height,
            samples_per_pixel,
            bits_allocated,
            stored_samples: samples_per_pixel as usize,
            chunk_width: width.max(1),
            chunk_height: height.max(1),
        }
    }

    fn chunks_across(&self) -> u32 {
        self.width.div_ceil(self.chunk_width)
    }
}

type TiffDecoder = Decoder<BufReader<File>>;

pub struct TiffSlide {
    decoder: TiffDecoder,
    pages: Vec<PageInfo>,
}

impl TiffSlide {
    pub fn open(path: &Path) -> Result<Self, ConversionError> {
        let file = File::open(path)?;
        let decoder = Decoder::new(BufReader::new(file))?;
        let mut slide = Self {
            decoder,
            pages: Vec::new(),
        };
        slide.scan()?;
        debug!("Scanned {} page(s) in {:?}", slide.pages.len(), path);
        Ok(slide)
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    fn scan(&mut self) -> Result<(), ConversionError> {
        let mut index = 0;
        loop {
            let (width, height) = self.decoder.dimensions()?;
            let description = self
                .decoder
                .get_tag_ascii_string(Tag::ImageDescription)
                .ok();
            let acquired = self
                .decoder
                .get_tag_ascii_string(Tag::DateTime)
                .ok()
                .and_then(|s| parse_tiff_datetime(&s));
            let pixel_spacing = resolution_spacing(&mut self.decoder)
                .or_else(|| description.as_deref().and_then(aperio_mpp_spacing));

            self.pages.push(PageInfo {
                index,
                width,
                height,
                flavor: ImageFlavor::from_description(description.as_deref()),
                description,
                acquired,
                pixel_spacing,
            });

            index += 1;
            if !self.decoder.more_images() {
                break;
            }
            if index >= MAX_PAGES {
                warn!(
                    "TIFF has more than {} pages; the remaining pages are ignored",
                    MAX_PAGES
                );
                break;
            }
            self.decoder.next_image()?;
        }
        Ok(())
    }

    /// Position the decoder on `page` and prepare to read it band by band.
    pub fn page_reader(&mut self, page: &PageInfo) -> Result<BandReader<'_>, ConversionError> {
        self.decoder.seek_to_image(page.index)?;
        let color_type = self.decoder.colortype()?;
        let compression = self.decoder.get_tag_u32(Tag::Compression).unwrap_or(1);
        let planar = self
            .decoder
            .get_tag_u32(Tag::PlanarConfiguration)
            .unwrap_or(1);
        if planar != 1 {
            return Err(ConversionError::PlanarLayout {
                page: page.index,
                planar,
            });
        }

        let (samples_per_pixel, stored_samples, bits_allocated) = match color_type {
            ColorType::Gray(8) => (1, 1, 8),
            ColorType::Gray(16) => (1, 1, 16),
            ColorType::RGB(8) => (3, 3, 8),
            ColorType::RGB(16) => (3, 3, 16),
            ColorType::RGBA(8) => (3, 4, 8),
            // JPEG-in-TIFF YCbCr pages come out of the decoder as RGB.
            ColorType::YCbCr(8) if compression == COMPRESSION_JPEG => (3, 3, 8),
            other => {
                return Err(ConversionError::UnsupportedColorType {
                    page: page.index,
                    color_type: format!("{:?}", other),
                })
            }
        };

        let (chunk_width, chunk_height) = self.decoder.chunk_dimensions();
        let layout = PageLayout {
            index: page.index,
            width: page.width,
            height: page.height,
            samples_per_pixel,
            bits_allocated,
            stored_samples,
            chunk_width: chunk_width.max(1),
            chunk_height: chunk_height.max(1),
        };
        debug!(
            "Page {} is stored in {}x{} chunks",
            page.index, layout.chunk_width, layout.chunk_height
        );

        Ok(BandReader {
            decoder: &mut self.decoder,
            layout,
            cached_row: None,
        })
    }
}

/// One source tile or strip after alpha removal.
struct DecodedChunk {
    samples: Samples,
    /// Pixels per stored row; wider than the data when the chunk is padded.
    stride: usize,
}

/// Reads one page as horizontal bands of full width.
pub struct BandReader<'a> {
    decoder: &'a mut TiffDecoder,
    layout: PageLayout,
    cached_row: Option<(u32, Vec<DecodedChunk>)>,
}

impl BandReader<'_> {
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Decode rows `top..top + rows` of the page.
    pub fn read_band(&mut self, top: u32, rows: u32) -> Result<PagePixels, ConversionError> {
        let layout = self.layout;
        let spp = layout.samples_per_pixel as usize;
        let bottom = (top + rows).min(layout.height);
        let rows = bottom.saturating_sub(top);
        let band_len = layout.width as usize * rows as usize * spp;
        let mut band = match layout.bits_allocated {
            8 => Samples::U8(vec![0; band_len]),
            _ => Samples::U16(vec![0; band_len]),
        };
        if rows == 0 {
            return Ok(self.band(band, 0));
        }

        let first = top / layout.chunk_height;
        let last = (bottom - 1) / layout.chunk_height;
        for chunk_row in first..=last {
            let chunk_top = chunk_row * layout.chunk_height;
            let from = top.max(chunk_top);
            let to = bottom.min(chunk_top + layout.chunk_height);
            let chunks = self.chunk_row(chunk_row)?;

            for (column, chunk) in chunks.iter().enumerate() {
                let x0 = column as u32 * layout.chunk_width;
                let placement = Placement {
                    band_width: layout.width as usize,
                    samples: spp,
                    x0: x0 as usize,
                    copy_width: layout.chunk_width.min(layout.width - x0) as usize,
                    stride: chunk.stride,
                    src_row: (from - chunk_top) as usize,
                    dst_row: (from - top) as usize,
                    rows: (to - from) as usize,
                };
                match (&mut band, &chunk.samples) {
                    (Samples::U8(dst), Samples::U8(src)) => placement.copy(dst, src),
                    (Samples::U16(dst), Samples::U16(src)) => placement.copy(dst, src),
                    _ => {
                        return Err(ConversionError::UnsupportedColorType {
                            page: layout.index,
                            color_type: format!("mixed sample widths in chunk row {}", chunk_row),
                        })
                    }
                }
            }
        }

        Ok(self.band(band, rows))
    }

    fn band(&self, samples: Samples, rows: u32) -> PagePixels {
        PagePixels {
            width: self.layout.width,
            height: rows,
            samples_per_pixel: self.layout.samples_per_pixel,
            samples,
        }
    }

    fn chunk_row(&mut self, chunk_row: u32) -> Result<&[DecodedChunk], ConversionError> {
        let cached = matches!(&self.cached_row, Some((row, _)) if *row == chunk_row);
        if !cached {
            let layout = self.layout;
            let across = layout.chunks_across();
            let data_height = layout
                .chunk_height
                .min(layout.height - chunk_row * layout.chunk_height);

            let mut chunks = Vec::with_capacity(across as usize);
            for column in 0..across {
                let index = chunk_row * across + column;
                let data_width = layout
                    .chunk_width
                    .min(layout.width - column * layout.chunk_width);
                let samples = match self.decoder.read_chunk(index)? {
                    DecodingResult::U8(data) => Samples::U8(drop_alpha(data, layout.stored_samples)),
                    DecodingResult::U16(data) => {
                        Samples::U16(drop_alpha(data, layout.stored_samples))
                    }
                    _ => {
                        return Err(ConversionError::UnsupportedColorType {
                            page: layout.index,
                            color_type: format!("chunk {} sample format", index),
                        })
                    }
                };
                let stride = chunk_stride(&layout, &samples, data_width, data_height, index)?;
                chunks.push(DecodedChunk { samples, stride });
            }
            self.cached_row = Some((chunk_row, chunks));
        }

        match &self.cached_row {
            Some((_, chunks)) => Ok(chunks),
            None => Ok(&[]),
        }
    }
}

/// Where a chunk's rows land inside a band.
struct Placement {
    band_width: usize,
    samples: usize,
    x0: usize,
    copy_width: usize,
    stride: usize,
    src_row: usize,
    dst_row: usize,
    rows: usize,
}

impl Placement {
    fn copy<T: Copy>(&self, dst: &mut [T], src: &[T]) {
        let len = self.copy_width * self.samples;
        for dy in 0..self.rows {
            let from = (self.src_row + dy) * self.stride * self.samples;
            let to = ((self.dst_row + dy) * self.band_width + self.x0) * self.samples;
            dst[to..to + len].copy_from_slice(&src[from..from + len]);
        }
    }
}

/// Decoders return edge chunks either padded to the nominal size or trimmed to the data.
fn chunk_stride(
    layout: &PageLayout,
    samples: &Samples,
    data_width: u32,
    data_height: u32,
    chunk: u32,
) -> Result<usize, ConversionError> {
    let spp = layout.samples_per_pixel as usize;
    let actual = samples.len();
    let candidates = [
        (layout.chunk_width, layout.chunk_height),
        (layout.chunk_width, data_height),
        (data_width, data_height),
    ];
    candidates
        .iter()
        .find(|(w, h)| *w as usize * *h as usize * spp == actual)
        .map(|(w, _)| *w as usize)
        .ok_or(ConversionError::SampleCount {
            page: layout.index,
            chunk,
            actual,
            expected: data_width as usize * data_height as usize * spp,
        })
}

fn drop_alpha<T: Copy>(data: Vec<T>, stored_samples: usize) -> Vec<T> {
    if stored_samples != 4 {
        return data;
    }
    data.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

/// `XResolution`/`YResolution` in pixels per inch or centimetre.
fn resolution_spacing(decoder: &mut TiffDecoder) -> Option<Spacing> {
    let unit_mm = match decoder
        .get_tag_u32(Tag::ResolutionUnit)
        .unwrap_or(RESOLUTION_UNIT_INCH)
    {
        RESOLUTION_UNIT_INCH => 25.4,
        RESOLUTION_UNIT_CENTIMETER => 10.0,
        _ => return None,
    };
    let x = decoder
        .find_tag(Tag::XResolution)
        .ok()
        .flatten()
        .and_then(positive_number)?;
    let y = decoder
        .find_tag(Tag::YResolution)
        .ok()
        .flatten()
        .and_then(positive_number)
        .unwrap_or(x);
    Some(Spacing {
        x_mm: unit_mm / x,
        y_mm: unit_mm / y,
    })
}

fn positive_number(value: Value) -> Option<f64> {
    let number = match value {
        Value::Rational(n, d) if d != 0 => n as f64 / d as f64,
        Value::Float(f) => f as f64,
        Value::Double(f) => f,
        _ => return None,
    };
    (number.is_finite() && number > 0.0).then_some(number)
}

/// Aperio descriptions carry `MPP = <microns per pixel>`.
fn aperio_mpp_spacing(description: &str) -> Option<Spacing> {
    let mpp = description.split('|').find_map(|field| {
        let (key, value) = field.split_once('=')?;
        if key.trim() != "MPP" {
            return None;
        }
        value.trim().parse::<f64>().ok()
    })?;
    (mpp.is_finite() && mpp > 0.0).then_some(Spacing {
        x_mm: mpp / 1000.0,
        y_mm: mpp / 1000.0,
    })
}

/// TIFF `DateTime` is "YYYY:MM:DD HH:MM:SS".
pub fn parse_tiff_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim_end_matches('\0').trim(), "%Y:%m:%d %H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(width: u32, height: u32, chunk: (u32, u32)) -> PageLayout {
        PageLayout {
            chunk_width: chunk.0,
            chunk_height: chunk.1,
            ..PageLayout::single_chunk(0, width, height, 1, 8)
        }
    }

    #[test]
    fn flavor_follows_description_keywords() {
        assert_eq!(ImageFlavor::from_description(None), ImageFlavor::Volume);
        assert_eq!(
            ImageFlavor::from_description(Some("Aperio Image Library v12\r\nlabel 415x422")),
            ImageFlavor::Label
        );
        assert_eq!(
            ImageFlavor::from_description(Some("Aperio Image Library v12\r\nmacro 1280x431")),
            ImageFlavor::Overview
        );
        assert_eq!(
            ImageFlavor::from_description(Some("Aperio Image Library|AppMag = 20|MPP = 0.499")),
            ImageFlavor::Volume
        );
    }

    #[test]
    fn alpha_is_removed() {
        assert_eq!(
            drop_alpha(vec![1u8, 2, 3, 255, 4, 5, 6, 0], 4),
            vec![1, 2, 3, 4, 5, 6]
        );
        assert_eq!(drop_alpha(vec![1u16, 2, 3], 3), vec![1, 2, 3]);
    }

    #[test]
    fn tiff_datetime_parsing() {
        let parsed = parse_tiff_datetime("2023:07:14 09:30:05").expect("datetime");
        assert_eq!(parsed.format("%Y%m%d%H%M%S").to_string(), "20230714093005");
        assert!(parse_tiff_datetime("yesterday").is_none());
    }

    #[test]
    fn aperio_mpp_becomes_millimetres() {
        let spacing =
            aperio_mpp_spacing("Aperio Image Library v12|AppMag = 20|MPP = 0.5").expect("mpp");
        assert!((spacing.x_mm - 0.0005).abs() < 1e-12);
        assert!(aperio_mpp_spacing("Aperio Image Library|AppMag = 20").is_none());
        assert!(aperio_mpp_spacing("MPP = -1").is_none());
    }

    #[test]
    fn resolution_values_must_be_positive() {
        assert_eq!(positive_number(Value::Rational(20000, 1)), Some(20000.0));
        assert_eq!(positive_number(Value::Rational(1, 0)), None);
        assert_eq!(positive_number(Value::Double(0.0)), None);
    }

    #[test]
    fn scan_stops_at_the_page_limit() {
        use tiff::encoder::{colortype, TiffEncoder};

        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("many.tif");
        {
            let file = File::create(&path).expect("create");
            let mut encoder = TiffEncoder::new(file).expect("encoder");
            for _ in 0..MAX_PAGES + 1 {
                encoder
                    .write_image::<colortype::Gray8>(1, 1, &[0])
                    .expect("page");
            }
        }

        let slide = TiffSlide::open(&path).expect("open");
        assert_eq!(slide.pages().len(), MAX_PAGES);
        assert_eq!(slide.pages().last().map(|p| p.index), Some(MAX_PAGES - 1));
    }

    #[test]
    fn edge_chunk_stride_handles_padded_and_trimmed_data() {
        // 20x20 page in 16x16 tiles: the right-hand tile holds 4 columns of data.
        let page = layout(20, 20, (16, 16));
        let padded = Samples::U8(vec![0; 16 * 16]);
        let trimmed = Samples::U8(vec![0; 4 * 4]);
        assert_eq!(chunk_stride(&page, &padded, 4, 4, 3).unwrap(), 16);
        assert_eq!(chunk_stride(&page, &trimmed, 4, 4, 3).unwrap(), 4);

        let short = Samples::U8(vec![0; 7]);
        assert!(matches!(
            chunk_stride(&page, &short, 4, 4, 3),
            Err(ConversionError::SampleCount { chunk: 3, .. })
        ));
    }

    #[test]
    fn placement_copies_rows_into_band_columns() {
        // 2-row chunk, stride 4 (padded), 3 real columns placed at x0 = 2 of a 5-wide band.
        let src: Vec<u8> = (0..8).collect();
        let mut dst = vec![9u8; 5 * 2];
        Placement {
            band_width: 5,
            samples: 1,
            x0: 2,
            copy_width: 3,
            stride: 4,
            src_row: 0,
            dst_row: 0,
            rows: 2,
        }
        .copy(&mut dst, &src);
        assert_eq!(dst, vec![9, 9, 0, 1, 2, 9, 9, 4, 5, 6]);
    }
}
