//! Frame encoding: native little-endian frames or JPEG Baseline fragments.
//!
//! Frames are produced band by band: each call to [`FrameEncoder::push_band`]
//! receives a full-width strip of the page and appends its frames to a
//! [`FrameSink`].

use dicom::core::VR;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::source::{PagePixels, Samples};
use super::tiles;
use crate::config::Compression;
use crate::error::ConversionError;

/// Pixel Data payload ready to be placed in a data set.
#[derive(Debug, Clone)]
pub enum PixelPayload {
    /// All frames concatenated.
    Native { bytes: Vec<u8>, vr: VR },
    /// One fragment per frame.
    Encapsulated {
        offset_table: Vec<u32>,
        fragments: Vec<Vec<u8>>,
    },
}

#[derive(Debug, Clone)]
pub struct EncodedFrames {
    pub frame_count: u32,
    pub payload: PixelPayload,
}

/// Frames accumulated so far for one page.
#[derive(Debug)]
pub struct FrameSink {
    page: usize,
    frame_count: u32,
    payload: PixelPayload,
}

impl FrameSink {
    pub fn finish(self) -> EncodedFrames {
        let payload = match self.payload {
            PixelPayload::Native { mut bytes, vr } => {
                pad_even(&mut bytes);
                PixelPayload::Native { bytes, vr }
            }
            PixelPayload::Encapsulated { fragments, .. } => PixelPayload::Encapsulated {
                offset_table: basic_offset_table(&fragments),
                fragments,
            },
        };
        EncodedFrames {
            frame_count: self.frame_count,
            payload,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct FrameEncoder {
    pub tile_size: u32,
    pub compression: Compression,
    pub jpeg_quality: u8,
}

impl FrameEncoder {
    /// Start a page with the given bit depth.
    pub fn begin(&self, bits_allocated: u16, page: usize) -> Result<FrameSink, ConversionError> {
        let payload = match (self.compression, bits_allocated) {
            (Compression::None, 8) => PixelPayload::Native {
                bytes: Vec::new(),
                vr: VR::OB,
            },
            (Compression::None, _) => PixelPayload::Native {
                bytes: Vec::new(),
                vr: VR::OW,
            },
            (Compression::Jpeg, 8) => PixelPayload::Encapsulated {
                offset_table: Vec::new(),
                fragments: Vec::new(),
            },
            (Compression::Jpeg, bits) => {
                return Err(ConversionError::JpegBitDepth { page, bits })
            }
        };
        Ok(FrameSink {
            page,
            frame_count: 0,
            payload,
        })
    }

    /// Append the frames covering `band`. Every band but the last must be a
    /// whole number of tiles high; short bands are padded with white.
    pub fn push_band(&self, sink: &mut FrameSink, band: &PagePixels) -> Result<(), ConversionError> {
        let samples = band.samples_per_pixel as usize;
        let (width, height, tile) = (band.width, band.height, self.tile_size);
        let (columns, rows) = tiles::grid(width, height, tile);

        match (&band.samples, &mut sink.payload) {
            (Samples::U8(data), PixelPayload::Native { bytes, .. }) => {
                bytes.reserve(self.frame_len(samples, columns * rows));
                for frame in tiles::frames(data, width, height, samples, tile, u8::MAX) {
                    bytes.extend_from_slice(&frame);
                }
            }
            (Samples::U16(data), PixelPayload::Native { bytes, .. }) => {
                bytes.reserve(2 * self.frame_len(samples, columns * rows));
                for frame in tiles::frames(data, width, height, samples, tile, u16::MAX) {
                    bytes.extend(frame.into_iter().flat_map(u16::to_le_bytes));
                }
            }
            (Samples::U8(data), PixelPayload::Encapsulated { fragments, .. }) => {
                let color = if samples == 3 {
                    ExtendedColorType::Rgb8
                } else {
                    ExtendedColorType::L8
                };
                for frame in tiles::frames(data, width, height, samples, tile, u8::MAX) {
                    let mut fragment = Vec::new();
                    JpegEncoder::new_with_quality(&mut fragment, self.jpeg_quality)
                        .encode(&frame, tile, tile, color)?;
                    pad_even(&mut fragment);
                    fragments.push(fragment);
                }
            }
            (Samples::U16(_), PixelPayload::Encapsulated { .. }) => {
                return Err(ConversionError::JpegBitDepth {
                    page: sink.page,
                    bits: 16,
                })
            }
        }

        sink.frame_count += columns * rows;
        Ok(())
    }

    fn frame_len(&self, samples: usize, frame_count: u32) -> usize {
        (self.tile_size as usize).pow(2) * samples * frame_count as usize
    }
}

/// Item offsets relative to the first fragment. Empty when they would not fit in 32 bits.
pub fn basic_offset_table(fragments: &[Vec<u8>]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(fragments.len());
    let mut position: u32 = 0;
    for fragment in fragments {
        offsets.push(position);
        // 8 bytes of item tag + length precede each fragment.
        let step = u32::try_from(fragment.len())
            .ok()
            .and_then(|len| len.checked_add(8));
        match step.and_then(|s| position.checked_add(s)) {
            Some(next) => position = next,
            None => return Vec::new(),
        }
    }
    offsets
}

fn pad_even(bytes: &mut Vec<u8>) {
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
}
