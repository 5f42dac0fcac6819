//! Builds VL Whole Slide Microscopy Image data sets and writes them as Part 10 files.

use std::path::Path;

use chrono::NaiveDateTime;
use dicom::core::value::{DataSetSequence, PixelFragmentSequence, Value};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, JPEG_BASELINE};
use dicom_dictionary_std::tags;

use super::encode::{EncodedFrames, PixelPayload};
use super::source::{ImageFlavor, PageInfo, PageLayout, Spacing};
use crate::config::Compression;
use crate::error::ConversionError;

/// VL Whole Slide Microscopy Image Storage.
pub const VL_WSI_SOP_CLASS_UID: &str = "1.2.840.10008.5.1.4.1.1.77.1.6";

/// Nominal section thickness, in micrometres.
pub const SECTION_THICKNESS_UM: f64 = 1.0;

/// Identifiers shared by every instance of one slide.
#[derive(Debug, Clone)]
pub struct SlideIdentity {
    pub study_uid: String,
    pub series_uid: String,
    pub frame_of_reference_uid: String,
    pub dimension_organization_uid: String,
    pub specimen_uid: String,
    pub container_identifier: String,
}

/// Identity and layout of one instance.
#[derive(Debug, Clone)]
pub struct InstanceContext<'a> {
    pub slide: &'a SlideIdentity,
    pub sop_instance_uid: String,
    pub instance_number: usize,
    /// Position among the volume pages; `None` for label and overview images.
    pub volume_level: Option<usize>,
    pub page: &'a PageInfo,
    pub acquired: NaiveDateTime,
    pub pixel_spacing: Spacing,
    pub tile_size: u32,
    pub compression: Compression,
    /// Configured attributes, applied before the computed ones.
    pub extra: &'a [InMemElement],
}

impl InstanceContext<'_> {
    pub fn transfer_syntax_uid(&self) -> &'static str {
        match self.compression {
            Compression::None => EXPLICIT_VR_LITTLE_ENDIAN.uid(),
            Compression::Jpeg => JPEG_BASELINE.uid(),
        }
    }

    fn image_type(&self) -> [&'static str; 4] {
        match (self.page.flavor, self.volume_level) {
            (ImageFlavor::Volume, Some(0)) | (ImageFlavor::Volume, None) => {
                ["ORIGINAL", "PRIMARY", "VOLUME", "NONE"]
            }
            (ImageFlavor::Volume, Some(_)) => ["DERIVED", "PRIMARY", "VOLUME", "RESAMPLED"],
            (ImageFlavor::Label, _) => ["ORIGINAL", "PRIMARY", "LABEL", "NONE"],
            (ImageFlavor::Overview, _) => ["ORIGINAL", "PRIMARY", "OVERVIEW", "NONE"],
        }
    }
}

/// Assemble the data set for one page.
pub fn build_instance(
    ctx: &InstanceContext<'_>,
    layout: &PageLayout,
    frames: EncodedFrames,
) -> InMemDicomObject<StandardDataDictionary> {
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    let slide = ctx.slide;

    // Type 2 attributes start empty; configured values may fill them in.
    for (tag, vr) in [
        (tags::PATIENT_NAME, VR::PN),
        (tags::PATIENT_ID, VR::LO),
        (tags::PATIENT_BIRTH_DATE, VR::DA),
        (tags::PATIENT_SEX, VR::CS),
        (tags::REFERRING_PHYSICIAN_NAME, VR::PN),
        (tags::STUDY_ID, VR::SH),
        (tags::ACCESSION_NUMBER, VR::SH),
        (tags::MANUFACTURER, VR::LO),
        (tags::POSITION_REFERENCE_INDICATOR, VR::LO),
    ] {
        put_str(&mut obj, tag, vr, "");
    }
    put_str(&mut obj, tags::SERIES_NUMBER, VR::IS, "1");

    let date = ctx.acquired.format("%Y%m%d").to_string();
    let time = ctx.acquired.format("%H%M%S").to_string();
    put_str(&mut obj, tags::STUDY_DATE, VR::DA, &date);
    put_str(&mut obj, tags::STUDY_TIME, VR::TM, &time);
    put_str(&mut obj, tags::CONTENT_DATE, VR::DA, &date);
    put_str(&mut obj, tags::CONTENT_TIME, VR::TM, &time);
    put_str(
        &mut obj,
        tags::ACQUISITION_DATE_TIME,
        VR::DT,
        &format!("{}{}", date, time),
    );

    // Specimen module
    put_str(
        &mut obj,
        tags::CONTAINER_IDENTIFIER,
        VR::LO,
        &slide.container_identifier,
    );
    put_sequence(&mut obj, tags::ISSUER_OF_THE_CONTAINER_IDENTIFIER_SEQUENCE, Vec::new());
    put_sequence(
        &mut obj,
        tags::CONTAINER_TYPE_CODE_SEQUENCE,
        vec![code_item("433466003", "SCT", "Microscope slide")],
    );
    put_sequence(
        &mut obj,
        tags::SPECIMEN_DESCRIPTION_SEQUENCE,
        vec![InMemDicomObject::from_element_iter([
            str_element(tags::SPECIMEN_IDENTIFIER, VR::LO, &slide.container_identifier),
            str_element(tags::SPECIMEN_UID, VR::UI, &slide.specimen_uid),
            sequence_element(tags::ISSUER_OF_THE_SPECIMEN_IDENTIFIER_SEQUENCE, Vec::new()),
            sequence_element(tags::SPECIMEN_PREPARATION_SEQUENCE, Vec::new()),
        ])],
    );

    for element in ctx.extra {
        obj.put(element.clone());
    }

    // Identification
    put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, VL_WSI_SOP_CLASS_UID);
    put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &ctx.sop_instance_uid);
    put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, &slide.study_uid);
    put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &slide.series_uid);
    put_str(
        &mut obj,
        tags::FRAME_OF_REFERENCE_UID,
        VR::UI,
        &slide.frame_of_reference_uid,
    );
    put_str(&mut obj, tags::MODALITY, VR::CS, "SM");
    put_str(
        &mut obj,
        tags::INSTANCE_NUMBER,
        VR::IS,
        &ctx.instance_number.to_string(),
    );
    let image_type = ctx.image_type();
    put_strs(&mut obj, tags::IMAGE_TYPE, VR::CS, &image_type);

    // Whole slide microscopy image module
    let is_label = ctx.page.flavor == ImageFlavor::Label;
    let shows_label = ctx.page.flavor != ImageFlavor::Volume;
    let spacing = ctx.pixel_spacing;
    put_str(&mut obj, tags::BURNED_IN_ANNOTATION, VR::CS, yes_no(is_label));
    put_str(&mut obj, tags::SPECIMEN_LABEL_IN_IMAGE, VR::CS, yes_no(shows_label));
    put_str(&mut obj, tags::VOLUMETRIC_PROPERTIES, VR::CS, "VOLUME");
    put_str(&mut obj, tags::FOCUS_METHOD, VR::CS, "AUTO");
    put_str(&mut obj, tags::EXTENDED_DEPTH_OF_FIELD, VR::CS, "NO");
    put_f32(
        &mut obj,
        tags::IMAGED_VOLUME_WIDTH,
        (layout.width as f64 * spacing.x_mm) as f32,
    );
    put_f32(
        &mut obj,
        tags::IMAGED_VOLUME_HEIGHT,
        (layout.height as f64 * spacing.y_mm) as f32,
    );
    put_f32(&mut obj, tags::IMAGED_VOLUME_DEPTH, SECTION_THICKNESS_UM as f32);
    put_strs(
        &mut obj,
        tags::IMAGE_ORIENTATION_SLIDE,
        VR::DS,
        &["0", "-1", "0", "-1", "0", "0"],
    );
    put_sequence(
        &mut obj,
        tags::TOTAL_PIXEL_MATRIX_ORIGIN_SEQUENCE,
        vec![InMemDicomObject::from_element_iter([
            str_element(tags::X_OFFSET_IN_SLIDE_COORDINATE_SYSTEM, VR::DS, "0"),
            str_element(tags::Y_OFFSET_IN_SLIDE_COORDINATE_SYSTEM, VR::DS, "0"),
        ])],
    );
    put_str(&mut obj, tags::DIMENSION_ORGANIZATION_TYPE, VR::CS, "TILED_FULL");
    put_sequence(
        &mut obj,
        tags::DIMENSION_ORGANIZATION_SEQUENCE,
        vec![InMemDicomObject::from_element_iter([str_element(
            tags::DIMENSION_ORGANIZATION_UID,
            VR::UI,
            &slide.dimension_organization_uid,
        )])],
    );
    put_u32(&mut obj, tags::TOTAL_PIXEL_MATRIX_COLUMNS, layout.width);
    put_u32(&mut obj, tags::TOTAL_PIXEL_MATRIX_ROWS, layout.height);
    put_u32(&mut obj, tags::TOTAL_PIXEL_MATRIX_FOCAL_PLANES, 1);
    put_u32(&mut obj, tags::NUMBER_OF_OPTICAL_PATHS, 1);
    put_str(
        &mut obj,
        tags::NUMBER_OF_FRAMES,
        VR::IS,
        &frames.frame_count.to_string(),
    );

    // Optical path module
    put_sequence(
        &mut obj,
        tags::OPTICAL_PATH_SEQUENCE,
        vec![InMemDicomObject::from_element_iter([
            str_element(tags::OPTICAL_PATH_IDENTIFIER, VR::SH, "1"),
            sequence_element(
                tags::ILLUMINATION_TYPE_CODE_SEQUENCE,
                vec![code_item("111744", "DCM", "Brightfield illumination")],
            ),
            sequence_element(
                tags::ILLUMINATION_COLOR_CODE_SEQUENCE,
                vec![code_item("414298005", "SCT", "Full Spectrum")],
            ),
        ])],
    );

    // Multi-frame functional groups: everything is shared across frames.
    put_sequence(
        &mut obj,
        tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
        vec![InMemDicomObject::from_element_iter([
            sequence_element(
                tags::PIXEL_MEASURES_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([
                    strs_element(
                        tags::PIXEL_SPACING,
                        VR::DS,
                        &[&format_ds(spacing.y_mm), &format_ds(spacing.x_mm)],
                    ),
                    str_element(
                        tags::SLICE_THICKNESS,
                        VR::DS,
                        &format_ds(SECTION_THICKNESS_UM / 1000.0),
                    ),
                ])],
            ),
            sequence_element(
                tags::WHOLE_SLIDE_MICROSCOPY_IMAGE_FRAME_TYPE_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([strs_element(
                    tags::FRAME_TYPE,
                    VR::CS,
                    &image_type,
                )])],
            ),
            sequence_element(
                tags::OPTICAL_PATH_IDENTIFICATION_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([str_element(
                    tags::OPTICAL_PATH_IDENTIFIER,
                    VR::SH,
                    "1",
                )])],
            ),
        ])],
    );

    // Image pixel module
    let bits = layout.bits_allocated;
    let photometric = match (layout.samples_per_pixel, ctx.compression) {
        (1, _) => "MONOCHROME2",
        (_, Compression::None) => "RGB",
        // Baseline frames from the encoder are not chroma subsampled.
        (_, Compression::Jpeg) => "YBR_FULL",
    };
    put_u16(&mut obj, tags::SAMPLES_PER_PIXEL, layout.samples_per_pixel);
    put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, photometric);
    if layout.samples_per_pixel > 1 {
        put_u16(&mut obj, tags::PLANAR_CONFIGURATION, 0);
    }
    put_u16(&mut obj, tags::ROWS, ctx.tile_size as u16);
    put_u16(&mut obj, tags::COLUMNS, ctx.tile_size as u16);
    put_u16(&mut obj, tags::BITS_ALLOCATED, bits);
    put_u16(&mut obj, tags::BITS_STORED, bits);
    put_u16(&mut obj, tags::HIGH_BIT, bits - 1);
    put_u16(&mut obj, tags::PIXEL_REPRESENTATION, 0);

    match ctx.compression {
        Compression::None => put_str(&mut obj, tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "00"),
        Compression::Jpeg => {
            put_str(&mut obj, tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "01");
            put_str(
                &mut obj,
                tags::LOSSY_IMAGE_COMPRESSION_METHOD,
                VR::CS,
                "ISO_10918_1",
            );
        }
    }

    match frames.payload {
        PixelPayload::Native { bytes, vr } => {
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                vr,
                PrimitiveValue::from(bytes),
            ));
        }
        PixelPayload::Encapsulated {
            offset_table,
            fragments,
        } => {
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                Value::PixelSequence(PixelFragmentSequence::new(offset_table, fragments)),
            ));
        }
    }

    obj
}

/// Wrap the data set with a file meta group and write it to `path`.
pub fn write_instance(
    obj: InMemDicomObject<StandardDataDictionary>,
    ctx: &InstanceContext<'_>,
    path: &Path,
) -> Result<(), ConversionError> {
    let file_meta = FileMetaTableBuilder::new()
        .transfer_syntax(ctx.transfer_syntax_uid())
        .media_storage_sop_class_uid(VL_WSI_SOP_CLASS_UID)
        .media_storage_sop_instance_uid(ctx.sop_instance_uid.as_str())
        .build()?;

    let mut file_obj =
        FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, file_meta);
    for elem in obj {
        file_obj.put(elem);
    }

    file_obj
        .write_to_file(path)
        .map_err(|source| ConversionError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Decimal string of at most 16 characters, without trailing zeros.
fn format_ds(value: f64) -> String {
    let mut text = format!("{:.10}", value);
    text.truncate(16);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn str_element(tag: Tag, vr: VR, value: &str) -> InMemElement {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

fn strs_element(tag: Tag, vr: VR, values: &[&str]) -> InMemElement {
    DataElement::new(
        tag,
        vr,
        PrimitiveValue::Strs(values.iter().map(|s| s.to_string()).collect()),
    )
}

fn sequence_element(
    tag: Tag,
    items: Vec<InMemDicomObject<StandardDataDictionary>>,
) -> InMemElement {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

fn code_item(value: &str, scheme: &str, meaning: &str) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::from_element_iter([
        str_element(tags::CODE_VALUE, VR::SH, value),
        str_element(tags::CODING_SCHEME_DESIGNATOR, VR::SH, scheme),
        str_element(tags::CODE_MEANING, VR::LO, meaning),
    ])
}

fn put_str(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, vr: VR, value: &str) {
    obj.put(str_element(tag, vr, value));
}

fn put_strs(
    obj: &mut InMemDicomObject<StandardDataDictionary>,
    tag: Tag,
    vr: VR,
    values: &[&str],
) {
    obj.put(strs_element(tag, vr, values));
}

fn put_sequence(
    obj: &mut InMemDicomObject<StandardDataDictionary>,
    tag: Tag,
    items: Vec<InMemDicomObject<StandardDataDictionary>>,
) {
    obj.put(sequence_element(tag, items));
}

fn put_u16(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

fn put_u32(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, value: u32) {
    obj.put(DataElement::new(tag, VR::UL, PrimitiveValue::from(value)));
}

fn put_f32(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, value: f32) {
    obj.put(DataElement::new(tag, VR::FL, PrimitiveValue::from(value)));
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::source::parse_tiff_datetime;
    use dicom::object::open_file;
    use tempfile::tempdir;

    fn page(flavor: ImageFlavor) -> PageInfo {
        PageInfo {
            index: 0,
            width: 20,
            height: 10,
            flavor,
            description: None,
            acquired: None,
            pixel_spacing: None,
        }
    }

    fn layout() -> PageLayout {
        PageLayout::single_chunk(0, 20, 10, 3, 8)
    }

    fn slide() -> SlideIdentity {
        SlideIdentity {
            study_uid: "1.2.3".to_string(),
            series_uid: "1.2.3.4".to_string(),
            frame_of_reference_uid: "1.2.3.5".to_string(),
            dimension_organization_uid: "1.2.3.6".to_string(),
            specimen_uid: "1.2.3.7".to_string(),
            container_identifier: "case42".to_string(),
        }
    }

    fn context<'a>(
        slide: &'a SlideIdentity,
        page: &'a PageInfo,
        level: Option<usize>,
    ) -> InstanceContext<'a> {
        InstanceContext {
            slide,
            sop_instance_uid: "1.2.3.4.5".to_string(),
            instance_number: 2,
            volume_level: level,
            page,
            acquired: parse_tiff_datetime("2024:03:01 12:00:00").expect("datetime"),
            pixel_spacing: Spacing {
                x_mm: 0.0005,
                y_mm: 0.00025,
            },
            tile_size: 16,
            compression: Compression::None,
            extra: &[],
        }
    }

    fn frames() -> EncodedFrames {
        EncodedFrames {
            frame_count: 2,
            payload: PixelPayload::Native {
                bytes: vec![0; 2 * 16 * 16 * 3],
                vr: VR::OB,
            },
        }
    }

    #[test]
    fn image_type_tracks_level_and_flavor() {
        let slide = slide();
        let volume = page(ImageFlavor::Volume);
        assert_eq!(context(&slide, &volume, Some(0)).image_type()[0], "ORIGINAL");
        assert_eq!(context(&slide, &volume, Some(2)).image_type()[3], "RESAMPLED");
        let label = page(ImageFlavor::Label);
        assert_eq!(context(&slide, &label, None).image_type()[2], "LABEL");
    }

    #[test]
    fn decimal_strings_fit_the_vr() {
        assert_eq!(format_ds(0.0005), "0.0005");
        assert_eq!(format_ds(0.001), "0.001");
        assert_eq!(format_ds(25.4), "25.4");
        assert_eq!(format_ds(0.0), "0");
        assert!(format_ds(123456.123456789).len() <= 16);
    }

    #[test]
    fn written_instance_round_trips() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("level.dcm");
        let slide = slide();
        let info = page(ImageFlavor::Volume);
        let ctx = context(&slide, &info, Some(1));

        let obj = build_instance(&ctx, &layout(), frames());
        write_instance(obj, &ctx, &path).expect("write");

        let read = open_file(&path).expect("open");
        assert_eq!(
            read.meta().media_storage_sop_class_uid.trim_end_matches('\0'),
            VL_WSI_SOP_CLASS_UID
        );
        let text = |tag| {
            read.element(tag)
                .expect("element")
                .to_str()
                .unwrap()
                .trim()
                .to_string()
        };
        assert_eq!(text(tags::MODALITY), "SM");
        assert_eq!(text(tags::NUMBER_OF_FRAMES), "2");
        assert_eq!(text(tags::PHOTOMETRIC_INTERPRETATION), "RGB");
        assert_eq!(text(tags::CONTENT_DATE), "20240301");
        assert_eq!(text(tags::CONTENT_TIME), "120000");
        assert_eq!(text(tags::ACQUISITION_DATE_TIME), "20240301120000");
        assert_eq!(text(tags::DIMENSION_ORGANIZATION_TYPE), "TILED_FULL");
        assert_eq!(text(tags::CONTAINER_IDENTIFIER), "case42");
        assert_eq!(
            read.element(tags::TOTAL_PIXEL_MATRIX_COLUMNS)
                .expect("columns")
                .to_int::<u32>()
                .unwrap(),
            20
        );

        let width = read
            .element(tags::IMAGED_VOLUME_WIDTH)
            .expect("width")
            .to_float32()
            .unwrap();
        assert!((width - 0.01).abs() < 1e-6);
        let height = read
            .element(tags::IMAGED_VOLUME_HEIGHT)
            .expect("height")
            .to_float32()
            .unwrap();
        assert!((height - 0.0025).abs() < 1e-6);

        let items = |tag| {
            read.element(tag)
                .expect("sequence")
                .items()
                .expect("items")
                .to_vec()
        };
        let optical = items(tags::OPTICAL_PATH_SEQUENCE);
        assert_eq!(optical.len(), 1);
        assert_eq!(
            optical[0]
                .element(tags::OPTICAL_PATH_IDENTIFIER)
                .unwrap()
                .to_str()
                .unwrap()
                .trim(),
            "1"
        );

        let specimen = items(tags::SPECIMEN_DESCRIPTION_SEQUENCE);
        assert_eq!(
            specimen[0]
                .element(tags::SPECIMEN_UID)
                .unwrap()
                .to_str()
                .unwrap()
                .trim_end_matches('\0'),
            "1.2.3.7"
        );

        let dimension = items(tags::DIMENSION_ORGANIZATION_SEQUENCE);
        assert_eq!(
            dimension[0]
                .element(tags::DIMENSION_ORGANIZATION_UID)
                .unwrap()
                .to_str()
                .unwrap()
                .trim_end_matches('\0'),
            "1.2.3.6"
        );

        let shared = items(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE);
        let measures = shared[0]
            .element(tags::PIXEL_MEASURES_SEQUENCE)
            .unwrap()
            .items()
            .unwrap()
            .to_vec();
        assert_eq!(
            measures[0]
                .element(tags::PIXEL_SPACING)
                .unwrap()
                .to_multi_float64()
                .unwrap(),
            vec![0.00025, 0.0005]
        );
        let frame_type = shared[0]
            .element(tags::WHOLE_SLIDE_MICROSCOPY_IMAGE_FRAME_TYPE_SEQUENCE)
            .unwrap()
            .items()
            .unwrap()
            .to_vec();
        assert_eq!(
            frame_type[0]
                .element(tags::FRAME_TYPE)
                .unwrap()
                .to_multi_str()
                .unwrap()[3],
            "RESAMPLED"
        );
    }

    #[test]
    fn jpeg_color_frames_are_ybr_full() {
        let slide = slide();
        let info = page(ImageFlavor::Volume);
        let mut ctx = context(&slide, &info, Some(0));
        ctx.compression = Compression::Jpeg;
        let frames = EncodedFrames {
            frame_count: 1,
            payload: PixelPayload::Encapsulated {
                offset_table: vec![0],
                fragments: vec![vec![0xFF, 0xD8, 0xFF, 0xD9]],
            },
        };

        let obj = build_instance(&ctx, &layout(), frames);
        assert_eq!(
            obj.element(tags::PHOTOMETRIC_INTERPRETATION)
                .unwrap()
                .to_str()
                .unwrap(),
            "YBR_FULL"
        );
    }
}
