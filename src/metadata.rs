use dicom::core::dictionary::{DataDictionary, TagRange};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom_dictionary_std::tags;
use tracing::warn;

use crate::config::KEY_ATTRIBUTES;
use crate::error::ConfigurationError;

/// Attributes the converter always computes itself; user values for these are dropped.
const PROTECTED_TAGS: &[Tag] = &[
    tags::SOP_CLASS_UID,
    tags::SOP_INSTANCE_UID,
    tags::STUDY_INSTANCE_UID,
    tags::SERIES_INSTANCE_UID,
    tags::IMAGE_TYPE,
    tags::INSTANCE_NUMBER,
    tags::NUMBER_OF_FRAMES,
    tags::DIMENSION_ORGANIZATION_TYPE,
    tags::TOTAL_PIXEL_MATRIX_COLUMNS,
    tags::TOTAL_PIXEL_MATRIX_ROWS,
    tags::LOSSY_IMAGE_COMPRESSION,
    tags::LOSSY_IMAGE_COMPRESSION_METHOD,
];

/// Turn `Attributes` entries (standard keyword -> text) into data elements.
///
/// Unknown keywords and binary/sequence VRs are configuration errors. Keywords
/// that would clash with computed attributes are skipped with a warning.
pub fn resolve_attributes(
    attributes: &[(String, String)],
) -> Result<Vec<InMemElement>, ConfigurationError> {
    let dict = StandardDataDictionary;
    let mut elements = Vec::with_capacity(attributes.len());

    for (keyword, text) in attributes {
        let entry = dict
            .by_name(keyword)
            .ok_or_else(|| invalid(format!("`{}` is not a standard attribute keyword", keyword)))?;

        let tag = match entry.tag {
            TagRange::Single(tag) => tag,
            _ => return Err(invalid(format!("`{}` names a tag range", keyword))),
        };
        if is_protected(tag) {
            warn!("Ignoring configured {}: computed by the converter", keyword);
            continue;
        }

        let vr = entry.vr.relaxed();
        let value = primitive_for(vr, text).ok_or_else(|| {
            invalid(format!("`{}` ({}) cannot hold the value {:?}", keyword, vr, text))
        })?;
        elements.push(DataElement::new(tag, vr, value));
    }

    Ok(elements)
}

fn is_protected(tag: Tag) -> bool {
    // Image pixel module and pixel data are always derived from the source.
    tag.group() == 0x0028 || tag.group() == 0x7FE0 || PROTECTED_TAGS.contains(&tag)
}

fn primitive_for(vr: VR, text: &str) -> Option<PrimitiveValue> {
    match vr {
        VR::AE
        | VR::AS
        | VR::CS
        | VR::DA
        | VR::DS
        | VR::DT
        | VR::IS
        | VR::LO
        | VR::LT
        | VR::PN
        | VR::SH
        | VR::ST
        | VR::TM
        | VR::UC
        | VR::UI
        | VR::UR
        | VR::UT => Some(PrimitiveValue::from(text)),
        VR::US => text.trim().parse::<u16>().ok().map(PrimitiveValue::from),
        VR::SS => text.trim().parse::<i16>().ok().map(PrimitiveValue::from),
        VR::UL => text.trim().parse::<u32>().ok().map(PrimitiveValue::from),
        VR::SL => text.trim().parse::<i32>().ok().map(PrimitiveValue::from),
        VR::FL => text.trim().parse::<f32>().ok().map(PrimitiveValue::from),
        VR::FD => text.trim().parse::<f64>().ok().map(PrimitiveValue::from),
        _ => None,
    }
}

fn invalid(message: String) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: KEY_ATTRIBUTES,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keywords_resolve_to_tags_and_vrs() {
        let elements = resolve_attributes(&attrs(&[
            ("PatientID", "P-001"),
            ("PatientName", "Doe^Jane"),
            ("SeriesNumber", "3"),
        ]))
        .expect("resolve");

        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].header().tag, tags::PATIENT_ID);
        assert_eq!(elements[0].header().vr, VR::LO);
        assert_eq!(elements[1].header().vr, VR::PN);
        assert_eq!(elements[2].header().vr, VR::IS);
        assert_eq!(elements[0].to_str().unwrap(), "P-001");
    }

    #[test]
    fn unknown_keywords_are_errors() {
        assert!(resolve_attributes(&attrs(&[("NotARealKeyword", "x")])).is_err());
    }

    #[test]
    fn computed_attributes_are_skipped() {
        let elements = resolve_attributes(&attrs(&[
            ("Rows", "10"),
            ("SOPInstanceUID", "1.2.3"),
            ("StudyDescription", "Biopsy"),
        ]))
        .expect("resolve");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].header().tag, tags::STUDY_DESCRIPTION);
    }

    #[test]
    fn numeric_vrs_are_parsed() {
        assert!(primitive_for(VR::US, "12").is_some());
        assert!(primitive_for(VR::US, "-1").is_none());
        assert!(primitive_for(VR::FD, "0.25").is_some());
        assert!(primitive_for(VR::SQ, "x").is_none());
    }
}
