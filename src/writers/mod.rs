//! DICOM object builders, one per output kind, plus the shared element
//! helpers and the per-export identifier context.

pub mod dose;
pub mod image;
pub mod plan;
pub mod structure;

use std::path::Path;

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;

use crate::archive::PatientInfo;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("structure {0:?} has no usable display color")]
    InvalidStructureColor(String),

    #[error("building DICOM file meta table: {0}")]
    Meta(String),

    #[error("writing DICOM object: {0}")]
    Write(#[from] dicom::object::WriteError),
}

/// Identifiers shared by all four outputs of one export, so the objects
/// reference a common study and frame of reference. Always freshly
/// generated; identifiers from the source archive are never reused here.
#[derive(Debug, Clone)]
pub struct StudyContext {
    pub study_uid: String,
    pub frame_of_reference_uid: String,
    pub patient: PatientInfo,
}

impl StudyContext {
    pub fn new(patient: PatientInfo) -> Self {
        Self {
            study_uid: new_uid(),
            frame_of_reference_uid: new_uid(),
            patient,
        }
    }
}

/// Fresh DICOM UID in the UUID-derived `2.25.<decimal>` form.
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Current UTC timestamp as DICOM DA and TM strings.
pub(crate) fn now_da_tm() -> (String, String) {
    let now = OffsetDateTime::now_utc();
    let date = now
        .format(format_description!("[year][month][day]"))
        .unwrap_or_default();
    let time = now
        .format(format_description!("[hour][minute][second]"))
        .unwrap_or_default();
    (date, time)
}

pub(crate) fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

pub(crate) fn put_u16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

/// Integer-string element.
pub(crate) fn put_is(obj: &mut InMemDicomObject, tag: Tag, value: i64) {
    put_str(obj, tag, VR::IS, &value.to_string());
}

/// Decimal-string element; multiple values join with the standard
/// backslash separator.
pub(crate) fn put_ds(obj: &mut InMemDicomObject, tag: Tag, values: &[f64]) {
    let text = values.iter().map(|v| format_ds(*v)).collect::<Vec<_>>().join("\\");
    put_str(obj, tag, VR::DS, &text);
}

pub(crate) fn put_seq(obj: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    obj.put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
}

pub(crate) fn put_pixel_data(obj: &mut InMemDicomObject, bytes: Vec<u8>) {
    obj.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::from(bytes),
    ));
}

/// Patient module with the caller's placeholder defaults.
pub(crate) fn put_patient(
    obj: &mut InMemDicomObject,
    patient: &PatientInfo,
    default_name: &str,
    default_id: &str,
    default_sex: &str,
) {
    put_str(
        obj,
        tags::PATIENT_NAME,
        VR::PN,
        patient.name.as_deref().unwrap_or(default_name),
    );
    put_str(
        obj,
        tags::PATIENT_ID,
        VR::LO,
        patient.id.as_deref().unwrap_or(default_id),
    );
    put_str(
        obj,
        tags::PATIENT_BIRTH_DATE,
        VR::DA,
        patient.birth_date.as_deref().unwrap_or(""),
    );
    put_str(
        obj,
        tags::PATIENT_SEX,
        VR::CS,
        patient.sex.as_deref().unwrap_or(default_sex),
    );
}

/// Attach file meta information and write the object as Explicit VR Little
/// Endian.
pub(crate) fn write_object(
    obj: InMemDicomObject,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    path: &Path,
) -> Result<(), WriteError> {
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(sop_class_uid)
        .media_storage_sop_instance_uid(sop_instance_uid)
        .build()
        .map_err(|err| WriteError::Meta(err.to_string()))?;
    obj.with_exact_meta(meta).write_to_file(path)?;
    Ok(())
}

/// DS values are capped at sixteen characters; shorten the shortest
/// round-trip form when it runs over.
fn format_ds(value: f64) -> String {
    let text = format!("{value}");
    if text.len() <= 16 {
        return text;
    }
    let text = format!("{value:.8e}");
    if text.len() <= 16 {
        return text;
    }
    format!("{value:.4e}")
}
