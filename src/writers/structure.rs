use std::path::Path;

use dicom::core::VR;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::{tags, uids};
use tracing::info;

use crate::structures::StructureRoi;

use super::{
    StudyContext, WriteError, new_uid, now_da_tm, put_ds, put_is, put_patient, put_seq, put_str,
    write_object,
};

/// Write the structures as an RT Structure Set and return its SOP instance
/// uid. Contour coordinates convert to mm here; each loop becomes one
/// closed planar contour with a flat coordinate list.
///
/// # Errors
///
/// `InvalidStructureColor` when a structure reaches assembly without a
/// usable display color.
pub fn write_structure_set(
    structures: &[StructureRoi],
    ctx: &StudyContext,
    path: &Path,
) -> Result<String, WriteError> {
    let sop_uid = new_uid();
    let (date, time) = now_da_tm();
    let mut obj = InMemDicomObject::new_empty();

    put_str(
        &mut obj,
        tags::SOP_CLASS_UID,
        VR::UI,
        uids::RT_STRUCTURE_SET_STORAGE,
    );
    put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_uid);
    put_str(&mut obj, tags::MODALITY, VR::CS, "RTSTRUCT");
    put_patient(&mut obj, &ctx.patient, "DOE^John", "00000000", "");
    put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, &ctx.study_uid);
    put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &new_uid());
    put_str(
        &mut obj,
        tags::FRAME_OF_REFERENCE_UID,
        VR::UI,
        &ctx.frame_of_reference_uid,
    );
    put_str(&mut obj, tags::SERIES_DESCRIPTION, VR::LO, "Structure Set");
    put_str(&mut obj, tags::STRUCTURE_SET_LABEL, VR::SH, "");
    put_str(&mut obj, tags::STRUCTURE_SET_DATE, VR::DA, &date);
    put_str(&mut obj, tags::STRUCTURE_SET_TIME, VR::TM, &time);

    let mut frame_item = InMemDicomObject::new_empty();
    put_str(
        &mut frame_item,
        tags::FRAME_OF_REFERENCE_UID,
        VR::UI,
        &ctx.frame_of_reference_uid,
    );
    put_seq(
        &mut obj,
        tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
        vec![frame_item],
    );

    let mut roi_items = Vec::with_capacity(structures.len());
    let mut contour_items = Vec::with_capacity(structures.len());
    let mut observation_items = Vec::with_capacity(structures.len());

    for (index, structure) in structures.iter().enumerate() {
        let number = (index + 1) as i64;
        let (red, green, blue) = structure
            .color
            .ok_or_else(|| WriteError::InvalidStructureColor(structure.name.clone()))?;

        let mut roi_item = InMemDicomObject::new_empty();
        put_is(&mut roi_item, tags::ROI_NUMBER, number);
        put_str(
            &mut roi_item,
            tags::REFERENCED_FRAME_OF_REFERENCE_UID,
            VR::UI,
            &ctx.frame_of_reference_uid,
        );
        put_str(&mut roi_item, tags::ROI_NAME, VR::LO, &structure.name);
        roi_items.push(roi_item);

        let mut contour_item = InMemDicomObject::new_empty();
        put_is(&mut contour_item, tags::REFERENCED_ROI_NUMBER, number);
        put_str(
            &mut contour_item,
            tags::ROI_DISPLAY_COLOR,
            VR::IS,
            &format!("{red}\\{green}\\{blue}"),
        );
        let contours = structure
            .loops
            .iter()
            .map(|points| contour_of(points))
            .collect();
        put_seq(&mut contour_item, tags::CONTOUR_SEQUENCE, contours);
        contour_items.push(contour_item);

        let mut observation_item = InMemDicomObject::new_empty();
        put_is(&mut observation_item, tags::OBSERVATION_NUMBER, number);
        put_is(&mut observation_item, tags::REFERENCED_ROI_NUMBER, number);
        put_str(
            &mut observation_item,
            tags::RTROI_INTERPRETED_TYPE,
            VR::CS,
            "ORGAN",
        );
        observation_items.push(observation_item);
    }

    put_seq(&mut obj, tags::STRUCTURE_SET_ROI_SEQUENCE, roi_items);
    put_seq(&mut obj, tags::ROI_CONTOUR_SEQUENCE, contour_items);
    put_seq(&mut obj, tags::RTROI_OBSERVATIONS_SEQUENCE, observation_items);

    write_object(obj, uids::RT_STRUCTURE_SET_STORAGE, &sop_uid, path)?;
    info!(structures = structures.len(), "RT Structure Set written");
    Ok(sop_uid)
}

fn contour_of(points: &[[f64; 3]]) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_str(&mut item, tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, "CLOSED_PLANAR");
    put_is(&mut item, tags::NUMBER_OF_CONTOUR_POINTS, points.len() as i64);
    let flat: Vec<f64> = points
        .iter()
        .flat_map(|p| p.iter().map(|coordinate| coordinate * 10.0))
        .collect();
    put_ds(&mut item, tags::CONTOUR_DATA, &flat);
    item
}
