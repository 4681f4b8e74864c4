use std::path::Path;

use dicom::core::VR;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::{tags, uids};
use tracing::info;

use crate::plan::PlanData;

use super::{
    StudyContext, WriteError, new_uid, now_da_tm, put_ds, put_is, put_patient, put_seq, put_str,
    write_object,
};

/// Write the plan description as an RT Plan and return its SOP instance
/// uid. Optional blocks (prescription, fraction group, beam, patient
/// setup, structure-set reference) appear only when their fields are
/// present.
pub fn write_plan(
    plan: &PlanData,
    ctx: &StudyContext,
    structure_set_sop_uid: Option<&str>,
    path: &Path,
) -> Result<String, WriteError> {
    let sop_uid = new_uid();
    let (date, time) = now_da_tm();
    let mut obj = InMemDicomObject::new_empty();

    put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::RT_PLAN_STORAGE);
    put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_uid);
    put_str(&mut obj, tags::MODALITY, VR::CS, "RTPLAN");
    put_patient(&mut obj, &ctx.patient, "DOE^John", "00000000", "");
    put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, &ctx.study_uid);
    put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &new_uid());
    put_str(
        &mut obj,
        tags::FRAME_OF_REFERENCE_UID,
        VR::UI,
        &ctx.frame_of_reference_uid,
    );
    put_str(&mut obj, tags::STUDY_DATE, VR::DA, &date);
    put_str(&mut obj, tags::STUDY_TIME, VR::TM, &time);
    put_str(&mut obj, tags::STUDY_DESCRIPTION, VR::LO, "");
    put_str(
        &mut obj,
        tags::SERIES_DESCRIPTION,
        VR::LO,
        "TomoTherapy Plan",
    );
    put_str(
        &mut obj,
        tags::RT_PLAN_LABEL,
        VR::SH,
        plan.label.as_deref().unwrap_or(""),
    );
    put_str(&mut obj, tags::RT_PLAN_GEOMETRY, VR::CS, "PATIENT");
    put_str(&mut obj, tags::INSTANCE_CREATION_DATE, VR::DA, &date);
    put_str(&mut obj, tags::INSTANCE_CREATION_TIME, VR::TM, &time);

    if let (Some(dose), Some(volume)) = (plan.prescription_dose_gy, plan.prescription_volume_percent)
    {
        put_str(
            &mut obj,
            tags::PRESCRIPTION_DESCRIPTION,
            VR::LO,
            &format!("{volume:.1}% of the prescription volume receives at least {dose:.1} Gy"),
        );
    }

    if let Some(fractions) = plan.planned_fractions {
        let mut group = InMemDicomObject::new_empty();
        put_is(&mut group, tags::FRACTION_GROUP_NUMBER, 1);
        put_is(&mut group, tags::NUMBER_OF_FRACTIONS_PLANNED, i64::from(fractions));
        put_is(&mut group, tags::NUMBER_OF_BEAMS, 1);
        put_is(&mut group, tags::NUMBER_OF_BRACHY_APPLICATION_SETUPS, 0);
        if let Some(dose) = plan.prescription_dose_gy {
            let mut beam_ref = InMemDicomObject::new_empty();
            put_ds(&mut beam_ref, tags::BEAM_METERSET, &[1.0]);
            put_is(&mut beam_ref, tags::REFERENCED_BEAM_NUMBER, 1);
            put_seq(&mut group, tags::REFERENCED_BEAM_SEQUENCE, vec![beam_ref]);

            let mut dose_ref = InMemDicomObject::new_empty();
            put_ds(&mut dose_ref, tags::TARGET_PRESCRIPTION_DOSE, &[dose]);
            put_seq(
                &mut group,
                tags::REFERENCED_DOSE_REFERENCE_SEQUENCE,
                vec![dose_ref],
            );
        }
        put_seq(&mut obj, tags::FRACTION_GROUP_SEQUENCE, vec![group]);
    }

    if let (Some(machine), Some(delivery_type)) = (&plan.machine, &plan.delivery_type) {
        let mut beam = InMemDicomObject::new_empty();
        put_str(
            &mut beam,
            tags::MANUFACTURER,
            VR::LO,
            "TomoTherapy Incorporated",
        );
        put_str(&mut beam, tags::MANUFACTURER_MODEL_NAME, VR::LO, "Hi-Art");
        put_str(&mut beam, tags::TREATMENT_MACHINE_NAME, VR::SH, machine);
        put_str(&mut beam, tags::PRIMARY_DOSIMETER_UNIT, VR::CS, "MINUTE");
        put_ds(&mut beam, tags::SOURCE_AXIS_DISTANCE, &[850.0]);
        put_str(
            &mut beam,
            tags::BEAM_NAME,
            VR::LO,
            &format!("{delivery_type} TomoTherapy Beam"),
        );
        put_str(&mut beam, tags::RADIATION_TYPE, VR::CS, "PHOTON");
        put_str(
            &mut beam,
            tags::TREATMENT_DELIVERY_TYPE,
            VR::CS,
            "TREATMENT",
        );
        put_is(
            &mut beam,
            tags::NUMBER_OF_CONTROL_POINTS,
            plan.control_points.len() as i64,
        );

        let control_points = plan
            .control_points
            .iter()
            .enumerate()
            .map(|(index, cp)| control_point_of(index, cp))
            .collect();
        put_seq(&mut beam, tags::CONTROL_POINT_SEQUENCE, control_points);
        put_seq(&mut obj, tags::BEAM_SEQUENCE, vec![beam]);
    }

    if let Some(position) = &plan.patient_position {
        let mut setup = InMemDicomObject::new_empty();
        put_str(&mut setup, tags::PATIENT_POSITION, VR::CS, position);
        put_is(&mut setup, tags::PATIENT_SETUP_NUMBER, 1);
        put_seq(&mut obj, tags::PATIENT_SETUP_SEQUENCE, vec![setup]);
    }

    if let Some(referenced) = structure_set_sop_uid {
        let mut reference = InMemDicomObject::new_empty();
        put_str(
            &mut reference,
            tags::REFERENCED_SOP_CLASS_UID,
            VR::UI,
            uids::RT_STRUCTURE_SET_STORAGE,
        );
        put_str(
            &mut reference,
            tags::REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            referenced,
        );
        put_seq(
            &mut obj,
            tags::REFERENCED_STRUCTURE_SET_SEQUENCE,
            vec![reference],
        );
    }

    write_object(obj, uids::RT_PLAN_STORAGE, &sop_uid, path)?;
    info!(
        label = plan.label.as_deref().unwrap_or(""),
        "RT Plan written"
    );
    Ok(sop_uid)
}

fn control_point_of(index: usize, cp: &crate::plan::ControlPoint) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_is(&mut item, tags::CONTROL_POINT_INDEX, index as i64);
    put_ds(&mut item, tags::NOMINAL_BEAM_ENERGY, &[6.0]);

    let mut x_jaws = InMemDicomObject::new_empty();
    put_str(&mut x_jaws, tags::RT_BEAM_LIMITING_DEVICE_TYPE, VR::CS, "X");
    put_ds(&mut x_jaws, tags::LEAF_JAW_POSITIONS, &[-200.0, 200.0]);
    let mut y_jaws = InMemDicomObject::new_empty();
    put_str(
        &mut y_jaws,
        tags::RT_BEAM_LIMITING_DEVICE_TYPE,
        VR::CS,
        "ASYMY",
    );
    let (y0, y1) = cp.jaws.unwrap_or((-200.0, 200.0));
    put_ds(&mut y_jaws, tags::LEAF_JAW_POSITIONS, &[y0, y1]);
    put_seq(
        &mut item,
        tags::BEAM_LIMITING_DEVICE_POSITION_SEQUENCE,
        vec![x_jaws, y_jaws],
    );

    put_ds(&mut item, tags::GANTRY_ANGLE, &[cp.gantry_angle]);
    let isocenter = cp.isocenter.unwrap_or([0.0, 0.0, 0.0]);
    put_ds(&mut item, tags::ISOCENTER_POSITION, &isocenter);
    put_ds(
        &mut item,
        tags::CUMULATIVE_METERSET_WEIGHT,
        &[cp.cumulative_weight],
    );
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PatientInfo;
    use crate::plan::ControlPoint;

    fn ctx() -> StudyContext {
        StudyContext::new(PatientInfo {
            name: Some("DOE^JANE".into()),
            id: Some("PAT-7".into()),
            birth_date: None,
            sex: Some("F".into()),
        })
    }

    #[test]
    fn full_plan_emits_every_block() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let path = dir.path().join("RTPlan.dcm");
        let plan = PlanData {
            label: Some("Pelvis".into()),
            delivery_type: Some("Helical".into()),
            planned_fractions: Some(25),
            machine: Some("TOMO-1".into()),
            prescription_dose_gy: Some(50.0),
            prescription_volume_percent: Some(95.0),
            control_points: vec![
                ControlPoint {
                    gantry_angle: 0.0,
                    jaws: Some((-10.0, 10.0)),
                    isocenter: Some([0.0, 1.0, 2.0]),
                    cumulative_weight: 0.0,
                },
                ControlPoint {
                    gantry_angle: 51.4,
                    jaws: None,
                    isocenter: None,
                    cumulative_weight: 1.0,
                },
            ],
            patient_position: Some("HFS".into()),
            ..PlanData::default()
        };

        let rtss_uid = new_uid();
        write_plan(&plan, &ctx(), Some(&rtss_uid), &path).expect("plan should write");

        let obj = dicom::object::open_file(&path).expect("written plan should read back");
        let label = obj
            .element(tags::RT_PLAN_LABEL)
            .expect("label present")
            .to_str()
            .expect("label reads");
        assert_eq!(label.trim(), "Pelvis");

        let beams = obj
            .element(tags::BEAM_SEQUENCE)
            .expect("beam sequence present")
            .value()
            .items()
            .expect("sequence holds items");
        assert_eq!(beams.len(), 1);
        let control_points = beams[0]
            .element(tags::CONTROL_POINT_SEQUENCE)
            .expect("control points present")
            .value()
            .items()
            .expect("sequence holds items");
        assert_eq!(control_points.len(), 2);
        let gantry = control_points[1]
            .element(tags::GANTRY_ANGLE)
            .expect("gantry angle present")
            .to_float64()
            .expect("gantry angle parses");
        assert!((gantry - 51.4).abs() < 1e-9);

        let references = obj
            .element(tags::REFERENCED_STRUCTURE_SET_SEQUENCE)
            .expect("structure set reference present")
            .value()
            .items()
            .expect("sequence holds items");
        let referenced = references[0]
            .element(tags::REFERENCED_SOP_INSTANCE_UID)
            .expect("referenced uid present")
            .to_str()
            .expect("referenced uid reads");
        assert_eq!(referenced.trim_end(), rtss_uid);
    }

    #[test]
    fn absent_fields_omit_their_blocks() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let path = dir.path().join("RTPlan.dcm");
        let plan = PlanData {
            label: Some("Bare".into()),
            delivery_type: Some("Helical".into()),
            ..PlanData::default()
        };
        write_plan(&plan, &ctx(), None, &path).expect("plan should write");

        let obj = dicom::object::open_file(&path).expect("written plan should read back");
        // no machine -> no beam block, even though the delivery type is known
        assert!(obj.element(tags::BEAM_SEQUENCE).is_err());
        assert!(obj.element(tags::FRACTION_GROUP_SEQUENCE).is_err());
        assert!(obj.element(tags::PRESCRIPTION_DESCRIPTION).is_err());
        assert!(obj.element(tags::PATIENT_SETUP_SEQUENCE).is_err());
        assert!(obj.element(tags::REFERENCED_STRUCTURE_SET_SEQUENCE).is_err());
        let geometry = obj
            .element(tags::RT_PLAN_GEOMETRY)
            .expect("geometry present")
            .to_str()
            .expect("geometry reads");
        assert_eq!(geometry.trim(), "PATIENT");
    }
}
