use std::path::Path;

use dicom::core::VR;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::{tags, uids};
use tracing::info;

use crate::volume::DoseVolume;

use super::{
    StudyContext, WriteError, new_uid, now_da_tm, put_ds, put_is, put_patient, put_pixel_data,
    put_str, put_u16, write_object,
};

/// Write the dose volume as a single multi-frame RT Dose object and return
/// its SOP instance uid.
///
/// Non-finite samples are zeroed before the scaling factor is derived, so a
/// stray NaN or infinity cannot corrupt the grid scaling; stored values are
/// `clamp(sample / scaling, 0, 65535)` as u16.
pub fn write_dose(
    dose: &DoseVolume,
    ctx: &StudyContext,
    path: &Path,
) -> Result<String, WriteError> {
    let (nx, ny, nz) = dose.grid.dims;

    // frame/row/column order coincides with the column-major flat order
    let mut cleaned: Vec<f32> = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let sample = dose.data[[x, y, k]];
                cleaned.push(if sample.is_finite() { sample } else { 0.0 });
            }
        }
    }
    let max = cleaned.iter().copied().fold(0.0f32, f32::max);
    let scaling: f64 = if max > 0.0 {
        f64::from(max) / 65535.0
    } else {
        1.0
    };
    let pixels: Vec<u16> = cleaned
        .iter()
        .map(|v| (f64::from(*v) / scaling).round().clamp(0.0, 65535.0) as u16)
        .collect();

    let sop_uid = new_uid();
    let (date, time) = now_da_tm();
    let mut obj = InMemDicomObject::new_empty();

    put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::RT_DOSE_STORAGE);
    put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_uid);
    put_str(&mut obj, tags::MODALITY, VR::CS, "RTDOSE");
    put_str(&mut obj, tags::INSTANCE_CREATION_DATE, VR::DA, &date);
    put_str(&mut obj, tags::INSTANCE_CREATION_TIME, VR::TM, &time);

    put_patient(&mut obj, &ctx.patient, "Anonymous", "000000", "O");
    put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, &ctx.study_uid);
    put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &new_uid());
    put_str(
        &mut obj,
        tags::FRAME_OF_REFERENCE_UID,
        VR::UI,
        &ctx.frame_of_reference_uid,
    );
    put_str(&mut obj, tags::STUDY_DESCRIPTION, VR::LO, "RT Dose Study");
    put_str(&mut obj, tags::SERIES_DESCRIPTION, VR::LO, "RT Dose Series");

    put_ds(
        &mut obj,
        tags::IMAGE_ORIENTATION_PATIENT,
        &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    );
    put_ds(
        &mut obj,
        tags::IMAGE_POSITION_PATIENT,
        &[
            dose.grid.start.0 * 10.0,
            dose.grid.start.1 * 10.0,
            dose.grid.start.2 * 10.0,
        ],
    );
    put_ds(
        &mut obj,
        tags::PIXEL_SPACING,
        &[dose.grid.spacing.0 * 10.0, dose.grid.spacing.1 * 10.0],
    );
    put_ds(&mut obj, tags::SLICE_THICKNESS, &[dose.grid.spacing.2 * 10.0]);

    put_u16(&mut obj, tags::ROWS, ny as u16);
    put_u16(&mut obj, tags::COLUMNS, nx as u16);
    put_is(&mut obj, tags::NUMBER_OF_FRAMES, nz as i64);
    let offsets: Vec<f64> = (0..nz)
        .map(|i| i as f64 * (-dose.grid.spacing.2 * 10.0))
        .collect();
    put_ds(&mut obj, tags::GRID_FRAME_OFFSET_VECTOR, &offsets);

    put_str(&mut obj, tags::DOSE_UNITS, VR::CS, "GY");
    put_str(&mut obj, tags::DOSE_TYPE, VR::CS, "PHYSICAL");
    put_str(&mut obj, tags::DOSE_SUMMATION_TYPE, VR::CS, "PLAN");
    put_ds(&mut obj, tags::DOSE_GRID_SCALING, &[scaling]);

    put_u16(&mut obj, tags::SAMPLES_PER_PIXEL, 1);
    put_str(
        &mut obj,
        tags::PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        "MONOCHROME2",
    );
    put_u16(&mut obj, tags::BITS_ALLOCATED, 16);
    put_u16(&mut obj, tags::BITS_STORED, 16);
    put_u16(&mut obj, tags::HIGH_BIT, 15);
    put_u16(&mut obj, tags::PIXEL_REPRESENTATION, 0);
    put_pixel_data(&mut obj, bytemuck::cast_slice::<u16, u8>(&pixels).to_vec());

    write_object(obj, uids::RT_DOSE_STORAGE, &sop_uid, path)?;
    info!(frames = nz, scaling, "RT Dose written");
    Ok(sop_uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PatientInfo;
    use crate::volume::Grid;
    use ndarray::{Array3, ShapeBuilder};

    fn test_dose(values: &[f32], dims: (usize, usize, usize)) -> DoseVolume {
        DoseVolume {
            grid: Grid {
                dims,
                start: (0.0, 0.0, 0.0),
                spacing: (0.1, 0.1, 0.3),
            },
            frame_of_reference: None,
            data: Array3::from_shape_vec(dims.f(), values.to_vec())
                .expect("shape matches values"),
        }
    }

    fn read_pixels(path: &Path) -> (f64, Vec<u16>) {
        let obj = dicom::object::open_file(path).expect("written dose should read back");
        let scaling = obj
            .element(tags::DOSE_GRID_SCALING)
            .expect("scaling present")
            .to_float64()
            .expect("scaling parses");
        let bytes = obj
            .element(tags::PIXEL_DATA)
            .expect("pixel data present")
            .to_bytes()
            .expect("pixel data is binary");
        let pixels = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        (scaling, pixels)
    }

    #[test]
    fn scaling_round_trips_within_quantization_error() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let path = dir.path().join("RTDose.dcm");
        let values = [0.0f32, 12.5, 30.0, 70.2, 1.0, 0.25, 70.2, 33.3];
        let dose = test_dose(&values, (2, 2, 2));
        write_dose(&dose, &StudyContext::new(PatientInfo::default()), &path)
            .expect("dose should write");

        let (scaling, pixels) = read_pixels(&path);
        let tolerance = 70.2f64 / 65535.0;
        for (stored, original) in pixels.iter().zip(values.iter()) {
            let decoded = f64::from(*stored) * scaling;
            assert!(
                (decoded - f64::from(*original)).abs() <= tolerance,
                "decoded {decoded} vs {original}"
            );
        }
    }

    #[test]
    fn non_finite_samples_store_as_zero_without_skewing_the_scale() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let path = dir.path().join("RTDose.dcm");
        let values = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 50.0];
        let dose = test_dose(&values, (2, 2, 1));
        write_dose(&dose, &StudyContext::new(PatientInfo::default()), &path)
            .expect("dose should write");

        let (scaling, pixels) = read_pixels(&path);
        assert!((scaling - 50.0 / 65535.0).abs() < 1e-12);
        assert_eq!(pixels[0], 0);
        assert_eq!(pixels[1], 0);
        assert_eq!(pixels[2], 0);
        assert_eq!(pixels[3], 65535);
    }

    #[test]
    fn all_zero_dose_uses_unit_scaling() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let path = dir.path().join("RTDose.dcm");
        let dose = test_dose(&[0.0, 0.0], (2, 1, 1));
        write_dose(&dose, &StudyContext::new(PatientInfo::default()), &path)
            .expect("dose should write");

        let (scaling, pixels) = read_pixels(&path);
        assert_eq!(scaling, 1.0);
        assert_eq!(pixels, vec![0, 0]);
    }

    #[test]
    fn frame_offsets_step_backwards_by_slice_spacing() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let path = dir.path().join("RTDose.dcm");
        let dose = test_dose(&[1.0, 2.0, 3.0, 4.0], (1, 1, 4));
        write_dose(&dose, &StudyContext::new(PatientInfo::default()), &path)
            .expect("dose should write");

        let obj = dicom::object::open_file(&path).expect("written dose should read back");
        let offsets = obj
            .element(tags::GRID_FRAME_OFFSET_VECTOR)
            .expect("offsets present")
            .to_multi_float64()
            .expect("offsets parse");
        assert_eq!(offsets, vec![0.0, -3.0, -6.0, -9.0]);
        let frames: i32 = obj
            .element(tags::NUMBER_OF_FRAMES)
            .expect("frame count present")
            .to_int()
            .expect("frame count parses");
        assert_eq!(frames, 4);
    }
}
