use std::path::{Path, PathBuf};

use dicom::core::VR;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::{tags, uids};
use tracing::info;

use crate::volume::ImageVolume;

use super::{
    StudyContext, WriteError, new_uid, now_da_tm, put_ds, put_is, put_pixel_data, put_str,
    put_u16, write_object,
};

/// Fixed rescale pair written with every slice; the pixel transform below
/// encodes against it.
const WRITTEN_RESCALE_SLOPE: f64 = 1.0;
const WRITTEN_RESCALE_INTERCEPT: f64 = -1024.0;

/// Identifiers of a written CT series.
pub struct CtSeriesRefs {
    pub series_uid: String,
    pub sop_instance_uids: Vec<String>,
}

/// Write the image volume as a CT series, one file per z-slice, named
/// `<prefix>_<3-digit-index>.dcm`.
///
/// The stored-pixel transform has a single source of truth here: the
/// in-memory buffer already carries the load-time rescale, so when it
/// contains negative samples the written intercept's magnitude is added
/// back before the u16 encode, clamped to the stored range.
pub fn write_ct_series(
    image: &ImageVolume,
    ctx: &StudyContext,
    prefix: &Path,
) -> Result<CtSeriesRefs, WriteError> {
    let (nx, ny, nz) = image.grid.dims;
    let series_uid = new_uid();
    let offset: f32 = if image.data.iter().any(|v| *v < 0.0) {
        -WRITTEN_RESCALE_INTERCEPT as f32
    } else {
        0.0
    };
    let (date, time) = now_da_tm();

    let mut sop_instance_uids = Vec::with_capacity(nz);
    for k in 0..nz {
        let sop_uid = new_uid();
        let mut obj = InMemDicomObject::new_empty();

        put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE);
        put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_uid);
        put_str(&mut obj, tags::MODALITY, VR::CS, "CT");
        put_str(
            &mut obj,
            tags::IMAGE_TYPE,
            VR::CS,
            "ORIGINAL\\PRIMARY\\AXIAL",
        );
        put_str(
            &mut obj,
            tags::PATIENT_NAME,
            VR::PN,
            ctx.patient.name.as_deref().unwrap_or("UNKNOWN"),
        );
        put_str(
            &mut obj,
            tags::PATIENT_ID,
            VR::LO,
            ctx.patient.id.as_deref().unwrap_or("00000000"),
        );
        put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, &ctx.study_uid);
        put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &series_uid);
        put_str(
            &mut obj,
            tags::FRAME_OF_REFERENCE_UID,
            VR::UI,
            &ctx.frame_of_reference_uid,
        );
        put_is(&mut obj, tags::INSTANCE_NUMBER, (k + 1) as i64);

        // geometry, cm -> mm
        put_ds(&mut obj, tags::SLICE_THICKNESS, &[image.grid.spacing.2 * 10.0]);
        put_ds(
            &mut obj,
            tags::PIXEL_SPACING,
            &[image.grid.spacing.0 * 10.0, image.grid.spacing.1 * 10.0],
        );
        put_ds(
            &mut obj,
            tags::IMAGE_POSITION_PATIENT,
            &[
                image.grid.start.0 * 10.0,
                image.grid.start.1 * 10.0,
                (image.grid.start.2 + k as f64 * image.grid.spacing.2) * 10.0,
            ],
        );
        put_ds(
            &mut obj,
            tags::IMAGE_ORIENTATION_PATIENT,
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        );

        put_u16(&mut obj, tags::ROWS, ny as u16);
        put_u16(&mut obj, tags::COLUMNS, nx as u16);
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
        put_ds(&mut obj, tags::RESCALE_INTERCEPT, &[WRITTEN_RESCALE_INTERCEPT]);
        put_ds(&mut obj, tags::RESCALE_SLOPE, &[WRITTEN_RESCALE_SLOPE]);
        put_ds(&mut obj, tags::WINDOW_CENTER, &[image.window_center]);
        put_ds(&mut obj, tags::WINDOW_WIDTH, &[image.window_width]);
        put_str(&mut obj, tags::INSTANCE_CREATION_DATE, VR::DA, &date);
        put_str(&mut obj, tags::INSTANCE_CREATION_TIME, VR::TM, &time);

        put_pixel_data(&mut obj, slice_pixels(image, k, offset));

        let path = PathBuf::from(format!("{}_{:03}.dcm", prefix.display(), k + 1));
        write_object(obj, uids::CT_IMAGE_STORAGE, &sop_uid, &path)?;
        sop_instance_uids.push(sop_uid);
    }

    info!(slices = nz, "CT series written");
    Ok(CtSeriesRefs {
        series_uid,
        sop_instance_uids,
    })
}

/// Transpose the (x, y) slice into the output's row-major, origin-top-left
/// convention: rows run along y, columns along x.
fn slice_pixels(image: &ImageVolume, k: usize, offset: f32) -> Vec<u8> {
    let (nx, ny, _) = image.grid.dims;
    let mut pixels: Vec<u16> = Vec::with_capacity(nx * ny);
    for y in 0..ny {
        for x in 0..nx {
            let value = image.data[[x, y, k]] + offset;
            pixels.push(value.clamp(0.0, 65535.0) as u16);
        }
    }
    bytemuck::cast_slice::<u16, u8>(&pixels).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PatientInfo;
    use crate::volume::Grid;
    use ndarray::{Array3, ShapeBuilder};

    fn test_image(values: &[f32], dims: (usize, usize, usize)) -> ImageVolume {
        let raw = Array3::zeros(dims);
        let data =
            Array3::from_shape_vec(dims.f(), values.to_vec()).expect("shape matches values");
        ImageVolume {
            grid: Grid {
                dims,
                start: (-1.0, -1.0, 0.0),
                spacing: (0.1, 0.1, 0.2),
            },
            rescale_slope: 1.0,
            rescale_intercept: -1024.0,
            raw,
            data,
            structure_set_uid: None,
            patient_position: Some("HFS".into()),
            isocenter: None,
            frame_of_reference: None,
            window_center: 40.0,
            window_width: 400.0,
        }
    }

    fn ctx() -> StudyContext {
        StudyContext::new(PatientInfo::default())
    }

    #[test]
    fn negative_samples_get_the_offset_added_back() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let image = test_image(&[-1024.0, 0.0, 76.0, -1.0], (2, 2, 1));
        let refs = write_ct_series(&image, &ctx(), &dir.path().join("CT"))
            .expect("series should write");
        assert_eq!(refs.sop_instance_uids.len(), 1);

        let obj = dicom::object::open_file(dir.path().join("CT_001.dcm"))
            .expect("written slice should read back");
        let bytes = obj
            .element(tags::PIXEL_DATA)
            .expect("pixel data present")
            .to_bytes()
            .expect("pixel data is binary");
        let pixels: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        // transpose: rows along y; stored = sample + 1024
        assert_eq!(pixels, vec![0, 1024, 1024 + 76, 1024 - 1]);
    }

    #[test]
    fn non_negative_buffers_are_stored_verbatim() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let image = test_image(&[0.0, 100.0, 200.0, 300.0], (2, 2, 1));
        write_ct_series(&image, &ctx(), &dir.path().join("CT")).expect("series should write");

        let obj = dicom::object::open_file(dir.path().join("CT_001.dcm"))
            .expect("written slice should read back");
        let bytes = obj
            .element(tags::PIXEL_DATA)
            .expect("pixel data present")
            .to_bytes()
            .expect("pixel data is binary");
        let pixels: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(pixels, vec![0, 100, 200, 300]);
    }

    #[test]
    fn one_file_per_slice_with_indexed_names() {
        let dir = tempfile::tempdir().expect("failed creating tempdir");
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let image = test_image(&values, (2, 2, 2));
        let refs =
            write_ct_series(&image, &ctx(), &dir.path().join("CT")).expect("series should write");

        assert_eq!(refs.sop_instance_uids.len(), 2);
        assert!(dir.path().join("CT_001.dcm").exists());
        assert!(dir.path().join("CT_002.dcm").exists());

        let obj = dicom::object::open_file(dir.path().join("CT_002.dcm"))
            .expect("second slice should read back");
        let number: i32 = obj
            .element(tags::INSTANCE_NUMBER)
            .expect("instance number present")
            .to_int()
            .expect("instance number parses");
        assert_eq!(number, 2);
        // z position advances by the slice spacing, in mm
        let position = obj
            .element(tags::IMAGE_POSITION_PATIENT)
            .expect("position present")
            .to_multi_float64()
            .expect("position parses");
        assert_eq!(position[2], 2.0);
    }
}
