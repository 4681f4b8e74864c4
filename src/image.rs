use thiserror::Error;
use tracing::info;

use crate::archive::{Archive, ArrayHeader, ImageEntry};
use crate::volume::{Grid, ImageVolume};
use crate::volume_reader::{self, VolumeReadError};

/// Image modalities accepted as the plan's reference image.
const REFERENCE_IMAGE_TYPES: [&str; 2] = ["KVCT", "Registered_MVCT"];

const DEFAULT_RESCALE_SLOPE: f64 = 1.0;
const DEFAULT_RESCALE_INTERCEPT: f64 = -1024.0;
const DEFAULT_WINDOW_CENTER: f64 = 0.0;
const DEFAULT_WINDOW_WIDTH: f64 = 1000.0;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("plan {0} has no usable reference image (KVCT or Registered_MVCT)")]
    NoReferenceImage(String),

    #[error(transparent)]
    Volume(#[from] VolumeReadError),
}

/// Load the reference image for a plan: the first KVCT or registered MVCT
/// entry inside the plan's subtree, decoded and rescaled.
///
/// # Errors
///
/// `NoReferenceImage` when the plan subtree declares none; read failures
/// (missing or truncated binary) propagate.
pub fn load_reference_image(archive: &Archive, plan_uid: &str) -> Result<ImageVolume, ImageError> {
    let (entry, header) = find_reference_entry(archive, plan_uid)
        .ok_or_else(|| ImageError::NoReferenceImage(plan_uid.to_string()))?;

    let raw = volume_reader::read_u16(archive.resolve(&header.file_name), header.dims)?;
    let slope = archive.rescale_slope.unwrap_or(DEFAULT_RESCALE_SLOPE) as f32;
    let intercept = archive.rescale_intercept.unwrap_or(DEFAULT_RESCALE_INTERCEPT) as f32;
    let data = volume_reader::rescale(&raw, slope, intercept);

    let plan = archive.plan(plan_uid);
    info!(
        plan_uid,
        image_type = entry.image_type.as_deref().unwrap_or("?"),
        dims = ?header.dims,
        "reference image loaded"
    );
    Ok(ImageVolume {
        grid: Grid {
            dims: header.dims,
            start: header.start,
            spacing: header.spacing,
        },
        rescale_slope: slope,
        rescale_intercept: intercept,
        raw,
        data,
        structure_set_uid: plan.and_then(|p| p.structure_set_uid.clone()),
        patient_position: plan.and_then(|p| p.patient_position.clone()),
        isocenter: archive.isocenter,
        frame_of_reference: entry.frame_of_reference.clone(),
        window_center: archive.window_center.unwrap_or(DEFAULT_WINDOW_CENTER),
        window_width: archive.window_width.unwrap_or(DEFAULT_WINDOW_WIDTH),
    })
}

fn find_reference_entry<'a>(
    archive: &'a Archive,
    plan_uid: &str,
) -> Option<(&'a ImageEntry, &'a ArrayHeader)> {
    archive.images.iter().find_map(|entry| {
        let accepted = entry
            .image_type
            .as_deref()
            .is_some_and(|t| REFERENCE_IMAGE_TYPES.contains(&t));
        if accepted && entry.owner_plan_uid.as_deref() == Some(plan_uid) {
            entry.header.as_ref().map(|header| (entry, header))
        } else {
            None
        }
    })
}
