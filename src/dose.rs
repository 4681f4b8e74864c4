use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{Archive, ArrayHeader, ImageEntry};
use crate::volume::{DoseVolume, Grid};
use crate::volume_reader::{self, VolumeReadError};

/// Image type marking the optimized dose after end-of-planning.
pub const DOSE_IMAGE_TYPE: &str = "Opt_Dose_After_EOP";

#[derive(Debug, Error)]
pub enum DoseError {
    /// Neither resolution strategy matched. The scan log is part of the
    /// contract: archives are not always trustworthy and operators need to
    /// see what was examined.
    #[error(
        "no Opt_Dose_After_EOP volume matches plan {plan_uid}; \
         examined records (imageType, parentUid): {examined:?}; \
         examined trials (uid, parentUid): {trials:?}"
    )]
    DoseNotFound {
        plan_uid: String,
        examined: Vec<(Option<String>, Option<String>)>,
        trials: Vec<(String, Option<String>)>,
    },

    #[error(transparent)]
    Volume(#[from] VolumeReadError),
}

/// Resolve and load the dose volume for a plan.
///
/// Two strategies, attempted in order, first success wins: a direct match
/// against image entries parented by the plan, then a trial-mediated match
/// against dose-volume entries parented by one of the plan's trials.
pub fn load_dose(archive: &Archive, plan_uid: &str) -> Result<DoseVolume, DoseError> {
    let mut examined: Vec<(Option<String>, Option<String>)> = Vec::new();

    for entry in &archive.images {
        examined.push((entry.image_type.clone(), entry.parent_uid.clone()));
        if is_dose_for(entry, plan_uid) {
            if let Some(header) = &entry.header {
                info!(plan_uid, "dose resolved by direct plan match");
                return read_dose(archive, entry, header);
            }
        }
    }

    let mut trials: Vec<(String, Option<String>)> = Vec::new();
    for trial in &archive.trials {
        trials.push((trial.uid.clone(), trial.parent_uid.clone()));
        if trial.parent_uid.as_deref() != Some(plan_uid) {
            continue;
        }
        debug!(plan_uid, trial_uid = %trial.uid, "searching dose volumes via plan trial");
        for entry in &archive.dose_volumes {
            examined.push((entry.image_type.clone(), entry.parent_uid.clone()));
            if is_dose_for(entry, &trial.uid) {
                if let Some(header) = &entry.header {
                    info!(plan_uid, trial_uid = %trial.uid, "dose resolved via plan trial");
                    return read_dose(archive, entry, header);
                }
            }
        }
    }

    Err(DoseError::DoseNotFound {
        plan_uid: plan_uid.to_string(),
        examined,
        trials,
    })
}

fn is_dose_for(entry: &ImageEntry, parent_uid: &str) -> bool {
    entry.image_type.as_deref() == Some(DOSE_IMAGE_TYPE)
        && entry.parent_uid.as_deref() == Some(parent_uid)
}

fn read_dose(
    archive: &Archive,
    entry: &ImageEntry,
    header: &ArrayHeader,
) -> Result<DoseVolume, DoseError> {
    let data = volume_reader::read_f32(archive.resolve(&header.file_name), header.dims)?;
    Ok(DoseVolume {
        grid: Grid {
            dims: header.dims,
            start: header.start,
            spacing: header.spacing,
        },
        frame_of_reference: entry.frame_of_reference.clone(),
        data,
    })
}
