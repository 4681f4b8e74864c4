use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::archive::{Archive, ArchiveError};
use crate::dose::{self, DoseError};
use crate::image::{self, ImageError};
use crate::plan::{self, PlanError};
use crate::structures::{self, ContourMode, StructureError};
use crate::writers::{self, StudyContext, WriteError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Dose(#[from] DoseError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("creating output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub contour_mode: ContourMode,
}

/// What one export produced.
#[derive(Debug)]
pub struct ExportSummary {
    pub plan_uid: String,
    pub ct_slices: usize,
    pub structures: usize,
    pub ct_dir: PathBuf,
    pub dose_file: PathBuf,
    pub structure_file: PathBuf,
    pub plan_file: PathBuf,
}

/// Run the whole pipeline for one plan: resolve and load every record, then
/// emit the four DICOM outputs under `out_dir` (`CT/`, `Dose/`, `RTStruct/`,
/// `RTPlan/`).
///
/// Strictly sequential; every failure is terminal for this export and
/// re-running it is the only recovery path.
pub fn export_plan(
    archive: &Archive,
    plan_uid: &str,
    out_dir: &Path,
    options: &ExportOptions,
) -> Result<ExportSummary, ExportError> {
    info!(plan_uid, out_dir = %out_dir.display(), "export started");

    let plan_data = plan::load_plan(archive, plan_uid)?;
    let image = image::load_reference_image(archive, plan_uid)?;
    let structures = structures::load_structures(archive, &image, options.contour_mode)?;
    let dose = dose::load_dose(archive, plan_uid)?;

    let ct_dir = ensure_dir(out_dir.join("CT"))?;
    let dose_dir = ensure_dir(out_dir.join("Dose"))?;
    let structure_dir = ensure_dir(out_dir.join("RTStruct"))?;
    let plan_dir = ensure_dir(out_dir.join("RTPlan"))?;

    let ctx = StudyContext::new(archive.patient.clone());
    info!("assembly started");

    let ct = writers::image::write_ct_series(&image, &ctx, &ct_dir.join("CT"))?;

    let structure_file = structure_dir.join("RTStruct.dcm");
    let structure_set_uid = writers::structure::write_structure_set(&structures, &ctx, &structure_file)?;

    let plan_file = plan_dir.join("RTPlan.dcm");
    writers::plan::write_plan(&plan_data, &ctx, Some(&structure_set_uid), &plan_file)?;

    let dose_file = dose_dir.join("RTDose.dcm");
    writers::dose::write_dose(&dose, &ctx, &dose_file)?;

    info!(
        ct_slices = ct.sop_instance_uids.len(),
        structures = structures.len(),
        "export finished"
    );
    Ok(ExportSummary {
        plan_uid: plan_uid.to_string(),
        ct_slices: ct.sop_instance_uids.len(),
        structures: structures.len(),
        ct_dir,
        dose_file,
        structure_file,
        plan_file,
    })
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(&path).map_err(|source| ExportError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
