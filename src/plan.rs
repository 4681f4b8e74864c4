use std::path::PathBuf;

use ndarray::Array2;
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{Archive, DeliveryPlanRecord, PlanRecord};
use crate::sinogram;

/// Delivery-plan purpose selecting the machine-agnostic sinogram.
const MACHINE_AGNOSTIC_PURPOSE: &str = "Machine_Agnostic";
/// Delivery-plan purpose selecting the fluence sinogram when the plan
/// record carries no explicit reference.
const FLUENCE_PURPOSE: &str = "Fluence";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan {0} not found in the archive index")]
    PlanNotFound(String),
}

/// One delivery control point.
#[derive(Debug, Clone)]
pub struct ControlPoint {
    pub gantry_angle: f64,
    /// Y jaw pair in mm; the writer falls back to the open position.
    pub jaws: Option<(f64, f64)>,
    pub isocenter: Option<[f64; 3]>,
    pub cumulative_weight: f64,
}

/// Resolved plan description. Optional fields stay unset when the archive
/// does not supply them; the plan writer omits the corresponding blocks.
#[derive(Debug, Clone, Default)]
pub struct PlanData {
    pub label: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub delivery_type: Option<String>,
    pub planned_fractions: Option<i32>,
    pub machine: Option<String>,
    pub prescription_dose_gy: Option<f64>,
    pub prescription_volume_percent: Option<f64>,
    pub control_points: Vec<ControlPoint>,
    pub patient_position: Option<String>,
    pub isocenter: Option<[f64; 3]>,
    pub fluence_sinogram: Option<Array2<f64>>,
    pub machine_agnostic_sinogram: Option<Array2<f64>>,
}

/// Validate the plan uid and assemble its description, including the
/// delivery sinograms.
///
/// # Errors
///
/// `PlanNotFound` when the uid is absent from the plan list.
pub fn load_plan(archive: &Archive, plan_uid: &str) -> Result<PlanData, PlanError> {
    let record = archive
        .plan(plan_uid)
        .ok_or_else(|| PlanError::PlanNotFound(plan_uid.to_string()))?;

    let fluence = fluence_delivery_plan(archive, record)
        .and_then(|delivery| load_delivery_sinogram(archive, delivery));
    let agnostic = delivery_plan_by_purpose(archive, MACHINE_AGNOSTIC_PURPOSE)
        .and_then(|delivery| load_delivery_sinogram(archive, delivery));
    sinogram::check_consistency(fluence.as_ref(), agnostic.as_ref());

    info!(
        plan_uid,
        label = record.label.as_deref().unwrap_or("UNK"),
        fluence = fluence.is_some(),
        machine_agnostic = agnostic.is_some(),
        "plan resolved"
    );
    Ok(PlanData {
        label: record.label.clone(),
        date: record.modification_date.clone(),
        time: record.modification_time.clone(),
        delivery_type: record.delivery_type.clone(),
        planned_fractions: record.planned_fractions,
        machine: None,
        prescription_dose_gy: None,
        prescription_volume_percent: None,
        control_points: Vec::new(),
        patient_position: record.patient_position.clone(),
        isocenter: archive.isocenter,
        fluence_sinogram: fluence,
        machine_agnostic_sinogram: agnostic,
    })
}

/// The fluence delivery plan: the one the plan record references, when it
/// does, else the first with the fluence purpose.
fn fluence_delivery_plan<'a>(
    archive: &'a Archive,
    record: &PlanRecord,
) -> Option<&'a DeliveryPlanRecord> {
    if let Some(uid) = record.fluence_delivery_uid.as_deref() {
        if let Some(delivery) = archive.delivery_plan(uid) {
            return Some(delivery);
        }
        debug!(uid, "referenced fluence delivery plan is absent");
    }
    delivery_plan_by_purpose(archive, FLUENCE_PURPOSE)
}

fn delivery_plan_by_purpose<'a>(
    archive: &'a Archive,
    purpose: &str,
) -> Option<&'a DeliveryPlanRecord> {
    archive
        .delivery_plans
        .iter()
        .find(|delivery| delivery.purpose.as_deref() == Some(purpose))
}

fn load_delivery_sinogram(
    archive: &Archive,
    delivery: &DeliveryPlanRecord,
) -> Option<Array2<f64>> {
    let paths: Vec<PathBuf> = delivery
        .file_names
        .iter()
        .map(|name| archive.resolve(name))
        .collect();
    sinogram::load_sinogram(&paths)
}
