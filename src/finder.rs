use thiserror::Error;
use tracing::info;

use crate::archive::Archive;

#[derive(Debug, Error)]
pub enum FinderError {
    #[error("no approved plans found in the legacy archive")]
    NoLegacyPlans,
}

/// Approved patient plans as `(uid, label)` pairs, in document order.
///
/// Candidates are plans of type `PATIENT`; when `delivery_type` is given,
/// plans with a different delivery type are excluded before the approval
/// test. An empty result is not an error.
pub fn find_approved_plans(archive: &Archive, delivery_type: Option<&str>) -> Vec<(String, String)> {
    let mut plans = Vec::new();
    for plan in &archive.plans {
        if let Some(filter) = delivery_type {
            if plan.delivery_type.as_deref() != Some(filter) {
                continue;
            }
        }
        if !plan.is_approved() {
            continue;
        }
        if plan.plan_type.as_deref() != Some("PATIENT") {
            continue;
        }
        plans.push((plan.uid.clone(), label_of(plan)));
    }
    info!(count = plans.len(), "approved plan scan finished");
    plans
}

/// Every patient plan with its approval status, for listings.
pub fn find_all_plans(
    archive: &Archive,
    delivery_type: Option<&str>,
) -> Vec<(String, String, bool)> {
    let mut plans = Vec::new();
    for plan in &archive.plans {
        if let Some(filter) = delivery_type {
            if plan.delivery_type.as_deref() != Some(filter) {
                continue;
            }
        }
        if plan.plan_type.as_deref() != Some("PATIENT") {
            continue;
        }
        plans.push((plan.uid.clone(), label_of(plan), plan.is_approved()));
    }
    info!(count = plans.len(), "plan scan finished");
    plans
}

/// Default selection: the first approved plan in document order. Archives
/// may hold several approved plans; callers wanting a different tie-break
/// must pick explicitly.
pub fn select_first(plans: &[(String, String)]) -> Option<&str> {
    plans.first().map(|(uid, _)| uid.as_str())
}

/// Approved plan uids in legacy archives, which mark approval with a plain
/// status field instead of a trial reference.
///
/// # Errors
///
/// `NoLegacyPlans` when the archive holds no approved legacy plan.
pub fn find_legacy_plans(archive: &Archive) -> Result<Vec<String>, FinderError> {
    let approved: Vec<String> = archive
        .legacy_plans
        .iter()
        .filter(|plan| {
            plan.approval_status
                .as_deref()
                .is_some_and(|status| status.eq_ignore_ascii_case("approved"))
        })
        .filter_map(|plan| plan.uid.clone())
        .collect();
    if approved.is_empty() {
        return Err(FinderError::NoLegacyPlans);
    }
    info!(count = approved.len(), "legacy plan scan finished");
    Ok(approved)
}

fn label_of(plan: &crate::archive::PlanRecord) -> String {
    plan.label.clone().unwrap_or_else(|| "UNK".to_string())
}
