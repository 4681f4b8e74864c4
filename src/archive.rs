use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use thiserror::Error;
use tracing::{debug, info};

/// Placeholder the planning station writes into `approvedPlanTrialUID` when
/// a plan has never been approved. Treated identically to an empty or
/// missing value everywhere approval is tested.
pub const APPROVAL_SENTINEL: &str = "* * * DO NOT CHANGE THIS STRING VALUE * * *";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive index not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed archive index {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub id: Option<String>,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
}

/// One `briefPlan` entry plus the per-plan extras from its parent subtree.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub uid: String,
    pub label: Option<String>,
    /// `typeOfPlan`, e.g. `PATIENT` or `Composite`.
    pub plan_type: Option<String>,
    /// `planDeliveryType`, e.g. `Helical`.
    pub delivery_type: Option<String>,
    pub approved_trial_uid: Option<String>,
    pub parent_uid: Option<String>,
    pub modification_date: Option<String>,
    pub modification_time: Option<String>,
    pub planned_fractions: Option<i32>,
    pub fluence_delivery_uid: Option<String>,
    pub patient_position: Option<String>,
    pub structure_set_uid: Option<String>,
}

impl PlanRecord {
    /// A plan is approved when its trial reference is present, non-empty and
    /// not the unset-reference placeholder.
    pub fn is_approved(&self) -> bool {
        match self.approved_trial_uid.as_deref() {
            Some(uid) => !uid.is_empty() && uid != APPROVAL_SENTINEL,
            None => false,
        }
    }
}

/// Binary array declaration carried by image and dose entries.
#[derive(Debug, Clone)]
pub struct ArrayHeader {
    pub file_name: String,
    pub dims: (usize, usize, usize),
    pub start: (f64, f64, f64),
    pub spacing: (f64, f64, f64),
}

/// One `image` or `doseVolumeList` entry.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub image_type: Option<String>,
    pub parent_uid: Option<String>,
    pub frame_of_reference: Option<String>,
    /// Absent when the entry declares no complete binary array.
    pub header: Option<ArrayHeader>,
    /// Uid of the plan whose subtree contains this entry, when nested.
    pub owner_plan_uid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrialRecord {
    pub uid: String,
    pub parent_uid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveryPlanRecord {
    pub uid: Option<String>,
    pub parent_uid: Option<String>,
    /// e.g. `Fluence` or `Machine_Agnostic`.
    pub purpose: Option<String>,
    /// Relative binary fragment names, in document order.
    pub file_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RoiRecord {
    pub name: String,
    /// Uid of the structure set this ROI belongs to.
    pub parent_uid: Option<String>,
    /// Missing or unparsable color components leave this unset; that is
    /// only fatal once the structure set is assembled.
    pub color: Option<(u8, u8, u8)>,
    /// Present when `isDensityOverridden` is true.
    pub density_override: Option<f64>,
    pub curve_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LegacyPlanRecord {
    pub uid: Option<String>,
    pub approval_status: Option<String>,
}

/// Parsed archive index: owned typed records in document order plus lookup
/// tables built once at load. Read-only for the pipeline's duration.
#[derive(Debug)]
pub struct Archive {
    root: PathBuf,
    pub patient: PatientInfo,
    pub plans: Vec<PlanRecord>,
    pub trials: Vec<TrialRecord>,
    /// Entries under `fullImageDataArray`, the reference images and the
    /// directly attached dose images alike.
    pub images: Vec<ImageEntry>,
    /// Entries under `doseVolumeList`, reached via plan trials.
    pub dose_volumes: Vec<ImageEntry>,
    pub delivery_plans: Vec<DeliveryPlanRecord>,
    pub rois: Vec<RoiRecord>,
    pub legacy_plans: Vec<LegacyPlanRecord>,
    pub isocenter: Option<[f64; 3]>,
    pub rescale_slope: Option<f64>,
    pub rescale_intercept: Option<f64>,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    plan_index: HashMap<String, usize>,
    delivery_index: HashMap<String, usize>,
    trials_by_parent: HashMap<String, Vec<usize>>,
    rois_by_parent: HashMap<String, Vec<usize>>,
}

impl Archive {
    /// Parse the archive index at `dir/file_name`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the index file is absent; IO and XML parse failures
    /// propagate.
    pub fn load(dir: impl AsRef<Path>, file_name: &str) -> Result<Self, ArchiveError> {
        let root = dir.as_ref().to_path_buf();
        let path = root.join(file_name);
        if !path.exists() {
            return Err(ArchiveError::NotFound(path));
        }
        let text = fs::read_to_string(&path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        let doc = Document::parse(&text).map_err(|source| ArchiveError::Parse {
            path: path.clone(),
            source,
        })?;

        let mut archive = Archive {
            root,
            patient: parse_patient(&doc),
            plans: Vec::new(),
            trials: Vec::new(),
            images: Vec::new(),
            dose_volumes: Vec::new(),
            delivery_plans: Vec::new(),
            rois: Vec::new(),
            legacy_plans: Vec::new(),
            isocenter: parse_isocenter(&doc),
            rescale_slope: global_float(&doc, "RescaleSlope"),
            rescale_intercept: global_float(&doc, "RescaleIntercept"),
            window_center: global_float(&doc, "WindowCenter"),
            window_width: global_float(&doc, "WindowWidth"),
            plan_index: HashMap::new(),
            delivery_index: HashMap::new(),
            trials_by_parent: HashMap::new(),
            rois_by_parent: HashMap::new(),
        };

        for entry in nested_entries(&doc, "fullPlanDataArray") {
            if let Some(plan) = parse_plan(entry) {
                archive
                    .plan_index
                    .entry(plan.uid.clone())
                    .or_insert(archive.plans.len());
                archive.plans.push(plan);
            } else {
                debug!("skipping plan entry without a database uid");
            }
        }

        for node in doc
            .descendants()
            .filter(|n| n.has_tag_name("patientPlanTrial"))
        {
            if let Some(uid) = text_at(node, &["dbInfo", "databaseUID"]) {
                let parent_uid = text_at(node, &["dbInfo", "databaseParent"]);
                if let Some(parent) = &parent_uid {
                    archive
                        .trials_by_parent
                        .entry(parent.clone())
                        .or_default()
                        .push(archive.trials.len());
                }
                archive.trials.push(TrialRecord { uid, parent_uid });
            }
        }

        for entry in nested_entries(&doc, "fullImageDataArray") {
            for image in entry.children().filter(|c| c.has_tag_name("image")) {
                archive.images.push(parse_image_entry(image));
            }
        }

        for entry in nested_entries(&doc, "doseVolumeList") {
            archive.dose_volumes.push(parse_image_entry(entry));
        }

        for entry in nested_entries(&doc, "fullDeliveryPlanDataArray") {
            let record = parse_delivery_plan(entry);
            if let Some(uid) = &record.uid {
                archive
                    .delivery_index
                    .entry(uid.clone())
                    .or_insert(archive.delivery_plans.len());
            }
            archive.delivery_plans.push(record);
        }

        for entry in nested_entries(&doc, "troiList") {
            if let Some(roi) = parse_roi(entry) {
                if let Some(parent) = &roi.parent_uid {
                    archive
                        .rois_by_parent
                        .entry(parent.clone())
                        .or_default()
                        .push(archive.rois.len());
                }
                archive.rois.push(roi);
            }
        }

        for node in doc.descendants().filter(|n| n.has_tag_name("legacyPlan")) {
            archive.legacy_plans.push(LegacyPlanRecord {
                uid: text_at(node, &["dbInfo", "databaseUID"]),
                approval_status: text_at(node, &["approvalStatus"]),
            });
        }

        info!(
            plans = archive.plans.len(),
            trials = archive.trials.len(),
            images = archive.images.len(),
            dose_volumes = archive.dose_volumes.len(),
            delivery_plans = archive.delivery_plans.len(),
            rois = archive.rois.len(),
            "archive index loaded"
        );
        Ok(archive)
    }

    /// Directory the index was loaded from; binary companions resolve
    /// relative to it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative file name from the index against the archive root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn plan(&self, uid: &str) -> Option<&PlanRecord> {
        self.plan_index.get(uid).map(|&i| &self.plans[i])
    }

    pub fn delivery_plan(&self, uid: &str) -> Option<&DeliveryPlanRecord> {
        self.delivery_index.get(uid).map(|&i| &self.delivery_plans[i])
    }

    /// Trials whose parent is the given plan, in document order.
    pub fn trials_for_plan(&self, plan_uid: &str) -> Vec<&TrialRecord> {
        self.trials_by_parent
            .get(plan_uid)
            .map(|indices| indices.iter().map(|&i| &self.trials[i]).collect())
            .unwrap_or_default()
    }

    /// ROIs belonging to the given structure set, in document order.
    pub fn rois_for_structure_set(&self, set_uid: &str) -> Vec<&RoiRecord> {
        self.rois_by_parent
            .get(set_uid)
            .map(|indices| indices.iter().map(|&i| &self.rois[i]).collect())
            .unwrap_or_default()
    }
}

/// Entries written as `<name><name>…</name></name>` pairs, the archive's
/// convention for list containers.
fn nested_entries<'a, 'input>(
    doc: &'a Document<'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    doc.descendants().filter(move |n| {
        n.has_tag_name(name) && n.parent().is_some_and(|p| p.has_tag_name(name))
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.has_tag_name(name))
}

fn text_at(node: Node<'_, '_>, path: &[&str]) -> Option<String> {
    let mut current = node;
    for name in path {
        current = child(current, name)?;
    }
    current
        .text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn float_at(node: Node<'_, '_>, path: &[&str]) -> Option<f64> {
    text_at(node, path)?.parse().ok()
}

fn int_at(node: Node<'_, '_>, path: &[&str]) -> Option<i64> {
    text_at(node, path)?.parse().ok()
}

fn global_float(doc: &Document<'_>, name: &str) -> Option<f64> {
    doc.descendants()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse().ok())
}

fn parse_patient(doc: &Document<'_>) -> PatientInfo {
    let Some(brief) = doc.descendants().find(|n| n.has_tag_name("briefPatient")) else {
        return PatientInfo::default();
    };
    PatientInfo {
        name: text_at(brief, &["patientName"]),
        id: text_at(brief, &["patientID"]),
        birth_date: text_at(brief, &["patientBirthDate"]),
        sex: text_at(brief, &["patientGender"]),
    }
}

fn parse_isocenter(doc: &Document<'_>) -> Option<[f64; 3]> {
    let node = doc
        .descendants()
        .find(|n| n.has_tag_name("referenceImageIsocenter"))?;
    Some([
        float_at(node, &["x"])?,
        float_at(node, &["y"])?,
        float_at(node, &["z"])?,
    ])
}

fn parse_plan(entry: Node<'_, '_>) -> Option<PlanRecord> {
    let plan = child(entry, "plan")?;
    let brief = child(plan, "briefPlan")?;
    let uid = text_at(brief, &["dbInfo", "databaseUID"])?;
    Some(PlanRecord {
        uid,
        label: text_at(brief, &["planLabel"]),
        plan_type: text_at(brief, &["typeOfPlan"]),
        delivery_type: text_at(brief, &["planDeliveryType"]),
        approved_trial_uid: text_at(brief, &["approvedPlanTrialUID"]),
        parent_uid: text_at(brief, &["dbInfo", "databaseParent"]),
        modification_date: text_at(brief, &["modificationTimestamp", "date"]),
        modification_time: text_at(brief, &["modificationTimestamp", "time"]),
        planned_fractions: int_at(brief, &["plannedFractions"]).map(|v| v as i32),
        fluence_delivery_uid: text_at(brief, &["fluenceDeliveryPlanUID"]),
        patient_position: text_at(plan, &["patientPosition"]),
        structure_set_uid: text_at(plan, &["planStructureSetUID"]),
    })
}

fn parse_array_header(node: Node<'_, '_>) -> Option<ArrayHeader> {
    let header = child(node, "arrayHeader")?;
    Some(ArrayHeader {
        file_name: text_at(header, &["binaryFileName"])?,
        dims: (
            int_at(header, &["dimensions", "x"])? as usize,
            int_at(header, &["dimensions", "y"])? as usize,
            int_at(header, &["dimensions", "z"])? as usize,
        ),
        start: (
            float_at(header, &["start", "x"])?,
            float_at(header, &["start", "y"])?,
            float_at(header, &["start", "z"])?,
        ),
        spacing: (
            float_at(header, &["elementSize", "x"])?,
            float_at(header, &["elementSize", "y"])?,
            float_at(header, &["elementSize", "z"])?,
        ),
    })
}

fn parse_image_entry(node: Node<'_, '_>) -> ImageEntry {
    ImageEntry {
        image_type: text_at(node, &["imageType"]),
        parent_uid: text_at(node, &["dbInfo", "databaseParent"]),
        frame_of_reference: text_at(node, &["frameOfReference"]),
        header: parse_array_header(node),
        owner_plan_uid: owner_plan_uid(node),
    }
}

fn owner_plan_uid(node: Node<'_, '_>) -> Option<String> {
    node.ancestors()
        .find(|a| {
            a.has_tag_name("fullPlanDataArray")
                && a.parent().is_some_and(|p| p.has_tag_name("fullPlanDataArray"))
        })
        .and_then(|entry| text_at(entry, &["plan", "briefPlan", "dbInfo", "databaseUID"]))
}

fn parse_delivery_plan(entry: Node<'_, '_>) -> DeliveryPlanRecord {
    let file_names = entry
        .descendants()
        .filter(|n| {
            n.has_tag_name("binaryFileNameArray")
                && n.parent().is_some_and(|p| p.has_tag_name("binaryFileNameArray"))
        })
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    DeliveryPlanRecord {
        uid: text_at(entry, &["deliveryPlan", "dbInfo", "databaseUID"]),
        parent_uid: text_at(entry, &["deliveryPlan", "dbInfo", "databaseParent"]),
        purpose: text_at(entry, &["deliveryPlan", "purpose"]),
        file_names,
    }
}

fn parse_roi(entry: Node<'_, '_>) -> Option<RoiRecord> {
    let brief = child(entry, "briefROI")?;
    let color = match (
        int_at(brief, &["color", "red"]),
        int_at(brief, &["color", "green"]),
        int_at(brief, &["color", "blue"]),
    ) {
        (Some(r), Some(g), Some(b))
            if (0..=255).contains(&r) && (0..=255).contains(&g) && (0..=255).contains(&b) =>
        {
            Some((r as u8, g as u8, b as u8))
        }
        _ => None,
    };
    let density_override = if text_at(brief, &["isDensityOverridden"])
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        float_at(brief, &["overriddenDensity"])
    } else {
        None
    };
    Some(RoiRecord {
        name: text_at(brief, &["name"]).unwrap_or_else(|| "Unknown".to_string()),
        parent_uid: text_at(brief, &["dbInfo", "databaseParent"]),
        color,
        density_override,
        curve_file: text_at(entry, &["curveDataFile"]),
    })
}
