//! # tomo-dicom
//!
//! Extracts TomoTherapy patient archives into standard DICOM objects.
//!
//! A patient archive is an XML index file plus sibling flat binary files
//! (image volumes, dose volumes, sinogram fragments, contour point files).
//! This crate resolves the records belonging to one treatment plan across
//! the archive's indirection levels (plan → trial → dose volume, plan →
//! delivery plan → sinogram fragments), decodes the binary companions into
//! typed volumes, rasterizes contours onto the reference image grid, and
//! assembles four outputs:
//!
//!  - a CT image series, one file per slice
//!  - an RT Dose volume
//!  - an RT Structure Set
//!  - an RT Plan
//!
//! The pipeline is strictly sequential and loads everything into memory for
//! the duration of one export; failures are terminal and re-running the
//! export is the only recovery path.
//!
//! # Examples
//!
//! ```no_run
//! # use tomo_dicom::{Archive, ExportOptions, export_plan, finder};
//! # use std::path::Path;
//! let archive = Archive::load("archive-dir", "JANE^DOE_patient.xml")
//!     .expect("should have loaded the archive index");
//! let plans = finder::find_approved_plans(&archive, Some("Helical"));
//! let plan_uid = finder::select_first(&plans).expect("an approved plan exists");
//! let summary = export_plan(
//!     &archive,
//!     plan_uid,
//!     Path::new("dicom-out"),
//!     &ExportOptions::default(),
//! )
//! .expect("export should succeed");
//! println!("{} CT slices written", summary.ct_slices);
//! ```

pub mod archive;
pub mod dose;
pub mod export;
pub mod finder;
pub mod image;
pub mod plan;
pub mod sinogram;
pub mod structures;
pub mod volume;
pub mod volume_reader;
pub mod writers;

pub use archive::{APPROVAL_SENTINEL, Archive};
pub use export::{ExportError, ExportOptions, ExportSummary, export_plan};
pub use structures::ContourMode;
