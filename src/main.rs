use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tomo_dicom::structures::ContourMode;
use tomo_dicom::{Archive, ExportOptions, export_plan, finder};

/// Extract a TomoTherapy patient archive into DICOM CT, RT Dose,
/// RT Structure Set and RT Plan objects.
#[derive(Parser)]
#[command(name = "tomo-dicom", version)]
struct Args {
    /// Archive directory containing the patient XML index and its binary
    /// companions.
    archive_dir: PathBuf,

    /// Index file name; discovered from the `*_patient.xml` pattern when
    /// omitted (exactly one match required).
    #[arg(long)]
    index: Option<String>,

    /// Uid of the plan to export; defaults to the first approved plan.
    #[arg(long)]
    plan: Option<String>,

    /// Restrict plan discovery to a delivery type (e.g. Helical).
    #[arg(long)]
    delivery_type: Option<String>,

    /// List patient plans with their approval status and exit.
    #[arg(long)]
    list: bool,

    /// Output directory for the DICOM objects.
    #[arg(long, default_value = "dicom-out")]
    out: PathBuf,

    /// Fail on contour loops outside the image grid instead of dropping
    /// them.
    #[arg(long)]
    strict_contours: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let index = match &args.index {
        Some(name) => name.clone(),
        None => discover_index(&args.archive_dir)?,
    };
    let archive = Archive::load(&args.archive_dir, &index)?;

    if args.list {
        let plans = finder::find_all_plans(&archive, args.delivery_type.as_deref());
        if plans.is_empty() {
            println!("no patient plans found");
            return Ok(());
        }
        for (uid, label, approved) in plans {
            let status = if approved { "approved" } else { "not approved" };
            println!("{uid}  {label}  ({status})");
        }
        return Ok(());
    }

    let plan_uid = match &args.plan {
        Some(uid) => uid.clone(),
        None => {
            let plans = finder::find_approved_plans(&archive, args.delivery_type.as_deref());
            finder::select_first(&plans)
                .ok_or("no approved plans found in the archive")?
                .to_string()
        }
    };

    let options = ExportOptions {
        contour_mode: if args.strict_contours {
            ContourMode::Strict
        } else {
            ContourMode::Lenient
        },
    };
    let summary = export_plan(&archive, &plan_uid, &args.out, &options)?;
    println!(
        "exported plan {}: {} CT slices, {} structures",
        summary.plan_uid, summary.ct_slices, summary.structures
    );
    println!("  CT series:     {}", summary.ct_dir.display());
    println!("  dose:          {}", summary.dose_file.display());
    println!("  structure set: {}", summary.structure_file.display());
    println!("  plan:          {}", summary.plan_file.display());
    Ok(())
}

/// Find the patient index by the `*_patient.xml` convention. Exactly one
/// match is required; anything else is an error the caller must resolve.
fn discover_index(dir: &PathBuf) -> Result<String, Box<dyn Error>> {
    let mut matches: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with("_patient.xml"))
        .collect();
    matches.sort();

    match matches.len() {
        0 => Err(format!("no *_patient.xml index found in {}", dir.display()).into()),
        1 => Ok(matches.remove(0)),
        _ => Err(format!(
            "multiple *_patient.xml indexes found in {}: {}; pass --index",
            dir.display(),
            matches.join(", ")
        )
        .into()),
    }
}
