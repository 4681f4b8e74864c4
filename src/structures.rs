use std::fs;
use std::path::Path;

use ndarray::Array3;
use roxmltree::Document;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::volume::{Grid, ImageVolume};

/// How contour loops outside the image grid are treated. Archives may hold
/// stray points beyond the image extent, so the lenient default drops them;
/// strict mode is for validation tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContourMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("contour loop at z = {z} cm maps to slice {slice}, outside the image grid (0..{nz})")]
    ContourOutOfBounds { z: f64, slice: i64, nz: usize },
}

/// A region of interest with its contours and the mask derived on the
/// reference image grid.
#[derive(Debug, Clone)]
pub struct StructureRoi {
    pub name: String,
    pub color: Option<(u8, u8, u8)>,
    pub density_override: Option<f64>,
    /// Closed polygon loops in physical coordinates (cm), grouped per slice
    /// by the rasterizer.
    pub loops: Vec<Vec<[f64; 3]>>,
    /// Boolean mask sized to the reference image grid.
    pub mask: Array3<bool>,
    /// Mask volume in cm³.
    pub volume_cc: f64,
}

/// Load the structures belonging to the image's structure set and derive
/// their masks. ROIs parented by a different structure set are skipped
/// silently; an image without a structure set reference yields no
/// structures.
pub fn load_structures(
    archive: &Archive,
    image: &ImageVolume,
    mode: ContourMode,
) -> Result<Vec<StructureRoi>, StructureError> {
    let Some(set_uid) = image.structure_set_uid.as_deref() else {
        return Ok(Vec::new());
    };

    let mut structures = Vec::new();
    for roi in archive.rois_for_structure_set(set_uid) {
        let loops = match &roi.curve_file {
            Some(relative) => parse_curve_file(&archive.resolve(relative)),
            None => Vec::new(),
        };
        let (mask, volume_cc) = rasterize_loops(&loops, &image.grid, mode)?;
        debug!(name = %roi.name, loops = loops.len(), volume_cc, "structure rasterized");
        structures.push(StructureRoi {
            name: roi.name.clone(),
            color: roi.color,
            density_override: roi.density_override,
            loops,
            mask,
            volume_cc,
        });
    }
    info!(count = structures.len(), "structure set loaded");
    Ok(structures)
}

/// Parse a curve file: `pointData` elements carrying a `numDataPoints`
/// attribute and `"x,y,z;"` records, one per line, in cm. Unreadable or
/// malformed files yield no loops (with a warning) rather than failing the
/// export.
pub fn parse_curve_file(path: &Path) -> Vec<Vec<[f64; 3]>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), %err, "unreadable curve file, no contours loaded");
            return Vec::new();
        }
    };
    let doc = match Document::parse(&text) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(path = %path.display(), %err, "malformed curve file, no contours loaded");
            return Vec::new();
        }
    };

    let mut loops = Vec::new();
    for element in doc.descendants().filter(|n| n.has_tag_name("pointData")) {
        let declared: usize = element
            .attribute("numDataPoints")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if declared == 0 {
            continue;
        }
        let Some(body) = element.text() else {
            continue;
        };
        let points: Vec<[f64; 3]> = body.lines().filter_map(parse_point).collect();
        if points.len() != declared {
            debug!(
                path = %path.display(),
                declared,
                parsed = points.len(),
                "curve point count differs from the declared attribute"
            );
        }
        if !points.is_empty() {
            loops.push(points);
        }
    }
    loops
}

fn parse_point(line: &str) -> Option<[f64; 3]> {
    let record = line.trim().trim_end_matches(';');
    if record.is_empty() {
        return None;
    }
    let mut parts = record.split(',');
    let x = parts.next()?.trim().parse().ok()?;
    let y = parts.next()?.trim().parse().ok()?;
    let z = parts.next()?.trim().parse().ok()?;
    Some([x, y, z])
}

/// Rasterize polygon loops into a boolean mask on the grid and derive the
/// mask volume (cm³). Loops mapping to the same slice are OR-ed together,
/// supporting multi-part contours on one axial level.
pub fn rasterize_loops(
    loops: &[Vec<[f64; 3]>],
    grid: &Grid,
    mode: ContourMode,
) -> Result<(Array3<bool>, f64), StructureError> {
    let (nx, ny, nz) = grid.dims;
    let mut mask = Array3::from_elem((nx, ny, nz), false);

    for points in loops {
        let Some(first) = points.first() else {
            continue;
        };
        let z = first[2];
        let slice = grid.slice_index(z);
        if slice < 0 || slice >= nz as i64 {
            match mode {
                ContourMode::Lenient => {
                    warn!(z, slice, nz, "contour loop outside the image grid, dropped");
                    continue;
                }
                ContourMode::Strict => {
                    return Err(StructureError::ContourOutOfBounds { z, slice, nz });
                }
            }
        }
        let k = slice as usize;

        let polygon: Vec<(i64, i64)> = points
            .iter()
            .map(|p| {
                (
                    ((p[0] - grid.start.0) / grid.spacing.0).round() as i64,
                    ((p[1] - grid.start.1) / grid.spacing.1).round() as i64,
                )
            })
            .collect();
        fill_polygon(&polygon, nx, ny, |x, y| mask[[x, y, k]] = true);
    }

    let filled = mask.iter().filter(|v| **v).count();
    Ok((mask, filled as f64 * grid.voxel_volume()))
}

/// Even-odd scanline fill. Crossings are sampled on half-integer scanlines
/// so that edges through lattice vertices need no special casing.
fn fill_polygon(vertices: &[(i64, i64)], nx: usize, ny: usize, mut set: impl FnMut(usize, usize)) {
    if vertices.len() < 3 {
        return;
    }

    let y_min = vertices.iter().map(|v| v.1).min().unwrap_or(0).max(0);
    let y_max = vertices
        .iter()
        .map(|v| v.1)
        .max()
        .unwrap_or(-1)
        .min(ny as i64 - 1);

    let mut crossings: Vec<f64> = Vec::new();
    for y in y_min..=y_max {
        let scanline = y as f64 + 0.5;
        crossings.clear();
        for i in 0..vertices.len() {
            let (x0, y0) = vertices[i];
            let (x1, y1) = vertices[(i + 1) % vertices.len()];
            let (y0, y1) = (y0 as f64, y1 as f64);
            if (y0 <= scanline) == (y1 <= scanline) {
                continue;
            }
            let t = (scanline - y0) / (y1 - y0);
            crossings.push(x0 as f64 + t * (x1 - x0) as f64);
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        for pair in crossings.chunks_exact(2) {
            let left = pair[0].ceil().max(0.0) as i64;
            let right = pair[1].floor().min(nx as f64 - 1.0) as i64;
            for x in left..=right {
                set(x as usize, y as usize);
            }
        }
    }
}
