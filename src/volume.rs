use ndarray::Array3;

/// Axis-aligned voxel grid shared by image and dose volumes.
///
/// Start coordinates and spacings are in the archive's native unit (cm);
/// conversion to mm happens only when DICOM objects are assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Voxel counts along (x, y, z).
    pub dims: (usize, usize, usize),
    /// Physical coordinate of the first voxel along (x, y, z).
    pub start: (f64, f64, f64),
    /// Voxel edge lengths along (x, y, z).
    pub spacing: (f64, f64, f64),
}

impl Grid {
    pub fn voxel_count(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Volume of a single voxel, in the grid's linear unit cubed (cm³).
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.0 * self.spacing.1 * self.spacing.2
    }

    /// Nearest slice index for a physical z coordinate. May fall outside
    /// `0..dims.2`; callers decide how to treat out-of-range results.
    pub fn slice_index(&self, z: f64) -> i64 {
        ((z - self.start.2) / self.spacing.2).round() as i64
    }
}

/// Reference image volume extracted from the archive, with both the raw
/// stored samples and the rescaled values.
#[derive(Debug, Clone)]
pub struct ImageVolume {
    pub grid: Grid,
    pub rescale_slope: f32,
    pub rescale_intercept: f32,
    /// Stored samples as read from disk, column-major.
    pub raw: Array3<u16>,
    /// `raw * slope + intercept`.
    pub data: Array3<f32>,
    pub structure_set_uid: Option<String>,
    pub patient_position: Option<String>,
    pub isocenter: Option<[f64; 3]>,
    pub frame_of_reference: Option<String>,
    pub window_center: f64,
    pub window_width: f64,
}

/// Dose volume resolved for a plan.
#[derive(Debug, Clone)]
pub struct DoseVolume {
    pub grid: Grid,
    pub frame_of_reference: Option<String>,
    pub data: Array3<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid {
            dims: (4, 4, 3),
            start: (-1.0, -1.0, 0.0),
            spacing: (0.5, 0.5, 0.5),
        }
    }

    #[test]
    fn slice_index_rounds_to_nearest() {
        let g = grid();
        assert_eq!(g.slice_index(0.0), 0);
        assert_eq!(g.slice_index(0.5), 1);
        assert_eq!(g.slice_index(0.74), 1);
        assert_eq!(g.slice_index(-0.5), -1);
        assert_eq!(g.slice_index(2.0), 4);
    }

    #[test]
    fn voxel_volume_is_spacing_product() {
        assert!((grid().voxel_volume() - 0.125).abs() < 1e-12);
    }
}
