mod column;
mod table;

pub use column::{Column, ColumnData, ScalarType};
pub use table::{DataTable, Row, TableError};

/// Column names every Gaussian-splat table is expected to carry.
pub mod well_known {
    pub const POSITION: [&str; 3] = ["x", "y", "z"];
    pub const ROTATION: [&str; 4] = ["rot_0", "rot_1", "rot_2", "rot_3"];
    pub const SCALE: [&str; 3] = ["scale_0", "scale_1", "scale_2"];
    pub const SH_DC: [&str; 3] = ["f_dc_0", "f_dc_1", "f_dc_2"];
    pub const OPACITY: &str = "opacity";
    pub const LOD: &str = "lod";

    /// Splats tagged with this lod value form the environment table.
    pub const ENVIRONMENT_LOD: f64 = -1.0;
}

/// Band-0 SH normalization constant, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f64 = 0.282_094_791_773_878_14;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Logit; the inverse of [`sigmoid`]. Clamps away from 0 and 1.
pub fn inv_sigmoid(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

/// SH band-0 coefficient for a [0, 1] color channel.
pub fn channel_to_sh(value: f64) -> f64 {
    (value - 0.5) / SH_C0
}

/// [0, 1] color channel for an SH band-0 coefficient.
pub fn sh_to_channel(coeff: f64) -> f64 {
    coeff * SH_C0 + 0.5
}

/// Coefficients per channel for SH bands 1..=degree, cumulative.
pub const fn sh_coeffs_for_degree(degree: u32) -> usize {
    match degree {
        0 => 0,
        1 => 3,
        2 => 8,
        _ => 15,
    }
}

/// Highest SH degree for which the table carries a full complement of
/// `f_rest_*` columns. A partial band counts as absent.
pub fn sh_degree_for_table(table: &DataTable) -> u32 {
    let has_all = |n: usize| (0..n * 3).all(|i| table.has_column(&format!("f_rest_{i}")));
    if has_all(15) {
        3
    } else if has_all(8) {
        2
    } else if has_all(3) {
        1
    } else {
        0
    }
}

/// Whether the table carries the minimal Gaussian-splat column set.
pub fn is_gaussian_splat(table: &DataTable) -> bool {
    well_known::POSITION
        .iter()
        .chain(well_known::ROTATION.iter())
        .chain(well_known::SCALE.iter())
        .chain(well_known::SH_DC.iter())
        .chain(std::iter::once(&well_known::OPACITY))
        .all(|name| table.has_column(name))
}
