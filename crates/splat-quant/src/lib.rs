mod kmeans;
mod quantize;

pub use kmeans::{AssignBackend, kmeans, label_slice};
pub use quantize::quantize_1d;

use splat_table::DataTable;

/// Result of either quantization routine: a codebook/centroid table plus one
/// label per original sample.
pub struct Quantization {
    pub centroids: DataTable,
    pub labels: DataTable,
}
