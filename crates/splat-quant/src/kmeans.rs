use ball_tree::{BallTree, Point};
use rand::{SeedableRng, rngs::StdRng};
use splat_table::{Column, ColumnData, DataTable};

use crate::Quantization;

/// Assignment-step backend seam. The CPU path lives here; a GPU
/// implementation is an external collaborator that only has to answer
/// nearest-centroid queries for flat f64 feature rows.
pub trait AssignBackend: Send + Sync {
    /// For every point (row of `dim` values in `points`), write the index of
    /// its nearest centroid into `labels`.
    fn assign(&self, points: &[f64], centroids: &[f64], dim: usize, labels: &mut [u32]);
}

#[derive(Clone, Debug, PartialEq)]
struct FeaturePoint(Vec<f64>);

impl Point for FeaturePoint {
    fn distance(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    fn move_towards(&self, other: &Self, d: f64) -> Self {
        let dist = self.distance(other);
        if dist <= 0.0 {
            return self.clone();
        }
        let t = d / dist;
        Self(
            self.0
                .iter()
                .zip(&other.0)
                .map(|(a, b)| a + (b - a) * t)
                .collect(),
        )
    }
}

struct BallTreeAssign;

impl AssignBackend for BallTreeAssign {
    fn assign(&self, points: &[f64], centroids: &[f64], dim: usize, labels: &mut [u32]) {
        let centroid_points: Vec<FeaturePoint> = centroids
            .chunks_exact(dim)
            .map(|c| FeaturePoint(c.to_vec()))
            .collect();
        let values: Vec<u32> = (0..centroid_points.len() as u32).collect();
        let tree = BallTree::new(centroid_points, values);
        let mut query = tree.query();

        for (point, label) in points.chunks_exact(dim).zip(labels.iter_mut()) {
            let target = FeaturePoint(point.to_vec());
            let (_, _, &index) = query.nn(&target).next().expect("Centroid set is non-empty");
            *label = index;
        }
    }
}

/// Plain k-means over the table's rows (each row one point, feature
/// dimension = column count).
///
/// Distinct random rows seed the centroids; assignment goes through a ball
/// tree over the current centroids (or the supplied backend); the update step
/// is the arithmetic mean. Runs exactly `iterations` rounds, no convergence
/// check. Empty clusters keep their previous centroid. With fewer rows than
/// `k` the input rows are returned as-is with identity labels.
pub fn kmeans(
    table: &DataTable,
    k: usize,
    iterations: usize,
    seed: u64,
    backend: Option<&dyn AssignBackend>,
) -> Quantization {
    let num_rows = table.num_rows();
    let dim = table.num_columns();

    if num_rows <= k {
        let labels = labels_table((0..num_rows as u32).collect());
        return Quantization {
            centroids: table.clone(),
            labels,
        };
    }

    let mut points = vec![0.0f64; num_rows * dim];
    for (c, column) in table.columns().iter().enumerate() {
        for row in 0..num_rows {
            points[row * dim + c] = column.data.get(row);
        }
    }

    // Distinct random rows as the initial centroids.
    let mut rng = StdRng::seed_from_u64(seed);
    let picked = rand::seq::index::sample(&mut rng, num_rows, k);
    let mut centroids = vec![0.0f64; k * dim];
    for (slot, row) in picked.iter().enumerate() {
        centroids[slot * dim..(slot + 1) * dim]
            .copy_from_slice(&points[row * dim..(row + 1) * dim]);
    }

    let fallback = BallTreeAssign;
    let backend = backend.unwrap_or(&fallback);

    let mut labels = vec![0u32; num_rows];
    for round in 0..iterations {
        backend.assign(&points, &centroids, dim, &mut labels);

        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0u64; k];
        for (row, &label) in labels.iter().enumerate() {
            counts[label as usize] += 1;
            for c in 0..dim {
                sums[label as usize * dim + c] += points[row * dim + c];
            }
        }
        let mut empty = 0;
        for cluster in 0..k {
            if counts[cluster] == 0 {
                empty += 1;
                continue;
            }
            for c in 0..dim {
                centroids[cluster * dim + c] = sums[cluster * dim + c] / counts[cluster] as f64;
            }
        }
        if empty > 0 {
            log::debug!("k-means round {round}: {empty} empty clusters");
        }
    }
    // Labels reflect the final centroid update.
    backend.assign(&points, &centroids, dim, &mut labels);

    let centroid_columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(c, column)| {
            let data = (0..k).map(|cl| centroids[cl * dim + c] as f32).collect();
            Column::new(column.name.clone(), ColumnData::F32(data))
        })
        .collect();

    Quantization {
        centroids: DataTable::new(centroid_columns).expect("Mirrors input columns"),
        labels: labels_table(labels),
    }
}

fn labels_table(labels: Vec<u32>) -> DataTable {
    DataTable::new(vec![Column::new("label", ColumnData::U32(labels))])
        .expect("Single column")
}

/// Convenience accessor for the label column produced by [`kmeans`].
pub fn label_slice(labels: &DataTable) -> &[u32] {
    labels
        .column("label")
        .and_then(|c| c.data.as_u32())
        .expect("Labels are a single u32 column")
}
