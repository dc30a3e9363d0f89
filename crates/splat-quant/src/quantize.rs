use splat_table::{Column, ColumnData, DataTable};

use crate::Quantization;

const NUM_BINS: usize = 1024;
const DEGENERATE_RANGE: f64 = 1e-20;

/// Optimal 1-D quantization of every value in `table` into a `k`-entry
/// codebook.
///
/// All columns are pooled into one dataset, histogrammed into 1024 bins and
/// weighted by `count^alpha`; a dynamic program then finds the exact
/// contiguous-segment partition minimizing weighted squared error. The
/// sub-linear weight exponent keeps dense value modes from starving the
/// tails of codebook entries.
///
/// Returns a sorted `codebook` column of `k` f32 entries plus, per input
/// column, a u8 label column of nearest-entry indices.
pub fn quantize_1d(table: &DataTable, k: usize, alpha: f64) -> Quantization {
    assert!(k > 1 && k <= 256, "Codebook size must fit u8 labels");

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for column in table.columns() {
        for i in 0..column.data.len() {
            let v = column.data.get(i);
            min = min.min(v);
            max = max.max(v);
        }
    }

    if !(max - min).is_finite() || max - min < DEGENERATE_RANGE {
        let value = if min.is_finite() { min as f32 } else { 0.0 };
        let centroids = DataTable::new(vec![Column::new(
            "codebook",
            ColumnData::F32(vec![value; k]),
        )])
        .expect("Single column");
        let labels = DataTable::new(
            table
                .columns()
                .iter()
                .map(|c| Column::new(c.name.clone(), ColumnData::U8(vec![0; c.data.len()])))
                .collect(),
        )
        .expect("Mirrors input columns");
        return Quantization { centroids, labels };
    }

    // Histogram with per-bin value sums so each segment can report its
    // weighted mean rather than a bin center.
    let inv_extent = NUM_BINS as f64 / (max - min);
    let mut counts = vec![0u64; NUM_BINS];
    let mut bin_value_sums = vec![0.0f64; NUM_BINS];
    for column in table.columns() {
        for i in 0..column.data.len() {
            let v = column.data.get(i);
            let bin = (((v - min) * inv_extent) as usize).min(NUM_BINS - 1);
            counts[bin] += 1;
            bin_value_sums[bin] += v;
        }
    }

    // Prefix sums of weight, weighted value and weighted squared value give
    // O(1) segment cost: sse = Wxx - Wx^2 / W.
    let mut w = vec![0.0f64; NUM_BINS + 1];
    let mut wx = vec![0.0f64; NUM_BINS + 1];
    let mut wxx = vec![0.0f64; NUM_BINS + 1];
    for bin in 0..NUM_BINS {
        let weight = (counts[bin] as f64).powf(alpha);
        let value = if counts[bin] > 0 {
            bin_value_sums[bin] / counts[bin] as f64
        } else {
            min + (bin as f64 + 0.5) / inv_extent
        };
        w[bin + 1] = w[bin] + weight;
        wx[bin + 1] = wx[bin] + weight * value;
        wxx[bin + 1] = wxx[bin] + weight * value * value;
    }

    let cost = |lo: usize, hi: usize| -> f64 {
        // Half-open bin range [lo, hi).
        let weight = w[hi] - w[lo];
        if weight <= 0.0 {
            return 0.0;
        }
        let sum = wx[hi] - wx[lo];
        (wxx[hi] - wxx[lo]) - sum * sum / weight
    };

    // dp[seg][b]: best cost covering bins [0, b) with `seg` segments.
    let mut dp = vec![f64::INFINITY; NUM_BINS + 1];
    let mut split = vec![vec![0usize; NUM_BINS + 1]; k];
    for b in 1..=NUM_BINS {
        dp[b] = cost(0, b);
    }
    for seg in 1..k {
        let mut next = vec![f64::INFINITY; NUM_BINS + 1];
        for b in 1..=NUM_BINS {
            for s in seg..b + 1 {
                let c = dp[s] + cost(s, b);
                if c < next[b] {
                    next[b] = c;
                    split[seg][b] = s;
                }
            }
        }
        dp = next;
    }

    // Walk the split table back to segment boundaries, oldest first.
    let mut bounds = vec![NUM_BINS; k + 1];
    bounds[0] = 0;
    let mut end = NUM_BINS;
    for seg in (1..k).rev() {
        let start = split[seg][end];
        bounds[seg] = start;
        end = start;
    }

    let mut codebook = Vec::with_capacity(k);
    for seg in 0..k {
        let (lo, hi) = (bounds[seg], bounds[seg + 1]);
        let weight = w[hi] - w[lo];
        let entry = if weight > 0.0 {
            (wx[hi] - wx[lo]) / weight
        } else {
            // Empty segment: fall back to its bin-range midpoint.
            min + (lo + hi) as f64 * 0.5 / inv_extent
        };
        codebook.push(entry as f32);
    }
    // Weighted means of ascending segments are themselves ascending, but
    // empty-segment fallbacks can tie; enforce the sorted contract.
    codebook.sort_by(f32::total_cmp);

    // Midpoints between adjacent entries partition the value axis; a binary
    // search on them is the nearest-entry lookup.
    let midpoints: Vec<f64> = codebook
        .windows(2)
        .map(|pair| (pair[0] as f64 + pair[1] as f64) * 0.5)
        .collect();
    let label_of = |v: f64| -> u8 { midpoints.partition_point(|&m| m < v) as u8 };

    let labels = DataTable::new(
        table
            .columns()
            .iter()
            .map(|c| {
                let data = (0..c.data.len())
                    .map(|i| label_of(c.data.get(i)))
                    .collect();
                Column::new(c.name.clone(), ColumnData::U8(data))
            })
            .collect(),
    )
    .expect("Mirrors input columns");

    let centroids = DataTable::new(vec![Column::new("codebook", ColumnData::F32(codebook))])
        .expect("Single column");

    Quantization { centroids, labels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn single_column(values: Vec<f32>) -> DataTable {
        DataTable::new(vec![Column::new("v", ColumnData::F32(values))]).unwrap()
    }

    #[test]
    fn codebook_is_sorted() {
        let values: Vec<f32> = (0..4096).map(|i| ((i * 37) % 997) as f32 * 0.37).collect();
        let result = quantize_1d(&single_column(values), 256, 0.5);
        let codebook = result.centroids.column("codebook").unwrap();
        let entries = codebook.data.as_f32().unwrap();
        assert!(entries.windows(2).all(|p| p[0] <= p[1]), "Codebook not sorted");
        assert_eq!(entries.len(), 256);
    }

    #[test]
    fn two_modes_get_their_own_entries() {
        let mut values = vec![0.0f32; 500];
        values.extend(vec![10.0f32; 500]);
        let result = quantize_1d(&single_column(values), 4, 0.5);
        let entries = result.centroids.column("codebook").unwrap();
        let entries = entries.data.as_f32().unwrap();
        // Both modes must be represented almost exactly.
        assert!(entries.iter().any(|&e| e.abs() < 0.1));
        assert!(entries.iter().any(|&e| (e - 10.0).abs() < 0.1));

        let labels = result.labels.column("v").unwrap().data.as_u8().unwrap().to_vec();
        // All samples of one mode share a label, and modes differ.
        assert!(labels[..500].iter().all(|&l| l == labels[0]));
        assert!(labels[500..].iter().all(|&l| l == labels[500]));
        assert_ne!(labels[0], labels[500]);
    }

    #[test]
    fn labels_pick_nearest_entry() {
        let values: Vec<f32> = (0..2000).map(|i| (i as f32 * 0.01).sin() * 5.0).collect();
        let result = quantize_1d(&single_column(values.clone()), 16, 0.5);
        let entries = result.centroids.column("codebook").unwrap().data.as_f32().unwrap().to_vec();
        let labels = result.labels.column("v").unwrap().data.as_u8().unwrap().to_vec();

        for (v, &label) in values.iter().zip(&labels) {
            let assigned = (entries[label as usize] - v).abs();
            let best = entries
                .iter()
                .map(|e| (e - v).abs())
                .fold(f32::INFINITY, f32::min);
            assert_approx_eq!(assigned, best, 1e-5);
        }
    }

    #[test]
    fn degenerate_input_is_constant() {
        let result = quantize_1d(&single_column(vec![3.25; 100]), 8, 0.5);
        let entries = result.centroids.column("codebook").unwrap();
        let entries = entries.data.as_f32().unwrap();
        assert!(entries.iter().all(|&e| e == 3.25));
        let labels = result.labels.column("v").unwrap().data.as_u8().unwrap().to_vec();
        assert!(labels.iter().all(|&l| l == 0));
    }
}
