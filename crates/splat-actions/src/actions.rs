use std::str::FromStr;

use glam::Vec3;
use splat_table::{Column, ColumnData, DataTable, TableError, sh_coeffs_for_degree, sigmoid};
use thiserror::Error;

use crate::morton::morton_order;
use crate::transform::{Transform, apply_transform};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
}

impl Comparator {
    fn matches(self, value: f64, reference: f64) -> bool {
        match self {
            Self::Lt => value < reference,
            Self::Lte => value <= reference,
            Self::Gt => value > reference,
            Self::Gte => value >= reference,
            Self::Eq => value == reference,
            Self::Neq => value != reference,
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            other => Err(format!("Invalid comparator '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisibilityTarget {
    Count(usize),
    Percent(f64),
}

/// One edit step of the processing pipeline. Order of application is
/// observable and preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessAction {
    Translate(Vec3),
    /// Euler angles in degrees, x-y-z order.
    Rotate(Vec3),
    Scale(f32),
    FilterNan,
    FilterValue {
        column: String,
        cmp: Comparator,
        value: f64,
    },
    FilterBands(u32),
    FilterBox {
        min: Vec3,
        max: Vec3,
    },
    FilterSphere {
        center: Vec3,
        radius: f32,
    },
    FilterVisibility(VisibilityTarget),
    MortonOrder,
    Lod(i32),
    /// Only meaningful to generator inputs; a no-op on real tables.
    Param {
        name: String,
        value: String,
    },
}

impl ProcessAction {
    fn as_transform_step(&self) -> Option<TransformStep> {
        match self {
            Self::Translate(v) => Some(TransformStep::Translate(*v)),
            Self::Rotate(v) => Some(TransformStep::Rotate(*v)),
            Self::Scale(s) => Some(TransformStep::Scale(*s)),
            _ => None,
        }
    }
}

enum TransformStep {
    Translate(Vec3),
    Rotate(Vec3),
    Scale(f32),
}

/// Runs the action list left to right. Adjacent translate/rotate/scale steps
/// fold into one affine pass; each filter produces a fresh table.
pub fn apply_actions(
    mut table: DataTable,
    actions: &[ProcessAction],
) -> Result<DataTable, ActionError> {
    let mut pending = Transform::identity();

    for action in actions {
        if let Some(step) = action.as_transform_step() {
            match step {
                TransformStep::Translate(v) => pending.translate(v),
                TransformStep::Rotate(v) => pending.rotate(v),
                TransformStep::Scale(s) => pending.scale(s),
            }
            continue;
        }

        if !pending.is_identity() {
            apply_transform(&mut table, &pending);
            pending = Transform::identity();
        }

        table = apply_single(table, action)?;
    }

    if !pending.is_identity() {
        apply_transform(&mut table, &pending);
    }
    Ok(table)
}

fn position_columns(table: &DataTable) -> Result<[&Column; 3], ActionError> {
    Ok([
        table
            .column("x")
            .ok_or_else(|| ActionError::UnknownColumn("x".to_owned()))?,
        table
            .column("y")
            .ok_or_else(|| ActionError::UnknownColumn("y".to_owned()))?,
        table
            .column("z")
            .ok_or_else(|| ActionError::UnknownColumn("z".to_owned()))?,
    ])
}

fn apply_single(mut table: DataTable, action: &ProcessAction) -> Result<DataTable, ActionError> {
    match action {
        ProcessAction::Translate(_) | ProcessAction::Rotate(_) | ProcessAction::Scale(_) => {
            unreachable!("Transform steps are folded by apply_actions")
        }

        ProcessAction::FilterNan => {
            let keep: Vec<usize> = (0..table.num_rows())
                .filter(|&i| {
                    table
                        .columns()
                        .iter()
                        .all(|c| c.data.get(i).is_finite())
                })
                .collect();
            Ok(table.permute_rows(&keep))
        }

        ProcessAction::FilterValue { column, cmp, value } => {
            let col = table
                .column(column)
                .ok_or_else(|| ActionError::UnknownColumn(column.clone()))?;
            let keep: Vec<usize> = (0..table.num_rows())
                .filter(|&i| cmp.matches(col.data.get(i), *value))
                .collect();
            Ok(table.permute_rows(&keep))
        }

        ProcessAction::FilterBands(band) => {
            let keep_coeffs = sh_coeffs_for_degree(*band) * 3;
            for k in keep_coeffs..45 {
                table.remove_column(&format!("f_rest_{k}"));
            }
            Ok(table)
        }

        ProcessAction::FilterBox { min, max } => {
            let [cx, cy, cz] = position_columns(&table)?;
            let keep: Vec<usize> = (0..table.num_rows())
                .filter(|&i| {
                    let p = Vec3::new(
                        cx.data.get(i) as f32,
                        cy.data.get(i) as f32,
                        cz.data.get(i) as f32,
                    );
                    p.x >= min.x
                        && p.x <= max.x
                        && p.y >= min.y
                        && p.y <= max.y
                        && p.z >= min.z
                        && p.z <= max.z
                })
                .collect();
            Ok(table.permute_rows(&keep))
        }

        ProcessAction::FilterSphere { center, radius } => {
            let [cx, cy, cz] = position_columns(&table)?;
            let r2 = (*radius as f64) * (*radius as f64);
            let keep: Vec<usize> = (0..table.num_rows())
                .filter(|&i| {
                    let dx = cx.data.get(i) - center.x as f64;
                    let dy = cy.data.get(i) - center.y as f64;
                    let dz = cz.data.get(i) - center.z as f64;
                    dx * dx + dy * dy + dz * dz <= r2
                })
                .collect();
            Ok(table.permute_rows(&keep))
        }

        ProcessAction::FilterVisibility(target) => {
            let opacity = table
                .column("opacity")
                .ok_or_else(|| ActionError::UnknownColumn("opacity".to_owned()))?;
            let scales = [
                table
                    .column("scale_0")
                    .ok_or_else(|| ActionError::UnknownColumn("scale_0".to_owned()))?,
                table
                    .column("scale_1")
                    .ok_or_else(|| ActionError::UnknownColumn("scale_1".to_owned()))?,
                table
                    .column("scale_2")
                    .ok_or_else(|| ActionError::UnknownColumn("scale_2".to_owned()))?,
            ];

            // Opacity times the volume of the bounding box of the Gaussian.
            let score = |i: usize| {
                sigmoid(opacity.data.get(i))
                    * (scales[0].data.get(i) + scales[1].data.get(i) + scales[2].data.get(i)).exp()
            };

            let num_rows = table.num_rows();
            let mut ranked: Vec<usize> = (0..num_rows).collect();
            ranked.sort_by(|&a, &b| score(b).total_cmp(&score(a)));

            let count = match target {
                VisibilityTarget::Count(count) => *count,
                VisibilityTarget::Percent(percent) => {
                    (percent * num_rows as f64 / 100.0).round() as usize
                }
            }
            .min(num_rows);

            // Keep the survivors in their original row order.
            let mut keep = ranked[..count].to_vec();
            keep.sort_unstable();
            Ok(table.permute_rows(&keep))
        }

        ProcessAction::MortonOrder => {
            let order = morton_order(&table);
            table.permute_rows_in_place(&order);
            Ok(table)
        }

        ProcessAction::Lod(level) => {
            let num_rows = table.num_rows();
            table.remove_column("lod");
            table.add_column(Column::new(
                "lod",
                ColumnData::I32(vec![*level; num_rows]),
            ))?;
            Ok(table)
        }

        ProcessAction::Param { .. } => Ok(table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_table::inv_sigmoid;

    fn grid() -> DataTable {
        let steps = [-1.5f32, -0.5, 0.5, 1.5];
        let mut x = vec![];
        let mut z = vec![];
        for &gx in &steps {
            for &gz in &steps {
                x.push(gx);
                z.push(gz);
            }
        }
        let n = x.len();
        DataTable::new(vec![
            Column::new("x", ColumnData::F32(x)),
            Column::new("y", ColumnData::F32(vec![0.0; n])),
            Column::new("z", ColumnData::F32(z)),
            Column::new("opacity", ColumnData::F32(vec![inv_sigmoid(0.9) as f32; n])),
            Column::new("scale_0", ColumnData::F32(vec![0.1f32.ln(); n])),
            Column::new("scale_1", ColumnData::F32(vec![0.1f32.ln(); n])),
            Column::new("scale_2", ColumnData::F32(vec![0.1f32.ln(); n])),
        ])
        .unwrap()
    }

    fn sorted_values(table: &DataTable, name: &str) -> Vec<f64> {
        let col = table.column(name).unwrap();
        let mut values: Vec<f64> = (0..col.data.len()).map(|i| col.data.get(i)).collect();
        values.sort_by(f64::total_cmp);
        values
    }

    #[test]
    fn filter_box_keeps_half() {
        let table = grid();
        let result = apply_actions(
            table,
            &[ProcessAction::FilterBox {
                min: Vec3::new(0.0, f32::NEG_INFINITY, f32::NEG_INFINITY),
                max: Vec3::splat(f32::INFINITY),
            }],
        )
        .unwrap();

        assert!(result.num_rows() > 0 && result.num_rows() < 16);
        let col = result.column("x").unwrap();
        assert!((0..result.num_rows()).all(|i| col.data.get(i) >= 0.0));
    }

    #[test]
    fn filter_sphere_is_euclidean() {
        let table = grid();
        let result = apply_actions(
            table,
            &[ProcessAction::FilterSphere {
                center: Vec3::ZERO,
                radius: 1.0,
            }],
        )
        .unwrap();
        // Only the four innermost grid points are within distance 1.
        assert_eq!(result.num_rows(), 4);
    }

    #[test]
    fn filter_value_rejects_unknown_column() {
        let table = grid();
        let result = apply_actions(
            table,
            &[ProcessAction::FilterValue {
                column: "no_such".to_owned(),
                cmp: Comparator::Gt,
                value: 0.0,
            }],
        );
        assert!(matches!(result, Err(ActionError::UnknownColumn(_))));
    }

    #[test]
    fn filter_nan_drops_bad_rows() {
        let mut table = grid();
        table.column_mut("y").unwrap().data.set(3, f64::NAN);
        table.column_mut("z").unwrap().data.set(7, f64::INFINITY);

        let result = apply_actions(table, &[ProcessAction::FilterNan]).unwrap();
        assert_eq!(result.num_rows(), 14);
    }

    #[test]
    fn morton_preserves_value_multiset() {
        let table = grid();
        let before_x = sorted_values(&table, "x");
        let before_z = sorted_values(&table, "z");

        let result = apply_actions(table, &[ProcessAction::MortonOrder]).unwrap();
        assert_eq!(sorted_values(&result, "x"), before_x);
        assert_eq!(sorted_values(&result, "z"), before_z);
    }

    #[test]
    fn visibility_keeps_top_scores() {
        let mut table = grid();
        // Make row 5 clearly dominant.
        table.column_mut("scale_0").unwrap().data.set(5, 2.0);

        let result = apply_actions(
            table,
            &[ProcessAction::FilterVisibility(VisibilityTarget::Count(1))],
        )
        .unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(result.column("scale_0").unwrap().data.get(0), 2.0);
    }

    #[test]
    fn visibility_percent_rounds() {
        let table = grid();
        let result = apply_actions(
            table,
            &[ProcessAction::FilterVisibility(VisibilityTarget::Percent(
                50.0,
            ))],
        )
        .unwrap();
        assert_eq!(result.num_rows(), 8);
    }

    #[test]
    fn lod_overwrites() {
        let table = grid();
        let result = apply_actions(
            table,
            &[ProcessAction::Lod(2), ProcessAction::Lod(-1)],
        )
        .unwrap();
        let lod = result.column("lod").unwrap();
        assert!((0..result.num_rows()).all(|i| lod.data.get(i) == -1.0));
    }

    #[test]
    fn filter_bands_drops_columns() {
        let mut table = grid();
        for i in 0..45 {
            table
                .add_column(Column::new(
                    format!("f_rest_{i}"),
                    ColumnData::F32(vec![0.0; 16]),
                ))
                .unwrap();
        }
        let result = apply_actions(table, &[ProcessAction::FilterBands(1)]).unwrap();
        assert!(result.has_column("f_rest_8"));
        assert!(!result.has_column("f_rest_9"));
        assert!(!result.has_column("f_rest_44"));
    }

    #[test]
    fn empty_filter_result_is_legal() {
        let table = grid();
        let result = apply_actions(
            table,
            &[ProcessAction::FilterValue {
                column: "x".to_owned(),
                cmp: Comparator::Gt,
                value: 100.0,
            }],
        )
        .unwrap();
        assert_eq!(result.num_rows(), 0);
    }
}
