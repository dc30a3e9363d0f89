use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};
use splat_table::{DataTable, sh_coeffs_for_degree, sh_degree_for_table};

use crate::sh_rotate::ShRotation;

/// Accumulated affine edit: consecutive translate/rotate/scale actions fold
/// into one of these and the table is touched once. The parts compose into
/// the fixed `M = T · R · S` regardless of the order the actions arrived in.
#[derive(Debug, Clone)]
pub struct Transform {
    translation: Vec3,
    rotation: Quat,
    scale: f32,
    identity: bool,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            identity: true,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.translation += offset;
        self.identity = false;
    }

    /// Euler angles in degrees, intrinsic x-y-z order.
    pub fn rotate(&mut self, euler_deg: Vec3) {
        let quat = Quat::from_euler(
            EulerRot::XYZ,
            euler_deg.x.to_radians(),
            euler_deg.y.to_radians(),
            euler_deg.z.to_radians(),
        );
        self.rotation = quat * self.rotation;
        self.identity = false;
    }

    pub fn scale(&mut self, factor: f32) {
        self.scale *= factor;
        self.identity = false;
    }

    fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            self.rotation,
            self.translation,
        )
    }
}

fn gather(table: &DataTable, name: &str) -> Option<Vec<f64>> {
    let column = table.column(name)?;
    Some((0..column.data.len()).map(|i| column.data.get(i)).collect())
}

fn scatter(table: &mut DataTable, name: &str, values: &[f64]) {
    let column = table.column_mut(name).expect("Gathered earlier");
    for (i, &v) in values.iter().enumerate() {
        column.data.set(i, v);
    }
}

/// Applies the accumulated transform to every row: positions through the
/// 4x4, quaternions left-multiplied by the rotation, log-scales shifted by
/// `ln(scale)` and SH bands rotated in the real basis.
pub fn apply_transform(table: &mut DataTable, transform: &Transform) {
    if transform.is_identity() {
        return;
    }
    let num_rows = table.num_rows();

    if let (Some(mut x), Some(mut y), Some(mut z)) =
        (gather(table, "x"), gather(table, "y"), gather(table, "z"))
    {
        let matrix = transform.matrix();
        for i in 0..num_rows {
            let p = matrix.transform_point3(Vec3::new(x[i] as f32, y[i] as f32, z[i] as f32));
            x[i] = p.x as f64;
            y[i] = p.y as f64;
            z[i] = p.z as f64;
        }
        scatter(table, "x", &x);
        scatter(table, "y", &y);
        scatter(table, "z", &z);
    }

    let rotating = transform.rotation != Quat::IDENTITY;
    if rotating
        && let (Some(mut w), Some(mut qx), Some(mut qy), Some(mut qz)) = (
            gather(table, "rot_0"),
            gather(table, "rot_1"),
            gather(table, "rot_2"),
            gather(table, "rot_3"),
        )
    {
        for i in 0..num_rows {
            // Stored scalar-first (w, x, y, z).
            let q = transform.rotation
                * Quat::from_xyzw(qx[i] as f32, qy[i] as f32, qz[i] as f32, w[i] as f32);
            w[i] = q.w as f64;
            qx[i] = q.x as f64;
            qy[i] = q.y as f64;
            qz[i] = q.z as f64;
        }
        scatter(table, "rot_0", &w);
        scatter(table, "rot_1", &qx);
        scatter(table, "rot_2", &qy);
        scatter(table, "rot_3", &qz);
    }

    if transform.scale != 1.0 {
        let log_scale = (transform.scale as f64).ln();
        for name in ["scale_0", "scale_1", "scale_2"] {
            if let Some(column) = table.column_mut(name) {
                for i in 0..num_rows {
                    let v = column.data.get(i);
                    column.data.set(i, v + log_scale);
                }
            }
        }
    }

    let degree = sh_degree_for_table(table);
    if degree > 0 && rotating {
        let rotation = ShRotation::new(Mat3::from_quat(transform.rotation));
        let coeffs_per_channel = sh_coeffs_for_degree(degree);

        // Channel-major layout: all red coefficients, then green, then blue.
        for channel in 0..3 {
            let names: Vec<String> = (0..coeffs_per_channel)
                .map(|k| format!("f_rest_{}", channel * coeffs_per_channel + k))
                .collect();
            let mut coeffs: Vec<Vec<f64>> = names
                .iter()
                .map(|name| gather(table, name).expect("Degree checked"))
                .collect();

            let mut scratch = vec![0.0f64; coeffs_per_channel];
            for i in 0..num_rows {
                for (slot, column) in scratch.iter_mut().zip(&coeffs) {
                    *slot = column[i];
                }
                rotation.rotate_channel(&mut scratch);
                for (slot, column) in scratch.iter().zip(&mut coeffs) {
                    column[i] = *slot;
                }
            }

            for (name, values) in names.iter().zip(&coeffs) {
                scatter(table, name, values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use splat_table::{Column, ColumnData};

    fn grid_table() -> DataTable {
        // 16 splats on a 4x4 xz grid, y = 0.
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
            Column::new("rot_0", ColumnData::F32(vec![1.0; n])),
            Column::new("rot_1", ColumnData::F32(vec![0.0; n])),
            Column::new("rot_2", ColumnData::F32(vec![0.0; n])),
            Column::new("rot_3", ColumnData::F32(vec![0.0; n])),
            Column::new("scale_0", ColumnData::F32(vec![0.1f32.ln(); n])),
            Column::new("scale_1", ColumnData::F32(vec![0.1f32.ln(); n])),
            Column::new("scale_2", ColumnData::F32(vec![0.1f32.ln(); n])),
        ])
        .unwrap()
    }

    fn mean(table: &DataTable, name: &str) -> f64 {
        let col = table.column(name).unwrap();
        (0..col.data.len()).map(|i| col.data.get(i)).sum::<f64>() / col.data.len() as f64
    }

    fn min_max(table: &DataTable, name: &str) -> (f64, f64) {
        let col = table.column(name).unwrap();
        (0..col.data.len()).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), i| {
            let v = col.data.get(i);
            (lo.min(v), hi.max(v))
        })
    }

    #[test]
    fn scale_then_translate_chain() {
        let mut table = grid_table();
        let original_mean = mean(&table, "x");

        let mut t = Transform::identity();
        t.scale(2.0);
        t.translate(Vec3::new(100.0, 0.0, 0.0));
        apply_transform(&mut table, &t);

        assert_approx_eq!(mean(&table, "x"), original_mean * 2.0 + 100.0, 1e-4);
        // Log-scales shift by ln(2).
        let scale = table.column("scale_0").unwrap().data.get(0);
        assert_approx_eq!(scale, (0.1f64).ln() + 2.0f64.ln(), 1e-5);
    }

    #[test]
    fn rotate_y_90_swaps_axes() {
        let mut table = grid_table();
        let (old_x_min, old_x_max) = min_max(&table, "x");

        let mut t = Transform::identity();
        t.rotate(Vec3::new(0.0, 90.0, 0.0));
        apply_transform(&mut table, &t);

        let (new_z_min, new_z_max) = min_max(&table, "z");
        assert_approx_eq!(new_z_min, -old_x_max, 1e-4);
        assert_approx_eq!(new_z_max, -old_x_min, 1e-4);

        // Quaternions pick up the same rotation.
        let w = table.column("rot_0").unwrap().data.get(0);
        let y = table.column("rot_2").unwrap().data.get(0);
        assert_approx_eq!(w, (std::f64::consts::FRAC_PI_4).cos(), 1e-5);
        assert_approx_eq!(y, (std::f64::consts::FRAC_PI_4).sin(), 1e-5);
    }

    #[test]
    fn translations_compose_additively() {
        let mut split = grid_table();
        let mut t = Transform::identity();
        t.translate(Vec3::new(1.0, 2.0, 3.0));
        t.translate(Vec3::new(-0.5, 0.25, 4.0));
        apply_transform(&mut split, &t);

        let mut combined = grid_table();
        let mut t = Transform::identity();
        t.translate(Vec3::new(0.5, 2.25, 7.0));
        apply_transform(&mut combined, &t);

        for name in ["x", "y", "z"] {
            assert_approx_eq!(mean(&split, name), mean(&combined, name), 1e-5);
        }
    }

    #[test]
    fn sh_rotation_roundtrip_through_table() {
        let mut table = grid_table();
        let n = table.num_rows();
        for i in 0..45 {
            let values: Vec<f32> = (0..n).map(|r| ((r * 7 + i) % 11) as f32 * 0.1 - 0.5).collect();
            table
                .add_column(Column::new(format!("f_rest_{i}"), ColumnData::F32(values)))
                .unwrap();
        }
        let original = table.clone();

        let euler = Vec3::new(25.0, -40.0, 110.0);
        let mut forward = Transform::identity();
        forward.rotate(euler);
        apply_transform(&mut table, &forward);

        // Euler angles of the inverse rotation.
        let inverse = Quat::from_euler(
            EulerRot::XYZ,
            euler.x.to_radians(),
            euler.y.to_radians(),
            euler.z.to_radians(),
        )
        .inverse();
        let (ix, iy, iz) = inverse.to_euler(EulerRot::XYZ);
        let mut backward = Transform::identity();
        backward.rotate(Vec3::new(ix.to_degrees(), iy.to_degrees(), iz.to_degrees()));
        apply_transform(&mut table, &backward);

        for i in 0..45 {
            let name = format!("f_rest_{i}");
            let a = table.column(&name).unwrap();
            let b = original.column(&name).unwrap();
            for r in 0..n {
                assert_approx_eq!(a.data.get(r), b.data.get(r), 1e-4);
            }
        }
    }
}
