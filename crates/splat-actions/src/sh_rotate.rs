use glam::Mat3;

/// Rotation matrix for one SH band, (2l+1) square, centered indexing.
struct BandMatrix {
    l: i32,
    data: Vec<f64>,
}

impl BandMatrix {
    fn zero(l: i32) -> Self {
        let n = (2 * l + 1) as usize;
        Self {
            l,
            data: vec![0.0; n * n],
        }
    }

    fn get(&self, m: i32, n: i32) -> f64 {
        let size = (2 * self.l + 1) as usize;
        self.data[(m + self.l) as usize * size + (n + self.l) as usize]
    }

    fn set(&mut self, m: i32, n: i32, value: f64) {
        let size = (2 * self.l + 1) as usize;
        self.data[(m + self.l) as usize * size + (n + self.l) as usize] = value;
    }
}

fn kronecker(a: i32, b: i32) -> f64 {
    if a == b { 1.0 } else { 0.0 }
}

/// The P/U/V/W recurrence of Ivanic & Ruedenberg (with the published errata
/// applied), lifting the band l-1 matrix to band l.
fn p(i: i32, a: i32, b: i32, l: i32, band1: &BandMatrix, prev: &BandMatrix) -> f64 {
    if b == l {
        band1.get(i, 1) * prev.get(a, l - 1) - band1.get(i, -1) * prev.get(a, -(l - 1))
    } else if b == -l {
        band1.get(i, 1) * prev.get(a, -(l - 1)) + band1.get(i, -1) * prev.get(a, l - 1)
    } else {
        band1.get(i, 0) * prev.get(a, b)
    }
}

fn u_term(m: i32, n: i32, l: i32, band1: &BandMatrix, prev: &BandMatrix) -> f64 {
    p(0, m, n, l, band1, prev)
}

fn v_term(m: i32, n: i32, l: i32, band1: &BandMatrix, prev: &BandMatrix) -> f64 {
    if m == 0 {
        p(1, 1, n, l, band1, prev) + p(-1, -1, n, l, band1, prev)
    } else if m > 0 {
        p(1, m - 1, n, l, band1, prev) * (1.0 + kronecker(m, 1)).sqrt()
            - p(-1, -m + 1, n, l, band1, prev) * (1.0 - kronecker(m, 1))
    } else {
        p(1, m + 1, n, l, band1, prev) * (1.0 - kronecker(m, -1))
            + p(-1, -m - 1, n, l, band1, prev) * (1.0 + kronecker(m, -1)).sqrt()
    }
}

fn w_term(m: i32, n: i32, l: i32, band1: &BandMatrix, prev: &BandMatrix) -> f64 {
    if m > 0 {
        p(1, m + 1, n, l, band1, prev) + p(-1, -m - 1, n, l, band1, prev)
    } else {
        p(1, m - 1, n, l, band1, prev) - p(-1, -m + 1, n, l, band1, prev)
    }
}

fn lift_band(l: i32, band1: &BandMatrix, prev: &BandMatrix) -> BandMatrix {
    let mut out = BandMatrix::zero(l);
    for m in -l..=l {
        for n in -l..=l {
            let d = kronecker(m, 0);
            let denom = if n.abs() == l {
                (2 * l) as f64 * (2 * l - 1) as f64
            } else {
                ((l + n) * (l - n)) as f64
            };
            let u = (((l + m) * (l - m)) as f64 / denom).sqrt();
            let v = 0.5
                * ((1.0 + d) * (l + m.abs() - 1) as f64 * (l + m.abs()) as f64 / denom).sqrt()
                * (1.0 - 2.0 * d);
            let w = -0.5 * (((l - m.abs() - 1) * (l - m.abs())) as f64 / denom).sqrt() * (1.0 - d);

            let mut value = 0.0;
            if u != 0.0 {
                value += u * u_term(m, n, l, band1, prev);
            }
            if v != 0.0 {
                value += v * v_term(m, n, l, band1, prev);
            }
            if w != 0.0 {
                value += w * w_term(m, n, l, band1, prev);
            }
            out.set(m, n, value);
        }
    }
    out
}

/// Real-SH basis rotation for bands 1..=3, derived from a 3x3 rotation
/// matrix via the recursive band-lifting formulation. The matrices are
/// orthogonal, so rotating by `R` then `R⁻¹` is the identity up to float
/// error.
pub struct ShRotation {
    bands: Vec<BandMatrix>,
}

/// Per-channel coefficient offsets of bands 1, 2, 3 in the cumulative
/// 15-coefficient layout.
const BAND_OFFSETS: [usize; 4] = [0, 3, 8, 15];

impl ShRotation {
    pub fn new(rotation: Mat3) -> Self {
        // Real-SH band 1 is the rotation itself in (y, z, x) basis order.
        let perm = [1usize, 2, 0];
        let mut band1 = BandMatrix::zero(1);
        for i in 0..3usize {
            for j in 0..3usize {
                // glam is column-major: col(j)[i] is row i, column j.
                band1.set(
                    i as i32 - 1,
                    j as i32 - 1,
                    rotation.col(perm[j])[perm[i]] as f64,
                );
            }
        }

        let band2 = lift_band(2, &band1, &band1);
        let band3 = lift_band(3, &band1, &band2);
        Self {
            bands: vec![band1, band2, band3],
        }
    }

    /// Rotates one channel's cumulative coefficients in place. `coeffs`
    /// holds 3, 8 or 15 values (bands 1, 1..2 or 1..3).
    pub fn rotate_channel(&self, coeffs: &mut [f64]) {
        for (band, matrix) in self.bands.iter().enumerate() {
            let l = band + 1;
            let (start, end) = (BAND_OFFSETS[band], BAND_OFFSETS[band + 1]);
            if coeffs.len() < end {
                break;
            }
            let input = coeffs[start..end].to_vec();
            for m in -(l as i32)..=(l as i32) {
                let mut sum = 0.0;
                for n in -(l as i32)..=(l as i32) {
                    sum += matrix.get(m, n) * input[(n + l as i32) as usize];
                }
                coeffs[start + (m + l as i32) as usize] = sum;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::{EulerRot, Quat};

    fn rotation(x_deg: f32, y_deg: f32, z_deg: f32) -> Mat3 {
        Mat3::from_quat(Quat::from_euler(
            EulerRot::XYZ,
            x_deg.to_radians(),
            y_deg.to_radians(),
            z_deg.to_radians(),
        ))
    }

    #[test]
    fn identity_rotation_is_identity() {
        let sh = ShRotation::new(Mat3::IDENTITY);
        let mut coeffs: Vec<f64> = (0..15).map(|i| i as f64 * 0.31 - 2.0).collect();
        let original = coeffs.clone();
        sh.rotate_channel(&mut coeffs);
        for (a, b) in coeffs.iter().zip(&original) {
            assert_approx_eq!(a, b, 1e-12);
        }
    }

    #[test]
    fn band_matrices_are_orthogonal() {
        let sh = ShRotation::new(rotation(31.0, -47.0, 112.0));
        for matrix in &sh.bands {
            let l = matrix.l;
            for m in -l..=l {
                for n in -l..=l {
                    let dot: f64 = (-l..=l).map(|k| matrix.get(m, k) * matrix.get(n, k)).sum();
                    assert_approx_eq!(dot, kronecker(m, n), 1e-9);
                }
            }
        }
    }

    #[test]
    fn rotate_then_inverse_restores() {
        let forward = rotation(20.0, 65.0, -33.0);
        let sh = ShRotation::new(forward);
        let sh_inv = ShRotation::new(forward.transpose());

        let mut coeffs: Vec<f64> = (0..15).map(|i| ((i * 13 % 7) as f64 - 3.0) * 0.5).collect();
        let original = coeffs.clone();
        sh.rotate_channel(&mut coeffs);
        sh_inv.rotate_channel(&mut coeffs);
        for (a, b) in coeffs.iter().zip(&original) {
            assert_approx_eq!(a, b, 1e-6);
        }
    }

    #[test]
    fn composition_matches_composed_rotation() {
        let ra = rotation(15.0, 0.0, 40.0);
        let rb = rotation(-30.0, 70.0, 5.0);

        let mut via_steps: Vec<f64> = (0..15).map(|i| (i as f64).cos()).collect();
        let mut direct = via_steps.clone();

        ShRotation::new(ra).rotate_channel(&mut via_steps);
        ShRotation::new(rb).rotate_channel(&mut via_steps);
        ShRotation::new(rb * ra).rotate_channel(&mut direct);

        for (a, b) in via_steps.iter().zip(&direct) {
            assert_approx_eq!(a, b, 1e-6);
        }
    }
}
