use glam::{Quat, Vec3, Vec4};

pub fn unpack_unorm(value: u32, bits: u32) -> f32 {
    let max = (1u32 << bits) - 1;
    (value & max) as f32 / max as f32
}

pub fn pack_unorm(value: f32, bits: u32) -> u32 {
    let max = ((1u32 << bits) - 1) as f32;
    (value.clamp(0.0, 1.0) * max).round() as u32
}

/// 11/10/11 unorm triple: bits [31:21] x, [20:11] y, [10:0] z.
pub fn decode_vec_11_10_11(packed: u32) -> Vec3 {
    Vec3::new(
        unpack_unorm(packed >> 21, 11),
        unpack_unorm(packed >> 11, 10),
        unpack_unorm(packed, 11),
    )
}

pub fn encode_vec_11_10_11(v: Vec3) -> u32 {
    (pack_unorm(v.x, 11) << 21) | (pack_unorm(v.y, 10) << 11) | pack_unorm(v.z, 11)
}

/// Four 8-bit unorms, r in the top byte.
pub fn decode_vec_8_8_8_8(packed: u32) -> Vec4 {
    Vec4::new(
        unpack_unorm(packed >> 24, 8),
        unpack_unorm(packed >> 16, 8),
        unpack_unorm(packed >> 8, 8),
        unpack_unorm(packed, 8),
    )
}

pub fn encode_vec_8_8_8_8(v: Vec4) -> u32 {
    (pack_unorm(v.x, 8) << 24)
        | (pack_unorm(v.y, 8) << 16)
        | (pack_unorm(v.z, 8) << 8)
        | pack_unorm(v.w, 8)
}

/// Smallest-three quaternion decode. Bits [31:30] say which component was
/// dropped; the remaining three sit in [29:20], [19:10], [9:0] as 10-bit
/// unorms over [-sqrt(0.5), sqrt(0.5)]. Components are scalar-first
/// (w, x, y, z).
pub fn decode_quat(packed: u32) -> Quat {
    let unpack = |shift: u32| (unpack_unorm(packed >> shift, 10) - 0.5) * std::f32::consts::SQRT_2;
    let a = unpack(20);
    let b = unpack(10);
    let c = unpack(0);
    let m = (1.0 - (a * a + b * b + c * c)).max(0.0).sqrt();

    let (w, x, y, z) = match packed >> 30 {
        0 => (m, a, b, c),
        1 => (a, m, b, c),
        2 => (a, b, m, c),
        _ => (a, b, c, m),
    };
    Quat::from_xyzw(x, y, z, w)
}

/// Inverse of [`decode_quat`]: drops the largest-magnitude component (sign
/// flipped so it is positive) and stores the other three.
pub fn encode_quat(q: Quat) -> u32 {
    let q = q.normalize();
    let components = [q.w, q.x, q.y, q.z];
    let largest = components
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, _)| i)
        .expect("Four components");

    let sign = if components[largest] < 0.0 { -1.0 } else { 1.0 };
    let rest: Vec<f32> = components
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != largest)
        .map(|(_, &v)| v * sign)
        .collect();

    let pack = |v: f32| pack_unorm(v / std::f32::consts::SQRT_2 + 0.5, 10);
    ((largest as u32) << 30) | (pack(rest[0]) << 20) | (pack(rest[1]) << 10) | pack(rest[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn vec_11_10_11_roundtrip() {
        let v = Vec3::new(0.25, 0.75, 1.0);
        let decoded = decode_vec_11_10_11(encode_vec_11_10_11(v));
        assert_approx_eq!(decoded.x, v.x, 1.0 / 2047.0);
        assert_approx_eq!(decoded.y, v.y, 1.0 / 1023.0);
        assert_approx_eq!(decoded.z, v.z, 1.0 / 2047.0);
    }

    #[test]
    fn identity_quat_for_every_dropped_slot() {
        // Identity packs all three stored components at the 0.5 mark.
        let mid = pack_unorm(0.5, 10);
        for which in 0..4u32 {
            let packed = (which << 30) | (mid << 20) | (mid << 10) | mid;
            let q = decode_quat(packed);
            let expected = match which {
                0 => Quat::from_xyzw(0.0, 0.0, 0.0, 1.0),
                1 => Quat::from_xyzw(1.0, 0.0, 0.0, 0.0),
                2 => Quat::from_xyzw(0.0, 1.0, 0.0, 0.0),
                _ => Quat::from_xyzw(0.0, 0.0, 1.0, 0.0),
            };
            assert_approx_eq!(q.w, expected.w, 1e-3);
            assert_approx_eq!(q.x, expected.x, 1e-3);
            assert_approx_eq!(q.y, expected.y, 1e-3);
            assert_approx_eq!(q.z, expected.z, 1e-3);
        }
    }

    #[test]
    fn quat_roundtrip_up_to_sign() {
        let cases = [
            Quat::from_xyzw(0.1, -0.2, 0.3, 0.9),
            Quat::from_xyzw(-0.7, 0.1, 0.1, 0.2),
            Quat::from_xyzw(0.5, 0.5, 0.5, 0.5),
            Quat::from_xyzw(0.0, 0.0, 0.0, -1.0),
        ];
        for q in cases {
            let q = q.normalize();
            let decoded = decode_quat(encode_quat(q));
            let dot = q.dot(decoded).abs();
            assert!(dot > 1.0 - 1e-5, "Quat drifted: {q:?} -> {decoded:?}");
        }
    }
}
