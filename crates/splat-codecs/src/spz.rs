use std::io::Read;

use splat_table::{Column, ColumnData, DataTable, inv_sigmoid};
use splat_vfs::ReadStream;

use crate::CodecError;

/// "NGSP" little-endian.
const MAGIC: u32 = 0x5053_474e;
const HEADER_BYTES: usize = 16;

/// Band-0 color scale used by the format (not the usual SH_C0).
const COLOR_SCALE: f64 = 0.15;

/// Cumulative SH coefficients per channel for degrees 0..=3.
const SH_PER_CHANNEL: [usize; 4] = [0, 3, 8, 15];

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("spz", detail)
}

fn unquantize_sh(byte: u8) -> f32 {
    (byte as f32 - 128.0) / 128.0
}

/// Reads the Niantic `.spz` layout (versions 2 and 3), transparently
/// gunzipping wrapped payloads.
pub async fn read_spz(mut stream: ReadStream) -> Result<DataTable, CodecError> {
    let mut bytes = stream.read_all().await?;

    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut inflated = Vec::with_capacity(bytes.len() * 4);
        flate2::read::GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|_| bad("Corrupt gzip wrapper"))?;
        bytes = inflated;
    }

    if bytes.len() < HEADER_BYTES {
        return Err(bad("File too small for header"));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
    if magic != MAGIC {
        return Err(bad("Bad magic"));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
    if !(2..=3).contains(&version) {
        return Err(CodecError::unsupported("spz", format!("version {version}")));
    }
    let count = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")) as usize;
    let sh_degree = bytes[12] as usize;
    let fractional_bits = bytes[13];
    if sh_degree > 3 {
        return Err(bad(format!("Invalid SH degree {sh_degree}")));
    }

    // Smallest-three rotations arrived with version 3.
    let rotation_bytes = if version >= 3 { 4 } else { 3 };
    let sh_per_channel = SH_PER_CHANNEL[sh_degree];
    let sh_bytes = sh_per_channel * 3;

    // Attribute-major payload: positions, alphas, colors, scales,
    // rotations, then SH.
    let positions_at = HEADER_BYTES;
    let alphas_at = positions_at + count * 9;
    let colors_at = alphas_at + count;
    let scales_at = colors_at + count * 3;
    let rotations_at = scales_at + count * 3;
    let sh_at = rotations_at + count * rotation_bytes;
    if bytes.len() < sh_at + count * sh_bytes {
        return Err(bad("Truncated payload"));
    }

    let fixed_scale = 1.0 / (1u32 << fractional_bits) as f64;

    let mut position: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut rotation: [Vec<f32>; 4] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut scale: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut sh_dc: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut opacity = Vec::with_capacity(count);
    let mut sh_rest: Vec<Vec<f32>> = vec![Vec::with_capacity(count); sh_bytes];

    for i in 0..count {
        // 24-bit signed fixed point per axis.
        for axis in 0..3 {
            let at = positions_at + i * 9 + axis * 3;
            let mut fixed = bytes[at] as i32 | (bytes[at + 1] as i32) << 8 | (bytes[at + 2] as i32) << 16;
            if fixed & 0x80_0000 != 0 {
                fixed |= !0xff_ffff;
            }
            position[axis].push((fixed as f64 * fixed_scale) as f32);
        }

        opacity.push(inv_sigmoid(bytes[alphas_at + i] as f64 / 255.0) as f32);

        for channel in 0..3 {
            let byte = bytes[colors_at + i * 3 + channel];
            sh_dc[channel].push((((byte as f64 / 255.0) - 0.5) / COLOR_SCALE) as f32);
        }

        for axis in 0..3 {
            let byte = bytes[scales_at + i * 3 + axis];
            scale[axis].push(byte as f32 / 16.0 - 10.0);
        }

        let rot_at = rotations_at + i * rotation_bytes;
        let q = if version >= 3 {
            let packed = u32::from_le_bytes(
                bytes[rot_at..rot_at + 4].try_into().expect("4 bytes"),
            );
            crate::packing::decode_quat(packed)
        } else {
            // x, y, z over [-1, 1]; the scalar is recovered non-negative.
            let component = |k: usize| bytes[rot_at + k] as f32 / 127.5 - 1.0;
            let (x, y, z) = (component(0), component(1), component(2));
            let w = (1.0 - (x * x + y * y + z * z)).max(0.0).sqrt();
            glam::Quat::from_xyzw(x, y, z, w).normalize()
        };
        rotation[0].push(q.w);
        rotation[1].push(q.x);
        rotation[2].push(q.y);
        rotation[3].push(q.z);

        // SH arrives coefficient-major per splat; the table is
        // channel-major.
        for channel in 0..3 {
            for k in 0..sh_per_channel {
                let byte = bytes[sh_at + i * sh_bytes + k * 3 + channel];
                sh_rest[channel * sh_per_channel + k].push(unquantize_sh(byte));
            }
        }
    }

    let [px, py, pz] = position;
    let mut columns = vec![
        Column::new("x", ColumnData::F32(px)),
        Column::new("y", ColumnData::F32(py)),
        Column::new("z", ColumnData::F32(pz)),
    ];
    for (k, data) in rotation.into_iter().enumerate() {
        columns.push(Column::new(format!("rot_{k}"), ColumnData::F32(data)));
    }
    for (k, data) in scale.into_iter().enumerate() {
        columns.push(Column::new(format!("scale_{k}"), ColumnData::F32(data)));
    }
    for (k, data) in sh_dc.into_iter().enumerate() {
        columns.push(Column::new(format!("f_dc_{k}"), ColumnData::F32(data)));
    }
    columns.push(Column::new("opacity", ColumnData::F32(opacity)));
    for (k, data) in sh_rest.into_iter().enumerate() {
        columns.push(Column::new(format!("f_rest_{k}"), ColumnData::F32(data)));
    }

    Ok(DataTable::new(columns)?)
}
