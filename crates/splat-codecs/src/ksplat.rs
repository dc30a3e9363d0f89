use bytemuck::pod_read_unaligned;
use half::f16;
use splat_table::{Column, ColumnData, DataTable, channel_to_sh, inv_sigmoid};
use splat_vfs::ReadStream;

use crate::CodecError;

const HEADER_BYTES: usize = 4096;
const SECTION_BYTES: usize = 1024;

/// Cumulative SH component counts (all channels) per degree.
const SH_COMPONENTS: [usize; 4] = [0, 9, 24, 45];

struct Compression {
    bytes_per_center: usize,
    bytes_per_scale: usize,
    bytes_per_rotation: usize,
    bytes_per_color: usize,
    bytes_per_sh_component: usize,
    scale_range: u32,
}

const COMPRESSION: [Compression; 3] = [
    Compression {
        bytes_per_center: 12,
        bytes_per_scale: 12,
        bytes_per_rotation: 16,
        bytes_per_color: 4,
        bytes_per_sh_component: 4,
        scale_range: 1,
    },
    Compression {
        bytes_per_center: 6,
        bytes_per_scale: 6,
        bytes_per_rotation: 8,
        bytes_per_color: 4,
        bytes_per_sh_component: 2,
        scale_range: 32767,
    },
    Compression {
        bytes_per_center: 6,
        bytes_per_scale: 6,
        bytes_per_rotation: 8,
        bytes_per_color: 4,
        bytes_per_sh_component: 1,
        scale_range: 32767,
    },
];

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("ksplat", detail)
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, CodecError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| bad("Unexpected end of file"))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, CodecError> {
    bytes
        .get(at..at + 4)
        .map(pod_read_unaligned::<u32>)
        .ok_or_else(|| bad("Unexpected end of file"))
}

fn read_f32(bytes: &[u8], at: usize) -> Result<f32, CodecError> {
    bytes
        .get(at..at + 4)
        .map(pod_read_unaligned::<f32>)
        .ok_or_else(|| bad("Unexpected end of file"))
}

fn read_f16(bytes: &[u8], at: usize) -> Result<f32, CodecError> {
    read_u16(bytes, at).map(|raw| f16::from_bits(raw).to_f32())
}

struct Decoded {
    position: [Vec<f32>; 3],
    rotation: [Vec<f32>; 4],
    scale: [Vec<f32>; 3],
    sh_dc: [Vec<f32>; 3],
    opacity: Vec<f32>,
    sh_rest: Vec<Vec<f32>>,
}

/// Reads the mkkellogg `.ksplat` layout: a 4096-byte main header, one
/// 1024-byte header per section, then per-section splat data (optionally
/// 16-bit quantized against bucket centers).
pub async fn read_ksplat(mut stream: ReadStream) -> Result<DataTable, CodecError> {
    let bytes = stream.read_all().await?;
    if bytes.len() < HEADER_BYTES {
        return Err(bad("File too small for header"));
    }

    let section_count = read_u32(&bytes, 4)? as usize;
    let total_splats = read_u32(&bytes, 16)? as usize;
    let compression_level = read_u16(&bytes, 20)? as usize;
    let Some(comp) = COMPRESSION.get(compression_level) else {
        return Err(bad(format!("Invalid compression level {compression_level}")));
    };
    let min_sh = {
        let v = read_f32(&bytes, 36)?;
        if v == 0.0 { -1.5 } else { v }
    };
    let max_sh = {
        let v = read_f32(&bytes, 40)?;
        if v == 0.0 { 1.5 } else { v }
    };

    // Pre-scan for the widest SH degree across sections.
    let mut max_degree = 0usize;
    for section in 0..section_count {
        let at = HEADER_BYTES + section * SECTION_BYTES;
        let degree = read_u16(&bytes, at + 40)? as usize;
        if degree > 3 {
            return Err(bad(format!("Invalid SH degree {degree}")));
        }
        max_degree = max_degree.max(degree);
    }
    let out_components = SH_COMPONENTS[max_degree];

    let mut out = Decoded {
        position: std::array::from_fn(|_| Vec::with_capacity(total_splats)),
        rotation: std::array::from_fn(|_| Vec::with_capacity(total_splats)),
        scale: std::array::from_fn(|_| Vec::with_capacity(total_splats)),
        sh_dc: std::array::from_fn(|_| Vec::with_capacity(total_splats)),
        opacity: Vec::with_capacity(total_splats),
        sh_rest: vec![Vec::with_capacity(total_splats); out_components],
    };

    let mut section_base = HEADER_BYTES + section_count * SECTION_BYTES;
    for section in 0..section_count {
        let header = HEADER_BYTES + section * SECTION_BYTES;

        let splat_count = read_u32(&bytes, header)? as usize;
        let max_splat_count = read_u32(&bytes, header + 4)? as usize;
        let bucket_size = read_u32(&bytes, header + 8)? as usize;
        let bucket_count = read_u32(&bytes, header + 12)? as usize;
        let bucket_block_size = read_f32(&bytes, header + 16)?;
        let bucket_storage_bytes = read_u16(&bytes, header + 20)? as usize;
        let scale_range = {
            let raw = read_u32(&bytes, header + 24)?;
            if raw == 0 { comp.scale_range } else { raw }
        } as f32;
        let full_bucket_count = read_u32(&bytes, header + 32)? as usize;
        let partial_bucket_count = read_u32(&bytes, header + 36)? as usize;
        let degree = read_u16(&bytes, header + 40)? as usize;
        let sh_components = SH_COMPONENTS[degree];

        let bytes_per_splat = comp.bytes_per_center
            + comp.bytes_per_scale
            + comp.bytes_per_rotation
            + comp.bytes_per_color
            + sh_components * comp.bytes_per_sh_component;
        let buckets_storage = bucket_storage_bytes * bucket_count + partial_bucket_count * 4;
        let data_base = section_base + buckets_storage;

        // Bucket centers sit after the partial-bucket length table.
        let buckets_base = section_base + partial_bucket_count * 4;
        let bucket_center = |index: usize, axis: usize| -> Result<f32, CodecError> {
            read_f32(&bytes, buckets_base + (index * 3 + axis) * 4)
        };
        let partial_len = |index: usize| -> Result<usize, CodecError> {
            Ok(read_u32(&bytes, section_base + index * 4)? as usize)
        };

        let quant_scale = if compression_level == 0 {
            0.0
        } else {
            bucket_block_size / 2.0 / scale_range
        };

        let mut partial_index = full_bucket_count;
        let mut partial_base = full_bucket_count * bucket_size;

        for i in 0..splat_count {
            let splat = data_base + i * bytes_per_splat;

            let bucket_index = if i < full_bucket_count * bucket_size {
                i / bucket_size
            } else {
                if partial_bucket_count > 0 {
                    let len = partial_len(partial_index - full_bucket_count)?;
                    if i >= partial_base + len {
                        partial_index += 1;
                        partial_base += len;
                    }
                }
                partial_index
            };

            // Centers.
            for axis in 0..3 {
                let value = if compression_level == 0 {
                    read_f32(&bytes, splat + axis * 4)?
                } else {
                    let raw = read_u16(&bytes, splat + axis * 2)? as f32;
                    (raw - comp.scale_range as f32) * quant_scale
                        + bucket_center(bucket_index, axis)?
                };
                out.position[axis].push(value);
            }

            // Scales are stored linear.
            let scale_at = splat + comp.bytes_per_center;
            for axis in 0..3 {
                let linear = if compression_level == 0 {
                    read_f32(&bytes, scale_at + axis * 4)?
                } else {
                    read_f16(&bytes, scale_at + axis * 2)?
                };
                out.scale[axis].push(linear.max(f32::MIN_POSITIVE).ln());
            }

            // Rotation, scalar first.
            let rot_at = scale_at + comp.bytes_per_scale;
            let mut q = [0.0f32; 4];
            for (k, value) in q.iter_mut().enumerate() {
                *value = if compression_level == 0 {
                    read_f32(&bytes, rot_at + k * 4)?
                } else {
                    read_f16(&bytes, rot_at + k * 2)?
                };
            }
            let len = q.iter().map(|v| v * v).sum::<f32>().sqrt();
            if len > 0.0 {
                for v in &mut q {
                    *v /= len;
                }
            } else {
                q = [1.0, 0.0, 0.0, 0.0];
            }
            for (k, value) in q.iter().enumerate() {
                out.rotation[k].push(*value);
            }

            // Color.
            let color_at = rot_at + comp.bytes_per_rotation;
            let color = bytes
                .get(color_at..color_at + 4)
                .ok_or_else(|| bad("Unexpected end of file"))?;
            for channel in 0..3 {
                out.sh_dc[channel].push(channel_to_sh(color[channel] as f64 / 255.0) as f32);
            }
            out.opacity.push(inv_sigmoid(color[3] as f64 / 255.0) as f32);

            // SH rest, converted from the file's coefficient-major order to
            // channel-major.
            let sh_at = color_at + comp.bytes_per_color;
            let mut file_sh = vec![0.0f32; sh_components];
            for (k, value) in file_sh.iter_mut().enumerate() {
                *value = match compression_level {
                    0 => read_f32(&bytes, sh_at + k * 4)?,
                    1 => read_f16(&bytes, sh_at + k * 2)?,
                    _ => {
                        let byte = *bytes
                            .get(sh_at + k)
                            .ok_or_else(|| bad("Unexpected end of file"))?;
                        min_sh + (max_sh - min_sh) * byte as f32 / 255.0
                    }
                };
            }
            let coeffs_per_channel = out_components / 3;
            for channel in 0..3 {
                for k in 0..coeffs_per_channel {
                    let file_index = k * 3 + channel;
                    let value = file_sh.get(file_index).copied().unwrap_or(0.0);
                    out.sh_rest[channel * coeffs_per_channel + k].push(value);
                }
            }
        }

        let splat_storage = bytes_per_splat * max_splat_count;
        section_base += buckets_storage + splat_storage;
    }

    if out.opacity.len() != total_splats {
        log::warn!(
            "ksplat header promised {total_splats} splats, sections held {}",
            out.opacity.len()
        );
    }
    if out.opacity.is_empty() {
        return Err(bad("No splats in any section"));
    }

    let [px, py, pz] = out.position;
    let mut columns = vec![
        Column::new("x", ColumnData::F32(px)),
        Column::new("y", ColumnData::F32(py)),
        Column::new("z", ColumnData::F32(pz)),
    ];
    for (k, data) in out.rotation.into_iter().enumerate() {
        columns.push(Column::new(format!("rot_{k}"), ColumnData::F32(data)));
    }
    for (k, data) in out.scale.into_iter().enumerate() {
        columns.push(Column::new(format!("scale_{k}"), ColumnData::F32(data)));
    }
    for (k, data) in out.sh_dc.into_iter().enumerate() {
        columns.push(Column::new(format!("f_dc_{k}"), ColumnData::F32(data)));
    }
    columns.push(Column::new("opacity", ColumnData::F32(out.opacity)));
    for (k, data) in out.sh_rest.into_iter().enumerate() {
        columns.push(Column::new(format!("f_rest_{k}"), ColumnData::F32(data)));
    }

    Ok(DataTable::new(columns)?)
}
