use bytemuck::pod_read_unaligned;
use glam::Quat;
use splat_table::{Column, ColumnData, DataTable, channel_to_sh, inv_sigmoid};
use splat_vfs::ReadStream;

use crate::CodecError;

/// Bytes per record: 3 f32 position, 3 f32 linear scale, 4 u8 color,
/// 4 u8 quaternion.
const RECORD_BYTES: usize = 32;

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("splat", detail)
}

/// Reads the antimatter15 `.splat` layout.
pub async fn read_splat(mut stream: ReadStream) -> Result<DataTable, CodecError> {
    let bytes = stream.read_all().await?;
    decode_records(&bytes)
}

/// Decodes a run of 32-byte splat records. Shared with the LCC reader,
/// whose payload files use the same record layout.
pub(crate) fn decode_records(bytes: &[u8]) -> Result<DataTable, CodecError> {
    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(bad(format!(
            "File size {} is not a multiple of {RECORD_BYTES}",
            bytes.len()
        )));
    }
    let count = bytes.len() / RECORD_BYTES;

    let mut position: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut rotation: [Vec<f32>; 4] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut scale: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut sh_dc: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut opacity = Vec::with_capacity(count);

    for record in bytes.chunks_exact(RECORD_BYTES) {
        for axis in 0..3 {
            position[axis].push(pod_read_unaligned::<f32>(&record[axis * 4..axis * 4 + 4]));
            // Scales are stored linear; the table carries log-scale.
            let linear = pod_read_unaligned::<f32>(&record[12 + axis * 4..16 + axis * 4]);
            scale[axis].push(linear.max(f32::MIN_POSITIVE).ln());
        }
        for channel in 0..3 {
            sh_dc[channel].push(channel_to_sh(record[24 + channel] as f64 / 255.0) as f32);
        }
        opacity.push(inv_sigmoid(record[27] as f64 / 255.0) as f32);

        // Quaternion bytes are scalar-first; each channel maps over [-1, 1]
        // and the result is renormalized.
        let component = |at: usize| (record[28 + at] as f32 / 255.0) * 2.0 - 1.0;
        let q = Quat::from_xyzw(component(1), component(2), component(3), component(0));
        let q = if q.length() > 0.0 { q.normalize() } else { Quat::IDENTITY };
        rotation[0].push(q.w);
        rotation[1].push(q.x);
        rotation[2].push(q.y);
        rotation[3].push(q.z);
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

    Ok(DataTable::new(columns)?)
}
