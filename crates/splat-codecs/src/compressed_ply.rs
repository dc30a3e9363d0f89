use glam::{Quat, Vec3, Vec4};
use splat_table::{
    Column, ColumnData, DataTable, ScalarType, channel_to_sh, inv_sigmoid, sh_coeffs_for_degree,
    sh_degree_for_table, sh_to_channel, sigmoid,
};

use crate::packing::{
    decode_quat, decode_vec_8_8_8_8, decode_vec_11_10_11, encode_quat, encode_vec_8_8_8_8,
    encode_vec_11_10_11,
};
use crate::ply::{PlyData, PlyElement};
use crate::{CodecError, require_gaussian_splat, write_ply_data};

/// Splats per chunk; every chunk shares one min/max per attribute.
pub const CHUNK_SIZE: usize = 256;

const CHUNK_COLUMNS: [&str; 18] = [
    "min_x",
    "min_y",
    "min_z",
    "max_x",
    "max_y",
    "max_z",
    "min_scale_x",
    "min_scale_y",
    "min_scale_z",
    "max_scale_x",
    "max_scale_y",
    "max_scale_z",
    "min_r",
    "min_g",
    "min_b",
    "max_r",
    "max_g",
    "max_b",
];

const VERTEX_COLUMNS: [&str; 4] = [
    "packed_position",
    "packed_rotation",
    "packed_scale",
    "packed_color",
];

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("compressed-ply", detail)
}

fn sh_schema_ok(element: &PlyElement) -> bool {
    let n = element.table.num_columns();
    matches!(n, 9 | 24 | 45)
        && element.table.columns().iter().enumerate().all(|(i, c)| {
            c.data.scalar_type() == ScalarType::U8 && c.name == format!("f_rest_{i}")
        })
}

/// Whether parsed PLY data matches the chunked quantized schema.
pub fn is_compressed_ply(data: &PlyData) -> bool {
    let (chunk, vertex, sh) = match data.elements.as_slice() {
        [chunk, vertex] => (chunk, vertex, None),
        [chunk, vertex, sh] => (chunk, vertex, Some(sh)),
        _ => return false,
    };
    if chunk.name != "chunk" || vertex.name != "vertex" {
        return false;
    }
    let chunk_ok = chunk.table.num_columns() == 18
        && CHUNK_COLUMNS.iter().all(|name| {
            chunk
                .table
                .column(name)
                .is_some_and(|c| c.data.scalar_type() == ScalarType::F32)
        });
    let vertex_ok = vertex.table.num_columns() == 4
        && VERTEX_COLUMNS.iter().all(|name| {
            vertex
                .table
                .column(name)
                .is_some_and(|c| c.data.scalar_type() == ScalarType::U32)
        });
    let sh_ok = sh.is_none_or(|sh| sh.name == "sh" && sh_schema_ok(sh));
    chunk_ok && vertex_ok && sh_ok
}

struct ChunkRanges<'a> {
    table: &'a DataTable,
}

impl ChunkRanges<'_> {
    fn get(&self, chunk: usize, name: &str) -> f32 {
        self.table.column(name).expect("Schema checked").data.get(chunk) as f32
    }

    fn lerp3(&self, chunk: usize, names: [&str; 6], t: Vec3) -> Vec3 {
        let min = Vec3::new(
            self.get(chunk, names[0]),
            self.get(chunk, names[1]),
            self.get(chunk, names[2]),
        );
        let max = Vec3::new(
            self.get(chunk, names[3]),
            self.get(chunk, names[4]),
            self.get(chunk, names[5]),
        );
        min + (max - min) * t
    }
}

/// Expands chunked quantized PLY data back into a full splat table.
pub fn decode_compressed_ply(data: &PlyData) -> Result<DataTable, CodecError> {
    let chunks = &data.element("chunk").ok_or_else(|| bad("Missing chunk element"))?.table;
    let vertices = &data
        .element("vertex")
        .ok_or_else(|| bad("Missing vertex element"))?
        .table;

    let num_splats = vertices.num_rows();
    let num_chunks = chunks.num_rows();
    if num_chunks * CHUNK_SIZE < num_splats {
        return Err(bad(format!(
            "{num_chunks} chunks cannot cover {num_splats} splats"
        )));
    }

    let packed_position = vertices.column("packed_position").expect("Schema checked");
    let packed_rotation = vertices.column("packed_rotation").expect("Schema checked");
    let packed_scale = vertices.column("packed_scale").expect("Schema checked");
    let packed_color = vertices.column("packed_color").expect("Schema checked");
    let ranges = ChunkRanges { table: chunks };

    let mut position: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(num_splats));
    let mut rotation: [Vec<f32>; 4] = std::array::from_fn(|_| Vec::with_capacity(num_splats));
    let mut scale: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(num_splats));
    let mut sh_dc: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(num_splats));
    let mut opacity = Vec::with_capacity(num_splats);

    for i in 0..num_splats {
        let chunk = i / CHUNK_SIZE;

        let p = ranges.lerp3(
            chunk,
            ["min_x", "min_y", "min_z", "max_x", "max_y", "max_z"],
            decode_vec_11_10_11(packed_position.data.get(i) as u32),
        );
        position[0].push(p.x);
        position[1].push(p.y);
        position[2].push(p.z);

        let s = ranges.lerp3(
            chunk,
            [
                "min_scale_x",
                "min_scale_y",
                "min_scale_z",
                "max_scale_x",
                "max_scale_y",
                "max_scale_z",
            ],
            decode_vec_11_10_11(packed_scale.data.get(i) as u32),
        );
        scale[0].push(s.x);
        scale[1].push(s.y);
        scale[2].push(s.z);

        let rgba = decode_vec_8_8_8_8(packed_color.data.get(i) as u32);
        let rgb = ranges.lerp3(
            chunk,
            ["min_r", "min_g", "min_b", "max_r", "max_g", "max_b"],
            Vec3::new(rgba.x, rgba.y, rgba.z),
        );
        sh_dc[0].push(channel_to_sh(rgb.x as f64) as f32);
        sh_dc[1].push(channel_to_sh(rgb.y as f64) as f32);
        sh_dc[2].push(channel_to_sh(rgb.z as f64) as f32);
        opacity.push(inv_sigmoid(rgba.w as f64) as f32);

        let q = decode_quat(packed_rotation.data.get(i) as u32);
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

    if let Some(sh) = data.element("sh") {
        if sh.table.num_rows() != num_splats {
            return Err(bad("sh element row count differs from vertex"));
        }
        for column in sh.table.columns() {
            let decoded: Vec<f32> = (0..num_splats)
                .map(|i| {
                    let byte = column.data.get(i) as u32;
                    // Bucket centers, saturating exactly at the ends.
                    let n = match byte {
                        0 => 0.0,
                        255 => 1.0,
                        b => (b as f32 + 0.5) / 256.0,
                    };
                    (n - 0.5) * 8.0
                })
                .collect();
            columns.push(Column::new(column.name.clone(), ColumnData::F32(decoded)));
        }
    }

    Ok(DataTable::new(columns)?)
}

fn column_f32(table: &DataTable, name: &str) -> Result<Vec<f32>, CodecError> {
    let column = table
        .column(name)
        .ok_or_else(|| bad(format!("Missing column '{name}'")))?;
    Ok((0..column.data.len())
        .map(|i| column.data.get(i) as f32)
        .collect())
}

/// Compresses a splat table into the chunked quantized PLY layout.
pub fn write_compressed_ply(table: &DataTable) -> Result<Vec<u8>, CodecError> {
    require_gaussian_splat(table)?;

    let num_splats = table.num_rows();
    let num_chunks = num_splats.div_ceil(CHUNK_SIZE);

    let x = column_f32(table, "x")?;
    let y = column_f32(table, "y")?;
    let z = column_f32(table, "z")?;
    let scales: [Vec<f32>; 3] = [
        column_f32(table, "scale_0")?,
        column_f32(table, "scale_1")?,
        column_f32(table, "scale_2")?,
    ];
    // Colors are chunked in linear [0, 1] space.
    let colors: [Vec<f32>; 3] = std::array::from_fn(|k| {
        let dc = table.column(&format!("f_dc_{k}")).expect("Splat checked");
        (0..num_splats)
            .map(|i| sh_to_channel(dc.data.get(i)) as f32)
            .collect()
    });
    let opacity = column_f32(table, "opacity")?;
    let rotations: [Vec<f32>; 4] = [
        column_f32(table, "rot_0")?,
        column_f32(table, "rot_1")?,
        column_f32(table, "rot_2")?,
        column_f32(table, "rot_3")?,
    ];

    let mut chunk_columns: Vec<Vec<f32>> = vec![Vec::with_capacity(num_chunks); 18];
    let mut packed_position = Vec::with_capacity(num_splats);
    let mut packed_rotation = Vec::with_capacity(num_splats);
    let mut packed_scale = Vec::with_capacity(num_splats);
    let mut packed_color = Vec::with_capacity(num_splats);

    for chunk in 0..num_chunks {
        let start = chunk * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(num_splats);

        let range_of = |values: &[f32]| -> (f32, f32) {
            values[start..end]
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
        };

        let pos_range = [range_of(&x), range_of(&y), range_of(&z)];
        let scale_range = [range_of(&scales[0]), range_of(&scales[1]), range_of(&scales[2])];
        let color_range = [range_of(&colors[0]), range_of(&colors[1]), range_of(&colors[2])];

        for axis in 0..3 {
            chunk_columns[axis].push(pos_range[axis].0);
            chunk_columns[3 + axis].push(pos_range[axis].1);
            chunk_columns[6 + axis].push(scale_range[axis].0);
            chunk_columns[9 + axis].push(scale_range[axis].1);
            chunk_columns[12 + axis].push(color_range[axis].0);
            chunk_columns[15 + axis].push(color_range[axis].1);
        }

        let norm = |v: f32, (lo, hi): (f32, f32)| -> f32 {
            if hi > lo { (v - lo) / (hi - lo) } else { 0.0 }
        };

        for i in start..end {
            packed_position.push(encode_vec_11_10_11(Vec3::new(
                norm(x[i], pos_range[0]),
                norm(y[i], pos_range[1]),
                norm(z[i], pos_range[2]),
            )));
            packed_scale.push(encode_vec_11_10_11(Vec3::new(
                norm(scales[0][i], scale_range[0]),
                norm(scales[1][i], scale_range[1]),
                norm(scales[2][i], scale_range[2]),
            )));
            packed_color.push(encode_vec_8_8_8_8(Vec4::new(
                norm(colors[0][i], color_range[0]),
                norm(colors[1][i], color_range[1]),
                norm(colors[2][i], color_range[2]),
                sigmoid(opacity[i] as f64) as f32,
            )));
            packed_rotation.push(encode_quat(Quat::from_xyzw(
                rotations[1][i],
                rotations[2][i],
                rotations[3][i],
                rotations[0][i],
            )));
        }
    }

    let chunk_table = DataTable::new(
        CHUNK_COLUMNS
            .iter()
            .zip(chunk_columns)
            .map(|(name, data)| Column::new(*name, ColumnData::F32(data)))
            .collect(),
    )?;
    let vertex_table = DataTable::new(vec![
        Column::new("packed_position", ColumnData::U32(packed_position)),
        Column::new("packed_rotation", ColumnData::U32(packed_rotation)),
        Column::new("packed_scale", ColumnData::U32(packed_scale)),
        Column::new("packed_color", ColumnData::U32(packed_color)),
    ])?;

    let mut elements = vec![
        PlyElement {
            name: "chunk".to_owned(),
            table: chunk_table,
        },
        PlyElement {
            name: "vertex".to_owned(),
            table: vertex_table,
        },
    ];

    let degree = sh_degree_for_table(table);
    if degree > 0 {
        let num_coeffs = sh_coeffs_for_degree(degree) * 3;
        let mut sh_columns = Vec::with_capacity(num_coeffs);
        for k in 0..num_coeffs {
            let column = table.column(&format!("f_rest_{k}")).expect("Degree checked");
            let bytes: Vec<u8> = (0..num_splats)
                .map(|i| {
                    let n = column.data.get(i) / 8.0 + 0.5;
                    ((n * 256.0).floor()).clamp(0.0, 255.0) as u8
                })
                .collect();
            sh_columns.push(Column::new(format!("f_rest_{k}"), ColumnData::U8(bytes)));
        }
        elements.push(PlyElement {
            name: "sh".to_owned(),
            table: DataTable::new(sh_columns)?,
        });
    }

    write_ply_data(&PlyData {
        comments: vec!["Generated by splat-transform".to_owned()],
        elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_grid;
    use crate::ply::read_ply;
    use splat_vfs::ReadSource;

    async fn read_back(bytes: Vec<u8>) -> DataTable {
        let stream = ReadSource::from_bytes("c.ply", bytes).read(None).await.unwrap();
        read_ply(stream).await.unwrap()
    }

    #[tokio::test]
    async fn roundtrip_within_quantization_error() {
        let table = test_grid();
        let bytes = write_compressed_ply(&table).unwrap();
        let decoded = read_back(bytes).await;

        assert_eq!(decoded.num_rows(), table.num_rows());

        // Grid extent is 3, so the coarsest (10-bit) axis error bound is
        // 3 / 1023 plus float slack.
        for name in ["x", "y", "z"] {
            let a = table.column(name).unwrap();
            let b = decoded.column(name).unwrap();
            for i in 0..table.num_rows() {
                assert!(
                    (a.data.get(i) - b.data.get(i)).abs() < 3.5 / 1023.0,
                    "{name}[{i}] drifted"
                );
            }
        }

        // Quaternions match up to sign.
        for i in 0..table.num_rows() {
            let dot: f64 = (0..4)
                .map(|k| {
                    let name = format!("rot_{k}");
                    table.column(&name).unwrap().data.get(i)
                        * decoded.column(&name).unwrap().data.get(i)
                })
                .sum();
            assert!(dot.abs() > 1.0 - 1e-3, "Quat {i} drifted (dot {dot})");
        }

        // Opacity and DC color survive the 8-bit paths.
        for name in ["opacity", "f_dc_0", "f_dc_1", "f_dc_2"] {
            let a = table.column(name).unwrap();
            let b = decoded.column(name).unwrap();
            for i in 0..table.num_rows() {
                assert!(
                    (a.data.get(i) - b.data.get(i)).abs() < 0.05,
                    "{name}[{i}] drifted"
                );
            }
        }
    }

    #[tokio::test]
    async fn sh_element_roundtrips() {
        let mut table = test_grid();
        for k in 0..9 {
            let values: Vec<f32> = (0..16).map(|i| (i as f32 - 8.0) * 0.1 + k as f32 * 0.01).collect();
            table
                .add_column(Column::new(format!("f_rest_{k}"), ColumnData::F32(values)))
                .unwrap();
        }

        let bytes = write_compressed_ply(&table).unwrap();
        let decoded = read_back(bytes).await;

        for k in 0..9 {
            let name = format!("f_rest_{k}");
            let a = table.column(&name).unwrap();
            let b = decoded.column(&name).unwrap();
            for i in 0..16 {
                // 8 units of range over 256 buckets.
                assert!(
                    (a.data.get(i) - b.data.get(i)).abs() <= 8.0 / 256.0,
                    "{name}[{i}] drifted"
                );
            }
        }
    }

    #[tokio::test]
    async fn chunk_count_is_validated() {
        let table = test_grid();
        let bytes = write_compressed_ply(&table).unwrap();
        // Parse, drop the chunk rows, re-serialize: decode must refuse.
        let stream = ReadSource::from_bytes("c.ply", bytes).read(None).await.unwrap();
        let mut data = crate::ply::read_ply_data(stream).await.unwrap();
        data.elements[0].table = data.elements[0].table.permute_rows(&[]);
        assert!(decode_compressed_ply(&data).is_err());
    }

    #[test]
    fn rejects_non_splat_tables() {
        let table = DataTable::new(vec![Column::new("x", ColumnData::F32(vec![1.0]))]).unwrap();
        assert!(matches!(
            write_compressed_ply(&table),
            Err(CodecError::NotGaussianSplat)
        ));
    }
}
