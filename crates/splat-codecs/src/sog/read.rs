use splat_table::{Column, ColumnData, DataTable, inv_sigmoid, sh_coeffs_for_degree};
use splat_vfs::{ReadFileSystem, ReadSource};

use super::{SogMeta, log_transform_inverse};
use crate::CodecError;

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("sog", detail)
}

struct Image {
    width: usize,
    data: Vec<u8>,
}

impl Image {
    fn texel(&self, index: usize) -> [u8; 4] {
        self.data[index * 4..index * 4 + 4]
            .try_into()
            .expect("4 byte texel")
    }
}

async fn load_webp(
    fs: &ReadFileSystem,
    directory: &str,
    name: &str,
) -> Result<Image, CodecError> {
    let path = format!("{directory}{name}");
    let source = fs.create_source(&path, None).await?;
    let bytes = source.read(None).await?.read_all().await?;
    let decoded = image::load_from_memory(&bytes)?.to_rgba8();
    Ok(Image {
        width: decoded.width() as usize,
        data: decoded.into_raw(),
    })
}

/// Reads a loose SOG scene given the path of its `meta.json` within `fs`.
/// Image files are resolved as siblings of the meta document.
pub async fn read_sog(fs: &ReadFileSystem, meta_name: &str) -> Result<DataTable, CodecError> {
    let directory = match meta_name.rfind('/') {
        Some(at) => &meta_name[..=at],
        None => "",
    };

    let source = fs.create_source(meta_name, None).await?;
    let meta_bytes = source.read(None).await?.read_all().await?;
    let meta: SogMeta = serde_json::from_slice(&meta_bytes)?;
    if meta.version != 2 {
        return Err(CodecError::unsupported(
            "sog",
            format!("version {}", meta.version),
        ));
    }
    let count = meta.count;

    // Means: 16-bit split across the low/high images, then the inverse
    // symmetric log map.
    if meta.means.files.len() != 2 || meta.means.mins.len() != 3 || meta.means.maxs.len() != 3 {
        return Err(bad("Malformed means metadata"));
    }
    let means_l = load_webp(fs, directory, &meta.means.files[0]).await?;
    let means_u = load_webp(fs, directory, &meta.means.files[1]).await?;

    let mut positions: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    for i in 0..count {
        let lo = means_l.texel(i);
        let hi = means_u.texel(i);
        for axis in 0..3 {
            let q = lo[axis] as f64 + hi[axis] as f64 * 256.0;
            let (min, max) = (meta.means.mins[axis] as f64, meta.means.maxs[axis] as f64);
            let log_value = min + (max - min) * q / 65535.0;
            positions[axis].push(log_transform_inverse(log_value) as f32);
        }
    }

    // Quaternions: alpha tags which component was dropped.
    let quats_file = meta
        .quats
        .files
        .first()
        .ok_or_else(|| bad("Missing quats image"))?;
    let quats = load_webp(fs, directory, quats_file).await?;
    let mut rotations: [Vec<f32>; 4] = std::array::from_fn(|_| Vec::with_capacity(count));
    for i in 0..count {
        let texel = quats.texel(i);
        let largest = (texel[3] as usize).saturating_sub(252).min(3);
        let stored: Vec<f64> = (0..3)
            .map(|slot| ((texel[slot] as f64 / 255.0) * 2.0 - 1.0) * std::f64::consts::FRAC_1_SQRT_2)
            .collect();
        let m = (1.0 - stored.iter().map(|v| v * v).sum::<f64>()).max(0.0).sqrt();

        // Reinsert into (x, y, z, w) order.
        let mut q = [0.0f64; 4];
        let mut slot = 0;
        for (component, value) in q.iter_mut().enumerate() {
            if component == largest {
                *value = m;
            } else {
                *value = stored[slot];
                slot += 1;
            }
        }
        rotations[0].push(q[3] as f32);
        rotations[1].push(q[0] as f32);
        rotations[2].push(q[1] as f32);
        rotations[3].push(q[2] as f32);
    }

    // Scales and DC colors through their codebooks; opacity from alpha.
    let scales_file = meta
        .scales
        .files
        .first()
        .ok_or_else(|| bad("Missing scales image"))?;
    let scales_img = load_webp(fs, directory, scales_file).await?;
    let sh0_file = meta
        .sh0
        .files
        .first()
        .ok_or_else(|| bad("Missing sh0 image"))?;
    let sh0_img = load_webp(fs, directory, sh0_file).await?;

    let lookup = |codebook: &[f32], label: u8| -> Result<f32, CodecError> {
        codebook
            .get(label as usize)
            .copied()
            .ok_or_else(|| bad("Label outside codebook"))
    };

    let mut scales: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut sh_dc: [Vec<f32>; 3] = std::array::from_fn(|_| Vec::with_capacity(count));
    let mut opacity = Vec::with_capacity(count);
    for i in 0..count {
        let s = scales_img.texel(i);
        let c = sh0_img.texel(i);
        for axis in 0..3 {
            scales[axis].push(lookup(&meta.scales.codebook, s[axis])?);
            sh_dc[axis].push(lookup(&meta.sh0.codebook, c[axis])?);
        }
        opacity.push(inv_sigmoid(c[3] as f64 / 255.0) as f32);
    }

    let [px, py, pz] = positions;
    let mut columns = vec![
        Column::new("x", ColumnData::F32(px)),
        Column::new("y", ColumnData::F32(py)),
        Column::new("z", ColumnData::F32(pz)),
    ];
    for (k, data) in rotations.into_iter().enumerate() {
        columns.push(Column::new(format!("rot_{k}"), ColumnData::F32(data)));
    }
    for (k, data) in scales.into_iter().enumerate() {
        columns.push(Column::new(format!("scale_{k}"), ColumnData::F32(data)));
    }
    for (k, data) in sh_dc.into_iter().enumerate() {
        columns.push(Column::new(format!("f_dc_{k}"), ColumnData::F32(data)));
    }
    columns.push(Column::new("opacity", ColumnData::F32(opacity)));

    if let Some(shn) = &meta.shn {
        let coeffs = sh_coeffs_for_degree(shn.bands);
        if coeffs == 0 || shn.files.len() != 2 {
            return Err(bad("Malformed shN metadata"));
        }
        let centroids_img = load_webp(fs, directory, &shn.files[0]).await?;
        let labels_img = load_webp(fs, directory, &shn.files[1]).await?;

        let mut rest: Vec<Vec<f32>> = vec![Vec::with_capacity(count); coeffs * 3];
        for i in 0..count {
            let texel = labels_img.texel(i);
            let label = texel[0] as usize | ((texel[1] as usize) << 8);
            if label >= shn.count {
                return Err(bad("SH label outside palette"));
            }
            let base = (label / 64) * centroids_img.width + (label % 64) * coeffs;
            for k in 0..coeffs {
                let entry = centroids_img.texel(base + k);
                for channel in 0..3 {
                    rest[channel * coeffs + k]
                        .push(lookup(&shn.codebook, entry[channel])?);
                }
            }
        }
        for (k, data) in rest.into_iter().enumerate() {
            columns.push(Column::new(format!("f_rest_{k}"), ColumnData::F32(data)));
        }
    }

    Ok(DataTable::new(columns)?)
}

/// Reads a `.sog` zip bundle.
pub async fn read_sog_bundle(source: ReadSource) -> Result<DataTable, CodecError> {
    let fs = ReadFileSystem::zip(source).await?;
    read_sog(&fs, "meta.json").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_grid;
    use crate::sog::{SogOptions, write_sog, write_sog_bundle};
    use splat_actions::morton_order;
    use splat_table::sh_degree_for_table;

    /// The writer emits splats in Morton order; readers see them that way.
    fn in_storage_order(table: &DataTable) -> DataTable {
        table.permute_rows(&morton_order(table))
    }

    fn memory_fs(files: Vec<crate::NamedFile>) -> ReadFileSystem {
        let mut fs = ReadFileSystem::memory();
        for file in files {
            fs.insert(file.name, file.bytes);
        }
        fs
    }

    fn assert_tables_close(a: &DataTable, b: &DataTable, tolerance: f64) {
        assert_eq!(a.num_rows(), b.num_rows());
        for column in a.columns() {
            if column.name.starts_with("rot_") {
                continue;
            }
            let other = b.column(&column.name).unwrap_or_else(|| {
                panic!("Missing column {}", column.name)
            });
            for i in 0..a.num_rows() {
                let (va, vb) = (column.data.get(i), other.data.get(i));
                assert!(
                    (va - vb).abs() <= tolerance * (1.0 + va.abs()),
                    "{}[{i}]: {va} vs {vb}",
                    column.name
                );
            }
        }
        // Quaternions compare up to sign.
        for i in 0..a.num_rows() {
            let dot: f64 = (0..4)
                .map(|k| {
                    let name = format!("rot_{k}");
                    a.column(&name).unwrap().data.get(i) * b.column(&name).unwrap().data.get(i)
                })
                .sum();
            assert!(dot.abs() > 1.0 - 5e-2, "Quat {i} drifted (dot {dot})");
        }
    }

    #[tokio::test]
    async fn loose_roundtrip() {
        let table = test_grid();
        let files = write_sog(&table, &SogOptions::default()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "meta.json",
                "means_l.webp",
                "means_u.webp",
                "quats.webp",
                "scales.webp",
                "sh0.webp"
            ]
        );

        let fs = memory_fs(files);
        let read = read_sog(&fs, "meta.json").await.unwrap();
        assert_tables_close(&in_storage_order(&table), &read, 0.05);
    }

    #[tokio::test]
    async fn bundle_roundtrip_with_sh() {
        let mut table = test_grid();
        for k in 0..9 {
            let values: Vec<f32> = (0..16)
                .map(|i| ((i * 5 + k * 3) % 16) as f32 * 0.05 - 0.4)
                .collect();
            table
                .add_column(Column::new(format!("f_rest_{k}"), ColumnData::F32(values)))
                .unwrap();
        }

        let bytes = write_sog_bundle(&table, &SogOptions::default()).unwrap();
        let read = read_sog_bundle(ReadSource::from_bytes("scene.sog", bytes))
            .await
            .unwrap();

        assert_eq!(sh_degree_for_table(&read), 1);
        assert_tables_close(&in_storage_order(&table), &read, 0.05);
    }

    #[tokio::test]
    async fn meta_is_deterministic() {
        let table = test_grid();
        let a = write_sog(&table, &SogOptions::default()).unwrap();
        let b = write_sog(&table, &SogOptions::default()).unwrap();
        assert_eq!(a[0].bytes, b[0].bytes, "meta.json must be byte-identical");
        assert_eq!(a, b, "Full file set must be byte-identical");
    }
}
