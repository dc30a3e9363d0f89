use serde::Deserialize;
use splat_table::{Column, ColumnData, DataTable};
use splat_vfs::ReadFileSystem;

use crate::CodecError;
use crate::splat::decode_records;

/// The `.lcc` file is a small JSON manifest; the heavy data sits in sibling
/// binary files.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LccManifest {
    lod_count: usize,
    unit_count: usize,
    #[serde(default)]
    sh_degree: u32,
}

/// One quadtree unit: a tile position plus one (points, offset, size)
/// triplet per LOD into `data.bin`.
struct UnitLod {
    points: i32,
    offset: i64,
    size: i32,
}

fn bad(detail: impl Into<String>) -> CodecError {
    CodecError::format("lcc", detail)
}

const RECORD_BYTES: usize = 32;

async fn read_sibling(
    fs: &ReadFileSystem,
    directory: &str,
    name: &str,
) -> Result<Vec<u8>, CodecError> {
    let source = fs.create_source(&format!("{directory}{name}"), None).await?;
    Ok(source.read(None).await?.read_all().await?)
}

/// Reads an XGRIDS `.lcc` scene: manifest, `index.bin` quadtree,
/// `data.bin` payloads, optional `shcoef.bin` SH bytes and an optional
/// `environment.bin` tagged `lod = -1`.
pub async fn read_lcc(fs: &ReadFileSystem, manifest_name: &str) -> Result<DataTable, CodecError> {
    let directory = match manifest_name.rfind('/') {
        Some(at) => &manifest_name[..=at],
        None => "",
    };

    let manifest_bytes = read_sibling(fs, "", manifest_name).await?;
    let manifest: LccManifest = serde_json::from_slice(&manifest_bytes)?;

    let index = read_sibling(fs, directory, "index.bin").await?;
    let unit_stride = 4 + manifest.lod_count * 16;
    if index.len() < manifest.unit_count * unit_stride {
        return Err(bad("index.bin too small for unit count"));
    }

    let data = read_sibling(fs, directory, "data.bin").await?;
    let sh_per_channel = splat_table::sh_coeffs_for_degree(manifest.sh_degree);
    let shcoef = if sh_per_channel > 0 {
        Some(read_sibling(fs, directory, "shcoef.bin").await?)
    } else {
        None
    };

    let mut record_bytes = Vec::new();
    let mut lods = Vec::new();
    let mut sh_bytes = Vec::new();
    let mut splats_seen = 0usize;

    for unit in 0..manifest.unit_count {
        let base = unit * unit_stride;
        // x:i16, y:i16 tile coordinates are present but not needed for a
        // flat table.
        for lod in 0..manifest.lod_count {
            let at = base + 4 + lod * 16;
            let descriptor = UnitLod {
                points: i32::from_le_bytes(index[at..at + 4].try_into().expect("4 bytes")),
                offset: i64::from_le_bytes(index[at + 4..at + 12].try_into().expect("8 bytes")),
                size: i32::from_le_bytes(index[at + 12..at + 16].try_into().expect("4 bytes")),
            };
            if descriptor.points <= 0 {
                continue;
            }
            let (points, offset, size) = (
                descriptor.points as usize,
                descriptor.offset as usize,
                descriptor.size as usize,
            );
            if points * RECORD_BYTES != size || offset + size > data.len() {
                return Err(bad(format!(
                    "Unit {unit} lod {lod} descriptor does not match data.bin"
                )));
            }
            record_bytes.extend_from_slice(&data[offset..offset + size]);
            lods.extend(std::iter::repeat_n(lod as i32, points));

            if let Some(shcoef) = &shcoef {
                let stride = sh_per_channel * 3;
                let sh_at = splats_seen * stride;
                let needed = points * stride;
                if sh_at + needed > shcoef.len() {
                    return Err(bad("shcoef.bin too small"));
                }
                sh_bytes.extend_from_slice(&shcoef[sh_at..sh_at + needed]);
            }
            splats_seen += points;
        }
    }

    if record_bytes.is_empty() {
        return Err(bad("Scene holds no splats"));
    }

    // Environment splats are optional; a failed read is only a warning.
    let environment = match read_sibling(fs, directory, "environment.bin").await {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            log::warn!("Skipping environment.bin: {err}");
            None
        }
    };
    let env_count = environment
        .as_ref()
        .map_or(0, |bytes| bytes.len() / RECORD_BYTES);
    if let Some(environment) = &environment {
        record_bytes.extend_from_slice(environment);
        lods.extend(std::iter::repeat_n(-1, env_count));
    }

    let mut table = decode_records(&record_bytes)?;
    table.add_column(Column::new("lod", ColumnData::I32(lods)))?;

    if shcoef.is_some() {
        let stride = sh_per_channel * 3;
        for channel in 0..3 {
            for k in 0..sh_per_channel {
                let mut values: Vec<f32> = Vec::with_capacity(splats_seen + env_count);
                for splat in 0..splats_seen {
                    let byte = sh_bytes[splat * stride + k * 3 + channel];
                    let n = match byte {
                        0 => 0.0,
                        255 => 1.0,
                        b => (b as f32 + 0.5) / 256.0,
                    };
                    values.push((n - 0.5) * 8.0);
                }
                // Environment splats carry no SH.
                values.extend(std::iter::repeat_n(0.0, env_count));
                table.add_column(Column::new(
                    format!("f_rest_{}", channel * sh_per_channel + k),
                    ColumnData::F32(values),
                ))?;
            }
        }
    }

    Ok(table)
}
