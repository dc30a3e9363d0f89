use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use splat_table::DataTable;

use crate::sog::{SogOptions, write_sog_bundle};
use crate::{CodecError, NamedFile, require_gaussian_splat};

pub struct LodOptions {
    /// Keep only these lod levels; `None` keeps all.
    pub select: Option<Vec<i32>>,
    /// Maximum splats per spatial chunk, in units of 1024.
    pub chunk_count: usize,
    /// Spatial cell size (world units) of the xz chunk grid.
    pub chunk_extent: f64,
    pub sog: SogOptions,
}

impl Default for LodOptions {
    fn default() -> Self {
        Self {
            select: None,
            chunk_count: 512,
            chunk_extent: 16.0,
            sog: SogOptions::default(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LodChunkFile {
    lod: i32,
    file: String,
    count: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LodChunk {
    index: usize,
    min: [f32; 3],
    max: [f32; 3],
    lods: Vec<LodChunkFile>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LodMeta {
    version: u32,
    chunk_extent: f64,
    lod_levels: Vec<i32>,
    chunks: Vec<LodChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
}

fn bounds_of(table: &DataTable, rows: &[usize]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for (axis, name) in ["x", "y", "z"].iter().enumerate() {
        let column = table.column(name).expect("Splat checked");
        for &row in rows {
            let v = column.data.get(row) as f32;
            min[axis] = min[axis].min(v);
            max[axis] = max[axis].max(v);
        }
    }
    (min, max)
}

/// LOD output: the table cut into an xz chunk grid, each (chunk, lod) cell
/// emitted as its own SOG bundle, indexed by `lod-meta.json`. Environment
/// splats (separated upstream by `lod == -1`) land in a dedicated bundle.
pub fn write_lod(
    table: &DataTable,
    environment: Option<&DataTable>,
    options: &LodOptions,
) -> Result<Vec<NamedFile>, CodecError> {
    require_gaussian_splat(table)?;

    let lod_of = |row: usize| -> i32 {
        table
            .column("lod")
            .map_or(0, |column| column.data.get(row) as i32)
    };

    let keep = |lod: i32| -> bool {
        options
            .select
            .as_ref()
            .is_none_or(|levels| levels.contains(&lod))
    };

    // Bucket rows into the xz cell grid; BTreeMap for deterministic chunk
    // numbering.
    let x = table.column("x").expect("Splat checked");
    let z = table.column("z").expect("Splat checked");
    let extent = options.chunk_extent.max(f64::EPSILON);
    let mut cells: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for row in 0..table.num_rows() {
        if !keep(lod_of(row)) {
            continue;
        }
        let cell = (
            (x.data.get(row) / extent).floor() as i64,
            (z.data.get(row) / extent).floor() as i64,
        );
        cells.entry(cell).or_default().push(row);
    }
    if cells.is_empty() {
        return Err(CodecError::EmptyTable);
    }

    let mut levels: Vec<i32> = cells
        .values()
        .flatten()
        .map(|&row| lod_of(row))
        .collect();
    levels.sort_unstable();
    levels.dedup();

    let max_chunk_rows = options.chunk_count.max(1) * 1024;
    let mut files = Vec::new();
    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;

    for rows in cells.values() {
        for chunk_rows in rows.chunks(max_chunk_rows) {
            let (min, max) = bounds_of(table, chunk_rows);
            let mut chunk_files = Vec::new();

            for &level in &levels {
                let subset: Vec<usize> = chunk_rows
                    .iter()
                    .copied()
                    .filter(|&row| lod_of(row) == level)
                    .collect();
                if subset.is_empty() {
                    continue;
                }
                let sub_table = table.permute_rows(&subset);
                let name = format!("chunk_{chunk_index}_lod_{level}.sog");
                files.push(NamedFile::new(
                    name.clone(),
                    write_sog_bundle(&sub_table, &options.sog)?,
                ));
                chunk_files.push(LodChunkFile {
                    lod: level,
                    file: name,
                    count: subset.len(),
                });
            }

            chunks.push(LodChunk {
                index: chunk_index,
                min,
                max,
                lods: chunk_files,
            });
            chunk_index += 1;
        }
    }

    let environment_file = match environment {
        Some(env) if env.num_rows() > 0 => {
            files.push(NamedFile::new(
                "env.sog",
                write_sog_bundle(env, &options.sog)?,
            ));
            Some("env.sog".to_owned())
        }
        _ => None,
    };

    let meta = LodMeta {
        version: 1,
        chunk_extent: options.chunk_extent,
        lod_levels: levels,
        chunks,
        environment: environment_file,
    };
    files.insert(0, NamedFile::new("lod-meta.json", serde_json::to_vec(&meta)?));
    Ok(files)
}
