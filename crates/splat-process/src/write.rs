use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use splat_codecs::{
    HtmlOptions, LodOptions, NamedFile, SogOptions, write_compressed_ply, write_csv, write_html,
    write_lod, write_ply, write_sog, write_sog_bundle,
};
use splat_table::DataTable;
use tokio::io::AsyncWriteExt;

use crate::formats::OutputFormat;

/// One options record carries every writer knob; defaults match the CLI
/// defaults.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub overwrite: bool,
    pub unbundled: bool,
    /// k-means rounds for SOG SH palettes.
    pub iterations: usize,
    pub viewer_settings: Option<serde_json::Value>,
    pub lod_select: Option<Vec<i32>>,
    pub lod_chunk_count: usize,
    pub lod_chunk_extent: f64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            unbundled: false,
            iterations: 10,
            viewer_settings: None,
            lod_select: None,
            lod_chunk_count: 512,
            lod_chunk_extent: 16.0,
        }
    }
}

impl WriteOptions {
    fn sog(&self) -> SogOptions {
        SogOptions {
            iterations: self.iterations,
            ..SogOptions::default()
        }
    }
}

/// Temporary dotfile name: unique per process, moment and attempt.
fn temp_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);
    format!(
        ".{}-{}-{:012x}.tmp",
        std::process::id(),
        millis,
        rand::random::<u64>() & 0xffff_ffff_ffff
    )
}

/// Writes into a hidden sibling, fsyncs, then renames over the target. A
/// failed write never leaves a partial target behind.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Creating {}", dir.display()))?;

    let tmp = dir.join(temp_name());
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result.with_context(|| format!("Writing {}", path.display()))
}

/// Maps writer-relative file names onto final paths. The writer's primary
/// file takes the user-given output name; siblings land next to it.
fn resolve_paths(target: &str, primary: &str, files: &[NamedFile]) -> Vec<(PathBuf, usize)> {
    let target_path = PathBuf::from(target);
    let dir = target_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            if file.name == primary {
                (target_path.clone(), i)
            } else {
                (dir.join(&file.name), i)
            }
        })
        .collect()
}

async fn refuse_existing(paths: &[(PathBuf, usize)], overwrite: bool) -> Result<()> {
    if overwrite {
        return Ok(());
    }
    for (path, _) in paths {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            bail!(
                "Target '{}' already exists (pass -w/--overwrite to replace it)",
                path.display()
            );
        }
    }
    Ok(())
}

/// Routes a table (plus the separated environment table, for LOD output) to
/// the writer selected by the output name, writing every produced file
/// atomically.
pub async fn write_file(
    name: &str,
    table: &DataTable,
    environment: Option<&DataTable>,
    options: &WriteOptions,
) -> Result<()> {
    let format = OutputFormat::from_name(name, options.unbundled)
        .with_context(|| format!("Unsupported output format: {name}"))?;
    log::info!("Writing {name} as {format:?}");

    let base_name = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scene")
        .to_owned();

    let (files, primary): (Vec<NamedFile>, &str) = match format {
        OutputFormat::Csv => (vec![NamedFile::new(name, write_csv(table)?)], name),
        OutputFormat::Ply => (vec![NamedFile::new(name, write_ply(table)?)], name),
        OutputFormat::CompressedPly => (
            vec![NamedFile::new(name, write_compressed_ply(table)?)],
            name,
        ),
        OutputFormat::SogBundle => (
            vec![NamedFile::new(name, write_sog_bundle(table, &options.sog())?)],
            name,
        ),
        OutputFormat::SogLoose => (write_sog(table, &options.sog())?, "meta.json"),
        OutputFormat::HtmlBundle | OutputFormat::Html => {
            let html_options = HtmlOptions {
                unbundled: format == OutputFormat::Html,
                base_name,
                viewer_settings: options.viewer_settings.clone(),
                sog: options.sog(),
            };
            (write_html(table, &html_options)?, "index.html")
        }
        OutputFormat::Lod => {
            let lod_options = LodOptions {
                select: options.lod_select.clone(),
                chunk_count: options.lod_chunk_count,
                chunk_extent: options.lod_chunk_extent,
                sog: options.sog(),
            };
            (write_lod(table, environment, &lod_options)?, "lod-meta.json")
        }
    };

    let paths = resolve_paths(name, primary, &files);
    refuse_existing(&paths, options.overwrite).await?;
    for (path, index) in &paths {
        atomic_write(path, &files[*index].bytes).await?;
    }
    log::info!("Wrote {} file(s) for {name}", files.len());
    Ok(())
}
