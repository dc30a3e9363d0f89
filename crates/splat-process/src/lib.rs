mod combine;
mod formats;
mod write;

pub use combine::{combine, split_environment};
pub use formats::{InputFormat, OutputFormat};
pub use write::{WriteOptions, write_file};

use anyhow::{Context, Result};
use splat_codecs::{generate_table, generator_by_name, read_ksplat, read_lcc, read_ply, read_sog,
    read_sog_bundle, read_splat, read_spz};
use splat_table::DataTable;
use splat_vfs::{Progress, ReadFileSystem, ReadSource, ReadStream};

fn is_url(name: &str) -> bool {
    name.starts_with("http://") || name.starts_with("https://")
}

fn filesystem_for(name: &str) -> ReadFileSystem {
    if is_url(name) {
        ReadFileSystem::url()
    } else {
        ReadFileSystem::local()
    }
}

async fn open_source(name: &str, progress: Option<Progress>) -> Result<ReadSource> {
    Ok(filesystem_for(name).create_source(name, progress).await?)
}

async fn open_stream(name: &str, progress: Option<Progress>) -> Result<ReadStream> {
    let source = open_source(name, progress).await?;
    Ok(source.read(None).await?)
}

/// Reads any supported input into a data table. `params` feed generator
/// inputs; real files ignore them.
pub async fn read_file(
    name: &str,
    params: &[(String, String)],
    progress: Option<Progress>,
) -> Result<DataTable> {
    let format = InputFormat::from_name(name)
        .with_context(|| format!("Unsupported input format: {name}"))?;
    log::info!("Reading {name} as {format:?}");

    let table = match format {
        InputFormat::Ply => read_ply(open_stream(name, progress).await?).await?,
        InputFormat::Splat => read_splat(open_stream(name, progress).await?).await?,
        InputFormat::Ksplat => read_ksplat(open_stream(name, progress).await?).await?,
        InputFormat::Spz => read_spz(open_stream(name, progress).await?).await?,
        InputFormat::SogBundle => read_sog_bundle(open_source(name, progress).await?).await?,
        InputFormat::SogLoose => read_sog(&filesystem_for(name), name).await?,
        InputFormat::Lcc => read_lcc(&filesystem_for(name), name).await?,
        InputFormat::Generator => {
            let stem = std::path::Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .with_context(|| format!("Bad generator name: {name}"))?;
            let generator = generator_by_name(stem, params)?;
            generate_table(generator.as_ref())?
        }
    };

    log::info!("Read {} splats from {name}", table.num_rows());
    Ok(table)
}
