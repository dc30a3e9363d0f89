mod compressed_ply;
mod csv;
mod generator;
mod html;
mod ksplat;
mod lcc;
mod lod;
mod packing;
mod ply;
mod sog;
mod splat;
mod spz;
mod zip_store;

pub use compressed_ply::{decode_compressed_ply, is_compressed_ply, write_compressed_ply};
pub use csv::write_csv;
pub use generator::{SplatGenerator, generate_table, generator_by_name};
pub use html::{HtmlOptions, write_html};
pub use ksplat::read_ksplat;
pub use lcc::read_lcc;
pub use lod::{LodOptions, write_lod};
pub use ply::{
    PlyData, PlyElement, PlyType, read_ply, read_ply_data, write_ply, write_ply_data,
};
pub use sog::{SogOptions, read_sog, read_sog_bundle, write_sog, write_sog_bundle};
pub use splat::read_splat;
pub use spz::read_spz;
pub use zip_store::ZipStoreWriter;

use splat_table::TableError;
use splat_vfs::VfsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Vfs(#[from] VfsError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Invalid {format} file: {detail}")]
    Format {
        format: &'static str,
        detail: String,
    },
    #[error("Unsupported {format} feature: {detail}")]
    Unsupported {
        format: &'static str,
        detail: String,
    },
    #[error("Input is not a Gaussian splat table")]
    NotGaussianSplat,
    #[error("Refusing to write an empty table")]
    EmptyTable,
    #[error("Unknown generator '{0}'")]
    UnknownGenerator(String),
}

impl CodecError {
    pub(crate) fn format(format: &'static str, detail: impl Into<String>) -> Self {
        Self::Format {
            format,
            detail: detail.into(),
        }
    }

    pub(crate) fn unsupported(format: &'static str, detail: impl Into<String>) -> Self {
        Self::Unsupported {
            format,
            detail: detail.into(),
        }
    }
}

/// One produced output file. Multi-file writers (SOG loose, HTML unbundled,
/// LOD) return several of these; the caller decides where they land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl NamedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Writers that need a splat table reject anything less, and nothing writes
/// an empty table.
pub(crate) fn require_gaussian_splat(table: &splat_table::DataTable) -> Result<(), CodecError> {
    if table.num_rows() == 0 {
        return Err(CodecError::EmptyTable);
    }
    if !splat_table::is_gaussian_splat(table) {
        return Err(CodecError::NotGaussianSplat);
    }
    Ok(())
}
