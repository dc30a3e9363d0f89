mod read;

pub use read::{read_sog, read_sog_bundle};

use std::sync::Arc;

use image::{ExtendedColorType, codecs::webp::WebPEncoder};
use serde::{Deserialize, Serialize};
use splat_actions::morton_order;
use splat_quant::{AssignBackend, kmeans, label_slice, quantize_1d};
use splat_table::{Column, DataTable, sh_coeffs_for_degree, sh_degree_for_table, sigmoid};

use crate::zip_store::ZipStoreWriter;
use crate::{CodecError, NamedFile, require_gaussian_splat};

/// SOG writer knobs. `backend` is the seam for a GPU k-means assignment
/// implementation; the default is the in-process ball-tree path.
#[derive(Clone)]
pub struct SogOptions {
    /// Maximum k-means rounds for the SH palette.
    pub iterations: usize,
    /// Seed for centroid initialization; fixed so identical inputs emit
    /// byte-identical bundles.
    pub seed: u64,
    pub backend: Option<Arc<dyn AssignBackend>>,
}

impl Default for SogOptions {
    fn default() -> Self {
        Self {
            iterations: 10,
            seed: 0,
            backend: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct SogAsset {
    pub generator: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct MeansMeta {
    pub mins: Vec<f32>,
    pub maxs: Vec<f32>,
    pub files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct CodebookMeta {
    pub codebook: Vec<f32>,
    pub files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct FilesMeta {
    pub files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ShnMeta {
    pub count: usize,
    pub bands: u32,
    pub codebook: Vec<f32>,
    pub files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct SogMeta {
    pub version: u32,
    pub asset: SogAsset,
    pub count: usize,
    pub means: MeansMeta,
    pub scales: CodebookMeta,
    pub quats: FilesMeta,
    pub sh0: CodebookMeta,
    #[serde(rename = "shN", skip_serializing_if = "Option::is_none")]
    pub shn: Option<ShnMeta>,
}

struct Rgba {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Rgba {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    fn put(&mut self, texel: usize, rgba: [u8; 4]) {
        self.data[texel * 4..texel * 4 + 4].copy_from_slice(&rgba);
    }

    fn encode_webp(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        WebPEncoder::new_lossless(&mut out).encode(
            &self.data,
            self.width,
            self.height,
            ExtendedColorType::Rgba8,
        )?;
        Ok(out)
    }
}

/// Texture footprint: both sides multiples of 4, enough texels for every
/// splat.
pub(crate) fn texture_dims(num_rows: usize) -> (u32, u32) {
    let w = ((num_rows as f64).sqrt().ceil() as usize).div_ceil(4) * 4;
    let h = num_rows.div_ceil(w).div_ceil(4) * 4;
    (w as u32, h as u32)
}

/// Symmetric log transform applied to positions before 16-bit quantization.
pub(crate) fn log_transform(v: f64) -> f64 {
    v.signum() * (v.abs() + 1.0).ln()
}

pub(crate) fn log_transform_inverse(v: f64) -> f64 {
    v.signum() * (v.abs().exp() - 1.0)
}

fn gather_columns(table: &DataTable, names: &[String]) -> Result<DataTable, CodecError> {
    let columns: Vec<Column> = names
        .iter()
        .map(|name| {
            table
                .column(name)
                .cloned()
                .ok_or_else(|| CodecError::format("sog", format!("Missing column '{name}'")))
        })
        .collect::<Result<_, _>>()?;
    Ok(DataTable::new(columns)?)
}

/// SH palette size: grows with the splat count, capped at 64k entries.
pub(crate) fn palette_size(num_rows: usize) -> usize {
    let pow = (num_rows as f64 / 1024.0).log2().floor();
    ((2.0f64.powf(pow)).min(64.0) * 1024.0).max(1.0) as usize
}

/// Emits the full SOG image set plus `meta.json` as loose files.
pub fn write_sog(table: &DataTable, options: &SogOptions) -> Result<Vec<NamedFile>, CodecError> {
    require_gaussian_splat(table)?;

    let num_rows = table.num_rows();
    let order = morton_order(table);
    let (width, height) = texture_dims(num_rows);

    // Means: per-axis log transform, 16 bits split over two images.
    let axes = ["x", "y", "z"];
    let mut log_positions = Vec::with_capacity(3);
    let mut mins = Vec::with_capacity(3);
    let mut maxs = Vec::with_capacity(3);
    for name in axes {
        let column = table.column(name).expect("Splat checked");
        let values: Vec<f64> = (0..num_rows)
            .map(|i| log_transform(column.data.get(i)))
            .collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        mins.push(min as f32);
        maxs.push(max as f32);
        log_positions.push(values);
    }

    let mut means_l = Rgba::new(width, height);
    let mut means_u = Rgba::new(width, height);
    for (texel, &row) in order.iter().enumerate() {
        let mut lo = [0u8; 4];
        let mut hi = [0u8; 4];
        for axis in 0..3 {
            let (min, max) = (mins[axis] as f64, maxs[axis] as f64);
            let q = if max > min {
                ((log_positions[axis][row] - min) / (max - min) * 65535.0).round() as u32
            } else {
                0
            };
            lo[axis] = (q & 0xff) as u8;
            hi[axis] = (q >> 8) as u8;
        }
        lo[3] = 255;
        hi[3] = 255;
        means_l.put(texel, lo);
        means_u.put(texel, hi);
    }

    // Quaternions: largest component dropped, the rest in 8 bits, the
    // dropped index tagged in alpha.
    let rot: [&Column; 4] = [
        table.column("rot_0").expect("Splat checked"),
        table.column("rot_1").expect("Splat checked"),
        table.column("rot_2").expect("Splat checked"),
        table.column("rot_3").expect("Splat checked"),
    ];
    let mut quats = Rgba::new(width, height);
    for (texel, &row) in order.iter().enumerate() {
        // (x, y, z, w) component order.
        let mut q = [
            rot[1].data.get(row),
            rot[2].data.get(row),
            rot[3].data.get(row),
            rot[0].data.get(row),
        ];
        let len = q.iter().map(|v| v * v).sum::<f64>().sqrt();
        if len > 0.0 {
            for v in &mut q {
                *v /= len;
            }
        }
        let largest = (0..4)
            .max_by(|&a, &b| q[a].abs().total_cmp(&q[b].abs()))
            .expect("Four components");
        if q[largest] < 0.0 {
            for v in &mut q {
                *v = -*v;
            }
        }

        let mut rgba = [0u8; 4];
        for (slot, component) in (0..4).filter(|&c| c != largest).enumerate() {
            let scaled = q[component] * std::f64::consts::SQRT_2;
            rgba[slot] = (255.0 * (scaled * 0.5 + 0.5)).round().clamp(0.0, 255.0) as u8;
        }
        rgba[3] = 252 + largest as u8;
        quats.put(texel, rgba);
    }

    // Scales and DC color share the 1-D codebook path.
    let scale_names: Vec<String> = (0..3).map(|k| format!("scale_{k}")).collect();
    let scale_quant = quantize_1d(&gather_columns(table, &scale_names)?, 256, 0.5);
    let mut scales = Rgba::new(width, height);
    for (texel, &row) in order.iter().enumerate() {
        let mut rgba = [0u8; 4];
        for (axis, name) in scale_names.iter().enumerate() {
            rgba[axis] = scale_quant.labels.column(name).expect("Mirrors input").data.get(row) as u8;
        }
        rgba[3] = 255;
        scales.put(texel, rgba);
    }

    let color_names: Vec<String> = (0..3).map(|k| format!("f_dc_{k}")).collect();
    let color_quant = quantize_1d(&gather_columns(table, &color_names)?, 256, 0.5);
    let opacity = table.column("opacity").expect("Splat checked");
    let mut sh0 = Rgba::new(width, height);
    for (texel, &row) in order.iter().enumerate() {
        let mut rgba = [0u8; 4];
        for (channel, name) in color_names.iter().enumerate() {
            rgba[channel] =
                color_quant.labels.column(name).expect("Mirrors input").data.get(row) as u8;
        }
        rgba[3] = (255.0 * sigmoid(opacity.data.get(row)))
            .round()
            .clamp(0.0, 255.0) as u8;
        sh0.put(texel, rgba);
    }

    let codebook_of = |quant: &splat_quant::Quantization| -> Vec<f32> {
        quant
            .centroids
            .column("codebook")
            .and_then(|c| c.data.as_f32())
            .expect("Codebook column")
            .to_vec()
    };

    let mut meta = SogMeta {
        version: 2,
        asset: SogAsset {
            generator: format!("splat-transform {}", env!("CARGO_PKG_VERSION")),
        },
        count: num_rows,
        means: MeansMeta {
            mins,
            maxs,
            files: vec!["means_l.webp".to_owned(), "means_u.webp".to_owned()],
        },
        scales: CodebookMeta {
            codebook: codebook_of(&scale_quant),
            files: vec!["scales.webp".to_owned()],
        },
        quats: FilesMeta {
            files: vec!["quats.webp".to_owned()],
        },
        sh0: CodebookMeta {
            codebook: codebook_of(&color_quant),
            files: vec!["sh0.webp".to_owned()],
        },
        shn: None,
    };

    let mut files = vec![
        NamedFile::new("means_l.webp", means_l.encode_webp()?),
        NamedFile::new("means_u.webp", means_u.encode_webp()?),
        NamedFile::new("quats.webp", quats.encode_webp()?),
        NamedFile::new("scales.webp", scales.encode_webp()?),
        NamedFile::new("sh0.webp", sh0.encode_webp()?),
    ];

    let degree = sh_degree_for_table(table);
    if degree > 0 {
        let coeffs = sh_coeffs_for_degree(degree);
        let rest_names: Vec<String> = (0..coeffs * 3).map(|k| format!("f_rest_{k}")).collect();
        let rest_table = gather_columns(table, &rest_names)?;

        let palette = palette_size(num_rows);
        log::debug!("SH palette: {palette} centroids over {} dims", coeffs * 3);
        let clusters = kmeans(
            &rest_table,
            palette,
            options.iterations,
            options.seed,
            options.backend.as_deref(),
        );
        let labels = label_slice(&clusters.labels);

        // The centroid coordinates themselves go through the 1-D codebook.
        let centroid_quant = quantize_1d(&clusters.centroids, 256, 0.5);
        let palette_rows = clusters.centroids.num_rows();

        let centroid_width = (64 * coeffs) as u32;
        let centroid_height = palette_rows.div_ceil(64) as u32;
        let mut centroids_img = Rgba::new(centroid_width, centroid_height);
        for j in 0..palette_rows {
            let base = (j / 64) * 64 * coeffs + (j % 64) * coeffs;
            for k in 0..coeffs {
                let label_at = |channel: usize| -> u8 {
                    centroid_quant
                        .labels
                        .column(&rest_names[channel * coeffs + k])
                        .expect("Mirrors input")
                        .data
                        .get(j) as u8
                };
                centroids_img.put(base + k, [label_at(0), label_at(1), label_at(2), 255]);
            }
        }

        let mut labels_img = Rgba::new(width, height);
        for (texel, &row) in order.iter().enumerate() {
            let label = labels[row];
            labels_img.put(texel, [(label & 0xff) as u8, ((label >> 8) & 0xff) as u8, 0, 255]);
        }

        meta.shn = Some(ShnMeta {
            count: palette_rows,
            bands: degree,
            codebook: codebook_of(&centroid_quant),
            files: vec![
                "shN_centroids.webp".to_owned(),
                "shN_labels.webp".to_owned(),
            ],
        });
        files.push(NamedFile::new(
            "shN_centroids.webp",
            centroids_img.encode_webp()?,
        ));
        files.push(NamedFile::new("shN_labels.webp", labels_img.encode_webp()?));
    }

    files.insert(0, NamedFile::new("meta.json", serde_json::to_vec(&meta)?));
    Ok(files)
}

/// Single-file `.sog` bundle: the loose layout in a STORE-only zip.
pub fn write_sog_bundle(table: &DataTable, options: &SogOptions) -> Result<Vec<u8>, CodecError> {
    let files = write_sog(table, options)?;
    let mut zip = ZipStoreWriter::new();
    for file in &files {
        zip.add_file(&file.name, &file.bytes);
    }
    Ok(zip.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_dims_are_multiples_of_four() {
        for n in [1usize, 16, 100, 1023, 1024, 5000] {
            let (w, h) = texture_dims(n);
            assert_eq!(w % 4, 0, "n={n}");
            assert_eq!(h % 4, 0, "n={n}");
            assert!(w as usize * h as usize >= n, "n={n}");
        }
        assert_eq!(texture_dims(16), (4, 4));
    }

    #[test]
    fn palette_sizes() {
        assert_eq!(palette_size(16), 16);
        assert_eq!(palette_size(2048), 2048);
        assert_eq!(palette_size(1 << 20), 64 * 1024);
        assert_eq!(palette_size(10_000_000), 64 * 1024);
    }

    #[test]
    fn log_transform_roundtrip() {
        for v in [-1000.0, -0.5, 0.0, 0.25, 3.0, 1e6] {
            let t = log_transform(v);
            assert!((log_transform_inverse(t) - v).abs() < 1e-6_f64.max(v.abs() * 1e-12));
        }
    }
}
