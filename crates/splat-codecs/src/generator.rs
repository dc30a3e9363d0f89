use splat_table::{Column, ColumnData, DataTable, Row, inv_sigmoid};

use crate::CodecError;

/// A procedural splat source. Generators are built in and selected by name;
/// `param` actions configure them before the table is materialized.
pub trait SplatGenerator: Send {
    fn count(&self) -> usize;
    fn column_names(&self) -> Vec<String>;
    fn get_row(&self, index: usize, out: &mut Row);
}

fn param_f64(params: &[(String, String)], name: &str, default: f64) -> Result<f64, CodecError> {
    match params.iter().rev().find(|(k, _)| k == name) {
        None => Ok(default),
        Some((_, value)) => value
            .parse()
            .map_err(|_| CodecError::format("generator", format!("Bad value for param '{name}'"))),
    }
}

const SPLAT_COLUMNS: [&str; 14] = [
    "x", "y", "z", "rot_0", "rot_1", "rot_2", "rot_3", "scale_0", "scale_1", "scale_2", "f_dc_0",
    "f_dc_1", "f_dc_2", "opacity",
];

/// A flat n-by-n grid of identical Gaussians in the xz plane with a color
/// gradient. Handy as a smoke-test scene.
struct GridGenerator {
    size: usize,
    spacing: f64,
    scale: f64,
    opacity: f64,
}

impl GridGenerator {
    fn from_params(params: &[(String, String)]) -> Result<Self, CodecError> {
        Ok(Self {
            size: param_f64(params, "size", 4.0)? as usize,
            spacing: param_f64(params, "spacing", 1.0)?,
            scale: param_f64(params, "scale", 0.1)?,
            opacity: param_f64(params, "opacity", 0.9)?,
        })
    }
}

impl SplatGenerator for GridGenerator {
    fn count(&self) -> usize {
        self.size * self.size
    }

    fn column_names(&self) -> Vec<String> {
        SPLAT_COLUMNS.iter().map(|&s| s.to_owned()).collect()
    }

    fn get_row(&self, index: usize, out: &mut Row) {
        let half = (self.size as f64 - 1.0) * 0.5;
        let gx = (index % self.size) as f64;
        let gz = (index / self.size) as f64;

        let mut set = |name: &str, value: f64| {
            out.insert(name.to_owned(), value);
        };
        set("x", (gx - half) * self.spacing);
        set("y", 0.0);
        set("z", (gz - half) * self.spacing);
        set("rot_0", 1.0);
        set("rot_1", 0.0);
        set("rot_2", 0.0);
        set("rot_3", 0.0);
        for k in 0..3 {
            set(&format!("scale_{k}"), self.scale.ln());
        }
        let t = index as f64 / (self.count() - 1).max(1) as f64;
        set("f_dc_0", t * 2.0 - 1.0);
        set("f_dc_1", 0.0);
        set("f_dc_2", 1.0 - t * 2.0);
        set("opacity", inv_sigmoid(self.opacity));
    }
}

/// Gaussians spread over a sphere surface via a Fibonacci lattice.
struct SphereGenerator {
    count: usize,
    radius: f64,
    scale: f64,
    opacity: f64,
}

impl SphereGenerator {
    fn from_params(params: &[(String, String)]) -> Result<Self, CodecError> {
        Ok(Self {
            count: param_f64(params, "count", 1000.0)? as usize,
            radius: param_f64(params, "radius", 1.0)?,
            scale: param_f64(params, "scale", 0.05)?,
            opacity: param_f64(params, "opacity", 0.9)?,
        })
    }
}

impl SplatGenerator for SphereGenerator {
    fn count(&self) -> usize {
        self.count
    }

    fn column_names(&self) -> Vec<String> {
        SPLAT_COLUMNS.iter().map(|&s| s.to_owned()).collect()
    }

    fn get_row(&self, index: usize, out: &mut Row) {
        let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        let t = (index as f64 + 0.5) / self.count as f64;
        let phi = (1.0 - 2.0 * t).acos();
        let theta = golden * index as f64;

        let mut set = |name: &str, value: f64| {
            out.insert(name.to_owned(), value);
        };
        set("x", self.radius * phi.sin() * theta.cos());
        set("y", self.radius * phi.cos());
        set("z", self.radius * phi.sin() * theta.sin());
        set("rot_0", 1.0);
        set("rot_1", 0.0);
        set("rot_2", 0.0);
        set("rot_3", 0.0);
        for k in 0..3 {
            set(&format!("scale_{k}"), self.scale.ln());
        }
        set("f_dc_0", t * 2.0 - 1.0);
        set("f_dc_1", (t * std::f64::consts::TAU).sin());
        set("f_dc_2", 1.0 - t * 2.0);
        set("opacity", inv_sigmoid(self.opacity));
    }
}

/// Looks up a built-in generator by name (the input's file stem).
pub fn generator_by_name(
    name: &str,
    params: &[(String, String)],
) -> Result<Box<dyn SplatGenerator>, CodecError> {
    match name {
        "grid" => Ok(Box::new(GridGenerator::from_params(params)?)),
        "sphere" => Ok(Box::new(SphereGenerator::from_params(params)?)),
        other => Err(CodecError::UnknownGenerator(other.to_owned())),
    }
}

/// Materializes a generator into a float32 data table.
pub fn generate_table(generator: &dyn SplatGenerator) -> Result<DataTable, CodecError> {
    let count = generator.count();
    let names = generator.column_names();

    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(count); names.len()];
    let mut row = Row::new();
    for i in 0..count {
        generator.get_row(i, &mut row);
        for (column, name) in columns.iter_mut().zip(&names) {
            column.push(row.get(name).copied().unwrap_or(0.0) as f32);
        }
    }

    Ok(DataTable::new(
        names
            .into_iter()
            .zip(columns)
            .map(|(name, data)| Column::new(name, ColumnData::F32(data)))
            .collect(),
    )?)
}

/// The 16-splat smoke-test grid used across the codec tests.
#[cfg(test)]
pub(crate) fn test_grid() -> DataTable {
    let generator = generator_by_name("grid", &[]).expect("Built-in");
    generate_table(generator.as_ref()).expect("Grid generates")
}
