use anyhow::Result;
use splat_table::{Column, ColumnData, DataTable, well_known};

/// Column-wise union of several tables, rows concatenated.
///
/// A column joins an existing one when name and element type both match;
/// a same-named column of a different type keeps its data under a suffixed
/// name. Gaps are left zero-initialized.
pub fn combine(tables: &[DataTable]) -> Result<DataTable> {
    anyhow::ensure!(!tables.is_empty(), "Nothing to combine");
    if tables.len() == 1 {
        return Ok(tables[0].clone());
    }

    let total_rows: usize = tables.iter().map(DataTable::num_rows).sum();

    // Slot list: (output name, source name, type).
    let mut slots: Vec<(String, String, splat_table::ScalarType)> = vec![];
    for table in tables {
        for column in table.columns() {
            let ty = column.data.scalar_type();
            if slots
                .iter()
                .any(|(_, source, slot_ty)| *source == column.name && *slot_ty == ty)
            {
                continue;
            }
            let clashes = slots.iter().filter(|(_, source, _)| *source == column.name).count();
            let out_name = if clashes == 0 {
                column.name.clone()
            } else {
                let renamed = format!("{}_{}", column.name, clashes);
                log::warn!(
                    "Column '{}' exists with a different type; keeping both as '{renamed}'",
                    column.name
                );
                renamed
            };
            slots.push((out_name, column.name.clone(), ty));
        }
    }

    let mut columns: Vec<Column> = slots
        .iter()
        .map(|(out_name, _, ty)| Column::new(out_name.clone(), ColumnData::zeroed(*ty, total_rows)))
        .collect();

    let mut offset = 0;
    for table in tables {
        for column in table.columns() {
            let ty = column.data.scalar_type();
            let slot = slots
                .iter()
                .position(|(_, source, slot_ty)| *source == column.name && *slot_ty == ty)
                .expect("Every column was assigned a slot");
            columns[slot].data.copy_region(offset, &column.data);
        }
        offset += table.num_rows();
    }

    Ok(DataTable::new(columns)?)
}

/// Splits off environment splats (`lod == -1`). Returns the main table and,
/// when any environment rows exist, the environment table.
pub fn split_environment(table: DataTable) -> (DataTable, Option<DataTable>) {
    let Some(lod) = table.column(well_known::LOD) else {
        return (table, None);
    };

    let mut main_rows = vec![];
    let mut env_rows = vec![];
    for row in 0..table.num_rows() {
        if lod.data.get(row) == well_known::ENVIRONMENT_LOD {
            env_rows.push(row);
        } else {
            main_rows.push(row);
        }
    }
    if env_rows.is_empty() {
        return (table, None);
    }

    let environment = table.permute_rows(&env_rows);
    (table.permute_rows(&main_rows), Some(environment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_matching_columns() {
        let a = DataTable::new(vec![
            Column::new("x", ColumnData::F32(vec![1.0, 2.0])),
            Column::new("y", ColumnData::F32(vec![3.0, 4.0])),
        ])
        .unwrap();
        let b = DataTable::new(vec![Column::new("x", ColumnData::F32(vec![5.0]))]).unwrap();

        let combined = combine(&[a, b]).unwrap();
        assert_eq!(combined.num_rows(), 3);
        assert_eq!(
            combined.column("x").unwrap().data,
            ColumnData::F32(vec![1.0, 2.0, 5.0])
        );
        // Missing values are implicitly zero.
        assert_eq!(
            combined.column("y").unwrap().data,
            ColumnData::F32(vec![3.0, 4.0, 0.0])
        );
    }

    #[test]
    fn type_mismatch_keeps_both() {
        let a = DataTable::new(vec![Column::new("v", ColumnData::F32(vec![1.0]))]).unwrap();
        let b = DataTable::new(vec![Column::new("v", ColumnData::U8(vec![7]))]).unwrap();

        let combined = combine(&[a, b]).unwrap();
        assert_eq!(combined.num_columns(), 2);
        assert_eq!(
            combined.column("v").unwrap().data,
            ColumnData::F32(vec![1.0, 0.0])
        );
        assert_eq!(
            combined.column("v_1").unwrap().data,
            ColumnData::U8(vec![0, 7])
        );
    }

    #[test]
    fn environment_split() {
        let table = DataTable::new(vec![
            Column::new("x", ColumnData::F32(vec![0.0, 1.0, 2.0, 3.0])),
            Column::new("lod", ColumnData::I32(vec![0, -1, 1, -1])),
        ])
        .unwrap();

        let (main, env) = split_environment(table);
        assert_eq!(main.num_rows(), 2);
        let env = env.unwrap();
        assert_eq!(env.num_rows(), 2);
        assert_eq!(env.column("x").unwrap().data, ColumnData::F32(vec![1.0, 3.0]));
    }

    #[test]
    fn no_lod_column_means_no_environment() {
        let table = DataTable::new(vec![Column::new("x", ColumnData::F32(vec![0.0]))]).unwrap();
        let (main, env) = split_environment(table);
        assert_eq!(main.num_rows(), 1);
        assert!(env.is_none());
    }
}
