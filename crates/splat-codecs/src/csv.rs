use splat_table::{ColumnData, DataTable};

use crate::CodecError;

fn format_value(data: &ColumnData, index: usize) -> String {
    // Shortest-roundtrip float formatting, integers without a fraction.
    match data {
        ColumnData::F32(values) => values[index].to_string(),
        ColumnData::F64(values) => values[index].to_string(),
        other => (other.get(index) as i64).to_string(),
    }
}

/// Plain CSV: a header of column names, one line per row.
pub fn write_csv(table: &DataTable) -> Result<Vec<u8>, CodecError> {
    if table.num_rows() == 0 {
        return Err(CodecError::EmptyTable);
    }

    let mut out = String::new();
    let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    out.push_str(&names.join(","));
    out.push('\n');

    for row in 0..table.num_rows() {
        let mut first = true;
        for column in table.columns() {
            if !first {
                out.push(',');
            }
            out.push_str(&format_value(&column.data, row));
            first = false;
        }
        out.push('\n');
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_table::Column;

    #[test]
    fn header_and_rows() {
        let table = DataTable::new(vec![
            Column::new("x", ColumnData::F32(vec![0.5, -1.0])),
            Column::new("lod", ColumnData::I32(vec![0, -1])),
        ])
        .unwrap();

        let text = String::from_utf8(write_csv(&table).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["x,lod", "0.5,0", "-1,-1"]);
    }

    #[test]
    fn empty_tables_are_refused() {
        let table = DataTable::new(vec![Column::new("x", ColumnData::F32(vec![]))]).unwrap();
        assert!(matches!(write_csv(&table), Err(CodecError::EmptyTable)));
    }
}
