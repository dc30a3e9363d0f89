use std::collections::HashMap;

use thiserror::Error;

use crate::column::{Column, ColumnData};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("A table needs at least one column")]
    NoColumns,
    #[error("Column '{0}' has {1} rows, table has {2}")]
    LengthMismatch(String, usize, usize),
    #[error("Duplicate column name '{0}'")]
    DuplicateName(String),
}

/// Scratch row used by [`DataTable::get_row`] / [`DataTable::set_row`].
pub type Row = HashMap<String, f64>;

/// Ordered list of equally-long named columns. The universal in-memory
/// representation of a splat collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    columns: Vec<Column>,
}

impl DataTable {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let Some(first) = columns.first() else {
            return Err(TableError::NoColumns);
        };
        let num_rows = first.data.len();
        for column in &columns {
            if column.data.len() != num_rows {
                return Err(TableError::LengthMismatch(
                    column.name.clone(),
                    column.data.len(),
                    num_rows,
                ));
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TableError::DuplicateName(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns[0].data.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Fills `scratch[name] = column[index]` for every column.
    pub fn get_row<'a>(&self, index: usize, scratch: &'a mut Row) -> &'a mut Row {
        for column in &self.columns {
            scratch.insert(column.name.clone(), column.data.get(index));
        }
        scratch
    }

    /// Assigns `column[index] = row[name]` for every column named in `row`.
    /// Names without a matching column are ignored.
    pub fn set_row(&mut self, index: usize, row: &Row) {
        for column in &mut self.columns {
            if let Some(&value) = row.get(&column.name) {
                column.data.set(index, value);
            }
        }
    }

    pub fn add_column(&mut self, column: Column) -> Result<(), TableError> {
        if column.data.len() != self.num_rows() {
            return Err(TableError::LengthMismatch(
                column.name,
                column.data.len(),
                self.num_rows(),
            ));
        }
        if self.has_column(&column.name) {
            return Err(TableError::DuplicateName(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Removes the named column. Returns whether it was present. Removing the
    /// last column is refused to keep the table well-formed.
    pub fn remove_column(&mut self, name: &str) -> bool {
        if self.columns.len() == 1 {
            return false;
        }
        let Some(index) = self.columns.iter().position(|c| c.name == name) else {
            return false;
        };
        self.columns.remove(index);
        true
    }

    /// Gather rows into a new table: `new[i] = old[indices[i]]`. `indices` may
    /// select fewer rows than the table has.
    pub fn permute_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.gather(indices)))
                .collect(),
        }
    }

    /// Cycle-following in-place rearrangement for a full permutation:
    /// afterwards `column[i]` holds what was at `column[indices[i]]`. One
    /// scratch row per cycle, a visited bitset, fixed points skipped.
    pub fn permute_rows_in_place(&mut self, indices: &[usize]) {
        let num_rows = self.num_rows();
        assert_eq!(indices.len(), num_rows, "Not a full permutation");

        let mut visited = vec![0u64; num_rows.div_ceil(64)];
        let mut scratch = vec![0.0f64; self.columns.len()];

        for start in 0..num_rows {
            if visited[start / 64] & (1 << (start % 64)) != 0 || indices[start] == start {
                continue;
            }

            for (slot, column) in scratch.iter_mut().zip(&self.columns) {
                *slot = column.data.get(start);
            }

            let mut pos = start;
            loop {
                visited[pos / 64] |= 1 << (pos % 64);
                let src = indices[pos];
                if src == start {
                    for (slot, column) in scratch.iter().zip(&mut self.columns) {
                        column.data.set(pos, *slot);
                    }
                    break;
                }
                for column in &mut self.columns {
                    let value = column.data.get(src);
                    column.data.set(pos, value);
                }
                pos = src;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ScalarType;

    fn table() -> DataTable {
        DataTable::new(vec![
            Column::new("a", ColumnData::F32(vec![0.0, 1.0, 2.0, 3.0, 4.0])),
            Column::new("b", ColumnData::U32(vec![10, 11, 12, 13, 14])),
        ])
        .unwrap()
    }

    #[test]
    fn invariants_checked() {
        assert!(matches!(
            DataTable::new(vec![]),
            Err(TableError::NoColumns)
        ));
        assert!(matches!(
            DataTable::new(vec![
                Column::new("a", ColumnData::F32(vec![0.0])),
                Column::new("b", ColumnData::F32(vec![0.0, 1.0])),
            ]),
            Err(TableError::LengthMismatch(..))
        ));
        assert!(matches!(
            DataTable::new(vec![
                Column::new("a", ColumnData::F32(vec![0.0])),
                Column::new("a", ColumnData::F32(vec![1.0])),
            ]),
            Err(TableError::DuplicateName(..))
        ));
    }

    #[test]
    fn row_roundtrip() {
        let mut t = table();
        let mut row = Row::new();
        t.get_row(2, &mut row);
        assert_eq!(row["a"], 2.0);
        assert_eq!(row["b"], 12.0);

        row.insert("a".to_owned(), 9.0);
        row.insert("missing".to_owned(), 1.0);
        t.set_row(0, &row);
        assert_eq!(t.column("a").unwrap().data.get(0), 9.0);
        // Unknown names are ignored, untouched columns keep their value.
        assert_eq!(t.column("b").unwrap().data.get(0), 12.0);
    }

    #[test]
    fn add_column_validates() {
        let mut t = table();
        assert!(
            t.add_column(Column::new("c", ColumnData::zeroed(ScalarType::U8, 5)))
                .is_ok()
        );
        assert!(
            t.add_column(Column::new("c", ColumnData::zeroed(ScalarType::U8, 5)))
                .is_err()
        );
        assert!(
            t.add_column(Column::new("d", ColumnData::zeroed(ScalarType::U8, 4)))
                .is_err()
        );
    }

    #[test]
    fn permute_selects_and_reorders() {
        let t = table();
        let selected = t.permute_rows(&[4, 0]);
        assert_eq!(selected.num_rows(), 2);
        assert_eq!(selected.column("a").unwrap().data.get(0), 4.0);
        assert_eq!(selected.column("b").unwrap().data.get(1), 10.0);
    }

    #[test]
    fn in_place_matches_out_of_place() {
        let t = table();
        let perm = [3, 1, 4, 0, 2];

        let gathered = t.permute_rows(&perm);
        let mut in_place = t.clone();
        in_place.permute_rows_in_place(&perm);

        assert_eq!(gathered, in_place);
    }

    #[test]
    fn identity_permutation_is_noop() {
        let t = table();
        let mut permuted = t.clone();
        permuted.permute_rows_in_place(&[0, 1, 2, 3, 4]);
        assert_eq!(t, permuted);
    }
}
