//! In-memory columnar table used at every I/O boundary.
//!
//! Stages work on typed rows; a [`Table`] is what gets written to and read
//! back from parquet shards.

use std::ops::Range;

use super::StoreError;

/// A single typed, nullable column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Utf8(Vec<Option<String>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Float32(Vec<Option<f32>>),
    Bool(Vec<Option<bool>>),
    Utf8List(Vec<Option<Vec<String>>>),
}

impl Column {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Utf8(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Float32(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Utf8List(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Utf8(_) => "utf8",
            Column::Int64(_) => "int64",
            Column::Float64(_) => "float64",
            Column::Float32(_) => "float32",
            Column::Bool(_) => "bool",
            Column::Utf8List(_) => "list<utf8>",
        }
    }

    fn slice(&self, range: Range<usize>) -> Column {
        match self {
            Column::Utf8(v) => Column::Utf8(v[range].to_vec()),
            Column::Int64(v) => Column::Int64(v[range].to_vec()),
            Column::Float64(v) => Column::Float64(v[range].to_vec()),
            Column::Float32(v) => Column::Float32(v[range].to_vec()),
            Column::Bool(v) => Column::Bool(v[range].to_vec()),
            Column::Utf8List(v) => Column::Utf8List(v[range].to_vec()),
        }
    }

    fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Utf8(v) => Column::Utf8(indices.iter().map(|&i| v[i].clone()).collect()),
            Column::Int64(v) => Column::Int64(indices.iter().map(|&i| v[i]).collect()),
            Column::Float64(v) => Column::Float64(indices.iter().map(|&i| v[i]).collect()),
            Column::Float32(v) => Column::Float32(indices.iter().map(|&i| v[i]).collect()),
            Column::Bool(v) => Column::Bool(indices.iter().map(|&i| v[i]).collect()),
            Column::Utf8List(v) => {
                Column::Utf8List(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }

    fn append(&mut self, other: Column) -> Result<(), Column> {
        match (self, other) {
            (Column::Utf8(a), Column::Utf8(b)) => a.extend(b),
            (Column::Int64(a), Column::Int64(b)) => a.extend(b),
            (Column::Float64(a), Column::Float64(b)) => a.extend(b),
            (Column::Float32(a), Column::Float32(b)) => a.extend(b),
            (Column::Bool(a), Column::Bool(b)) => a.extend(b),
            (Column::Utf8List(a), Column::Utf8List(b)) => a.extend(b),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    /// Rough in-memory footprint, used to size parquet shards.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Column::Utf8(v) => v
                .iter()
                .map(|s| s.as_ref().map_or(0, String::len) + 8)
                .sum(),
            Column::Int64(v) => v.len() * 8,
            Column::Float64(v) => v.len() * 8,
            Column::Float32(v) => v.len() * 4,
            Column::Bool(v) => v.len(),
            Column::Utf8List(v) => v
                .iter()
                .map(|l| {
                    l.as_ref()
                        .map_or(0, |items| items.iter().map(|s| s.len() + 8).sum::<usize>())
                        + 8
                })
                .sum(),
        }
    }
}

/// Named columns of equal length, optionally flagging one as the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    index: Option<String>,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column; its length must match the existing columns.
    ///
    /// # Errors
    /// Returns [`StoreError::LengthMismatch`] on a length mismatch and
    /// [`StoreError::DuplicateColumn`] when the name is taken.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column: Column,
    ) -> Result<Self, StoreError> {
        self.push_column(name, column)?;
        Ok(self)
    }

    /// In-place variant of [`Table::with_column`].
    ///
    /// # Errors
    /// Same as [`Table::with_column`].
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        column: Column,
    ) -> Result<(), StoreError> {
        let name = name.into();
        if self.names.iter().any(|n| *n == name) {
            return Err(StoreError::DuplicateColumn { column: name });
        }
        if let Some(first) = self.columns.first() {
            if first.len() != column.len() {
                return Err(StoreError::LengthMismatch {
                    column: name,
                    expected: first.len(),
                    actual: column.len(),
                });
            }
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Marks `name` as the index column.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        self.index.as_deref()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// # Errors
    /// Returns [`StoreError::MissingColumn`] when absent.
    pub fn column(&self, name: &str) -> Result<&Column, StoreError> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| StoreError::MissingColumn {
                column: name.to_string(),
            })
    }

    /// # Errors
    /// Missing column or a column that is not utf8.
    pub fn utf8(&self, name: &str) -> Result<&[Option<String>], StoreError> {
        match self.column(name)? {
            Column::Utf8(values) => Ok(values),
            other => Err(type_error(name, "utf8", other)),
        }
    }

    /// Utf8 column when present, `None` when the column does not exist.
    ///
    /// # Errors
    /// Column exists with another type.
    pub fn utf8_opt(&self, name: &str) -> Result<Option<&[Option<String>]>, StoreError> {
        if self.has_column(name) {
            self.utf8(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Numeric column widened to f64 (accepts int64, float32, float64).
    ///
    /// # Errors
    /// Missing column or non-numeric column.
    pub fn f64_values(&self, name: &str) -> Result<Vec<Option<f64>>, StoreError> {
        match self.column(name)? {
            Column::Float64(values) => Ok(values.clone()),
            Column::Float32(values) => Ok(values.iter().map(|v| v.map(f64::from)).collect()),
            #[allow(clippy::cast_precision_loss)]
            Column::Int64(values) => Ok(values.iter().map(|v| v.map(|x| x as f64)).collect()),
            other => Err(type_error(name, "numeric", other)),
        }
    }

    /// Integer column (accepts int64 and integral floats).
    ///
    /// # Errors
    /// Missing column or a non-integer column.
    pub fn i64_values(&self, name: &str) -> Result<Vec<Option<i64>>, StoreError> {
        match self.column(name)? {
            Column::Int64(values) => Ok(values.clone()),
            #[allow(clippy::cast_possible_truncation)]
            Column::Float64(values) => Ok(values
                .iter()
                .map(|v| v.filter(|x| x.is_finite()).map(|x| x as i64))
                .collect()),
            other => Err(type_error(name, "int64", other)),
        }
    }

    /// # Errors
    /// Missing column or non-list column.
    pub fn utf8_lists(&self, name: &str) -> Result<&[Option<Vec<String>>], StoreError> {
        match self.column(name)? {
            Column::Utf8List(values) => Ok(values),
            other => Err(type_error(name, "list<utf8>", other)),
        }
    }

    /// Rows `range` as a new table.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.slice(range.clone())).collect(),
            index: self.index.clone(),
        }
    }

    /// Rows at `indices`, in that order.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            index: self.index.clone(),
        }
    }

    /// Copy without the named column.
    #[must_use]
    pub fn without_column(&self, name: &str) -> Table {
        let mut table = Table {
            index: self.index.clone().filter(|idx| idx != name),
            ..Table::default()
        };
        for (n, c) in self.names.iter().zip(&self.columns) {
            if n != name {
                table.names.push(n.clone());
                table.columns.push(c.clone());
            }
        }
        table
    }

    /// Vertically concatenates shards that share one schema.
    ///
    /// # Errors
    /// Returns [`StoreError::SchemaDrift`] when column names or types differ.
    pub fn concat(tables: Vec<Table>) -> Result<Table, StoreError> {
        let mut iter = tables.into_iter();
        let Some(mut acc) = iter.next() else {
            return Ok(Table::default());
        };
        for table in iter {
            if table.names != acc.names {
                return Err(StoreError::SchemaDrift {
                    expected: acc.names.clone(),
                    actual: table.names.clone(),
                });
            }
            for (idx, column) in table.columns.into_iter().enumerate() {
                if let Err(column) = acc.columns[idx].append(column) {
                    return Err(type_error(&acc.names[idx], acc.columns[idx].type_name(), &column));
                }
            }
        }
        Ok(acc)
    }

    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.columns.iter().map(Column::estimated_bytes).sum()
    }
}

fn type_error(name: &str, expected: &'static str, actual: &Column) -> StoreError {
    StoreError::ColumnType {
        column: name.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new()
            .with_column("id", Column::Utf8(vec![Some("a".into()), Some("b".into())]))
            .and_then(|t| t.with_column("n", Column::Int64(vec![Some(1), None])))
            .expect("table")
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = sample()
            .with_column("x", Column::Bool(vec![Some(true)]))
            .expect_err("length mismatch");
        assert!(matches!(err, StoreError::LengthMismatch { .. }));
    }

    #[test]
    fn numeric_columns_widen_to_f64() {
        let table = sample();
        assert_eq!(table.f64_values("n").expect("n"), vec![Some(1.0), None]);
        assert!(table.utf8("n").is_err());
    }

    #[test]
    fn concat_appends_rows() {
        let merged = Table::concat(vec![sample(), sample().slice(0..1)]).expect("concat");
        assert_eq!(merged.num_rows(), 3);
        assert_eq!(merged.utf8("id").expect("id")[2].as_deref(), Some("a"));
    }

    #[test]
    fn concat_rejects_schema_drift() {
        let other = sample().without_column("n");
        assert!(matches!(
            Table::concat(vec![sample(), other]),
            Err(StoreError::SchemaDrift { .. })
        ));
    }
}
