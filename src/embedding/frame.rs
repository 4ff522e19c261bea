//! Id-indexed embedding matrix.

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::store::{Column, StoreError, Table};
use crate::util::error::PipelineError;

pub const EMBEDDING_PREFIX: &str = "embedding_";

/// `embedding_0 … embedding_{dim-1}`.
#[must_use]
pub fn embedding_columns(dim: usize) -> Vec<String> {
    (0..dim).map(|i| format!("{EMBEDDING_PREFIX}{i}")).collect()
}

/// Rows of `vectors` keyed by a unique id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingFrame {
    name: String,
    id_col: String,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    vectors: Array2<f32>,
}

impl EmbeddingFrame {
    /// # Errors
    /// [`PipelineError::UniquenessViolation`] on duplicated ids and
    /// [`PipelineError::SchemaMismatch`] when ids and rows disagree.
    pub fn new(
        name: impl Into<String>,
        id_col: impl Into<String>,
        ids: Vec<String>,
        vectors: Array2<f32>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        if ids.len() != vectors.nrows() {
            return Err(PipelineError::schema(
                &name,
                format!("{} ids for {} rows", ids.len(), vectors.nrows()),
            ));
        }
        let mut index = HashMap::with_capacity(ids.len());
        let mut duplicated = Vec::new();
        for (row, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), row).is_some() {
                duplicated.push(id.clone());
            }
        }
        if !duplicated.is_empty() {
            duplicated.sort();
            duplicated.dedup();
            return Err(PipelineError::UniquenessViolation {
                frame: name,
                ids: duplicated,
            });
        }
        Ok(Self {
            name,
            id_col: id_col.into(),
            ids,
            index,
            vectors,
        })
    }

    /// Stacks owned rows of width `dim`.
    ///
    /// # Errors
    /// A row has the wrong width, or the ids are not unique.
    pub fn from_rows(
        name: impl Into<String>,
        id_col: impl Into<String>,
        ids: Vec<String>,
        rows: &[Array1<f32>],
        dim: usize,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (row, id) in rows.iter().zip(&ids) {
            if row.len() != dim {
                return Err(PipelineError::schema(
                    &name,
                    format!("row {id} has dim {} != {dim}", row.len()),
                ));
            }
            data.extend(row.iter().copied());
        }
        let vectors = Array2::from_shape_vec((rows.len(), dim), data)
            .map_err(|e| PipelineError::schema(&name, e))?;
        Self::new(name, id_col, ids, vectors)
    }

    /// Reads `{id_col}, embedding_0 …` from a table; float64 columns narrow to f32.
    ///
    /// # Errors
    /// Missing id or embedding columns, nulls, or duplicated ids.
    pub fn from_table(name: &str, table: &Table, id_col: &str) -> Result<Self, PipelineError> {
        let ids = crate::metadata::records::required_ids(table, name, id_col)?;
        let mut dim = 0;
        while table.has_column(&format!("{EMBEDDING_PREFIX}{dim}")) {
            dim += 1;
        }
        if dim == 0 {
            return Err(PipelineError::schema(name, "no embedding_0 column"));
        }
        let rows = table.num_rows();
        let mut vectors = Array2::<f32>::zeros((rows, dim));
        for (col_ix, col_name) in embedding_columns(dim).iter().enumerate() {
            let values =
                float_column(table, col_name).map_err(|e| PipelineError::from_store(name, e))?;
            for (row, value) in values.into_iter().enumerate() {
                let Some(value) = value else {
                    return Err(PipelineError::schema(
                        name,
                        format!("null {col_name} for {}", ids[row]),
                    ));
                };
                vectors[[row, col_ix]] = value;
            }
        }
        Self::new(name, id_col, ids, vectors)
    }

    /// Frame as a table with the id column flagged as index.
    ///
    /// # Errors
    /// Table assembly fails (duplicate column names).
    pub fn to_table(&self) -> Result<Table, StoreError> {
        let mut table = Table::new().with_column(
            self.id_col.clone(),
            Column::Utf8(self.ids.iter().cloned().map(Some).collect()),
        )?;
        for (col_ix, col_name) in embedding_columns(self.dim()).into_iter().enumerate() {
            let column = self.vectors.column(col_ix).iter().copied().map(Some).collect();
            table.push_column(col_name, Column::Float32(column))?;
        }
        Ok(table.with_index(self.id_col.clone()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id_col(&self) -> &str {
        &self.id_col
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    #[must_use]
    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ArrayView1<'_, f32>> {
        self.position(id).map(|row| self.vectors.row(row))
    }

    /// Rows whose id satisfies `keep`, in the original order.
    #[must_use]
    pub fn filter(&self, keep: impl Fn(&str) -> bool) -> EmbeddingFrame {
        let rows: Vec<usize> = (0..self.len()).filter(|&row| keep(&self.ids[row])).collect();
        let ids: Vec<String> = rows.iter().map(|&row| self.ids[row].clone()).collect();
        let index = ids.iter().enumerate().map(|(row, id)| (id.clone(), row)).collect();
        EmbeddingFrame {
            name: self.name.clone(),
            id_col: self.id_col.clone(),
            ids,
            index,
            vectors: self.vectors.select(Axis(0), &rows),
        }
    }
}

fn float_column(table: &Table, name: &str) -> Result<Vec<Option<f32>>, StoreError> {
    match table.column(name)? {
        Column::Float32(values) => Ok(values.clone()),
        #[allow(clippy::cast_possible_truncation)]
        _ => Ok(table
            .f64_values(name)?
            .into_iter()
            .map(|v| v.map(|x| x as f32))
            .collect()),
    }
}

/// Fails unless every frame shares one embedding dimension.
///
/// # Errors
/// [`PipelineError::SchemaMismatch`] naming the first disagreeing frame.
pub fn ensure_same_dim<'a>(
    frames: impl IntoIterator<Item = &'a EmbeddingFrame>,
) -> Result<usize, PipelineError> {
    let mut expected: Option<(usize, &str)> = None;
    for frame in frames {
        match expected {
            None => expected = Some((frame.dim(), frame.name())),
            Some((dim, first)) if dim != frame.dim() => {
                return Err(PipelineError::schema(
                    frame.name(),
                    format!("embedding dim {} != {dim} of {first}", frame.dim()),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(expected.map_or(0, |(dim, _)| dim))
}
