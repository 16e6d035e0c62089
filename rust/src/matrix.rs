//! Labeled numeric matrices.
//!
//! A `LabeledMatrix` is the container passed between every other component:
//! a dense `Array2<f64>` with row and column identifiers and any number of
//! named metadata columns attached to rows or columns.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// One metadata cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Number(f64),
    Text(String),
}

impl MetaValue {
    /// Numeric view of the value. Text is parsed, so `"7"` and `7.0` agree.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(v) => Some(*v),
            MetaValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Number(v)
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

/// Named metadata columns, each aligned to the rows (or columns) of a matrix.
pub type Metadata = BTreeMap<String, Vec<MetaValue>>;

/// Numeric matrix with row/column identifiers and metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledMatrix {
    x: Array2<f64>,
    row_ids: Vec<String>,
    col_ids: Vec<String>,
    row_meta: Metadata,
    col_meta: Metadata,
}

impl LabeledMatrix {
    /// Build a matrix, checking that the labels match its shape.
    pub fn new(x: Array2<f64>, row_ids: Vec<String>, col_ids: Vec<String>) -> Result<Self> {
        let (rows, cols) = x.dim();
        if row_ids.len() != rows {
            return Err(TransportError::DimensionMismatch(format!(
                "{} row ids for {} rows",
                row_ids.len(),
                rows
            )));
        }
        if col_ids.len() != cols {
            return Err(TransportError::DimensionMismatch(format!(
                "{} column ids for {} columns",
                col_ids.len(),
                cols
            )));
        }
        Ok(Self {
            x,
            row_ids,
            col_ids,
            row_meta: Metadata::new(),
            col_meta: Metadata::new(),
        })
    }

    /// Return a copy of this matrix with an extra (or replaced) row metadata column.
    pub fn with_row_meta<V: Into<MetaValue>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let values: Vec<MetaValue> = values.into_iter().map(Into::into).collect();
        if values.len() != self.n_rows() {
            return Err(TransportError::DimensionMismatch(format!(
                "row metadata '{}' has {} values for {} rows",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        self.row_meta.insert(name.to_string(), values);
        Ok(self)
    }

    /// Return a copy of this matrix with an extra (or replaced) column metadata column.
    pub fn with_col_meta<V: Into<MetaValue>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let values: Vec<MetaValue> = values.into_iter().map(Into::into).collect();
        if values.len() != self.n_cols() {
            return Err(TransportError::DimensionMismatch(format!(
                "column metadata '{}' has {} values for {} columns",
                name,
                values.len(),
                self.n_cols()
            )));
        }
        self.col_meta.insert(name.to_string(), values);
        Ok(self)
    }

    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    pub fn col_ids(&self) -> &[String] {
        &self.col_ids
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.x.ncols()
    }

    pub fn row_meta(&self, name: &str) -> Option<&[MetaValue]> {
        self.row_meta.get(name).map(|v| v.as_slice())
    }

    pub fn col_meta(&self, name: &str) -> Option<&[MetaValue]> {
        self.col_meta.get(name).map(|v| v.as_slice())
    }

    pub fn row_metadata(&self) -> &Metadata {
        &self.row_meta
    }

    pub fn col_metadata(&self) -> &Metadata {
        &self.col_meta
    }

    /// Read a row metadata column as finite numbers.
    pub fn numeric_row_meta(&self, name: &str) -> Result<Vec<f64>> {
        let column = self
            .row_meta(name)
            .ok_or_else(|| TransportError::MissingMetadata(name.to_string()))?;

        column
            .iter()
            .zip(self.row_ids.iter())
            .map(|(value, id)| match value.as_f64() {
                Some(v) if v.is_finite() => Ok(v),
                _ => Err(TransportError::InvalidTimepoint {
                    entity: id.clone(),
                    value: format!("{:?}", value),
                }),
            })
            .collect()
    }

    /// New matrix holding the given rows, in the given order, with their metadata.
    ///
    /// # Panics
    /// Panics if an index is out of bounds.
    pub fn select_rows(&self, indices: &[usize]) -> LabeledMatrix {
        let row_meta = self
            .row_meta
            .iter()
            .map(|(k, v)| (k.clone(), indices.iter().map(|&i| v[i].clone()).collect()))
            .collect();

        LabeledMatrix {
            x: self.x.select(Axis(0), indices),
            row_ids: indices.iter().map(|&i| self.row_ids[i].clone()).collect(),
            col_ids: self.col_ids.clone(),
            row_meta,
            col_meta: self.col_meta.clone(),
        }
    }
}
