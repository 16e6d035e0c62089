//! Compressed sparse row storage for transport maps.
//!
//! Transport maps between large timepoints are mostly zeros, so the model
//! accepts them in CSR form as well as dense. Only the operations the
//! propagation step needs are provided: `A·x`, `Aᵀ·x`, and reindexing.

/// Compressed Sparse Row matrix of `f64`.
///
/// Row `i` spans `row_ptr[i]..row_ptr[i + 1]` in `col_indices`/`values`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub row_ptr: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
    pub rows: usize,
    pub cols: usize,
}

impl CsrMatrix {
    /// Build from COO triplets. Entries are sorted by (row, col); duplicate
    /// positions are kept as separate entries and therefore sum under `spmv`.
    ///
    /// Out-of-range indices are reported by [`CsrMatrix::validate`], not here.
    pub fn from_coo(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Self {
        let mut sorted: Vec<_> = entries.into_iter().collect();
        sorted.sort_unstable_by_key(|(r, c, _)| (*r, *c));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_indices = Vec::with_capacity(sorted.len());
        let mut values = Vec::with_capacity(sorted.len());

        for &(r, _, _) in &sorted {
            if r < rows {
                row_ptr[r + 1] += 1;
            }
        }
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }
        for (r, c, v) in sorted {
            if r < rows {
                col_indices.push(c);
                values.push(v);
            } else {
                // keeps the structure inconsistent so validate() reports it
                col_indices.push(usize::MAX);
                values.push(v);
            }
        }

        Self {
            row_ptr,
            col_indices,
            values,
            rows,
            cols,
        }
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate over `(col_index, value)` pairs of one row.
    #[inline]
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_indices[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// Check structural integrity. Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.row_ptr.len() != self.rows + 1 {
            return Err(format!(
                "row_ptr length {} does not equal rows + 1 = {}",
                self.row_ptr.len(),
                self.rows + 1
            ));
        }
        if self.row_ptr[0] != 0 {
            return Err(format!("row_ptr[0] = {} (expected 0)", self.row_ptr[0]));
        }
        for i in 1..self.row_ptr.len() {
            if self.row_ptr[i] < self.row_ptr[i - 1] {
                return Err(format!("row_ptr decreases at position {}", i));
            }
        }
        if self.row_ptr[self.rows] != self.nnz() || self.col_indices.len() != self.nnz() {
            return Err(format!(
                "{} values and {} column indices for row_ptr[rows] = {}",
                self.nnz(),
                self.col_indices.len(),
                self.row_ptr[self.rows]
            ));
        }
        for row in 0..self.rows {
            for (col, _) in self.row_entries(row) {
                if col >= self.cols {
                    return Err(format!(
                        "column index out of bounds for {} columns (row {})",
                        self.cols, row
                    ));
                }
            }
        }
        Ok(())
    }

    /// `y = A·x`
    pub fn spmv(&self, x: &[f64], y: &mut [f64]) {
        debug_assert!(x.len() >= self.cols);
        debug_assert!(y.len() >= self.rows);

        for (i, out) in y.iter_mut().enumerate().take(self.rows) {
            *out = self.row_entries(i).map(|(c, v)| v * x[c]).sum();
        }
    }

    /// `y = Aᵀ·x`, scattering each row into `y` without building the transpose.
    pub fn spmv_transpose(&self, x: &[f64], y: &mut [f64]) {
        debug_assert!(x.len() >= self.rows);
        debug_assert!(y.len() >= self.cols);

        y.iter_mut().take(self.cols).for_each(|v| *v = 0.0);
        for (i, &xi) in x.iter().enumerate().take(self.rows) {
            if xi == 0.0 {
                continue;
            }
            for (c, v) in self.row_entries(i) {
                y[c] += v * xi;
            }
        }
    }

    /// Per-row sums.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.rows).map(|i| self.row_entries(i).map(|(_, v)| v).sum()).collect()
    }

    /// Reindex rows and columns: entry `(r, c)` moves to `(row_map[r], col_map[c])`.
    pub fn reindexed(&self, row_map: &[usize], col_map: &[usize]) -> CsrMatrix {
        let triplets = (0..self.rows).flat_map(|r| {
            self.row_entries(r)
                .map(move |(c, v)| (row_map[r], col_map[c], v))
        });
        CsrMatrix::from_coo(self.rows, self.cols, triplets)
    }
}
