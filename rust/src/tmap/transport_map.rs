//! A single transport map between two timepoints.
//!
//! `weights[src, dst]` is the mass sent from source entity `src` at `t_src`
//! to destination entity `dst` at `t_dst`. Entries are non-negative; rows need
//! not sum to one.

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Result, TransportError};
use crate::matrix::LabeledMatrix;
use crate::sparse::CsrMatrix;
use crate::timepoint::Timepoint;

/// Storage for transport-map weights.
#[derive(Clone, Debug, PartialEq)]
pub enum MapWeights {
    Dense(Array2<f64>),
    Sparse(CsrMatrix),
}

impl MapWeights {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            MapWeights::Dense(w) => w.dim(),
            MapWeights::Sparse(w) => (w.rows, w.cols),
        }
    }

    fn values(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            MapWeights::Dense(w) => Box::new(w.iter().copied()),
            MapWeights::Sparse(w) => Box::new(w.values.iter().copied()),
        }
    }
}

/// Immutable transition weights between the entities of two timepoints.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportMap {
    t_src: Timepoint,
    t_dst: Timepoint,
    src_ids: Vec<String>,
    dst_ids: Vec<String>,
    weights: MapWeights,
}

impl TransportMap {
    /// Build a map, validating shape against the identifier lists and
    /// rejecting negative or non-finite weights.
    pub fn new(
        t_src: Timepoint,
        t_dst: Timepoint,
        src_ids: Vec<String>,
        dst_ids: Vec<String>,
        weights: MapWeights,
    ) -> Result<Self> {
        if t_src >= t_dst {
            return Err(TransportError::malformed(
                t_src,
                t_dst,
                "source time must precede destination time",
            ));
        }

        let (rows, cols) = weights.shape();
        if rows != src_ids.len() || cols != dst_ids.len() {
            return Err(TransportError::malformed(
                t_src,
                t_dst,
                format!(
                    "weights are {}x{} but there are {} source and {} destination entities",
                    rows,
                    cols,
                    src_ids.len(),
                    dst_ids.len()
                ),
            ));
        }

        if let MapWeights::Sparse(w) = &weights {
            w.validate()
                .map_err(|detail| TransportError::malformed(t_src, t_dst, detail))?;
        }

        if let Some(bad) = weights.values().find(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(TransportError::malformed(
                t_src,
                t_dst,
                format!("weight {} is negative or non-finite", bad),
            ));
        }

        Ok(Self {
            t_src,
            t_dst,
            src_ids,
            dst_ids,
            weights,
        })
    }

    /// Dense map from a labeled matrix: rows are source entities, columns destination entities.
    pub fn from_labeled(t_src: Timepoint, t_dst: Timepoint, matrix: &LabeledMatrix) -> Result<Self> {
        Self::new(
            t_src,
            t_dst,
            matrix.row_ids().to_vec(),
            matrix.col_ids().to_vec(),
            MapWeights::Dense(matrix.x().to_owned()),
        )
    }

    #[inline]
    pub fn t_src(&self) -> Timepoint {
        self.t_src
    }

    #[inline]
    pub fn t_dst(&self) -> Timepoint {
        self.t_dst
    }

    pub fn src_ids(&self) -> &[String] {
        &self.src_ids
    }

    pub fn dst_ids(&self) -> &[String] {
        &self.dst_ids
    }

    pub fn weights(&self) -> &MapWeights {
        &self.weights
    }

    /// Backward step: `new[src] = Σ_dst w[src, dst] · p[dst]`.
    ///
    /// `p` must have one weight per destination entity.
    pub fn pull(&self, p: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        self.check_len(p.len(), self.dst_ids.len(), "destination")?;
        Ok(match &self.weights {
            MapWeights::Dense(w) => w.dot(&p),
            MapWeights::Sparse(w) => {
                let x = p.to_vec();
                let mut y = vec![0.0; w.rows];
                w.spmv(&x, &mut y);
                Array1::from(y)
            }
        })
    }

    /// Forward step: `new[dst] = Σ_src w[src, dst] · p[src]`.
    ///
    /// `p` must have one weight per source entity.
    pub fn push(&self, p: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        self.check_len(p.len(), self.src_ids.len(), "source")?;
        Ok(match &self.weights {
            MapWeights::Dense(w) => w.t().dot(&p),
            MapWeights::Sparse(w) => {
                let x = p.to_vec();
                let mut y = vec![0.0; w.cols];
                w.spmv_transpose(&x, &mut y);
                Array1::from(y)
            }
        })
    }

    fn check_len(&self, found: usize, expected: usize, side: &str) -> Result<()> {
        if found != expected {
            return Err(TransportError::InvalidWeights(format!(
                "{} weights for a map with {} {} entities ({} -> {})",
                found, expected, side, self.t_src, self.t_dst
            )));
        }
        Ok(())
    }

    /// Mass leaving each source entity.
    pub fn row_sums(&self) -> Vec<f64> {
        match &self.weights {
            MapWeights::Dense(w) => w.rows().into_iter().map(|r| r.sum()).collect(),
            MapWeights::Sparse(w) => w.row_sums(),
        }
    }

    /// Reorder rows and columns to match the given entity orderings.
    ///
    /// The identifiers must be permutations of this map's own; anything else
    /// means the map was computed for different entities.
    pub fn aligned_to(&self, src_ids: &[String], dst_ids: &[String]) -> Result<TransportMap> {
        if self.src_ids == src_ids && self.dst_ids == dst_ids {
            return Ok(self.clone());
        }

        let row_map = self.permutation(&self.src_ids, src_ids, "source")?;
        let col_map = self.permutation(&self.dst_ids, dst_ids, "destination")?;

        let weights = match &self.weights {
            MapWeights::Dense(w) => {
                let mut out = Array2::<f64>::zeros(w.dim());
                for ((r, c), &v) in w.indexed_iter() {
                    out[[row_map[r], col_map[c]]] = v;
                }
                MapWeights::Dense(out)
            }
            MapWeights::Sparse(w) => MapWeights::Sparse(w.reindexed(&row_map, &col_map)),
        };

        Ok(TransportMap {
            t_src: self.t_src,
            t_dst: self.t_dst,
            src_ids: src_ids.to_vec(),
            dst_ids: dst_ids.to_vec(),
            weights,
        })
    }

    /// `map[i]` is the position in `target` of `own[i]`.
    fn permutation(&self, own: &[String], target: &[String], side: &str) -> Result<Vec<usize>> {
        if own.len() != target.len() {
            return Err(TransportError::malformed(
                self.t_src,
                self.t_dst,
                format!(
                    "map has {} {} entities but the data has {}",
                    own.len(),
                    side,
                    target.len()
                ),
            ));
        }

        let position: HashMap<&str, usize> = target
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut seen = vec![false; target.len()];
        own.iter()
            .map(|id| match position.get(id.as_str()) {
                Some(&i) if !seen[i] => {
                    seen[i] = true;
                    Ok(i)
                }
                _ => Err(TransportError::malformed(
                    self.t_src,
                    self.t_dst,
                    format!("{} entity '{}' is not present exactly once in the data", side, id),
                )),
            })
            .collect()
    }
}

/// Parse a transport-map file stem of the form `{prefix}_{t_src}_{t_dst}`.
///
/// ```
/// use wot_rust::tmap::parse_tmap_name;
/// let (a, b) = parse_tmap_name("tmaps_2.5_3", "tmaps").unwrap();
/// assert_eq!((a.value(), b.value()), (2.5, 3.0));
/// ```
pub fn parse_tmap_name(stem: &str, prefix: &str) -> Option<(Timepoint, Timepoint)> {
    let rest = stem.strip_prefix(prefix)?.strip_prefix('_')?;
    let (src, dst) = rest.split_once('_')?;
    let t_src: f64 = src.parse().ok()?;
    let t_dst: f64 = dst.parse().ok()?;
    if !(t_src.is_finite() && t_dst.is_finite()) {
        return None;
    }
    Some((Timepoint::new(t_src), Timepoint::new(t_dst)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn t(v: f64) -> Timepoint {
        Timepoint::new(v)
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["a", "b"]),
            ids(&["c"]),
            MapWeights::Dense(array![[1.0, 0.0], [0.0, 1.0]]),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::MalformedMap { .. }));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let err = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["a"]),
            ids(&["c", "d"]),
            MapWeights::Dense(array![[1.0, -0.1]]),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::MalformedMap { .. }));

        let err = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["a"]),
            ids(&["c", "d"]),
            MapWeights::Sparse(CsrMatrix::from_coo(1, 2, vec![(0, 1, f64::NAN)])),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::MalformedMap { .. }));
    }

    #[test]
    fn test_time_order_required() {
        let err = TransportMap::new(
            t(2.0),
            t(1.0),
            ids(&["a"]),
            ids(&["b"]),
            MapWeights::Dense(array![[1.0]]),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::MalformedMap { .. }));
    }

    #[test]
    fn test_pull_and_push_dense_match_sparse() {
        let dense = array![[0.5, 0.5], [0.0, 1.0]];
        let sparse = CsrMatrix::from_coo(2, 2, vec![(0, 0, 0.5), (0, 1, 0.5), (1, 1, 1.0)]);
        let d = TransportMap::new(t(1.0), t(2.0), ids(&["a", "b"]), ids(&["c", "d"]), MapWeights::Dense(dense)).unwrap();
        let s = TransportMap::new(t(1.0), t(2.0), ids(&["a", "b"]), ids(&["c", "d"]), MapWeights::Sparse(sparse)).unwrap();

        let p = array![1.0, 0.0];
        assert_eq!(d.pull(p.view()).unwrap(), array![0.5, 0.0]);
        assert_eq!(s.pull(p.view()).unwrap(), array![0.5, 0.0]);
        assert_eq!(d.push(p.view()).unwrap(), array![0.5, 0.5]);
        assert_eq!(s.push(p.view()).unwrap(), array![0.5, 0.5]);
    }

    #[test]
    fn test_pull_and_push_reject_wrong_length() {
        let sparse = CsrMatrix::from_coo(2, 3, vec![(0, 2, 1.0), (1, 0, 1.0)]);
        let m = TransportMap::new(t(0.0), t(1.0), ids(&["a", "b"]), ids(&["c", "d", "e"]), MapWeights::Sparse(sparse))
            .unwrap();

        let short = array![1.0];
        assert!(matches!(m.pull(short.view()), Err(TransportError::InvalidWeights(_))));
        assert!(matches!(m.push(short.view()), Err(TransportError::InvalidWeights(_))));

        let three = array![1.0, 0.0, 0.0];
        assert!(matches!(m.push(three.view()), Err(TransportError::InvalidWeights(_))));
        assert_eq!(m.pull(three.view()).unwrap(), array![0.0, 1.0]);
    }

    #[test]
    fn test_aligned_to_permutes() {
        let m = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["b", "a"]),
            ids(&["c", "d"]),
            MapWeights::Dense(array![[1.0, 0.0], [0.0, 2.0]]),
        )
        .unwrap();

        let aligned = m.aligned_to(&ids(&["a", "b"]), &ids(&["d", "c"])).unwrap();
        assert_eq!(aligned.weights(), &MapWeights::Dense(array![[2.0, 0.0], [0.0, 1.0]]));
        assert_eq!(aligned.src_ids(), &ids(&["a", "b"])[..]);
    }

    #[test]
    fn test_aligned_to_rejects_foreign_ids() {
        let m = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["a", "b"]),
            ids(&["c"]),
            MapWeights::Dense(array![[1.0], [1.0]]),
        )
        .unwrap();

        assert!(m.aligned_to(&ids(&["a", "z"]), &ids(&["c"])).is_err());
        assert!(m.aligned_to(&ids(&["a"]), &ids(&["c"])).is_err());
    }

    #[test]
    fn test_parse_tmap_name() {
        assert_eq!(parse_tmap_name("tmaps_0_1", "tmaps"), Some((t(0.0), t(1.0))));
        assert_eq!(parse_tmap_name("serum_7.5_8", "serum"), Some((t(7.5), t(8.0))));
        assert_eq!(parse_tmap_name("tmaps_0", "tmaps"), None);
        assert_eq!(parse_tmap_name("other_0_1", "tmaps"), None);
        assert_eq!(parse_tmap_name("tmaps_x_1", "tmaps"), None);
    }
}
