//! Populations: relative mass over the entities of one timepoint.

use std::sync::Arc;

use ndarray::Array1;

use crate::error::{Result, TransportError};
use crate::timepoint::Timepoint;

/// A (possibly unnormalized) distribution over every entity present at `time`.
///
/// Weights are aligned 1:1 with `entity_ids`, which is the model's full entity
/// list for that timepoint; entities outside a selection simply carry zero.
/// Populations are never edited in place: propagation yields a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct Population {
    time: Timepoint,
    entity_ids: Arc<[String]>,
    weights: Array1<f64>,
}

impl Population {
    /// Build a population, rejecting misaligned, negative or non-finite weights.
    pub fn new(time: Timepoint, entity_ids: Arc<[String]>, weights: Array1<f64>) -> Result<Self> {
        if weights.len() != entity_ids.len() {
            return Err(TransportError::InvalidWeights(format!(
                "{} weights for {} entities",
                weights.len(),
                entity_ids.len()
            )));
        }
        if let Some(bad) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
            return Err(TransportError::InvalidWeights(format!(
                "weight {} is negative or non-finite",
                bad
            )));
        }
        Ok(Self {
            time,
            entity_ids,
            weights,
        })
    }

    /// Construction for weights already known to be valid (propagation output).
    pub(crate) fn from_parts(time: Timepoint, entity_ids: Arc<[String]>, weights: Array1<f64>) -> Self {
        debug_assert_eq!(weights.len(), entity_ids.len());
        Self {
            time,
            entity_ids,
            weights,
        }
    }

    #[inline]
    pub fn time(&self) -> Timepoint {
        self.time
    }

    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    pub(crate) fn shared_ids(&self) -> &Arc<[String]> {
        &self.entity_ids
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total_mass(&self) -> f64 {
        self.weights.sum()
    }

    /// Copy with weights scaled to sum to one; `None` if there is no mass.
    pub fn normalized(&self) -> Option<Population> {
        let total = self.total_mass();
        if total > 0.0 {
            Some(Population::from_parts(
                self.time,
                self.entity_ids.clone(),
                &self.weights / total,
            ))
        } else {
            None
        }
    }

    /// Weights scaled so the largest is one.
    ///
    /// If the largest weight is at or below `epsilon` the weights are returned
    /// unchanged, since rescaling near-zero mass only amplifies noise.
    pub fn relative_intensities(&self, epsilon: f64) -> Array1<f64> {
        let max = self.weights.iter().copied().fold(0.0_f64, f64::max);
        if max <= epsilon {
            self.weights.clone()
        } else {
            &self.weights / max
        }
    }

    /// `(entity_id, weight)` pairs with non-zero weight.
    pub fn support(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entity_ids
            .iter()
            .zip(self.weights.iter())
            .filter(|&(_, &w)| w > 0.0)
            .map(|(id, &w)| (id.as_str(), w))
    }
}

/// The shared time of a batch, or an `Alignment` error naming the first mismatch.
///
/// Returns `Ok(None)` for an empty batch.
pub fn unique_timepoint(populations: &[Population]) -> Result<Option<Timepoint>> {
    let Some(first) = populations.first() else {
        return Ok(None);
    };
    let expected = first.time();
    for p in &populations[1..] {
        if p.time() != expected {
            return Err(TransportError::Alignment {
                expected,
                found: p.time(),
            });
        }
    }
    Ok(Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_rejects_misaligned_weights() {
        let err = Population::new(Timepoint::new(0.0), ids(&["a", "b"]), array![1.0]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidWeights(_)));
    }

    #[test]
    fn test_rejects_negative_weights() {
        let err = Population::new(Timepoint::new(0.0), ids(&["a", "b"]), array![1.0, -1.0]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidWeights(_)));
    }

    #[test]
    fn test_normalized() {
        let p = Population::new(Timepoint::new(0.0), ids(&["a", "b"]), array![1.0, 3.0]).unwrap();
        let n = p.normalized().unwrap();
        assert_eq!(n.weights(), &array![0.25, 0.75]);

        let zero = Population::new(Timepoint::new(0.0), ids(&["a", "b"]), array![0.0, 0.0]).unwrap();
        assert!(zero.normalized().is_none());
    }

    #[test]
    fn test_relative_intensities() {
        let p = Population::new(Timepoint::new(0.0), ids(&["a", "b"]), array![0.2, 0.4]).unwrap();
        assert_eq!(p.relative_intensities(1e-12), array![0.5, 1.0]);

        let tiny = Population::new(Timepoint::new(0.0), ids(&["a", "b"]), array![1e-15, 0.0]).unwrap();
        assert_eq!(tiny.relative_intensities(1e-12), array![1e-15, 0.0]);
    }

    #[test]
    fn test_support_skips_zeros() {
        let p = Population::new(Timepoint::new(0.0), ids(&["a", "b", "c"]), array![0.0, 2.0, 1.0]).unwrap();
        let support: Vec<_> = p.support().collect();
        assert_eq!(support, vec![("b", 2.0), ("c", 1.0)]);
    }

    #[test]
    fn test_unique_timepoint() {
        let a = Population::new(Timepoint::new(1.0), ids(&["a"]), array![1.0]).unwrap();
        let b = Population::new(Timepoint::new(2.0), ids(&["b"]), array![1.0]).unwrap();

        assert_eq!(unique_timepoint(&[]).unwrap(), None);
        assert_eq!(unique_timepoint(&[a.clone(), a.clone()]).unwrap(), Some(Timepoint::new(1.0)));
        assert!(matches!(
            unique_timepoint(&[a, b]),
            Err(TransportError::Alignment { .. })
        ));
    }
}
