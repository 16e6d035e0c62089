//! Local enrichment: per-feature scores comparing trajectory statistics.
//!
//! Two comparisons are supported. Between two trajectories, timepoints are
//! paired by position and each list is named after the first trajectory's
//! timepoint. Within one trajectory, each timepoint is compared to the one
//! before it, earlier first, and the list is named `"{t_prev}_{t}"`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use super::aggregator::Trajectory;
use crate::error::{Result, TransportError};

/// Score applied feature-wise to a pair of (mean, variance) statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreFunction {
    /// `(m1 - m2) / (sqrt(v1) + sqrt(v2))`, zero when both variances are zero.
    #[serde(rename = "s2n")]
    SignalToNoise,
    #[serde(rename = "mean_difference")]
    MeanDifference,
    /// `m1 / m2` with IEEE semantics (a zero `m2` gives inf or NaN).
    #[serde(rename = "fold_change")]
    FoldChange,
}

impl ScoreFunction {
    pub fn name(self) -> &'static str {
        match self {
            ScoreFunction::SignalToNoise => "s2n",
            ScoreFunction::MeanDifference => "mean_difference",
            ScoreFunction::FoldChange => "fold_change",
        }
    }

    #[inline]
    pub fn score(self, m1: f64, m2: f64, v1: f64, v2: f64) -> f64 {
        match self {
            ScoreFunction::SignalToNoise => {
                let denom = v1.sqrt() + v2.sqrt();
                if denom == 0.0 {
                    0.0
                } else {
                    (m1 - m2) / denom
                }
            }
            ScoreFunction::MeanDifference => m1 - m2,
            ScoreFunction::FoldChange => m1 / m2,
        }
    }

    /// Score every feature of two aligned statistic rows.
    pub fn score_rows(
        self,
        m1: ArrayView1<'_, f64>,
        m2: ArrayView1<'_, f64>,
        v1: ArrayView1<'_, f64>,
        v2: ArrayView1<'_, f64>,
    ) -> Array1<f64> {
        Zip::from(&m1)
            .and(&m2)
            .and(&v1)
            .and(&v2)
            .map_collect(|&a, &b, &va, &vb| self.score(a, b, va, vb))
    }
}

impl FromStr for ScoreFunction {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s2n" => Ok(ScoreFunction::SignalToNoise),
            "mean_difference" => Ok(ScoreFunction::MeanDifference),
            "fold_change" => Ok(ScoreFunction::FoldChange),
            other => Err(TransportError::UnknownScore(other.to_string())),
        }
    }
}

impl fmt::Display for ScoreFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scores for every feature at one comparison point.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedList {
    pub name: String,
    pub feature_ids: Vec<String>,
    pub scores: Array1<f64>,
}

impl RankedList {
    /// `(feature, score)` pairs by descending score. NaN sorts last.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut pairs: Vec<(&str, f64)> = self
            .feature_ids
            .iter()
            .map(String::as_str)
            .zip(self.scores.iter().copied())
            .collect();
        pairs.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b.1.total_cmp(&a.1),
        });
        pairs
    }
}

/// Compare two trajectories timepoint by timepoint.
///
/// Both must cover the same number of timepoints and features.
pub fn score_between(a: &Trajectory, b: &Trajectory, score: ScoreFunction) -> Result<Vec<RankedList>> {
    if a.len() != b.len() {
        return Err(TransportError::DimensionMismatch(format!(
            "trajectories cover {} and {} timepoints",
            a.len(),
            b.len()
        )));
    }
    if a.feature_ids.len() != b.feature_ids.len() {
        return Err(TransportError::DimensionMismatch(format!(
            "trajectories have {} and {} features",
            a.feature_ids.len(),
            b.feature_ids.len()
        )));
    }

    Ok((0..a.len())
        .map(|k| RankedList {
            name: a.timepoints[k].to_string(),
            feature_ids: a.feature_ids.to_vec(),
            scores: score.score_rows(
                a.means.row(k),
                b.means.row(k),
                a.variances.row(k),
                b.variances.row(k),
            ),
        })
        .collect())
}

/// Compare each timepoint of one trajectory with the one before it.
///
/// The earlier timepoint is the first operand, so `mean_difference` on
/// list `"{t_prev}_{t}"` is `mean[t_prev] - mean[t]`.
pub fn score_consecutive(trajectory: &Trajectory, score: ScoreFunction) -> Vec<RankedList> {
    (1..trajectory.len())
        .map(|k| RankedList {
            name: format!("{}_{}", trajectory.timepoints[k - 1], trajectory.timepoints[k]),
            feature_ids: trajectory.feature_ids.to_vec(),
            scores: score.score_rows(
                trajectory.means.row(k - 1),
                trajectory.means.row(k),
                trajectory.variances.row(k - 1),
                trajectory.variances.row(k),
            ),
        })
        .collect()
}

/// Rank features by local enrichment.
///
/// With `other` present the two trajectories are compared position by
/// position; otherwise consecutive timepoints of `trajectory` are compared.
pub fn local_enrichment(
    trajectory: &Trajectory,
    other: Option<&Trajectory>,
    score: ScoreFunction,
) -> Result<Vec<RankedList>> {
    match other {
        Some(other) => score_between(trajectory, other, score),
        None => Ok(score_consecutive(trajectory, score)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timepoint::Timepoint;
    use ndarray::array;

    fn trajectory(means: ndarray::Array2<f64>, variances: ndarray::Array2<f64>) -> Trajectory {
        let n_t = means.nrows();
        Trajectory::new(
            None,
            vec!["g1".to_string(), "g2".to_string()],
            (0..n_t).map(|k| Timepoint::new(k as f64)).collect(),
            means,
            variances,
        )
        .unwrap()
    }

    #[test]
    fn test_score_functions() {
        assert!((ScoreFunction::SignalToNoise.score(3.0, 1.0, 1.0, 1.0) - 1.0).abs() < 1e-12);
        assert_eq!(ScoreFunction::SignalToNoise.score(3.0, 1.0, 0.0, 0.0), 0.0);
        assert_eq!(ScoreFunction::MeanDifference.score(3.0, 1.0, 9.0, 9.0), 2.0);
        assert_eq!(ScoreFunction::FoldChange.score(3.0, 1.5, 0.0, 0.0), 2.0);
        assert!(ScoreFunction::FoldChange.score(1.0, 0.0, 0.0, 0.0).is_infinite());
    }

    #[test]
    fn test_parse_score_names() {
        assert_eq!("s2n".parse::<ScoreFunction>().unwrap(), ScoreFunction::SignalToNoise);
        assert_eq!("fold_change".parse::<ScoreFunction>().unwrap(), ScoreFunction::FoldChange);
        assert_eq!(
            "t_test".parse::<ScoreFunction>(),
            Err(TransportError::UnknownScore("t_test".to_string()))
        );
        assert_eq!(ScoreFunction::MeanDifference.to_string(), "mean_difference");
    }

    #[test]
    fn test_score_between_pairs_by_index() {
        let a = trajectory(array![[2.0, 1.0], [5.0, 0.0]], array![[1.0, 1.0], [0.0, 0.0]]);
        let b = trajectory(array![[1.0, 1.0], [1.0, 3.0]], array![[1.0, 1.0], [0.0, 0.0]]);

        let lists = score_between(&a, &b, ScoreFunction::MeanDifference).unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].name, "0");
        assert_eq!(lists[1].name, "1");
        assert_eq!(lists[1].scores, array![4.0, -3.0]);

        let s2n = score_between(&a, &b, ScoreFunction::SignalToNoise).unwrap();
        assert_eq!(s2n[0].scores, array![0.5, 0.0]);
    }

    #[test]
    fn test_score_between_rejects_length_mismatch() {
        let a = trajectory(array![[2.0, 1.0], [5.0, 0.0]], array![[1.0, 1.0], [0.0, 0.0]]);
        let b = trajectory(array![[1.0, 1.0]], array![[1.0, 1.0]]);
        assert!(matches!(
            score_between(&a, &b, ScoreFunction::MeanDifference),
            Err(TransportError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_score_consecutive() {
        let a = trajectory(
            array![[1.0, 4.0], [2.0, 2.0], [6.0, 2.0]],
            array![[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]],
        );

        let lists = local_enrichment(&a, None, ScoreFunction::FoldChange).unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].name, "0_1");
        assert_eq!(lists[1].name, "1_2");
        assert_eq!(lists[0].scores, array![0.5, 2.0]);
        assert_eq!(lists[1].scores, array![1.0 / 3.0, 1.0]);

        let steps = trajectory(array![[1.0, 0.0], [4.0, 0.0]], array![[0.0, 0.0], [0.0, 0.0]]);
        let diff = local_enrichment(&steps, None, ScoreFunction::MeanDifference).unwrap();
        assert_eq!(diff[0].name, "0_1");
        assert_eq!(diff[0].scores, array![-3.0, 0.0]);
    }

    #[test]
    fn test_ranked_descending() {
        let list = RankedList {
            name: "0".to_string(),
            feature_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            scores: array![0.5, f64::NAN, 2.0, -1.0],
        };
        let ranked: Vec<&str> = list.ranked().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ranked, vec!["c", "a", "d", "b"]);
    }
}
