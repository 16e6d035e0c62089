//! Trajectory aggregation over the transport-map chain.
//!
//! Populations are advanced in lock-step, one timepoint per step, and the
//! weighted mean/variance of every feature is recorded at each timepoint
//! visited. The run ends when no further map exists in the chosen direction.
//! Output is always in ascending time order, one trajectory per population.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::timepoint::{Direction, Timepoint};
use crate::tmap::{unique_timepoint, FeatureStats, Population, TransportMapModel};

/// What to do when a population's mass is extinguished mid-run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtinctionPolicy {
    /// Abort the run with `EmptyPopulation`.
    Fail,
    /// Stop recording that population; the rest of the batch continues.
    Truncate,
}

/// Configuration for trajectory aggregation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Ancestors (`Backward`) or descendants (`Forward`). Default: Backward
    pub direction: Direction,
    /// Rescale each population to unit mass after every step. Default: true
    pub renormalize: bool,
    /// Total mass at or below this is treated as extinct. Default: 1e-12
    pub mass_epsilon: f64,
    /// Default: Fail
    pub on_extinct: ExtinctionPolicy,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Backward,
            renormalize: true,
            mass_epsilon: 1e-12,
            on_extinct: ExtinctionPolicy::Fail,
        }
    }
}

/// Per-timepoint feature statistics of one population.
///
/// `means` and `variances` are `(timepoints × features)`, rows ascending in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub label: Option<String>,
    pub feature_ids: Arc<[String]>,
    pub timepoints: Vec<Timepoint>,
    pub means: Array2<f64>,
    pub variances: Array2<f64>,
}

impl Trajectory {
    /// Assemble a trajectory from precomputed tables, checking shapes.
    pub fn new(
        label: Option<String>,
        feature_ids: Vec<String>,
        timepoints: Vec<Timepoint>,
        means: Array2<f64>,
        variances: Array2<f64>,
    ) -> Result<Self> {
        let expected = (timepoints.len(), feature_ids.len());
        if means.dim() != expected || variances.dim() != expected {
            return Err(TransportError::DimensionMismatch(format!(
                "means {:?} and variances {:?} for {} timepoints and {} features",
                means.dim(),
                variances.dim(),
                expected.0,
                expected.1
            )));
        }
        Ok(Self {
            label,
            feature_ids: feature_ids.into(),
            timepoints,
            means,
            variances,
        })
    }

    fn from_records(feature_ids: Arc<[String]>, records: &[FeatureStats]) -> Self {
        let shape = (records.len(), feature_ids.len());
        let mut means = Array2::<f64>::zeros(shape);
        let mut variances = Array2::<f64>::zeros(shape);
        for (k, stats) in records.iter().enumerate() {
            means.row_mut(k).assign(&stats.mean);
            variances.row_mut(k).assign(&stats.variance);
        }
        Self {
            label: None,
            feature_ids,
            timepoints: records.iter().map(|s| s.time).collect(),
            means,
            variances,
        }
    }

    pub fn len(&self) -> usize {
        self.timepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timepoints.is_empty()
    }

    pub fn mean_at(&self, time: Timepoint) -> Option<ArrayView1<'_, f64>> {
        let k = self.timepoints.iter().position(|&t| t == time)?;
        Some(self.means.row(k))
    }

    pub fn variance_at(&self, time: Timepoint) -> Option<ArrayView1<'_, f64>> {
        let k = self.timepoints.iter().position(|&t| t == time)?;
        Some(self.variances.row(k))
    }
}

/// Drives repeated propagation of a population batch over one model.
#[derive(Clone, Debug)]
pub struct TrajectoryAggregator<'a> {
    model: &'a TransportMapModel,
    config: TrajectoryConfig,
}

impl<'a> TrajectoryAggregator<'a> {
    pub fn new(model: &'a TransportMapModel, config: TrajectoryConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &TrajectoryConfig {
        &self.config
    }

    /// Run one batch to the end of the chain.
    ///
    /// All populations must share a timepoint. Returns one trajectory per
    /// input population, in input order.
    pub fn run(&self, populations: &[Population]) -> Result<Vec<Trajectory>> {
        let start = unique_timepoint(populations)?.ok_or(TransportError::NoPopulations)?;
        let direction = self.config.direction;
        let n = populations.len();

        let mut current = populations.to_vec();
        let mut active = vec![true; n];
        let mut records: Vec<Vec<FeatureStats>> = vec![Vec::new(); n];

        self.screen(&mut current, &mut active)?;
        let mut steps = 0usize;
        loop {
            self.record(&current, &active, &mut records)?;

            let time = current[0].time();
            if self.model.next_map(time, direction).is_none() || !active.contains(&true) {
                break;
            }
            current = self.model.step(&current, direction)?;
            steps += 1;
            self.screen(&mut current, &mut active)?;
            debug!(
                from = %time,
                to = %current[0].time(),
                active = active.iter().filter(|&&a| a).count(),
                "propagated populations"
            );
        }

        info!(%start, %direction, steps, populations = n, "trajectory aggregation finished");

        let feature_ids: Arc<[String]> = self.model.feature_ids().to_vec().into();
        Ok(records
            .iter_mut()
            .map(|rec| {
                if direction == Direction::Backward {
                    rec.reverse();
                }
                Trajectory::from_records(feature_ids.clone(), rec)
            })
            .collect())
    }

    /// Run independent batches on the rayon pool.
    ///
    /// Each batch succeeds or fails on its own; results keep batch order.
    pub fn run_batches(&self, batches: &[Vec<Population>]) -> Vec<Result<Vec<Trajectory>>> {
        batches.par_iter().map(|batch| self.run(batch)).collect()
    }

    /// Apply the extinction policy and optional renormalisation.
    fn screen(&self, populations: &mut [Population], active: &mut [bool]) -> Result<()> {
        let epsilon = self.config.mass_epsilon.max(0.0);
        for (index, p) in populations.iter_mut().enumerate() {
            if !active[index] {
                continue;
            }
            let total = p.total_mass();
            if total <= epsilon {
                match self.config.on_extinct {
                    ExtinctionPolicy::Fail => {
                        return Err(TransportError::EmptyPopulation {
                            index,
                            time: p.time(),
                        })
                    }
                    ExtinctionPolicy::Truncate => {
                        warn!(index, time = %p.time(), total, "population extinct, truncating trajectory");
                        active[index] = false;
                    }
                }
            } else if self.config.renormalize {
                if let Some(normalized) = p.normalized() {
                    *p = normalized;
                }
            }
        }
        Ok(())
    }

    fn record(
        &self,
        populations: &[Population],
        active: &[bool],
        records: &mut [Vec<FeatureStats>],
    ) -> Result<()> {
        let indices: Vec<usize> = (0..populations.len()).filter(|&i| active[i]).collect();
        if indices.is_empty() {
            return Ok(());
        }

        let stats = if indices.len() == populations.len() {
            self.model.population_mean_and_variance(populations)
        } else {
            let subset: Vec<Population> = indices.iter().map(|&i| populations[i].clone()).collect();
            self.model.population_mean_and_variance(&subset)
        };
        let stats = stats.map_err(|e| match e {
            TransportError::EmptyPopulation { index, time } => TransportError::EmptyPopulation {
                index: indices[index],
                time,
            },
            other => other,
        })?;

        for (i, s) in indices.into_iter().zip(stats) {
            records[i].push(s);
        }
        Ok(())
    }
}

/// Ancestor trajectories with the default configuration.
pub fn compute_trajectories(model: &TransportMapModel, populations: &[Population]) -> Result<Vec<Trajectory>> {
    TrajectoryAggregator::new(model, TrajectoryConfig::default()).run(populations)
}

/// Aggregate several independent batches in parallel, one result per batch.
pub fn compute_trajectories_for_sets(
    model: &TransportMapModel,
    batches: &[Vec<Population>],
    config: TrajectoryConfig,
) -> Vec<Result<Vec<Trajectory>>> {
    TrajectoryAggregator::new(model, config).run_batches(batches)
}

/// Seed one population per named set at `at_time` and aggregate them together.
///
/// Sets with no entity present at `at_time` are dropped along with their
/// labels. Fails with `EmptySelection` when no set remains.
pub fn trajectory_trends<S: AsRef<str>>(
    model: &TransportMapModel,
    sets: &[(String, Vec<S>)],
    at_time: Timepoint,
    config: TrajectoryConfig,
) -> Result<Vec<Trajectory>> {
    let id_lists: Vec<Vec<&str>> = sets
        .iter()
        .map(|(_, ids)| ids.iter().map(|id| id.as_ref()).collect())
        .collect();
    let seeded = model.population_from_ids(&id_lists, at_time)?;

    let mut labels = Vec::with_capacity(sets.len());
    let mut populations = Vec::with_capacity(sets.len());
    for ((name, _), population) in sets.iter().zip(seeded) {
        match population {
            Some(p) => {
                labels.push(name.clone());
                populations.push(p);
            }
            None => debug!(set = %name, time = %at_time, "no entities at query time, skipping set"),
        }
    }

    if populations.is_empty() {
        return Err(TransportError::EmptySelection { time: at_time });
    }

    let trajectories = TrajectoryAggregator::new(model, config).run(&populations)?;
    Ok(trajectories
        .into_iter()
        .zip(labels)
        .map(|(mut trajectory, label)| {
            trajectory.label = Some(label);
            trajectory
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::LabeledMatrix;
    use crate::sparse::CsrMatrix;
    use crate::tmap::{MapWeights, ModelConfig, TransportMap};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn t(v: f64) -> Timepoint {
        Timepoint::new(v)
    }

    fn chain_model() -> TransportMapModel {
        let features = LabeledMatrix::new(
            array![[1.0], [2.0], [3.0], [4.0], [10.0], [20.0]],
            ids(&["x0", "y0", "x1", "y1", "a", "b"]),
            ids(&["gene"]),
        )
        .unwrap()
        .with_row_meta("day", vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0])
        .unwrap();

        let m01 = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["x0", "y0"]),
            ids(&["x1", "y1"]),
            MapWeights::Dense(array![[1.0, 0.0], [0.0, 1.0]]),
        )
        .unwrap();
        let m12 = TransportMap::new(
            t(1.0),
            t(2.0),
            ids(&["x1", "y1"]),
            ids(&["a", "b"]),
            MapWeights::Sparse(CsrMatrix::from_coo(2, 2, vec![(0, 0, 0.5), (1, 0, 0.5), (1, 1, 1.0)])),
        )
        .unwrap();

        TransportMapModel::new(features, vec![m01, m12], &ModelConfig::default()).unwrap()
    }

    /// `y0` has no descendants.
    fn dead_end_model() -> TransportMapModel {
        let features = LabeledMatrix::new(
            array![[1.0], [2.0], [3.0], [4.0]],
            ids(&["x0", "y0", "x1", "y1"]),
            ids(&["gene"]),
        )
        .unwrap();
        let m01 = TransportMap::new(
            t(0.0),
            t(1.0),
            ids(&["x0", "y0"]),
            ids(&["x1", "y1"]),
            MapWeights::Dense(array![[1.0, 0.0], [0.0, 0.0]]),
        )
        .unwrap();
        TransportMapModel::from_parts(features, &[t(0.0), t(0.0), t(1.0), t(1.0)], vec![m01]).unwrap()
    }

    #[test]
    fn test_backward_trajectory_is_ascending() {
        let model = chain_model();
        let p = model.population(t(2.0), array![1.0, 0.0]).unwrap();

        let out = compute_trajectories(&model, &[p]).unwrap();
        assert_eq!(out.len(), 1);
        let tr = &out[0];
        assert_eq!(tr.timepoints, vec![t(0.0), t(1.0), t(2.0)]);
        assert_eq!(tr.means.dim(), (3, 1));
        assert_abs_diff_eq!(tr.means[[0, 0]], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tr.means[[1, 0]], 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tr.means[[2, 0]], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tr.variances[[0, 0]], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(tr.variances[[2, 0]], 0.0, epsilon = 1e-12);
        assert!(tr.label.is_none());
    }

    #[test]
    fn test_forward_trajectory() {
        let model = chain_model();
        let p = model.population(t(0.0), array![1.0, 0.0]).unwrap();
        let config = TrajectoryConfig {
            direction: Direction::Forward,
            ..Default::default()
        };

        let out = TrajectoryAggregator::new(&model, config).run(&[p]).unwrap();
        let tr = &out[0];
        assert_eq!(tr.timepoints, vec![t(0.0), t(1.0), t(2.0)]);
        assert_abs_diff_eq!(tr.mean_at(t(1.0)).unwrap()[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tr.mean_at(t(2.0)).unwrap()[0], 10.0, epsilon = 1e-12);
        assert!(tr.mean_at(t(7.0)).is_none());
    }

    #[test]
    fn test_start_without_map_gives_single_point() {
        let model = chain_model();
        let p = model.population(t(0.0), array![1.0, 1.0]).unwrap();

        let out = compute_trajectories(&model, &[p]).unwrap();
        assert_eq!(out[0].len(), 1);
        assert_abs_diff_eq!(out[0].means[[0, 0]], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_batch() {
        let model = chain_model();
        assert_eq!(compute_trajectories(&model, &[]), Err(TransportError::NoPopulations));
    }

    #[test]
    fn test_extinction_fails_by_default() {
        let model = dead_end_model();
        let p = model.population(t(0.0), array![0.0, 1.0]).unwrap();
        let config = TrajectoryConfig {
            direction: Direction::Forward,
            ..Default::default()
        };

        let err = TrajectoryAggregator::new(&model, config).run(&[p]).unwrap_err();
        assert_eq!(err, TransportError::EmptyPopulation { index: 0, time: t(1.0) });
    }

    #[test]
    fn test_extinction_truncates_one_population() {
        let model = dead_end_model();
        let alive = model.population(t(0.0), array![1.0, 0.0]).unwrap();
        let doomed = model.population(t(0.0), array![0.0, 1.0]).unwrap();
        let config = TrajectoryConfig {
            direction: Direction::Forward,
            on_extinct: ExtinctionPolicy::Truncate,
            ..Default::default()
        };

        let out = TrajectoryAggregator::new(&model, config).run(&[alive, doomed]).unwrap();
        assert_eq!(out[0].timepoints, vec![t(0.0), t(1.0)]);
        assert_eq!(out[1].timepoints, vec![t(0.0)]);
        assert_abs_diff_eq!(out[1].means[[0, 0]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_trajectory_trends_drops_absent_sets() {
        let model = chain_model();
        let sets = vec![
            ("early".to_string(), vec!["a"]),
            ("ghost".to_string(), vec!["nobody"]),
            ("late".to_string(), vec!["b"]),
        ];

        let out = trajectory_trends(&model, &sets, t(2.0), TrajectoryConfig::default()).unwrap();
        let labels: Vec<_> = out.iter().map(|tr| tr.label.as_deref().unwrap()).collect();
        assert_eq!(labels, vec!["early", "late"]);
        assert_abs_diff_eq!(out[1].means[[0, 0]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[1].means[[2, 0]], 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_trajectory_trends_all_absent() {
        let model = chain_model();
        let sets = vec![("ghost".to_string(), vec!["nobody"])];
        let err = trajectory_trends(&model, &sets, t(2.0), TrajectoryConfig::default()).unwrap_err();
        assert_eq!(err, TransportError::EmptySelection { time: t(2.0) });
    }

    #[test]
    fn test_run_batches_independent() {
        let model = chain_model();
        let ok = vec![model.population(t(2.0), array![1.0, 0.0]).unwrap()];
        let results = compute_trajectories_for_sets(&model, &[ok, vec![]], TrajectoryConfig::default());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap()[0].len(), 3);
        assert_eq!(results[1], Err(TransportError::NoPopulations));
    }

    #[test]
    fn test_trajectory_new_checks_shape() {
        let err = Trajectory::new(
            None,
            ids(&["g1", "g2"]),
            vec![t(0.0)],
            Array2::zeros((1, 2)),
            Array2::zeros((2, 2)),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::DimensionMismatch(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = TrajectoryConfig::default();
        assert_eq!(config.direction, Direction::Backward);
        assert!(config.renormalize);
        assert_eq!(config.on_extinct, ExtinctionPolicy::Fail);
    }
}
