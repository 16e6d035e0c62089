//! Transport-map model: the map chain plus the feature matrix it indexes.
//!
//! The model is read-only after construction. Every query takes populations
//! by reference and returns fresh values, so independent callers can share
//! one model across threads without locking.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::Excluded;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::population::{unique_timepoint, Population};
use super::transport_map::TransportMap;
use crate::error::{Result, TransportError};
use crate::matrix::LabeledMatrix;
use crate::timepoint::{Direction, Timepoint};

/// Configuration for reading a model from a labeled feature matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Row metadata column holding each entity's timepoint.
    pub time_column: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            time_column: "day".to_string(),
        }
    }
}

/// Weighted mean and variance of every feature under one population.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureStats {
    pub time: Timepoint,
    pub mean: Array1<f64>,
    pub variance: Array1<f64>,
}

/// Entities present at one timepoint.
#[derive(Clone, Debug)]
struct TimeSlice {
    /// Row of each entity in the feature matrix.
    rows: Vec<usize>,
    ids: Arc<[String]>,
    position: HashMap<String, usize>,
}

impl TimeSlice {
    /// Weights of `population` must be laid out over exactly these entities, in this order.
    fn check_layout(&self, population: &Population) -> Result<()> {
        if Arc::ptr_eq(population.shared_ids(), &self.ids) || population.entity_ids() == &self.ids[..] {
            return Ok(());
        }
        Err(TransportError::InvalidWeights(format!(
            "population at time {} is laid out over {} entities that do not match the model's {} in order",
            population.time(),
            population.len(),
            self.ids.len()
        )))
    }
}

/// Ordered chain of transport maps over a timepoint-partitioned feature matrix.
#[derive(Clone, Debug)]
pub struct TransportMapModel {
    features: LabeledMatrix,
    slices: BTreeMap<Timepoint, TimeSlice>,
    maps: Vec<TransportMap>,
    /// Map index keyed by source time.
    by_src: HashMap<Timepoint, usize>,
    /// Map index keyed by destination time.
    by_dst: HashMap<Timepoint, usize>,
}

impl TransportMapModel {
    /// Build a model whose timepoints come from a row metadata column.
    pub fn new(features: LabeledMatrix, maps: Vec<TransportMap>, config: &ModelConfig) -> Result<Self> {
        let days = features.numeric_row_meta(&config.time_column)?;
        let days: Vec<Timepoint> = days.into_iter().map(Timepoint::new).collect();
        Self::from_parts(features, &days, maps)
    }

    /// Build a model from a feature matrix, one timepoint per row, and the maps.
    ///
    /// Maps whose identifiers are a permutation of the entities at their
    /// timepoints are reordered to match the feature matrix.
    pub fn from_parts(features: LabeledMatrix, days: &[Timepoint], maps: Vec<TransportMap>) -> Result<Self> {
        if days.len() != features.n_rows() {
            return Err(TransportError::DimensionMismatch(format!(
                "{} timepoints for {} entities",
                days.len(),
                features.n_rows()
            )));
        }

        let mut grouped: BTreeMap<Timepoint, Vec<usize>> = BTreeMap::new();
        for (row, (&day, id)) in days.iter().zip(features.row_ids()).enumerate() {
            if !day.is_finite() {
                return Err(TransportError::InvalidTimepoint {
                    entity: id.clone(),
                    value: day.to_string(),
                });
            }
            grouped.entry(day).or_default().push(row);
        }

        let mut slices = BTreeMap::new();
        for (time, rows) in grouped {
            let ids: Vec<String> = rows.iter().map(|&r| features.row_ids()[r].clone()).collect();
            let mut position = HashMap::with_capacity(ids.len());
            for (i, id) in ids.iter().enumerate() {
                if position.insert(id.clone(), i).is_some() {
                    return Err(TransportError::DuplicateEntity { id: id.clone(), time });
                }
            }
            slices.insert(
                time,
                TimeSlice {
                    rows,
                    ids: ids.into(),
                    position,
                },
            );
        }

        let mut aligned = Vec::with_capacity(maps.len());
        let mut by_src = HashMap::new();
        let mut by_dst = HashMap::new();
        for map in maps {
            let (t_src, t_dst) = (map.t_src(), map.t_dst());
            let (src, dst) = match (slices.get(&t_src), slices.get(&t_dst)) {
                (Some(src), Some(dst)) => (src, dst),
                _ => {
                    return Err(TransportError::malformed(
                        t_src,
                        t_dst,
                        "timepoint not present in the feature matrix",
                    ))
                }
            };

            let map = map.aligned_to(&src.ids, &dst.ids)?;
            let index = aligned.len();
            if by_src.insert(t_src, index).is_some() {
                return Err(TransportError::malformed(t_src, t_dst, "more than one map leaves the source time"));
            }
            if by_dst.insert(t_dst, index).is_some() {
                return Err(TransportError::malformed(t_src, t_dst, "more than one map reaches the destination time"));
            }

            if slices.range((Excluded(t_src), Excluded(t_dst))).next().is_some() {
                warn!(%t_src, %t_dst, "transport map skips over an observed timepoint");
            }
            let dead_ends = map.row_sums().iter().filter(|&&s| s == 0.0).count();
            if dead_ends > 0 {
                debug!(%t_src, %t_dst, dead_ends, "source entities with no outgoing mass");
            }
            aligned.push(map);
        }

        info!(
            entities = features.n_rows(),
            features = features.n_cols(),
            timepoints = slices.len(),
            maps = aligned.len(),
            "transport map model loaded"
        );

        Ok(Self {
            features,
            slices,
            maps: aligned,
            by_src,
            by_dst,
        })
    }

    /// Build a model from maps alone, with no features.
    ///
    /// Entity sets are taken from the maps; statistics queries then return
    /// zero-length vectors. Useful when only lineage is of interest.
    pub fn from_maps(maps: Vec<TransportMap>) -> Result<Self> {
        let mut entities: BTreeMap<Timepoint, &[String]> = BTreeMap::new();
        for map in &maps {
            entities.entry(map.t_src()).or_insert(map.src_ids());
            entities.entry(map.t_dst()).or_insert(map.dst_ids());
        }

        let mut row_ids = Vec::new();
        let mut days = Vec::new();
        for (&time, ids) in &entities {
            row_ids.extend(ids.iter().cloned());
            days.extend(std::iter::repeat(time).take(ids.len()));
        }

        let features = LabeledMatrix::new(Array2::zeros((row_ids.len(), 0)), row_ids, Vec::new())?;
        Self::from_parts(features, &days, maps)
    }

    /// All timepoints present in the data, ascending.
    pub fn timepoints(&self) -> Vec<Timepoint> {
        self.slices.keys().copied().collect()
    }

    pub fn features(&self) -> &LabeledMatrix {
        &self.features
    }

    pub fn feature_ids(&self) -> &[String] {
        self.features.col_ids()
    }

    pub fn maps(&self) -> &[TransportMap] {
        &self.maps
    }

    /// Identifiers of the entities present at `time`.
    pub fn entity_ids(&self, time: Timepoint) -> Result<&[String]> {
        Ok(&self.slice(time)?.ids)
    }

    /// Identifiers a population's weights are aligned to.
    pub fn cell_ids<'a>(&self, population: &'a Population) -> &'a [String] {
        population.entity_ids()
    }

    fn slice(&self, time: Timepoint) -> Result<&TimeSlice> {
        self.slices.get(&time).ok_or(TransportError::UnknownTimepoint(time))
    }

    /// Population over every entity at `time` with the given weights.
    pub fn population(&self, time: Timepoint, weights: Array1<f64>) -> Result<Population> {
        let slice = self.slice(time)?;
        Population::new(time, slice.ids.clone(), weights)
    }

    /// One uniform population per identifier list, restricted to the entities at `at_time`.
    ///
    /// A list with no entity present at `at_time` yields `None` in its position
    /// rather than failing the batch.
    pub fn population_from_ids<S: AsRef<str>>(
        &self,
        id_lists: &[Vec<S>],
        at_time: Timepoint,
    ) -> Result<Vec<Option<Population>>> {
        let slice = self.slice(at_time)?;
        Ok(id_lists
            .iter()
            .map(|ids| {
                let mut weights = Array1::<f64>::zeros(slice.ids.len());
                let mut hits = 0usize;
                for id in ids {
                    let id: &str = id.as_ref();
                    if let Some(&i) = slice.position.get(id) {
                        if weights[i] == 0.0 {
                            hits += 1;
                        }
                        weights[i] = 1.0;
                    }
                }
                if hits == 0 {
                    return None;
                }
                weights /= hits as f64;
                Some(Population::from_parts(at_time, slice.ids.clone(), weights))
            })
            .collect())
    }

    /// Like [`population_from_ids`](Self::population_from_ids) with caller-supplied weights.
    ///
    /// Identifiers absent at `at_time` are dropped; repeated identifiers
    /// accumulate. A list whose retained mass is zero yields `None`.
    pub fn population_from_weighted_ids<S: AsRef<str>>(
        &self,
        weighted_lists: &[Vec<(S, f64)>],
        at_time: Timepoint,
    ) -> Result<Vec<Option<Population>>> {
        let slice = self.slice(at_time)?;
        weighted_lists
            .iter()
            .map(|entries| {
                let mut weights = Array1::<f64>::zeros(slice.ids.len());
                for (id, w) in entries {
                    let (id, w): (&str, f64) = (id.as_ref(), *w);
                    if !(w.is_finite() && w >= 0.0) {
                        return Err(TransportError::InvalidWeights(format!(
                            "weight {} for '{}' is negative or non-finite",
                            w, id
                        )));
                    }
                    if let Some(&i) = slice.position.get(id) {
                        weights[i] += w;
                    }
                }
                if weights.sum() > 0.0 {
                    Population::new(at_time, slice.ids.clone(), weights).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }

    /// Whether every population can take one more backward step.
    ///
    /// Misaligned or empty batches report `false`; call
    /// [`pull_back`](Self::pull_back) to get the error.
    pub fn can_pull_back(&self, populations: &[Population]) -> bool {
        self.can_step(populations, Direction::Backward)
    }

    /// Whether every population can take one more forward step.
    pub fn can_push_forward(&self, populations: &[Population]) -> bool {
        self.can_step(populations, Direction::Forward)
    }

    /// Propagate every population to the preceding timepoint.
    pub fn pull_back(&self, populations: &[Population]) -> Result<Vec<Population>> {
        self.step(populations, Direction::Backward)
    }

    /// Propagate every population to the following timepoint.
    pub fn push_forward(&self, populations: &[Population]) -> Result<Vec<Population>> {
        self.step(populations, Direction::Forward)
    }

    /// Map that a population at `time` would cross travelling in `direction`.
    pub fn next_map(&self, time: Timepoint, direction: Direction) -> Option<&TransportMap> {
        let index = match direction {
            Direction::Backward => self.by_dst.get(&time),
            Direction::Forward => self.by_src.get(&time),
        };
        index.map(|&i| &self.maps[i])
    }

    fn can_step(&self, populations: &[Population], direction: Direction) -> bool {
        match unique_timepoint(populations) {
            Ok(Some(time)) => self.next_map(time, direction).is_some(),
            _ => false,
        }
    }

    /// One propagation step, without renormalisation.
    pub fn step(&self, populations: &[Population], direction: Direction) -> Result<Vec<Population>> {
        let Some(time) = unique_timepoint(populations)? else {
            return Ok(Vec::new());
        };
        let map = self
            .next_map(time, direction)
            .ok_or(TransportError::NoTransportMap { time, direction })?;

        let new_time = match direction {
            Direction::Backward => map.t_src(),
            Direction::Forward => map.t_dst(),
        };
        let slice = self.slice(time)?;
        let new_ids = self.slice(new_time)?.ids.clone();

        populations
            .iter()
            .map(|p| {
                slice.check_layout(p)?;
                let weights = match direction {
                    Direction::Backward => map.pull(p.weights().view())?,
                    Direction::Forward => map.push(p.weights().view())?,
                };
                Ok(Population::from_parts(new_time, new_ids.clone(), weights))
            })
            .collect()
    }

    /// Weighted mean and variance of every feature, one result per population.
    ///
    /// `mean = Σ w·x / Σ w` and `var = Σ w·(x - mean)² / Σ w`. A population
    /// with zero total mass is an `EmptyPopulation` error, never NaN.
    pub fn population_mean_and_variance(&self, populations: &[Population]) -> Result<Vec<FeatureStats>> {
        let Some(time) = unique_timepoint(populations)? else {
            return Ok(Vec::new());
        };
        let slice = self.slice(time)?;
        let x = self.features.x().select(Axis(0), &slice.rows);

        populations
            .par_iter()
            .enumerate()
            .map(|(index, p)| {
                slice.check_layout(p)?;
                let w = p.weights();
                let total = w.sum();
                if !(total > 0.0) {
                    return Err(TransportError::EmptyPopulation { index, time });
                }

                let mean = w.dot(&x) / total;
                // two-pass: E[x²] - mean² loses precision for large feature values
                let mut variance = Array1::<f64>::zeros(x.ncols());
                for (row, &wi) in x.outer_iter().zip(w.iter()) {
                    if wi > 0.0 {
                        Zip::from(&mut variance)
                            .and(&row)
                            .and(&mean)
                            .for_each(|acc, &value, &m| {
                                let d = value - m;
                                *acc += wi * d * d;
                            });
                    }
                }
                variance /= total;
                Ok(FeatureStats { time, mean, variance })
            })
            .collect()
    }
}
