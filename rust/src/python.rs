//! Python bindings over NumPy arrays.

use std::collections::BTreeMap;

use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;

use crate::error::TransportError;
use crate::matrix::LabeledMatrix;
use crate::timepoint::{Direction, Timepoint};
use crate::tmap::{MapWeights, TransportMap, TransportMapModel};
use crate::trajectory::{self, ScoreFunction, Trajectory, TrajectoryConfig};

fn to_py_err(e: TransportError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_direction(direction: &str) -> PyResult<Direction> {
    match direction {
        "backward" => Ok(Direction::Backward),
        "forward" => Ok(Direction::Forward),
        other => Err(PyValueError::new_err(format!(
            "direction must be 'backward' or 'forward', got '{}'",
            other
        ))),
    }
}

/// Assemble a model; each map's rows and columns follow the order of
/// `cell_ids` restricted to its source and destination day.
fn build_model(
    features: PyReadonlyArray2<'_, f64>,
    cell_ids: Vec<String>,
    feature_ids: Vec<String>,
    days: PyReadonlyArray1<'_, f64>,
    tmaps: Vec<(f64, f64, PyReadonlyArray2<'_, f64>)>,
) -> Result<TransportMapModel, TransportError> {
    let days: Vec<Timepoint> = days.as_array().iter().map(|&d| Timepoint::new(d)).collect();
    let mut ids_by_day: BTreeMap<Timepoint, Vec<String>> = BTreeMap::new();
    for (&day, id) in days.iter().zip(&cell_ids) {
        ids_by_day.entry(day).or_default().push(id.clone());
    }

    let mut maps = Vec::with_capacity(tmaps.len());
    for (t_src, t_dst, weights) in tmaps {
        let (t_src, t_dst) = (Timepoint::new(t_src), Timepoint::new(t_dst));
        let src = ids_by_day.get(&t_src).ok_or(TransportError::UnknownTimepoint(t_src))?;
        let dst = ids_by_day.get(&t_dst).ok_or(TransportError::UnknownTimepoint(t_dst))?;
        maps.push(TransportMap::new(
            t_src,
            t_dst,
            src.clone(),
            dst.clone(),
            MapWeights::Dense(weights.as_array().to_owned()),
        )?);
    }

    let features = LabeledMatrix::new(features.as_array().to_owned(), cell_ids, feature_ids)?;
    TransportMapModel::from_parts(features, &days, maps)
}

fn trajectory_to_dict<'py>(py: Python<'py>, trajectory: Trajectory) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    let times: Vec<f64> = trajectory.timepoints.iter().map(|t| t.value()).collect();
    dict.set_item("timepoints", PyArray1::from_vec(py, times))?;
    dict.set_item("means", PyArray2::from_owned_array(py, trajectory.means))?;
    dict.set_item("variances", PyArray2::from_owned_array(py, trajectory.variances))?;
    Ok(dict)
}

/// Compute feature trajectories for named cell sets.
///
/// # Arguments
/// * `features` - (n_cells, n_features) feature matrix
/// * `cell_ids` - Identifier of each row of `features`
/// * `feature_ids` - Identifier of each column of `features`
/// * `days` - Timepoint of each row of `features`
/// * `tmaps` - List of (t_src, t_dst, matrix) with rows/columns in `cell_ids` order
/// * `cell_sets` - Dict of set name -> list of cell ids
/// * `at_time` - Timepoint the sets are seeded at
/// * `direction` - "backward" (ancestors) or "forward" (descendants)
///
/// # Returns
/// * Dict of set name -> {"timepoints", "means", "variances"}; empty sets are omitted
#[pyfunction]
#[pyo3(signature = (features, cell_ids, feature_ids, days, tmaps, cell_sets, at_time, direction="backward"))]
#[allow(clippy::too_many_arguments)]
fn compute_trajectories<'py>(
    py: Python<'py>,
    features: PyReadonlyArray2<'py, f64>,
    cell_ids: Vec<String>,
    feature_ids: Vec<String>,
    days: PyReadonlyArray1<'py, f64>,
    tmaps: Vec<(f64, f64, PyReadonlyArray2<'py, f64>)>,
    cell_sets: &PyDict,
    at_time: f64,
    direction: &str,
) -> PyResult<&'py PyDict> {
    let config = TrajectoryConfig {
        direction: parse_direction(direction)?,
        ..Default::default()
    };
    let sets: Vec<(String, Vec<String>)> = cell_sets
        .iter()
        .map(|(k, v)| Ok((k.extract::<String>()?, v.extract::<Vec<String>>()?)))
        .collect::<PyResult<_>>()?;

    let model = build_model(features, cell_ids, feature_ids, days, tmaps).map_err(to_py_err)?;
    let trajectories =
        trajectory::trajectory_trends(&model, &sets, Timepoint::new(at_time), config).map_err(to_py_err)?;

    let result = PyDict::new(py);
    for tr in trajectories {
        let label = tr.label.clone().unwrap_or_default();
        result.set_item(label, trajectory_to_dict(py, tr)?)?;
    }
    Ok(result)
}

/// Rank features by local enrichment.
///
/// # Arguments
/// * `timepoints` - Timepoint of each row of `means`
/// * `feature_ids` - Identifier of each column of `means`
/// * `means`, `variances` - (n_timepoints, n_features) trajectory statistics
/// * `other_means`, `other_variances` - Optional second trajectory to compare against;
///   when absent, consecutive timepoints are compared
/// * `score` - "s2n", "mean_difference" or "fold_change"
///
/// # Returns
/// * List of (name, scores) in timepoint order
#[pyfunction]
#[pyo3(signature = (timepoints, feature_ids, means, variances, other_means=None, other_variances=None, score="s2n"))]
#[allow(clippy::too_many_arguments)]
fn local_enrichment<'py>(
    py: Python<'py>,
    timepoints: Vec<f64>,
    feature_ids: Vec<String>,
    means: PyReadonlyArray2<'py, f64>,
    variances: PyReadonlyArray2<'py, f64>,
    other_means: Option<PyReadonlyArray2<'py, f64>>,
    other_variances: Option<PyReadonlyArray2<'py, f64>>,
    score: &str,
) -> PyResult<Vec<(String, &'py PyArray1<f64>)>> {
    let score: ScoreFunction = score.parse().map_err(to_py_err)?;
    let times: Vec<Timepoint> = timepoints.into_iter().map(Timepoint::new).collect();

    let first = Trajectory::new(
        None,
        feature_ids.clone(),
        times.clone(),
        means.as_array().to_owned(),
        variances.as_array().to_owned(),
    )
    .map_err(to_py_err)?;

    let second = match (other_means, other_variances) {
        (Some(m), Some(v)) => Some(
            Trajectory::new(None, feature_ids, times, m.as_array().to_owned(), v.as_array().to_owned())
                .map_err(to_py_err)?,
        ),
        (None, None) => None,
        _ => {
            return Err(PyValueError::new_err(
                "other_means and other_variances must be given together",
            ))
        }
    };

    let lists = trajectory::local_enrichment(&first, second.as_ref(), score).map_err(to_py_err)?;
    Ok(lists
        .into_iter()
        .map(|list| (list.name, PyArray1::from_owned_array(py, list.scores)))
        .collect())
}

/// Python module definition
#[pymodule]
fn wot_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(compute_trajectories, m)?)?;
    m.add_function(wrap_pyfunction!(local_enrichment, m)?)?;
    Ok(())
}
