//! Lineage propagation over chains of optimal-transport maps.
//!
//! A [`TransportMapModel`] holds a feature matrix partitioned by timepoint and
//! the transport maps linking consecutive timepoints. Populations (weight
//! vectors over the entities of one timepoint) are pulled back to their
//! ancestors or pushed forward to their descendants, and the weighted mean and
//! variance of each feature is tracked along the way.
//!
//! ```
//! use ndarray::array;
//! use wot_rust::{compute_trajectories, MapWeights, Timepoint, TransportMap, TransportMapModel};
//!
//! let t0 = Timepoint::new(0.0);
//! let t1 = Timepoint::new(1.0);
//! let map = TransportMap::new(
//!     t0,
//!     t1,
//!     vec!["a".into(), "b".into()],
//!     vec!["c".into()],
//!     MapWeights::Dense(array![[1.0], [3.0]]),
//! )?;
//! let model = TransportMapModel::from_maps(vec![map])?;
//! let start = model.population(t1, array![1.0])?;
//! let trajectories = compute_trajectories(&model, &[start])?;
//! assert_eq!(trajectories[0].timepoints, vec![t0, t1]);
//! # Ok::<(), wot_rust::TransportError>(())
//! ```

pub mod error;
pub mod matrix;
pub mod sparse;
pub mod timepoint;
pub mod tmap;
pub mod trajectory;

#[cfg(feature = "python")]
mod python;

pub use error::{Result, TransportError};
pub use matrix::{LabeledMatrix, MetaValue, Metadata};
pub use sparse::CsrMatrix;
pub use timepoint::{Direction, Timepoint};
pub use tmap::{
    parse_tmap_name, unique_timepoint, FeatureStats, MapWeights, ModelConfig, Population, TransportMap,
    TransportMapModel,
};
pub use trajectory::{
    ancestry_table, compute_trajectories, compute_trajectories_for_sets, local_enrichment, score_between,
    score_consecutive, trajectory_trends, ExtinctionPolicy, RankedList, ScoreFunction, Trajectory,
    TrajectoryAggregator, TrajectoryConfig,
};
