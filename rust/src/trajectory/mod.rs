//! Trajectory-level analyses built on a [`TransportMapModel`](crate::tmap::TransportMapModel).
//!
//! Modules:
//! - `aggregator`: per-timepoint feature statistics along the map chain
//! - `ancestry`: per-entity lineage intensities
//! - `enrichment`: feature ranking between trajectory statistics

pub mod aggregator;
pub mod ancestry;
pub mod enrichment;

pub use aggregator::{
    compute_trajectories, compute_trajectories_for_sets, trajectory_trends, ExtinctionPolicy,
    Trajectory, TrajectoryAggregator, TrajectoryConfig,
};
pub use ancestry::ancestry_table;
pub use enrichment::{local_enrichment, score_between, score_consecutive, RankedList, ScoreFunction};
