//! Transport-map chain and the populations propagated through it.
//!
//! This module provides:
//! - TransportMap: non-negative transition weights between two timepoints
//! - Population: relative mass over the entities of one timepoint
//! - TransportMapModel: the map chain plus the feature matrix, with
//!   pull-back, push-forward and weighted mean/variance queries

pub mod transport_map;
pub mod population;
pub mod model;

pub use transport_map::{parse_tmap_name, MapWeights, TransportMap};
pub use population::{unique_timepoint, Population};
pub use model::{FeatureStats, ModelConfig, TransportMapModel};
