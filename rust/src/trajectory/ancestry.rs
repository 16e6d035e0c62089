//! Ancestry intensity tables.
//!
//! Follows one population along the chain and records, at every timepoint
//! visited, how strongly each entity there is related to it. The result is a
//! fresh table suitable for plotting lineage on an embedding; no model data
//! is modified.

use ndarray::{Array1, Axis};
use tracing::debug;

use super::aggregator::TrajectoryConfig;
use crate::error::Result;
use crate::matrix::LabeledMatrix;
use crate::tmap::{Population, TransportMapModel};

/// Name of the single value column of an ancestry table.
pub const INTENSITY_COLUMN: &str = "intensity";
/// Row metadata column holding each entity's timepoint.
pub const TIME_COLUMN: &str = "time";

/// Relative intensity of every entity reached from `population`.
///
/// One row per entity at each visited timepoint, blocks in ascending time
/// order. Intensities are scaled so the strongest entity of each timepoint
/// is 1, unless that maximum is at or below `config.mass_epsilon`. Walking
/// stops at the end of the chain or once no mass is left.
///
/// # Arguments
/// * `model` - Transport-map model to walk
/// * `population` - Starting population
/// * `config` - Direction and epsilon; extinction policy is not consulted
pub fn ancestry_table(
    model: &TransportMapModel,
    population: &Population,
    config: &TrajectoryConfig,
) -> Result<LabeledMatrix> {
    let direction = config.direction;
    let mut blocks: Vec<(Population, Array1<f64>)> = Vec::new();
    let mut current = population.clone();

    loop {
        let intensities = current.relative_intensities(config.mass_epsilon);
        let time = current.time();
        let has_mass = current.total_mass() > 0.0;
        blocks.push((current.clone(), intensities));

        if !has_mass {
            debug!(%time, "population has no mass left, stopping ancestry walk");
            break;
        }
        if model.next_map(time, direction).is_none() {
            break;
        }
        let mut next = model.step(std::slice::from_ref(&current), direction)?;
        current = match next.pop() {
            Some(p) => p.normalized().unwrap_or(p),
            None => break,
        };
    }

    blocks.sort_by_key(|(p, _)| p.time());

    let n_rows: usize = blocks.iter().map(|(p, _)| p.len()).sum();
    let mut row_ids = Vec::with_capacity(n_rows);
    let mut times = Vec::with_capacity(n_rows);
    let mut values = Vec::with_capacity(n_rows);
    for (p, intensities) in &blocks {
        row_ids.extend(p.entity_ids().iter().cloned());
        times.extend(std::iter::repeat(p.time().value()).take(p.len()));
        values.extend(intensities.iter().copied());
    }

    let x = Array1::from(values).insert_axis(Axis(1));
    LabeledMatrix::new(x, row_ids, vec![INTENSITY_COLUMN.to_string()])?.with_row_meta(TIME_COLUMN, times)
}
