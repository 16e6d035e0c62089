//! Timepoint labels and propagation direction.
//!
//! Time labels are numeric (e.g. days elapsed). `f64` is not `Ord`, so the
//! label is wrapped and compared with `total_cmp`; `-0.0` is folded into
//! `0.0` so equal labels always hash equally.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A totally ordered time label.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timepoint(f64);

impl Timepoint {
    pub fn new(value: f64) -> Self {
        // folds -0.0 into 0.0
        Timepoint(value + 0.0)
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl From<f64> for Timepoint {
    fn from(value: f64) -> Self {
        Timepoint::new(value)
    }
}

impl PartialEq for Timepoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timepoint {}

impl PartialOrd for Timepoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timepoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Timepoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Timepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of travel along the transport-map chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward earlier timepoints (ancestors).
    Backward,
    /// Toward later timepoints (descendants).
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Backward => write!(f, "pull back"),
            Direction::Forward => write!(f, "push forward"),
        }
    }
}
