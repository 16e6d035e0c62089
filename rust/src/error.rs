//! Error types for transport-map propagation and trajectory aggregation.
//!
//! Every error is raised at the point of detection. The aggregator never
//! swallows errors from propagation or statistics; callers decide whether to
//! abort a batch or continue with the remaining populations.

use crate::timepoint::{Direction, Timepoint};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Primary error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// A transport map is inconsistent with the entity sets it connects,
    /// or carries a negative or non-finite weight.
    #[error("malformed transport map {t_src} -> {t_dst}: {detail}")]
    MalformedMap {
        t_src: Timepoint,
        t_dst: Timepoint,
        detail: String,
    },

    /// Populations passed together do not share a timepoint.
    #[error("populations are not aligned: expected time {expected}, found {found}")]
    Alignment { expected: Timepoint, found: Timepoint },

    /// Propagation was requested past the end of the transport-map chain.
    #[error("no transport map to {direction} from time {time}")]
    NoTransportMap { time: Timepoint, direction: Direction },

    /// A population's total mass is zero where statistics were requested.
    #[error("population {index} has no mass at time {time}")]
    EmptyPopulation { index: usize, time: Timepoint },

    /// None of the requested entity sets intersect the entities at `time`.
    #[error("no requested entities are present at time {time}")]
    EmptySelection { time: Timepoint },

    /// Shapes of a labeled matrix, its labels, or its metadata disagree.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A required metadata column is absent.
    #[error("missing metadata column '{0}'")]
    MissingMetadata(String),

    /// A time label could not be read as a finite number.
    #[error("invalid timepoint for entity '{entity}': {value}")]
    InvalidTimepoint { entity: String, value: String },

    /// The same entity identifier appears twice at one timepoint.
    #[error("entity '{id}' appears more than once at time {time}")]
    DuplicateEntity { id: String, time: Timepoint },

    /// A query referenced a timepoint that is not present in the data.
    #[error("timepoint {0} is not present in the data")]
    UnknownTimepoint(Timepoint),

    /// An aggregation was requested with no populations.
    #[error("no populations supplied")]
    NoPopulations,

    /// Enrichment score name not recognised.
    #[error("unknown score function '{0}' (expected s2n, mean_difference or fold_change)")]
    UnknownScore(String),

    /// Population weights are negative, non-finite, or misaligned.
    #[error("invalid population weights: {0}")]
    InvalidWeights(String),
}

impl TransportError {
    pub(crate) fn malformed(t_src: Timepoint, t_dst: Timepoint, detail: impl Into<String>) -> Self {
        TransportError::MalformedMap {
            t_src,
            t_dst,
            detail: detail.into(),
        }
    }
}
