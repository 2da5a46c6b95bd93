//! Algorithm identities and dispatch.
//!
//! `Algorithm` replaces what would otherwise be a function-pointer matrix:
//! it indexes both the calibration table (discriminants follow calibration
//! row order) and the executable implementation behind [`Algorithm::run`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::transport::Communicator;
use crate::{doubling, linear, rabenseifner, ring};

/// Number of allreduce algorithms in the suite.
pub const NUM_ALGORITHMS: usize = 5;

/// The five point-to-point allreduce algorithms.
///
/// Discriminant order matches the calibration table's row order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Sequential chain reduce to rank 0, then chain broadcast.
    Linear,
    /// Recursive-halving reduce-scatter + recursive-doubling allgather.
    Rabenseifner,
    /// Ring reduce-scatter + ring allgather, whole chunks per hop.
    Ring,
    /// Ring with per-chunk transfers pipelined in bounded segments.
    RingSegmented,
    /// Full-vector XOR-partner exchange at every step.
    RecursiveDoubling,
}

/// All algorithms in calibration row order.
pub const ALGORITHMS: [Algorithm; NUM_ALGORITHMS] = [
    Algorithm::Linear,
    Algorithm::Rabenseifner,
    Algorithm::Ring,
    Algorithm::RingSegmented,
    Algorithm::RecursiveDoubling,
];

impl Algorithm {
    /// Calibration table row index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this algorithm's butterfly pattern needs a power-of-two
    /// group size.
    pub fn requires_power_of_two(self) -> bool {
        matches!(self, Self::Rabenseifner | Self::RecursiveDoubling)
    }

    /// Execute this algorithm over `comm`: every member receives the
    /// elementwise sum of all members' `input` vectors.
    pub fn run(self, comm: &dyn Communicator, input: &[f64]) -> Result<Vec<f64>, GridError> {
        match self {
            Self::Linear => linear::linear_allreduce(comm, input),
            Self::Rabenseifner => rabenseifner::rabenseifner_allreduce(comm, input),
            Self::Ring => ring::ring_allreduce(comm, input),
            Self::RingSegmented => ring::ring_segmented_allreduce(comm, input),
            Self::RecursiveDoubling => doubling::recursive_doubling_allreduce(comm, input),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linear => "linear",
            Self::Rabenseifner => "rabenseifner",
            Self::Ring => "ring",
            Self::RingSegmented => "ring-segmented",
            Self::RecursiveDoubling => "recursive-doubling",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Algorithm {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "rabenseifner" => Ok(Self::Rabenseifner),
            "ring" => Ok(Self::Ring),
            "ring-segmented" => Ok(Self::RingSegmented),
            "recursive-doubling" => Ok(Self::RecursiveDoubling),
            other => Err(GridError::InvalidInput(format!(
                "unknown algorithm '{other}'"
            ))),
        }
    }
}

/// Group-size precondition shared by the butterfly algorithms. Evaluated
/// identically on every rank from `size` alone, before any data movement.
pub(crate) fn ensure_power_of_two(name: &str, size: usize) -> Result<(), GridError> {
    if size.is_power_of_two() {
        Ok(())
    } else {
        Err(GridError::Validation(format!(
            "{name} requires a power-of-two group, got {size} ranks"
        )))
    }
}
