//! Hockney-style cost model.
//!
//! Predicted completion time decomposes as `T = alpha*L(P) + beta*B(P,m) +
//! gamma*C(P,m)`: a latency term counting dependent transfers, a bandwidth
//! term counting bytes moved per rank, and a computation term counting
//! additions, each scaled by a calibrated coefficient. The structural terms
//! are fixed per algorithm; the coefficients come from calibration data.

use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, NUM_ALGORITHMS};

/// Calibrated (latency, per-byte bandwidth, per-byte computation) costs for
/// one algorithm. Never mutated after loading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostCoefficients {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl CostCoefficients {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }
}

/// One coefficient triple per algorithm, indexed by [`Algorithm::index`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    coefficients: [CostCoefficients; NUM_ALGORITHMS],
}

impl CostTable {
    /// Build a table from per-algorithm coefficients in calibration row
    /// order.
    pub fn new(coefficients: [CostCoefficients; NUM_ALGORITHMS]) -> Self {
        Self { coefficients }
    }

    /// The same coefficients for every algorithm (mostly for tests).
    pub fn uniform(c: CostCoefficients) -> Self {
        Self {
            coefficients: [c; NUM_ALGORITHMS],
        }
    }

    pub fn get(&self, algo: Algorithm) -> CostCoefficients {
        self.coefficients[algo.index()]
    }
}

/// Predicted completion time of `algo` on a group of `p` ranks moving `m`
/// doubles. Pure; monotone non-decreasing in both `p` and `m` for
/// non-negative coefficients.
pub fn predicted_time(algo: Algorithm, p: u64, m: u64, table: &CostTable) -> f64 {
    let c = table.get(algo);
    let pf = p as f64;
    let mf = m as f64;
    let lg = pf.log2();

    let (latency, bandwidth, compute) = match algo {
        // Serial chain reduce + serial chain broadcast.
        Algorithm::Linear => (2.0 * (pf - 1.0), 2.0 * (pf - 1.0) * mf, (pf - 1.0) * mf),
        // Reduce-scatter + allgather rings: each rank moves 2(P-1)/P of the
        // vector and folds (P-1)/P of it.
        Algorithm::Ring | Algorithm::RingSegmented => (
            2.0 * (pf - 1.0),
            2.0 * (pf - 1.0) / pf * mf,
            (pf - 1.0) / pf * mf,
        ),
        // Butterfly reduce-scatter + allgather: ring-like volume, log depth.
        Algorithm::Rabenseifner => (
            2.0 * lg,
            2.0 * (pf - 1.0) / pf * mf,
            (pf - 1.0) / pf * mf,
        ),
        // Full-vector exchange at every one of the log2(P) steps.
        Algorithm::RecursiveDoubling => (lg, lg * mf, lg * mf),
    };

    c.alpha * latency + c.beta * bandwidth + c.gamma * compute
}
