//! Strategy selection: exhaustive search over algorithm pairs and grid
//! shapes.
//!
//! For every ordered (row algorithm, column algorithm) pair, candidate
//! column counts Pc are scored as `predicted_time(row, Pc, m) +
//! predicted_time(col, P/Pc, m)` — the row phase runs in groups of Pc, the
//! column phase in groups of P/Pc. The running minimum uses strict
//! less-than in a fixed iteration order (row ascending, column ascending,
//! Pc ascending), so the first candidate at the minimum wins ties and
//! repeated queries return bit-identical results.

use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, ALGORITHMS};
use crate::cost::{predicted_time, CostTable};
use crate::error::GridError;
use crate::factors::factors_of;

/// The chosen (row algorithm, column algorithm, column count) triple and
/// its predicted completion time. Immutable once produced.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub row_algorithm: Algorithm,
    pub col_algorithm: Algorithm,
    pub columns: u64,
    pub predicted_time: f64,
}

/// Pick the fastest (row algorithm, column algorithm, Pc) triple for `p`
/// ranks moving `m` doubles.
pub fn select_strategy(p: u64, m: u64, table: &CostTable) -> Result<Strategy, GridError> {
    if p < 1 {
        return Err(GridError::InvalidInput(format!(
            "process count must be at least 1, got {p}"
        )));
    }
    if m < 1 {
        return Err(GridError::InvalidInput(format!(
            "message length must be at least 1, got {m}"
        )));
    }

    let divisors = {
        let mut d = factors_of(p);
        d.sort_unstable();
        d
    };
    let powers_of_two = {
        let mut v = Vec::new();
        let mut x = 1u64;
        loop {
            v.push(x);
            match x.checked_mul(2) {
                Some(next) if next <= p => x = next,
                _ => break,
            }
        }
        v
    };

    let mut best: Option<Strategy> = None;
    for row in ALGORITHMS {
        for col in ALGORITHMS {
            let needs_pow2 = row.requires_power_of_two() || col.requires_power_of_two();
            let candidates = if needs_pow2 { &powers_of_two } else { &divisors };

            for &pc in candidates {
                if p % pc != 0 {
                    continue;
                }
                let rows = p / pc;
                // The row phase runs in groups of pc, the column phase in
                // groups of rows; each axis must satisfy its algorithm's
                // precondition.
                if row.requires_power_of_two() && !pc.is_power_of_two() {
                    continue;
                }
                if col.requires_power_of_two() && !rows.is_power_of_two() {
                    continue;
                }

                let time = predicted_time(row, pc, m, table) + predicted_time(col, rows, m, table);
                if best.map_or(true, |b| time < b.predicted_time) {
                    best = Some(Strategy {
                        row_algorithm: row,
                        col_algorithm: col,
                        columns: pc,
                        predicted_time: time,
                    });
                }
            }
        }
    }

    // Pc = 1 with a non-power-of-two-free pair is always admissible, so a
    // winner exists for every valid p.
    best.ok_or_else(|| GridError::InvalidInput(format!("no admissible grid shape for P={p}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostCoefficients;

    fn positive() -> CostCoefficients {
        CostCoefficients::new(1.0, 1e-3, 1e-4)
    }

    /// All-positive coefficients except a free Rabenseifner.
    fn free_rabenseifner() -> CostTable {
        let mut coefficients = [positive(); crate::algorithm::NUM_ALGORITHMS];
        coefficients[Algorithm::Rabenseifner.index()] = CostCoefficients::default();
        CostTable::new(coefficients)
    }

    #[test]
    fn argmin_picks_free_algorithm() {
        let strategy = select_strategy(8, 1024, &free_rabenseifner()).unwrap();
        assert_eq!(strategy.predicted_time, 0.0);
        // A zero total needs Rabenseifner on one axis and a zero-cost
        // partner (any algorithm on a single-rank group) on the other.
        assert!(
            strategy.row_algorithm == Algorithm::Rabenseifner
                || strategy.col_algorithm == Algorithm::Rabenseifner
        );
    }

    #[test]
    fn argmin_tie_break_is_first_in_order() {
        // Linear rows of size 1 cost zero, so (linear, rabenseifner, Pc=1)
        // reaches time 0 before any later pair; strict-less-than keeps it.
        let strategy = select_strategy(8, 1024, &free_rabenseifner()).unwrap();
        assert_eq!(strategy.row_algorithm, Algorithm::Linear);
        assert_eq!(strategy.col_algorithm, Algorithm::Rabenseifner);
        assert_eq!(strategy.columns, 1);
    }

    #[test]
    fn idempotent_bit_identical() {
        let table = CostTable::uniform(positive());
        let a = select_strategy(64, 4096, &table).unwrap();
        let b = select_strategy(64, 4096, &table).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.predicted_time.to_bits(),
            b.predicted_time.to_bits()
        );
    }

    #[test]
    fn rejects_domain_errors() {
        let table = CostTable::uniform(positive());
        assert!(matches!(
            select_strategy(0, 16, &table),
            Err(GridError::InvalidInput(_))
        ));
        assert!(matches!(
            select_strategy(8, 0, &table),
            Err(GridError::InvalidInput(_))
        ));
    }

    #[test]
    fn non_power_of_two_yields_valid_shape() {
        let table = CostTable::uniform(positive());
        let strategy = select_strategy(12, 2048, &table).unwrap();
        assert_eq!(12 % strategy.columns, 0);
        if strategy.row_algorithm.requires_power_of_two() {
            assert!(strategy.columns.is_power_of_two());
        }
        if strategy.col_algorithm.requires_power_of_two() {
            assert!((12 / strategy.columns).is_power_of_two());
        }
    }

    #[test]
    fn strategy_serializes_for_reporting() {
        let strategy = select_strategy(8, 1024, &free_rabenseifner()).unwrap();
        let json = serde_json::to_string(&strategy).unwrap();
        assert!(json.contains("Rabenseifner"));
        let back: Strategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
    }

    #[test]
    fn single_rank_selects_trivially() {
        let table = CostTable::uniform(positive());
        let strategy = select_strategy(1, 16, &table).unwrap();
        assert_eq!(strategy.columns, 1);
        assert_eq!(strategy.predicted_time, 0.0);
    }
}
