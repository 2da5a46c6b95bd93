//! Calibration table loading.
//!
//! The calibration file is a small CSV: one header line, then one row per
//! algorithm in fixed order (linear, rabenseifner, ring, ring-segmented,
//! recursive-doubling), each `<name>,<alpha>,<beta>,<gamma>`. Rows map to
//! algorithms by position; the name field is informational and logged.
//!
//! A malformed or missing row is a hard error: an algorithm with undefined
//! coefficients could otherwise be selected on a meaningless predicted
//! time.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::algorithm::{ALGORITHMS, NUM_ALGORITHMS};
use crate::cost::{CostCoefficients, CostTable};
use crate::error::GridError;

/// Load and parse a calibration file.
pub fn load_calibration(path: &Path) -> Result<CostTable, GridError> {
    let text = fs::read_to_string(path).map_err(|e| {
        GridError::Calibration(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_calibration(&text)
}

/// Parse calibration CSV text into a cost table.
pub fn parse_calibration(text: &str) -> Result<CostTable, GridError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    lines
        .next()
        .ok_or_else(|| GridError::Calibration("empty calibration table".into()))?;

    let mut coefficients = [CostCoefficients::default(); NUM_ALGORITHMS];
    for (algo, slot) in ALGORITHMS.into_iter().zip(coefficients.iter_mut()) {
        let line = lines
            .next()
            .ok_or_else(|| GridError::Calibration(format!("missing row for {algo}")))?;
        let (name, parsed) = parse_row(line)
            .map_err(|msg| GridError::Calibration(format!("row for {algo}: {msg}")))?;
        info!(
            row = name,
            algorithm = %algo,
            alpha = parsed.alpha,
            beta = parsed.beta,
            gamma = parsed.gamma,
            "calibration row"
        );
        *slot = parsed;
    }

    Ok(CostTable::new(coefficients))
}

fn parse_row(line: &str) -> Result<(&str, CostCoefficients), String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [name, alpha, beta, gamma] = fields[..] else {
        return Err(format!("expected 4 fields, got {}", fields.len()));
    };

    let parse = |label: &str, field: &str| -> Result<f64, String> {
        let value: f64 = field
            .parse()
            .map_err(|_| format!("{label} '{field}' is not a number"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{label} must be finite and non-negative, got {value}"));
        }
        Ok(value)
    };

    Ok((
        name,
        CostCoefficients {
            alpha: parse("alpha", alpha)?,
            beta: parse("beta", beta)?,
            gamma: parse("gamma", gamma)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;

    const SAMPLE: &str = "\
algorithm,alpha,beta,gamma
linear,4.1e-5,2.2e-8,1.0e-9
rabenseifner,3.9e-5,1.8e-8,1.1e-9
ring,4.0e-5,1.9e-8,1.2e-9
ring_seg,4.2e-5,2.0e-8,1.3e-9
recursive_doubling,3.8e-5,2.1e-8,1.4e-9
";

    #[test]
    fn parses_sample_table() {
        let table = parse_calibration(SAMPLE).unwrap();
        assert_eq!(table.get(Algorithm::Linear).alpha, 4.1e-5);
        assert_eq!(table.get(Algorithm::Rabenseifner).beta, 1.8e-8);
        assert_eq!(table.get(Algorithm::RecursiveDoubling).gamma, 1.4e-9);
    }

    #[test]
    fn rejects_malformed_row() {
        let bad = SAMPLE.replace("ring,4.0e-5,1.9e-8,1.2e-9", "ring,oops,1.9e-8,1.2e-9");
        let err = parse_calibration(&bad).unwrap_err();
        assert!(matches!(err, GridError::Calibration(_)));
        assert!(err.to_string().contains("ring"));
    }

    #[test]
    fn rejects_missing_rows() {
        let truncated: String = SAMPLE.lines().take(4).collect::<Vec<_>>().join("\n");
        let err = parse_calibration(&truncated).unwrap_err();
        assert!(matches!(err, GridError::Calibration(_)));
    }

    #[test]
    fn rejects_negative_coefficient() {
        let bad = SAMPLE.replace("4.1e-5", "-4.1e-5");
        let err = parse_calibration(&bad).unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            parse_calibration(""),
            Err(GridError::Calibration(_))
        ));
    }
}
