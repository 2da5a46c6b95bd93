//! Error types for gridsum.

use std::fmt;

/// Errors that can occur during strategy selection or allreduce execution.
#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    /// A group-size or buffer precondition failed (e.g. non-power-of-two
    /// group for an algorithm that requires one). Detected identically on
    /// every rank before any data movement.
    Validation(String),
    /// Buffer allocation failed.
    Allocation { bytes: usize },
    /// A calibration table row was missing or malformed.
    Calibration(String),
    /// Transport-level failure (lost peer, length mismatch, poisoned state).
    Transport(String),
    /// Selection query outside the valid domain (P < 1, m < 1).
    InvalidInput(String),
    /// The group was torn down by a coordinated abort.
    Aborted { code: i32 },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation failed: {msg}"),
            Self::Allocation { bytes } => {
                write!(f, "failed to allocate {bytes} byte buffer")
            }
            Self::Calibration(msg) => write!(f, "calibration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Aborted { code } => write!(f, "group aborted with code {code}"),
        }
    }
}

impl std::error::Error for GridError {}

/// Allocate a zero-filled f64 buffer, surfacing allocation failure as an
/// error instead of an unwinding process abort.
pub(crate) fn alloc_buffer(len: usize) -> Result<Vec<f64>, GridError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| GridError::Allocation {
        bytes: len * std::mem::size_of::<f64>(),
    })?;
    buf.resize(len, 0.0);
    Ok(buf)
}
