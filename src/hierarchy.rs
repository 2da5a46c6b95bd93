//! Two-phase hierarchical allreduce over a logical process grid.
//!
//! The group of `size` ranks is viewed as a grid with `columns` columns:
//! rank r sits at row `r / columns`, column `r % columns`. Phase 1 runs the
//! row algorithm independently inside each row, leaving every rank with its
//! row's partial sums. Phase 2 runs the column algorithm inside each column
//! on those partials; since every row contributed, every rank ends with the
//! global sum, identical to a flat allreduce over the whole group.

use tracing::debug;

use crate::error::GridError;
use crate::select::Strategy;
use crate::transport::Communicator;

/// Sum `input` across all ranks of `comm` using `strategy`'s row and column
/// algorithms on a grid with `strategy.columns` columns.
pub fn hierarchical_allreduce(
    comm: &dyn Communicator,
    input: &[f64],
    strategy: &Strategy,
) -> Result<Vec<f64>, GridError> {
    let rank = comm.rank();
    let size = comm.size();
    let columns = strategy.columns;

    if columns < 1 || columns > size as u64 {
        return Err(GridError::Validation(format!(
            "column count {columns} out of range for {size} processes"
        )));
    }
    if size as u64 % columns != 0 {
        return Err(GridError::Validation(format!(
            "column count {columns} does not divide {size} processes"
        )));
    }

    let columns = columns as usize;
    let row_id = rank / columns;
    let col_id = rank % columns;

    debug!(
        rank,
        row_id,
        col_id,
        row_algorithm = %strategy.row_algorithm,
        "row phase"
    );
    let row_comm = comm.split(row_id, rank)?;
    let row_result = strategy.row_algorithm.run(row_comm.as_ref(), input)?;

    // All rows finish before any column starts reading partials.
    comm.barrier()?;

    debug!(
        rank,
        row_id,
        col_id,
        col_algorithm = %strategy.col_algorithm,
        "column phase"
    );
    let col_comm = comm.split(col_id, rank)?;
    strategy.col_algorithm.run(col_comm.as_ref(), &row_result)
}
