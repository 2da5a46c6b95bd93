//! Recursive doubling allreduce.
//!
//! At step k, each rank exchanges its entire accumulator with the partner
//! whose rank differs in bit k (`rank ^ mask`) and folds the received vector
//! in. After log2(size) steps every rank holds the full sum. The only
//! algorithm in the suite that moves the full vector at every step.

use crate::algorithm::ensure_power_of_two;
use crate::error::{alloc_buffer, GridError};
use crate::transport::{Communicator, Tag};

const EXCHANGE_TAG: Tag = Tag(0);

/// Sum `input` across the group; requires a power-of-two group size.
pub fn recursive_doubling_allreduce(
    comm: &dyn Communicator,
    input: &[f64],
) -> Result<Vec<f64>, GridError> {
    let rank = comm.rank();
    let size = comm.size();
    ensure_power_of_two("recursive doubling", size)?;

    let mut acc = input.to_vec();
    if size == 1 {
        return Ok(acc);
    }
    let mut temp = alloc_buffer(input.len())?;

    let mut mask = 1;
    while mask < size {
        let partner = rank ^ mask;
        comm.sendrecv(&acc, partner, &mut temp, partner, EXCHANGE_TAG)?;
        for (a, t) in acc.iter_mut().zip(&temp) {
            *a += t;
        }
        mask <<= 1;
    }

    Ok(acc)
}
