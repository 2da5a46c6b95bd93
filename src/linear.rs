//! Linear allreduce: sequential chain reduce, then sequential chain
//! broadcast.
//!
//! Phase 1 folds accumulators down the chain one rank at a time until rank 0
//! holds the total; phase 2 pushes the total back out along the same chain.
//! Every transfer depends on the previous one, so the latency term is O(P)
//! with no overlap — the baseline the other algorithms are measured against.

use crate::error::{alloc_buffer, GridError};
use crate::transport::{Communicator, Tag};

const REDUCE_TAG: Tag = Tag(0);
const BCAST_TAG: Tag = Tag(1);

/// Sum `input` across the group; every rank receives the full total.
pub fn linear_allreduce(comm: &dyn Communicator, input: &[f64]) -> Result<Vec<f64>, GridError> {
    let rank = comm.rank();
    let size = comm.size();
    let mut acc = input.to_vec();
    if size == 1 {
        return Ok(acc);
    }
    let mut temp = alloc_buffer(input.len())?;

    // Phase 1: ranks size-1 .. 1 each fold into their left neighbor, one
    // dependent transfer at a time, converging on rank 0.
    for step in (1..size).rev() {
        if rank == step {
            comm.send(rank - 1, REDUCE_TAG, &acc)?;
        } else if rank + 1 == step {
            comm.recv(rank + 1, REDUCE_TAG, &mut temp)?;
            for (a, t) in acc.iter_mut().zip(&temp) {
                *a += t;
            }
        }
    }

    comm.barrier()?;

    // Phase 2: the total walks back from rank 0, no computation.
    for step in 0..size - 1 {
        if rank == step {
            comm.send(rank + 1, BCAST_TAG, &acc)?;
        } else if rank == step + 1 {
            comm.recv(rank - 1, BCAST_TAG, &mut acc)?;
        }
    }

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCluster;

    #[test]
    fn sums_across_four_ranks() {
        let cluster = LocalCluster::new(4).unwrap();
        let results = cluster
            .run(|comm| {
                let input = vec![(comm.rank() + 1) as f64; 16];
                linear_allreduce(comm, &input)
            })
            .unwrap();
        for out in results {
            assert_eq!(out, vec![10.0; 16]);
        }
    }

    #[test]
    fn distinct_elements() {
        let cluster = LocalCluster::new(3).unwrap();
        let results = cluster
            .run(|comm| {
                let input: Vec<f64> = (0..5).map(|i| (comm.rank() * 5 + i) as f64).collect();
                linear_allreduce(comm, &input)
            })
            .unwrap();
        // Element i sums rank contributions 0*5+i, 1*5+i, 2*5+i.
        let expected: Vec<f64> = (0..5).map(|i| (15 + 3 * i) as f64).collect();
        for out in results {
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn single_rank_is_identity() {
        let cluster = LocalCluster::new(1).unwrap();
        let results = cluster
            .run(|comm| linear_allreduce(comm, &[3.0, 4.0]))
            .unwrap();
        assert_eq!(results, vec![vec![3.0, 4.0]]);
    }
}
