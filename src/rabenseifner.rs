//! Rabenseifner allreduce: recursive-halving reduce-scatter followed by a
//! recursive-doubling allgather.
//!
//! Phase 1 maintains a `(recv_offset, recv_size)` window over the buffer,
//! halved each step. Against partner `rank ^ mask` (mask doubling from 1),
//! the lower rank keeps the lower half of its window and sends the upper
//! half; the higher rank keeps the upper half. After log2(size) steps each
//! rank owns a fully reduced, disjoint `count/size` fragment; the fragments
//! partition the vector exactly. Phase 2 mirrors the walk in reverse (mask
//! halving from size/2), exchanging grown fragments without further
//! addition until every rank holds the full vector.
//!
//! Both directions of each exchange are posted nonblocking and awaited
//! explicitly so neither side serializes on the other's send.
//!
//! Preconditions: power-of-two group size, and `count` divisible by the
//! group size so every halving step splits evenly.

use crate::algorithm::ensure_power_of_two;
use crate::error::GridError;
use crate::transport::{Communicator, Tag};

const SCATTER_TAG: Tag = Tag(0);
const GATHER_TAG: Tag = Tag(1);

/// Sum `input` across the group; requires a power-of-two group size and
/// `input.len() % size == 0`.
pub fn rabenseifner_allreduce(
    comm: &dyn Communicator,
    input: &[f64],
) -> Result<Vec<f64>, GridError> {
    let rank = comm.rank();
    let size = comm.size();
    ensure_power_of_two("rabenseifner", size)?;

    let count = input.len();
    let mut buf = input.to_vec();
    if size == 1 {
        return Ok(buf);
    }
    if count % size != 0 {
        return Err(GridError::Validation(format!(
            "rabenseifner needs the vector length ({count}) divisible by the group size ({size})"
        )));
    }

    let mut recv_size = count;
    let mut recv_offset = 0;

    // Phase 1: reduce-scatter by recursive halving.
    let mut mask = 1;
    while mask < size {
        let partner = rank ^ mask;
        recv_size /= 2;

        let send_offset = if rank < partner {
            // Keep the lower half of the window, ship the upper.
            recv_offset + recv_size
        } else {
            let lower = recv_offset;
            recv_offset += recv_size;
            lower
        };

        let recv_req = comm.irecv(partner, SCATTER_TAG, recv_size)?;
        let send_req = comm.isend(partner, SCATTER_TAG, &buf[send_offset..send_offset + recv_size])?;
        let incoming = comm.wait_recv(recv_req)?;
        comm.wait_send(send_req)?;

        for (a, t) in buf[recv_offset..recv_offset + recv_size].iter_mut().zip(&incoming) {
            *a += t;
        }
        mask <<= 1;
    }

    comm.barrier()?;

    // Phase 2: allgather by recursive doubling, mirroring phase 1 in
    // reverse. Fragments are propagated verbatim; no value changes.
    let mut mask = size / 2;
    while mask > 0 {
        let partner = rank ^ mask;

        let partner_offset = if rank < partner {
            recv_offset + recv_size
        } else {
            recv_offset - recv_size
        };

        let recv_req = comm.irecv(partner, GATHER_TAG, recv_size)?;
        let send_req = comm.isend(partner, GATHER_TAG, &buf[recv_offset..recv_offset + recv_size])?;
        let incoming = comm.wait_recv(recv_req)?;
        comm.wait_send(send_req)?;

        buf[partner_offset..partner_offset + recv_size].copy_from_slice(&incoming);
        if rank > partner {
            recv_offset = partner_offset;
        }
        recv_size *= 2;
        mask >>= 1;
    }

    Ok(buf)
}
