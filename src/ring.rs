//! Ring allreduce, unsegmented and segmented.
//!
//! The buffer is partitioned into `size` chunks (remainder folded into the
//! last chunk). Phase 1 (reduce-scatter) runs size-1 steps: each step the
//! rank sends one chunk to its right neighbor while receiving the preceding
//! chunk from its left neighbor and folding it in; after the walk, rank r
//! holds the fully reduced chunk r. Phase 2 (allgather) circulates the final
//! chunks around the same ring for another size-1 steps with no further
//! addition.
//!
//! The segmented variant moves each per-chunk transfer as a pipeline of
//! segments no larger than [`SEGMENT_DOUBLES`], bounding per-hop latency
//! exposure: all outgoing segments are posted nonblocking before the
//! incoming ones are drained, so a long chunk streams instead of blocking as
//! one message.

use crate::error::{alloc_buffer, GridError};
use crate::transport::{Communicator, Tag};

/// Upper bound on a pipelined segment, in doubles (8 KiB).
pub const SEGMENT_DOUBLES: usize = 1024;

const SCATTER_TAG: Tag = Tag(0);
const GATHER_TAG: Tag = Tag(1);
/// Per-segment tags for the segmented variant; segment i of a chunk uses
/// `base + i`, well below the reserved transport space.
const SEG_SCATTER_BASE: u32 = 0x1000;
const SEG_GATHER_BASE: u32 = 0x2000;

/// Offset and length of chunk `chunk` in a `count`-element buffer split
/// across `size` ranks; the remainder lands in the last chunk.
fn chunk_bounds(count: usize, size: usize, chunk: usize) -> (usize, usize) {
    let base = count / size;
    let offset = chunk * base;
    let len = if chunk == size - 1 {
        base + count % size
    } else {
        base
    };
    (offset, len)
}

/// Segment starts and lengths covering `len` elements in steps of `bound`.
fn segments(len: usize, bound: usize) -> impl Iterator<Item = (usize, usize)> {
    let bound = bound.max(1);
    (0..len)
        .step_by(bound)
        .map(move |start| (start, bound.min(len - start)))
}

/// Sum `input` across the group using whole-chunk ring exchanges. Works for
/// any group size.
pub fn ring_allreduce(comm: &dyn Communicator, input: &[f64]) -> Result<Vec<f64>, GridError> {
    let rank = comm.rank();
    let size = comm.size();
    let count = input.len();
    let mut buf = input.to_vec();
    if size == 1 {
        return Ok(buf);
    }
    let mut temp = alloc_buffer(count)?;

    let left = (rank + size - 1) % size;
    let right = (rank + 1) % size;

    // Phase 1: reduce-scatter. After the walk, rank r holds the fully
    // reduced chunk r.
    let mut recv_chunk = (rank + size - 1) % size;
    for _ in 0..size - 1 {
        let send_chunk = recv_chunk;
        recv_chunk = (recv_chunk + size - 1) % size;
        let (send_offset, send_len) = chunk_bounds(count, size, send_chunk);
        let (recv_offset, recv_len) = chunk_bounds(count, size, recv_chunk);

        comm.sendrecv(
            &buf[send_offset..send_offset + send_len],
            right,
            &mut temp[recv_offset..recv_offset + recv_len],
            left,
            SCATTER_TAG,
        )?;
        for i in recv_offset..recv_offset + recv_len {
            buf[i] += temp[i];
        }
    }

    comm.barrier()?;

    // Phase 2: allgather, starting from our own final chunk.
    let mut send_chunk = rank;
    for _ in 0..size - 1 {
        let recv_chunk = (send_chunk + size - 1) % size;
        let (send_offset, send_len) = chunk_bounds(count, size, send_chunk);
        let (recv_offset, recv_len) = chunk_bounds(count, size, recv_chunk);

        let outgoing = buf[send_offset..send_offset + send_len].to_vec();
        comm.sendrecv(
            &outgoing,
            right,
            &mut buf[recv_offset..recv_offset + recv_len],
            left,
            GATHER_TAG,
        )?;
        send_chunk = recv_chunk;
    }

    Ok(buf)
}

/// Sum `input` across the group with segment-pipelined ring exchanges.
/// Works for any group size.
pub fn ring_segmented_allreduce(
    comm: &dyn Communicator,
    input: &[f64],
) -> Result<Vec<f64>, GridError> {
    let rank = comm.rank();
    let size = comm.size();
    let count = input.len();
    let mut buf = input.to_vec();
    if size == 1 {
        return Ok(buf);
    }

    // Segment bound clamped to the base chunk size so short chunks move as
    // a single segment; identical on every rank.
    let bound = SEGMENT_DOUBLES.min((count / size).max(1));

    let left = (rank + size - 1) % size;
    let right = (rank + 1) % size;

    // Phase 1: reduce-scatter, segment-pipelined.
    let mut recv_chunk = (rank + size - 1) % size;
    for _ in 0..size - 1 {
        let send_chunk = recv_chunk;
        recv_chunk = (recv_chunk + size - 1) % size;
        let (send_offset, send_len) = chunk_bounds(count, size, send_chunk);
        let (recv_offset, recv_len) = chunk_bounds(count, size, recv_chunk);

        // Stream the outgoing chunk, then drain and fold the incoming one.
        let mut pending = Vec::new();
        for (seg, (start, len)) in segments(send_len, bound).enumerate() {
            let tag = Tag(SEG_SCATTER_BASE + seg as u32);
            let begin = send_offset + start;
            pending.push(comm.isend(right, tag, &buf[begin..begin + len])?);
        }
        for (seg, (start, len)) in segments(recv_len, bound).enumerate() {
            let tag = Tag(SEG_SCATTER_BASE + seg as u32);
            let req = comm.irecv(left, tag, len)?;
            let incoming = comm.wait_recv(req)?;
            for (a, t) in buf[recv_offset + start..recv_offset + start + len]
                .iter_mut()
                .zip(&incoming)
            {
                *a += t;
            }
        }
        for req in pending {
            comm.wait_send(req)?;
        }
    }

    comm.barrier()?;

    // Phase 2: allgather, same pipelining without the fold.
    let mut send_chunk = rank;
    for _ in 0..size - 1 {
        let recv_chunk = (send_chunk + size - 1) % size;
        let (send_offset, send_len) = chunk_bounds(count, size, send_chunk);
        let (recv_offset, recv_len) = chunk_bounds(count, size, recv_chunk);

        let mut pending = Vec::new();
        for (seg, (start, len)) in segments(send_len, bound).enumerate() {
            let tag = Tag(SEG_GATHER_BASE + seg as u32);
            let begin = send_offset + start;
            pending.push(comm.isend(right, tag, &buf[begin..begin + len])?);
        }
        for (seg, (start, len)) in segments(recv_len, bound).enumerate() {
            let tag = Tag(SEG_GATHER_BASE + seg as u32);
            let req = comm.irecv(left, tag, len)?;
            let incoming = comm.wait_recv(req)?;
            buf[recv_offset + start..recv_offset + start + len].copy_from_slice(&incoming);
        }
        for req in pending {
            comm.wait_send(req)?;
        }
        send_chunk = recv_chunk;
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCluster;

    fn expected_sum(size: usize, count: usize) -> Vec<f64> {
        // Rank r contributes r*count + i + 1 at element i.
        (0..count)
            .map(|i| (0..size).map(|r| (r * count + i + 1) as f64).sum())
            .collect()
    }

    fn run_ring(size: usize, count: usize, segmented: bool) -> Vec<Vec<f64>> {
        let cluster = LocalCluster::new(size).unwrap();
        cluster
            .run(|comm| {
                let input: Vec<f64> = (0..count)
                    .map(|i| (comm.rank() * count + i + 1) as f64)
                    .collect();
                if segmented {
                    ring_segmented_allreduce(comm, &input)
                } else {
                    ring_allreduce(comm, &input)
                }
            })
            .unwrap()
    }

    #[test]
    fn chunk_bounds_fold_remainder_into_last() {
        assert_eq!(chunk_bounds(10, 4, 0), (0, 2));
        assert_eq!(chunk_bounds(10, 4, 2), (4, 2));
        assert_eq!(chunk_bounds(10, 4, 3), (6, 4));
        assert_eq!(chunk_bounds(8, 4, 3), (6, 2));
    }

    #[test]
    fn segment_iteration_covers_length() {
        let segs: Vec<_> = segments(10, 4).collect();
        assert_eq!(segs, vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(segments(0, 4).count(), 0);
        assert_eq!(segments(3, 1024).collect::<Vec<_>>(), vec![(0, 3)]);
    }

    #[test]
    fn unsegmented_four_ranks() {
        for out in run_ring(4, 16, false) {
            assert_eq!(out, expected_sum(4, 16));
        }
    }

    #[test]
    fn unsegmented_odd_group_with_remainder() {
        // count = 10 over 3 ranks: chunks of 3, 3, 4.
        for out in run_ring(3, 10, false) {
            assert_eq!(out, expected_sum(3, 10));
        }
    }

    #[test]
    fn segmented_matches_small_chunks() {
        // Chunks below the segment bound: a single segment per hop.
        for out in run_ring(4, 16, true) {
            assert_eq!(out, expected_sum(4, 16));
        }
    }

    #[test]
    fn segmented_pipelines_long_chunks() {
        // 1500-element chunks exceed the 1024 bound, so each hop moves
        // two segments.
        let count = 4 * 1500;
        for out in run_ring(4, count, true) {
            assert_eq!(out, expected_sum(4, count));
        }
    }

    #[test]
    fn segmented_handles_remainder() {
        for out in run_ring(4, 10, true) {
            assert_eq!(out, expected_sum(4, 10));
        }
    }

    #[test]
    fn more_ranks_than_elements() {
        for out in run_ring(5, 3, false) {
            assert_eq!(out, expected_sum(5, 3));
        }
        for out in run_ring(5, 3, true) {
            assert_eq!(out, expected_sum(5, 3));
        }
    }
}
