//! Transport contract: point-to-point messaging between group members.
//!
//! The allreduce algorithms are written against the `Communicator` trait and
//! never against a concrete transport. A communicator scopes a group of
//! processes with a local rank numbering; subgroups are derived with
//! [`Communicator::split`]. The in-process reference implementation lives in
//! [`crate::local`]; an MPI- or network-backed transport only has to satisfy
//! the same contract.
//!
//! Ordering guarantees required from implementations:
//! - Messages between a fixed (sender, receiver, tag) triple are delivered
//!   in send order.
//! - `barrier` returns only after every group member has entered it.
//! - After `abort`, every blocked or future operation on any member of the
//!   group fails with [`GridError::Aborted`]; no member keeps running the
//!   protocol alone.

use crate::error::GridError;

/// Message tag. Tags below [`Tag::RESERVED`] are free for algorithm use;
/// the reserved space belongs to transport-internal collectives (split,
/// barrier).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub u32);

impl Tag {
    /// First transport-internal tag. Algorithms must stay below this.
    pub const RESERVED: u32 = 0xffff_ff00;
    /// Split color/key exchange.
    pub const SPLIT: Tag = Tag(Self::RESERVED);
    /// Barrier tokens.
    pub const BARRIER: Tag = Tag(Self::RESERVED + 1);
}

/// Handle for an in-flight nonblocking send. Completion is observed with
/// [`Communicator::wait_send`].
#[derive(Debug)]
pub struct SendRequest {
    pub(crate) dest: usize,
    pub(crate) tag: Tag,
}

/// Handle for an in-flight nonblocking receive. The payload is claimed with
/// [`Communicator::wait_recv`].
#[derive(Debug)]
pub struct RecvRequest {
    pub(crate) source: usize,
    pub(crate) tag: Tag,
    pub(crate) len: usize,
}

/// A group of processes with point-to-point messaging, collective barrier,
/// and group splitting.
///
/// Ranks are local to the group: `0..size()`. All buffer payloads are f64
/// vectors, matching the single payload type the algorithms move.
pub trait Communicator: Send + Sync {
    /// This process's rank within the group.
    fn rank(&self) -> usize;

    /// Number of members in the group.
    fn size(&self) -> usize;

    /// Blocking send of `buf` to `dest`.
    fn send(&self, dest: usize, tag: Tag, buf: &[f64]) -> Result<(), GridError>;

    /// Blocking receive from `source` into `buf`. The incoming message must
    /// have exactly `buf.len()` elements.
    fn recv(&self, source: usize, tag: Tag, buf: &mut [f64]) -> Result<(), GridError>;

    /// Nonblocking send; completion is awaited with [`Self::wait_send`].
    fn isend(&self, dest: usize, tag: Tag, buf: &[f64]) -> Result<SendRequest, GridError>;

    /// Nonblocking receive of `len` elements; the payload is claimed with
    /// [`Self::wait_recv`].
    fn irecv(&self, source: usize, tag: Tag, len: usize) -> Result<RecvRequest, GridError>;

    /// Block until a nonblocking send has completed.
    fn wait_send(&self, req: SendRequest) -> Result<(), GridError>;

    /// Block until a nonblocking receive has completed; returns the payload.
    fn wait_recv(&self, req: RecvRequest) -> Result<Vec<f64>, GridError>;

    /// Combined exchange: send `send_buf` to `dest` while receiving
    /// `recv_buf.len()` elements from `source`, without deadlocking when the
    /// partner does the symmetric call.
    fn sendrecv(
        &self,
        send_buf: &[f64],
        dest: usize,
        recv_buf: &mut [f64],
        source: usize,
        tag: Tag,
    ) -> Result<(), GridError>;

    /// Block until every member of the group has entered the barrier.
    fn barrier(&self) -> Result<(), GridError>;

    /// Collectively split the group: members sharing a `color` form one
    /// subgroup, ranked by `(key, parent rank)` ascending. Every member of
    /// the group must call `split` for the collective to complete.
    fn split(&self, color: usize, key: usize) -> Result<Box<dyn Communicator>, GridError>;

    /// Tear down the whole group: every blocked or future operation on any
    /// member fails with [`GridError::Aborted`].
    fn abort(&self, code: i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_tags_above_algorithm_space() {
        assert!(Tag::SPLIT.0 >= Tag::RESERVED);
        assert!(Tag::BARRIER.0 >= Tag::RESERVED);
        assert!(Tag(0).0 < Tag::RESERVED);
    }
}
