//! In-process reference transport: one OS thread per rank.
//!
//! `LocalCluster` runs a closure on `size` threads, each holding a
//! `LocalComm` for the world group. Messages are routed through per-rank
//! mailboxes keyed by (communicator context, sender, tag); a fresh context
//! is allocated for every subgroup so concurrent subgroups never see each
//! other's traffic. Barrier and split are built from the same point-to-point
//! plumbing over reserved tags (gather at the group root, then release).
//!
//! This transport exists so the algorithms are executable and testable
//! without an external runtime; a cluster-backed transport only has to
//! implement the same [`Communicator`] contract.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::debug;

use crate::error::GridError;
use crate::transport::{Communicator, RecvRequest, SendRequest, Tag};

/// Context of the world group; subgroups get fresh contexts from a shared
/// counter.
const WORLD_CONTEXT: u64 = 0;

/// Routing key: (communicator context, sender's global rank, tag).
type RouteKey = (u64, usize, u32);

/// One rank's incoming message queues.
struct Mailbox {
    queues: Mutex<HashMap<RouteKey, VecDeque<Vec<f64>>>>,
    ready: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        }
    }
}

/// State shared by every rank of a cluster.
struct ClusterShared {
    mailboxes: Vec<Mailbox>,
    next_context: AtomicU64,
    aborted: AtomicBool,
    abort_code: AtomicI32,
}

impl ClusterShared {
    fn new(size: usize) -> Self {
        Self {
            mailboxes: (0..size).map(|_| Mailbox::new()).collect(),
            next_context: AtomicU64::new(WORLD_CONTEXT + 1),
            aborted: AtomicBool::new(false),
            abort_code: AtomicI32::new(0),
        }
    }

    fn abort_error(&self) -> GridError {
        GridError::Aborted {
            code: self.abort_code.load(Ordering::SeqCst),
        }
    }

    fn check_alive(&self) -> Result<(), GridError> {
        if self.aborted.load(Ordering::SeqCst) {
            Err(self.abort_error())
        } else {
            Ok(())
        }
    }

    /// Enqueue a message for `dest` and wake its waiters.
    fn deliver(&self, dest: usize, key: RouteKey, payload: Vec<f64>) -> Result<(), GridError> {
        self.check_alive()?;
        let mailbox = &self.mailboxes[dest];
        let mut queues = mailbox
            .queues
            .lock()
            .map_err(|_| GridError::Transport("mailbox poisoned".into()))?;
        queues.entry(key).or_default().push_back(payload);
        mailbox.ready.notify_all();
        Ok(())
    }

    /// Dequeue the next message matching `key` for `dest`, blocking until
    /// one arrives or the cluster aborts.
    fn take(&self, dest: usize, key: RouteKey) -> Result<Vec<f64>, GridError> {
        let mailbox = &self.mailboxes[dest];
        let mut queues = mailbox
            .queues
            .lock()
            .map_err(|_| GridError::Transport("mailbox poisoned".into()))?;
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(self.abort_error());
            }
            if let Some(payload) = queues.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(payload);
            }
            queues = mailbox
                .ready
                .wait(queues)
                .map_err(|_| GridError::Transport("mailbox poisoned".into()))?;
        }
    }

    /// Flag the cluster dead and wake every blocked rank.
    fn abort(&self, code: i32) {
        self.abort_code.store(code, Ordering::SeqCst);
        self.aborted.store(true, Ordering::SeqCst);
        for mailbox in &self.mailboxes {
            // Take the lock so no waiter can slip between its predicate
            // check and the wait.
            let _queues = mailbox.queues.lock();
            mailbox.ready.notify_all();
        }
    }
}

/// A group handle over the in-process cluster.
///
/// Rank numbering is local to the group; `members` maps local rank to the
/// global (thread) rank used for mailbox routing.
pub struct LocalComm {
    shared: Arc<ClusterShared>,
    context: u64,
    members: Vec<usize>,
    rank: usize,
}

impl LocalComm {
    fn global(&self, local: usize) -> Result<usize, GridError> {
        self.members.get(local).copied().ok_or_else(|| {
            GridError::Transport(format!(
                "rank {local} out of range for group of {}",
                self.members.len()
            ))
        })
    }

    fn my_global(&self) -> usize {
        self.members[self.rank]
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn send(&self, dest: usize, tag: Tag, buf: &[f64]) -> Result<(), GridError> {
        let dest_global = self.global(dest)?;
        let key = (self.context, self.my_global(), tag.0);
        self.shared.deliver(dest_global, key, buf.to_vec())
    }

    fn recv(&self, source: usize, tag: Tag, buf: &mut [f64]) -> Result<(), GridError> {
        let source_global = self.global(source)?;
        let key = (self.context, source_global, tag.0);
        let payload = self.shared.take(self.my_global(), key)?;
        if payload.len() != buf.len() {
            return Err(GridError::Transport(format!(
                "length mismatch from rank {source}: expected {}, got {}",
                buf.len(),
                payload.len()
            )));
        }
        buf.copy_from_slice(&payload);
        Ok(())
    }

    // Mailboxes are unbounded, so a send completes at issue; the request
    // handle records the route so wait_send can reject a handle awaited on
    // the wrong group.
    fn isend(&self, dest: usize, tag: Tag, buf: &[f64]) -> Result<SendRequest, GridError> {
        self.send(dest, tag, buf)?;
        Ok(SendRequest { dest, tag })
    }

    fn irecv(&self, source: usize, tag: Tag, len: usize) -> Result<RecvRequest, GridError> {
        self.shared.check_alive()?;
        self.global(source)?;
        Ok(RecvRequest { source, tag, len })
    }

    fn wait_send(&self, req: SendRequest) -> Result<(), GridError> {
        // A handle is only valid on the communicator that issued it.
        if req.dest >= self.size() {
            return Err(GridError::Transport(format!(
                "stale send handle: rank {} tag {} not in this group",
                req.dest, req.tag.0
            )));
        }
        self.shared.check_alive()
    }

    fn wait_recv(&self, req: RecvRequest) -> Result<Vec<f64>, GridError> {
        let source_global = self.global(req.source)?;
        let key = (self.context, source_global, req.tag.0);
        let payload = self.shared.take(self.my_global(), key)?;
        if payload.len() != req.len {
            return Err(GridError::Transport(format!(
                "length mismatch from rank {}: expected {}, got {}",
                req.source,
                req.len,
                payload.len()
            )));
        }
        Ok(payload)
    }

    fn sendrecv(
        &self,
        send_buf: &[f64],
        dest: usize,
        recv_buf: &mut [f64],
        source: usize,
        tag: Tag,
    ) -> Result<(), GridError> {
        // Unbounded queues: issuing the send first can never deadlock the
        // symmetric call on the partner.
        self.send(dest, tag, send_buf)?;
        self.recv(source, tag, recv_buf)
    }

    fn barrier(&self) -> Result<(), GridError> {
        let size = self.size();
        if size <= 1 {
            return self.shared.check_alive();
        }
        // Gather zero-length tokens at the group root, then release.
        if self.rank == 0 {
            for peer in 1..size {
                self.recv(peer, Tag::BARRIER, &mut [])?;
            }
            for peer in 1..size {
                self.send(peer, Tag::BARRIER, &[])?;
            }
        } else {
            self.send(0, Tag::BARRIER, &[])?;
            self.recv(0, Tag::BARRIER, &mut [])?;
        }
        Ok(())
    }

    fn split(&self, color: usize, key: usize) -> Result<Box<dyn Communicator>, GridError> {
        let size = self.size();
        // Gather (color, key) pairs at the group root; the root assigns one
        // fresh context per distinct color and broadcasts the full table so
        // every member derives its subgroup without further negotiation.
        let table: Vec<f64> = if self.rank == 0 {
            let mut pairs = vec![(color, key)];
            for peer in 1..size {
                let mut entry = [0.0; 2];
                self.recv(peer, Tag::SPLIT, &mut entry)?;
                pairs.push((entry[0] as usize, entry[1] as usize));
            }

            let mut colors: Vec<usize> = pairs.iter().map(|&(c, _)| c).collect();
            colors.sort_unstable();
            colors.dedup();
            let contexts: HashMap<usize, u64> = colors
                .into_iter()
                .map(|c| (c, self.shared.next_context.fetch_add(1, Ordering::Relaxed)))
                .collect();

            let mut table = Vec::with_capacity(3 * size);
            for &(c, k) in &pairs {
                table.push(c as f64);
                table.push(k as f64);
                table.push(contexts[&c] as f64);
            }
            for peer in 1..size {
                self.send(peer, Tag::SPLIT, &table)?;
            }
            table
        } else {
            self.send(0, Tag::SPLIT, &[color as f64, key as f64])?;
            let mut table = vec![0.0; 3 * size];
            self.recv(0, Tag::SPLIT, &mut table)?;
            table
        };

        // Members of my color, ranked by (key, parent rank) ascending.
        let mut group: Vec<(usize, usize)> = (0..size)
            .filter(|&j| table[3 * j] as usize == color)
            .map(|j| (table[3 * j + 1] as usize, j))
            .collect();
        group.sort_unstable();

        let members: Vec<usize> = group.iter().map(|&(_, j)| self.members[j]).collect();
        let rank = group
            .iter()
            .position(|&(_, j)| j == self.rank)
            .ok_or_else(|| GridError::Transport("split lost the calling rank".into()))?;
        let context = table[3 * self.rank + 2] as u64;

        debug!(
            color,
            context,
            size = members.len(),
            rank,
            "split subgroup"
        );
        Ok(Box::new(LocalComm {
            shared: Arc::clone(&self.shared),
            context,
            members,
            rank,
        }))
    }

    fn abort(&self, code: i32) {
        self.shared.abort(code);
    }
}

/// A fixed-size in-process cluster that runs one closure per rank.
pub struct LocalCluster {
    size: usize,
}

impl LocalCluster {
    /// Create a cluster of `size` ranks.
    pub fn new(size: usize) -> Result<Self, GridError> {
        if size < 1 {
            return Err(GridError::InvalidInput(
                "cluster needs at least one rank".into(),
            ));
        }
        Ok(Self { size })
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` on every rank concurrently and collect the per-rank results
    /// in rank order.
    ///
    /// A rank returning an error triggers a cluster-wide abort so peers
    /// blocked in communication fail instead of hanging; the first
    /// non-abort error is reported.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>, GridError>
    where
        T: Send,
        F: Fn(&LocalComm) -> Result<T, GridError> + Sync,
    {
        let shared = Arc::new(ClusterShared::new(self.size));
        let members: Vec<usize> = (0..self.size).collect();
        let f = &f;

        let results: Vec<Result<T, GridError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.size)
                .map(|rank| {
                    let comm = LocalComm {
                        shared: Arc::clone(&shared),
                        context: WORLD_CONTEXT,
                        members: members.clone(),
                        rank,
                    };
                    scope.spawn(move || {
                        let outcome =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&comm)));
                        match outcome {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(err)) => {
                                if !matches!(err, GridError::Aborted { .. }) {
                                    comm.abort(1);
                                }
                                Err(err)
                            }
                            Err(payload) => {
                                // A panicking rank must not leave its peers
                                // blocked in recv.
                                comm.abort(1);
                                std::panic::resume_unwind(payload)
                            }
                        }
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(GridError::Transport(format!("rank {rank} panicked")))
                    })
                })
                .collect()
        });

        // Prefer the root cause over secondary abort fallout.
        let mut first_abort = None;
        let mut values = Vec::with_capacity(self.size);
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(err @ GridError::Aborted { .. }) => {
                    first_abort.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        match first_abort {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_recv_roundtrip() {
        let cluster = LocalCluster::new(2).unwrap();
        let results = cluster
            .run(|comm| {
                if comm.rank() == 0 {
                    comm.send(1, Tag(7), &[1.0, 2.0, 3.0])?;
                    Ok(0.0)
                } else {
                    let mut buf = [0.0; 3];
                    comm.recv(0, Tag(7), &mut buf)?;
                    Ok(buf.iter().sum())
                }
            })
            .unwrap();
        assert_eq!(results, vec![0.0, 6.0]);
    }

    #[test]
    fn sendrecv_exchange() {
        let cluster = LocalCluster::new(2).unwrap();
        let results = cluster
            .run(|comm| {
                let partner = 1 - comm.rank();
                let mine = [comm.rank() as f64 + 1.0];
                let mut theirs = [0.0];
                comm.sendrecv(&mine, partner, &mut theirs, partner, Tag(0))?;
                Ok(theirs[0])
            })
            .unwrap();
        assert_eq!(results, vec![2.0, 1.0]);
    }

    #[test]
    fn barrier_completes() {
        let cluster = LocalCluster::new(4).unwrap();
        let results = cluster
            .run(|comm| {
                comm.barrier()?;
                comm.barrier()?;
                Ok(comm.rank())
            })
            .unwrap();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn split_by_parity() {
        let cluster = LocalCluster::new(4).unwrap();
        let results = cluster
            .run(|comm| {
                let sub = comm.split(comm.rank() % 2, comm.rank())?;
                assert_eq!(sub.size(), 2);
                // Subgroup traffic must stay inside the subgroup.
                let partner = 1 - sub.rank();
                let mine = [comm.rank() as f64];
                let mut theirs = [0.0];
                sub.sendrecv(&mine, partner, &mut theirs, partner, Tag(3))?;
                Ok((sub.rank(), theirs[0]))
            })
            .unwrap();
        // World ranks 0,2 form color 0; 1,3 form color 1, keyed by rank.
        assert_eq!(results[0], (0, 2.0));
        assert_eq!(results[1], (0, 3.0));
        assert_eq!(results[2], (1, 0.0));
        assert_eq!(results[3], (1, 1.0));
    }

    #[test]
    fn split_key_reorders_ranks() {
        let cluster = LocalCluster::new(3).unwrap();
        let results = cluster
            .run(|comm| {
                // Reverse ordering: highest world rank becomes subgroup 0.
                let sub = comm.split(0, comm.size() - comm.rank())?;
                Ok(sub.rank())
            })
            .unwrap();
        assert_eq!(results, vec![2, 1, 0]);
    }

    #[test]
    fn error_on_one_rank_aborts_peers() {
        let cluster = LocalCluster::new(2).unwrap();
        let err = cluster
            .run(|comm| -> Result<(), GridError> {
                if comm.rank() == 0 {
                    // Would block forever without the abort from rank 1.
                    let mut buf = [0.0];
                    comm.recv(1, Tag(0), &mut buf)?;
                    Ok(())
                } else {
                    Err(GridError::Validation("bad precondition".into()))
                }
            })
            .unwrap_err();
        assert_eq!(err, GridError::Validation("bad precondition".into()));
    }

    #[test]
    fn wait_send_checks_handle_destination() {
        let cluster = LocalCluster::new(2).unwrap();
        let err = cluster
            .run(|comm| -> Result<(), GridError> {
                // Singleton subgroups: a world handle awaited on one is
                // stale, its destination out of the subgroup's range.
                let sub = comm.split(comm.rank(), 0)?;
                if comm.rank() == 0 {
                    let req = comm.isend(1, Tag(5), &[1.0])?;
                    sub.wait_send(req)?;
                } else {
                    let mut buf = [0.0];
                    comm.recv(0, Tag(5), &mut buf)?;
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, GridError::Transport(_)));
    }

    #[test]
    fn nonblocking_pair_completes() {
        let cluster = LocalCluster::new(2).unwrap();
        let results = cluster
            .run(|comm| {
                let partner = 1 - comm.rank();
                let recv = comm.irecv(partner, Tag(0), 2)?;
                let send = comm.isend(partner, Tag(0), &[comm.rank() as f64; 2])?;
                let payload = comm.wait_recv(recv)?;
                comm.wait_send(send)?;
                Ok(payload[0])
            })
            .unwrap();
        assert_eq!(results, vec![1.0, 0.0]);
    }
}
