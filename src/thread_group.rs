//! In-process process group: every rank is a thread.
//!
//! Each rank owns a mailbox holding two queues, matched the way an MPI
//! runtime matches messages:
//!
//! - *posted* receives, in the order they were posted;
//! - *unexpected* messages that arrived before a matching receive, in arrival
//!   order.
//!
//! A send first looks for the oldest matching posted receive on the
//! destination and fills it; otherwise the message is queued as unexpected.
//! A receive first looks for the oldest matching unexpected message;
//! otherwise it is posted. Sends are eager: the payload is copied, so a
//! blocking send returns as soon as the buffer may be reused and never waits
//! for the receiver.
//!
//! Collectives are linear algorithms over reserved negative tags, which
//! [`ANY_TAG`] never matches. Reductions are combined on rank 0 in rank order,
//! so floating-point results do not depend on thread scheduling.
//!
//! If a rank thread panics, the group is poisoned: peers blocked on a message
//! from it fail with [`Error::Disconnected`] instead of waiting forever.

use std::any::Any;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::combine::combine;
use crate::comm::Communicator;
use crate::config::Config;
use crate::datatype::DatatypeTag;
use crate::error::{fatal, Error, Result};
use crate::status::Status;
use crate::substrate::{PendingRecv, PendingSend, Substrate};
use crate::{ReduceOp, ANY_SOURCE, ANY_TAG};

const TAG_BARRIER: i32 = -2;
const TAG_BROADCAST: i32 = -3;
const TAG_REDUCE: i32 = -4;
const TAG_GATHER: i32 = -5;
const TAG_ALLTOALL: i32 = -6;
const TAG_SENDRECV: i32 = -7;

/// How often a blocked receive re-checks whether the group was poisoned.
const POISON_POLL: Duration = Duration::from_millis(20);

struct Message {
    source: i32,
    tag: i32,
    payload: Vec<u8>,
}

fn matches(source: i32, tag: i32, message: &Message) -> bool {
    let source_ok = source == ANY_SOURCE || source == message.source;
    let tag_ok = if tag == ANY_TAG {
        message.tag >= 0
    } else {
        tag == message.tag
    };
    source_ok && tag_ok
}

#[derive(Default)]
struct Slot {
    message: Mutex<Option<Message>>,
    ready: Condvar,
}

impl Slot {
    fn fill(&self, message: Message) {
        *self.message.lock() = Some(message);
        self.ready.notify_one();
    }
}

struct Posted {
    source: i32,
    tag: i32,
    slot: Arc<Slot>,
}

#[derive(Default)]
struct Queues {
    unexpected: VecDeque<Message>,
    posted: VecDeque<Posted>,
}

struct Shared {
    mailboxes: Vec<Mutex<Queues>>,
    poisoned: AtomicBool,
    first_failure: Mutex<Option<i32>>,
}

impl Shared {
    fn poison(&self, rank: i32) {
        self.first_failure.lock().get_or_insert(rank);
        self.poisoned.store(true, Ordering::SeqCst);
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }
}

struct PoisonOnPanic {
    rank: i32,
    shared: Arc<Shared>,
}

impl Drop for PoisonOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::debug!("rank {} panicked; poisoning thread group", self.rank);
            self.shared.poison(self.rank);
        }
    }
}

/// Launcher for in-process process groups.
///
/// # Example
///
/// ```no_run
/// use ferropar::ThreadGroup;
///
/// let sums = ThreadGroup::run(4, |world| {
///     let mut value = world.rank();
///     world.sum(&mut value);
///     value
/// });
/// assert_eq!(sums, vec![6; 4]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create the substrate endpoints of a group of `size` ranks.
    ///
    /// Each endpoint must be driven by its own thread.
    pub fn endpoints(size: usize) -> Vec<ThreadRank> {
        let shared = Arc::new(Shared {
            mailboxes: (0..size).map(|_| Mutex::new(Queues::default())).collect(),
            poisoned: AtomicBool::new(false),
            first_failure: Mutex::new(None),
        });
        (0..size)
            .map(|rank| ThreadRank {
                rank: rank as i32,
                size: size as i32,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run `f` on `size` ranks with the default configuration.
    ///
    /// Returns the per-rank results in rank order.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(Communicator) -> R + Sync,
        R: Send,
    {
        Self::run_with_config(size, Config::default(), f)
    }

    /// Run `f` on `size` ranks, each on its own thread with its own
    /// [`Communicator`].
    ///
    /// Blocks until every rank returns. If any rank panics, the panic of the
    /// first rank to fail is re-raised on the caller after all ranks exit.
    pub fn run_with_config<F, R>(size: usize, config: Config, f: F) -> Vec<R>
    where
        F: Fn(Communicator) -> R + Sync,
        R: Send,
    {
        if size == 0 {
            fatal("ThreadGroup::run", Error::InvalidRank { rank: 0, size: 0 });
        }

        let endpoints = Self::endpoints(size);
        let shared = Arc::clone(&endpoints[0].shared);
        let f = &f;

        std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|endpoint| {
                    let rank = endpoint.rank;
                    let guard = PoisonOnPanic {
                        rank,
                        shared: Arc::clone(&endpoint.shared),
                    };
                    std::thread::Builder::new()
                        .name(format!("rank-{rank}"))
                        .spawn_scoped(scope, move || {
                            let _guard = guard;
                            f(Communicator::new(Arc::new(endpoint), config))
                        })
                        .unwrap_or_else(|e| {
                            // Ranks already running must not wait for this one.
                            shared.poison(rank);
                            fatal(
                                "ThreadGroup::run",
                                Error::Substrate(format!("failed to spawn rank thread: {e}")),
                            )
                        })
                })
                .collect();

            let mut results = Vec::with_capacity(size);
            let mut failures: Vec<(i32, Box<dyn Any + Send>)> = Vec::new();
            for (rank, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(payload) => failures.push((rank as i32, payload)),
                }
            }

            if !failures.is_empty() {
                let first = *shared.first_failure.lock();
                let index = failures
                    .iter()
                    .position(|(rank, _)| Some(*rank) == first)
                    .unwrap_or(0);
                let (_, payload) = failures.swap_remove(index);
                std::panic::resume_unwind(payload);
            }
            results
        })
    }
}

/// One rank's endpoint of a [`ThreadGroup`].
pub struct ThreadRank {
    rank: i32,
    size: i32,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ThreadRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRank")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl ThreadRank {
    fn check_rank(&self, rank: i32) -> Result<usize> {
        if (0..self.size).contains(&rank) {
            Ok(rank as usize)
        } else {
            Err(Error::InvalidRank {
                rank,
                size: self.size,
            })
        }
    }

    fn deliver(&self, dest: i32, tag: i32, payload: Vec<u8>) -> Result<()> {
        let dest = self.check_rank(dest)?;
        if self.shared.is_poisoned() {
            return Err(Error::Disconnected);
        }
        let message = Message {
            source: self.rank,
            tag,
            payload,
        };

        let mut queues = self.shared.mailboxes[dest].lock();
        let waiting = queues
            .posted
            .iter()
            .position(|posted| matches(posted.source, posted.tag, &message));
        match waiting.and_then(|index| queues.posted.remove(index)) {
            Some(posted) => {
                drop(queues);
                posted.slot.fill(message);
            }
            None => queues.unexpected.push_back(message),
        }
        Ok(())
    }

    fn post(&self, source: i32, tag: i32) -> Result<Arc<Slot>> {
        if source != ANY_SOURCE {
            self.check_rank(source)?;
        }
        let slot = Arc::new(Slot::default());

        let mut queues = self.shared.mailboxes[self.rank as usize].lock();
        let arrived = queues
            .unexpected
            .iter()
            .position(|message| matches(source, tag, message));
        match arrived.and_then(|index| queues.unexpected.remove(index)) {
            Some(message) => slot.fill(message),
            None => queues.posted.push_back(Posted {
                source,
                tag,
                slot: Arc::clone(&slot),
            }),
        }
        Ok(slot)
    }

    fn await_slot(&self, slot: &Slot) -> Result<Message> {
        let mut message = slot.message.lock();
        loop {
            if let Some(message) = message.take() {
                return Ok(message);
            }
            if self.shared.is_poisoned() {
                return Err(Error::Disconnected);
            }
            slot.ready.wait_for(&mut message, POISON_POLL);
        }
    }

    fn recv_message(&self, source: i32, tag: i32) -> Result<Message> {
        let slot = self.post(source, tag)?;
        self.await_slot(&slot)
    }

    fn recv_exact(&self, source: i32, tag: i32, buf: &mut [u8]) -> Result<()> {
        let message = self.recv_message(source, tag)?;
        if message.payload.len() != buf.len() {
            return Err(Error::CountMismatch {
                expected: buf.len(),
                actual: message.payload.len(),
            });
        }
        buf.copy_from_slice(&message.payload);
        Ok(())
    }
}

fn land(message: Message, buf: &mut [u8], datatype: DatatypeTag) -> Result<Status> {
    let received = message.payload.len();
    if received > buf.len() {
        return Err(Error::Truncated {
            capacity: buf.len(),
            received,
        });
    }
    buf[..received].copy_from_slice(&message.payload);
    Ok(Status::new(
        message.source,
        message.tag,
        received,
        datatype.size_of(),
    ))
}

fn byte_range(count: usize, displ: usize, width: usize, len: usize) -> Result<std::ops::Range<usize>> {
    let start = displ * width;
    let end = start + count * width;
    if end > len {
        return Err(Error::CountMismatch {
            expected: end,
            actual: len,
        });
    }
    Ok(start..end)
}

struct EagerSend;

impl PendingSend for EagerSend {
    fn wait(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct PostedRecv<'a> {
    endpoint: &'a ThreadRank,
    slot: Arc<Slot>,
    datatype: DatatypeTag,
}

impl PendingRecv for PostedRecv<'_> {
    fn wait(self: Box<Self>, buf: &mut [u8]) -> Result<Status> {
        let message = self.endpoint.await_slot(&self.slot)?;
        land(message, buf, self.datatype)
    }
}

impl Substrate for ThreadRank {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    fn barrier(&self) -> Result<()> {
        if self.rank == 0 {
            for r in 1..self.size {
                self.recv_message(r, TAG_BARRIER)?;
            }
            for r in 1..self.size {
                self.deliver(r, TAG_BARRIER, Vec::new())?;
            }
        } else {
            self.deliver(0, TAG_BARRIER, Vec::new())?;
            self.recv_message(0, TAG_BARRIER)?;
        }
        Ok(())
    }

    fn send(&self, buf: &[u8], _datatype: DatatypeTag, dest: i32, tag: i32) -> Result<()> {
        self.deliver(dest, tag, buf.to_vec())
    }

    fn recv(&self, buf: &mut [u8], datatype: DatatypeTag, source: i32, tag: i32) -> Result<Status> {
        let message = self.recv_message(source, tag)?;
        land(message, buf, datatype)
    }

    fn isend<'a>(
        &'a self,
        buf: Cow<'a, [u8]>,
        _datatype: DatatypeTag,
        dest: i32,
        tag: i32,
    ) -> Result<Box<dyn PendingSend + 'a>> {
        self.deliver(dest, tag, buf.into_owned())?;
        Ok(Box::new(EagerSend))
    }

    fn irecv<'a>(
        &'a self,
        datatype: DatatypeTag,
        source: i32,
        tag: i32,
    ) -> Result<Box<dyn PendingRecv + 'a>> {
        let slot = self.post(source, tag)?;
        Ok(Box::new(PostedRecv {
            endpoint: self,
            slot,
            datatype,
        }))
    }

    fn sendrecv(
        &self,
        send: &[u8],
        dest: i32,
        recv: &mut [u8],
        source: i32,
        datatype: DatatypeTag,
    ) -> Result<Status> {
        self.deliver(dest, TAG_SENDRECV, send.to_vec())?;
        let message = self.recv_message(source, TAG_SENDRECV)?;
        land(message, recv, datatype)
    }

    fn broadcast(&self, buf: &mut [u8], _datatype: DatatypeTag, root: i32) -> Result<()> {
        self.check_rank(root)?;
        if self.rank == root {
            for r in (0..self.size).filter(|&r| r != root) {
                self.deliver(r, TAG_BROADCAST, buf.to_vec())?;
            }
            Ok(())
        } else {
            self.recv_exact(root, TAG_BROADCAST, buf)
        }
    }

    fn allreduce(&self, buf: &mut [u8], datatype: DatatypeTag, op: ReduceOp) -> Result<()> {
        if self.rank == 0 {
            for r in 1..self.size {
                let message = self.recv_message(r, TAG_REDUCE)?;
                combine(datatype, op, buf, &message.payload)?;
            }
        } else {
            self.deliver(0, TAG_REDUCE, buf.to_vec())?;
        }
        self.broadcast(buf, datatype, 0)
    }

    fn gatherv(
        &self,
        send: &[u8],
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        datatype: DatatypeTag,
        root: i32,
    ) -> Result<()> {
        self.check_rank(root)?;
        if self.rank != root {
            return self.deliver(root, TAG_GATHER, send.to_vec());
        }

        let size = self.size as usize;
        if counts.len() != size || displs.len() != size {
            return Err(Error::CountMismatch {
                expected: size,
                actual: counts.len().min(displs.len()),
            });
        }
        let width = datatype.size_of();
        for r in 0..size {
            let range = byte_range(counts[r], displs[r], width, recv.len())?;
            if r == root as usize {
                if send.len() != range.len() {
                    return Err(Error::CountMismatch {
                        expected: range.len(),
                        actual: send.len(),
                    });
                }
                recv[range].copy_from_slice(send);
            } else {
                self.recv_exact(r as i32, TAG_GATHER, &mut recv[range])?;
            }
        }
        Ok(())
    }

    fn allgatherv(
        &self,
        send: &[u8],
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        datatype: DatatypeTag,
    ) -> Result<()> {
        self.gatherv(send, recv, counts, displs, datatype, 0)?;
        self.broadcast(recv, datatype, 0)
    }

    fn alltoall(&self, send: &[u8], recv: &mut [u8], datatype: DatatypeTag) -> Result<()> {
        if send.len() != recv.len() {
            return Err(Error::CountMismatch {
                expected: send.len(),
                actual: recv.len(),
            });
        }
        let size = self.size as usize;
        let width = datatype.size_of();
        let elements = send.len() / width;
        if elements % size != 0 {
            return Err(Error::NotDivisible {
                len: elements,
                size: self.size,
            });
        }
        let block = elements / size * width;
        let me = self.rank as usize;

        for j in (0..size).filter(|&j| j != me) {
            self.deliver(j as i32, TAG_ALLTOALL, send[j * block..(j + 1) * block].to_vec())?;
        }
        recv[me * block..(me + 1) * block].copy_from_slice(&send[me * block..(me + 1) * block]);
        for j in (0..size).filter(|&j| j != me) {
            self.recv_exact(j as i32, TAG_ALLTOALL, &mut recv[j * block..(j + 1) * block])?;
        }
        Ok(())
    }
}
