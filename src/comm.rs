//! The process-group context and point-to-point operations.
//!
//! Collectives live in `collective.rs` and the consistency checks in
//! `verify.rs`; both extend [`Communicator`] with further `impl` blocks.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::datatype::{Contiguous, Datatype, Element};
use crate::error::{fatal, Error, OrFatal, Result};
use crate::perf::{OpStats, PerfLog, Scope};
use crate::request::Request;
use crate::status::Status;
use crate::substrate::{SingleProcess, Substrate};
use crate::{ANY_SOURCE, ANY_TAG};

/// A process group and this process's place in it.
///
/// A communicator is created once per process from a [`Substrate`] and passed
/// to the code that needs it. Clones share the same substrate; the substrate
/// is released when the last clone drops.
///
/// Every operation is infallible from the caller's point of view. A failure
/// (bad rank, truncated message, transport error) is reported through the
/// `log` facade and then panics with the operation name and error class.
///
/// # Example
///
/// ```no_run
/// use ferropar::Communicator;
///
/// let world = Communicator::single_process();
/// println!("I am rank {} of {}", world.rank(), world.size());
/// ```
#[derive(Clone)]
pub struct Communicator {
    substrate: Arc<dyn Substrate>,
    config: Config,
    rank: i32,
    size: i32,
    perf: Arc<PerfLog>,
}

impl Communicator {
    /// Wrap a substrate.
    pub fn new(substrate: Arc<dyn Substrate>, config: Config) -> Self {
        let rank = substrate.rank();
        let size = substrate.size();
        log::debug!("rank {rank}: joined group of {size} ({config:?})");
        Communicator {
            substrate,
            config,
            rank,
            size,
            perf: Arc::new(PerfLog::default()),
        }
    }

    /// A group of one, configured from the environment.
    pub fn single_process() -> Self {
        Self::new(Arc::new(SingleProcess), Config::from_env())
    }

    /// Get the rank of the calling process in this group.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Get the number of processes in this group.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// The settings this communicator was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Per-operation call counts and cumulative time, sorted by operation name.
    ///
    /// Empty unless [`Config::perf_log`] is on.
    pub fn op_stats(&self) -> Vec<(&'static str, OpStats)> {
        self.perf.snapshot()
    }

    /// Discard the statistics reported by [`op_stats`](Self::op_stats).
    pub fn clear_op_stats(&self) {
        self.perf.clear();
    }

    /// Synchronize all processes in this group.
    pub fn barrier(&self) {
        let _scope = self.collective("barrier", "barrier");
        if self.is_single() {
            return;
        }
        self.substrate.barrier().or_fatal("barrier");
    }

    // ========================================================================
    // Point-to-Point Communication
    // ========================================================================

    /// Blocking send of `data` to `dest`.
    ///
    /// Returns once `data` may be reused. `tag` must be non-negative.
    pub fn send<T: Contiguous>(&self, data: &[T], dest: i32, tag: i32) {
        let _scope = self.scope("send");
        self.check_send_tag("send", tag);
        self.check_rank("send", dest);
        if self.is_single() {
            fatal("send", Error::NoPeer("send"));
        }
        let words = T::encode(data);
        self.substrate
            .send(bytemuck::cast_slice(&*words), T::Word::TAG, dest, tag)
            .or_fatal("send");
    }

    /// Blocking receive into `data` from `source`.
    ///
    /// `source` may be [`ANY_SOURCE`] and `tag` may be [`ANY_TAG`]. The message
    /// may be shorter than `data`; [`Status::count`] reports how many elements
    /// arrived. A longer message is fatal.
    pub fn recv<T: Contiguous>(&self, data: &mut [T], source: i32, tag: i32) -> Status {
        let _scope = self.scope("recv");
        self.check_recv_tag("recv", tag);
        self.check_source("recv", source);
        if self.is_single() {
            fatal("recv", Error::NoPeer("recv"));
        }
        receive_words(data, |bytes| {
            self.substrate.recv(bytes, T::Word::TAG, source, tag)
        })
        .or_fatal("recv")
    }

    /// Start a nonblocking send of `data` to `dest`.
    ///
    /// In a group of one this is a no-op and the request is already complete.
    pub fn isend<'a, T: Contiguous>(&'a self, data: &'a [T], dest: i32, tag: i32) -> Request<'a> {
        let _scope = self.scope("isend");
        self.check_send_tag("isend", tag);
        self.check_rank("isend", dest);
        if self.is_single() {
            return Request::completed("isend");
        }
        let bytes: Cow<'a, [u8]> = match T::encode(data) {
            Cow::Borrowed(words) => Cow::Borrowed(bytemuck::cast_slice(words)),
            Cow::Owned(words) => Cow::Owned(bytemuck::cast_slice(&words).to_vec()),
        };
        let pending = self
            .substrate
            .isend(bytes, T::Word::TAG, dest, tag)
            .or_fatal("isend");
        Request::pending("isend", move || pending.wait().map(|()| None))
    }

    /// Post a nonblocking receive into `data` from `source`.
    ///
    /// `data` is filled when the returned request is waited on. In a group of
    /// one this is a no-op: the request is already complete and `data` is left
    /// untouched.
    pub fn irecv<'a, T: Contiguous>(
        &'a self,
        data: &'a mut [T],
        source: i32,
        tag: i32,
    ) -> Request<'a> {
        let _scope = self.scope("irecv");
        self.check_recv_tag("irecv", tag);
        self.check_source("irecv", source);
        if self.is_single() {
            return Request::completed("irecv");
        }
        let pending = self
            .substrate
            .irecv(T::Word::TAG, source, tag)
            .or_fatal("irecv");
        Request::pending("irecv", move || {
            receive_words(data, |bytes| pending.wait(bytes)).map(Some)
        })
    }

    // ========================================================================
    // Crate-internal helpers
    // ========================================================================

    pub(crate) fn substrate(&self) -> &dyn Substrate {
        &*self.substrate
    }

    pub(crate) fn is_single(&self) -> bool {
        self.size == 1
    }

    pub(crate) fn scope(&self, op: &'static str) -> Scope<'_> {
        Scope::enter(op, self.rank, self.config.perf_log.then_some(&*self.perf))
    }

    /// Open the scope of a collective, verifying first that every rank is
    /// entering the same one when that check is enabled.
    ///
    /// `op` names the scope and the perf entry. `protocol` identifies the
    /// exact message pattern: overloads that exchange a different number of
    /// rounds must use different protocols.
    pub(crate) fn collective(&self, op: &'static str, protocol: &'static str) -> Scope<'_> {
        let scope = self.scope(op);
        if self.config.verify_collectives {
            self.check_collective(protocol);
        }
        scope
    }

    pub(crate) fn check_rank(&self, op: &str, rank: i32) {
        if self.config.checks && !(0..self.size).contains(&rank) {
            fatal(
                op,
                Error::InvalidRank {
                    rank,
                    size: self.size,
                },
            );
        }
    }

    fn check_source(&self, op: &str, source: i32) {
        if source != ANY_SOURCE {
            self.check_rank(op, source);
        }
    }

    fn check_send_tag(&self, op: &str, tag: i32) {
        if tag < 0 {
            fatal(op, Error::InvalidTag(tag));
        }
    }

    fn check_recv_tag(&self, op: &str, tag: i32) {
        if tag < 0 && tag != ANY_TAG {
            fatal(op, Error::InvalidTag(tag));
        }
    }
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Run a byte-level transfer that reads and rewrites `values` in place.
///
/// Scalars are handed to the substrate directly; other elements go through an
/// encoded copy that is decoded back afterwards.
pub(crate) fn transform_words<T: Element>(
    values: &mut [T],
    f: impl FnOnce(&mut [u8]) -> Result<()>,
) -> Result<()> {
    if let Some(words) = T::words_mut(values) {
        return f(bytemuck::cast_slice_mut(words));
    }
    let mut words = T::encode(values).into_owned();
    f(bytemuck::cast_slice_mut(&mut words))?;
    T::decode(&words, values)
}

/// Run a receive into `values`, decoding however many whole elements arrived.
///
/// The returned status counts logical elements.
pub(crate) fn receive_words<T: Contiguous>(
    values: &mut [T],
    f: impl FnOnce(&mut [u8]) -> Result<Status>,
) -> Result<Status> {
    let width = std::mem::size_of::<T::Word>() * T::WORDS;
    if let Some(words) = T::words_mut(values) {
        return f(bytemuck::cast_slice_mut(words)).map(|s| s.with_element_width(width));
    }
    let mut words = vec![T::Word::default(); T::WORDS * values.len()];
    let status = f(bytemuck::cast_slice_mut(&mut words))?.with_element_width(width);
    let received = status.count();
    T::decode(&words[..received * T::WORDS], &mut values[..received])?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    #[test]
    fn single_process_identity() {
        let world = Communicator::single_process();
        assert_eq!(world.rank(), 0);
        assert_eq!(world.size(), 1);
        world.barrier();
    }

    #[test]
    fn receive_words_decodes_partial_messages() {
        let mut values = [Complex::new(0.0f64, 0.0); 3];
        let status = receive_words(&mut values, |bytes| {
            let sent = [1.0f64, 2.0, 3.0, 4.0];
            bytes[..32].copy_from_slice(bytemuck::cast_slice(&sent));
            Ok(Status::new(1, 0, 32, 8))
        })
        .unwrap();
        assert_eq!(status.count(), 2);
        assert_eq!(values[0], Complex::new(1.0, 2.0));
        assert_eq!(values[1], Complex::new(3.0, 4.0));
        assert_eq!(values[2], Complex::new(0.0, 0.0));
    }

    #[test]
    fn transform_words_round_trips_packed_bools() {
        let mut flags = [true, false, true];
        transform_words(&mut flags, |bytes| {
            assert_eq!(bytes.len(), 4);
            bytes[0] ^= 0b111;
            Ok(())
        })
        .unwrap();
        assert_eq!(flags, [false, true, false]);
    }

    #[test]
    fn nonblocking_ops_complete_immediately_alone() {
        let world = Communicator::single_process();
        let send = [1i32, 2, 3];
        let mut recv = [0i32; 3];
        let requests = vec![world.irecv(&mut recv, 0, 0), world.isend(&send, 0, 0)];
        assert!(requests.iter().all(|r| r.is_completed()));
        Request::wait_all(requests);
        assert_eq!(recv, [0; 3]);
    }

    #[test]
    #[should_panic(expected = "send failed (precondition error)")]
    fn blocking_send_alone_is_fatal() {
        Communicator::single_process().send(&[1u8], 0, 0);
    }

    #[test]
    #[should_panic(expected = "Invalid tag: -5")]
    fn negative_tags_are_rejected() {
        let mut buf = [0u8; 1];
        Communicator::single_process().recv(&mut buf, 0, -5);
    }

    #[test]
    #[should_panic(expected = "Invalid rank: 3")]
    fn out_of_range_rank_is_rejected_with_checks() {
        let world = Communicator::new(
            Arc::new(SingleProcess),
            Config::default().with_checks(true),
        );
        world.isend(&[1.0f32], 3, 0);
    }

    #[test]
    fn perf_log_counts_operations() {
        let world = Communicator::new(
            Arc::new(SingleProcess),
            Config::default().with_perf_log(true),
        );
        world.barrier();
        world.barrier();
        let stats = world.op_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, "barrier");
        assert_eq!(stats[0].1.calls, 2);
        world.clear_op_stats();
        assert!(world.op_stats().is_empty());
    }
}
