//! Collective reductions and data-reshaping operations.
//!
//! Every method here must be called by every rank of the group, in the same
//! order. Variable-length operations run in ordered phases: lengths are
//! exchanged first, then payloads move into buffers sized from those lengths.
//! In a group of one every operation completes locally without touching the
//! substrate.

use std::slice;

use crate::comm::{transform_words, Communicator};
use crate::datatype::{Contiguous, Datatype, DatatypeTag, Element, Ordered, Summable};
use crate::error::{fatal, Error, OrFatal};
use crate::ReduceOp;

/// Where each rank's contribution lands in a concatenated gather result.
struct Layout {
    /// Logical elements contributed by each rank.
    lengths: Vec<usize>,
    /// Wire words contributed by each rank.
    counts: Vec<usize>,
    /// Word offset of each rank's contribution.
    displs: Vec<usize>,
}

impl Layout {
    fn new<T: Element>(lengths: Vec<usize>) -> Self {
        let counts: Vec<usize> = lengths.iter().map(|&len| T::word_count(len)).collect();
        let displs = counts
            .iter()
            .scan(0, |offset, &count| {
                let start = *offset;
                *offset += count;
                Some(start)
            })
            .collect();
        Layout {
            lengths,
            counts,
            displs,
        }
    }

    fn total_words(&self) -> usize {
        self.counts.iter().sum()
    }

    fn total_len(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// Decode each rank's segment on its own; packed booleans are padded per
    /// segment, not across the concatenation.
    fn decode<T: Element>(&self, words: &[T::Word]) -> crate::Result<Vec<T>> {
        let mut out = vec![T::default(); self.total_len()];
        let mut at = 0;
        for ((&len, &count), &displ) in self.lengths.iter().zip(&self.counts).zip(&self.displs) {
            T::decode(&words[displ..displ + count], &mut out[at..at + len])?;
            at += len;
        }
        Ok(out)
    }
}

impl Communicator {
    // ========================================================================
    // Reductions
    // ========================================================================

    /// Replace `value` with the group-wide minimum.
    ///
    /// For `bool` the minimum is a logical AND across the group.
    pub fn min<T: Ordered>(&self, value: &mut T) {
        let _scope = self.collective("min", "min");
        self.allreduce_in_place("min", slice::from_mut(value), T::MIN_OP);
    }

    /// Element-wise group-wide minimum. Every rank must pass the same length.
    pub fn min_slice<T: Ordered>(&self, values: &mut [T]) {
        let _scope = self.collective("min", "min");
        self.allreduce_in_place("min", values, T::MIN_OP);
    }

    /// Replace `value` with the group-wide maximum.
    ///
    /// For `bool` the maximum is a logical OR across the group.
    pub fn max<T: Ordered>(&self, value: &mut T) {
        let _scope = self.collective("max", "max");
        self.allreduce_in_place("max", slice::from_mut(value), T::MAX_OP);
    }

    /// Element-wise group-wide maximum. Every rank must pass the same length.
    pub fn max_slice<T: Ordered>(&self, values: &mut [T]) {
        let _scope = self.collective("max", "max");
        self.allreduce_in_place("max", values, T::MAX_OP);
    }

    /// Replace `value` with the group-wide sum. Integer sums wrap on overflow.
    pub fn sum<T: Summable>(&self, value: &mut T) {
        let _scope = self.collective("sum", "sum");
        self.allreduce_in_place("sum", slice::from_mut(value), ReduceOp::Sum);
    }

    /// Element-wise group-wide sum. Every rank must pass the same length.
    pub fn sum_slice<T: Summable>(&self, values: &mut [T]) {
        let _scope = self.collective("sum", "sum");
        self.allreduce_in_place("sum", values, ReduceOp::Sum);
    }

    pub(crate) fn allreduce_in_place<T: Element>(&self, op: &str, values: &mut [T], reduce: ReduceOp) {
        if self.is_single() {
            return;
        }
        transform_words(values, |bytes| {
            self.substrate().allreduce(bytes, T::Word::TAG, reduce)
        })
        .or_fatal(op);
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Replace `value` on every rank with its value on `root`.
    pub fn broadcast_value<T: Element>(&self, value: &mut T, root: i32) {
        let _scope = self.collective("broadcast", "broadcast");
        self.broadcast_in_place("broadcast", slice::from_mut(value), root);
    }

    /// Replace `data` on every rank with its contents on `root`.
    ///
    /// Every rank must pass a slice of the same length; use
    /// [`broadcast_vec`](Self::broadcast_vec) when only the root knows it.
    pub fn broadcast<T: Element>(&self, data: &mut [T], root: i32) {
        let _scope = self.collective("broadcast", "broadcast");
        self.broadcast_in_place("broadcast", data, root);
    }

    /// Replace `data` on every rank with the root's vector, resizing as needed.
    pub fn broadcast_vec<T: Element>(&self, data: &mut Vec<T>, root: i32) {
        let _scope = self.collective("broadcast", "broadcast_vec");
        self.broadcast_resized("broadcast", data, root);
    }

    /// Replace `text` on every rank with the root's string.
    pub fn broadcast_string(&self, text: &mut String, root: i32) {
        let _scope = self.collective("broadcast", "broadcast_vec");
        let mut bytes = std::mem::take(text).into_bytes();
        self.broadcast_resized("broadcast", &mut bytes, root);
        *text = String::from_utf8(bytes)
            .map_err(|e| Error::Internal(format!("broadcast string is not UTF-8: {e}")))
            .or_fatal("broadcast");
    }

    fn broadcast_in_place<T: Element>(&self, op: &str, data: &mut [T], root: i32) {
        self.check_rank(op, root);
        if self.is_single() {
            return;
        }
        transform_words(data, |bytes| {
            self.substrate().broadcast(bytes, T::Word::TAG, root)
        })
        .or_fatal(op);
    }

    fn broadcast_resized<T: Element>(&self, op: &str, data: &mut Vec<T>, root: i32) {
        let mut len = data.len() as u64;
        self.broadcast_in_place(op, slice::from_mut(&mut len), root);
        data.resize(len as usize, T::default());
        self.broadcast_in_place(op, data, root);
    }

    // ========================================================================
    // Gather
    // ========================================================================

    /// Collect one value from every rank on `root`, in rank order.
    ///
    /// Returns the `size()` values on `root` and an empty vector elsewhere.
    pub fn gather_value<T: Element>(&self, value: &T, root: i32) -> Vec<T> {
        let _scope = self.collective("gather", "gather_value");
        self.check_rank("gather", root);
        if self.is_single() {
            return vec![value.clone()];
        }
        let layout = Layout::new::<T>(vec![1; self.size() as usize]);
        self.gather_layout("gather", slice::from_ref(value), &layout, Some(root))
            .unwrap_or_default()
    }

    /// Concatenate every rank's `data`, in rank order, into `data` on `root`.
    ///
    /// Ranks may contribute different lengths. `data` is left unchanged on
    /// every other rank.
    pub fn gather<T: Element>(&self, data: &mut Vec<T>, root: i32) {
        let _scope = self.collective("gather", "gather");
        self.check_rank("gather", root);
        if self.is_single() {
            return;
        }
        let layout = Layout::new::<T>(self.allgather_lengths("gather", data.len()));
        if layout.total_words() == 0 {
            return;
        }
        if let Some(gathered) = self.gather_layout("gather", data, &layout, Some(root)) {
            *data = gathered;
        }
    }

    /// Collect one value from every rank on every rank, in rank order.
    pub fn allgather_value<T: Element>(&self, value: &T) -> Vec<T> {
        let _scope = self.collective("allgather", "allgather_value");
        if self.is_single() {
            return vec![value.clone()];
        }
        let layout = Layout::new::<T>(vec![1; self.size() as usize]);
        self.gather_layout("allgather", slice::from_ref(value), &layout, None)
            .unwrap_or_default()
    }

    /// Replace `data` on every rank with the rank-ordered concatenation of all
    /// ranks' `data`. Ranks may contribute different lengths.
    pub fn allgather<T: Element>(&self, data: &mut Vec<T>) {
        let _scope = self.collective("allgather", "allgather");
        if self.is_single() {
            return;
        }
        let layout = Layout::new::<T>(self.allgather_lengths("allgather", data.len()));
        if layout.total_words() == 0 {
            return;
        }
        if let Some(gathered) = self.gather_layout("allgather", data, &layout, None) {
            *data = gathered;
        }
    }

    fn allgather_lengths(&self, op: &str, len: usize) -> Vec<usize> {
        let send = [len as u64];
        let mut recv = vec![0u64; self.size() as usize];
        self.substrate()
            .allgather(
                bytemuck::cast_slice(&send),
                bytemuck::cast_slice_mut(&mut recv),
                DatatypeTag::U64,
            )
            .or_fatal(op);
        recv.into_iter().map(|len| len as usize).collect()
    }

    /// Gather `local` into `layout` on `root`, or on every rank when `root` is
    /// `None`. Returns the decoded concatenation where it was delivered.
    fn gather_layout<T: Element>(
        &self,
        op: &str,
        local: &[T],
        layout: &Layout,
        root: Option<i32>,
    ) -> Option<Vec<T>> {
        let send = T::encode(local);
        let delivered = root.map_or(true, |root| root == self.rank());
        let mut recv = vec![T::Word::default(); if delivered { layout.total_words() } else { 0 }];

        let recv_bytes = bytemuck::cast_slice_mut(&mut recv);
        let result = match root {
            Some(root) => self.substrate().gatherv(
                bytemuck::cast_slice(&*send),
                recv_bytes,
                &layout.counts,
                &layout.displs,
                T::Word::TAG,
                root,
            ),
            None => self.substrate().allgatherv(
                bytemuck::cast_slice(&*send),
                recv_bytes,
                &layout.counts,
                &layout.displs,
                T::Word::TAG,
            ),
        };
        result.or_fatal(op);

        delivered.then(|| layout.decode(&recv).or_fatal(op))
    }

    // ========================================================================
    // All-to-all
    // ========================================================================

    /// Transpose per-rank blocks: split `data` into `size()` equal blocks, send
    /// block `j` to rank `j`, and replace it with the block rank `j` sent here.
    ///
    /// The length of `data` must be a multiple of the group size. With
    /// [`Config::checks`](crate::Config::checks) off, a trailing remainder is
    /// left untouched instead.
    pub fn alltoall<T: Contiguous>(&self, data: &mut [T]) {
        let _scope = self.collective("alltoall", "alltoall");
        if self.is_single() {
            return;
        }
        let size = self.size() as usize;
        let remainder = data.len() % size;
        if remainder != 0 && self.config().checks {
            fatal(
                "alltoall",
                Error::NotDivisible {
                    len: data.len(),
                    size: self.size(),
                },
            );
        }
        let usable = data.len() - remainder;
        let data = &mut data[..usable];

        let recv = {
            let send = T::encode(data);
            let mut recv = vec![T::Word::default(); send.len()];
            self.substrate()
                .alltoall(
                    bytemuck::cast_slice(&*send),
                    bytemuck::cast_slice_mut(&mut recv),
                    T::Word::TAG,
                )
                .or_fatal("alltoall");
            recv
        };
        T::decode(&recv, data).or_fatal("alltoall");
    }

    // ========================================================================
    // Send-receive
    // ========================================================================

    /// Send `send` to `dest` while receiving `recv` from `source`.
    ///
    /// When both `dest` and `source` are this rank, `send` is copied into
    /// `recv` without involving the substrate.
    pub fn send_receive_value<T: Element>(&self, dest: i32, send: &T, source: i32, recv: &mut T) {
        let _scope = self.collective("send_receive", "send_receive_value");
        if self.is_self_exchange(dest, source) {
            recv.clone_from(send);
            return;
        }
        self.check_peers("send_receive", dest, source);
        self.exchange("send_receive", dest, slice::from_ref(send), source, slice::from_mut(recv));
    }

    /// Send `send` to `dest` while receiving a vector of any length from
    /// `source` into `recv`.
    ///
    /// Lengths are exchanged first, then payloads.
    pub fn send_receive<T: Element>(&self, dest: i32, send: &[T], source: i32, recv: &mut Vec<T>) {
        let _scope = self.collective("send_receive", "send_receive_vec");
        if self.is_self_exchange(dest, source) {
            recv.clear();
            recv.extend_from_slice(send);
            return;
        }
        self.check_peers("send_receive", dest, source);
        self.exchange_resized("send_receive", dest, send, source, recv);
    }

    /// Exchange a sequence of sequences.
    ///
    /// Three ordered rounds: outer lengths, then inner lengths, then all
    /// payloads flattened into a single transfer.
    pub fn send_receive_nested<T: Element>(
        &self,
        dest: i32,
        send: &[Vec<T>],
        source: i32,
        recv: &mut Vec<Vec<T>>,
    ) {
        let _scope = self.collective("send_receive", "send_receive_nested");
        if self.is_self_exchange(dest, source) {
            *recv = send.to_vec();
            return;
        }
        self.check_peers("send_receive", dest, source);

        let send_lengths: Vec<u64> = send.iter().map(|inner| inner.len() as u64).collect();
        let mut recv_lengths = Vec::new();
        self.exchange_resized("send_receive", dest, &send_lengths, source, &mut recv_lengths);

        let flat_send: Vec<T> = send.iter().flatten().cloned().collect();
        let total = recv_lengths.iter().sum::<u64>() as usize;
        let mut flat_recv = vec![T::default(); total];
        self.exchange("send_receive", dest, &flat_send, source, &mut flat_recv);

        let mut rest = flat_recv.into_iter();
        *recv = recv_lengths
            .iter()
            .map(|&len| rest.by_ref().take(len as usize).collect())
            .collect();
    }

    fn is_self_exchange(&self, dest: i32, source: i32) -> bool {
        dest == self.rank() && source == self.rank()
    }

    fn check_peers(&self, op: &str, dest: i32, source: i32) {
        self.check_rank(op, dest);
        self.check_rank(op, source);
        if self.is_single() {
            fatal(op, Error::NoPeer("send_receive"));
        }
    }

    fn exchange_resized<T: Element>(&self, op: &str, dest: i32, send: &[T], source: i32, recv: &mut Vec<T>) {
        let mut len = 0u64;
        self.exchange(op, dest, &[send.len() as u64], source, slice::from_mut(&mut len));
        recv.clear();
        recv.resize(len as usize, T::default());
        self.exchange(op, dest, send, source, recv);
    }

    /// One sendrecv round whose incoming length is already known.
    fn exchange<T: Element>(&self, op: &str, dest: i32, send: &[T], source: i32, recv: &mut [T]) {
        let send_words = T::encode(send);
        let mut recv_words = vec![T::Word::default(); T::word_count(recv.len())];
        let status = self
            .substrate()
            .sendrecv(
                bytemuck::cast_slice(&*send_words),
                dest,
                bytemuck::cast_slice_mut(&mut recv_words),
                source,
                T::Word::TAG,
            )
            .or_fatal(op);
        if status.count() != recv_words.len() {
            fatal(
                op,
                Error::CountMismatch {
                    expected: recv_words.len(),
                    actual: status.count(),
                },
            );
        }
        T::decode(&recv_words, recv).or_fatal(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    #[test]
    fn layout_offsets_follow_word_counts() {
        let layout = Layout::new::<Complex<f32>>(vec![0, 1, 2]);
        assert_eq!(layout.counts, vec![0, 2, 4]);
        assert_eq!(layout.displs, vec![0, 0, 2]);
        assert_eq!(layout.total_words(), 6);
        assert_eq!(layout.total_len(), 3);
    }

    #[test]
    fn bool_segments_decode_independently() {
        let layout = Layout::new::<bool>(vec![2, 1]);
        assert_eq!(layout.counts, vec![1, 1]);
        let words = [0b10u32, 0b1];
        let flags: Vec<bool> = layout.decode(&words).unwrap();
        assert_eq!(flags, vec![false, true, true]);
    }

    #[test]
    fn single_process_collectives_are_local() {
        let world = Communicator::single_process();

        let mut x = 3.5f64;
        world.sum(&mut x);
        world.min(&mut x);
        world.max(&mut x);
        assert_eq!(x, 3.5);

        let mut v = vec![1i32, 2, 3];
        world.broadcast_vec(&mut v, 0);
        world.gather(&mut v, 0);
        world.allgather(&mut v);
        world.alltoall(&mut v);
        assert_eq!(v, vec![1, 2, 3]);

        assert_eq!(world.gather_value(&7u8, 0), vec![7]);
        assert_eq!(world.allgather_value(&true), vec![true]);

        let mut text = String::from("mesh");
        world.broadcast_string(&mut text, 0);
        assert_eq!(text, "mesh");
    }

    #[test]
    fn self_exchange_copies_locally() {
        let world = Communicator::single_process();
        let mut out = 0i64;
        world.send_receive_value(0, &42i64, 0, &mut out);
        assert_eq!(out, 42);

        let mut recv = vec![9u16];
        world.send_receive(0, &[1u16, 2, 3], 0, &mut recv);
        assert_eq!(recv, vec![1, 2, 3]);

        let nested = vec![vec![true], vec![], vec![false, true]];
        let mut recv = Vec::new();
        world.send_receive_nested(0, &nested, 0, &mut recv);
        assert_eq!(recv, nested);
    }

    #[test]
    #[should_panic(expected = "broadcast failed (precondition error): Invalid rank: 1")]
    fn broadcast_alone_requires_root_zero() {
        let world = Communicator::new(
            std::sync::Arc::new(crate::SingleProcess),
            crate::Config::default().with_checks(true),
        );
        let mut x = 1u32;
        world.broadcast_value(&mut x, 1);
    }
}
