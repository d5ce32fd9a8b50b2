//! The process-group substrate seam.
//!
//! A [`Substrate`] is the transport this layer runs on: something that knows
//! the group size and local rank and can move byte buffers between ranks,
//! interpreting them through a [`DatatypeTag`] where the operation needs to
//! (reductions, element counts). The typed [`Communicator`] encodes values into
//! wire words, hands the bytes to the substrate, and decodes the result.
//!
//! Counts and displacements passed to `gatherv`/`allgatherv` are in elements
//! of the given datatype, as with MPI.
//!
//! [`Communicator`]: crate::Communicator

use std::borrow::Cow;

use crate::datatype::DatatypeTag;
use crate::error::{Error, Result};
use crate::status::Status;
use crate::ReduceOp;

/// Completion of a nonblocking send.
pub trait PendingSend: Send {
    /// Block until the send buffer may be reused.
    fn wait(self: Box<Self>) -> Result<()>;
}

/// Completion of a nonblocking receive.
pub trait PendingRecv: Send {
    /// Block until the message arrives and copy it into `buf`.
    ///
    /// Fails with [`Error::Truncated`] if the message does not fit.
    fn wait(self: Box<Self>, buf: &mut [u8]) -> Result<Status>;
}

/// Transport primitives required from a process-group runtime.
///
/// Every collective method must be called by every rank of the group in the
/// same order. Point-to-point messages between a pair of ranks with the same
/// tag are delivered in the order they were sent.
pub trait Substrate: Send + Sync {
    /// Rank of this process, in `0..size()`.
    fn rank(&self) -> i32;

    /// Number of processes in the group.
    fn size(&self) -> i32;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Blocking send; returns once `buf` may be reused.
    fn send(&self, buf: &[u8], datatype: DatatypeTag, dest: i32, tag: i32) -> Result<()>;

    /// Blocking receive into `buf`.
    ///
    /// `source` may be [`ANY_SOURCE`](crate::ANY_SOURCE) and `tag` may be
    /// [`ANY_TAG`](crate::ANY_TAG).
    fn recv(&self, buf: &mut [u8], datatype: DatatypeTag, source: i32, tag: i32) -> Result<Status>;

    /// Start a nonblocking send.
    fn isend<'a>(
        &'a self,
        buf: Cow<'a, [u8]>,
        datatype: DatatypeTag,
        dest: i32,
        tag: i32,
    ) -> Result<Box<dyn PendingSend + 'a>>;

    /// Post a nonblocking receive.
    ///
    /// The landing buffer is supplied when the receive is waited on.
    fn irecv<'a>(
        &'a self,
        datatype: DatatypeTag,
        source: i32,
        tag: i32,
    ) -> Result<Box<dyn PendingRecv + 'a>>;

    /// Send `send` to `dest` while receiving from `source` into `recv`.
    fn sendrecv(
        &self,
        send: &[u8],
        dest: i32,
        recv: &mut [u8],
        source: i32,
        datatype: DatatypeTag,
    ) -> Result<Status>;

    /// Replace `buf` on every rank with its contents on `root`.
    fn broadcast(&self, buf: &mut [u8], datatype: DatatypeTag, root: i32) -> Result<()>;

    /// Element-wise reduction of `buf` across the group, in place on every rank.
    fn allreduce(&self, buf: &mut [u8], datatype: DatatypeTag, op: ReduceOp) -> Result<()>;

    /// Gather `send` from every rank into `recv` on `root`.
    ///
    /// Rank `r` contributes `counts[r]` elements, placed at element offset
    /// `displs[r]` of `recv`. `recv` is only significant on `root`.
    fn gatherv(
        &self,
        send: &[u8],
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        datatype: DatatypeTag,
        root: i32,
    ) -> Result<()>;

    /// As [`gatherv`](Self::gatherv), with the result delivered to every rank.
    fn allgatherv(
        &self,
        send: &[u8],
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        datatype: DatatypeTag,
    ) -> Result<()>;

    /// Split `send` into `size()` equal blocks and deliver block `j` to rank
    /// `j`; block `j` of `recv` receives rank `j`'s contribution.
    fn alltoall(&self, send: &[u8], recv: &mut [u8], datatype: DatatypeTag) -> Result<()>;

    /// Fixed-count gather: every rank contributes the same number of elements.
    fn gather(&self, send: &[u8], recv: &mut [u8], datatype: DatatypeTag, root: i32) -> Result<()> {
        let (counts, displs) = uniform_layout(send.len() / datatype.size_of(), self.size());
        self.gatherv(send, recv, &counts, &displs, datatype, root)
    }

    /// Fixed-count all-gather.
    fn allgather(&self, send: &[u8], recv: &mut [u8], datatype: DatatypeTag) -> Result<()> {
        let (counts, displs) = uniform_layout(send.len() / datatype.size_of(), self.size());
        self.allgatherv(send, recv, &counts, &displs, datatype)
    }
}

fn uniform_layout(count: usize, size: i32) -> (Vec<usize>, Vec<usize>) {
    let size = size.max(0) as usize;
    let counts = vec![count; size];
    let displs = (0..size).map(|r| r * count).collect();
    (counts, displs)
}

/// Absent substrate for a process running on its own.
///
/// Reports rank 0 of a group of 1 and refuses every transfer. A
/// [`Communicator`](crate::Communicator) over a single-process group never
/// reaches the substrate for collectives, so reaching any method here means a
/// transfer was attempted with no peer to talk to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Substrate for SingleProcess {
    fn rank(&self) -> i32 {
        0
    }

    fn size(&self) -> i32 {
        1
    }

    fn barrier(&self) -> Result<()> {
        Err(Error::NoPeer("barrier"))
    }

    fn send(&self, _buf: &[u8], _datatype: DatatypeTag, _dest: i32, _tag: i32) -> Result<()> {
        Err(Error::NoPeer("send"))
    }

    fn recv(
        &self,
        _buf: &mut [u8],
        _datatype: DatatypeTag,
        _source: i32,
        _tag: i32,
    ) -> Result<Status> {
        Err(Error::NoPeer("recv"))
    }

    fn isend<'a>(
        &'a self,
        _buf: Cow<'a, [u8]>,
        _datatype: DatatypeTag,
        _dest: i32,
        _tag: i32,
    ) -> Result<Box<dyn PendingSend + 'a>> {
        Err(Error::NoPeer("isend"))
    }

    fn irecv<'a>(
        &'a self,
        _datatype: DatatypeTag,
        _source: i32,
        _tag: i32,
    ) -> Result<Box<dyn PendingRecv + 'a>> {
        Err(Error::NoPeer("irecv"))
    }

    fn sendrecv(
        &self,
        _send: &[u8],
        _dest: i32,
        _recv: &mut [u8],
        _source: i32,
        _datatype: DatatypeTag,
    ) -> Result<Status> {
        Err(Error::NoPeer("sendrecv"))
    }

    fn broadcast(&self, _buf: &mut [u8], _datatype: DatatypeTag, _root: i32) -> Result<()> {
        Err(Error::NoPeer("broadcast"))
    }

    fn allreduce(&self, _buf: &mut [u8], _datatype: DatatypeTag, _op: ReduceOp) -> Result<()> {
        Err(Error::NoPeer("allreduce"))
    }

    fn gatherv(
        &self,
        _send: &[u8],
        _recv: &mut [u8],
        _counts: &[usize],
        _displs: &[usize],
        _datatype: DatatypeTag,
        _root: i32,
    ) -> Result<()> {
        Err(Error::NoPeer("gatherv"))
    }

    fn allgatherv(
        &self,
        _send: &[u8],
        _recv: &mut [u8],
        _counts: &[usize],
        _displs: &[usize],
        _datatype: DatatypeTag,
    ) -> Result<()> {
        Err(Error::NoPeer("allgatherv"))
    }

    fn alltoall(&self, _send: &[u8], _recv: &mut [u8], _datatype: DatatypeTag) -> Result<()> {
        Err(Error::NoPeer("alltoall"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_is_rank_zero_of_one() {
        assert_eq!(SingleProcess.rank(), 0);
        assert_eq!(SingleProcess.size(), 1);
    }

    #[test]
    fn single_process_refuses_transfers() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            SingleProcess.recv(&mut buf, DatatypeTag::U8, 0, 0),
            Err(Error::NoPeer("recv"))
        ));
        assert!(matches!(
            SingleProcess.allreduce(&mut buf, DatatypeTag::I32, ReduceOp::Sum),
            Err(Error::NoPeer("allreduce"))
        ));
        assert!(matches!(
            SingleProcess.gather(&buf, &mut [0u8; 4], DatatypeTag::U8, 0),
            Err(Error::NoPeer("gatherv"))
        ));
    }

    #[test]
    fn uniform_layout_is_rank_ordered() {
        let (counts, displs) = uniform_layout(3, 4);
        assert_eq!(counts, vec![3, 3, 3, 3]);
        assert_eq!(displs, vec![0, 3, 6, 9]);
    }
}
