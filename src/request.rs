//! Request handles for nonblocking point-to-point operations.

use crate::error::{OrFatal, Result};
use crate::status::Status;

type Completion<'a> = Box<dyn FnOnce() -> Result<Option<Status>> + 'a>;

/// A handle to a nonblocking send or receive.
///
/// The buffer handed to [`isend`](crate::Communicator::isend) or
/// [`irecv`](crate::Communicator::irecv) stays borrowed by the request until
/// it is completed with [`wait`](Self::wait) or [`wait_all`](Self::wait_all);
/// the borrow checker enforces that the buffer is neither read nor mutated in
/// the meantime.
///
/// # Example
///
/// ```no_run
/// use ferropar::{Request, ThreadGroup};
///
/// ThreadGroup::run(2, |world| {
///     let rank = world.rank();
///     let peer = 1 - rank;
///     let send = vec![rank as f64; 10];
///     let mut recv = vec![0.0; 10];
///
///     let requests = vec![world.irecv(&mut recv, peer, 0), world.isend(&send, peer, 0)];
///     // Do other work while communication proceeds...
///     Request::wait_all(requests);
///
///     assert_eq!(recv, vec![peer as f64; 10]);
/// });
/// ```
pub struct Request<'a> {
    op: &'static str,
    completion: Option<Completion<'a>>,
}

impl<'a> Request<'a> {
    /// Create a request that completes by running `completion`.
    pub(crate) fn pending(
        op: &'static str,
        completion: impl FnOnce() -> Result<Option<Status>> + 'a,
    ) -> Self {
        Request {
            op,
            completion: Some(Box::new(completion)),
        }
    }

    /// Create a request that is already complete.
    pub(crate) fn completed(op: &'static str) -> Self {
        Request {
            op,
            completion: None,
        }
    }

    /// Name of the operation that issued this request.
    pub fn operation(&self) -> &'static str {
        self.op
    }

    /// Check if this request has been completed.
    pub fn is_completed(&self) -> bool {
        self.completion.is_none()
    }

    /// Wait for this operation to complete.
    ///
    /// Blocks until the operation is finished. For a receive, the buffer holds
    /// the received data afterwards and the message [`Status`] is returned;
    /// for a send, the buffer may be reused and `None` is returned. A receive
    /// that was trivially completed in a single-process group also yields
    /// `None`.
    pub fn wait(mut self) -> Option<Status> {
        self.complete()
    }

    /// Wait for all requests in a collection to complete.
    pub fn wait_all(requests: Vec<Request<'a>>) {
        for request in requests {
            request.wait();
        }
    }

    fn complete(&mut self) -> Option<Status> {
        let completion = self.completion.take()?;
        completion().or_fatal(self.op)
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.completion.is_some() && !std::thread::panicking() {
            // Leaving the operation in flight would release the buffer borrow
            // while the substrate may still touch it.
            log::warn!("{} request dropped without wait; completing it now", self.op);
            self.complete();
        }
    }
}

impl std::fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("op", &self.op)
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn completed_request_yields_nothing() {
        let request = Request::completed("irecv");
        assert!(request.is_completed());
        assert_eq!(request.operation(), "irecv");
        assert_eq!(request.wait(), None);
    }

    #[test]
    fn wait_runs_completion_once() {
        let calls = Cell::new(0);
        let request = Request::pending("irecv", || {
            calls.set(calls.get() + 1);
            Ok(Some(Status::new(1, 5, 16, 8)))
        });
        assert!(!request.is_completed());
        let status = request.wait().unwrap();
        assert_eq!(status.source, 1);
        assert_eq!(status.count(), 2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn drop_completes_pending_request() {
        let calls = Cell::new(0);
        {
            let _request = Request::pending("isend", || {
                calls.set(calls.get() + 1);
                Ok(None)
            });
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn wait_all_completes_every_request() {
        let calls = Cell::new(0);
        let requests = (0..4)
            .map(|_| {
                Request::pending("isend", || {
                    calls.set(calls.get() + 1);
                    Ok(None)
                })
            })
            .collect();
        Request::wait_all(requests);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    #[should_panic(expected = "irecv failed (substrate error)")]
    fn failed_completion_is_fatal() {
        let request = Request::pending("irecv", || Err(crate::Error::Disconnected));
        request.wait();
    }
}
