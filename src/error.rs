//! Error types for ferropar
//!
//! Internal seams (the substrate, the boolean codec, the reduction kernels)
//! return [`Result`]. Public communicator operations do not: every failure is
//! routed through [`fatal`], which logs a diagnostic naming the operation and
//! the [`ErrorClass`], then panics. State that failed to synchronize across
//! the group cannot be trusted, so there is no recovery path.

use std::fmt;

use thiserror::Error;

/// Result type for substrate and codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a failure, following the layer's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Programmer error detectable on the local process (bad rank, bad length).
    Precondition,
    /// The group disagreed about which collective was being performed.
    Protocol,
    /// The underlying transport failed or is unavailable.
    Substrate,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Precondition => "precondition",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Substrate => "substrate",
        };
        f.write_str(name)
    }
}

/// Error types for communication operations
#[derive(Error, Debug)]
pub enum Error {
    /// Rank outside `0..size`
    #[error("Invalid rank: {rank} (group size {size})")]
    InvalidRank {
        /// Offending rank
        rank: i32,
        /// Size of the group
        size: i32,
    },

    /// User tags must be non-negative
    #[error("Invalid tag: {0}")]
    InvalidTag(i32),

    /// Incoming message is larger than the receive buffer
    #[error("Message truncated: {received} bytes received into a {capacity}-byte buffer")]
    Truncated {
        /// Capacity of the receive buffer in bytes
        capacity: usize,
        /// Size of the incoming message in bytes
        received: usize,
    },

    /// A buffer did not have the length the operation announced
    #[error("Count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Packed word count disagrees with the logical boolean length
    #[error("Packed size mismatch: expected {expected} words, got {actual}")]
    SizeMismatch {
        /// Word count implied by the output length
        expected: usize,
        /// Word count actually supplied
        actual: usize,
    },

    /// `alltoall` buffer length is not a multiple of the group size
    #[error("Buffer of length {len} cannot be split into {size} equal blocks")]
    NotDivisible {
        /// Buffer length in elements
        len: usize,
        /// Group size
        size: i32,
    },

    /// Reduction not defined for the datatype (e.g. bitwise ops on floats)
    #[error("Reduction {op} not supported for {datatype}")]
    UnsupportedOp {
        /// Name of the reduction
        op: &'static str,
        /// Name of the datatype
        datatype: &'static str,
    },

    /// Processes disagreed about the operation being performed
    #[error("Group is not synchronized at {0:?}")]
    Unsynchronized(String),

    /// Point-to-point transfer requested with no other process to talk to
    #[error("No peer process available for {0}")]
    NoPeer(&'static str),

    /// A peer of the group terminated while this process was waiting on it
    #[error("Process group disconnected")]
    Disconnected,

    /// Failure reported by the substrate
    #[error("Substrate error: {0}")]
    Substrate(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error according to the layer's taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidRank { .. }
            | Error::InvalidTag(_)
            | Error::Truncated { .. }
            | Error::CountMismatch { .. }
            | Error::SizeMismatch { .. }
            | Error::NotDivisible { .. }
            | Error::UnsupportedOp { .. }
            | Error::NoPeer(_) => ErrorClass::Precondition,
            Error::Unsynchronized(_) => ErrorClass::Protocol,
            Error::Disconnected | Error::Substrate(_) | Error::Internal(_) => ErrorClass::Substrate,
        }
    }
}

/// Report a failed operation and terminate the calling thread of control.
///
/// Logs at error level, then panics with the operation name, error class and
/// detail. Hosts running a real process group should install a panic hook that
/// aborts, so that one failing rank takes the job down instead of leaving its
/// peers blocked.
#[cold]
#[track_caller]
pub(crate) fn fatal(op: &str, err: Error) -> ! {
    let class = err.class();
    log::error!("{op} failed ({class} error): {err}");
    panic!("{op} failed ({class} error): {err}");
}

/// Convert a substrate result into a value, or a fatal diagnostic.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self, op: &str) -> T;
}

impl<T> OrFatal<T> for Result<T> {
    #[track_caller]
    fn or_fatal(self, op: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(op, err),
        }
    }
}
