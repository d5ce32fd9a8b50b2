//! # ferropar
//!
//! Typed collective communication over a process-group substrate.
//!
//! Numerical code running as a group of cooperating processes exchanges and
//! combines values through a [`Communicator`], without writing transport
//! calls for every data shape. This crate provides:
//! - A generic API over integers of every width, floats, complex pairs and
//!   booleans (packed into words, since the substrate cannot address them)
//! - Blocking and nonblocking point-to-point transfer
//! - Reductions, broadcast, gather, all-gather, all-to-all and send-receive,
//!   including variable-length and nested payloads
//! - A cross-process consistency check for debugging
//!
//! ## Supported Types
//!
//! | Trait | Types | Operations |
//! |-------|-------|------------|
//! | [`Element`] | all below | broadcast, gather, allgather, send-receive |
//! | [`Contiguous`] | scalars, [`Complex`] | point-to-point, alltoall |
//! | [`Ordered`] | scalars, `bool` | `min`, `max`, `verify` |
//! | [`Summable`] | scalars, [`Complex`] | `sum` |
//!
//! Scalars are `f32`, `f64`, `i8`, `i16`, `i32`, `i64`, `u8`, `u16`, `u32`
//! and `u64`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferropar::ThreadGroup;
//!
//! let results = ThreadGroup::run(4, |world| {
//!     let rank = world.rank();
//!     let size = world.size();
//!     println!("Hello from rank {} of {}", rank, size);
//!
//!     // Broadcast works with any element type
//!     let mut data = vec![0.0f64; 100];
//!     if rank == 0 {
//!         data.fill(42.0);
//!     }
//!     world.broadcast(&mut data, 0);
//!
//!     // Each rank contributes a sequence of its own length
//!     let mut mine = vec![rank; rank as usize];
//!     world.allgather(&mut mine);
//!
//!     let mut sum = rank as f64;
//!     world.sum(&mut sum);
//!     sum
//! });
//! assert_eq!(results, vec![6.0; 4]);
//! ```
//!
//! ## Substrates
//!
//! A [`Communicator`] runs over any [`Substrate`]. Two are built in:
//! [`SingleProcess`] for a process running alone, and [`ThreadGroup`], which
//! runs each rank as a thread of the current process.
//!
//! ## Failure
//!
//! Operations do not return errors. A precondition violation or transport
//! failure is logged and then panics with the operation name and
//! [`ErrorClass`]; distributed state that failed to synchronize cannot be
//! recovered.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `checks` | Enable precondition checks by default in release builds |

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow certain pedantic lints for existing code
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]

mod collective;
mod comm;
mod combine;
mod config;
mod datatype;
mod error;
mod pack;
mod perf;
mod request;
mod status;
mod substrate;
mod thread_group;
mod verify;

pub use combine::combine;
pub use comm::Communicator;
pub use config::{Config, CHECKS_VAR, PERF_LOG_VAR, VERIFY_COLLECTIVES_VAR};
pub use datatype::{Contiguous, Datatype, DatatypeTag, Element, Ordered, Summable};
pub use error::{Error, ErrorClass, Result};
pub use num_complex::Complex;
pub use pack::{pack_bools, packed_len, unpack_bools, PackWord};
pub use perf::OpStats;
pub use request::Request;
pub use status::Status;
pub use substrate::{PendingRecv, PendingSend, SingleProcess, Substrate};
pub use thread_group::{ThreadGroup, ThreadRank};

/// Wildcard source rank for receives.
pub const ANY_SOURCE: i32 = -1;

/// Wildcard tag for receives. Matches any non-negative tag.
pub const ANY_TAG: i32 = -1;

/// Tag used when the caller has no reason to pick one.
pub const DEFAULT_TAG: i32 = 0;

/// Reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReduceOp {
    /// Sum of values
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
    /// Bitwise AND (integer words only)
    BitAnd = 3,
    /// Bitwise OR (integer words only)
    BitOr = 4,
}

impl ReduceOp {
    /// Lowercase name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
            ReduceOp::BitAnd => "bitand",
            ReduceOp::BitOr => "bitor",
        }
    }
}
