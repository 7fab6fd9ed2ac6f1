//! Single-assignment obligations.
//!
//! An [`Obligation`] starts out pending, is settled exactly once (fulfilled
//! with a result or rejected with a cause), and can be read any number of
//! times from any thread. Reading a pending obligation blocks, with a
//! timeout, until the producer settles it.
//!
//! [`Obligation::create`] returns the read handle together with its
//! [`Writer`], the one capability allowed to settle the cell:
//!
//! ```
//! use std::thread;
//! use std::time::Duration;
//! use obligation::Obligation;
//!
//! let (obligation, writer) = Obligation::<u32, String>::create();
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_millis(20));
//!     writer.fulfill(42).unwrap();
//! });
//! assert_eq!(obligation.value().unwrap(), 42);
//! ```
//!
//! [`Obligation::then`] chains a transform over a value that is not there
//! yet. The chain resolves lazily, on first read, inside the reading thread:
//!
//! ```
//! use obligation::Obligation;
//!
//! let (answer, writer) = Obligation::<i64, String>::create();
//! let leet = answer.then(|x| Ok(x - 5 + 1300));
//! writer.fulfill(42).unwrap();
//! assert_eq!(leet.value().unwrap(), 1337);
//! ```
//!
//! A transform may itself return an obligation; the chain then waits through
//! the inner obligation instead of nesting it. See [`Obligation::then`].

#![forbid(unsafe_code)]

mod cell;
mod dependent;

pub use crate::cell::{Obligation, Writer};
pub use crate::dependent::IntoObligation;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// How long [`Obligation::value`] waits before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an obligation is in its life. Settlement is one-way: a cell leaves
/// [`State::Pending`] at most once and never moves between the settled
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not settled yet; readers block.
    Pending,
    /// Settled with a result.
    Fulfilled,
    /// Settled with a failure cause.
    Rejected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Why a read came back empty-handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The obligation settled with a failure; carries the producer's cause.
    Rejected(E),
    /// The deadline passed while the obligation was still pending. The cell
    /// is untouched; a later read may still see it settle.
    Timeout,
    /// The writer was dropped without settling, so no result can ever
    /// arrive.
    WriterDropped,
}

impl<E> WaitError<E> {
    /// The rejection cause, when there is one.
    pub fn cause(&self) -> Option<&E> {
        match self {
            WaitError::Rejected(cause) => Some(cause),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for WaitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Rejected(cause) => write!(f, "obligation rejected: {cause}"),
            WaitError::Timeout => f.write_str("timed out waiting on obligation"),
            WaitError::WriterDropped => {
                f.write_str("obligation writer dropped before settling")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for WaitError<E> {}

/// Attempted second settlement. Carries the state that got there first; the
/// original settlement stands.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("obligation already {0}")]
pub struct SettleError(pub State);
