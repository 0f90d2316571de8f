//! Crate-wide error type, built the way `failure` users always build one:
//! a `Fail` enum of distinguishable kinds, wrapped so a `Context` can be
//! attached at the point an underlying error is propagated upward.

use std::fmt;
use std::fmt::Display;

use failure::{Backtrace, Context, Fail};

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    /// A caller-supplied argument is structurally invalid (wrong enum
    /// variant for the chip, zero where a divisor is required, etc).
    #[fail(display = "invalid argument: {}", _0)]
    InvalidArgument(String),

    /// A computed or requested value falls outside a chip's documented
    /// operating range (PFD frequency, VCO band, output frequency).
    #[fail(display = "{} out of range: {} not in [{}; {}]", _0, _1, _2, _3)]
    OutOfRange(String, i64, i64, i64),

    /// A solver exhausted its search space without finding a divider
    /// combination meeting the required tolerance.
    #[fail(display = "no solution found for {}", _0)]
    NoSolution(String),

    /// A PLL failed to report lock within the allotted time budget.
    #[fail(display = "{} failed to lock within {:?}", _0, _1)]
    LockTimeout(String, std::time::Duration),

    /// The underlying bus transaction failed.
    #[fail(display = "bus I/O error: {}", _0)]
    IoError(String),

    /// A device probe did not find the expected part (device-ID mismatch).
    #[fail(display = "device not found: {}", _0)]
    NotFound(String),

    /// The requested mode/feature is recognized but not implemented for
    /// this chip (e.g. a DPLL mode missing its magic-constant table entry).
    #[fail(display = "unsupported: {}", _0)]
    Unsupported(String),
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.inner.get_context().clone()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
