//! Error classification for retry decisions.
//!
//! Every error that reaches the retry loop is mapped to one of three
//! [`ErrorClass`]es. The mapping is data: each backend contributes a
//! [`CodeTable`] listing the codes it considers transient, and
//! [`classify`] walks an error's `source()` chain to find the code.
//!
//! ```rust
//! use txretry::classify::{mysql, postgres, ErrorClass, ErrorCode};
//!
//! assert_eq!(
//!     mysql::CODES.classify(Some(&ErrorCode::Number(1213))),
//!     ErrorClass::AlwaysRetryable
//! );
//! assert_eq!(
//!     postgres::CODES.classify(Some(&ErrorCode::sql_state("57P01"))),
//!     ErrorClass::RetryableIfSafe
//! );
//! assert_eq!(postgres::CODES.classify(None), ErrorClass::Fatal);
//! ```

pub mod mysql;
pub mod postgres;

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::driver::Dialect;
use crate::error::{DbError, WrappedError};

/// Semantic retry class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorClass {
    /// The transaction was rolled back by the server (deadlock, lock wait
    /// timeout, serialization failure). Retrying can never double-apply.
    AlwaysRetryable,
    /// The server or connection went away. Retry only when no commit was
    /// attempted or the work is idempotent.
    RetryableIfSafe,
    /// Everything else, including errors produced by the caller's own code.
    Fatal,
}

impl ErrorClass {
    /// Short lowercase name, used in reports and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::AlwaysRetryable => "always_retryable",
            ErrorClass::RetryableIfSafe => "retryable_if_safe",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend error code located inside a driver error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Five character SQLSTATE, as reported by PostgreSQL.
    SqlState(Cow<'static, str>),
    /// Numeric server or client error number, as reported by MySQL/MariaDB.
    Number(u16),
}

impl ErrorCode {
    /// Build a SQLSTATE code from a runtime string.
    pub fn sql_state(code: impl Into<Cow<'static, str>>) -> Self {
        ErrorCode::SqlState(code.into())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::SqlState(state) => write!(f, "SQLSTATE {}", state),
            ErrorCode::Number(n) => write!(f, "error {}", n),
        }
    }
}

/// One row of a [`CodeTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    /// The backend code.
    pub code: ErrorCode,
    /// Class assigned to errors carrying this code.
    pub class: ErrorClass,
    /// Server-side meaning of the code.
    pub meaning: &'static str,
}

impl CodeEntry {
    /// Shorthand for an [`ErrorClass::AlwaysRetryable`] entry.
    pub const fn always(code: ErrorCode, meaning: &'static str) -> Self {
        Self {
            code,
            class: ErrorClass::AlwaysRetryable,
            meaning,
        }
    }

    /// Shorthand for an [`ErrorClass::RetryableIfSafe`] entry.
    pub const fn if_safe(code: ErrorCode, meaning: &'static str) -> Self {
        Self {
            code,
            class: ErrorClass::RetryableIfSafe,
            meaning,
        }
    }
}

/// The backend-specific knowledge of the whole crate.
///
/// Codes missing from `entries` classify as [`ErrorClass::Fatal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    /// Backend name, for diagnostics.
    pub backend: &'static str,
    /// Transient codes and their classes.
    pub entries: &'static [CodeEntry],
    /// Code standing in for a connection severed mid-read.
    pub connection_lost: ErrorCode,
}

impl CodeTable {
    /// Look up the class of a code. Absent codes are fatal.
    pub fn classify(&self, code: Option<&ErrorCode>) -> ErrorClass {
        code.and_then(|code| self.entry(code))
            .map_or(ErrorClass::Fatal, |entry| entry.class)
    }

    /// Find the table entry for a code.
    pub fn entry(&self, code: &ErrorCode) -> Option<&CodeEntry> {
        self.entries.iter().find(|entry| &entry.code == code)
    }
}

/// Classify an error that reached the retry loop.
///
/// The `source()` chain is walked from the outermost error inward. The first
/// link that is one of the following decides the class:
///
/// - a [`WrappedError`]: the class it was wrapped with
/// - another [`DbError`] (sentinel or cancellation): fatal
/// - the dialect's raw driver error: looked up in `D::CODES`
/// - an [`io::Error`] of kind `UnexpectedEof`: the connection-lost class
///
/// Anything else is fatal.
pub fn classify<D: Dialect>(err: &(dyn StdError + 'static)) -> ErrorClass {
    for link in chain(err) {
        if let Some(wrapped) = link.downcast_ref::<WrappedError>() {
            return wrapped.class();
        }
        if let Some(db) = link.downcast_ref::<DbError>() {
            if let DbError::Backend(wrapped) = db {
                return wrapped.class();
            }
            return ErrorClass::Fatal;
        }
        if let Some(raw) = link.downcast_ref::<D::Error>() {
            if D::sentinel(raw).is_some() {
                return ErrorClass::Fatal;
            }
            if let Some(code) = locate_code::<D>(raw) {
                return D::CODES.classify(Some(&code));
            }
        }
        if is_eof(link) {
            return D::CODES.classify(Some(&D::CODES.connection_lost));
        }
    }
    ErrorClass::Fatal
}

/// Find the backend code of a raw driver error, treating a severed
/// connection as the table's connection-lost code.
pub fn locate_code<D: Dialect>(err: &D::Error) -> Option<ErrorCode> {
    D::error_code(err).or_else(|| {
        severed_connection(err).then(|| D::CODES.connection_lost.clone())
    })
}

/// Whether the connection was cut off mid-read somewhere in the chain.
pub fn severed_connection(err: &(dyn StdError + 'static)) -> bool {
    chain(err).any(is_eof)
}

fn is_eof(err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<io::Error>()
        .is_some_and(|io| io.kind() == io::ErrorKind::UnexpectedEof)
}

pub(crate) fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&e| e.source())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, MockDialect, MockError};

    #[derive(Debug, thiserror::Error)]
    enum AppError {
        #[error("db: {0}")]
        Db(#[from] DbError),
        #[error("order {0} not found")]
        UnknownOrder(u64),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("reading frame")]
    struct Framing(#[source] io::Error);

    #[test]
    fn test_unknown_code_is_fatal() {
        assert_eq!(
            mysql::CODES.classify(Some(&ErrorCode::Number(1062))),
            ErrorClass::Fatal
        );
        assert_eq!(mysql::CODES.classify(None), ErrorClass::Fatal);
    }

    #[test]
    fn test_wrapped_error_keeps_class() {
        let err = DbError::from_driver::<MockDialect>(Fault::Code(ErrorCode::Number(1205)).into());
        assert_eq!(classify::<MockDialect>(&err), ErrorClass::AlwaysRetryable);

        let app: AppError = err.into();
        assert_eq!(classify::<MockDialect>(&app), ErrorClass::AlwaysRetryable);
    }

    #[test]
    fn test_application_error_is_fatal() {
        assert_eq!(
            classify::<MockDialect>(&AppError::UnknownOrder(7)),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_sentinels_are_fatal() {
        assert_eq!(
            classify::<MockDialect>(&DbError::RowNotFound),
            ErrorClass::Fatal
        );
        let raw: MockError = Fault::RowNotFound.into();
        assert_eq!(classify::<MockDialect>(&raw), ErrorClass::Fatal);
    }

    #[test]
    fn test_raw_driver_error_is_located() {
        let raw: MockError = Fault::Code(ErrorCode::Number(1053)).into();
        assert_eq!(classify::<MockDialect>(&raw), ErrorClass::RetryableIfSafe);
    }

    #[test]
    fn test_eof_anywhere_in_chain_is_connection_lost() {
        let err = Framing(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(severed_connection(&err));
        assert_eq!(classify::<MockDialect>(&err), ErrorClass::RetryableIfSafe);

        let other = Framing(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(!severed_connection(&other));
        assert_eq!(classify::<MockDialect>(&other), ErrorClass::Fatal);
    }

    #[test]
    fn test_locate_code_maps_eof_to_connection_lost() {
        let raw: MockError = Fault::Eof.into();
        assert_eq!(
            locate_code::<MockDialect>(&raw),
            Some(mysql::CODES.connection_lost.clone())
        );
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Number(1213).to_string(), "error 1213");
        assert_eq!(ErrorCode::sql_state("40P01").to_string(), "SQLSTATE 40P01");
    }
}
