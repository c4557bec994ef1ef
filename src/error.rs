//! Errors returned across the retry layer's boundary.
//!
//! Database failures are wrapped in a [`WrappedError`] whose message says
//! nothing about the database, so it can be handed to a remote caller as-is.
//! The driver error stays reachable through [`WrappedError::cause`] for code
//! that is allowed to see it.
//!
//! ```rust
//! use txretry::classify::{ErrorClass, ErrorCode};
//! use txretry::error::{Status, WrappedError};
//!
//! let err = WrappedError::new(
//!     std::io::Error::other("Deadlock found when trying to get lock on `orders`"),
//!     Some(ErrorCode::Number(1213)),
//!     ErrorClass::AlwaysRetryable,
//! );
//!
//! assert_eq!(err.status(), Status::Aborted);
//! assert!(!err.to_string().contains("orders"));
//! assert!(err.cause().to_string().contains("orders"));
//! ```

use std::error::Error as StdError;
use std::fmt;

use crate::classify::{self, ErrorClass, ErrorCode};
use crate::driver::{Dialect, Sentinel};

/// Error produced by the wrapped handles and the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The query returned no rows.
    #[error("no rows in result set")]
    RowNotFound,
    /// The transaction was already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TxDone,
    /// The call was cancelled while waiting to retry.
    #[error("operation cancelled")]
    Cancelled,
    /// The call's deadline passed while waiting to retry.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Any other database failure, with its detail hidden.
    #[error("{0}")]
    Backend(#[source] WrappedError),
}

impl DbError {
    /// Wrap a raw driver error, passing sentinels through as their own variants.
    pub fn from_driver<D: Dialect>(err: D::Error) -> Self {
        match D::sentinel(&err) {
            Some(Sentinel::RowNotFound) => DbError::RowNotFound,
            Some(Sentinel::TxDone) => DbError::TxDone,
            None => {
                let code = classify::locate_code::<D>(&err);
                let class = D::CODES.classify(code.as_ref());
                DbError::Backend(WrappedError::new(err, code, class))
            }
        }
    }

    /// Returns `true` for [`DbError::RowNotFound`].
    pub fn is_row_not_found(&self) -> bool {
        matches!(self, DbError::RowNotFound)
    }

    /// The wrapped backend error, if this is one.
    pub fn as_wrapped(&self) -> Option<&WrappedError> {
        match self {
            DbError::Backend(wrapped) => Some(wrapped),
            _ => None,
        }
    }

    /// Externally visible status of this error.
    pub fn status(&self) -> Status {
        match self {
            DbError::RowNotFound => Status::NotFound,
            DbError::TxDone => Status::Internal,
            DbError::Cancelled => Status::Cancelled,
            DbError::DeadlineExceeded => Status::DeadlineExceeded,
            DbError::Backend(wrapped) => wrapped.status(),
        }
    }
}

/// Coarse outcome category exposed at service boundaries instead of the
/// driver's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The transaction was aborted by the server; the caller may try again.
    Aborted,
    /// The database is not reachable right now.
    Unavailable,
    /// Any other failure.
    Internal,
    /// No matching row.
    NotFound,
    /// The caller cancelled the operation.
    Cancelled,
    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl Status {
    /// Generic, non-sensitive message for this status.
    pub fn message(&self) -> &'static str {
        match self {
            Status::Aborted => "database transaction aborted",
            Status::Unavailable => "database unavailable",
            Status::Internal => "database error",
            Status::NotFound => "not found",
            Status::Cancelled => "cancelled",
            Status::DeadlineExceeded => "deadline exceeded",
        }
    }
}

impl From<ErrorClass> for Status {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::AlwaysRetryable => Status::Aborted,
            ErrorClass::RetryableIfSafe => Status::Unavailable,
            ErrorClass::Fatal => Status::Internal,
        }
    }
}

/// A database error with its detail withheld from `Display` and `source()`.
pub struct WrappedError {
    cause: Box<dyn StdError + Send + Sync + 'static>,
    code: Option<ErrorCode>,
    class: ErrorClass,
}

impl WrappedError {
    /// Wrap a driver error with its located code and class.
    pub fn new(
        cause: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
        code: Option<ErrorCode>,
        class: ErrorClass,
    ) -> Self {
        Self {
            cause: cause.into(),
            code,
            class,
        }
    }

    /// Backend code found in the cause, if any.
    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }

    /// Retry class assigned when the error was wrapped.
    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// Status shown to external callers.
    pub fn status(&self) -> Status {
        self.class.into()
    }

    /// The original driver error.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.cause
    }

    /// The original driver error, if it is a `T`.
    pub fn downcast_cause<T: StdError + 'static>(&self) -> Option<&T> {
        self.cause.downcast_ref::<T>()
    }

    /// Consume the wrapper, returning the original driver error.
    pub fn into_cause(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.cause
    }
}

impl fmt::Display for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().message())
    }
}

impl fmt::Debug for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedError")
            .field("class", &self.class)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl StdError for WrappedError {}

/// Full internal description of an error, including any withheld cause.
///
/// Used for reports, which go to operators rather than remote callers.
pub(crate) fn detail(err: &(dyn StdError + 'static)) -> String {
    let mut parts = Vec::new();
    for link in classify::chain(err) {
        if let Some(wrapped) = link.downcast_ref::<WrappedError>() {
            let cause: &(dyn StdError + 'static) = wrapped.cause();
            parts.extend(classify::chain(cause).map(|e| e.to_string()));
            if let Some(code) = wrapped.code() {
                parts.push(code.to_string());
            }
        } else if !is_backend(link) {
            // DbError::Backend only repeats the redacted message.
            parts.push(link.to_string());
        }
    }
    parts.join(": ")
}

/// Whether a [`DbError::RowNotFound`] is anywhere in the chain.
pub(crate) fn is_row_not_found(err: &(dyn StdError + 'static)) -> bool {
    classify::chain(err)
        .filter_map(|link| link.downcast_ref::<DbError>())
        .any(DbError::is_row_not_found)
}

fn is_backend(err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<DbError>()
        .is_some_and(|db| db.as_wrapped().is_some())
}
