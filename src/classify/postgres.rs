//! PostgreSQL SQLSTATE codes.

use std::borrow::Cow;

use super::{CodeEntry, CodeTable, ErrorCode};

const fn state(code: &'static str) -> ErrorCode {
    ErrorCode::SqlState(Cow::Borrowed(code))
}

/// Retry table for PostgreSQL servers.
pub const CODES: CodeTable = CodeTable {
    backend: "postgres",
    entries: &[
        CodeEntry::always(state("40001"), "serialization_failure"),
        CodeEntry::always(state("40P01"), "deadlock_detected"),
        CodeEntry::always(state("55P03"), "lock_not_available"),
        CodeEntry::if_safe(state("08000"), "connection_exception"),
        CodeEntry::if_safe(state("08001"), "sqlclient_unable_to_establish_sqlconnection"),
        CodeEntry::if_safe(state("08003"), "connection_does_not_exist"),
        CodeEntry::if_safe(state("08004"), "sqlserver_rejected_establishment_of_sqlconnection"),
        CodeEntry::if_safe(state("08006"), "connection_failure"),
        CodeEntry::if_safe(state("57P01"), "admin_shutdown"),
        CodeEntry::if_safe(state("57P02"), "crash_shutdown"),
        CodeEntry::if_safe(state("57P03"), "cannot_connect_now"),
    ],
    connection_lost: state("08006"),
};

/// [`Dialect`](crate::driver::Dialect) for `sqlx` PostgreSQL connections.
#[cfg(feature = "postgres")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxPostgres;

#[cfg(feature = "postgres")]
impl crate::driver::Dialect for SqlxPostgres {
    type Error = sqlx::Error;

    const CODES: &'static CodeTable = &CODES;

    fn error_code(err: &sqlx::Error) -> Option<ErrorCode> {
        match err {
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| ErrorCode::sql_state(code.into_owned())),
            _ => None,
        }
    }

    fn sentinel(err: &sqlx::Error) -> Option<crate::driver::Sentinel> {
        matches!(err, sqlx::Error::RowNotFound).then_some(crate::driver::Sentinel::RowNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClass;

    #[test]
    fn test_serialization_failures_always_retryable() {
        for code in ["40001", "40P01", "55P03"] {
            assert_eq!(
                CODES.classify(Some(&ErrorCode::sql_state(code))),
                ErrorClass::AlwaysRetryable
            );
        }
    }

    #[test]
    fn test_runtime_sql_state_matches_static_entry() {
        let owned = ErrorCode::sql_state(String::from("57P01"));
        assert_eq!(CODES.classify(Some(&owned)), ErrorClass::RetryableIfSafe);
    }

    #[test]
    fn test_unique_violation_is_fatal() {
        assert_eq!(
            CODES.classify(Some(&ErrorCode::sql_state("23505"))),
            ErrorClass::Fatal
        );
    }

    #[derive(Debug, thiserror::Error)]
    enum PgError {
        #[error("ERROR: {message} (SQLSTATE {state})")]
        Server { state: &'static str, message: &'static str },
        #[error("reading message")]
        Io(#[source] std::io::Error),
    }

    struct PgDialect;

    impl crate::driver::Dialect for PgDialect {
        type Error = PgError;

        const CODES: &'static CodeTable = &CODES;

        fn error_code(err: &PgError) -> Option<ErrorCode> {
            match err {
                PgError::Server { state, .. } => Some(ErrorCode::sql_state(*state)),
                PgError::Io(_) => None,
            }
        }
    }

    #[test]
    fn test_sql_state_dialect_classifies_through_wrapping() {
        use crate::classify::classify;
        use crate::error::DbError;

        let serialization = PgError::Server {
            state: "40001",
            message: "could not serialize access due to concurrent update",
        };
        assert_eq!(
            classify::<PgDialect>(&serialization),
            ErrorClass::AlwaysRetryable
        );

        let wrapped = DbError::from_driver::<PgDialect>(PgError::Server {
            state: "57P01",
            message: "terminating connection due to administrator command",
        });
        assert_eq!(classify::<PgDialect>(&wrapped), ErrorClass::RetryableIfSafe);
        assert_eq!(
            wrapped.as_wrapped().and_then(|w| w.code()),
            Some(&state("57P01"))
        );

        let eof = DbError::from_driver::<PgDialect>(PgError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        )));
        assert_eq!(
            eof.as_wrapped().and_then(|w| w.code()),
            Some(&state("08006"))
        );
        assert_eq!(classify::<PgDialect>(&eof), ErrorClass::RetryableIfSafe);

        let unique = PgError::Server {
            state: "23505",
            message: "duplicate key value violates unique constraint",
        };
        assert_eq!(classify::<PgDialect>(&unique), ErrorClass::Fatal);
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_sqlx_eof_is_connection_failure() {
        use crate::classify::locate_code;
        use std::io;

        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert_eq!(locate_code::<SqlxPostgres>(&err), Some(state("08006")));
    }
}
