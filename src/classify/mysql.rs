//! MySQL / MariaDB error numbers.

use super::{CodeEntry, CodeTable, ErrorCode};

/// Client-side "Lost connection to MySQL server during query".
pub const CR_SERVER_LOST: u16 = 2013;

/// Retry table for MySQL and MariaDB servers.
pub const CODES: CodeTable = CodeTable {
    backend: "mysql",
    entries: &[
        CodeEntry::always(ErrorCode::Number(1205), "lock wait timeout exceeded"),
        CodeEntry::always(ErrorCode::Number(1213), "deadlock found when trying to get lock"),
        CodeEntry::always(ErrorCode::Number(1412), "table definition has changed"),
        CodeEntry::always(ErrorCode::Number(1587), "too many files opened"),
        CodeEntry::always(ErrorCode::Number(1613), "XA_RBTIMEOUT: transaction branch took too long"),
        CodeEntry::always(ErrorCode::Number(1614), "XA_RBDEADLOCK: transaction branch deadlocked"),
        CodeEntry::always(ErrorCode::Number(1637), "too many active concurrent transactions"),
        CodeEntry::always(ErrorCode::Number(1689), "lock wait aborted by pending exclusive lock"),
        CodeEntry::always(ErrorCode::Number(3058), "deadlock on user-level lock"),
        CodeEntry::if_safe(ErrorCode::Number(1053), "server shutdown in progress"),
        CodeEntry::if_safe(ErrorCode::Number(1077), "normal shutdown"),
        CodeEntry::if_safe(ErrorCode::Number(1078), "got signal, aborting"),
        CodeEntry::if_safe(ErrorCode::Number(1079), "shutdown complete"),
        CodeEntry::if_safe(ErrorCode::Number(2006), "server has gone away"),
        CodeEntry::if_safe(ErrorCode::Number(CR_SERVER_LOST), "lost connection during query"),
    ],
    connection_lost: ErrorCode::Number(CR_SERVER_LOST),
};

/// [`Dialect`](crate::driver::Dialect) for `sqlx` MySQL connections.
#[cfg(feature = "mysql")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxMySql;

#[cfg(feature = "mysql")]
impl crate::driver::Dialect for SqlxMySql {
    type Error = sqlx::Error;

    const CODES: &'static CodeTable = &CODES;

    fn error_code(err: &sqlx::Error) -> Option<ErrorCode> {
        match err {
            sqlx::Error::Database(db) => db
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .map(|e| ErrorCode::Number(e.number())),
            _ => None,
        }
    }

    fn sentinel(err: &sqlx::Error) -> Option<crate::driver::Sentinel> {
        matches!(err, sqlx::Error::RowNotFound).then_some(crate::driver::Sentinel::RowNotFound)
    }
}
