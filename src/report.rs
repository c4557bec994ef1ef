//! Reporting of errors seen while running a call.
//!
//! The retry loop decides *when* and at *what severity* an error is reported;
//! a [`Reporter`] decides where the report goes. Reports for one call are
//! collected while it runs and handed to the reporter in order once it ends:
//! every transient error at [`Severity::Warning`], the error the caller
//! receives at [`Severity::Error`].

use std::error::Error as StdError;
use std::fmt;

use crate::classify::ErrorClass;
use crate::error::detail;

/// How serious a report is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    /// A failure that was absorbed by a retry.
    Warning,
    /// The failure returned to the caller.
    Error,
}

/// One error seen during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Report {
    /// Severity of the report.
    pub severity: Severity,
    /// Attempt the error was seen on (0-based).
    pub attempt: u32,
    /// Retry class of the error.
    pub class: ErrorClass,
    /// Offending statement text, when the error came from a statement.
    pub statement: Option<String>,
    /// Debug rendering of the statement arguments.
    pub args: Option<String>,
    /// Full internal description, including the driver's message.
    pub message: String,
}

impl Report {
    pub(crate) fn new(class: ErrorClass, err: &(dyn StdError + 'static)) -> Self {
        Self {
            severity: Severity::Error,
            attempt: 0,
            class,
            statement: None,
            args: None,
            message: detail(err),
        }
    }

    pub(crate) fn with_statement(mut self, sql: &str, args: Option<&dyn fmt::Debug>) -> Self {
        self.statement = Some(sql.to_string());
        self.args = args.map(|args| format!("{:?}", args));
        self
    }

    /// Whether this report was made from `err`, possibly seen through
    /// layers of the caller's own error types.
    pub(crate) fn describes(&self, err: &(dyn StdError + 'static)) -> bool {
        detail(err).ends_with(&self.message)
    }

    pub(crate) fn at(mut self, attempt: u32, severity: Severity) -> Self {
        self.attempt = attempt;
        self.severity = severity;
        self
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.statement, &self.args) {
            (Some(sql), Some(args)) => {
                write!(f, "Query ({}) (args: {}) failed: {}", sql, args, self.message)
            }
            (Some(sql), None) => write!(f, "Query ({}) failed: {}", sql, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Sink for reports.
pub trait Reporter: Send + Sync {
    /// Record one report.
    fn report(&self, report: &Report);
}

impl<F> Reporter for F
where
    F: Fn(&Report) + Send + Sync,
{
    fn report(&self, report: &Report) {
        self(report)
    }
}

/// Default reporter: one `tracing` event per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, report: &Report) {
        let statement = report.statement.as_deref().unwrap_or_default();
        let args = report.args.as_deref().unwrap_or_default();
        match report.severity {
            Severity::Warning => tracing::warn!(
                attempt = report.attempt,
                class = %report.class,
                statement,
                args,
                "{}",
                report.message
            ),
            Severity::Error => tracing::error!(
                attempt = report.attempt,
                class = %report.class,
                statement,
                args,
                "{}",
                report.message
            ),
        }
    }
}
