use std::fmt;
use std::future::Future;

use crate::error::Result;

/// Outcome of applying one statement locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Insert,
    Update,
    Delete,
    OtherSuccess,
    Failure(String),
}

impl ApplyOutcome {
    /// Successful outcome for a statement that ran without error.
    pub fn success(statement: &str) -> Self {
        match StatementKind::of(statement) {
            StatementKind::Insert => ApplyOutcome::Insert,
            StatementKind::Update => ApplyOutcome::Update,
            StatementKind::Delete => ApplyOutcome::Delete,
            StatementKind::Other => ApplyOutcome::OtherSuccess,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ApplyOutcome::Failure(_))
    }
}

/// Statement verb, taken from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    pub fn of(statement: &str) -> Self {
        let keyword = statement
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("");

        if keyword.eq_ignore_ascii_case("insert") {
            StatementKind::Insert
        } else if keyword.eq_ignore_ascii_case("update") {
            StatementKind::Update
        } else if keyword.eq_ignore_ascii_case("delete") {
            StatementKind::Delete
        } else {
            StatementKind::Other
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Applies decoded statements to the local database.
///
/// `apply` is only called between `begin` and `commit`. Errors from `begin`
/// and `commit` are fatal; a statement error is reported as
/// [`ApplyOutcome::Failure`] and must leave the transaction usable.
pub trait Executor: Send {
    fn begin(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn apply(&mut self, statement: &str) -> impl Future<Output = ApplyOutcome> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;
}
