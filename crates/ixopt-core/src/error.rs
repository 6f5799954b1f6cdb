//! Error type shared by the range analysis and plan search.
//!
//! Most unusual situations are *not* errors: an unsargable predicate, a
//! strategy that does not apply or a tree that grew past its weight limit all
//! degrade to "less restrictive" results. Only conditions that abort the whole
//! optimization of a table are reported through [`OptError`].

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptError {
    /// An allocation for interval nodes or plan state failed.
    #[error("out of memory while building range structures")]
    OutOfMemory,

    /// The statement was cancelled while the optimizer was running.
    #[error("optimization was killed")]
    Killed,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table {table}")]
    UnknownColumn { table: String, column: String },

    /// Index sets are tracked in a fixed-width bitmap.
    #[error("table {table} has {count} indexes, at most {max} are supported")]
    TooManyIndexes {
        table: String,
        count: usize,
        max: usize,
    },
}

pub type OptResult<T> = Result<T, OptError>;
