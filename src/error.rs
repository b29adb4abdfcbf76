//! Error types for the carrel library.
//!
//! All fallible operations return [`Result`], with [`CarrelError`] covering
//! configuration problems, unsupported query relations, store failures and
//! batch sort/merge failures.
//!
//! # Examples
//!
//! ```
//! use carrel::error::{CarrelError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(CarrelError::config("prox_ints must be 2 or 3"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for carrel operations.
///
/// Uses the `thiserror` crate for automatic `Error` trait implementation and
/// provides convenient constructor methods for creating specific error types.
#[derive(Error, Debug)]
pub enum CarrelError {
    /// I/O errors (spool files, spill runs, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid index or store configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A query relation the target index variant cannot evaluate
    #[error("Unsupported relation '{relation}' for term '{term}'")]
    UnsupportedRelation {
        /// The relation that was requested.
        relation: String,
        /// The query term it was applied to.
        term: String,
    },

    /// An object (index, side store) registered twice under one name
    #[error("Duplicate object: {0}")]
    DuplicateObject(String),

    /// The backing posting store rejected or failed an operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Batch sort or merge failure during commit
    #[error("Sort/merge error: {0}")]
    SortOrMerge(String),

    /// Query evaluation errors (bad masks, missing position data, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Operation cancelled via a cancellation token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid operation for the current index state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with CarrelError.
pub type Result<T> = std::result::Result<T, CarrelError>;

impl CarrelError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        CarrelError::Config(msg.into())
    }

    /// Create a new unsupported-relation error.
    pub fn unsupported_relation<R: Into<String>, T: Into<String>>(relation: R, term: T) -> Self {
        CarrelError::UnsupportedRelation {
            relation: relation.into(),
            term: term.into(),
        }
    }

    /// Create a new duplicate-object error.
    pub fn duplicate<S: Into<String>>(msg: S) -> Self {
        CarrelError::DuplicateObject(msg.into())
    }

    /// Create a new store error.
    pub fn store<S: Into<String>>(msg: S) -> Self {
        CarrelError::StoreUnavailable(msg.into())
    }

    /// Create a new sort/merge error.
    pub fn sort_or_merge<S: Into<String>>(msg: S) -> Self {
        CarrelError::SortOrMerge(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        CarrelError::Query(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        CarrelError::Cancelled(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        CarrelError::Timeout(msg.into())
    }

    /// Create a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        CarrelError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        CarrelError::Other(msg.into())
    }
}
