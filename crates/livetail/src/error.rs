//! Error types for change tailing and live queries
//!
//! Two SQLSTATE codes get dedicated handling: `58P01` means the wal2json
//! output plugin is not installed, a fatal configuration error; `42704` means
//! the replication slot has disappeared, which the slot manager recovers
//! from once per poll.

use std::sync::Arc;
use thiserror::Error;

/// SQLSTATE reported when the server cannot load the wal2json output plugin.
pub const SQLSTATE_UNDEFINED_FILE: &str = "58P01";

/// SQLSTATE reported when the replication slot no longer exists.
pub const SQLSTATE_UNDEFINED_OBJECT: &str = "42704";

/// Errors produced by change streams and live query runners
#[derive(Error, Debug)]
pub enum Error {
    /// The wal2json logical decoding plugin is not installed on the server
    #[error("wal2json logical decoding plugin is not installed on the server")]
    PluginMissing,

    /// Database error, with the SQLSTATE when the server reported one
    #[error("database error: {message}")]
    Db {
        /// Five-character SQLSTATE, if the error came from the server
        code: Option<String>,
        /// Driver-rendered message
        message: String,
    },

    /// Connection pool error
    #[error("pool error: {0}")]
    Pool(String),

    /// The decoded slot payload did not have the expected wal2json shape
    #[error("malformed change payload: {0}")]
    Decode(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The user-supplied query rejected
    #[error("query failed: {0}")]
    Query(anyhow::Error),

    /// A user-supplied change handler rejected
    #[error("change handler failed: {0}")]
    Handler(anyhow::Error),

    /// The upstream change stream terminated with an error
    #[error("change stream failed: {0}")]
    Upstream(Arc<Error>),
}

impl Error {
    /// Create a database error carrying an optional SQLSTATE
    pub fn db(code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Db {
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Create a pool error
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The SQLSTATE attached to this error, if any
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Db { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether this error means the replication slot no longer exists
    pub fn is_slot_missing(&self) -> bool {
        self.sqlstate() == Some(SQLSTATE_UNDEFINED_OBJECT)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        let code = e.as_db_error().map(|db| db.code().code().to_string());
        Self::Db {
            code,
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for Error {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

/// Result type for livetail operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
