//! Gateway Runtime Error Hierarchy
//!
//! Defines the error types for the gateway core, categorized by subsystem:
//! configuration schema, namespace registration, stream protocol, budget
//! accounting, configuration watching and label storage.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Routing-document schema violations (unknown type, malformed options,
    /// unresolved reference)
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Namespace registration / hot-reload failures
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Stream protocol violations and per-stream resource failures
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Credit/budget accounting failures
    #[error(transparent)]
    Budget(#[from] BudgetError),

    /// Configuration source watching failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Label registry storage failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Engine settings loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine settings validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable startup failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Violations of the routing-document schema, reported by `parse`.
///
/// A schema error never tears down the running configuration; the previous
/// namespace graph stays active.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown {kind} type '{name}'")]
    UnknownType { kind: &'static str, name: String },

    #[error("Malformed options for binding '{binding}': {detail}")]
    MalformedOptions { binding: String, detail: String },

    #[error("Unresolved reference '{reference}' from '{from}'")]
    UnresolvedReference { from: String, reference: String },

    #[error("Duplicate name '{0}'")]
    DuplicateName(String),

    #[error("Document decode failed: {0}")]
    Decode(String),
}

/// Failures while applying a namespace graph to the dispatch agents.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// A dispatch agent's control queue is gone (worker died or stopped)
    #[error("Dispatch agent {worker} unavailable")]
    AgentUnavailable { worker: usize },

    /// A binding could not open its listening resource
    #[error("Binding '{binding}' failed to attach: {detail}")]
    AttachFailed { binding: String, detail: String },

    /// An agent rejected the namespace
    #[error("Namespace registration rejected: {0}")]
    Rejected(String),

    /// Restoring the previous configuration after a failed swap also failed
    #[error("Rollback failed after registration error: {0}")]
    RollbackFailed(String),
}

/// Stream-scoped failures. These resolve to `reset`/`abort` of the offending
/// stream pair and never terminate the worker thread.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Frame {frame} illegal in state {state} on stream {stream_id:#x}")]
    InvalidTransition {
        stream_id: u64,
        state: &'static str,
        frame: &'static str,
    },

    #[error("Frame received after terminal state on stream {0:#x}")]
    AfterTerminal(u64),

    #[error("Unknown stream {0:#x}")]
    UnknownStream(u64),

    #[error("Unknown binding {0:#x}")]
    UnknownBinding(u64),

    #[error("Worker {worker} stream capacity reached")]
    WorkerCapacity { worker: usize },

    #[error("Buffer pool exhausted")]
    PoolExhausted,

    #[error("No route matched on binding '{binding}'")]
    NoRoute { binding: String },

    #[error("Handler failure: {0}")]
    Handler(String),

    #[error("Stream I/O failure: {0}")]
    Io(String),
}

/// Budget ledger lookup failures. Ordinary underflow is not an error: a
/// debit that would underflow returns `false` and stalls the caller.
#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error("Unknown budget {0:#x}")]
    UnknownBudget(u64),
}

/// Configuration-source watcher failures.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Watch source '{url}' failed: {detail}")]
    Source { url: String, detail: String },

    #[error("Unsupported watch source scheme: {0}")]
    UnsupportedScheme(String),
}

/// Label registry storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error("Label table corrupt: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------
// Conversions

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(StorageError::Sled(e))
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        SchemaError::Decode(e.to_string())
    }
}

impl From<serde_yaml::Error> for SchemaError {
    fn from(e: serde_yaml::Error) -> Self {
        SchemaError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Schema(SchemaError::Decode(e.to_string()))
    }
}
