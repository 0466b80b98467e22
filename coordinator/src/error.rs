use std::{fmt, io, time::Duration};

use comms::ProtocolErr;

/// The coordinator's result type.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// All errors that can occur while coordinating a worker pool.
///
/// None of them is recovered from: a round that fails leaves the pool in an
/// undefined state and the only way forward is to create a new one.
#[derive(Debug)]
pub enum CoordinatorError {
    /// Invalid configuration, caught before spawning anything.
    InvalidConfig(String),
    /// A worker process failed to start or the group can't have the requested size.
    Spawn {
        detail: String,
        source: Option<io::Error>,
    },
    /// A worker's frames disagree with the schema of the task in flight.
    Protocol { worker: usize, source: ProtocolErr },
    /// A round finished with missing, duplicated or malformed per worker results.
    Aggregation { worker: usize, detail: String },
    /// The dataset or the mixture parameters disagree with the declared dimensions.
    ShapeMismatch(String),
    /// A worker didn't answer within the configured receive timeout.
    WorkerTimeout { worker: usize, after: Duration },
    /// The round was cancelled while waiting on a worker.
    Cancelled { worker: usize },
    /// The pool was used out of order, e.g. a round before initialization.
    InvalidState(String),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl CoordinatorError {
    /// Attributes a codec failure to `worker`.
    ///
    /// Error frames sent by the worker and hang ups are reported as aggregation
    /// failures, everything else stays a protocol violation.
    pub(crate) fn from_protocol(worker: usize, err: ProtocolErr) -> Self {
        match err {
            ProtocolErr::Remote(detail) => Self::Aggregation { worker, detail },
            ProtocolErr::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => Self::Aggregation {
                worker,
                detail: "worker closed its channel mid round".into(),
            },
            ProtocolErr::Io(e) => Self::Io(e),
            e @ ProtocolErr::ResultCount { .. } => Self::Aggregation {
                worker,
                detail: e.to_string(),
            },
            source => Self::Protocol { worker, source },
        }
    }

    pub(crate) fn aggregation(worker: usize, detail: impl Into<String>) -> Self {
        Self::Aggregation {
            worker,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Spawn {
                detail,
                source: Some(source),
            } => write!(f, "spawn failed: {detail}: {source}"),
            Self::Spawn { detail, .. } => write!(f, "spawn failed: {detail}"),
            Self::Protocol { worker, source } => {
                write!(f, "protocol violation by worker {worker}: {source}")
            }
            Self::Aggregation { worker, detail } => {
                write!(f, "aggregation failed for worker {worker}: {detail}")
            }
            Self::ShapeMismatch(msg) => write!(f, "shape mismatch: {msg}"),
            Self::WorkerTimeout { worker, after } => {
                write!(f, "worker {worker} did not respond within {after:?}")
            }
            Self::Cancelled { worker } => write!(f, "round cancelled while waiting on worker {worker}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn {
                source: Some(source),
                ..
            } => Some(source),
            Self::Protocol { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CoordinatorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
