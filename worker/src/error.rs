use std::{error::Error, fmt, io};

use comms::ProtocolErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Protocol(ProtocolErr),
    /// The numeric kernel couldn't evaluate a unit, e.g. a singular covariance.
    Kernel(String),
    UnknownDataset {
        local_index: usize,
        loaded: usize,
    },
    InvalidConfig(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Protocol(e) => write!(f, "protocol error: {e}"),
            WorkerErr::Kernel(detail) => write!(f, "kernel error: {detail}"),
            WorkerErr::UnknownDataset {
                local_index,
                loaded,
            } => write!(
                f,
                "unknown dataset {local_index}: only {loaded} dataset(s) loaded"
            ),
            WorkerErr::InvalidConfig(detail) => write!(f, "invalid config: {detail}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ProtocolErr> for WorkerErr {
    fn from(value: ProtocolErr) -> Self {
        match value {
            ProtocolErr::Io(e) => Self::Io(e),
            other => Self::Protocol(other),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
