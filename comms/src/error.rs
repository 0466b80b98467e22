use std::{error::Error, fmt, io};

use crate::msg::{Kind, Tag};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, ProtocolErr>;

/// Violations of the agreed frame sequence, plus the transport failures underneath it.
#[derive(Debug)]
pub enum ProtocolErr {
    Io(io::Error),
    UnexpectedTag {
        schema: &'static str,
        expected: Tag,
        got: Tag,
    },
    UnexpectedKind {
        tag: Tag,
        expected: Kind,
        got: Kind,
    },
    LengthMismatch {
        tag: Tag,
        expected: usize,
        got: usize,
    },
    InvalidValue {
        tag: Tag,
        value: i64,
    },
    UnknownTask(i32),
    /// The peer announced a different amount of results than it was given units.
    ResultCount {
        expected: usize,
        got: usize,
    },
    SchemaExhausted {
        schema: &'static str,
    },
    Incomplete {
        schema: &'static str,
        written: usize,
        expected: usize,
    },
    /// The peer sent an error frame in place of the expected field.
    Remote(String),
}

impl fmt::Display for ProtocolErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolErr::Io(e) => write!(f, "io error: {e}"),
            ProtocolErr::UnexpectedTag {
                schema,
                expected,
                got,
            } => write!(f, "unexpected tag in {schema}: got {got}, expected {expected}"),
            ProtocolErr::UnexpectedKind { tag, expected, got } => {
                write!(f, "unexpected kind for {tag}: got {got:?}, expected {expected:?}")
            }
            ProtocolErr::LengthMismatch { tag, expected, got } => {
                write!(f, "length mismatch for {tag}: got {got}, expected {expected}")
            }
            ProtocolErr::InvalidValue { tag, value } => {
                write!(f, "invalid value {value} for {tag}")
            }
            ProtocolErr::UnknownTask(code) => write!(f, "unknown task selector {code}"),
            ProtocolErr::ResultCount { expected, got } => {
                write!(f, "{got} result(s) announced, {expected} unit(s) were sent")
            }
            ProtocolErr::SchemaExhausted { schema } => {
                write!(f, "no fields left in {schema}")
            }
            ProtocolErr::Incomplete {
                schema,
                written,
                expected,
            } => write!(
                f,
                "{schema} left incomplete: {written} of {expected} fields"
            ),
            ProtocolErr::Remote(detail) => write!(f, "peer reported: {detail}"),
        }
    }
}

impl Error for ProtocolErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtocolErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ProtocolErr> for io::Error {
    fn from(value: ProtocolErr) -> Self {
        match value {
            ProtocolErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
