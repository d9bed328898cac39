use std::{error::Error, fmt, io};

use crate::variant::ModelVariant;

/// The offloader's result type.
pub type Result<T> = std::result::Result<T, OffloadErr>;

/// Offloader runtime failures.
#[derive(Debug)]
pub enum OffloadErr {
    Io(io::Error),
    Ml(machine_learning::MlErr),
    Store(String),
    /// The calibration run could not complete.
    Calibration(ExecutionErr),
    /// The local executor failed, either on the chosen path or during a fallback.
    LocalExecution(ExecutionErr),
    NotCalibrated,
    UnexpectedMessage {
        variant: ModelVariant,
        got: &'static str,
    },
    InvalidConfig(String),
    AlreadyJoined,
    Join(tokio::task::JoinError),
}

impl fmt::Display for OffloadErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffloadErr::Io(e) => write!(f, "io error: {e}"),
            OffloadErr::Ml(e) => write!(f, "model error: {e}"),
            OffloadErr::Store(detail) => write!(f, "sample store error: {detail}"),
            OffloadErr::Calibration(e) => write!(f, "calibration failed: {e}"),
            OffloadErr::LocalExecution(e) => write!(f, "local execution failed: {e}"),
            OffloadErr::NotCalibrated => write!(f, "no calibration baseline is stored"),
            OffloadErr::UnexpectedMessage { variant, got } => {
                write!(f, "unexpected message in the {variant} session: got {got}")
            }
            OffloadErr::InvalidConfig(detail) => write!(f, "invalid configuration: {detail}"),
            OffloadErr::AlreadyJoined => write!(f, "federated training was already joined"),
            OffloadErr::Join(e) => write!(f, "task failed: {e}"),
        }
    }
}

impl Error for OffloadErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OffloadErr::Io(e) => Some(e),
            OffloadErr::Ml(e) => Some(e),
            OffloadErr::Calibration(e) | OffloadErr::LocalExecution(e) => Some(e),
            OffloadErr::Join(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OffloadErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<machine_learning::MlErr> for OffloadErr {
    fn from(value: machine_learning::MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for OffloadErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<tokio::task::JoinError> for OffloadErr {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Join(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<OffloadErr> for io::Error {
    fn from(value: OffloadErr) -> Self {
        match value {
            OffloadErr::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// An error reported by a task executor.
///
/// Transient errors (network failures, an overloaded remote) are the ones the dispatcher
/// recovers from by running the task locally.
#[derive(Debug)]
pub enum ExecutionErr {
    Transient(String),
    Fatal(String),
}

impl ExecutionErr {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient(detail.into())
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal(detail.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionErr::Transient(_))
    }
}

impl fmt::Display for ExecutionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionErr::Transient(detail) => write!(f, "transient: {detail}"),
            ExecutionErr::Fatal(detail) => write!(f, "fatal: {detail}"),
        }
    }
}

impl Error for ExecutionErr {}

impl From<io::Error> for ExecutionErr {
    fn from(value: io::Error) -> Self {
        use io::ErrorKind::*;

        match value.kind() {
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
            | TimedOut | UnexpectedEof | WouldBlock | Interrupted => {
                Self::Transient(value.to_string())
            }
            _ => Self::Fatal(value.to_string()),
        }
    }
}
