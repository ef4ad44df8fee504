use std::fmt;
use std::io;

use crate::progress::ProgressId;

/// Misuse of the job queue. These are caller bugs, not filesystem failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueError {
    AlreadyQueued { progress: ProgressId },
    NotQueued { progress: ProgressId },
}

impl fmt::Display for QueueError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyQueued { progress } => {
                write!(formatter, "job with progress #{progress} is already queued")
            }
            Self::NotQueued { progress } => {
                write!(formatter, "no queued job with progress #{progress}")
            }
        }
    }
}

impl std::error::Error for QueueError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpErrorCode {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    InvalidInput,
    Unsupported,
    Trash,
    Io,
    Aborted,
}

impl OpErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::AlreadyExists => "already_exists",
            Self::InvalidInput => "invalid_input",
            Self::Unsupported => "unsupported",
            Self::Trash => "trash",
            Self::Io => "io",
            Self::Aborted => "aborted",
        }
    }
}

/// Failure of a filesystem operation other than user cancellation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpError {
    code: OpErrorCode,
    message: String,
}

impl OpError {
    pub fn new(code: OpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_io(context: impl fmt::Display, error: &io::Error) -> Self {
        let code = match error.kind() {
            io::ErrorKind::NotFound => OpErrorCode::NotFound,
            io::ErrorKind::PermissionDenied => OpErrorCode::PermissionDenied,
            io::ErrorKind::AlreadyExists => OpErrorCode::AlreadyExists,
            io::ErrorKind::InvalidInput => OpErrorCode::InvalidInput,
            io::ErrorKind::Unsupported => OpErrorCode::Unsupported,
            _ => OpErrorCode::Io,
        };
        Self::new(code, format!("{context}: {error}"))
    }

    /// Like [`from_io`](Self::from_io), but failures with no more specific
    /// kind are blamed on the trash can.
    pub fn from_trash(context: impl fmt::Display, error: &io::Error) -> Self {
        let mut classified = Self::from_io(context, error);
        if classified.code == OpErrorCode::Io {
            classified.code = OpErrorCode::Trash;
        }
        classified
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(OpErrorCode::InvalidInput, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(OpErrorCode::Aborted, message)
    }

    pub fn code(&self) -> OpErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.message)
    }
}

impl std::error::Error for OpError {}

pub type OpResult<T> = Result<T, OpError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UndoError {
    /// An undo or redo of this record has not been finished yet.
    ApplyInFlight,
    /// The handle passed to `apply_finish` was issued by another record.
    HandleMismatch,
    NothingToUndo,
    NothingToRedo,
    Operation(OpError),
    /// The job running the apply went away without reporting back.
    Aborted,
}

impl fmt::Display for UndoError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplyInFlight => write!(formatter, "an undo or redo is already in progress"),
            Self::HandleMismatch => {
                write!(formatter, "apply handle belongs to a different undo record")
            }
            Self::NothingToUndo => write!(formatter, "nothing to undo"),
            Self::NothingToRedo => write!(formatter, "nothing to redo"),
            Self::Operation(error) => write!(formatter, "{error}"),
            Self::Aborted => write!(formatter, "undo or redo was aborted"),
        }
    }
}

impl std::error::Error for UndoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }
}

impl From<OpError> for UndoError {
    fn from(error: OpError) -> Self {
        Self::Operation(error)
    }
}

pub type UndoResult<T> = Result<T, UndoError>;
