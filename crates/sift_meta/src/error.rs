use std::fmt;

use thiserror::Error;

use crate::records::RecordKind;

/// Errors produced by `FT.INTERNAL_UPDATE`.
///
/// `Fatal` is never meant to reach a client. Hosts check [`UpdateError::is_fatal`]
/// and terminate the process instead of writing a reply.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("wrong number of arguments for FT_INTERNAL_UPDATE")]
    WrongArity { got: usize },

    #[error("failed to parse {record}")]
    Corrupt { record: RecordKind, len: usize },

    /// The applier's own message, passed through unchanged.
    #[error(transparent)]
    Apply(anyhow::Error),

    #[error("failed to propagate FT.INTERNAL_UPDATE: {0:#}")]
    Replication(anyhow::Error),

    #[error("{0} during AOF loading - cannot continue")]
    Fatal(Failure),
}

/// Coarse classification used by hosts and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Protocol,
    Corruption,
    Application,
    Replication,
    Fatal,
}

/// The failure that made a replayed record unrecoverable.
#[derive(Debug)]
pub enum Failure {
    Corrupt { record: RecordKind, len: usize },
    Apply { message: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Corrupt { record, len } => {
                write!(f, "protobuf parse failure of {record} ({len} bytes)")
            }
            Failure::Apply { message } => write!(f, "metadata apply failure ({message})"),
        }
    }
}

impl UpdateError {
    pub fn class(&self) -> ErrorClass {
        match self {
            UpdateError::WrongArity { .. } => ErrorClass::Protocol,
            UpdateError::Corrupt { .. } => ErrorClass::Corruption,
            UpdateError::Apply(_) => ErrorClass::Application,
            UpdateError::Replication(_) => ErrorClass::Replication,
            UpdateError::Fatal(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdateError::Fatal(_))
    }
}
