//! Error types exposed by this crate.

use std::fmt;
use std::time::Duration;

use anyerror::AnyError;

use crate::member::MemberId;

/// Protocol-level error kinds carried inside RPC responses.
///
/// A response with `Status::Error` names one of these kinds. They are part
/// of the wire contract: a request that is not valid for the receiver's
/// current role produces an `IllegalMemberState` response, never a
/// transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum RaftErrorKind {
    /// No leader is currently known; the client should retry.
    #[error("no leader")]
    NoLeader,

    /// The RPC is not valid in the receiver's current role.
    #[error("illegal member state")]
    IllegalMemberState,

    #[error("unknown session")]
    UnknownSession,

    #[error("closed session")]
    ClosedSession,

    #[error("expired session")]
    ExpiredSession,

    /// The state machine failed to apply a command.
    #[error("command failure")]
    CommandFailure,

    /// The state machine failed to execute a query.
    #[error("query failure")]
    QueryFailure,

    /// An application-defined error from the state machine.
    #[error("application error")]
    ApplicationError,

    /// The request was malformed.
    #[error("protocol error")]
    ProtocolError,

    /// A configuration change was submitted while another is in progress,
    /// or the change itself is invalid.
    #[error("configuration error")]
    ConfigurationError,
}

/// What storage object an error occurred on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum ErrorSubject {
    /// The log as a whole.
    Log,

    /// A specific log index.
    LogIndex(u64),

    /// A log segment identified by its base index.
    Segment(u64),

    /// The metadata store.
    Meta,

    /// A snapshot file.
    Snapshot,
}

/// What operation the error occurred during.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum ErrorVerb {
    Read,
    Write,
    Seek,
    Delete,
    Sync,
}

impl fmt::Display for ErrorVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An error that occurred reading or writing the log, metadata store or a
/// snapshot. Storage errors are fatal to the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[derive(serde::Deserialize, serde::Serialize)]
#[error("storage error: while {verb} {subject:?}: {source}")]
pub struct StorageError {
    pub subject: ErrorSubject,
    pub verb: ErrorVerb,
    pub source: AnyError,
}

impl StorageError {
    pub fn new(subject: ErrorSubject, verb: ErrorVerb, source: impl Into<AnyError>) -> Self {
        Self {
            subject,
            verb,
            source: source.into(),
        }
    }

    pub fn from_io_error(subject: ErrorSubject, verb: ErrorVerb, e: std::io::Error) -> Self {
        Self {
            subject,
            verb,
            source: AnyError::new(&e),
        }
    }

    /// An append or read addressed an index outside the log's range.
    pub fn out_of_bounds(index: u64, first: u64, last: u64) -> Self {
        Self {
            subject: ErrorSubject::LogIndex(index),
            verb: ErrorVerb::Write,
            source: AnyError::error(format!(
                "index {} out of bounds, log covers [{}, {}]",
                index, first, last
            )),
        }
    }

    /// A frame failed its checksum or length validation.
    pub fn corrupt(subject: ErrorSubject, detail: impl ToString) -> Self {
        Self {
            subject,
            verb: ErrorVerb::Read,
            source: AnyError::error(detail),
        }
    }
}

/// An unrecoverable error: the server task exits and every subsequent API
/// call fails with this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum Fatal {
    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error("server task panicked")]
    Panicked,

    /// The server stopped normally.
    #[error("server stopped")]
    Stopped,
}

/// An error sending an RPC to a peer. These never mutate Raft state; the
/// appender retries with backoff.
#[derive(Debug, Clone, thiserror::Error)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum RPCError {
    #[error("timeout after {timeout:?} sending to member {target}")]
    Timeout { target: MemberId, timeout: Duration },

    #[error("network error sending to member {target}: {source}")]
    Network { target: MemberId, source: AnyError },
}

impl RPCError {
    pub fn network(target: MemberId, source: impl Into<AnyError>) -> Self {
        Self::Network {
            target,
            source: source.into(),
        }
    }
}
