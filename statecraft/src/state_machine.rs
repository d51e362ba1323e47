//! The state-machine executor boundary.
//!
//! Committed entries are handed to a [`StateMachine`] in strictly
//! increasing index order by the apply task. The state machine owns the
//! client session subsystem: it assigns session ids when applying
//! `OpenSession` entries, deduplicates commands by `(session, sequence)`,
//! and expires sessions deterministically using entry timestamps so every
//! replica reaches the same decision.

use anyerror::AnyError;

use crate::entry::Entry;
use crate::error::RaftErrorKind;
use crate::snapshot::SnapshotMeta;

/// What applying an entry produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutput {
    /// Entries with no state-machine effect (initialize, configuration,
    /// query placement).
    None,

    /// The result of a command, returned to the submitting client.
    Command(Vec<u8>),

    /// A session was opened and assigned this id.
    SessionOpened(u64),

    SessionClosed,

    KeptAlive,
}

/// Errors surfaced by the state machine. These travel inside responses and
/// never demote the server's role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("unknown session {0}")]
    UnknownSession(u64),

    #[error("session {0} is closed")]
    ClosedSession(u64),

    #[error("session {0} expired")]
    ExpiredSession(u64),

    #[error("application error: {0}")]
    Application(AnyError),
}

impl StateMachineError {
    /// The protocol-level kind reported to clients.
    pub fn kind(&self) -> RaftErrorKind {
        match self {
            StateMachineError::UnknownSession(_) => RaftErrorKind::UnknownSession,
            StateMachineError::ClosedSession(_) => RaftErrorKind::ClosedSession,
            StateMachineError::ExpiredSession(_) => RaftErrorKind::ExpiredSession,
            StateMachineError::Application(_) => RaftErrorKind::ApplicationError,
        }
    }
}

/// A deterministic state machine fed from the replicated log.
pub trait StateMachine: Send + 'static {
    /// Apply a committed entry. Called exactly once per index, in order.
    fn apply(&mut self, entry: &Entry) -> Result<ApplyOutput, StateMachineError>;

    /// Execute a read against current state.
    fn query(
        &mut self,
        session: u64,
        sequence: u64,
        operation: &[u8],
    ) -> Result<Vec<u8>, StateMachineError>;

    /// Capture the complete state for a snapshot.
    fn snapshot(&mut self) -> Result<Vec<u8>, StateMachineError>;

    /// Replace the complete state from a snapshot.
    fn restore(&mut self, meta: &SnapshotMeta, data: &[u8]) -> Result<(), StateMachineError>;
}
