//! Log entry types.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::member::Member;
use crate::member::MemberId;

/// Consistency level requested by a client query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    /// Serve from local state with no leadership check.
    Sequential,

    /// Serve from the leader after verifying leadership through a recent
    /// heartbeat quorum.
    LinearizableLease,

    /// Serve from the leader after a read-index barrier.
    Linearizable,
}

/// Per-session progress reported in a keep-alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeepAlive {
    pub session: u64,
    /// Highest command sequence the client has received a response for.
    pub command_sequence: u64,
    /// Highest event index the client has received.
    pub event_index: u64,
}

/// The payload of a log entry, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Leader no-op written at the start of each term.
    Initialize,

    /// Cluster membership change.
    Configuration { members: BTreeMap<MemberId, Member> },

    /// Client state-machine mutation.
    Command {
        session: u64,
        sequence: u64,
        operation: Vec<u8>,
    },

    /// A linearizable read that required log placement.
    Query {
        session: u64,
        sequence: u64,
        operation: Vec<u8>,
        consistency: Consistency,
    },

    OpenSession {
        /// Requested session timeout in milliseconds.
        timeout: u64,
    },

    CloseSession {
        session: u64,
        /// True when the close was produced by expiry rather than an
        /// explicit client request.
        expired: bool,
    },

    KeepAlive { sessions: Vec<SessionKeepAlive> },
}

impl EntryPayload {
    /// Short kind name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EntryPayload::Initialize => "initialize",
            EntryPayload::Configuration { .. } => "configuration",
            EntryPayload::Command { .. } => "command",
            EntryPayload::Query { .. } => "query",
            EntryPayload::OpenSession { .. } => "open-session",
            EntryPayload::CloseSession { .. } => "close-session",
            EntryPayload::KeepAlive { .. } => "keep-alive",
        }
    }
}

/// A single entry in the replicated log.
///
/// Indices are dense: every entry's index is exactly one greater than its
/// predecessor's, starting from the log's first index. Terms never decrease
/// along the index axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    /// Wall-clock creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub payload: EntryPayload,
}

impl Entry {
    pub fn new(index: u64, term: u64, payload: EntryPayload) -> Self {
        Self {
            index,
            term,
            timestamp: now_millis(),
            payload,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.payload, EntryPayload::Configuration { .. })
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.index, self.term, self.payload.kind())
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
