//! RPC request and response types.
//!
//! Every response carries a [`Status`] and, on error, a [`RaftErrorKind`].
//! A request received by a role that cannot serve it still produces a
//! normal response with `Status::Error` and `IllegalMemberState`; it is
//! never a transport failure. Responses that can redirect a client also
//! carry a `leader` hint when one is known.

use serde::Deserialize;
use serde::Serialize;

use crate::entry::Consistency;
use crate::entry::Entry;
use crate::entry::SessionKeepAlive;
use crate::error::RaftErrorKind;
use crate::member::Member;
use crate::member::MemberId;

/// Outcome of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Error,
}

/// Sent by leaders to replicate entries and as heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub term: u64,
    pub leader: MemberId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
    pub commit_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub term: u64,
    pub succeeded: bool,
    /// On success, the receiver's last log index. On a consistency-check
    /// failure, a hint for the leader to back off to.
    pub log_index: u64,
}

impl AppendResponse {
    pub fn error(term: u64, kind: RaftErrorKind) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            term,
            succeeded: false,
            log_index: 0,
        }
    }
}

/// Sent by candidates to gather votes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate: MemberId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub term: u64,
    pub voted: bool,
}

impl VoteResponse {
    pub fn error(term: u64, kind: RaftErrorKind) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            term,
            voted: false,
        }
    }
}

/// The non-binding pre-vote probe sent before a real election.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    pub term: u64,
    pub candidate: MemberId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub term: u64,
    pub accepted: bool,
}

impl PollResponse {
    pub fn error(term: u64, kind: RaftErrorKind) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            term,
            accepted: false,
        }
    }
}

/// One chunk of a streamed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub term: u64,
    pub leader: MemberId,
    pub snapshot_index: u64,
    pub snapshot_term: u64,
    pub offset: u64,
    pub data: Vec<u8>,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstallResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub term: u64,
    /// The offset the receiver expects next; lets the leader resume after
    /// a dropped or reordered chunk.
    pub next_offset: u64,
}

impl InstallResponse {
    pub fn error(term: u64, kind: RaftErrorKind) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            term,
            next_offset: 0,
        }
    }
}

/// Pushed by leaders to propagate a committed configuration to members
/// that do not receive appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub index: u64,
    pub term: u64,
    pub timestamp: u64,
    pub leader: MemberId,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfigureResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
}

impl ConfigureResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
        }
    }

    pub fn error(kind: RaftErrorKind) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
        }
    }
}

/// Asks the leader to add a member to the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub member: Member,
}

/// Asks the leader to remove a member from the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub member: Member,
}

/// Asks the leader to change a member's type or address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconfigureRequest {
    pub member: Member,
}

/// Shared response for join, leave and reconfigure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
    /// Log position of the committed configuration entry.
    pub index: u64,
    pub term: u64,
    pub members: Vec<Member>,
}

impl ConfigurationResponse {
    pub fn error(kind: RaftErrorKind, leader: Option<MemberId>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader,
            index: 0,
            term: 0,
            members: Vec::new(),
        }
    }
}

/// A client state-machine mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub session: u64,
    pub sequence: u64,
    pub operation: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
    /// Log index the command was written at.
    pub index: u64,
    /// Highest event index the session has been sent.
    pub event_index: u64,
    pub result: Option<Vec<u8>>,
}

impl CommandResponse {
    pub fn error(kind: RaftErrorKind, leader: Option<MemberId>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader,
            index: 0,
            event_index: 0,
            result: None,
        }
    }
}

/// A client read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub session: u64,
    pub sequence: u64,
    pub operation: Vec<u8>,
    pub consistency: Consistency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
    /// The index the read was served at.
    pub index: u64,
    pub result: Option<Vec<u8>>,
}

impl QueryResponse {
    pub fn error(kind: RaftErrorKind, leader: Option<MemberId>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader,
            index: 0,
            result: None,
        }
    }
}

/// Batched session heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub sessions: Vec<SessionKeepAlive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
    pub members: Vec<Member>,
}

impl KeepAliveResponse {
    pub fn error(kind: RaftErrorKind, leader: Option<MemberId>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader,
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    /// Application-level client identity.
    pub client: String,
    /// Requested session timeout in milliseconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
    pub session: u64,
    /// The timeout the cluster granted.
    pub timeout: u64,
}

impl OpenSessionResponse {
    pub fn error(kind: RaftErrorKind, leader: Option<MemberId>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader,
            session: 0,
            timeout: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
}

impl CloseSessionResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
            leader: None,
        }
    }

    pub fn error(kind: RaftErrorKind, leader: Option<MemberId>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader,
        }
    }
}

/// Asks any member for its view of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub status: Status,
    pub error: Option<RaftErrorKind>,
    pub leader: Option<MemberId>,
    pub members: Vec<Member>,
}

impl MetadataResponse {
    pub fn error(kind: RaftErrorKind) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            leader: None,
            members: Vec::new(),
        }
    }
}
