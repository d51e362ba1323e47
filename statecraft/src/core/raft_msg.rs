//! Messages flowing into the server task.
//!
//! `RaftMsg` carries external RPCs together with a oneshot responder; the
//! submitting side gets a completion handle immediately and the handler
//! runs on the server task. `Notification` carries completions of work the
//! server task farmed out (network sends, applied entries); a notification
//! that arrives after the role that issued it was replaced is ignored.

use tokio::sync::oneshot;

use crate::entry::Entry;
use crate::error::RPCError;
use crate::member::MemberId;
use crate::protocol::*;
use crate::snapshot::SnapshotMeta;
use crate::state_machine::ApplyOutput;
use crate::state_machine::StateMachineError;

pub(crate) enum RaftMsg {
    Append {
        rpc: AppendRequest,
        tx: oneshot::Sender<AppendResponse>,
    },
    Vote {
        rpc: VoteRequest,
        tx: oneshot::Sender<VoteResponse>,
    },
    Poll {
        rpc: PollRequest,
        tx: oneshot::Sender<PollResponse>,
    },
    Install {
        rpc: InstallRequest,
        tx: oneshot::Sender<InstallResponse>,
    },
    Configure {
        rpc: ConfigureRequest,
        tx: oneshot::Sender<ConfigureResponse>,
    },
    Join {
        rpc: JoinRequest,
        tx: oneshot::Sender<ConfigurationResponse>,
    },
    Leave {
        rpc: LeaveRequest,
        tx: oneshot::Sender<ConfigurationResponse>,
    },
    Reconfigure {
        rpc: ReconfigureRequest,
        tx: oneshot::Sender<ConfigurationResponse>,
    },
    Command {
        rpc: CommandRequest,
        tx: oneshot::Sender<CommandResponse>,
    },
    Query {
        rpc: QueryRequest,
        tx: oneshot::Sender<QueryResponse>,
    },
    KeepAlive {
        rpc: KeepAliveRequest,
        tx: oneshot::Sender<KeepAliveResponse>,
    },
    OpenSession {
        rpc: OpenSessionRequest,
        tx: oneshot::Sender<OpenSessionResponse>,
    },
    CloseSession {
        rpc: CloseSessionRequest,
        tx: oneshot::Sender<CloseSessionResponse>,
    },
    Metadata {
        rpc: MetadataRequest,
        tx: oneshot::Sender<MetadataResponse>,
    },
}

/// One applied entry's outcome, reported by the apply task.
#[derive(Debug)]
pub(crate) struct AppliedEntry {
    pub index: u64,
    pub output: Result<ApplyOutput, StateMachineError>,
}

pub(crate) enum Notification {
    /// An append (or heartbeat) send completed.
    AppendResult {
        target: MemberId,
        /// Term the request was sent in; stale results are dropped.
        term: u64,
        prev_log_index: u64,
        sent: u64,
        result: Result<AppendResponse, RPCError>,
    },

    VoteResult {
        target: MemberId,
        term: u64,
        result: Result<VoteResponse, RPCError>,
    },

    PollResult {
        target: MemberId,
        term: u64,
        result: Result<PollResponse, RPCError>,
    },

    InstallResult {
        target: MemberId,
        term: u64,
        snapshot_index: u64,
        offset: u64,
        len: u64,
        complete: bool,
        result: Result<InstallResponse, RPCError>,
    },

    ConfigureResult {
        target: MemberId,
        index: u64,
        result: Result<ConfigureResponse, RPCError>,
    },

    /// A batch of entries was applied to the state machine.
    Applied { results: Vec<AppliedEntry> },

    /// The state machine finished restoring from a snapshot.
    Restored { index: u64 },

    /// The state machine produced a snapshot of itself.
    SnapshotReady { meta: SnapshotMeta, data: Vec<u8> },
}

/// Work handed to the apply task, processed strictly in order.
pub(crate) enum ApplyMsg {
    /// Committed entries, in increasing index order.
    Entries(Vec<Entry>),

    /// A read to execute after everything enqueued before it.
    Query {
        session: u64,
        sequence: u64,
        operation: Vec<u8>,
        /// The index the read is served at, echoed in the response.
        index: u64,
        leader: Option<MemberId>,
        tx: oneshot::Sender<QueryResponse>,
    },

    /// Capture a snapshot of the state as of the entries enqueued so far.
    Snapshot { meta: SnapshotMeta },

    /// Replace all state from a snapshot.
    Restore { meta: SnapshotMeta, data: Vec<u8> },
}
