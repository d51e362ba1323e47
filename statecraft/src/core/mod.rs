//! The server core: shared per-server state and the role state machine.
//!
//! One spawned task owns everything here. RPC handlers, timer callbacks
//! and farmed-out completions all run inside the task's select loop, so
//! thread confinement is enforced by ownership: every mutating method
//! takes `&mut self` and there is exactly one owner. A handler that awaits
//! I/O resumes on the same task and re-verifies term and role before
//! touching state.
//!
//! The active role is a struct borrowing the context
//! ([`FollowerState`](follower::FollowerState) and friends). A transition
//! records a target role; the running role's loop observes the change,
//! returns, and the main loop constructs the next role. Timers and
//! in-flight operations belonging to the old role die with it: their
//! completions arrive as [`Notification`](raft_msg::Notification)s that no
//! longer match the current term or role and are dropped.

pub(crate) mod apply;
pub(crate) mod candidate;
pub(crate) mod follower;
pub(crate) mod inactive;
pub(crate) mod leader;
pub(crate) mod passive;
pub(crate) mod raft_msg;
pub(crate) mod reserve;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use tracing::Level;

use crate::cluster::Cluster;
use crate::cluster::ConfigureOutcome;
use crate::config::Config;
use crate::configuration::Configuration;
use crate::entry::Entry;
use crate::entry::EntryPayload;
use crate::error::Fatal;
use crate::error::RaftErrorKind;
use crate::error::StorageError;
use crate::log::Log;
use crate::member::MemberId;
use crate::member::MemberType;
use crate::meta::MetaStore;
use crate::network::RaftNetwork;
use crate::protocol::*;
use crate::snapshot::SnapshotMeta;
use crate::snapshot::SnapshotStore;

use raft_msg::ApplyMsg;
use raft_msg::Notification;
use raft_msg::RaftMsg;

/// The role a server is currently playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Role {
    Inactive,
    Reserve,
    Passive,
    Follower,
    Candidate,
    Leader,
}

impl Role {
    /// The default role for a member type. An active member enters as a
    /// follower and earns leadership through an election.
    pub fn for_member_type(t: MemberType) -> Role {
        match t {
            MemberType::Inactive => Role::Inactive,
            MemberType::Reserve => Role::Reserve,
            MemberType::Passive => Role::Passive,
            MemberType::Active => Role::Follower,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A point-in-time view of a server, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub id: MemberId,
    pub role: Role,
    pub term: u64,
    pub leader: Option<MemberId>,
    pub commit_index: u64,
    pub last_applied: u64,
    /// The first commit index observed after startup, once known.
    pub first_commit_index: Option<u64>,
    /// Index of the configuration currently in effect.
    pub configuration_index: u64,
}

impl ServerStatus {
    pub(crate) fn initial(id: MemberId) -> Self {
        Self {
            id,
            role: Role::Inactive,
            term: 0,
            leader: None,
            commit_index: 0,
            last_applied: 0,
            first_commit_index: None,
            configuration_index: 0,
        }
    }
}

/// Shared state of one server. See the module docs for the ownership
/// rules.
pub(crate) struct RaftContext<N: RaftNetwork> {
    pub(crate) id: MemberId,
    pub(crate) config: Arc<Config>,
    pub(crate) network: Arc<N>,

    pub(crate) log: Log,
    pub(crate) meta: MetaStore,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) cluster: Cluster,

    /// The leader of the current term, when known.
    pub(crate) leader: Option<MemberId>,
    pub(crate) commit_index: u64,
    /// Highest index confirmed applied by the apply task.
    pub(crate) last_applied: u64,
    /// Highest index handed to the apply task.
    pub(crate) applied_enqueued: u64,
    pub(crate) first_commit_index: Option<u64>,

    /// The role currently running.
    pub(crate) role: Role,
    /// The role the main loop should run next; role loops return when it
    /// differs from `role`.
    pub(crate) target_role: Role,
    pub(crate) shutdown: bool,

    pub(crate) rx_api: mpsc::UnboundedReceiver<RaftMsg>,
    pub(crate) tx_notify: mpsc::UnboundedSender<Notification>,
    pub(crate) rx_notify: mpsc::UnboundedReceiver<Notification>,
    pub(crate) tx_apply: mpsc::UnboundedSender<ApplyMsg>,
    pub(crate) rx_shutdown: oneshot::Receiver<()>,
    tx_status: watch::Sender<ServerStatus>,

    next_election_timeout: Option<Instant>,
    last_leader_contact: Option<Instant>,
    snapshot_pending: bool,
}

impl<N: RaftNetwork> RaftContext<N> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: MemberId,
        config: Arc<Config>,
        network: Arc<N>,
        log: Log,
        meta: MetaStore,
        snapshots: SnapshotStore,
        cluster: Cluster,
        rx_api: mpsc::UnboundedReceiver<RaftMsg>,
        tx_notify: mpsc::UnboundedSender<Notification>,
        rx_notify: mpsc::UnboundedReceiver<Notification>,
        tx_apply: mpsc::UnboundedSender<ApplyMsg>,
        rx_shutdown: oneshot::Receiver<()>,
        tx_status: watch::Sender<ServerStatus>,
    ) -> Self {
        Self {
            id,
            config,
            network,
            log,
            meta,
            snapshots,
            cluster,
            leader: None,
            commit_index: 0,
            last_applied: 0,
            applied_enqueued: 0,
            first_commit_index: None,
            role: Role::Inactive,
            target_role: Role::Inactive,
            shutdown: false,
            rx_api,
            tx_notify,
            rx_notify,
            tx_apply,
            rx_shutdown,
            tx_status,
            next_election_timeout: None,
            last_leader_contact: None,
            snapshot_pending: false,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<Result<(), Fatal>> {
        let span = tracing::span!(
            Level::DEBUG,
            "server",
            id = self.id,
            cluster = %self.config.cluster_name
        );
        tokio::spawn(self.main().instrument(span))
    }

    async fn main(mut self) -> Result<(), Fatal> {
        self.startup()?;

        loop {
            if self.shutdown {
                tracing::info!("server stopped");
                return Ok(());
            }

            self.role = self.target_role;
            self.report_status();
            tracing::debug!(role = %self.role, term = self.meta.current_term(), "entering role");

            match self.role {
                Role::Inactive => inactive::InactiveState::new(&mut self).run().await?,
                Role::Reserve => reserve::ReserveState::new(&mut self).run().await?,
                Role::Passive => passive::PassiveState::new(&mut self).run().await?,
                Role::Follower => follower::FollowerState::new(&mut self).run().await?,
                Role::Candidate => candidate::CandidateState::new(&mut self).run().await?,
                Role::Leader => leader::LeaderState::new(&mut self).run().await?,
            }
        }
    }

    /// Restore snapshot state and derive the initial role.
    fn startup(&mut self) -> Result<(), StorageError> {
        if let Some((meta, data)) = self.snapshots.read_latest()? {
            tracing::info!(index = meta.index, term = meta.term, "restoring snapshot");
            let _ = self.tx_apply.send(ApplyMsg::Restore { meta, data });

            self.commit_index = meta.index;
            self.applied_enqueued = meta.index;

            if self.log.last_index() < meta.index {
                self.log.reset(meta.index, meta.term)?;
            } else {
                let cut = meta.index.saturating_sub(self.config.retained_entries);
                self.log.compact(cut)?;
            }
        }

        self.target_role = Role::for_member_type(self.cluster.local_type());
        tracing::info!(
            term = self.meta.current_term(),
            last_index = self.log.last_index(),
            role = %self.target_role,
            "server started"
        );
        Ok(())
    }

    pub(crate) fn report_status(&mut self) {
        let status = ServerStatus {
            id: self.id,
            role: self.role,
            term: self.meta.current_term(),
            leader: self.leader,
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            first_commit_index: self.first_commit_index,
            configuration_index: self.cluster.configuration().index,
        };
        self.tx_status.send_if_modified(|s| {
            if *s != status {
                *s = status;
                true
            } else {
                false
            }
        });
    }

    /// Request a transition. The running role's loop observes the change
    /// and returns. Idempotent.
    pub(crate) fn set_role(&mut self, role: Role) {
        if self.target_role != role {
            tracing::info!(from = %self.target_role, to = %role, "role transition");
            self.target_role = role;
        }
    }

    /// Draw a fresh randomized election deadline.
    pub(crate) fn reset_election_timeout(&mut self) {
        self.next_election_timeout = Some(Instant::now() + self.config.new_rand_election_timeout());
    }

    pub(crate) fn election_deadline(&self) -> Instant {
        self.next_election_timeout
            .unwrap_or_else(|| Instant::now() + self.config.new_rand_election_timeout())
    }

    /// Whether a live leader was heard within the lease window. Used to
    /// refuse votes and polls that would disrupt a healthy leader.
    pub(crate) fn heard_from_leader_recently(&self) -> bool {
        self.last_leader_contact
            .map_or(false, |t| t.elapsed() < self.config.leader_lease())
    }

    /// Apply a term observation.
    ///
    /// A higher term clears the vote and leader, persists, and forces a
    /// transition to the member type's default role. An equal term records
    /// the leader. A lower term changes nothing; the caller rejects.
    pub(crate) fn update_term_and_leader(
        &mut self,
        term: u64,
        leader: Option<MemberId>,
    ) -> Result<(), StorageError> {
        let current = self.meta.current_term();
        if term > current {
            tracing::debug!(term, current, "observed higher term");
            self.meta.save_vote(term, None)?;
            self.leader = leader;
            if leader.is_some() {
                self.last_leader_contact = Some(Instant::now());
            }
            self.set_role(Role::for_member_type(self.cluster.local_type()));
            self.report_status();
        } else if term == current {
            if let Some(l) = leader {
                if self.leader.is_none() {
                    self.leader = Some(l);
                    self.report_status();
                }
                self.last_leader_contact = Some(Instant::now());
            }
        }
        Ok(())
    }

    /// The term at `index`: from the log, or from the snapshot boundary,
    /// or 0 for the empty prefix.
    pub(crate) fn term_at(&mut self, index: u64) -> Result<Option<u64>, StorageError> {
        if index == 0 {
            return Ok(Some(0));
        }
        if index >= self.log.first_index() {
            return self.log.term(index);
        }
        match self.snapshots.latest() {
            Some(m) if m.index == index => Ok(Some(m.term)),
            _ => Ok(None),
        }
    }

    /// Advance the commit index, install committed configurations, and
    /// hand newly committed entries to the apply task.
    ///
    /// Returns the outcome of each configuration installed; the caller
    /// decides how to act on a local member-type change (a follower
    /// transitions at once, a leader finishes a heartbeat round first).
    pub(crate) fn advance_commit(
        &mut self,
        new_commit: u64,
    ) -> Result<Vec<ConfigureOutcome>, StorageError> {
        let new_commit = new_commit.min(self.log.last_index());
        if new_commit <= self.commit_index {
            return Ok(Vec::new());
        }
        self.commit_index = new_commit;
        if self.first_commit_index.is_none() {
            self.first_commit_index = Some(new_commit);
        }

        let from = self.applied_enqueued + 1;
        let entries = self.log.entries(from, new_commit)?;

        let mut outcomes = Vec::new();
        for entry in &entries {
            if let EntryPayload::Configuration { members } = &entry.payload {
                let cfg =
                    Configuration::new(entry.index, entry.term, entry.timestamp, members.clone());
                let next_index = self.log.last_index() + 1;
                let outcome = self.cluster.configure(cfg, next_index);
                if outcome.installed {
                    self.cluster.commit(&mut self.meta)?;
                    tracing::info!(
                        index = entry.index,
                        joined = ?outcome.joined,
                        left = ?outcome.left,
                        "configuration committed"
                    );
                    outcomes.push(outcome);
                } else {
                    // Already installed through a configure push; it is
                    // committed now, so make it durable.
                    self.cluster.commit(&mut self.meta)?;
                }
            }
        }

        if let Some(last) = entries.last() {
            self.applied_enqueued = last.index;
            let _ = self.tx_apply.send(ApplyMsg::Entries(entries));
        }

        self.maybe_snapshot()?;
        self.report_status();
        Ok(outcomes)
    }

    /// Trigger a snapshot once enough entries have been applied since the
    /// last one.
    fn maybe_snapshot(&mut self) -> Result<(), StorageError> {
        if self.snapshot_pending {
            return Ok(());
        }
        let since = self.applied_enqueued - self.snapshots.latest().map_or(0, |m| m.index);
        if since < self.config.snapshot_threshold {
            return Ok(());
        }

        let index = self.applied_enqueued;
        let term = self.term_at(index)?.unwrap_or(0);
        let meta = SnapshotMeta {
            index,
            term,
            timestamp: crate::entry::now_millis(),
        };
        tracing::info!(index, term, "requesting snapshot");
        let _ = self.tx_apply.send(ApplyMsg::Snapshot { meta });
        self.snapshot_pending = true;
        Ok(())
    }

    /// Handle notifications that are meaningful in every role. Completions
    /// belonging to a replaced role (vote results, append results) do not
    /// match any pending state here and are dropped.
    pub(crate) fn handle_notification(&mut self, n: Notification) -> Result<(), StorageError> {
        match n {
            Notification::Applied { results } => {
                if let Some(last) = results.last() {
                    self.last_applied = self.last_applied.max(last.index);
                    self.report_status();
                }
            }

            Notification::Restored { index } => {
                self.last_applied = self.last_applied.max(index);
                tracing::info!(index, "state machine restored");
                self.report_status();
            }

            Notification::SnapshotReady { meta, data } => {
                self.snapshots.save(meta, &data)?;
                self.snapshot_pending = false;
                let cut = meta.index.saturating_sub(self.config.retained_entries);
                self.log.compact(cut)?;
                tracing::info!(index = meta.index, "snapshot saved and log compacted");
            }

            _ => {}
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Shared RPC handlers. Roles decide which of these to invoke; the
    // handlers themselves are role-agnostic and run on the server task.
    // ---------------------------------------------------------------

    /// AppendEntries: consistency check, conflict truncation, append,
    /// commit advancement.
    #[tracing::instrument(level = "debug", skip(self, req), fields(term = req.term, prev = req.prev_log_index, n = req.entries.len()))]
    pub(crate) fn handle_append(&mut self, req: AppendRequest) -> Result<AppendResponse, StorageError> {
        let term = self.meta.current_term();
        if req.term < term {
            tracing::debug!(req_term = req.term, term, "rejecting append from stale term");
            return Ok(AppendResponse {
                status: Status::Ok,
                error: None,
                term,
                succeeded: false,
                log_index: self.log.last_index(),
            });
        }

        self.update_term_and_leader(req.term, Some(req.leader))?;
        self.reset_election_timeout();
        let term = self.meta.current_term();

        if req.prev_log_index > 0 {
            let matches = self.term_at(req.prev_log_index)? == Some(req.prev_log_term);
            if !matches {
                let hint = self.log.last_index().min(req.prev_log_index);
                tracing::debug!(
                    prev = req.prev_log_index,
                    prev_term = req.prev_log_term,
                    hint,
                    "append consistency check failed"
                );
                return Ok(AppendResponse {
                    status: Status::Ok,
                    error: None,
                    term,
                    succeeded: false,
                    log_index: hint,
                });
            }
        }

        for entry in &req.entries {
            if entry.index < self.log.first_index() {
                // Covered by a snapshot.
                continue;
            }
            if entry.index <= self.log.last_index() {
                if self.log.term(entry.index)? == Some(entry.term) {
                    // Idempotent replay.
                    continue;
                }
                if entry.index <= self.commit_index {
                    tracing::error!(index = entry.index, "conflicting entry below commit index");
                    return Ok(AppendResponse::error(term, RaftErrorKind::ProtocolError));
                }
                self.log.truncate(entry.index - 1)?;
                self.log.append(entry)?;
            } else {
                self.log.append(entry)?;
            }
        }
        if !req.entries.is_empty() {
            self.log.flush()?;
        }

        let outcomes = self.advance_commit(req.commit_index)?;
        for outcome in outcomes {
            if let Some(t) = outcome.local_type_changed {
                self.set_role(Role::for_member_type(t));
            }
        }

        Ok(AppendResponse {
            status: Status::Ok,
            error: None,
            term,
            succeeded: true,
            log_index: self.log.last_index(),
        })
    }

    /// RequestVote. With `grant_allowed` false (non-voting roles) the term
    /// is still observed but no vote is ever granted.
    #[tracing::instrument(level = "debug", skip(self, req), fields(term = req.term, candidate = req.candidate))]
    pub(crate) fn handle_vote(
        &mut self,
        req: VoteRequest,
        grant_allowed: bool,
    ) -> Result<VoteResponse, StorageError> {
        let term = self.meta.current_term();
        if req.term < term {
            return Ok(VoteResponse {
                status: Status::Ok,
                error: None,
                term,
                voted: false,
            });
        }

        // A server that heard from a live leader refuses to help depose
        // it, regardless of the candidate's term.
        if self.heard_from_leader_recently() {
            tracing::debug!(candidate = req.candidate, "refusing vote, leader is live");
            return Ok(VoteResponse {
                status: Status::Ok,
                error: None,
                term,
                voted: false,
            });
        }

        self.update_term_and_leader(req.term, None)?;
        let term = self.meta.current_term();

        let up_to_date = (req.last_log_term, req.last_log_index)
            >= (self.log.last_term(), self.log.last_index());
        let unspent = match self.meta.voted_for() {
            None => true,
            Some(c) => c == req.candidate,
        };

        let voted = grant_allowed && up_to_date && unspent && req.term == term;
        if voted {
            // Persist before answering; a vote must survive a crash.
            self.meta.save_vote(term, Some(req.candidate))?;
            self.reset_election_timeout();
            tracing::debug!(candidate = req.candidate, term, "vote granted");
        } else {
            tracing::debug!(
                candidate = req.candidate,
                up_to_date,
                unspent,
                "vote refused"
            );
        }

        Ok(VoteResponse {
            status: Status::Ok,
            error: None,
            term,
            voted,
        })
    }

    /// Pre-vote probe: the up-to-date check without any mutation or
    /// persistence.
    #[tracing::instrument(level = "debug", skip(self, req), fields(term = req.term, candidate = req.candidate))]
    pub(crate) fn handle_poll(&mut self, req: PollRequest, grant_allowed: bool) -> PollResponse {
        let term = self.meta.current_term();

        let accepted = grant_allowed
            && req.term >= term
            && !self.heard_from_leader_recently()
            && self.role != Role::Leader
            && (req.last_log_term, req.last_log_index)
                >= (self.log.last_term(), self.log.last_index());

        PollResponse {
            status: Status::Ok,
            error: None,
            term,
            accepted,
        }
    }

    /// InstallSnapshot: receive one chunk, validating stream continuity;
    /// on completion restore the state machine and re-base the log.
    #[tracing::instrument(level = "debug", skip(self, req), fields(index = req.snapshot_index, offset = req.offset))]
    pub(crate) fn handle_install(&mut self, req: InstallRequest) -> Result<InstallResponse, StorageError> {
        let term = self.meta.current_term();
        if req.term < term {
            return Ok(InstallResponse {
                status: Status::Ok,
                error: None,
                term,
                next_offset: 0,
            });
        }

        self.update_term_and_leader(req.term, Some(req.leader))?;
        self.reset_election_timeout();
        let term = self.meta.current_term();

        let meta = SnapshotMeta {
            index: req.snapshot_index,
            term: req.snapshot_term,
            timestamp: crate::entry::now_millis(),
        };

        if self.snapshots.install_offset(&meta).is_none() {
            if req.offset != 0 {
                // Mid-stream chunk for a stream we do not have; ask the
                // leader to start over.
                return Ok(InstallResponse {
                    status: Status::Ok,
                    error: None,
                    term,
                    next_offset: 0,
                });
            }
            self.snapshots.begin_install(meta)?;
        }

        let next_offset = self.snapshots.install_chunk(&meta, req.offset, &req.data)?;

        if req.complete && next_offset == req.offset + req.data.len() as u64 {
            self.snapshots.complete_install(&meta)?;
            tracing::info!(index = meta.index, term = meta.term, "snapshot installed");

            if let Some((meta, data)) = self.snapshots.read_latest()? {
                let index = meta.index;
                let snap_term = meta.term;
                let _ = self.tx_apply.send(ApplyMsg::Restore { meta, data });

                self.commit_index = self.commit_index.max(index);
                self.applied_enqueued = self.applied_enqueued.max(index);
                if self.log.last_index() < index {
                    self.log.reset(index, snap_term)?;
                } else {
                    self.log.compact(index)?;
                }
                self.report_status();
            }
        }

        Ok(InstallResponse {
            status: Status::Ok,
            error: None,
            term,
            next_offset,
        })
    }

    /// Configure: install a configuration pushed by the leader. This is
    /// how members that receive no appends learn the membership, and how
    /// a joining server leaves the inactive role.
    #[tracing::instrument(level = "debug", skip(self, req), fields(index = req.index, term = req.term))]
    pub(crate) fn handle_configure(&mut self, req: ConfigureRequest) -> Result<ConfigureResponse, StorageError> {
        self.update_term_and_leader(req.term, Some(req.leader))?;
        self.reset_election_timeout();

        let members = req.members.iter().map(|m| (m.id, m.clone())).collect();
        let cfg = Configuration::new(req.index, req.term, req.timestamp, members);
        let next_index = self.log.last_index() + 1;
        let outcome = self.cluster.configure(cfg, next_index);

        // Commit to disk only if the configuration is already known
        // committed; checked against the installed configuration in case
        // the request carried a stale one.
        if self.commit_index >= self.cluster.configuration().index {
            self.cluster.commit(&mut self.meta)?;
        }

        if outcome.installed {
            if let Some(t) = outcome.local_type_changed {
                self.set_role(Role::for_member_type(t));
            }
            self.report_status();
        }

        Ok(ConfigureResponse::ok())
    }

    /// Metadata: answer from the local view.
    pub(crate) fn handle_metadata(&self, _req: MetadataRequest) -> MetadataResponse {
        MetadataResponse {
            status: Status::Ok,
            error: None,
            leader: self.leader,
            members: self.cluster.configuration().members.values().cloned().collect(),
        }
    }

    /// The error kind and leader hint used when redirecting a client.
    pub(crate) fn leader_hint(&self) -> (RaftErrorKind, Option<MemberId>) {
        match self.leader {
            Some(l) if l != self.id => (RaftErrorKind::IllegalMemberState, Some(l)),
            _ => (RaftErrorKind::NoLeader, None),
        }
    }

    /// Build the configure push for the current configuration.
    pub(crate) fn configure_request(&self) -> ConfigureRequest {
        let cfg = self.cluster.configuration();
        ConfigureRequest {
            index: cfg.index,
            term: cfg.term,
            timestamp: cfg.timestamp,
            leader: self.id,
            members: cfg.members.values().cloned().collect(),
        }
    }

    /// Append a leader-side entry at the next index in the current term.
    pub(crate) fn append_local(&mut self, payload: EntryPayload) -> Result<Entry, StorageError> {
        let entry = Entry::new(self.log.last_index() + 1, self.meta.current_term(), payload);
        self.log.append(&entry)?;
        self.log.flush()?;
        Ok(entry)
    }

    /// Answer any message with `ILLEGAL_MEMBER_STATE`. Used by roles for
    /// the RPCs they cannot serve; the response still travels as a normal
    /// response, not a transport error.
    pub(crate) fn reject_illegal(&mut self, msg: RaftMsg) {
        let term = self.meta.current_term();
        let kind = RaftErrorKind::IllegalMemberState;
        match msg {
            RaftMsg::Append { tx, .. } => {
                let _ = tx.send(AppendResponse::error(term, kind));
            }
            RaftMsg::Vote { tx, .. } => {
                let _ = tx.send(VoteResponse::error(term, kind));
            }
            RaftMsg::Poll { tx, .. } => {
                let _ = tx.send(PollResponse::error(term, kind));
            }
            RaftMsg::Install { tx, .. } => {
                let _ = tx.send(InstallResponse::error(term, kind));
            }
            RaftMsg::Configure { tx, .. } => {
                let _ = tx.send(ConfigureResponse::error(kind));
            }
            RaftMsg::Join { tx, .. } | RaftMsg::Leave { tx, .. } | RaftMsg::Reconfigure { tx, .. } => {
                let _ = tx.send(ConfigurationResponse::error(kind, None));
            }
            RaftMsg::Command { tx, .. } => {
                let _ = tx.send(CommandResponse::error(kind, None));
            }
            RaftMsg::Query { tx, .. } => {
                let _ = tx.send(QueryResponse::error(kind, None));
            }
            RaftMsg::KeepAlive { tx, .. } => {
                let _ = tx.send(KeepAliveResponse::error(kind, None));
            }
            RaftMsg::OpenSession { tx, .. } => {
                let _ = tx.send(OpenSessionResponse::error(kind, None));
            }
            RaftMsg::CloseSession { tx, .. } => {
                let _ = tx.send(CloseSessionResponse::error(kind, None));
            }
            RaftMsg::Metadata { tx, .. } => {
                let _ = tx.send(MetadataResponse::error(kind));
            }
        }
    }

    /// Redirect a client message toward the leader: `ILLEGAL_MEMBER_STATE`
    /// with a hint when a leader is known, `NO_LEADER` otherwise.
    pub(crate) fn reject_client(&mut self, msg: RaftMsg) {
        let (kind, leader) = self.leader_hint();
        match msg {
            RaftMsg::Join { tx, .. } | RaftMsg::Leave { tx, .. } | RaftMsg::Reconfigure { tx, .. } => {
                let _ = tx.send(ConfigurationResponse::error(kind, leader));
            }
            RaftMsg::Command { tx, .. } => {
                let _ = tx.send(CommandResponse::error(kind, leader));
            }
            RaftMsg::Query { tx, .. } => {
                let _ = tx.send(QueryResponse::error(kind, leader));
            }
            RaftMsg::KeepAlive { tx, .. } => {
                let _ = tx.send(KeepAliveResponse::error(kind, leader));
            }
            RaftMsg::OpenSession { tx, .. } => {
                let _ = tx.send(OpenSessionResponse::error(kind, leader));
            }
            RaftMsg::CloseSession { tx, .. } => {
                let _ = tx.send(CloseSessionResponse::error(kind, leader));
            }
            other => self.reject_illegal(other),
        }
    }
}
