//! The leader role.
//!
//! On assuming leadership the leader writes an initialize no-op at its own
//! term and replicates it immediately; no read is served before an entry
//! of the current term commits. Per-peer progress (`next_index`,
//! `match_index`) lives in the cluster's [`PeerState`](crate::cluster::PeerState);
//! at most one append or install is in flight per peer, network sends run
//! as detached tasks, and their completions come back to the server task
//! as notifications carrying the term they were issued in. A completion
//! from an older term or a replaced role is dropped.
//!
//! The commit index advances to the highest index replicated on a quorum
//! of voters whose entry is from the current term; an older-term entry is
//! never committed by match count alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::sleep_until;
use tokio::time::Instant;

use crate::core::raft_msg::AppliedEntry;
use crate::core::raft_msg::ApplyMsg;
use crate::core::raft_msg::Notification;
use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::Role;
use crate::entry::Consistency;
use crate::entry::EntryPayload;
use crate::error::RaftErrorKind;
use crate::error::StorageError;
use crate::member::Member;
use crate::member::MemberId;
use crate::network::RaftNetwork;
use crate::protocol::*;
use crate::snapshot::SnapshotMeta;
use crate::state_machine::ApplyOutput;

/// A client waiting for its entry to commit and apply.
enum Responder {
    Command(oneshot::Sender<CommandResponse>),
    OpenSession {
        tx: oneshot::Sender<OpenSessionResponse>,
        timeout: u64,
    },
    CloseSession(oneshot::Sender<CloseSessionResponse>),
    KeepAlive(oneshot::Sender<KeepAliveResponse>),
    /// Completed at commit rather than apply.
    Configuration(oneshot::Sender<ConfigurationResponse>),
}

/// A linearizable read waiting for its barrier: a quorum round started
/// after the read arrived, and the apply queue reaching the read index.
struct PendingRead {
    read_index: u64,
    issued_at: Instant,
    rpc: QueryRequest,
    tx: oneshot::Sender<QueryResponse>,
}

pub(crate) struct LeaderState<'a, N: RaftNetwork> {
    core: &'a mut RaftContext<N>,

    responders: BTreeMap<u64, Responder>,
    pending_reads: Vec<PendingRead>,

    /// Snapshot payload cached for streaming to lagging peers.
    snapshot_cache: Option<(SnapshotMeta, Arc<Vec<u8>>)>,

    /// Index of this term's initialize entry.
    initialize_index: u64,

    /// Set when a committed configuration removed or demoted this server;
    /// the transition happens after the heartbeat round that propagates
    /// the commit.
    step_down: Option<Role>,

    next_heartbeat: Instant,
}

impl<'a, N: RaftNetwork> LeaderState<'a, N> {
    pub(crate) fn new(core: &'a mut RaftContext<N>) -> Self {
        let next_heartbeat = Instant::now() + core.config.heartbeat();
        Self {
            core,
            responders: BTreeMap::new(),
            pending_reads: Vec::new(),
            snapshot_cache: None,
            initialize_index: 0,
            step_down: None,
            next_heartbeat,
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(role = "leader", term = self.core.meta.current_term()))]
    pub(crate) async fn run(mut self) -> Result<(), StorageError> {
        self.establish()?;

        loop {
            if self.core.target_role != Role::Leader || self.core.shutdown {
                self.abdicate();
                return Ok(());
            }

            let heartbeat = sleep_until(self.next_heartbeat);

            tokio::select! {
                _ = heartbeat => {
                    self.next_heartbeat = Instant::now() + self.core.config.heartbeat();
                    // A demoting configuration gets one more heartbeat
                    // round to carry its commit index before we go.
                    let stepping_down = self.step_down.take();
                    self.drive_all()?;
                    self.push_configurations();
                    self.check_pending_reads()?;
                    if let Some(role) = stepping_down {
                        self.core.set_role(role);
                    }
                }

                Some(msg) = self.core.rx_api.recv() => self.handle_msg(msg)?,

                Some(n) = self.core.rx_notify.recv() => self.handle_notification(n)?,

                _ = &mut self.core.rx_shutdown => self.core.shutdown = true,
            }
        }
    }

    /// Assume leadership: reset progress, write the initialize entry, and
    /// start replicating it.
    fn establish(&mut self) -> Result<(), StorageError> {
        self.core.leader = Some(self.core.id);
        self.core.last_leader_contact = Some(Instant::now());

        let last_index = self.core.log.last_index();
        self.core.cluster.reset_progress(last_index);

        let entry = self.core.append_local(EntryPayload::Initialize)?;
        self.initialize_index = entry.index;
        tracing::info!(
            term = self.core.meta.current_term(),
            index = entry.index,
            "assumed leadership"
        );
        self.core.report_status();

        self.maybe_commit()?;
        self.drive_all()?;
        self.push_configurations();
        Ok(())
    }

    /// Step-down cleanup: pending client operations complete with a
    /// retryable error carrying the new leader when known.
    fn abdicate(&mut self) {
        let leader = self.core.leader.filter(|l| *l != self.core.id);
        let kind = RaftErrorKind::NoLeader;

        for (_, responder) in std::mem::take(&mut self.responders) {
            match responder {
                Responder::Command(tx) => {
                    let _ = tx.send(CommandResponse::error(kind, leader));
                }
                Responder::OpenSession { tx, .. } => {
                    let _ = tx.send(OpenSessionResponse::error(kind, leader));
                }
                Responder::CloseSession(tx) => {
                    let _ = tx.send(CloseSessionResponse::error(kind, leader));
                }
                Responder::KeepAlive(tx) => {
                    let _ = tx.send(KeepAliveResponse::error(kind, leader));
                }
                Responder::Configuration(tx) => {
                    let _ = tx.send(ConfigurationResponse::error(kind, leader));
                }
            }
        }
        for read in std::mem::take(&mut self.pending_reads) {
            let _ = read.tx.send(QueryResponse::error(kind, leader));
        }
    }

    // ---------------------------------------------------------------
    // Replication
    // ---------------------------------------------------------------

    fn drive_all(&mut self) -> Result<(), StorageError> {
        let targets: Vec<MemberId> = self.core.cluster.peers().map(|p| p.member.id).collect();
        for target in targets {
            self.drive_peer(target)?;
        }
        Ok(())
    }

    /// Send the next batch (or snapshot chunk, or heartbeat) to one peer,
    /// unless one is already in flight or the peer is backing off.
    fn drive_peer(&mut self, target: MemberId) -> Result<(), StorageError> {
        let now = Instant::now();
        let (member, next_index) = match self.core.cluster.peer(target) {
            Some(p) if p.ready(now) && p.member.member_type.receives_log() => {
                (p.member.clone(), p.next_index)
            }
            _ => return Ok(()),
        };

        if next_index < self.core.log.first_index() {
            return self.send_snapshot_chunk(member);
        }

        let term = self.core.meta.current_term();
        let prev_log_index = next_index - 1;
        let prev_log_term = self.core.term_at(prev_log_index)?.unwrap_or(0);
        let entries = self.core.log.batch(
            next_index,
            self.core.config.max_append_entries,
            self.core.config.max_append_bytes,
        )?;
        let sent = entries.len() as u64;

        let req = AppendRequest {
            term,
            leader: self.core.id,
            prev_log_index,
            prev_log_term,
            entries,
            commit_index: self.core.commit_index,
        };

        if let Some(peer) = self.core.cluster.peer_mut(target) {
            peer.append_pending = true;
        }

        let network = self.core.network.clone();
        let tx = self.core.tx_notify.clone();
        tokio::spawn(async move {
            let result = network.append(&member, req).await;
            let _ = tx.send(Notification::AppendResult {
                target,
                term,
                prev_log_index,
                sent,
                result,
            });
        });
        Ok(())
    }

    /// Stream the next snapshot chunk to a peer whose next index was
    /// compacted away.
    fn send_snapshot_chunk(&mut self, member: Member) -> Result<(), StorageError> {
        let target = member.id;
        let (meta, data) = match self.snapshot_data()? {
            Some(s) => s,
            None => {
                // No snapshot exists; the peer can be served from the log
                // after all.
                if let Some(peer) = self.core.cluster.peer_mut(target) {
                    peer.next_index = self.core.log.first_index();
                }
                return Ok(());
            }
        };

        let mut offset = self
            .core
            .cluster
            .peer(target)
            .and_then(|p| p.snapshot_offset)
            .unwrap_or(0);
        // The stream restarts when a newer, possibly shorter snapshot
        // replaced the one the offset was tracking.
        if offset > data.len() as u64 {
            offset = 0;
        }
        let end = (offset + self.core.config.snapshot_chunk_size).min(data.len() as u64);
        let complete = end == data.len() as u64;
        let chunk = data[offset as usize..end as usize].to_vec();
        let len = chunk.len() as u64;

        let term = self.core.meta.current_term();
        let req = InstallRequest {
            term,
            leader: self.core.id,
            snapshot_index: meta.index,
            snapshot_term: meta.term,
            offset,
            data: chunk,
            complete,
        };

        if let Some(peer) = self.core.cluster.peer_mut(target) {
            peer.append_pending = true;
            peer.snapshot_offset = Some(offset);
        }
        tracing::debug!(target, offset, len, complete, "sending snapshot chunk");

        let network = self.core.network.clone();
        let tx = self.core.tx_notify.clone();
        let snapshot_index = meta.index;
        tokio::spawn(async move {
            let result = network.install(&member, req).await;
            let _ = tx.send(Notification::InstallResult {
                target,
                term,
                snapshot_index,
                offset,
                len,
                complete,
                result,
            });
        });
        Ok(())
    }

    fn snapshot_data(&mut self) -> Result<Option<(SnapshotMeta, Arc<Vec<u8>>)>, StorageError> {
        if self.snapshot_cache.is_none() {
            self.snapshot_cache = self
                .core
                .snapshots
                .read_latest()?
                .map(|(meta, data)| (meta, Arc::new(data)));
        }
        Ok(self.snapshot_cache.clone())
    }

    /// Push the current configuration to peers that have not acknowledged
    /// it. This is how reserve members and fresh joiners, who receive no
    /// appends, learn the membership.
    fn push_configurations(&mut self) {
        let cfg_index = self.core.cluster.configuration().index;
        let req = self.core.configure_request();

        let targets: Vec<Member> = self
            .core
            .cluster
            .peers()
            .filter(|p| !p.configure_pending && p.configured_index < cfg_index)
            .map(|p| p.member.clone())
            .collect();

        for member in targets {
            let target = member.id;
            if let Some(peer) = self.core.cluster.peer_mut(target) {
                peer.configure_pending = true;
            }
            let network = self.core.network.clone();
            let tx = self.core.tx_notify.clone();
            let req = req.clone();
            let index = cfg_index;
            tokio::spawn(async move {
                let result = network.configure(&member, req).await;
                let _ = tx.send(Notification::ConfigureResult { target, index, result });
            });
        }
    }

    // ---------------------------------------------------------------
    // Completions
    // ---------------------------------------------------------------

    fn handle_notification(&mut self, n: Notification) -> Result<(), StorageError> {
        match n {
            Notification::AppendResult {
                target,
                term,
                prev_log_index,
                sent,
                result,
            } => {
                // Re-verify on resumption: a result from an older term or
                // a departed peer is a no-op.
                if term != self.core.meta.current_term() {
                    return Ok(());
                }
                let Some(peer) = self.core.cluster.peer_mut(target) else {
                    return Ok(());
                };
                peer.append_pending = false;

                let resp = match result {
                    Err(e) => {
                        let backoff = self.core.config.backoff(peer.failure_count);
                        peer.record_failure(backoff);
                        tracing::debug!(target, error = %e, "append failed, backing off");
                        return Ok(());
                    }
                    Ok(resp) => resp,
                };

                if resp.term > self.core.meta.current_term() {
                    self.core.update_term_and_leader(resp.term, None)?;
                    return Ok(());
                }
                peer.record_success();

                if resp.succeeded {
                    let matched = prev_log_index + sent;
                    if matched > peer.match_index {
                        peer.match_index = matched;
                    }
                    peer.next_index = peer.match_index + 1;
                    let more = peer.next_index <= self.core.log.last_index();

                    self.maybe_commit()?;
                    self.check_pending_reads()?;
                    if more {
                        self.drive_peer(target)?;
                    }
                } else if resp.error == Some(RaftErrorKind::IllegalMemberState) {
                    // The peer has not been configured yet; appends are
                    // useless until a configure push lands.
                    peer.configured_index = 0;
                    self.push_configurations();
                } else {
                    // Consistency check failed; back off to the hint.
                    peer.next_index = resp.log_index.max(1);
                    tracing::debug!(target, next_index = peer.next_index, "append rejected, backing off");
                    self.drive_peer(target)?;
                }
            }

            Notification::InstallResult {
                target,
                term,
                snapshot_index,
                offset,
                len,
                complete,
                result,
            } => {
                if term != self.core.meta.current_term() {
                    return Ok(());
                }
                let Some(peer) = self.core.cluster.peer_mut(target) else {
                    return Ok(());
                };
                peer.append_pending = false;

                let resp = match result {
                    Err(e) => {
                        let backoff = self.core.config.backoff(peer.failure_count);
                        peer.record_failure(backoff);
                        tracing::debug!(target, error = %e, "install failed, backing off");
                        return Ok(());
                    }
                    Ok(resp) => resp,
                };

                if resp.term > self.core.meta.current_term() {
                    self.core.update_term_and_leader(resp.term, None)?;
                    return Ok(());
                }
                peer.record_success();

                if complete && resp.next_offset == offset + len {
                    peer.snapshot_offset = None;
                    if snapshot_index > peer.match_index {
                        peer.match_index = snapshot_index;
                    }
                    peer.next_index = peer.match_index + 1;
                    tracing::info!(target, snapshot_index, "snapshot streamed");
                    self.maybe_commit()?;
                    self.drive_peer(target)?;
                } else {
                    peer.snapshot_offset = Some(resp.next_offset);
                    self.drive_peer(target)?;
                }
            }

            Notification::ConfigureResult { target, index, result } => {
                let Some(peer) = self.core.cluster.peer_mut(target) else {
                    return Ok(());
                };
                peer.configure_pending = false;
                match result {
                    Ok(resp) if resp.status == Status::Ok => {
                        if index > peer.configured_index {
                            peer.configured_index = index;
                        }
                        // A freshly configured member can take appends now.
                        self.drive_peer(target)?;
                    }
                    Ok(resp) => {
                        tracing::debug!(target, error = ?resp.error, "configure rejected");
                    }
                    Err(e) => {
                        tracing::debug!(target, error = %e, "configure failed");
                    }
                }
            }

            Notification::Applied { results } => {
                for applied in &results {
                    if applied.index > self.core.last_applied {
                        self.core.last_applied = applied.index;
                    }
                }
                self.core.report_status();
                for applied in results {
                    self.complete_applied(applied);
                }
            }

            Notification::SnapshotReady { .. } => {
                self.snapshot_cache = None;
                self.core.handle_notification(n)?;
            }

            other => self.core.handle_notification(other)?,
        }
        Ok(())
    }

    /// Advance the commit index from quorum match progress, gated on the
    /// entry being from the current term.
    fn maybe_commit(&mut self) -> Result<(), StorageError> {
        let n = self.core.cluster.quorum_match_index(self.core.log.last_index());
        if n <= self.core.commit_index {
            return Ok(());
        }
        if self.core.term_at(n)? != Some(self.core.meta.current_term()) {
            return Ok(());
        }

        let outcomes = self.core.advance_commit(n)?;
        self.complete_committed();
        self.check_pending_reads()?;

        for outcome in outcomes {
            self.push_configurations();
            if let Some(t) = outcome.local_type_changed {
                tracing::info!(
                    "committed configuration demotes this leader; stepping down after heartbeat"
                );
                self.step_down = Some(Role::for_member_type(t));
            }
        }
        Ok(())
    }

    /// Configuration changes answer at commit; everything else answers at
    /// apply.
    fn complete_committed(&mut self) {
        let commit = self.core.commit_index;
        let committed: Vec<u64> = self
            .responders
            .iter()
            .filter(|(index, r)| **index <= commit && matches!(r, Responder::Configuration(_)))
            .map(|(index, _)| *index)
            .collect();

        for index in committed {
            if let Some(Responder::Configuration(tx)) = self.responders.remove(&index) {
                let cfg = self.core.cluster.configuration();
                let _ = tx.send(ConfigurationResponse {
                    status: Status::Ok,
                    error: None,
                    leader: Some(self.core.id),
                    index: cfg.index,
                    term: cfg.term,
                    members: cfg.members.values().cloned().collect(),
                });
            }
        }
    }

    fn complete_applied(&mut self, applied: AppliedEntry) {
        let Some(responder) = self.responders.remove(&applied.index) else {
            return;
        };
        let leader = Some(self.core.id);

        match responder {
            Responder::Command(tx) => {
                let resp = match applied.output {
                    Ok(ApplyOutput::Command(result)) => CommandResponse {
                        status: Status::Ok,
                        error: None,
                        leader,
                        index: applied.index,
                        event_index: 0,
                        result: Some(result),
                    },
                    Ok(_) => CommandResponse::error(RaftErrorKind::ProtocolError, leader),
                    Err(e) => CommandResponse::error(e.kind(), leader),
                };
                let _ = tx.send(resp);
            }

            Responder::OpenSession { tx, timeout } => {
                let resp = match applied.output {
                    Ok(ApplyOutput::SessionOpened(session)) => OpenSessionResponse {
                        status: Status::Ok,
                        error: None,
                        leader,
                        session,
                        timeout,
                    },
                    Ok(_) => OpenSessionResponse::error(RaftErrorKind::ProtocolError, leader),
                    Err(e) => OpenSessionResponse::error(e.kind(), leader),
                };
                let _ = tx.send(resp);
            }

            Responder::CloseSession(tx) => {
                let resp = match applied.output {
                    Ok(_) => CloseSessionResponse::ok(),
                    Err(e) => CloseSessionResponse::error(e.kind(), leader),
                };
                let _ = tx.send(resp);
            }

            Responder::KeepAlive(tx) => {
                let resp = match applied.output {
                    Ok(_) => KeepAliveResponse {
                        status: Status::Ok,
                        error: None,
                        leader,
                        members: self
                            .core
                            .cluster
                            .configuration()
                            .members
                            .values()
                            .cloned()
                            .collect(),
                    },
                    Err(e) => KeepAliveResponse::error(e.kind(), leader),
                };
                let _ = tx.send(resp);
            }

            Responder::Configuration(tx) => {
                // Normally completed at commit; answer late rather than
                // never.
                let cfg = self.core.cluster.configuration();
                let _ = tx.send(ConfigurationResponse {
                    status: Status::Ok,
                    error: None,
                    leader,
                    index: cfg.index,
                    term: cfg.term,
                    members: cfg.members.values().cloned().collect(),
                });
            }
        }
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// A read is served once the apply queue has reached its read index
    /// and a quorum answered after the read arrived.
    fn check_pending_reads(&mut self) -> Result<(), StorageError> {
        if self.pending_reads.is_empty() {
            return Ok(());
        }

        let mut remaining = Vec::new();
        for read in std::mem::take(&mut self.pending_reads) {
            let barrier_met = self.core.applied_enqueued >= read.read_index
                && self.core.cluster.quorum_contacted_since(read.issued_at);
            if barrier_met {
                self.serve_query(read.rpc, read.read_index, read.tx);
            } else {
                remaining.push(read);
            }
        }
        self.pending_reads = remaining;
        Ok(())
    }

    fn serve_query(&mut self, rpc: QueryRequest, index: u64, tx: oneshot::Sender<QueryResponse>) {
        let _ = self.core.tx_apply.send(ApplyMsg::Query {
            session: rpc.session,
            sequence: rpc.sequence,
            operation: rpc.operation,
            index,
            leader: Some(self.core.id),
            tx,
        });
    }

    // ---------------------------------------------------------------
    // Client operations
    // ---------------------------------------------------------------

    fn handle_msg(&mut self, msg: RaftMsg) -> Result<(), StorageError> {
        match msg {
            RaftMsg::Append { rpc, tx } => {
                let resp = self.core.handle_append(rpc)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Vote { rpc, tx } => {
                let resp = self.core.handle_vote(rpc, true)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Poll { rpc, tx } => {
                let _ = tx.send(self.core.handle_poll(rpc, true));
            }
            RaftMsg::Install { rpc, tx } => {
                let resp = self.core.handle_install(rpc)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Configure { rpc, tx } => {
                let resp = self.core.handle_configure(rpc)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Metadata { rpc, tx } => {
                let _ = tx.send(self.core.handle_metadata(rpc));
            }

            RaftMsg::Command { rpc, tx } => self.on_command(rpc, tx)?,
            RaftMsg::Query { rpc, tx } => self.on_query(rpc, tx)?,
            RaftMsg::KeepAlive { rpc, tx } => self.on_keep_alive(rpc, tx)?,
            RaftMsg::OpenSession { rpc, tx } => self.on_open_session(rpc, tx)?,
            RaftMsg::CloseSession { rpc, tx } => self.on_close_session(rpc, tx)?,
            RaftMsg::Join { rpc, tx } => self.on_join(rpc, tx)?,
            RaftMsg::Leave { rpc, tx } => self.on_leave(rpc, tx)?,
            RaftMsg::Reconfigure { rpc, tx } => self.on_reconfigure(rpc, tx)?,
        }
        Ok(())
    }

    fn on_command(
        &mut self,
        rpc: CommandRequest,
        tx: oneshot::Sender<CommandResponse>,
    ) -> Result<(), StorageError> {
        let entry = self.core.append_local(EntryPayload::Command {
            session: rpc.session,
            sequence: rpc.sequence,
            operation: rpc.operation,
        })?;
        self.responders.insert(entry.index, Responder::Command(tx));
        self.maybe_commit()?;
        self.drive_all()
    }

    fn on_query(
        &mut self,
        rpc: QueryRequest,
        tx: oneshot::Sender<QueryResponse>,
    ) -> Result<(), StorageError> {
        match rpc.consistency {
            Consistency::Sequential => {
                let index = self.core.last_applied;
                self.serve_query(rpc, index, tx);
                Ok(())
            }

            Consistency::LinearizableLease => {
                let lease_start = Instant::now() - self.core.config.leader_lease();
                let established = self.core.commit_index >= self.initialize_index;
                if established && self.core.cluster.quorum_contacted_since(lease_start) {
                    let index = self.core.applied_enqueued;
                    self.serve_query(rpc, index, tx);
                    Ok(())
                } else {
                    // Lease not provable; fall back to the read barrier.
                    self.barrier_read(rpc, tx)
                }
            }

            Consistency::Linearizable => self.barrier_read(rpc, tx),
        }
    }

    fn barrier_read(
        &mut self,
        rpc: QueryRequest,
        tx: oneshot::Sender<QueryResponse>,
    ) -> Result<(), StorageError> {
        let read_index = self.core.commit_index.max(self.initialize_index);
        self.pending_reads.push(PendingRead {
            read_index,
            issued_at: Instant::now(),
            rpc,
            tx,
        });
        // Trigger a quorum round now rather than at the next heartbeat.
        self.drive_all()?;
        self.check_pending_reads()
    }

    fn on_keep_alive(
        &mut self,
        rpc: KeepAliveRequest,
        tx: oneshot::Sender<KeepAliveResponse>,
    ) -> Result<(), StorageError> {
        let entry = self.core.append_local(EntryPayload::KeepAlive {
            sessions: rpc.sessions,
        })?;
        self.responders.insert(entry.index, Responder::KeepAlive(tx));
        self.maybe_commit()?;
        self.drive_all()
    }

    fn on_open_session(
        &mut self,
        rpc: OpenSessionRequest,
        tx: oneshot::Sender<OpenSessionResponse>,
    ) -> Result<(), StorageError> {
        let timeout = if rpc.timeout == 0 {
            self.core.config.session_timeout
        } else {
            rpc.timeout
        };
        let entry = self.core.append_local(EntryPayload::OpenSession { timeout })?;
        self.responders
            .insert(entry.index, Responder::OpenSession { tx, timeout });
        self.maybe_commit()?;
        self.drive_all()
    }

    fn on_close_session(
        &mut self,
        rpc: CloseSessionRequest,
        tx: oneshot::Sender<CloseSessionResponse>,
    ) -> Result<(), StorageError> {
        let entry = self.core.append_local(EntryPayload::CloseSession {
            session: rpc.session,
            expired: false,
        })?;
        self.responders.insert(entry.index, Responder::CloseSession(tx));
        self.maybe_commit()?;
        self.drive_all()
    }

    // ---------------------------------------------------------------
    // Configuration changes: one at a time, answered at commit.
    // ---------------------------------------------------------------

    /// True when a configuration entry is written but not yet committed.
    fn change_in_progress(&self) -> bool {
        self.core.cluster.configuration().index > self.core.commit_index
            || self
                .responders
                .values()
                .any(|r| matches!(r, Responder::Configuration(_)))
    }

    fn append_configuration(
        &mut self,
        members: std::collections::BTreeMap<MemberId, Member>,
        tx: oneshot::Sender<ConfigurationResponse>,
    ) -> Result<(), StorageError> {
        let entry = self.core.append_local(EntryPayload::Configuration { members })?;
        self.responders.insert(entry.index, Responder::Configuration(tx));
        self.maybe_commit()?;
        self.drive_all()
    }

    /// Answer a change request with the current configuration, for
    /// idempotent joins and leaves.
    fn current_configuration_response(&self) -> ConfigurationResponse {
        let cfg = self.core.cluster.configuration();
        ConfigurationResponse {
            status: Status::Ok,
            error: None,
            leader: Some(self.core.id),
            index: cfg.index,
            term: cfg.term,
            members: cfg.members.values().cloned().collect(),
        }
    }

    fn on_join(
        &mut self,
        rpc: JoinRequest,
        tx: oneshot::Sender<ConfigurationResponse>,
    ) -> Result<(), StorageError> {
        if self.change_in_progress() {
            let _ = tx.send(ConfigurationResponse::error(
                RaftErrorKind::ConfigurationError,
                Some(self.core.id),
            ));
            return Ok(());
        }

        let cfg = self.core.cluster.configuration();
        if let Some(existing) = cfg.member(rpc.member.id) {
            if existing.address == rpc.member.address
                && existing.member_type == rpc.member.member_type
            {
                let _ = tx.send(self.current_configuration_response());
                return Ok(());
            }
        }

        tracing::info!(member = %rpc.member, "join requested");
        let mut members = cfg.members.clone();
        members.insert(rpc.member.id, rpc.member);
        self.append_configuration(members, tx)
    }

    fn on_leave(
        &mut self,
        rpc: LeaveRequest,
        tx: oneshot::Sender<ConfigurationResponse>,
    ) -> Result<(), StorageError> {
        if self.change_in_progress() {
            let _ = tx.send(ConfigurationResponse::error(
                RaftErrorKind::ConfigurationError,
                Some(self.core.id),
            ));
            return Ok(());
        }

        let cfg = self.core.cluster.configuration();
        if cfg.member(rpc.member.id).is_none() {
            let _ = tx.send(self.current_configuration_response());
            return Ok(());
        }

        tracing::info!(member = %rpc.member, "leave requested");
        let mut members = cfg.members.clone();
        members.remove(&rpc.member.id);
        self.append_configuration(members, tx)
    }

    fn on_reconfigure(
        &mut self,
        rpc: ReconfigureRequest,
        tx: oneshot::Sender<ConfigurationResponse>,
    ) -> Result<(), StorageError> {
        if self.change_in_progress() {
            let _ = tx.send(ConfigurationResponse::error(
                RaftErrorKind::ConfigurationError,
                Some(self.core.id),
            ));
            return Ok(());
        }

        let cfg = self.core.cluster.configuration();
        if cfg.member(rpc.member.id).is_none() {
            let _ = tx.send(ConfigurationResponse::error(
                RaftErrorKind::ConfigurationError,
                Some(self.core.id),
            ));
            return Ok(());
        }

        tracing::info!(member = %rpc.member, "reconfigure requested");
        let mut members = cfg.members.clone();
        members.insert(rpc.member.id, rpc.member);
        self.append_configuration(members, tx)
    }
}
