//! The candidate role.
//!
//! Entered when the follower's election timer fires. A candidate first
//! runs a non-binding pre-vote round at `term + 1`; only a pre-vote
//! quorum justifies incrementing the term and requesting real votes. This
//! keeps a partitioned server from inflating terms and disrupting a
//! healthy majority when it returns.
//!
//! Rounds are retried with fresh randomized timeouts until a quorum
//! grants, a leader is heard, or a higher term appears.

use std::collections::BTreeSet;

use maplit::btreeset;
use tokio::time::sleep_until;

use crate::core::raft_msg::Notification;
use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::Role;
use crate::error::StorageError;
use crate::member::Member;
use crate::member::MemberId;
use crate::network::RaftNetwork;
use crate::protocol::PollRequest;
use crate::protocol::VoteRequest;

pub(crate) struct CandidateState<'a, N: RaftNetwork> {
    core: &'a mut RaftContext<N>,

    /// Voters that accepted the pre-vote probe this round.
    polled: BTreeSet<MemberId>,
    /// Voters that granted their vote this round.
    granted: BTreeSet<MemberId>,
    pre_voting: bool,
}

impl<'a, N: RaftNetwork> CandidateState<'a, N> {
    pub(crate) fn new(core: &'a mut RaftContext<N>) -> Self {
        Self {
            core,
            polled: btreeset! {},
            granted: btreeset! {},
            pre_voting: true,
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(role = "candidate"))]
    pub(crate) async fn run(mut self) -> Result<(), StorageError> {
        // Each iteration of the outer loop is one election round.
        loop {
            if self.core.target_role != Role::Candidate || self.core.shutdown {
                return Ok(());
            }

            self.core.reset_election_timeout();
            self.start_poll_round()?;

            loop {
                if self.core.target_role != Role::Candidate || self.core.shutdown {
                    return Ok(());
                }

                let timeout = sleep_until(self.core.election_deadline());

                tokio::select! {
                    // This round timed out; start a new one.
                    _ = timeout => break,

                    Some(msg) = self.core.rx_api.recv() => self.handle_msg(msg)?,

                    Some(n) = self.core.rx_notify.recv() => self.handle_notification(n)?,

                    _ = &mut self.core.rx_shutdown => self.core.shutdown = true,
                }
            }
        }
    }

    /// Probe all voters at `term + 1` without mutating anything.
    fn start_poll_round(&mut self) -> Result<(), StorageError> {
        self.pre_voting = true;
        self.polled = btreeset! { self.core.id };
        self.granted.clear();

        let term = self.core.meta.current_term() + 1;
        let req = PollRequest {
            term,
            candidate: self.core.id,
            last_log_index: self.core.log.last_index(),
            last_log_term: self.core.log.last_term(),
        };
        tracing::debug!(term, "starting pre-vote round");

        for member in self.remote_voters() {
            let network = self.core.network.clone();
            let tx = self.core.tx_notify.clone();
            let target = member.id;
            tokio::spawn(async move {
                let result = network.poll(&member, req).await;
                let _ = tx.send(Notification::PollResult { target, term, result });
            });
        }

        self.check_poll_quorum()
    }

    /// Pre-vote quorum reached: increment the term, vote for ourselves,
    /// and request real votes.
    fn start_vote_round(&mut self) -> Result<(), StorageError> {
        self.pre_voting = false;

        let term = self.core.meta.current_term() + 1;
        self.core.meta.save_vote(term, Some(self.core.id))?;
        self.core.leader = None;
        self.core.report_status();
        self.granted = btreeset! { self.core.id };

        let req = VoteRequest {
            term,
            candidate: self.core.id,
            last_log_index: self.core.log.last_index(),
            last_log_term: self.core.log.last_term(),
        };
        tracing::info!(term, "starting election");

        for member in self.remote_voters() {
            let network = self.core.network.clone();
            let tx = self.core.tx_notify.clone();
            let target = member.id;
            tokio::spawn(async move {
                let result = network.vote(&member, req).await;
                let _ = tx.send(Notification::VoteResult { target, term, result });
            });
        }

        self.check_vote_quorum();
        Ok(())
    }

    fn remote_voters(&self) -> Vec<Member> {
        self.core
            .cluster
            .configuration()
            .voters()
            .filter(|m| m.id != self.core.id)
            .cloned()
            .collect()
    }

    fn check_poll_quorum(&mut self) -> Result<(), StorageError> {
        if self.pre_voting && self.core.cluster.configuration().is_quorum(self.polled.iter()) {
            self.start_vote_round()?;
        }
        Ok(())
    }

    fn check_vote_quorum(&mut self) {
        if !self.pre_voting && self.core.cluster.configuration().is_quorum(self.granted.iter()) {
            tracing::info!(term = self.core.meta.current_term(), "won election");
            self.core.set_role(Role::Leader);
        }
    }

    fn handle_notification(&mut self, n: Notification) -> Result<(), StorageError> {
        match n {
            Notification::PollResult { target, term, result } => {
                // Stale round or phase.
                if !self.pre_voting || term != self.core.meta.current_term() + 1 {
                    return Ok(());
                }
                match result {
                    Err(e) => tracing::debug!(target, error = %e, "pre-vote request failed"),
                    Ok(resp) => {
                        if resp.term > self.core.meta.current_term() {
                            self.core.update_term_and_leader(resp.term, None)?;
                            return Ok(());
                        }
                        if resp.accepted {
                            self.polled.insert(target);
                            self.check_poll_quorum()?;
                        }
                    }
                }
            }

            Notification::VoteResult { target, term, result } => {
                if self.pre_voting || term != self.core.meta.current_term() {
                    return Ok(());
                }
                match result {
                    Err(e) => tracing::debug!(target, error = %e, "vote request failed"),
                    Ok(resp) => {
                        if resp.term > self.core.meta.current_term() {
                            self.core.update_term_and_leader(resp.term, None)?;
                            return Ok(());
                        }
                        if resp.voted {
                            self.granted.insert(target);
                            self.check_vote_quorum();
                        }
                    }
                }
            }

            other => self.core.handle_notification(other)?,
        }
        Ok(())
    }

    fn handle_msg(&mut self, msg: RaftMsg) -> Result<(), StorageError> {
        match msg {
            // A leader at our term or higher ends the candidacy.
            RaftMsg::Append { rpc, tx } => {
                if rpc.term >= self.core.meta.current_term() {
                    self.core.set_role(Role::Follower);
                }
                let resp = self.core.handle_append(rpc)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Install { rpc, tx } => {
                if rpc.term >= self.core.meta.current_term() {
                    self.core.set_role(Role::Follower);
                }
                let resp = self.core.handle_install(rpc)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Vote { rpc, tx } => {
                if rpc.term >= self.core.meta.current_term() {
                    self.core.set_role(Role::Follower);
                }
                let resp = self.core.handle_vote(rpc, true)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Poll { rpc, tx } => {
                let _ = tx.send(self.core.handle_poll(rpc, true));
            }
            RaftMsg::Configure { rpc, tx } => {
                if rpc.term >= self.core.meta.current_term() {
                    self.core.set_role(Role::Follower);
                }
                let resp = self.core.handle_configure(rpc)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Metadata { rpc, tx } => {
                let _ = tx.send(self.core.handle_metadata(rpc));
            }
            other => self.core.reject_client(other),
        }
        Ok(())
    }
}
