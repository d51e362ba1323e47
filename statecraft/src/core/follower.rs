//! The follower role: a voting non-leader.
//!
//! The follower runs an election timer drawn fresh from
//! `[election_timeout, 2 * election_timeout)` after every valid append
//! from the current leader and every granted vote. When the timer fires
//! without contact, the server becomes a candidate.

use tokio::time::sleep_until;

use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::Role;
use crate::error::StorageError;
use crate::network::RaftNetwork;

pub(crate) struct FollowerState<'a, N: RaftNetwork> {
    core: &'a mut RaftContext<N>,
}

impl<'a, N: RaftNetwork> FollowerState<'a, N> {
    pub(crate) fn new(core: &'a mut RaftContext<N>) -> Self {
        Self { core }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(role = "follower"))]
    pub(crate) async fn run(mut self) -> Result<(), StorageError> {
        self.core.reset_election_timeout();

        loop {
            if self.core.target_role != Role::Follower || self.core.shutdown {
                return Ok(());
            }

            let election_timeout = sleep_until(self.core.election_deadline());

            tokio::select! {
                _ = election_timeout => {
                    tracing::debug!("election timeout, becoming candidate");
                    self.core.set_role(Role::Candidate);
                }

                Some(msg) = self.core.rx_api.recv() => self.handle_msg(msg)?,

                Some(n) = self.core.rx_notify.recv() => self.core.handle_notification(n)?,

                _ = &mut self.core.rx_shutdown => self.core.shutdown = true,
            }
        }
    }

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
            other => self.core.reject_client(other),
        }
        Ok(())
    }
}
