//! The passive role: a non-voting log replica.
//!
//! A passive member accepts appends and snapshot installs and applies
//! committed entries, but never grants votes or pre-votes. Client
//! commands and queries are redirected to the leader; session keep-alives
//! are forwarded on the client's behalf and the response relayed back.

use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::Role;
use crate::error::RaftErrorKind;
use crate::error::StorageError;
use crate::network::RaftNetwork;
use crate::protocol::KeepAliveRequest;
use crate::protocol::KeepAliveResponse;

pub(crate) struct PassiveState<'a, N: RaftNetwork> {
    core: &'a mut RaftContext<N>,
}

impl<'a, N: RaftNetwork> PassiveState<'a, N> {
    pub(crate) fn new(core: &'a mut RaftContext<N>) -> Self {
        Self { core }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(role = "passive"))]
    pub(crate) async fn run(mut self) -> Result<(), StorageError> {
        loop {
            if self.core.target_role != Role::Passive || self.core.shutdown {
                return Ok(());
            }

            tokio::select! {
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
            // Observe the term, never grant.
            RaftMsg::Vote { rpc, tx } => {
                let resp = self.core.handle_vote(rpc, false)?;
                let _ = tx.send(resp);
            }
            RaftMsg::Poll { rpc, tx } => {
                let _ = tx.send(self.core.handle_poll(rpc, false));
            }
            RaftMsg::KeepAlive { rpc, tx } => self.forward_keep_alive(rpc, tx),
            other => self.core.reject_client(other),
        }
        Ok(())
    }

    /// Forward a keep-alive to the known leader and relay its response.
    fn forward_keep_alive(
        &mut self,
        rpc: KeepAliveRequest,
        tx: tokio::sync::oneshot::Sender<KeepAliveResponse>,
    ) {
        let leader = match self.core.leader.and_then(|l| self.core.cluster.member(l)) {
            Some(m) => m.clone(),
            None => {
                let _ = tx.send(KeepAliveResponse::error(RaftErrorKind::NoLeader, None));
                return;
            }
        };

        let network = self.core.network.clone();
        let leader_id = leader.id;
        tokio::spawn(async move {
            let resp = match network.keep_alive(&leader, rpc).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(leader = leader_id, error = %e, "keep-alive forward failed");
                    KeepAliveResponse::error(RaftErrorKind::NoLeader, Some(leader_id))
                }
            };
            let _ = tx.send(resp);
        });
    }
}
