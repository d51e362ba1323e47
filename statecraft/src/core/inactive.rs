//! The inactive role.
//!
//! A server runs inactive until a configuration names it. Only
//! `Configure` is served; everything else is answered with
//! `ILLEGAL_MEMBER_STATE`. Installing a configuration that assigns this
//! server a member type triggers the transition out.

use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::Role;
use crate::error::StorageError;
use crate::network::RaftNetwork;

pub(crate) struct InactiveState<'a, N: RaftNetwork> {
    core: &'a mut RaftContext<N>,
}

impl<'a, N: RaftNetwork> InactiveState<'a, N> {
    pub(crate) fn new(core: &'a mut RaftContext<N>) -> Self {
        Self { core }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(role = "inactive"))]
    pub(crate) async fn run(mut self) -> Result<(), StorageError> {
        loop {
            if self.core.target_role != Role::Inactive || self.core.shutdown {
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
            RaftMsg::Configure { rpc, tx } => {
                let resp = self.core.handle_configure(rpc)?;
                let _ = tx.send(resp);
            }
            other => self.core.reject_illegal(other),
        }
        Ok(())
    }
}
