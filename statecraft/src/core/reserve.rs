//! The reserve role: inactive plus metadata answers from the local view.
//! A reserve member is tracked in the configuration but receives no log
//! entries and never votes.

use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::Role;
use crate::error::StorageError;
use crate::network::RaftNetwork;

pub(crate) struct ReserveState<'a, N: RaftNetwork> {
    core: &'a mut RaftContext<N>,
}

impl<'a, N: RaftNetwork> ReserveState<'a, N> {
    pub(crate) fn new(core: &'a mut RaftContext<N>) -> Self {
        Self { core }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(role = "reserve"))]
    pub(crate) async fn run(mut self) -> Result<(), StorageError> {
        loop {
            if self.core.target_role != Role::Reserve || self.core.shutdown {
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
            RaftMsg::Metadata { rpc, tx } => {
                let _ = tx.send(self.core.handle_metadata(rpc));
            }
            other => self.core.reject_illegal(other),
        }
        Ok(())
    }
}
