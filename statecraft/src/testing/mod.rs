//! Test fixtures: an in-process network router and status helpers.

mod router;

use std::time::Duration;

pub use router::Network;
pub use router::Router;
use tokio::time::timeout_at;
use tokio::time::Instant;

use crate::core::ServerStatus;
use crate::network::RaftNetwork;
use crate::raft::Raft;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for status")]
    Timeout,

    #[error("server is gone")]
    Closed,
}

/// Wait until a server's status satisfies `predicate`, or time out.
pub async fn wait_for_status<N, F>(
    raft: &Raft<N>,
    timeout: Duration,
    predicate: F,
) -> Result<ServerStatus, WaitError>
where
    N: RaftNetwork,
    F: Fn(&ServerStatus) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut rx = raft.status();

    loop {
        {
            let status = rx.borrow().clone();
            if predicate(&status) {
                return Ok(status);
            }
        }
        match timeout_at(deadline, rx.changed()).await {
            Err(_) => return Err(WaitError::Timeout),
            Ok(Err(_)) => return Err(WaitError::Closed),
            Ok(Ok(())) => {}
        }
    }
}
