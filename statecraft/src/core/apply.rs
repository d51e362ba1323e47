//! The apply task.
//!
//! A dedicated task owns the [`StateMachine`] and consumes [`ApplyMsg`]s
//! in submission order: committed entry batches, reads, snapshot capture
//! and restore. Because the queue is ordered, a read enqueued after the
//! batch covering its read index observes all state through that index.
//! Apply never runs ahead of commit; the server task only enqueues entries
//! it has already marked committed.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::raft_msg::AppliedEntry;
use crate::core::raft_msg::ApplyMsg;
use crate::core::raft_msg::Notification;
use crate::protocol::QueryResponse;
use crate::protocol::Status;
use crate::state_machine::StateMachine;

pub(crate) fn spawn<SM: StateMachine>(
    mut sm: SM,
    mut rx: mpsc::UnboundedReceiver<ApplyMsg>,
    tx_notify: mpsc::UnboundedSender<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                ApplyMsg::Entries(entries) => {
                    let results: Vec<AppliedEntry> = entries
                        .iter()
                        .map(|entry| AppliedEntry {
                            index: entry.index,
                            output: sm.apply(entry),
                        })
                        .collect();

                    if tx_notify.send(Notification::Applied { results }).is_err() {
                        return;
                    }
                }

                ApplyMsg::Query {
                    session,
                    sequence,
                    operation,
                    index,
                    leader,
                    tx,
                } => {
                    let resp = match sm.query(session, sequence, &operation) {
                        Ok(result) => QueryResponse {
                            status: Status::Ok,
                            error: None,
                            leader,
                            index,
                            result: Some(result),
                        },
                        Err(e) => {
                            tracing::debug!(session, sequence, error = %e, "query failed");
                            QueryResponse::error(e.kind(), leader)
                        }
                    };
                    let _ = tx.send(resp);
                }

                ApplyMsg::Snapshot { meta } => match sm.snapshot() {
                    Ok(data) => {
                        let _ = tx_notify.send(Notification::SnapshotReady { meta, data });
                    }
                    Err(e) => {
                        tracing::warn!(index = meta.index, error = %e, "snapshot capture failed");
                    }
                },

                ApplyMsg::Restore { meta, data } => match sm.restore(&meta, &data) {
                    Ok(()) => {
                        if tx_notify
                            .send(Notification::Restored { index: meta.index })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!(index = meta.index, error = %e, "snapshot restore failed");
                    }
                },
            }
        }
    })
}
