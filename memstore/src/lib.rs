//! An in-memory key-value state machine with client sessions, for
//! statecraft demos and tests.
//!
//! Commands and queries are JSON-encoded [`Request`] values. Sessions are
//! owned here, as the state machine contract requires: session ids are
//! the log index of the `OpenSession` entry, commands are deduplicated by
//! `(session, sequence)` with cached responses, and sessions expire
//! deterministically against a logical clock advanced by entry
//! timestamps, so every replica makes the same expiry decisions.
//!
//! The store is cheaply cloneable; tests keep a clone to inspect applied
//! state while the server owns the state machine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use statecraft::AnyError;
use statecraft::ApplyOutput;
use statecraft::Entry;
use statecraft::EntryPayload;
use statecraft::SnapshotMeta;
use statecraft::StateMachine;
use statecraft::StateMachineError;

/// The operations the store understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Set { key: String, value: String },
    Delete { key: String },
    Get { key: String },
}

impl Request {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Request::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Request::Delete { key: key.into() }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Request::Get { key: key.into() }
    }

    /// The wire form carried in a command or query operation.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("request serialization cannot fail")
    }
}

/// The previous (for writes) or current (for reads) value of the key.
pub fn decode_response(bytes: &[u8]) -> Option<String> {
    serde_json::from_slice(bytes).unwrap_or(None)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    timeout: u64,
    last_heartbeat: u64,
    /// Cached responses by sequence, pruned by keep-alive acks.
    responses: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inner {
    data: BTreeMap<String, String>,
    sessions: BTreeMap<u64, Session>,
    /// Logical clock in milliseconds, advanced by entry timestamps.
    time: u64,
    last_applied: u64,
}

impl Inner {
    fn expire_sessions(&mut self) {
        let now = self.time;
        self.sessions
            .retain(|_, s| s.last_heartbeat.saturating_add(s.timeout) >= now);
    }

    fn execute(&mut self, request: Request) -> Vec<u8> {
        let previous = match request {
            Request::Set { key, value } => self.data.insert(key, value),
            Request::Delete { key } => self.data.remove(&key),
            Request::Get { key } => self.data.get(&key).cloned(),
        };
        serde_json::to_vec(&previous).expect("response serialization cannot fail")
    }
}

/// The cloneable store.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value of a key, for test assertions.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().data.get(key).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn last_applied(&self) -> u64 {
        self.inner.lock().unwrap().last_applied
    }
}

impl StateMachine for MemStore {
    fn apply(&mut self, entry: &Entry) -> Result<ApplyOutput, StateMachineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.time = inner.time.max(entry.timestamp);
        inner.expire_sessions();
        inner.last_applied = entry.index;

        match &entry.payload {
            EntryPayload::Initialize
            | EntryPayload::Configuration { .. }
            | EntryPayload::Query { .. } => Ok(ApplyOutput::None),

            EntryPayload::OpenSession { timeout } => {
                // The entry index is the session id: unique and identical
                // on every replica.
                let session = entry.index;
                let now = inner.time;
                inner.sessions.insert(
                    session,
                    Session {
                        timeout: *timeout,
                        last_heartbeat: now,
                        responses: BTreeMap::new(),
                    },
                );
                Ok(ApplyOutput::SessionOpened(session))
            }

            EntryPayload::CloseSession { session, expired } => {
                if inner.sessions.remove(session).is_none() && !expired {
                    return Err(StateMachineError::UnknownSession(*session));
                }
                Ok(ApplyOutput::SessionClosed)
            }

            EntryPayload::KeepAlive { sessions } => {
                let now = inner.time;
                for ka in sessions {
                    let session = inner
                        .sessions
                        .get_mut(&ka.session)
                        .ok_or(StateMachineError::UnknownSession(ka.session))?;
                    session.last_heartbeat = now;
                    let keep = session.responses.split_off(&ka.command_sequence);
                    session.responses = keep;
                }
                Ok(ApplyOutput::KeptAlive)
            }

            EntryPayload::Command {
                session,
                sequence,
                operation,
            } => {
                let now = inner.time;
                let sess = inner
                    .sessions
                    .get_mut(session)
                    .ok_or(StateMachineError::UnknownSession(*session))?;
                sess.last_heartbeat = now;

                // Duplicate delivery returns the cached response without
                // re-executing.
                if let Some(cached) = sess.responses.get(sequence) {
                    return Ok(ApplyOutput::Command(cached.clone()));
                }

                let request: Request = serde_json::from_slice(operation)
                    .map_err(|e| StateMachineError::Application(AnyError::error(e.to_string())))?;
                let response = inner.execute(request);

                if let Some(sess) = inner.sessions.get_mut(session) {
                    sess.responses.insert(*sequence, response.clone());
                }
                Ok(ApplyOutput::Command(response))
            }
        }
    }

    fn query(
        &mut self,
        session: u64,
        _sequence: u64,
        operation: &[u8],
    ) -> Result<Vec<u8>, StateMachineError> {
        let mut inner = self.inner.lock().unwrap();

        if session != 0 && !inner.sessions.contains_key(&session) {
            return Err(StateMachineError::UnknownSession(session));
        }

        let request: Request = serde_json::from_slice(operation)
            .map_err(|e| StateMachineError::Application(AnyError::error(e.to_string())))?;
        Ok(inner.execute(request))
    }

    fn snapshot(&mut self) -> Result<Vec<u8>, StateMachineError> {
        let inner = self.inner.lock().unwrap();
        serde_json::to_vec(&*inner)
            .map_err(|e| StateMachineError::Application(AnyError::error(e.to_string())))
    }

    fn restore(&mut self, meta: &SnapshotMeta, data: &[u8]) -> Result<(), StateMachineError> {
        let mut restored: Inner = serde_json::from_slice(data)
            .map_err(|e| StateMachineError::Application(AnyError::error(e.to_string())))?;
        restored.last_applied = meta.index;

        let mut inner = self.inner.lock().unwrap();
        *inner = restored;
        tracing::debug!(index = meta.index, "memstore restored from snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use statecraft::Consistency;
    use statecraft::SessionKeepAlive;

    use super::*;

    fn entry(index: u64, timestamp: u64, payload: EntryPayload) -> Entry {
        Entry {
            index,
            term: 1,
            timestamp,
            payload,
        }
    }

    fn open_session(sm: &mut MemStore, index: u64, timestamp: u64, timeout: u64) -> u64 {
        let out = sm
            .apply(&entry(index, timestamp, EntryPayload::OpenSession { timeout }))
            .unwrap();
        match out {
            ApplyOutput::SessionOpened(id) => id,
            other => panic!("unexpected output: {:?}", other),
        }
    }

    fn command(session: u64, sequence: u64, req: Request) -> EntryPayload {
        EntryPayload::Command {
            session,
            sequence,
            operation: req.encode(),
        }
    }

    #[test]
    fn set_and_get() {
        let mut sm = MemStore::new();
        let session = open_session(&mut sm, 1, 1000, 60_000);

        let out = sm
            .apply(&entry(2, 1001, command(session, 1, Request::set("x", "1"))))
            .unwrap();
        assert!(matches!(out, ApplyOutput::Command(_)));
        assert_eq!(Some("1".to_string()), sm.get("x"));

        let result = sm.query(session, 1, &Request::get("x").encode()).unwrap();
        assert_eq!(Some("1".to_string()), decode_response(&result));
    }

    #[test]
    fn duplicate_command_returns_cached_response() {
        let mut sm = MemStore::new();
        let session = open_session(&mut sm, 1, 1000, 60_000);

        sm.apply(&entry(2, 1001, command(session, 1, Request::set("x", "1"))))
            .unwrap();
        let first = sm
            .apply(&entry(3, 1002, command(session, 2, Request::set("x", "2"))))
            .unwrap();
        // The same (session, sequence) replayed at a later index.
        let replay = sm
            .apply(&entry(4, 1003, command(session, 2, Request::set("x", "99"))))
            .unwrap();

        assert_eq!(first, replay);
        // The duplicate did not execute.
        assert_eq!(Some("2".to_string()), sm.get("x"));
    }

    #[test]
    fn unknown_session_rejected() {
        let mut sm = MemStore::new();
        let err = sm
            .apply(&entry(1, 1000, command(42, 1, Request::set("x", "1"))))
            .unwrap_err();
        assert_eq!(StateMachineError::UnknownSession(42), err);
    }

    #[test]
    fn sessions_expire_on_logical_time() {
        let mut sm = MemStore::new();
        let session = open_session(&mut sm, 1, 1000, 500);
        assert_eq!(1, sm.session_count());

        // Another entry far enough in the future expires the session.
        sm.apply(&entry(2, 2000, EntryPayload::Initialize)).unwrap();
        assert_eq!(0, sm.session_count());

        let err = sm
            .apply(&entry(3, 2001, command(session, 1, Request::set("x", "1"))))
            .unwrap_err();
        assert_eq!(StateMachineError::UnknownSession(session), err);
    }

    #[test]
    fn keep_alive_refreshes_and_prunes() {
        let mut sm = MemStore::new();
        let session = open_session(&mut sm, 1, 1000, 500);

        sm.apply(&entry(2, 1100, command(session, 1, Request::set("x", "1"))))
            .unwrap();
        sm.apply(&entry(
            3,
            1400,
            EntryPayload::KeepAlive {
                sessions: vec![SessionKeepAlive {
                    session,
                    command_sequence: 2,
                    event_index: 0,
                }],
            },
        ))
        .unwrap();

        // Alive past the original deadline thanks to the keep-alive.
        sm.apply(&entry(4, 1700, EntryPayload::Initialize)).unwrap();
        assert_eq!(1, sm.session_count());
    }

    #[test]
    fn query_entries_are_inert() {
        let mut sm = MemStore::new();
        let out = sm
            .apply(&entry(
                1,
                1000,
                EntryPayload::Query {
                    session: 0,
                    sequence: 0,
                    operation: Request::get("x").encode(),
                    consistency: Consistency::Linearizable,
                },
            ))
            .unwrap();
        assert_eq!(ApplyOutput::None, out);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut sm = MemStore::new();
        let session = open_session(&mut sm, 1, 1000, 60_000);
        sm.apply(&entry(2, 1001, command(session, 1, Request::set("x", "1"))))
            .unwrap();
        sm.apply(&entry(3, 1002, command(session, 2, Request::set("y", "2"))))
            .unwrap();

        let data = sm.snapshot().unwrap();

        let mut restored = MemStore::new();
        restored
            .restore(
                &SnapshotMeta {
                    index: 3,
                    term: 1,
                    timestamp: 1002,
                },
                &data,
            )
            .unwrap();

        assert_eq!(Some("1".to_string()), restored.get("x"));
        assert_eq!(Some("2".to_string()), restored.get("y"));
        assert_eq!(1, restored.session_count());
        assert_eq!(3, restored.last_applied());
    }
}
