//! An in-process network connecting `Raft` handles directly.
//!
//! Every server gets a [`Network`] stamped with its own id; sends are
//! routed through a shared registry, so tests can partition servers,
//! heal them, and remove crashed ones. A send to an unreachable or
//! unknown server fails like a dropped connection.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use anyerror::AnyError;
use async_trait::async_trait;

use crate::error::RPCError;
use crate::member::Member;
use crate::member::MemberId;
use crate::network::RaftNetwork;
use crate::protocol::*;
use crate::raft::Raft;

#[derive(Default)]
struct RouterInner {
    handles: BTreeMap<MemberId, Raft<Network>>,
    isolated: BTreeSet<MemberId>,
}

/// The shared registry of servers.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<Mutex<RouterInner>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// The network endpoint for one server.
    pub fn network(&self, from: MemberId) -> Arc<Network> {
        Arc::new(Network {
            from,
            router: self.clone(),
        })
    }

    pub fn register(&self, id: MemberId, raft: Raft<Network>) {
        self.inner.lock().unwrap().handles.insert(id, raft);
    }

    /// Forget a server, as if it crashed. The caller shuts it down.
    pub fn remove(&self, id: MemberId) -> Option<Raft<Network>> {
        self.inner.lock().unwrap().handles.remove(&id)
    }

    /// Cut a server off from everyone.
    pub fn isolate(&self, id: MemberId) {
        self.inner.lock().unwrap().isolated.insert(id);
    }

    /// Heal a previously isolated server.
    pub fn restore(&self, id: MemberId) {
        self.inner.lock().unwrap().isolated.remove(&id);
    }

    fn route(&self, from: MemberId, to: MemberId) -> Result<Raft<Network>, RPCError> {
        let inner = self.inner.lock().unwrap();
        if inner.isolated.contains(&from) || inner.isolated.contains(&to) {
            return Err(RPCError::network(to, AnyError::error("partitioned")));
        }
        inner
            .handles
            .get(&to)
            .cloned()
            .ok_or_else(|| RPCError::network(to, AnyError::error("connection refused")))
    }
}

/// One server's view of the router.
pub struct Network {
    from: MemberId,
    router: Router,
}

fn transport_err(target: MemberId, e: impl ToString) -> RPCError {
    RPCError::network(target, AnyError::error(e.to_string()))
}

#[async_trait]
impl RaftNetwork for Network {
    async fn append(&self, target: &Member, req: AppendRequest) -> Result<AppendResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.append(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn vote(&self, target: &Member, req: VoteRequest) -> Result<VoteResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.vote(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn poll(&self, target: &Member, req: PollRequest) -> Result<PollResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.poll(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn install(&self, target: &Member, req: InstallRequest) -> Result<InstallResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.install(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn configure(
        &self,
        target: &Member,
        req: ConfigureRequest,
    ) -> Result<ConfigureResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.configure(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn keep_alive(
        &self,
        target: &Member,
        req: KeepAliveRequest,
    ) -> Result<KeepAliveResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.keep_alive(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn join(
        &self,
        target: &Member,
        req: JoinRequest,
    ) -> Result<ConfigurationResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.join(req).await.map_err(|e| transport_err(target.id, e))
    }

    async fn leave(
        &self,
        target: &Member,
        req: LeaveRequest,
    ) -> Result<ConfigurationResponse, RPCError> {
        let raft = self.router.route(self.from, target.id)?;
        raft.leave(req).await.map_err(|e| transport_err(target.id, e))
    }
}
