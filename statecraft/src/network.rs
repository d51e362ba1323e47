//! The transport boundary.
//!
//! The core only submits messages; connection management, serialization of
//! the wire types and timeouts belong to the implementation. Failures are
//! reported as [`RPCError`] and retried by the appender with backoff; they
//! never mutate Raft state.

use async_trait::async_trait;

use crate::error::RPCError;
use crate::member::Member;
use crate::protocol::AppendRequest;
use crate::protocol::AppendResponse;
use crate::protocol::ConfigurationResponse;
use crate::protocol::ConfigureRequest;
use crate::protocol::ConfigureResponse;
use crate::protocol::JoinRequest;
use crate::protocol::LeaveRequest;
use crate::protocol::InstallRequest;
use crate::protocol::InstallResponse;
use crate::protocol::KeepAliveRequest;
use crate::protocol::KeepAliveResponse;
use crate::protocol::PollRequest;
use crate::protocol::PollResponse;
use crate::protocol::VoteRequest;
use crate::protocol::VoteResponse;

/// Sends RPCs to peer servers.
///
/// Implementations must be cheap to share; the server holds one instance
/// behind an `Arc` and calls it from detached send tasks.
#[async_trait]
pub trait RaftNetwork: Send + Sync + 'static {
    async fn append(&self, target: &Member, req: AppendRequest) -> Result<AppendResponse, RPCError>;

    async fn vote(&self, target: &Member, req: VoteRequest) -> Result<VoteResponse, RPCError>;

    async fn poll(&self, target: &Member, req: PollRequest) -> Result<PollResponse, RPCError>;

    async fn install(&self, target: &Member, req: InstallRequest) -> Result<InstallResponse, RPCError>;

    async fn configure(
        &self,
        target: &Member,
        req: ConfigureRequest,
    ) -> Result<ConfigureResponse, RPCError>;

    /// Session keep-alives are forwarded by passive members to the leader.
    async fn keep_alive(
        &self,
        target: &Member,
        req: KeepAliveRequest,
    ) -> Result<KeepAliveResponse, RPCError>;

    /// Sent by a server joining the cluster.
    async fn join(&self, target: &Member, req: JoinRequest)
        -> Result<ConfigurationResponse, RPCError>;

    /// Sent by a server leaving the cluster.
    async fn leave(
        &self,
        target: &Member,
        req: LeaveRequest,
    ) -> Result<ConfigurationResponse, RPCError>;
}
