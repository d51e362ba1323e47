//! The public interface to a running server.
//!
//! `Raft::new` opens the on-disk state, spawns the apply task and the
//! server task, and returns a cheaply cloneable handle. RPC submission
//! methods post a message to the server task together with a oneshot
//! responder and await the completion; handlers themselves always run on
//! the server task.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cluster::Cluster;
use crate::config::Config;
use crate::configuration::Configuration;
use crate::core::apply;
use crate::core::raft_msg::RaftMsg;
use crate::core::RaftContext;
use crate::core::ServerStatus;
use crate::error::Fatal;
use crate::error::RPCError;
use crate::error::StorageError;
use crate::log::Log;
use crate::member::Member;
use crate::member::MemberId;
use crate::meta::MetaStore;
use crate::network::RaftNetwork;
use crate::protocol::*;
use crate::snapshot::SnapshotStore;
use crate::state_machine::StateMachine;

/// The running state of the server task.
enum CoreState {
    Running(JoinHandle<Result<(), Fatal>>),
    Done(Result<(), Fatal>),
}

struct RaftInner<N: RaftNetwork> {
    id: MemberId,
    network: Arc<N>,
    tx_api: mpsc::UnboundedSender<RaftMsg>,
    rx_status: watch::Receiver<ServerStatus>,
    tx_shutdown: Mutex<Option<oneshot::Sender<()>>>,
    core_state: Mutex<CoreState>,
}

/// A handle to a server. Clones share the same server task.
pub struct Raft<N: RaftNetwork> {
    inner: Arc<RaftInner<N>>,
}

impl<N: RaftNetwork> Clone for Raft<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: RaftNetwork> Raft<N> {
    /// Create and start a server.
    ///
    /// `data_dir` holds the log segments, metadata record and snapshots.
    /// `initial_members` is only consulted on a pristine data directory;
    /// after that the persisted configuration wins. A server absent from
    /// its own configuration starts inactive and waits to be configured
    /// by a leader (see [`Raft::join_cluster`]).
    pub fn new<SM: StateMachine>(
        id: MemberId,
        config: Arc<Config>,
        initial_members: BTreeMap<MemberId, Member>,
        network: Arc<N>,
        state_machine: SM,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let dir = data_dir.into();
        let log = Log::open(
            dir.join("log"),
            config.segment_max_entries,
            config.segment_max_bytes,
        )?;
        let meta = MetaStore::open(&dir)?;
        let snapshots = SnapshotStore::open(dir.join("snapshots"))?;

        let configuration = if meta.configuration().members.is_empty() {
            Configuration::bootstrap(initial_members)
        } else {
            meta.configuration().clone()
        };
        let cluster = Cluster::new(id, configuration);

        let (tx_api, rx_api) = mpsc::unbounded_channel();
        let (tx_notify, rx_notify) = mpsc::unbounded_channel();
        let (tx_apply, rx_apply) = mpsc::unbounded_channel();
        let (tx_shutdown, rx_shutdown) = oneshot::channel();
        let (tx_status, rx_status) = watch::channel(ServerStatus::initial(id));

        apply::spawn(state_machine, rx_apply, tx_notify.clone());

        let core = RaftContext::new(
            id,
            config,
            network.clone(),
            log,
            meta,
            snapshots,
            cluster,
            rx_api,
            tx_notify,
            rx_notify,
            tx_apply,
            rx_shutdown,
            tx_status,
        );
        let handle = core.spawn();

        Ok(Self {
            inner: Arc::new(RaftInner {
                id,
                network,
                tx_api,
                rx_status,
                tx_shutdown: Mutex::new(Some(tx_shutdown)),
                core_state: Mutex::new(CoreState::Running(handle)),
            }),
        })
    }

    pub fn id(&self) -> MemberId {
        self.inner.id
    }

    /// A watch over the server's role, term, leader and indices. Useful
    /// for routing and for tests awaiting a state.
    pub fn status(&self) -> watch::Receiver<ServerStatus> {
        self.inner.rx_status.clone()
    }

    async fn call_core<T>(&self, msg: RaftMsg, rx: oneshot::Receiver<T>) -> Result<T, Fatal> {
        if self.inner.tx_api.send(msg).is_err() {
            return Err(self.fatal().await);
        }
        match rx.await {
            Ok(resp) => Ok(resp),
            Err(_) => Err(self.fatal().await),
        }
    }

    /// Learn why the server task is gone.
    async fn fatal(&self) -> Fatal {
        let mut state = self.inner.core_state.lock().await;
        let res = match std::mem::replace(&mut *state, CoreState::Done(Ok(()))) {
            CoreState::Running(handle) => match handle.await {
                Ok(res) => res,
                Err(_) => Err(Fatal::Panicked),
            },
            CoreState::Done(res) => res,
        };
        *state = CoreState::Done(res.clone());
        match res {
            Ok(()) => Fatal::Stopped,
            Err(f) => f,
        }
    }

    /// Stop the server: the role is released, pending operations complete
    /// with retryable errors, and the task exits.
    pub async fn shutdown(&self) -> Result<(), Fatal> {
        if let Some(tx) = self.inner.tx_shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        match self.fatal().await {
            Fatal::Stopped => Ok(()),
            f => Err(f),
        }
    }

    // ---------------------------------------------------------------
    // RPC submission: the transport server calls these for incoming
    // requests.
    // ---------------------------------------------------------------

    pub async fn append(&self, rpc: AppendRequest) -> Result<AppendResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Append { rpc, tx }, rx).await
    }

    pub async fn vote(&self, rpc: VoteRequest) -> Result<VoteResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Vote { rpc, tx }, rx).await
    }

    pub async fn poll(&self, rpc: PollRequest) -> Result<PollResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Poll { rpc, tx }, rx).await
    }

    pub async fn install(&self, rpc: InstallRequest) -> Result<InstallResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Install { rpc, tx }, rx).await
    }

    pub async fn configure(&self, rpc: ConfigureRequest) -> Result<ConfigureResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Configure { rpc, tx }, rx).await
    }

    pub async fn join(&self, rpc: JoinRequest) -> Result<ConfigurationResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Join { rpc, tx }, rx).await
    }

    pub async fn leave(&self, rpc: LeaveRequest) -> Result<ConfigurationResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Leave { rpc, tx }, rx).await
    }

    pub async fn reconfigure(&self, rpc: ReconfigureRequest) -> Result<ConfigurationResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Reconfigure { rpc, tx }, rx).await
    }

    pub async fn command(&self, rpc: CommandRequest) -> Result<CommandResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Command { rpc, tx }, rx).await
    }

    pub async fn query(&self, rpc: QueryRequest) -> Result<QueryResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Query { rpc, tx }, rx).await
    }

    pub async fn keep_alive(&self, rpc: KeepAliveRequest) -> Result<KeepAliveResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::KeepAlive { rpc, tx }, rx).await
    }

    pub async fn open_session(&self, rpc: OpenSessionRequest) -> Result<OpenSessionResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::OpenSession { rpc, tx }, rx).await
    }

    pub async fn close_session(
        &self,
        rpc: CloseSessionRequest,
    ) -> Result<CloseSessionResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::CloseSession { rpc, tx }, rx).await
    }

    pub async fn metadata(&self, rpc: MetadataRequest) -> Result<MetadataResponse, Fatal> {
        let (tx, rx) = oneshot::channel();
        self.call_core(RaftMsg::Metadata { rpc, tx }, rx).await
    }

    // ---------------------------------------------------------------
    // Lifecycle: joining and leaving a cluster.
    // ---------------------------------------------------------------

    /// Ask an existing cluster to add `member` (this server) to its
    /// configuration. Seeds are tried in turn, following leader hints;
    /// once the change commits, the leader configures this server and it
    /// leaves the inactive role.
    pub async fn join_cluster(
        &self,
        member: Member,
        seeds: &[Member],
    ) -> Result<ConfigurationResponse, RPCError> {
        let req = JoinRequest { member };
        self.run_change(seeds, |network, target| {
            let req = req.clone();
            async move { network.join(&target, req).await }
        })
        .await
    }

    /// Ask the cluster to remove `member` (this server) from its
    /// configuration.
    pub async fn leave_cluster(
        &self,
        member: Member,
        seeds: &[Member],
    ) -> Result<ConfigurationResponse, RPCError> {
        let req = LeaveRequest { member };
        self.run_change(seeds, |network, target| {
            let req = req.clone();
            async move { network.leave(&target, req).await }
        })
        .await
    }

    /// Drive a membership change against the cluster, retrying through
    /// leader hints and transient rejections.
    async fn run_change<F, Fut>(
        &self,
        seeds: &[Member],
        send: F,
    ) -> Result<ConfigurationResponse, RPCError>
    where
        F: Fn(Arc<N>, Member) -> Fut,
        Fut: std::future::Future<Output = Result<ConfigurationResponse, RPCError>>,
    {
        const ATTEMPTS: usize = 30;

        let mut last_err =
            RPCError::network(0, anyerror::AnyError::error("membership change did not complete"));
        let mut preferred: Option<MemberId> = None;

        for _ in 0..ATTEMPTS {
            let mut targets: Vec<&Member> =
                seeds.iter().filter(|m| m.id != self.inner.id).collect();
            if let Some(p) = preferred {
                targets.sort_by_key(|m| m.id != p);
            }

            for target in targets {
                match send(self.inner.network.clone(), target.clone()).await {
                    Ok(resp) if resp.status == Status::Ok => return Ok(resp),
                    Ok(resp) => {
                        preferred = resp.leader;
                        tracing::debug!(
                            target = target.id,
                            error = ?resp.error,
                            leader = ?resp.leader,
                            "membership change rejected, retrying"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(target = target.id, error = %e, "membership change send failed");
                        last_err = e;
                    }
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        Err(last_err)
    }
}
