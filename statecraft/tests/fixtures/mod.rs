//! Cluster fixtures for integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use memstore::MemStore;
use statecraft::testing::Network;
use statecraft::testing::Router;
use statecraft::Config;
use statecraft::Member;
use statecraft::MemberId;
use statecraft::MemberType;
use statecraft::Raft;
use statecraft::Role;
use tempfile::TempDir;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Tight timers so elections settle quickly in tests.
pub fn test_config() -> Arc<Config> {
    Arc::new(
        Config {
            heartbeat_interval: 30,
            election_timeout: 150,
            session_timeout: 60_000,
            max_backoff_interval: 500,
            ..Default::default()
        }
        .validate()
        .unwrap(),
    )
}

pub fn member(id: MemberId, member_type: MemberType) -> Member {
    Member::new(id, format!("test://{}", id), member_type)
}

pub struct TestNode {
    pub raft: Raft<Network>,
    pub store: MemStore,
    pub member: Member,
    _dir: TempDir,
}

pub struct TestCluster {
    pub router: Router,
    pub config: Arc<Config>,
    pub nodes: BTreeMap<MemberId, TestNode>,
}

impl TestCluster {
    /// Start `n` active servers that all know the full initial
    /// membership.
    pub fn start(n: u64) -> anyhow::Result<Self> {
        Self::start_with_config(n, test_config())
    }

    pub fn start_with_config(n: u64, config: Arc<Config>) -> anyhow::Result<Self> {
        init_tracing();

        let router = Router::new();
        let members: BTreeMap<MemberId, Member> =
            (1..=n).map(|id| (id, member(id, MemberType::Active))).collect();

        let mut cluster = Self {
            router,
            config,
            nodes: BTreeMap::new(),
        };
        for id in 1..=n {
            cluster.add_node(id, members.clone())?;
        }
        Ok(cluster)
    }

    /// Start one more server with the given view of the membership. The
    /// server is inactive until a configuration names it.
    pub fn add_node(
        &mut self,
        id: MemberId,
        initial: BTreeMap<MemberId, Member>,
    ) -> anyhow::Result<&TestNode> {
        let dir = TempDir::new()?;
        let store = MemStore::new();
        let raft = Raft::new(
            id,
            self.config.clone(),
            initial,
            self.router.network(id),
            store.clone(),
            dir.path(),
        )?;
        self.router.register(id, raft.clone());

        self.nodes.insert(
            id,
            TestNode {
                raft,
                store,
                member: member(id, MemberType::Active),
                _dir: dir,
            },
        );
        Ok(&self.nodes[&id])
    }

    pub fn node(&self, id: MemberId) -> &TestNode {
        &self.nodes[&id]
    }

    /// Wait for some server to become leader and return its id.
    pub async fn wait_for_leader(&self, timeout: Duration) -> anyhow::Result<MemberId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for node in self.nodes.values() {
                if node.raft.status().borrow().role == Role::Leader {
                    return Ok(node.raft.id());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("no leader elected within {:?}", timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until `store.get(key)` on every listed node equals `expected`.
    pub async fn wait_for_value(
        &self,
        ids: &[MemberId],
        key: &str,
        expected: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let all_match = ids.iter().all(|id| {
                self.nodes[id].store.get(key).as_deref() == expected
            });
            if all_match {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let got: Vec<(MemberId, Option<String>)> = ids
                    .iter()
                    .map(|id| (*id, self.nodes[id].store.get(key)))
                    .collect();
                anyhow::bail!("value {:?} for {:?} not reached, got {:?}", expected, key, got);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Crash a server: cut it off, forget it, and stop its task.
    pub async fn kill(&mut self, id: MemberId) -> anyhow::Result<()> {
        self.router.remove(id);
        if let Some(node) = self.nodes.remove(&id) {
            node.raft.shutdown().await?;
        }
        Ok(())
    }
}

/// Open a session on the leader and return its id.
pub async fn open_session(raft: &Raft<Network>) -> anyhow::Result<u64> {
    let resp = raft
        .open_session(statecraft::OpenSessionRequest {
            client: "test".to_string(),
            timeout: 0,
        })
        .await?;
    anyhow::ensure!(
        resp.status == statecraft::Status::Ok,
        "open session failed: {:?}",
        resp.error
    );
    Ok(resp.session)
}

/// Submit a `Set` command through the given handle.
pub async fn write(
    raft: &Raft<Network>,
    session: u64,
    sequence: u64,
    key: &str,
    value: &str,
) -> anyhow::Result<statecraft::CommandResponse> {
    Ok(raft
        .command(statecraft::CommandRequest {
            session,
            sequence,
            operation: memstore::Request::set(key, value).encode(),
        })
        .await?)
}

/// Read a key through the given handle at the given consistency.
pub async fn read(
    raft: &Raft<Network>,
    session: u64,
    key: &str,
    consistency: statecraft::Consistency,
) -> anyhow::Result<statecraft::QueryResponse> {
    Ok(raft
        .query(statecraft::QueryRequest {
            session,
            sequence: 0,
            operation: memstore::Request::get(key).encode(),
            consistency,
        })
        .await?)
}
