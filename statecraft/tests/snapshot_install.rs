//! Snapshot capture, log compaction, and streaming installs to lagging
//! members.

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use fixtures::TestCluster;
use statecraft::Config;
use statecraft::MemberType;
use statecraft::Role;
use statecraft::Status;

const WAIT: Duration = Duration::from_secs(20);

fn snapshot_config() -> Arc<Config> {
    Arc::new(
        Config {
            heartbeat_interval: 30,
            election_timeout: 150,
            session_timeout: 60_000,
            max_backoff_interval: 500,
            // Aggressive snapshots and small segments so compaction
            // happens within a short test.
            snapshot_threshold: 16,
            retained_entries: 4,
            segment_max_entries: 32,
            ..Default::default()
        }
        .validate()
        .unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn new_member_catches_up_through_snapshot() -> anyhow::Result<()> {
    let mut cluster = TestCluster::start_with_config(3, snapshot_config())?;
    let leader = cluster.wait_for_leader(WAIT).await?;
    let raft = cluster.node(leader).raft.clone();
    let session = fixtures::open_session(&raft).await?;

    // Enough writes to trigger snapshots and compact the prefix away.
    for i in 1..=60u64 {
        let resp = fixtures::write(&raft, session, i, &format!("k{}", i), &format!("v{}", i)).await?;
        assert_eq!(Status::Ok, resp.status);
    }
    let all: Vec<u64> = cluster.nodes.keys().copied().collect();
    cluster.wait_for_value(&all, "k60", Some("v60"), WAIT).await?;

    // A brand-new member joins; its next index was compacted away, so
    // the leader must stream a snapshot before resuming appends.
    let initial: std::collections::BTreeMap<_, _> = (1..=3u64)
        .map(|id| (id, fixtures::member(id, MemberType::Active)))
        .collect();
    let seeds: Vec<_> = initial.values().cloned().collect();
    cluster.add_node(4, initial)?;

    let joiner = cluster.node(4).raft.clone();
    let resp = joiner
        .join_cluster(fixtures::member(4, MemberType::Active), &seeds)
        .await
        .map_err(|e| anyhow::anyhow!("join failed: {}", e))?;
    assert_eq!(Status::Ok, resp.status);

    statecraft::testing::wait_for_status(&joiner, WAIT, |s| s.role == Role::Follower).await?;
    cluster.wait_for_value(&[4], "k1", Some("v1"), WAIT).await?;
    cluster.wait_for_value(&[4], "k60", Some("v60"), WAIT).await?;

    // The new member keeps up with fresh writes from here on.
    fixtures::write(&raft, session, 61, "after", "snapshot").await?;
    cluster
        .wait_for_value(&[1, 2, 3, 4], "after", Some("snapshot"), WAIT)
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_after_snapshot_restores_from_it() -> anyhow::Result<()> {
    fixtures::init_tracing();

    let dir = tempfile::TempDir::new()?;
    let router = statecraft::testing::Router::new();
    let config = snapshot_config();
    let members: std::collections::BTreeMap<_, _> =
        [(1u64, fixtures::member(1, MemberType::Active))].into();

    {
        let store = memstore::MemStore::new();
        let raft = statecraft::Raft::new(
            1,
            config.clone(),
            members.clone(),
            router.network(1),
            store.clone(),
            dir.path(),
        )?;
        router.register(1, raft.clone());
        statecraft::testing::wait_for_status(&raft, WAIT, |s| s.role == Role::Leader).await?;

        let session = fixtures::open_session(&raft).await?;
        for i in 1..=40u64 {
            fixtures::write(&raft, session, i, &format!("k{}", i), &format!("v{}", i)).await?;
        }

        // Wait for a snapshot to land before stopping.
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let has_snapshot = std::fs::read_dir(dir.path().join("snapshots"))?
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().ends_with(".snapshot"));
            if has_snapshot {
                break;
            }
            anyhow::ensure!(tokio::time::Instant::now() < deadline, "no snapshot written");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        raft.shutdown().await?;
        router.remove(1);
    }

    let store = memstore::MemStore::new();
    let raft = statecraft::Raft::new(
        1,
        config,
        members,
        router.network(1),
        store.clone(),
        dir.path(),
    )?;
    router.register(1, raft.clone());
    statecraft::testing::wait_for_status(&raft, WAIT, |s| s.role == Role::Leader).await?;

    let deadline = tokio::time::Instant::now() + WAIT;
    while store.get("k40") != Some("v40".to_string()) {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "state not restored, k40={:?}",
            store.get("k40")
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Some("v1".to_string()), store.get("k1"));

    raft.shutdown().await?;
    Ok(())
}
