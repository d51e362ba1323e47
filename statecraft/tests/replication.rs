//! Log replication: the happy path, catch-up after isolation, conflict
//! truncation, and restart recovery.

mod fixtures;

use std::time::Duration;

use fixtures::TestCluster;
use statecraft::Consistency;
use statecraft::RaftErrorKind;
use statecraft::Status;

const WAIT: Duration = Duration::from_secs(15);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_node_happy_path() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3)?;
    let leader = cluster.wait_for_leader(WAIT).await?;
    let raft = cluster.node(leader).raft.clone();

    // Index 1 is the leader's initialize entry, index 2 opens the
    // session, index 3 carries the command.
    let session = fixtures::open_session(&raft).await?;
    assert_eq!(2, session);

    let resp = fixtures::write(&raft, session, 1, "x", "1").await?;
    assert_eq!(Status::Ok, resp.status);
    assert_eq!(3, resp.index);

    // Every server applies the command.
    let all: Vec<u64> = cluster.nodes.keys().copied().collect();
    cluster.wait_for_value(&all, "x", Some("1"), WAIT).await?;
    for id in &all {
        assert!(cluster.node(*id).store.last_applied() >= 3);
    }

    // A follower redirects reads to the leader.
    let follower = all.iter().copied().find(|id| *id != leader).unwrap();
    let redirect =
        fixtures::read(&cluster.node(follower).raft, session, "x", Consistency::Linearizable)
            .await?;
    assert_eq!(Status::Error, redirect.status);
    assert_eq!(Some(leader), redirect.leader);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn isolated_follower_catches_up() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3)?;
    let leader = cluster.wait_for_leader(WAIT).await?;
    let raft = cluster.node(leader).raft.clone();
    let session = fixtures::open_session(&raft).await?;

    let follower = cluster.nodes.keys().copied().find(|id| *id != leader).unwrap();
    cluster.router.isolate(follower);

    for i in 1..=20u64 {
        let resp = fixtures::write(&raft, session, i, &format!("k{}", i), &format!("v{}", i)).await?;
        assert_eq!(Status::Ok, resp.status);
    }

    cluster.router.restore(follower);

    cluster
        .wait_for_value(&[follower], "k20", Some("v20"), WAIT)
        .await?;
    cluster
        .wait_for_value(&[follower], "k1", Some("v1"), WAIT)
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partitioned_leader_discards_conflicting_suffix() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3)?;
    let old_leader = cluster.wait_for_leader(WAIT).await?;
    let raft = cluster.node(old_leader).raft.clone();
    let session = fixtures::open_session(&raft).await?;
    fixtures::write(&raft, session, 1, "x", "1").await?;

    let all: Vec<u64> = cluster.nodes.keys().copied().collect();
    cluster.wait_for_value(&all, "x", Some("1"), WAIT).await?;

    // Cut the leader off and hand it a command it can never commit.
    cluster.router.isolate(old_leader);
    let stale_raft = raft.clone();
    let stale_write = tokio::spawn(async move {
        fixtures::write(&stale_raft, session, 2, "y", "stale").await
    });

    // The majority side elects a new leader and commits a different
    // entry.
    let deadline = tokio::time::Instant::now() + WAIT;
    let new_leader = loop {
        let found = cluster
            .nodes
            .values()
            .map(|n| n.raft.status().borrow().clone())
            .find(|s| s.role == statecraft::Role::Leader && s.id != old_leader);
        if let Some(s) = found {
            break s.id;
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no new leader elected");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    let resp = fixtures::write(&cluster.node(new_leader).raft, session, 3, "y", "new").await?;
    assert_eq!(Status::Ok, resp.status);

    // Heal. The old leader steps down, truncates its uncommitted
    // suffix, and converges.
    cluster.router.restore(old_leader);
    cluster.wait_for_value(&all, "y", Some("new"), WAIT).await?;

    // The uncommitted write completes with a retryable error and was
    // never applied anywhere.
    let stale_resp = tokio::time::timeout(WAIT, stale_write).await???;
    assert_eq!(Status::Error, stale_resp.status);
    assert!(matches!(
        stale_resp.error,
        Some(RaftErrorKind::NoLeader) | Some(RaftErrorKind::IllegalMemberState)
    ));
    for id in &all {
        assert_ne!(Some("stale".to_string()), cluster.node(*id).store.get("y"));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_node_restart_rebuilds_state_from_log() -> anyhow::Result<()> {
    fixtures::init_tracing();

    let dir = tempfile::TempDir::new()?;
    let router = statecraft::testing::Router::new();
    let config = fixtures::test_config();
    let members: std::collections::BTreeMap<_, _> =
        [(1u64, fixtures::member(1, statecraft::MemberType::Active))].into();

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

        statecraft::testing::wait_for_status(&raft, WAIT, |s| s.role == statecraft::Role::Leader)
            .await?;
        let session = fixtures::open_session(&raft).await?;
        fixtures::write(&raft, session, 1, "x", "1").await?;
        fixtures::write(&raft, session, 2, "y", "2").await?;

        raft.shutdown().await?;
        router.remove(1);
    }

    // A fresh process over the same directory replays the log into a
    // fresh state machine.
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

    statecraft::testing::wait_for_status(&raft, WAIT, |s| s.role == statecraft::Role::Leader)
        .await?;
    let deadline = tokio::time::Instant::now() + WAIT;
    while store.get("y") != Some("2".to_string()) {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "state not rebuilt");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Some("1".to_string()), store.get("x"));

    raft.shutdown().await?;
    Ok(())
}
