//! Election behavior: leader emergence, failover, and the vote
//! up-to-date rule.

mod fixtures;

use std::time::Duration;

use fixtures::TestCluster;
use statecraft::Consistency;
use statecraft::Role;
use statecraft::Status;
use statecraft::VoteRequest;

const WAIT: Duration = Duration::from_secs(15);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_node_elects_itself_and_serves() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1)?;
    let leader = cluster.wait_for_leader(WAIT).await?;
    let raft = &cluster.node(leader).raft;

    let session = fixtures::open_session(raft).await?;
    let resp = fixtures::write(raft, session, 1, "x", "1").await?;
    assert_eq!(Status::Ok, resp.status);

    let got = fixtures::read(raft, session, "x", Consistency::Linearizable).await?;
    assert_eq!(Status::Ok, got.status);
    assert_eq!(
        Some("1".to_string()),
        memstore::decode_response(&got.result.unwrap())
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_elect_exactly_one_leader() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3)?;
    cluster.wait_for_leader(WAIT).await?;

    // Give the cluster a moment to settle, then check uniqueness per term.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let leaders: Vec<(u64, u64)> = cluster
        .nodes
        .values()
        .map(|n| n.raft.status().borrow().clone())
        .filter(|s| s.role == Role::Leader)
        .map(|s| (s.term, s.id))
        .collect();
    assert_eq!(1, leaders.len(), "expected one leader, got {:?}", leaders);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_crash_triggers_failover() -> anyhow::Result<()> {
    let mut cluster = TestCluster::start(3)?;
    let first = cluster.wait_for_leader(WAIT).await?;
    let first_term = cluster.node(first).raft.status().borrow().term;

    let session = fixtures::open_session(&cluster.node(first).raft).await?;
    fixtures::write(&cluster.node(first).raft, session, 1, "x", "1").await?;
    let survivors: Vec<u64> = cluster.nodes.keys().copied().filter(|id| *id != first).collect();
    cluster.wait_for_value(&survivors, "x", Some("1"), WAIT).await?;

    cluster.kill(first).await?;

    let second = cluster.wait_for_leader(WAIT).await?;
    assert_ne!(first, second);
    let status = cluster.node(second).raft.status().borrow().clone();
    assert!(
        status.term > first_term,
        "new leader term {} must exceed {}",
        status.term,
        first_term
    );

    // The old command survives the failover, and new ones land.
    cluster.wait_for_value(&survivors, "x", Some("1"), WAIT).await?;
    let resp = fixtures::write(&cluster.node(second).raft, session, 2, "y", "2").await?;
    assert_eq!(Status::Ok, resp.status);
    cluster.wait_for_value(&survivors, "y", Some("2"), WAIT).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn vote_rejected_for_stale_last_log_term() -> anyhow::Result<()> {
    let mut cluster = TestCluster::start(2)?;
    let leader = cluster.wait_for_leader(WAIT).await?;
    let follower = cluster.nodes.keys().copied().find(|id| *id != leader).unwrap();

    // Remove the leader and let the follower's leader lease lapse. The
    // survivor cannot win an election alone, so its term stays put.
    cluster.kill(leader).await?;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let raft = &cluster.node(follower).raft;

    // A candidate with a longer log but an older last term is not
    // up-to-date and must be refused.
    let resp = raft
        .vote(VoteRequest {
            term: 1000,
            candidate: 99,
            last_log_index: 100,
            last_log_term: 0,
        })
        .await?;
    assert!(!resp.voted, "stale last term must lose to higher last term");

    // A candidate whose last term matches and whose log is at least as
    // long is granted.
    let resp = raft
        .vote(VoteRequest {
            term: 1000,
            candidate: 99,
            last_log_index: 100,
            last_log_term: 1000,
        })
        .await?;
    assert!(resp.voted);
    Ok(())
}
