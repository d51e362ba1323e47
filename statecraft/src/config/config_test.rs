use crate::config::Config;
use crate::config::ConfigError;

#[test]
fn default_config_is_valid() {
    let c = Config::default().validate().unwrap();

    assert_eq!(150, c.heartbeat_interval);
    assert_eq!(750, c.election_timeout);
    assert_eq!(5000, c.session_timeout);
}

#[test]
fn build_from_args() {
    let c = Config::build(&[
        "statecraft",
        "--cluster-name=test",
        "--heartbeat-interval=25",
        "--election-timeout=200",
        "--max-append-bytes=4MiB",
    ])
    .unwrap();

    assert_eq!("test", c.cluster_name);
    assert_eq!(25, c.heartbeat_interval);
    assert_eq!(200, c.election_timeout);
    assert_eq!(4 * 1024 * 1024, c.max_append_bytes);
}

#[test]
fn election_timeout_must_exceed_heartbeat() {
    let res = Config {
        heartbeat_interval: 300,
        election_timeout: 300,
        ..Default::default()
    }
    .validate();

    assert_eq!(
        ConfigError::ElectionTimeoutLTHeartbeat {
            election_timeout: 300,
            heartbeat_interval: 300,
        },
        res.unwrap_err()
    );
}

#[test]
fn zero_batch_rejected() {
    let res = Config {
        max_append_entries: 0,
        ..Default::default()
    }
    .validate();

    assert_eq!(ConfigError::MaxAppendIs0, res.unwrap_err());
}

#[test]
fn rand_election_timeout_within_range() {
    let c = Config::default();

    for _ in 0..100 {
        let t = c.new_rand_election_timeout().as_millis() as u64;
        assert!(t >= c.election_timeout);
        assert!(t < c.election_timeout * 2);
    }
}

#[test]
fn backoff_is_capped() {
    let c = Config::default();

    assert_eq!(c.backoff(0).as_millis(), 150);
    assert_eq!(c.backoff(1).as_millis(), 300);
    assert_eq!(c.backoff(20).as_millis(), c.max_backoff_interval as u128);
}
