use std::str::FromStr;
use std::time::Duration;

use anyerror::AnyError;
use clap::Parser;
use rand::Rng;

use crate::config::error::ConfigError;

/// Parse a number with an optional unit such as `3MiB`.
fn parse_bytes_with_unit(src: &str) -> Result<u64, ConfigError> {
    let res = byte_unit::Byte::from_str(src).map_err(|e| ConfigError::InvalidNumber {
        invalid: src.to_string(),
        reason: e.to_string(),
    })?;

    Ok(res.as_u64())
}

/// Runtime configuration for a server.
///
/// Create a configuration, customize fields, and validate it:
///
/// ```
/// use statecraft::Config;
///
/// let config = Config {
///     heartbeat_interval: 50,
///     election_timeout: 300,
///     ..Default::default()
/// }
/// .validate()?;
/// # Ok::<(), statecraft::ConfigError>(())
/// ```
#[derive(Clone, Debug, Parser)]
pub struct Config {
    /// The application-specific name of this cluster.
    #[clap(long, default_value = "main")]
    pub cluster_name: String,

    /// The interval in milliseconds at which a leader sends heartbeats.
    #[clap(long, default_value = "150")]
    pub heartbeat_interval: u64,

    /// The base election timeout in milliseconds. Every timer draw is
    /// randomized within `[election_timeout, 2 * election_timeout)`.
    #[clap(long, default_value = "750")]
    pub election_timeout: u64,

    /// The timeout in milliseconds after which an idle client session
    /// expires.
    #[clap(long, default_value = "5000")]
    pub session_timeout: u64,

    /// The maximum number of entries per append batch.
    #[clap(long, default_value = "64")]
    pub max_append_entries: u64,

    /// The maximum encoded size of an append batch.
    #[clap(long, default_value = "1MiB", value_parser = parse_bytes_with_unit)]
    pub max_append_bytes: u64,

    /// The maximum number of entries in one log segment before it is
    /// sealed.
    #[clap(long, default_value = "65536")]
    pub segment_max_entries: u64,

    /// The maximum size of one log segment file before it is sealed.
    #[clap(long, default_value = "32MiB", value_parser = parse_bytes_with_unit)]
    pub segment_max_bytes: u64,

    /// The chunk size used when streaming a snapshot to a lagging member.
    #[clap(long, default_value = "3MiB", value_parser = parse_bytes_with_unit)]
    pub snapshot_chunk_size: u64,

    /// How many entries must be applied since the last snapshot before a
    /// new snapshot is taken.
    #[clap(long, default_value = "8192")]
    pub snapshot_threshold: u64,

    /// How many entries at and below the snapshot index to keep in the log
    /// after a snapshot, so slightly-lagging members can still be caught
    /// up by appends.
    #[clap(long, default_value = "1024")]
    pub retained_entries: u64,

    /// The ceiling in milliseconds for the appender's exponential backoff
    /// toward an unreachable member.
    #[clap(long, default_value = "5000")]
    pub max_backoff_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        <Self as Parser>::parse_from(Vec::<&'static str>::new())
    }
}

impl Config {
    /// A fresh election timeout, randomized within
    /// `[election_timeout, 2 * election_timeout)`.
    pub fn new_rand_election_timeout(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.election_timeout..self.election_timeout * 2);
        Duration::from_millis(ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// The window within which a heartbeat-quorum lease is considered
    /// valid, and within which a follower that heard from a leader rejects
    /// votes.
    pub fn leader_lease(&self) -> Duration {
        Duration::from_millis(self.election_timeout)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout)
    }

    /// The appender backoff delay after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let base = self.heartbeat_interval;
        let exp = base.saturating_mul(1u64 << failures.min(10));
        Duration::from_millis(exp.min(self.max_backoff_interval))
    }

    /// Build a `Config` from command line arguments.
    ///
    /// The first element in `args` must be the application name.
    pub fn build(args: &[&str]) -> Result<Config, ConfigError> {
        let config = <Self as Parser>::try_parse_from(args).map_err(|e| ConfigError::ParseError {
            source: AnyError::from(&e),
            args: args.iter().map(|x| x.to_string()).collect(),
        })?;
        config.validate()
    }

    /// Validate the state of this config.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.election_timeout <= self.heartbeat_interval {
            return Err(ConfigError::ElectionTimeoutLTHeartbeat {
                election_timeout: self.election_timeout,
                heartbeat_interval: self.heartbeat_interval,
            });
        }

        if self.max_append_entries == 0 || self.max_append_bytes == 0 {
            return Err(ConfigError::MaxAppendIs0);
        }

        if self.segment_max_entries == 0 || self.segment_max_bytes == 0 {
            return Err(ConfigError::SegmentCapacityIs0);
        }

        Ok(self)
    }
}
