use anyerror::AnyError;

/// Errors produced by [`Config::validate`](crate::Config::validate) and
/// [`Config::build`](crate::Config::build).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("election timeout {election_timeout} must be greater than heartbeat interval {heartbeat_interval}")]
    ElectionTimeoutLTHeartbeat {
        election_timeout: u64,
        heartbeat_interval: u64,
    },

    #[error("max append batch must not be 0")]
    MaxAppendIs0,

    #[error("segment capacity must not be 0")]
    SegmentCapacityIs0,

    #[error("{invalid} is not a valid number: {reason}")]
    InvalidNumber { invalid: String, reason: String },

    #[error("failed to parse arguments {args:?}: {source}")]
    ParseError { source: AnyError, args: Vec<String> },
}
