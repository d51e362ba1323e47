//! A replicated state machine server core implementing the Raft consensus
//! protocol.
//!
//! A server is driven through six roles (inactive, reserve, passive,
//! follower, candidate, leader) over a segmented on-disk log, a persistent
//! metadata record and a snapshot store. The application plugs in at two
//! seams: a [`RaftNetwork`] carries RPCs between servers, and a
//! [`StateMachine`] applies committed entries and owns client sessions.
//!
//! ```ignore
//! let config = Arc::new(Config::default().validate()?);
//! let raft = Raft::new(1, config, members, network, state_machine, "/var/lib/app")?;
//! let resp = raft.command(CommandRequest { session, sequence, operation }).await?;
//! ```

mod cluster;
mod config;
mod configuration;
mod core;
mod entry;
mod error;
mod log;
mod member;
mod meta;
mod network;
mod protocol;
mod raft;
mod snapshot;
mod state_machine;

pub mod testing;

pub use anyerror;
pub use anyerror::AnyError;

pub use crate::cluster::Cluster;
pub use crate::cluster::ConfigureOutcome;
pub use crate::cluster::PeerState;
pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::configuration::Configuration;
pub use crate::core::Role;
pub use crate::core::ServerStatus;
pub use crate::entry::Consistency;
pub use crate::entry::Entry;
pub use crate::entry::EntryPayload;
pub use crate::entry::SessionKeepAlive;
pub use crate::error::ErrorSubject;
pub use crate::error::ErrorVerb;
pub use crate::error::Fatal;
pub use crate::error::RPCError;
pub use crate::error::RaftErrorKind;
pub use crate::error::StorageError;
pub use crate::log::Log;
pub use crate::member::Member;
pub use crate::member::MemberId;
pub use crate::member::MemberType;
pub use crate::meta::MetaStore;
pub use crate::network::RaftNetwork;
pub use crate::protocol::*;
pub use crate::raft::Raft;
pub use crate::snapshot::SnapshotMeta;
pub use crate::snapshot::SnapshotStore;
pub use crate::state_machine::ApplyOutput;
pub use crate::state_machine::StateMachine;
pub use crate::state_machine::StateMachineError;
