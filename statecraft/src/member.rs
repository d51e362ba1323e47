//! Cluster member identity and type.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A member's unique id within the cluster.
///
/// Applications must guarantee ids are stable across restarts.
pub type MemberId = u64;

/// How a member participates in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberType {
    /// Tracked in the configuration but receives nothing.
    Inactive,

    /// Tracked and answers metadata queries, but neither receives log
    /// entries nor votes.
    Reserve,

    /// Receives log entries but does not vote.
    Passive,

    /// Full participant: receives entries and counts toward quorum.
    Active,
}

impl MemberType {
    /// Whether this member counts toward election and commit quorums.
    pub fn is_voting(&self) -> bool {
        matches!(self, MemberType::Active)
    }

    /// Whether the leader replicates log entries to this member.
    pub fn receives_log(&self) -> bool {
        matches!(self, MemberType::Active | MemberType::Passive)
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberType::Inactive => "inactive",
            MemberType::Reserve => "reserve",
            MemberType::Passive => "passive",
            MemberType::Active => "active",
        };
        write!(f, "{}", s)
    }
}

/// A server in the cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Transport address, opaque to the core.
    pub address: String,
    pub member_type: MemberType,
    /// When this member record last changed, milliseconds since the Unix
    /// epoch.
    pub updated: u64,
}

impl Member {
    pub fn new(id: MemberId, address: impl Into<String>, member_type: MemberType) -> Self {
        Self {
            id,
            address: address.into(),
            member_type,
            updated: crate::entry::now_millis(),
        }
    }

    /// A copy of this member with a different type and a fresh `updated`
    /// timestamp.
    pub fn with_type(&self, member_type: MemberType) -> Self {
        Self {
            id: self.id,
            address: self.address.clone(),
            member_type,
            updated: crate::entry::now_millis(),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})@{}", self.id, self.member_type, self.address)
    }
}
