//! Persistent cluster configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::member::Member;
use crate::member::MemberId;
use crate::member::MemberType;

/// A committed (or pending) cluster membership, identified by the log
/// position of the configuration entry that produced it.
///
/// Members are keyed by id; there are no back-references from members to
/// the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Index of the configuration entry, or 0 for a bootstrap
    /// configuration that precedes the log.
    pub index: u64,
    pub term: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub members: BTreeMap<MemberId, Member>,
}

impl Configuration {
    pub fn new(index: u64, term: u64, timestamp: u64, members: BTreeMap<MemberId, Member>) -> Self {
        Self {
            index,
            term,
            timestamp,
            members,
        }
    }

    /// The bootstrap configuration a fresh server starts from.
    pub fn bootstrap(members: BTreeMap<MemberId, Member>) -> Self {
        Self {
            index: 0,
            term: 0,
            timestamp: crate::entry::now_millis(),
            members,
        }
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(&id)
    }

    /// Members that vote in elections and count toward commitment.
    pub fn voters(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.member_type.is_voting())
    }

    /// Members the leader replicates the log to, excluding `local`.
    pub fn replication_targets(&self, local: MemberId) -> impl Iterator<Item = &Member> {
        self.members
            .values()
            .filter(move |m| m.id != local && m.member_type.receives_log())
    }

    /// Members of the given type.
    pub fn members_of_type(&self, t: MemberType) -> impl Iterator<Item = &Member> {
        self.members.values().filter(move |m| m.member_type == t)
    }

    /// The number of voters that constitutes a majority.
    ///
    /// A configuration with no voters has no quorum; this returns
    /// `usize::MAX` so nothing can ever satisfy it.
    pub fn quorum_size(&self) -> usize {
        let voters = self.voters().count();
        if voters == 0 {
            return usize::MAX;
        }
        voters / 2 + 1
    }

    /// Whether `granted` contains a quorum of voters.
    pub fn is_quorum<'a>(&self, granted: impl Iterator<Item = &'a MemberId>) -> bool {
        let voters: Vec<MemberId> = self.voters().map(|m| m.id).collect();
        let count = granted.filter(|id| voters.contains(id)).count();
        count >= self.quorum_size()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            index: 0,
            term: 0,
            timestamp: 0,
            members: BTreeMap::new(),
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cfg@{}:{}{{", self.index, self.term)?;
        for (i, m) in self.members.values().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", m)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

    fn member(id: MemberId, t: MemberType) -> Member {
        Member::new(id, format!("127.0.0.1:{}", 9000 + id), t)
    }

    #[test]
    fn quorum_counts_only_active_members() {
        let cfg = Configuration::bootstrap(btreemap! {
            1 => member(1, MemberType::Active),
            2 => member(2, MemberType::Active),
            3 => member(3, MemberType::Active),
            4 => member(4, MemberType::Passive),
            5 => member(5, MemberType::Reserve),
        });

        assert_eq!(cfg.quorum_size(), 2);
        assert!(cfg.is_quorum([1, 2].iter()));
        // A passive member's grant does not count.
        assert!(!cfg.is_quorum([1, 4].iter()));
    }

    #[test]
    fn empty_configuration_has_no_quorum() {
        let cfg = Configuration::default();
        assert!(!cfg.is_quorum([].iter()));
    }

    #[test]
    fn replication_targets_exclude_local_and_reserve() {
        let cfg = Configuration::bootstrap(btreemap! {
            1 => member(1, MemberType::Active),
            2 => member(2, MemberType::Active),
            3 => member(3, MemberType::Passive),
            4 => member(4, MemberType::Reserve),
        });

        let targets: Vec<MemberId> = cfg.replication_targets(1).map(|m| m.id).collect();
        assert_eq!(targets, vec![2, 3]);
    }
}
