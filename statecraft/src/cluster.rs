//! The live cluster roster.
//!
//! `Cluster` holds the current [`Configuration`] plus the volatile
//! per-peer replication state the leader drives. Installing a newer
//! configuration rebuilds the peer map, preserving progress for members
//! that survive, and reports whether the local member's type changed so
//! the server can transition roles.

use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::configuration::Configuration;
use crate::error::StorageError;
use crate::member::Member;
use crate::member::MemberId;
use crate::member::MemberType;
use crate::meta::MetaStore;

/// Leader-side volatile state for one remote member.
#[derive(Debug)]
pub struct PeerState {
    pub member: Member,

    /// Next log index to send.
    pub next_index: u64,
    /// Highest index known replicated.
    pub match_index: u64,

    /// When the peer last answered any RPC successfully.
    pub last_contact: Option<Instant>,
    /// An append or install is in flight; further appends collapse into
    /// the flag until the response arrives.
    pub append_pending: bool,
    pub failure_count: u32,
    /// Do not contact the peer again before this instant.
    pub backoff_until: Option<Instant>,

    /// A configure push is in flight.
    pub configure_pending: bool,
    /// Index of the latest configuration the peer has acknowledged.
    pub configured_index: u64,
    /// Offset of the snapshot stream in progress, if any.
    pub snapshot_offset: Option<u64>,
}

impl PeerState {
    fn new(member: Member, next_index: u64) -> Self {
        Self {
            member,
            next_index,
            match_index: 0,
            last_contact: None,
            append_pending: false,
            failure_count: 0,
            backoff_until: None,
            configure_pending: false,
            configured_index: 0,
            snapshot_offset: None,
        }
    }

    /// Whether the peer may be contacted now.
    pub fn ready(&self, now: Instant) -> bool {
        !self.append_pending && self.backoff_until.map_or(true, |t| t <= now)
    }

    pub fn record_success(&mut self) {
        self.last_contact = Some(Instant::now());
        self.failure_count = 0;
        self.backoff_until = None;
    }

    pub fn record_failure(&mut self, backoff: std::time::Duration) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.backoff_until = Some(Instant::now() + backoff);
    }
}

/// What [`Cluster::configure`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureOutcome {
    /// False when the incoming configuration was stale and ignored.
    pub installed: bool,
    /// The local member's new type, when it changed.
    pub local_type_changed: Option<MemberType>,
    pub joined: Vec<MemberId>,
    pub left: Vec<MemberId>,
}

impl ConfigureOutcome {
    fn ignored() -> Self {
        Self {
            installed: false,
            local_type_changed: None,
            joined: Vec::new(),
            left: Vec::new(),
        }
    }
}

pub struct Cluster {
    local_id: MemberId,
    configuration: Configuration,
    peers: BTreeMap<MemberId, PeerState>,
}

impl Cluster {
    pub fn new(local_id: MemberId, configuration: Configuration) -> Self {
        let mut cluster = Self {
            local_id,
            configuration: Configuration::default(),
            peers: BTreeMap::new(),
        };
        cluster.install(configuration, 1);
        cluster
    }

    pub fn local_id(&self) -> MemberId {
        self.local_id
    }

    pub fn local_member(&self) -> Option<&Member> {
        self.configuration.member(self.local_id)
    }

    /// The local member's type; `Inactive` when this server is not in the
    /// configuration.
    pub fn local_type(&self) -> MemberType {
        self.local_member()
            .map(|m| m.member_type)
            .unwrap_or(MemberType::Inactive)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.configuration.member(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerState> {
        self.peers.values()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut PeerState> {
        self.peers.values_mut()
    }

    pub fn peer(&self, id: MemberId) -> Option<&PeerState> {
        self.peers.get(&id)
    }

    pub fn peer_mut(&mut self, id: MemberId) -> Option<&mut PeerState> {
        self.peers.get_mut(&id)
    }

    /// Install `cfg` if it is newer than the current configuration.
    ///
    /// Joins and leaves are reported in the outcome; a change to the local
    /// member's type is what drives a role transition.
    pub fn configure(&mut self, cfg: Configuration, next_index: u64) -> ConfigureOutcome {
        if cfg.index <= self.configuration.index && self.configuration.index != 0 {
            return ConfigureOutcome::ignored();
        }
        self.install(cfg, next_index)
    }

    fn install(&mut self, cfg: Configuration, next_index: u64) -> ConfigureOutcome {
        let old_type = self.local_type();

        let joined: Vec<MemberId> = cfg
            .members
            .keys()
            .filter(|id| !self.configuration.members.contains_key(id))
            .copied()
            .collect();
        let left: Vec<MemberId> = self
            .configuration
            .members
            .keys()
            .filter(|id| !cfg.members.contains_key(id))
            .copied()
            .collect();

        let mut peers = BTreeMap::new();
        for member in cfg.members.values() {
            if member.id == self.local_id {
                continue;
            }
            let state = match self.peers.remove(&member.id) {
                Some(mut p) => {
                    p.member = member.clone();
                    p
                }
                None => PeerState::new(member.clone(), next_index),
            };
            peers.insert(member.id, state);
        }

        self.peers = peers;
        self.configuration = cfg;

        let new_type = self.local_type();
        ConfigureOutcome {
            installed: true,
            local_type_changed: (new_type != old_type).then_some(new_type),
            joined,
            left,
        }
    }

    /// Persist the current configuration.
    pub fn commit(&self, meta: &mut MetaStore) -> Result<(), StorageError> {
        meta.save_configuration(&self.configuration)
    }

    /// Reset every peer's progress for a new leadership term.
    pub fn reset_progress(&mut self, last_index: u64) {
        for peer in self.peers.values_mut() {
            peer.next_index = last_index + 1;
            peer.match_index = 0;
            peer.append_pending = false;
            peer.failure_count = 0;
            peer.backoff_until = None;
            peer.configure_pending = false;
            peer.configured_index = 0;
            peer.snapshot_offset = None;
        }
    }

    /// The highest index replicated to a quorum of voters, counting the
    /// local log's last index for an active local member.
    pub fn quorum_match_index(&self, local_last_index: u64) -> u64 {
        let mut matches: Vec<u64> = Vec::new();
        for m in self.configuration.voters() {
            if m.id == self.local_id {
                matches.push(local_last_index);
            } else if let Some(p) = self.peers.get(&m.id) {
                matches.push(p.match_index);
            } else {
                matches.push(0);
            }
        }
        if matches.is_empty() {
            return 0;
        }

        // The k-th largest match, where k is the quorum size, is
        // replicated on at least a quorum.
        matches.sort_unstable_by(|a, b| b.cmp(a));
        let quorum = self.configuration.quorum_size();
        if quorum == usize::MAX || matches.len() < quorum {
            return 0;
        }
        matches[quorum - 1]
    }

    /// Whether a quorum of voters has answered since `since`.
    pub fn quorum_contacted_since(&self, since: Instant) -> bool {
        let granted: Vec<MemberId> = self
            .configuration
            .voters()
            .filter(|m| {
                if m.id == self.local_id {
                    return true;
                }
                self.peers
                    .get(&m.id)
                    .and_then(|p| p.last_contact)
                    .map_or(false, |t| t >= since)
            })
            .map(|m| m.id)
            .collect();
        self.configuration.is_quorum(granted.iter())
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

    fn member(id: MemberId, t: MemberType) -> Member {
        Member::new(id, format!("127.0.0.1:{}", 9000 + id), t)
    }

    fn three_actives() -> Configuration {
        Configuration::new(
            1,
            1,
            0,
            btreemap! {
                1 => member(1, MemberType::Active),
                2 => member(2, MemberType::Active),
                3 => member(3, MemberType::Active),
            },
        )
    }

    #[test]
    fn stale_configuration_ignored() {
        let mut cluster = Cluster::new(1, three_actives());

        let stale = Configuration::new(1, 1, 0, btreemap! {1 => member(1, MemberType::Active)});
        let outcome = cluster.configure(stale, 1);

        assert!(!outcome.installed);
        assert_eq!(3, cluster.configuration().members.len());
    }

    #[test]
    fn newer_configuration_reports_membership_changes() {
        let mut cluster = Cluster::new(1, three_actives());

        let next = Configuration::new(
            5,
            2,
            0,
            btreemap! {
                1 => member(1, MemberType::Active),
                2 => member(2, MemberType::Active),
                4 => member(4, MemberType::Passive),
            },
        );
        let outcome = cluster.configure(next, 10);

        assert!(outcome.installed);
        assert_eq!(vec![4], outcome.joined);
        assert_eq!(vec![3], outcome.left);
        assert_eq!(None, outcome.local_type_changed);
        assert!(cluster.peer(4).is_some());
        assert!(cluster.peer(3).is_none());
    }

    #[test]
    fn local_demotion_reported() {
        let mut cluster = Cluster::new(1, three_actives());

        let next = Configuration::new(
            5,
            2,
            0,
            btreemap! {
                1 => member(1, MemberType::Passive),
                2 => member(2, MemberType::Active),
                3 => member(3, MemberType::Active),
            },
        );
        let outcome = cluster.configure(next, 10);

        assert_eq!(Some(MemberType::Passive), outcome.local_type_changed);
    }

    #[test]
    fn surviving_peer_keeps_progress() {
        let mut cluster = Cluster::new(1, three_actives());
        cluster.peer_mut(2).unwrap().match_index = 7;

        let next = Configuration::new(
            5,
            2,
            0,
            btreemap! {
                1 => member(1, MemberType::Active),
                2 => member(2, MemberType::Active),
            },
        );
        cluster.configure(next, 10);

        assert_eq!(7, cluster.peer(2).unwrap().match_index);
    }

    #[test]
    fn quorum_match_index_requires_own_term_quorum() {
        let mut cluster = Cluster::new(1, three_actives());

        // Local log at 10, peers lagging.
        cluster.peer_mut(2).unwrap().match_index = 4;
        cluster.peer_mut(3).unwrap().match_index = 2;
        assert_eq!(4, cluster.quorum_match_index(10));

        cluster.peer_mut(3).unwrap().match_index = 6;
        assert_eq!(6, cluster.quorum_match_index(10));
    }

    #[test]
    fn quorum_match_ignores_passive_members() {
        let mut cluster = Cluster::new(
            1,
            Configuration::new(
                1,
                1,
                0,
                btreemap! {
                    1 => member(1, MemberType::Active),
                    2 => member(2, MemberType::Active),
                    3 => member(3, MemberType::Active),
                    4 => member(4, MemberType::Passive),
                },
            ),
        );

        cluster.peer_mut(4).unwrap().match_index = 100;
        cluster.peer_mut(2).unwrap().match_index = 3;
        cluster.peer_mut(3).unwrap().match_index = 0;

        assert_eq!(3, cluster.quorum_match_index(10));
    }
}
