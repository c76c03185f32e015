use std::collections::{BTreeSet, HashMap, HashSet};

use bitflags::bitflags;

use crate::types::{GroupId, PeerId, ViewId};

bitflags! {
    /// Behavior of a visibility group
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GroupFlags: u8 {
        /// Newly connected peers join the group automatically
        const AUTO_ADMIT = 1 << 0;
        /// Only members see the group's views
        const HIDE_FROM_NON_MEMBERS = 1 << 1;
    }
}

/// Group flags, group membership and per-peer send suppression
#[derive(Debug, Default)]
pub struct VisibilityGroups {
    flags: HashMap<GroupId, GroupFlags>,
    members: HashMap<GroupId, BTreeSet<PeerId>>,
    culled: HashSet<(ViewId, PeerId)>,
}

impl VisibilityGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self, group: GroupId) -> GroupFlags {
        self.flags.get(&group).copied().unwrap_or_default()
    }

    /// Replace the flags of `group`, returning the previous ones
    pub fn set_flags(&mut self, group: GroupId, flags: GroupFlags) -> GroupFlags {
        let previous = if flags.is_empty() {
            self.flags.remove(&group)
        } else {
            self.flags.insert(group, flags)
        };
        previous.unwrap_or_default()
    }

    pub fn is_hidden(&self, group: GroupId) -> bool {
        self.flags(group).contains(GroupFlags::HIDE_FROM_NON_MEMBERS)
    }

    /// Whether `peer` receives the views of `group`
    pub fn can_see(&self, group: GroupId, peer: PeerId) -> bool {
        !self.is_hidden(group) || self.is_member(group, peer)
    }

    pub fn is_member(&self, group: GroupId, peer: PeerId) -> bool {
        self.members
            .get(&group)
            .is_some_and(|members| members.contains(&peer))
    }

    pub fn members(&self, group: GroupId) -> Vec<PeerId> {
        self.members
            .get(&group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns whether `peer` was not already a member
    pub fn add_member(&mut self, group: GroupId, peer: PeerId) -> bool {
        self.members.entry(group).or_default().insert(peer)
    }

    pub fn remove_member(&mut self, group: GroupId, peer: PeerId) -> bool {
        let Some(members) = self.members.get_mut(&group) else {
            return false;
        };
        let removed = members.remove(&peer);
        if members.is_empty() {
            self.members.remove(&group);
        }
        removed
    }

    /// Forget a disconnected peer everywhere
    pub fn remove_peer(&mut self, peer: PeerId) {
        for members in self.members.values_mut() {
            members.remove(&peer);
        }
        self.members.retain(|_, members| !members.is_empty());
        self.culled.retain(|(_, culled_peer)| *culled_peer != peer);
    }

    /// Groups a new peer joins on connect
    pub fn auto_admit_groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self
            .flags
            .iter()
            .filter(|(_, flags)| flags.contains(GroupFlags::AUTO_ADMIT))
            .map(|(group, _)| *group)
            .collect();
        groups.sort();
        groups
    }

    /// Suppress (or resume) state updates and RPCs of `view` to `peer`
    pub fn set_culled(&mut self, view: ViewId, peer: PeerId, culled: bool) {
        if culled {
            self.culled.insert((view, peer));
        } else {
            self.culled.remove(&(view, peer));
        }
    }

    pub fn is_culled(&self, view: ViewId, peer: PeerId) -> bool {
        self.culled.contains(&(view, peer))
    }

    pub fn forget_view(&mut self, view: ViewId) {
        self.culled.retain(|(culled_view, _)| *culled_view != view);
    }

    pub fn clear(&mut self) {
        self.flags.clear();
        self.members.clear();
        self.culled.clear();
    }
}
