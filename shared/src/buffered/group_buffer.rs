use std::collections::{BTreeMap, HashMap};

use log::trace;

use crate::types::{GroupId, PeerId, ViewId};

/// An encoded envelope kept for replay to late joiners
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferedMessage {
    /// Global insertion order across every group
    pub rank: u64,
    pub sender: PeerId,
    pub envelope: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct ViewBuffer {
    create: Option<BufferedMessage>,
    rpcs: BTreeMap<String, Vec<BufferedMessage>>,
}

impl ViewBuffer {
    fn is_empty(&self) -> bool {
        self.create.is_none() && self.rpcs.is_empty()
    }

    fn remove_sender(&mut self, sender: PeerId) -> usize {
        let mut removed = 0;
        if self
            .create
            .as_ref()
            .is_some_and(|create| create.sender == sender)
        {
            self.create = None;
            removed += 1;
        }
        for list in self.rpcs.values_mut() {
            let before = list.len();
            list.retain(|message| message.sender != sender);
            removed += before - list.len();
        }
        self.rpcs.retain(|_, list| !list.is_empty());
        removed
    }
}

/// Buffered creations and RPCs, grouped by visibility group then by view.
///
/// A view holds at most one creation (the latest wins) and an ordered list
/// of RPCs per name.
#[derive(Debug, Default)]
pub struct GroupBuffers {
    groups: HashMap<GroupId, BTreeMap<ViewId, ViewBuffer>>,
    view_groups: HashMap<ViewId, GroupId>,
    next_rank: u64,
}

impl GroupBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the creation of `view`, replacing any earlier one
    pub fn store_create(
        &mut self,
        group: GroupId,
        view: ViewId,
        sender: PeerId,
        envelope: Vec<u8>,
    ) {
        let rank = self.next_rank();
        self.view_buffer(group, view).create = Some(BufferedMessage {
            rank,
            sender,
            envelope,
        });
    }

    /// Replace the encoded creation of `view`, keeping its place in the
    /// replay order
    pub fn rewrite_create(&mut self, view: ViewId, envelope: Vec<u8>) -> bool {
        let Some(group) = self.view_groups.get(&view) else {
            return false;
        };
        let create = self
            .groups
            .get_mut(group)
            .and_then(|views| views.get_mut(&view))
            .and_then(|buffer| buffer.create.as_mut());
        match create {
            Some(create) => {
                create.envelope = envelope;
                true
            }
            None => false,
        }
    }

    /// Append an RPC to the list kept for `view` and `name`
    pub fn store_rpc(
        &mut self,
        group: GroupId,
        view: ViewId,
        name: &str,
        sender: PeerId,
        envelope: Vec<u8>,
    ) {
        let rank = self.next_rank();
        self.view_buffer(group, view)
            .rpcs
            .entry(name.to_string())
            .or_default()
            .push(BufferedMessage {
                rank,
                sender,
                envelope,
            });
    }

    pub fn group_of(&self, view: ViewId) -> Option<GroupId> {
        self.view_groups.get(&view).copied()
    }

    /// Groups holding any buffered message
    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.groups.keys().copied().collect();
        groups.sort();
        groups
    }

    /// Views with buffered messages in `group`
    pub fn views_in(&self, group: GroupId) -> Vec<ViewId> {
        self.groups
            .get(&group)
            .map(|views| views.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Everything buffered in `group`: creations first, then RPCs, each in
    /// original insertion order
    pub fn backlog(&self, group: GroupId) -> Vec<&BufferedMessage> {
        self.backlog_for_groups(&[group])
    }

    /// The merged backlog of several groups, ordered as in [`backlog`](Self::backlog)
    pub fn backlog_for_groups(&self, groups: &[GroupId]) -> Vec<&BufferedMessage> {
        let buffers = groups
            .iter()
            .filter_map(|group| self.groups.get(group))
            .flat_map(|views| views.values());
        collect_backlog(buffers)
    }

    /// Everything buffered for a single view
    pub fn backlog_for_view(&self, view: ViewId) -> Vec<&BufferedMessage> {
        let buffer = self
            .view_groups
            .get(&view)
            .and_then(|group| self.groups.get(group))
            .and_then(|views| views.get(&view));
        collect_backlog(buffer.into_iter())
    }

    /// Drop every message buffered for `view`
    pub fn remove_view(&mut self, view: ViewId) -> bool {
        let Some(group) = self.view_groups.remove(&view) else {
            return false;
        };
        if let Some(views) = self.groups.get_mut(&group) {
            views.remove(&view);
            if views.is_empty() {
                self.groups.remove(&group);
            }
        }
        true
    }

    /// Drop the RPCs buffered for `view`, optionally only those named
    /// `name`. The creation is kept.
    pub fn remove_rpcs(&mut self, view: ViewId, name: Option<&str>) -> usize {
        let Some(buffer) = self
            .view_groups
            .get(&view)
            .and_then(|group| self.groups.get_mut(group))
            .and_then(|views| views.get_mut(&view))
        else {
            return 0;
        };
        match name {
            Some(name) => buffer.rpcs.remove(name).map(|list| list.len()).unwrap_or(0),
            None => std::mem::take(&mut buffer.rpcs)
                .values()
                .map(|list| list.len())
                .sum(),
        }
    }

    /// Drop every message `sender` buffered
    pub fn remove_sender(&mut self, sender: PeerId) -> usize {
        let mut removed = 0;
        for views in self.groups.values_mut() {
            for buffer in views.values_mut() {
                removed += buffer.remove_sender(sender);
            }
            views.retain(|_, buffer| !buffer.is_empty());
        }
        self.groups.retain(|_, views| !views.is_empty());
        let groups = &self.groups;
        self.view_groups.retain(|view, group| {
            groups
                .get(group)
                .is_some_and(|views| views.contains_key(view))
        });
        if removed > 0 {
            trace!("pruned {} buffered messages from {}", removed, sender);
        }
        removed
    }

    /// Drop a whole group's backlog, returning the views it held
    pub fn remove_group(&mut self, group: GroupId) -> Vec<ViewId> {
        let views: Vec<ViewId> = self
            .groups
            .remove(&group)
            .map(|views| views.into_keys().collect())
            .unwrap_or_default();
        for view in &views {
            self.view_groups.remove(view);
        }
        views
    }

    /// Re-home the messages of `view` under another group
    pub fn move_view(&mut self, view: ViewId, group: GroupId) -> bool {
        let Some(previous) = self.view_groups.get(&view).copied() else {
            return false;
        };
        if previous == group {
            return true;
        }
        let buffer = self
            .groups
            .get_mut(&previous)
            .and_then(|views| views.remove(&view))
            .unwrap_or_default();
        if self.groups.get(&previous).is_some_and(|views| views.is_empty()) {
            self.groups.remove(&previous);
        }
        self.groups.entry(group).or_default().insert(view, buffer);
        self.view_groups.insert(view, group);
        true
    }

    pub fn len(&self) -> usize {
        self.groups
            .values()
            .flat_map(|views| views.values())
            .map(|buffer| {
                usize::from(buffer.create.is_some())
                    + buffer.rpcs.values().map(|list| list.len()).sum::<usize>()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.view_groups.clear();
    }

    fn next_rank(&mut self) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    fn view_buffer(&mut self, group: GroupId, view: ViewId) -> &mut ViewBuffer {
        if let Some(previous) = self.view_groups.insert(view, group) {
            if previous != group {
                self.move_buffer(view, previous, group);
            }
        }
        self.groups
            .entry(group)
            .or_default()
            .entry(view)
            .or_default()
    }

    fn move_buffer(&mut self, view: ViewId, from: GroupId, to: GroupId) {
        if let Some(buffer) = self.groups.get_mut(&from).and_then(|views| views.remove(&view)) {
            self.groups.entry(to).or_default().insert(view, buffer);
        }
        if self.groups.get(&from).is_some_and(|views| views.is_empty()) {
            self.groups.remove(&from);
        }
    }
}

fn collect_backlog<'a>(buffers: impl Iterator<Item = &'a ViewBuffer>) -> Vec<&'a BufferedMessage> {
    let mut creates = Vec::new();
    let mut rpcs = Vec::new();
    for buffer in buffers {
        creates.extend(buffer.create.as_ref());
        rpcs.extend(buffer.rpcs.values().flatten());
    }
    creates.sort_by_key(|message| message.rank);
    rpcs.sort_by_key(|message| message.rank);
    creates.extend(rpcs);
    creates
}
