// SPDX-License-Identifier: AGPL-3.0-or-later

//! The URL space trie: one [`Junction`] per server id, each holding a set of
//! [`Channel`]s keyed by trailing filter, each a trie of [`Branch`]es keyed
//! by URL segment. Concurrency is per-junction: callers take a read lock for
//! `get`/`walk` and a write lock for `set`/`unset`.

use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{
    context::{ContextSpec, RequestContext},
    sequence::Sequence,
};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelFlags: u8 {
        /// Filter may also match an intermediate URL segment, not just the
        /// trailing one.
        const SEGMENT_MATCH = 0b01;
    }
}

/// How an entry should be removed from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsetMode {
    /// Remove only the exact node's data/constraint, leave children intact.
    Node,
    /// Remove the whole subtree rooted at the target node.
    Recurse,
    /// Remove every constraint-guarded entry, not just the plain data.
    AllConstraints,
}

#[derive(Clone)]
struct ConstraintEntry<V> {
    spec: ContextSpec,
    value: Arc<V>,
}

struct Node<V> {
    data_inherit: Option<Arc<V>>,
    data_no_inherit: Option<Arc<V>>,
    constraints: Vec<ConstraintEntry<V>>,
    children: Vec<Branch<V>>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self {
            data_inherit: None,
            data_no_inherit: None,
            constraints: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl<V> Node<V> {
    fn is_empty(&self) -> bool {
        self.data_inherit.is_none()
            && self.data_no_inherit.is_none()
            && self.constraints.is_empty()
            && self.children.is_empty()
    }

    fn insert_constraint(&mut self, spec: ContextSpec, value: Arc<V>) {
        let pos = self
            .constraints
            .binary_search_by(|e| e.spec.priority_cmp(&spec))
            .unwrap_or_else(|i| i);
        self.constraints.insert(pos, ConstraintEntry { spec, value });
    }

    fn find_child(&self, segment: &str) -> Option<usize> {
        self.children.binary_search_by(|b| b.segment.as_str().cmp(segment)).ok()
    }

    fn child_or_insert(&mut self, segment: &str) -> &mut Node<V> {
        let pos = self
            .children
            .binary_search_by(|b| b.segment.as_str().cmp(segment))
            .unwrap_or_else(|i| i);
        if self.children.get(pos).is_none_or(|b| b.segment != segment) {
            self.children.insert(
                pos,
                Branch {
                    segment: segment.to_string(),
                    node: Node::default(),
                },
            );
        }
        &mut self.children[pos].node
    }
}

struct Branch<V> {
    segment: String,
    node: Node<V>,
}

struct Channel<V> {
    filter: String,
    flags: ChannelFlags,
    root: Node<V>,
}

struct Junction<V> {
    channels: Vec<Channel<V>>,
}

impl<V> Default for Junction<V> {
    fn default() -> Self {
        Self { channels: Vec::new() }
    }
}

impl<V> Junction<V> {
    fn channel_mut(&mut self, filter: &str, flags: ChannelFlags) -> &mut Channel<V> {
        if let Some(idx) = self.channels.iter().position(|c| c.filter == filter) {
            return &mut self.channels[idx];
        }
        self.channels.push(Channel {
            filter: filter.to_string(),
            flags,
            root: Node::default(),
        });
        self.channels.last_mut().unwrap_or_else(|| unreachable!())
    }
}

/// Outcome of a successful [`UrlSpace::get`] lookup.
#[derive(Debug, Clone)]
pub struct MatchInfo<V> {
    pub value: Arc<V>,
    pub depth: usize,
    pub is_segment_match: bool,
}

/// A generic, concurrent URL space keyed by server/junction id.
pub struct UrlSpace<V> {
    junctions: DashMap<u64, Arc<RwLock<Junction<V>>>>,
    next_id: AtomicU64,
}

impl<V> Default for UrlSpace<V> {
    fn default() -> Self {
        Self {
            junctions: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<V> UrlSpace<V>
where V: Send + Sync + 'static
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh junction id.
    pub fn alloc(&self) -> u64 {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        self.junctions.insert(id, Arc::new(RwLock::new(Junction::default())));
        id
    }

    fn junction(&self, id: u64) -> Option<Arc<RwLock<Junction<V>>>> {
        self.junctions.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Registers `value` at `key`/`url` under `junction_id`, optionally
    /// scoped by a context constraint and/or marked as non-inheriting.
    pub async fn set(
        &self,
        junction_id: u64,
        key: &str,
        url: &str,
        value: V,
        no_inherit: bool,
        constraint: Option<ContextSpec>,
        channel_flags: ChannelFlags,
    ) {
        let Some(junction) = self.junction(junction_id) else {
            return;
        };
        let seq = Sequence::build(key, url);
        let value = Arc::new(value);
        let mut junction = junction.write().await;
        let channel = junction.channel_mut(&seq.filter, channel_flags);
        let mut node = &mut channel.root;
        for seg in &seq.walk_segments {
            node = node.child_or_insert(seg);
        }
        match constraint {
            Some(spec) => node.insert_constraint(spec, value),
            None if no_inherit => node.data_no_inherit = Some(value),
            None => node.data_inherit = Some(value),
        }
    }

    /// Looks up `key`/`url`, preferring the deepest-matching channel; within
    /// a channel, constraint entries are checked in priority order at each
    /// visited node, overriding inherited data; `data_no_inherit` wins only
    /// at a fully exhausted descent. `exact` restricts the match to a node
    /// reached by consuming every segment with no constraint/inherit
    /// fallback involved.
    pub async fn get(
        &self,
        junction_id: u64,
        key: &str,
        url: &str,
        ctx: &RequestContext,
        exact: bool,
    ) -> Option<MatchInfo<V>> {
        let junction = self.junction(junction_id)?;
        let seq = Sequence::build(key, url);
        let junction = junction.read().await;

        let mut best: Option<MatchInfo<V>> = None;
        for channel in &junction.channels {
            if let Some(found) = Self::descend_channel(channel, &seq, ctx, exact) {
                let better = match &best {
                    None => true,
                    Some(cur) => found.depth > cur.depth,
                };
                if better {
                    best = Some(found);
                }
            }
        }
        best
    }

    fn descend_channel(
        channel: &Channel<V>,
        seq: &Sequence,
        ctx: &RequestContext,
        exact: bool,
    ) -> Option<MatchInfo<V>> {
        let trailing = seq.walk_segments.last()?;
        let segment_match_flag = channel.flags.contains(ChannelFlags::SEGMENT_MATCH);
        let matches_trailing = super::context::glob_match(&channel.filter, trailing);
        let matches_intermediate = segment_match_flag
            && seq.url_segments().iter().any(|s| super::context::glob_match(&channel.filter, s));

        // A channel with no matching filter (trailing, or an intermediate
        // segment under SEGMENT_MATCH) contributes nothing to this lookup.
        if !matches_trailing && !matches_intermediate {
            return None;
        }
        let is_segment_match = segment_match_flag && (matches_trailing || matches_intermediate);

        let mut node = &channel.root;
        let mut candidate: Option<(Arc<V>, usize)> = None;
        let mut depth = 0;
        let total = seq.walk_segments.len();

        for seg in &seq.walk_segments {
            let Some(idx) = node.find_child(seg) else {
                return candidate.map(|(value, depth)| MatchInfo {
                    value,
                    depth,
                    is_segment_match,
                });
            };
            node = &node.children[idx].node;
            depth += 1;

            let exhausted = depth == total;
            if exact && !exhausted {
                continue;
            }

            if exhausted {
                if let Some(v) = &node.data_no_inherit {
                    candidate = Some((Arc::clone(v), depth));
                    continue;
                }
            }
            if !exact {
                if let Some(v) = &node.data_inherit {
                    candidate = Some((Arc::clone(v), depth));
                }
                for entry in &node.constraints {
                    if entry.spec.matches(ctx) {
                        candidate = Some((Arc::clone(&entry.value), depth));
                        break;
                    }
                }
            }
        }

        candidate.map(|(value, depth)| MatchInfo { value, depth, is_segment_match })
    }

    /// Removes data registered at `key`/`url`. See [`UnsetMode`] for the
    /// removal granularity. Returns whether anything was removed.
    pub async fn unset(
        &self,
        junction_id: u64,
        key: &str,
        url: &str,
        mode: UnsetMode,
    ) -> bool {
        let Some(junction) = self.junction(junction_id) else {
            return false;
        };
        let seq = Sequence::build(key, url);
        let mut junction = junction.write().await;
        let Some(channel_idx) = junction.channels.iter().position(|c| c.filter == seq.filter)
        else {
            return false;
        };

        let removed =
            Self::unset_path(&mut junction.channels[channel_idx].root, &seq.walk_segments, mode);
        if junction.channels[channel_idx].root.is_empty() {
            junction.channels.remove(channel_idx);
        }
        removed
    }

    fn unset_path(node: &mut Node<V>, path: &[String], mode: UnsetMode) -> bool {
        let Some((seg, rest)) = path.split_first() else {
            return Self::unset_here(node, mode);
        };
        let Some(idx) = node.find_child(seg) else {
            return false;
        };
        if rest.is_empty() {
            let removed = Self::unset_here(&mut node.children[idx].node, mode);
            if matches!(mode, UnsetMode::Recurse) || node.children[idx].node.is_empty() {
                node.children.remove(idx);
            }
            removed
        } else {
            let removed = Self::unset_path(&mut node.children[idx].node, rest, mode);
            if node.children[idx].node.is_empty() {
                node.children.remove(idx);
            }
            removed
        }
    }

    fn unset_here(node: &mut Node<V>, mode: UnsetMode) -> bool {
        match mode {
            UnsetMode::Node => {
                let had = node.data_inherit.is_some() || node.data_no_inherit.is_some();
                node.data_inherit = None;
                node.data_no_inherit = None;
                had
            },
            UnsetMode::AllConstraints => {
                let had = node.data_inherit.is_some()
                    || node.data_no_inherit.is_some()
                    || !node.constraints.is_empty();
                node.data_inherit = None;
                node.data_no_inherit = None;
                node.constraints.clear();
                had
            },
            UnsetMode::Recurse => {
                let had = !node.is_empty();
                *node = Node::default();
                had
            },
        }
    }

    /// Depth-first walk over every node of every channel in `junction_id`,
    /// invoking `visit(path, has_inherit, has_no_inherit)` at each.
    pub async fn walk(&self, junction_id: u64, mut visit: impl FnMut(&[String], bool, bool)) {
        let Some(junction) = self.junction(junction_id) else {
            return;
        };
        let junction = junction.read().await;
        for channel in &junction.channels {
            let mut path = Vec::new();
            Self::walk_node(&channel.root, &mut path, &mut visit);
        }
    }

    fn walk_node(node: &Node<V>, path: &mut Vec<String>, visit: &mut impl FnMut(&[String], bool, bool)) {
        visit(path, node.data_inherit.is_some(), node.data_no_inherit.is_some());
        for branch in &node.children {
            path.push(branch.segment.clone());
            Self::walk_node(&branch.node, path, visit);
            path.pop();
        }
    }
}

/// Orders two fully-built trie paths the way insertion order would break a
/// tie: shorter first, else lexicographic. Exposed for callers that need to
/// present registered routes in a stable order.
pub fn path_cmp(a: &[String], b: &[String]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub type PathMap<V> = HashMap<Vec<String>, V>;

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[tokio::test]
    async fn exact_segment_wins_over_wildcard_ancestor() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a/*", "wild", false, None, ChannelFlags::empty()).await;
        space.set(id, "GET", "/a/b", "exact", false, None, ChannelFlags::empty()).await;

        let m = space.get(id, "GET", "/a/b", &ctx(), false).await.unwrap();
        assert_eq!(*m.value, "exact");
    }

    #[tokio::test]
    async fn deeper_node_inherit_overrides_shallow_ancestor() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a", "A", false, None, ChannelFlags::empty()).await;
        space.set(id, "GET", "/a/b", "B", false, None, ChannelFlags::empty()).await;

        let m = space.get(id, "GET", "/a/b/c", &ctx(), false).await.unwrap();
        assert_eq!(*m.value, "B");
    }

    #[tokio::test]
    async fn no_inherit_blocks_descendant_lookup() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a", "A", false, None, ChannelFlags::empty()).await;
        space.set(id, "GET", "/a/b", "B", true, None, ChannelFlags::empty()).await;

        // exact at /a/b sees the no-inherit data
        let exact = space.get(id, "GET", "/a/b", &ctx(), false).await.unwrap();
        assert_eq!(*exact.value, "B");

        // descending past /a/b falls back to the last inherit ancestor, /a
        let deeper = space.get(id, "GET", "/a/b/c", &ctx(), false).await.unwrap();
        assert_eq!(*deeper.value, "A");
    }

    #[tokio::test]
    async fn context_constraint_overrides_plain_inherit_when_matched() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/admin", "public", false, None, ChannelFlags::empty()).await;
        space
            .set(
                id,
                "GET",
                "/admin",
                "internal",
                false,
                Some(ContextSpec::ipv4_cidr(Ipv4Addr::new(10, 0, 0, 0), 8)),
                ChannelFlags::empty(),
            )
            .await;

        let mut inside = ctx();
        inside.peer = Some(Ipv4Addr::new(10, 1, 2, 3).into());
        let m = space.get(id, "GET", "/admin", &inside, false).await.unwrap();
        assert_eq!(*m.value, "internal");

        let mut outside = ctx();
        outside.peer = Some(Ipv4Addr::new(192, 0, 2, 1).into());
        let m = space.get(id, "GET", "/admin", &outside, false).await.unwrap();
        assert_eq!(*m.value, "public");
    }

    #[tokio::test]
    async fn unset_node_leaves_children_reachable() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a", "A", false, None, ChannelFlags::empty()).await;
        space.set(id, "GET", "/a/b", "B", false, None, ChannelFlags::empty()).await;

        assert!(space.unset(id, "GET", "/a", UnsetMode::Node).await);
        assert!(space.get(id, "GET", "/a", &ctx(), true).await.is_none());
        let child = space.get(id, "GET", "/a/b", &ctx(), true).await.unwrap();
        assert_eq!(*child.value, "B");
    }

    #[tokio::test]
    async fn unset_recurse_removes_subtree() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a", "A", false, None, ChannelFlags::empty()).await;
        space.set(id, "GET", "/a/b", "B", false, None, ChannelFlags::empty()).await;

        assert!(space.unset(id, "GET", "/a", UnsetMode::Recurse).await);
        assert!(space.get(id, "GET", "/a/b", &ctx(), false).await.is_none());
    }

    #[tokio::test]
    async fn segment_match_channel_matches_intermediate_segment() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space
            .set(id, "GET", "/*.cgi/extra", "cgi-handler", false, None, ChannelFlags::SEGMENT_MATCH)
            .await;

        let m = space.get(id, "GET", "/*.cgi/extra", &ctx(), false).await.unwrap();
        assert!(m.is_segment_match);
    }

    #[tokio::test]
    async fn filtered_channel_does_not_catch_urls_its_filter_rejects() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a/*.txt", "X", false, None, ChannelFlags::empty()).await;

        assert!(space.get(id, "GET", "/a/b.html", &ctx(), false).await.is_none());
        let m = space.get(id, "GET", "/a/b.txt", &ctx(), false).await.unwrap();
        assert_eq!(*m.value, "X");
    }

    #[tokio::test]
    async fn walk_visits_every_registered_node() {
        let space: UrlSpace<&'static str> = UrlSpace::new();
        let id = space.alloc();
        space.set(id, "GET", "/a", "A", false, None, ChannelFlags::empty()).await;
        space.set(id, "GET", "/a/b", "B", false, None, ChannelFlags::empty()).await;

        let mut seen = Vec::new();
        space
            .walk(id, |path, has_inherit, _| {
                if has_inherit {
                    seen.push(path.to_vec());
                }
            })
            .await;
        seen.sort_by(|a, b| path_cmp(a, b));
        assert_eq!(seen, vec![vec!["GET".to_string(), "a".to_string()], vec![
            "GET".to_string(),
            "a".to_string(),
            "b".to_string()
        ]]);
    }
}
