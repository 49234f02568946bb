//! Frame tree arena.
//!
//! Frames live in a flat map keyed by [`FrameKey`]. The parent → child
//! direction owns (`children`), the child → parent direction is a plain key.
//! Protocol frame IDs map to keys through a separate index, so a main frame
//! that swaps to a new backend ID keeps its key.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::identifiers::{FrameId, FrameKey, LoaderId};
use crate::protocol::FramePayload;

// ============================================================================
// FrameInfo
// ============================================================================

/// Snapshot of a tracked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Stable key.
    pub key: FrameKey,
    /// Current protocol frame ID.
    pub id: FrameId,
    /// Parent key, `None` for the main frame.
    pub parent: Option<FrameKey>,
    /// Parent protocol frame ID.
    pub parent_id: Option<FrameId>,
    /// Document URL including fragment.
    pub url: String,
    /// Frame name attribute.
    pub name: String,
    /// Loader of the current document.
    pub loader_id: LoaderId,
    /// Lifecycle events fired for the current document, sorted.
    pub lifecycle_events: Vec<String>,
    /// Child keys in attach order.
    pub children: Vec<FrameKey>,
    /// `true` if this snapshot was taken as the frame was removed.
    pub detached: bool,
}

impl FrameInfo {
    /// Returns `true` for the main frame.
    #[inline]
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns `true` if `name` fired for the current document.
    #[must_use]
    pub fn has_lifecycle_event(&self, name: &str) -> bool {
        self.lifecycle_events.iter().any(|e| e == name)
    }
}

// ============================================================================
// FrameNode
// ============================================================================

#[derive(Debug)]
pub(crate) struct FrameNode {
    pub(crate) id: FrameId,
    pub(crate) parent: Option<FrameKey>,
    pub(crate) children: Vec<FrameKey>,
    pub(crate) url: String,
    pub(crate) name: String,
    pub(crate) loader_id: LoaderId,
    pub(crate) lifecycle: FxHashSet<String>,
}

impl FrameNode {
    fn new(id: FrameId, parent: Option<FrameKey>) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            url: String::new(),
            name: String::new(),
            loader_id: LoaderId::default(),
            lifecycle: FxHashSet::default(),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of [`FrameTree::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachOutcome {
    Attached(FrameKey),
    /// Already tracked; nothing changed.
    Duplicate(FrameKey),
    /// Parent not tracked; nothing changed.
    UnknownParent,
    /// Parentless frame while a main frame exists; nothing changed.
    RootExists,
}

/// Result of [`FrameTree::navigate`].
#[derive(Debug)]
pub(crate) struct Navigated {
    pub(crate) key: FrameKey,
    /// Children of the previous document, bottom-up.
    pub(crate) removed: Vec<FrameInfo>,
}

/// Result of [`FrameTree::record_lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleOutcome {
    Recorded(FrameKey),
    /// Tagged with a loader other than the frame's current one.
    Stale(FrameKey),
    Unknown,
}

// ============================================================================
// FrameTree
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct FrameTree {
    nodes: FxHashMap<FrameKey, FrameNode>,
    index: FxHashMap<FrameId, FrameKey>,
    main: Option<FrameKey>,
    next_key: u64,
}

impl FrameTree {
    // ========================================================================
    // Mutation
    // ========================================================================

    /// Tracks a new frame under `parent`, or as main frame without one.
    pub(crate) fn attach(&mut self, id: &FrameId, parent: Option<&FrameId>) -> AttachOutcome {
        if let Some(&key) = self.index.get(id) {
            return AttachOutcome::Duplicate(key);
        }

        let parent_key = match parent {
            Some(parent_id) => match self.index.get(parent_id) {
                Some(&key) => Some(key),
                None => return AttachOutcome::UnknownParent,
            },
            None if self.main.is_some() => return AttachOutcome::RootExists,
            None => None,
        };

        let key = self.insert_node(id.clone(), parent_key);
        if parent_key.is_none() {
            self.main = Some(key);
        }
        AttachOutcome::Attached(key)
    }

    /// Applies a committed new-document navigation.
    ///
    /// A parentless payload always targets the main frame: if its ID is
    /// unseen, the existing main frame is re-keyed to it. Returns `None` if
    /// a child frame's parent is unknown.
    pub(crate) fn navigate(&mut self, frame: &FramePayload) -> Option<Navigated> {
        let key = match &frame.parent_id {
            None => self.navigate_root(&frame.id),
            Some(parent_id) => match self.index.get(&frame.id) {
                Some(&key) => key,
                None => match self.attach(&frame.id, Some(parent_id)) {
                    AttachOutcome::Attached(key) | AttachOutcome::Duplicate(key) => key,
                    AttachOutcome::UnknownParent | AttachOutcome::RootExists => return None,
                },
            },
        };

        let children = self.nodes.get(&key)?.children.clone();
        let mut removed = Vec::new();
        for child in children {
            self.remove_subtree(child, &mut removed);
        }

        let node = self.nodes.get_mut(&key)?;
        node.url = frame.full_url();
        node.name = frame.name.clone().unwrap_or_default();

        if let Some(loader_id) = &frame.loader_id
            && *loader_id != node.loader_id
        {
            node.loader_id = loader_id.clone();
            node.lifecycle.clear();
        }

        Some(Navigated { key, removed })
    }

    fn navigate_root(&mut self, id: &FrameId) -> FrameKey {
        let Some(main) = self.main else {
            let key = self.insert_node(id.clone(), None);
            self.main = Some(key);
            return key;
        };

        if let Some(node) = self.nodes.get_mut(&main)
            && node.id != *id
        {
            self.index.remove(&node.id);
            node.id = id.clone();
            self.index.insert(id.clone(), main);
        }
        main
    }

    /// Applies a same-document navigation.
    pub(crate) fn navigate_within_document(&mut self, id: &FrameId, url: &str) -> Option<FrameKey> {
        let key = *self.index.get(id)?;
        let node = self.nodes.get_mut(&key)?;
        node.url = url.to_string();
        Some(key)
    }

    /// Removes a frame and all its descendants.
    ///
    /// Returns snapshots of the removed frames, children before parents.
    pub(crate) fn remove(&mut self, id: &FrameId) -> Vec<FrameInfo> {
        let mut removed = Vec::new();
        if let Some(&key) = self.index.get(id) {
            self.remove_subtree(key, &mut removed);
        }
        removed
    }

    fn remove_subtree(&mut self, key: FrameKey, removed: &mut Vec<FrameInfo>) {
        let Some(children) = self.nodes.get(&key).map(|n| n.children.clone()) else {
            return;
        };
        for child in children {
            self.remove_subtree(child, removed);
        }

        let Some(mut info) = self.info(key) else {
            return;
        };
        let Some(node) = self.nodes.remove(&key) else {
            return;
        };

        if self.index.get(&node.id) == Some(&key) {
            self.index.remove(&node.id);
        }
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != key);
        }
        if self.main == Some(key) {
            self.main = None;
        }

        info.detached = true;
        info.children.clear();
        removed.push(info);
    }

    /// Records a lifecycle event.
    ///
    /// `init` with a new loader switches the frame to that loader. Other
    /// events tagged with a loader other than the current one are stale.
    pub(crate) fn record_lifecycle(
        &mut self,
        id: &FrameId,
        loader_id: Option<&LoaderId>,
        name: &str,
    ) -> LifecycleOutcome {
        let Some(&key) = self.index.get(id) else {
            return LifecycleOutcome::Unknown;
        };
        let Some(node) = self.nodes.get_mut(&key) else {
            return LifecycleOutcome::Unknown;
        };

        if let Some(loader_id) = loader_id.filter(|l| !l.is_empty())
            && *loader_id != node.loader_id
        {
            if name != "init" && !node.loader_id.is_empty() {
                return LifecycleOutcome::Stale(key);
            }
            node.loader_id = loader_id.clone();
            node.lifecycle.clear();
        }

        node.lifecycle.insert(name.to_string());
        LifecycleOutcome::Recorded(key)
    }

    /// Records an untagged lifecycle event by key.
    pub(crate) fn record_lifecycle_by_key(&mut self, key: FrameKey, name: &str) -> bool {
        match self.nodes.get_mut(&key) {
            Some(node) => {
                node.lifecycle.insert(name.to_string());
                true
            }
            None => false,
        }
    }

    /// Marks the frame's document as fully loaded.
    pub(crate) fn stopped_loading(&mut self, id: &FrameId) -> Option<FrameKey> {
        let key = *self.index.get(id)?;
        let node = self.nodes.get_mut(&key)?;
        node.lifecycle.insert("DOMContentLoaded".to_string());
        node.lifecycle.insert("load".to_string());
        Some(key)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns `true` if the frame and every attached descendant fired all
    /// of `names`.
    pub(crate) fn subtree_satisfies(&self, key: FrameKey, names: &[&str]) -> bool {
        let Some(node) = self.nodes.get(&key) else {
            return false;
        };

        names.iter().all(|name| node.lifecycle.contains(*name))
            && node
                .children
                .iter()
                .all(|child| self.subtree_satisfies(*child, names))
    }

    #[inline]
    pub(crate) fn get(&self, key: FrameKey) -> Option<&FrameNode> {
        self.nodes.get(&key)
    }

    #[inline]
    pub(crate) fn key_of(&self, id: &FrameId) -> Option<FrameKey> {
        self.index.get(id).copied()
    }

    #[inline]
    pub(crate) fn main(&self) -> Option<FrameKey> {
        self.main
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns every frame key, parents before children.
    pub(crate) fn keys(&self) -> Vec<FrameKey> {
        let mut keys = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<FrameKey> = self.main.into_iter().collect();

        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.get(&key) {
                keys.push(key);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        keys
    }

    /// Builds a snapshot of a live frame.
    pub(crate) fn info(&self, key: FrameKey) -> Option<FrameInfo> {
        let node = self.nodes.get(&key)?;

        let mut lifecycle_events: Vec<String> = node.lifecycle.iter().cloned().collect();
        lifecycle_events.sort();

        Some(FrameInfo {
            key,
            id: node.id.clone(),
            parent: node.parent,
            parent_id: node
                .parent
                .and_then(|p| self.nodes.get(&p))
                .map(|p| p.id.clone()),
            url: node.url.clone(),
            name: node.name.clone(),
            loader_id: node.loader_id.clone(),
            lifecycle_events,
            children: node.children.clone(),
            detached: false,
        })
    }

    fn insert_node(&mut self, id: FrameId, parent: Option<FrameKey>) -> FrameKey {
        self.next_key += 1;
        let key = FrameKey::new(self.next_key);

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.push(key);
        }
        self.index.insert(id.clone(), key);
        self.nodes.insert(key, FrameNode::new(id, parent));
        key
    }
}

// ============================================================================
// Tests
// ============================================================================
