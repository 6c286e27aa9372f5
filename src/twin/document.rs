//! Twin property document.
//!
//! Key invariants:
//! - A name is never both a live child and a tombstone of the same tree.
//! - Every data-bearing mutation reaches the root exactly once, synchronously,
//!   before the mutating call returns.
//! - Tombstones are only cleared by the document root (after a sync round trip).
//!
//! Trees are stored in an arena keyed by [`NodeId`]; each tree keeps a
//! non-owning back-reference to its parent, which is how change notifications
//! walk upwards.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::debug;
use uuid::Uuid;

use crate::error::{InputError, LinkError, LinkResult};
use crate::value::{PropertyValue, ValueKind};

/// Identifier of a tree node inside a [`TwinDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives the coalesced "something under the root changed" signal.
///
/// `child` names the root-level entry the change happened under. Listeners
/// must re-read the document to learn what changed.
pub trait ChangeListener: Send + Sync {
    fn twin_changed(&self, child: &str);
}

/// What an `add` created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    Leaf(ValueKind),
    Tree(NodeId),
}

#[derive(Debug, Clone)]
enum Child {
    Leaf(PropertyValue),
    Tree(NodeId),
}

#[derive(Debug)]
struct PropertyTree {
    name: String,
    parent: Option<NodeId>,
    children: HashMap<String, Child>,
    tombstones: BTreeSet<String>,
}

impl PropertyTree {
    fn new(name: impl Into<String>, parent: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            parent,
            children: HashMap::new(),
            tombstones: BTreeSet::new(),
        }
    }
}

/// A device twin's property document: a root tree plus nested map trees.
///
/// Mutations take `&mut self` and materialization takes `&self`, so a shared
/// document behind a lock can never be observed mid-mutation.
pub struct TwinDocument {
    root: NodeId,
    nodes: HashMap<NodeId, PropertyTree>,
    listener: Option<Arc<dyn ChangeListener>>,
    generation: u64,
}

impl fmt::Debug for TwinDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwinDocument")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Default for TwinDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl TwinDocument {
    /// Creates an empty document with no listener.
    #[must_use]
    pub fn new() -> Self {
        let root = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(root, PropertyTree::new("", None));
        Self {
            root,
            nodes,
            listener: None,
            generation: 0,
        }
    }

    /// Creates an empty document whose root reports changes to `listener`.
    #[must_use]
    pub fn with_listener(listener: Arc<dyn ChangeListener>) -> Self {
        let mut doc = Self::new();
        doc.listener = Some(listener);
        doc
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of change notifications that have reached the root.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Adds a child whose kind is given by name, as the `Add` action does.
    ///
    /// An unrecognised kind is ignored: nothing is created and no change is
    /// reported (`Ok(None)`).
    ///
    /// # Errors
    ///
    /// Returns an error if `node` is unknown or `raw` does not fit the kind.
    pub fn add(&mut self, node: NodeId, name: &str, kind: &str, raw: Option<&Json>) -> LinkResult<Option<Added>> {
        let Some(kind) = ValueKind::parse(kind) else {
            debug!(node = %self.path(node), name, kind, "ignoring add with unknown value type");
            return Ok(None);
        };
        self.add_kind(node, name, kind, raw).map(Some)
    }

    /// Like [`add`](Self::add), but an unrecognised kind is an error.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MalformedInput` for an unknown kind, plus the
    /// errors of [`add_kind`](Self::add_kind).
    pub fn try_add(&mut self, node: NodeId, name: &str, kind: &str, raw: Option<&Json>) -> LinkResult<Added> {
        let parsed = ValueKind::parse(kind)
            .ok_or_else(|| LinkError::malformed("Value Type", format!("unknown value type '{kind}'")))?;
        self.add_kind(node, name, parsed, raw)
    }

    /// Adds (or replaces) the child `name` under `node`.
    ///
    /// The name leaves the tombstone set. A replaced map child is dropped
    /// together with its subtree. `raw` seeds the value; a `Map` seeded with a
    /// JSON object gets one child per entry, with kinds inferred.
    ///
    /// # Errors
    ///
    /// - `InputError::UnknownNode` if `node` is not in this document
    /// - `InputError::MalformedInput` if `raw` cannot represent `kind`
    pub fn add_kind(&mut self, node: NodeId, name: &str, kind: ValueKind, raw: Option<&Json>) -> LinkResult<Added> {
        if name.is_empty() {
            return Err(InputError::MissingParameter {
                name: "Name".to_string(),
            }
            .into());
        }
        self.tree(node)?;

        // Build the new child before touching the tree so a bad value leaves it intact.
        let (child, added) = match kind {
            ValueKind::Map => {
                let seed = match raw {
                    None | Some(Json::Null) => None,
                    Some(Json::Object(map)) => Some(map),
                    Some(other) => {
                        return Err(LinkError::malformed("Map", format!("cannot hold {other}")));
                    }
                };
                let id = self.build_subtree(node, name, seed)?;
                (Child::Tree(id), Added::Tree(id))
            }
            leaf_kind => {
                let value = match raw {
                    None | Some(Json::Null) => PropertyValue::default_for(leaf_kind)
                        .ok_or_else(|| LinkError::internal("leaf kind without default"))?,
                    Some(raw) => PropertyValue::from_json(leaf_kind, raw)?,
                };
                (Child::Leaf(value), Added::Leaf(leaf_kind))
            }
        };

        let tree = self.tree_mut(node)?;
        tree.tombstones.remove(name);
        let replaced = tree.children.insert(name.to_string(), child);
        if let Some(Child::Tree(old)) = replaced {
            self.drop_subtree(old);
        }

        debug!(node = %self.path(node), name, kind = %kind, "twin property added");
        self.notify_changed(node, name);
        Ok(added)
    }

    /// Replaces the value of an existing leaf. The kind may change.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` if `name` is not a leaf of `node`.
    pub fn set_value(&mut self, node: NodeId, name: &str, value: PropertyValue) -> LinkResult<()> {
        let path = self.child_path(node, name);
        let tree = self.tree_mut(node)?;
        match tree.children.get_mut(name) {
            Some(Child::Leaf(slot)) => *slot = value,
            _ => return Err(InputError::UnknownNode { path }.into()),
        }
        self.notify_changed(node, name);
        Ok(())
    }

    /// Detaches the child `name` (a leaf or a whole subtree) and tombstones it.
    ///
    /// Returns `false`, without reporting a change, if there was no such child.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` if `node` is not in this document.
    pub fn remove(&mut self, node: NodeId, name: &str) -> LinkResult<bool> {
        let tree = self.tree_mut(node)?;
        let Some(child) = tree.children.remove(name) else {
            return Ok(false);
        };
        if let Child::Tree(id) = child {
            self.drop_subtree(id);
        }
        self.delete(node, name);
        Ok(true)
    }

    /// Removes the tree `node` from its parent.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MalformedInput` for the root, which cannot detach.
    pub fn detach(&mut self, node: NodeId) -> LinkResult<()> {
        let tree = self.tree(node)?;
        let Some(parent) = tree.parent else {
            return Err(LinkError::malformed("node", "the document root cannot be removed"));
        };
        let name = tree.name.clone();
        self.remove(parent, &name).map(|_| ())
    }

    /// Finds the map child `name` of `node`.
    #[must_use]
    pub fn child_tree(&self, node: NodeId, name: &str) -> Option<NodeId> {
        match self.nodes.get(&node)?.children.get(name)? {
            Child::Tree(id) => Some(*id),
            Child::Leaf(_) => None,
        }
    }

    /// Walks map children from the root.
    #[must_use]
    pub fn resolve(&self, path: &[&str]) -> Option<NodeId> {
        path.iter().try_fold(self.root, |node, name| self.child_tree(node, name))
    }

    /// Reads the leaf `name` of `node`.
    #[must_use]
    pub fn value(&self, node: NodeId, name: &str) -> Option<&PropertyValue> {
        match self.nodes.get(&node)?.children.get(name)? {
            Child::Leaf(v) => Some(v),
            Child::Tree(_) => None,
        }
    }

    /// Live child names of `node`, sorted.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .get(&node)
            .map(|t| t.children.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Tombstoned names of `node`, sorted.
    #[must_use]
    pub fn tombstones(&self, node: NodeId) -> Vec<String> {
        self.nodes
            .get(&node)
            .map(|t| t.tombstones.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if any tree in the document holds a tombstone.
    #[must_use]
    pub fn has_tombstones(&self) -> bool {
        self.nodes.values().any(|t| !t.tombstones.is_empty())
    }

    /// Forgets every tombstone in the document.
    ///
    /// Called by the synchronization consumer once the deletions have been
    /// applied to the backend twin. Does not report a change.
    pub fn clear_tombstones(&mut self) {
        for tree in self.nodes.values_mut() {
            tree.tombstones.clear();
        }
    }

    /// Snapshots the subtree at `node` as a JSON object.
    ///
    /// Tombstoned names map to `null`; live children map to their value.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` if `node` is not in this document.
    pub fn materialize(&self, node: NodeId) -> LinkResult<Json> {
        let tree = self.tree(node)?;
        let mut out = Map::new();
        for name in &tree.tombstones {
            out.insert(name.clone(), Json::Null);
        }
        for (name, child) in &tree.children {
            let value = match child {
                Child::Leaf(v) => v.to_json(),
                Child::Tree(id) => self.materialize(*id)?,
            };
            out.insert(name.clone(), value);
        }
        Ok(Json::Object(out))
    }

    /// Snapshots the whole document.
    #[must_use]
    pub fn materialize_root(&self) -> Json {
        self.materialize(self.root).unwrap_or_else(|_| Json::Object(Map::new()))
    }

    /// Slash-separated path of `node`, `/` for the root.
    #[must_use]
    pub fn path(&self, node: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cursor = self.nodes.get(&node);
        while let Some(tree) = cursor {
            let Some(parent) = tree.parent else { break };
            parts.push(tree.name.as_str());
            cursor = self.nodes.get(&parent);
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    fn child_path(&self, node: NodeId, name: &str) -> String {
        let base = self.path(node);
        if base.ends_with('/') {
            format!("{base}{name}")
        } else {
            format!("{base}/{name}")
        }
    }

    fn tree(&self, node: NodeId) -> LinkResult<&PropertyTree> {
        self.nodes.get(&node).ok_or_else(|| {
            InputError::UnknownNode {
                path: node.to_string(),
            }
            .into()
        })
    }

    fn tree_mut(&mut self, node: NodeId) -> LinkResult<&mut PropertyTree> {
        self.nodes.get_mut(&node).ok_or_else(|| {
            InputError::UnknownNode {
                path: node.to_string(),
            }
            .into()
        })
    }

    // Moves a detached name into the tombstone set and reports it.
    fn delete(&mut self, node: NodeId, name: &str) {
        if let Some(tree) = self.nodes.get_mut(&node) {
            tree.tombstones.insert(name.to_string());
        }
        debug!(node = %self.path(node), name, "twin property deleted");
        self.notify_changed(node, name);
    }

    // Coalesces a change at `node` into one signal at the root.
    fn notify_changed(&mut self, node: NodeId, origin: &str) {
        let mut current = node;
        let mut child = origin.to_string();
        while let Some(tree) = self.nodes.get(&current) {
            let Some(parent) = tree.parent else { break };
            child.clone_from(&tree.name);
            current = parent;
        }

        self.generation += 1;
        if let Some(listener) = &self.listener {
            listener.twin_changed(&child);
        }
    }

    fn build_subtree(&mut self, parent: NodeId, name: &str, seed: Option<&Map<String, Json>>) -> LinkResult<NodeId> {
        let id = NodeId::new();
        let mut tree = PropertyTree::new(name, Some(parent));

        // Nested trees are registered as they are built; unwind on a bad seed.
        let mut built = Vec::new();
        if let Err(e) = self.seed_subtree(id, &mut tree, seed, &mut built) {
            for nested in built {
                self.drop_subtree(nested);
            }
            return Err(e);
        }

        self.nodes.insert(id, tree);
        Ok(id)
    }

    fn seed_subtree(
        &mut self,
        id: NodeId,
        tree: &mut PropertyTree,
        seed: Option<&Map<String, Json>>,
        built: &mut Vec<NodeId>,
    ) -> LinkResult<()> {
        for (key, raw) in seed.into_iter().flatten() {
            let Some(kind) = ValueKind::of_json(raw) else {
                continue;
            };
            let child = if kind == ValueKind::Map {
                let nested = self.build_subtree(id, key, raw.as_object())?;
                built.push(nested);
                Child::Tree(nested)
            } else {
                Child::Leaf(PropertyValue::from_json(kind, raw)?)
            };
            tree.children.insert(key.clone(), child);
        }
        Ok(())
    }

    fn drop_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(tree) = self.nodes.remove(&id) {
                stack.extend(tree.children.values().filter_map(|c| match c {
                    Child::Tree(child) => Some(*child),
                    Child::Leaf(_) => None,
                }));
            }
        }
    }
}
