//! Arena backed directory tree.

use std::collections::{btree_map, BTreeMap};

use crate::entry::EntryData;

/// Index of a node in a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
pub enum NodeKind {
    /// Children by name, in ordinal order
    Directory(BTreeMap<String, NodeId>),
    File(EntryData),
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }
}

/// Split a path on either kind of slash, dropping empty components.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|part| !part.is_empty())
}

/// Directory tree whose nodes refer to each other by index.
///
/// Removed nodes leave an empty slot behind, so a [`NodeId`] never gets reused.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
}

impl Tree {
    pub const ROOT: NodeId = NodeId(0);

    /// A tree holding only the unnamed root directory
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Directory(BTreeMap::new()),
            })],
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)?.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)?.as_mut()
    }

    pub fn children(&self, id: NodeId) -> Option<&BTreeMap<String, NodeId>> {
        match &self.get(id)?.kind {
            NodeKind::Directory(children) => Some(children),
            NodeKind::File(_) => None,
        }
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)?.get(name).copied()
    }

    /// Number of file nodes
    pub fn file_count(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .filter(|node| !node.is_directory())
            .count()
    }

    /// Find the node at `path`. The root itself is not addressable.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let mut parts = components(path).peekable();
        parts.peek()?;
        parts.try_fold(Self::ROOT, |current, part| self.child(current, part))
    }

    /// Insert a node under `parent`, replacing any sibling of the same name.
    ///
    /// Returns `None` when `parent` is not a directory.
    pub fn insert(&mut self, parent: NodeId, name: String, kind: NodeKind) -> Option<NodeId> {
        let id = NodeId(self.nodes.len());
        let NodeKind::Directory(children) = &mut self.get_mut(parent)?.kind else {
            return None;
        };
        let replaced = children.insert(name.clone(), id);

        self.nodes.push(Some(Node {
            name,
            parent: Some(parent),
            kind,
        }));
        if let Some(replaced) = replaced {
            self.clear(replaced);
        }
        Some(id)
    }

    /// Detach a node from its parent and drop it along with everything below it.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.get(id)?;
        let (parent, name) = (node.parent?, node.name.clone());
        if let Some(NodeKind::Directory(children)) = self.get_mut(parent).map(|node| &mut node.kind) {
            children.remove(&name);
        }
        self.clear(id)
    }

    /// Empty the slots of a node and its descendants without touching its parent.
    fn clear(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.get_mut(id.0)?.take()?;
        let mut pending: Vec<NodeId> = match &node.kind {
            NodeKind::Directory(children) => children.values().copied().collect(),
            NodeKind::File(_) => Vec::new(),
        };
        while let Some(next) = pending.pop() {
            if let Some(Node {
                kind: NodeKind::Directory(children),
                ..
            }) = self.nodes.get_mut(next.0).and_then(Option::take)
            {
                pending.extend(children.into_values());
            }
        }
        Some(node)
    }

    /// Path of a node from the root, joined with `/`
    pub fn path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = self.get(id);
        while let Some(node) = current {
            if node.parent.is_none() {
                break;
            }
            names.push(node.name.as_str());
            current = node.parent.and_then(|parent| self.get(parent));
        }
        names.reverse();
        names.join("/")
    }

    /// Walk the nodes below `directory` depth first, parents before their children.
    pub fn walk(&self, directory: NodeId, recursive: bool) -> Walk<'_> {
        Walk {
            tree: self,
            recursive,
            stack: self.children(directory).map(BTreeMap::values).into_iter().collect(),
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator returned by [`Tree::walk`]
pub struct Walk<'a> {
    tree: &'a Tree,
    recursive: bool,
    stack: Vec<btree_map::Values<'a, String, NodeId>>,
}

impl Iterator for Walk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let level = self.stack.last_mut()?;
            let Some(&id) = level.next() else {
                self.stack.pop();
                continue;
            };

            if self.recursive {
                if let Some(children) = self.tree.children(id) {
                    self.stack.push(children.values());
                }
            }
            return Some(id);
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{components, NodeKind, Tree};
    use crate::entry::EntryData;

    fn file() -> NodeKind {
        NodeKind::File(EntryData::Buffered(vec![1].into()))
    }

    fn directory() -> NodeKind {
        NodeKind::Directory(Default::default())
    }

    #[test]
    fn split_paths() {
        assert_eq!(components("/a\\b//c/").collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(components("").count(), 0);
    }

    #[test]
    fn lookup_and_paths() {
        let mut tree = Tree::new();
        let data = tree.insert(Tree::ROOT, "data".into(), directory()).unwrap();
        let model = tree.insert(data, "model".into(), directory()).unwrap();
        let file = tree.insert(model, "pc.mb".into(), file()).unwrap();

        assert_eq!(tree.lookup("data/model/pc.mb"), Some(file));
        assert_eq!(tree.lookup("\\data\\model"), Some(model));
        assert_eq!(tree.lookup(""), None);
        assert_eq!(tree.lookup("data/pc.mb"), None);
        assert_eq!(tree.lookup("data/model/pc.mb/deeper"), None);
        assert_eq!(tree.path(file), "data/model/pc.mb");
        assert_eq!(tree.get(file).unwrap().parent, Some(model));

        assert!(tree.insert(file, "child".into(), directory()).is_none());
    }

    #[test]
    fn walk_orders_children_ordinally() {
        let mut tree = Tree::new();
        let b = tree.insert(Tree::ROOT, "b".into(), directory()).unwrap();
        tree.insert(b, "z".into(), file());
        tree.insert(b, "Y".into(), file());
        tree.insert(Tree::ROOT, "a".into(), file());
        tree.insert(Tree::ROOT, "ab".into(), file());

        let top: Vec<_> = tree.walk(Tree::ROOT, false).map(|id| tree.path(id)).collect();
        assert_eq!(top, vec!["a", "ab", "b"]);

        let all: Vec<_> = tree.walk(Tree::ROOT, true).map(|id| tree.path(id)).collect();
        assert_eq!(all, vec!["a", "ab", "b", "b/Y", "b/z"]);

        let inner: Vec<_> = tree.walk(b, true).map(|id| tree.path(id)).collect();
        assert_eq!(inner, vec!["b/Y", "b/z"]);
    }

    #[test]
    fn remove_drops_subtree() {
        let mut tree = Tree::new();
        let dir = tree.insert(Tree::ROOT, "dir".into(), directory()).unwrap();
        let inner = tree.insert(dir, "inner.bin".into(), file()).unwrap();
        tree.insert(Tree::ROOT, "keep.bin".into(), file());
        assert_eq!(tree.file_count(), 2);

        assert!(tree.remove(dir).is_some());
        assert!(tree.get(inner).is_none());
        assert_eq!(tree.lookup("dir"), None);
        assert_eq!(tree.file_count(), 1);
        assert!(tree.remove(Tree::ROOT).is_none());
    }

    #[test]
    fn insert_replaces_sibling() {
        let mut tree = Tree::new();
        let dir = tree.insert(Tree::ROOT, "x".into(), directory()).unwrap();
        let below = tree.insert(dir, "y".into(), file()).unwrap();

        let replacement = tree.insert(Tree::ROOT, "x".into(), file()).unwrap();
        assert_eq!(tree.lookup("x"), Some(replacement));
        assert!(tree.get(below).is_none());
        assert_eq!(tree.file_count(), 1);
    }
}
