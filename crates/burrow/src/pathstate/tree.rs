//! The path-state tree.
//!
//! While constructing an environment we keep track of what we have done
//! to which node of the filesystem: an ordered prefix tree keyed on
//! `/`-separated path components, one disposition per node. The tree is
//! stored as an arena of nodes addressed by integer handles; each node
//! knows its parent, so a node can reconstruct its canonical absolute
//! path. Dropping the tree drops the arena.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Disposition recorded for one path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathState {
    /// Nothing happened here.
    #[default]
    Unchanged,
    /// Deliberately excluded by an analysis pass.
    Ignored,
    /// A live mount from the mount table, or a fresh virtual filesystem.
    SystemMount {
        /// Filesystem type.
        fstype: String,
        /// Source device, when known.
        device: Option<String>,
    },
    /// Bind-mounted into the view.
    BindMounted,
    /// Overlay-mounted; the upper directory is retained when the captured
    /// delta matters later (digger subtrees).
    OverlayMounted {
        /// Upper directory, if one is kept.
        upperdir: Option<PathBuf>,
    },
    /// Reserved for overlays that only pretend to be writable.
    FakeOverlayMounted {
        /// Upper directory, if one is kept.
        upperdir: Option<PathBuf>,
    },
}

impl PathState {
    fn describe(&self) -> String {
        match self {
            PathState::Unchanged => "unchanged".to_string(),
            PathState::Ignored => "ignored".to_string(),
            PathState::SystemMount { fstype, device } => match device {
                Some(device) => format!("system mount ({fstype}, {device})"),
                None => format!("system mount ({fstype})"),
            },
            PathState::BindMounted => "bind mounted".to_string(),
            PathState::OverlayMounted { upperdir } => match upperdir {
                Some(upper) => format!("overlay mounted (upper={})", upper.display()),
                None => "overlay mounted".to_string(),
            },
            PathState::FakeOverlayMounted { upperdir } => match upperdir {
                Some(upper) => format!("fake overlay mounted (upper={})", upper.display()),
                None => "fake overlay mounted".to_string(),
            },
        }
    }
}

/// Markers attached to nodes by analysis passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMarks {
    /// Declare the node `Ignored` if all of its direct children end up
    /// ignored.
    pub ignore_if_empty: bool,
    /// Same, applied recursively to all descendants.
    pub ignore_empty_subdirs: bool,
}

type NodeId = usize;

#[derive(Debug)]
struct Node {
    /// Last path segment; `None` only for the root.
    name: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    state: PathState,
    marks: NodeMarks,
}

/// Ordered prefix tree recording a disposition per path.
#[derive(Debug)]
pub struct PathStateTree {
    nodes: Vec<Node>,
    root_directory: Option<PathBuf>,
}

const ROOT: NodeId = 0;

impl Default for PathStateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PathStateTree {
    /// An empty tree whose root is `/`, `Unchanged`.
    #[must_use]
    pub fn new() -> Self {
        PathStateTree {
            nodes: vec![Node {
                name: None,
                parent: None,
                children: Vec::new(),
                state: PathState::Unchanged,
                marks: NodeMarks::default(),
            }],
            root_directory: None,
        }
    }

    /// Record the physical filesystem root of the assembled tree,
    /// distinct from the logical `/`.
    pub fn set_root_directory(&mut self, root: impl Into<PathBuf>) {
        self.root_directory = Some(root.into());
    }

    /// The recorded physical root, if any.
    #[must_use]
    pub fn root_directory(&self) -> Option<&PathBuf> {
        self.root_directory.as_ref()
    }

    fn lookup(&mut self, path: &str, create: bool) -> Option<NodeId> {
        let mut current = ROOT;

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let found = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].name.as_deref() == Some(component));

            current = match found {
                Some(child) => child,
                None if create => {
                    let id = self.nodes.len();
                    self.nodes.push(Node {
                        name: Some(component.to_string()),
                        parent: Some(current),
                        children: Vec::new(),
                        state: PathState::Unchanged,
                        marks: NodeMarks::default(),
                    });
                    self.nodes[current].children.push(id);
                    id
                }
                None => return None,
            };
        }

        Some(current)
    }

    /// Canonical absolute path of a node.
    fn path_of(&self, id: NodeId) -> String {
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = &self.nodes[id];
            if let Some(name) = &node.name {
                components.push(name.as_str());
            }
            current = node.parent;
        }

        if components.is_empty() {
            return "/".to_string();
        }

        let mut path = String::new();
        for component in components.iter().rev() {
            path.push('/');
            path.push_str(component);
        }
        path
    }

    /// Set the disposition at a path, creating nodes as needed. Any prior
    /// payload at the node is replaced.
    pub fn set(&mut self, path: &str, state: PathState) {
        tracing::trace!(path, state = %state.describe(), "path state");
        let id = self.lookup(path, true).expect("create lookup is total");
        self.nodes[id].state = state;
    }

    /// Reset a path back to `Unchanged`, dropping its payload. A path
    /// that was never recorded is left alone.
    pub fn clear(&mut self, path: &str) {
        if let Some(id) = self.lookup(path, false) {
            self.nodes[id].state = PathState::Unchanged;
        }
    }

    /// Disposition recorded at a path, if the node exists.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&PathState> {
        let mut current = ROOT;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].name.as_deref() == Some(component))?;
        }
        Some(&self.nodes[current].state)
    }

    /// Attach analysis markers to a path, creating nodes as needed.
    pub fn mark(&mut self, path: &str, update: impl FnOnce(&mut NodeMarks)) {
        let id = self.lookup(path, true).expect("create lookup is total");
        update(&mut self.nodes[id].marks);
    }

    /// Markers recorded at a path.
    #[must_use]
    pub fn marks(&self, path: &str) -> NodeMarks {
        let mut current = ROOT;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].name.as_deref() == Some(component))
            {
                Some(child) => current = child,
                None => return NodeMarks::default(),
            }
        }
        self.nodes[current].marks
    }

    /// Walk the tree in pre-order, yielding `(path, state)` for every
    /// node whose disposition is not `Unchanged`. Unchanged nodes are
    /// still traversed so changed descendants are reached.
    #[must_use]
    pub fn walk(&self) -> TreeWalker<'_> {
        TreeWalker {
            tree: self,
            stack: vec![ROOT],
            pending_children: 0,
        }
    }

    /// Diagnostic dump: one node per line, indented by depth.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(ROOT, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let name = node.name.as_deref().unwrap_or("/");
        let _ = writeln!(
            out,
            "{:indent$}{name} ({})",
            "",
            node.state.describe(),
            indent = depth * 2
        );
        for &child in &node.children {
            self.dump_node(child, depth + 1, out);
        }
    }
}

/// Pre-order walker over the changed nodes of a [`PathStateTree`].
pub struct TreeWalker<'a> {
    tree: &'a PathStateTree,
    stack: Vec<NodeId>,
    /// Children of the most recently yielded node still sitting on top of
    /// the stack; what `skip_children` removes.
    pending_children: usize,
}

impl<'a> TreeWalker<'a> {
    /// Next changed node, as `(canonical_path, state)`.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(String, &'a PathState)> {
        loop {
            let id = self.stack.pop()?;
            if self.pending_children > 0 {
                self.pending_children -= 1;
            }

            let node = &self.tree.nodes[id];
            for &child in node.children.iter().rev() {
                self.stack.push(child);
            }

            if node.state != PathState::Unchanged {
                self.pending_children = node.children.len();
                return Some((self.tree.path_of(id), &node.state));
            }
        }
    }

    /// Do not descend below the node yielded last. Honoured at most once
    /// per step.
    pub fn skip_children(&mut self) {
        for _ in 0..self.pending_children {
            self.stack.pop();
        }
        self.pending_children = 0;
    }
}

impl<'a> Iterator for TreeWalker<'a> {
    type Item = (String, &'a PathState);

    fn next(&mut self) -> Option<Self::Item> {
        TreeWalker::next(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_get() {
        let mut tree = PathStateTree::new();
        assert_eq!(tree.get("/usr/bin"), None);

        tree.set("/usr/bin", PathState::BindMounted);
        assert_eq!(tree.get("/usr/bin"), Some(&PathState::BindMounted));
        // Intermediate nodes exist but are unchanged.
        assert_eq!(tree.get("/usr"), Some(&PathState::Unchanged));
        assert_eq!(tree.get("/"), Some(&PathState::Unchanged));
    }

    #[test]
    fn set_replaces_payload() {
        let mut tree = PathStateTree::new();
        tree.set(
            "/mnt",
            PathState::OverlayMounted {
                upperdir: Some(PathBuf::from("/tmp/upper")),
            },
        );
        tree.set("/mnt", PathState::BindMounted);
        assert_eq!(tree.get("/mnt"), Some(&PathState::BindMounted));

        tree.clear("/mnt");
        assert_eq!(tree.get("/mnt"), Some(&PathState::Unchanged));
    }

    #[test]
    fn walk_yields_only_changed_nodes() {
        let mut tree = PathStateTree::new();
        tree.set("/a/b/c", PathState::BindMounted);
        tree.set(
            "/proc",
            PathState::SystemMount {
                fstype: "proc".into(),
                device: None,
            },
        );

        let visited: Vec<String> = tree.walk().map(|(path, _)| path).collect();
        // /a and /a/b are unchanged: traversed but not yielded.
        assert_eq!(visited, vec!["/a/b/c".to_string(), "/proc".to_string()]);
    }

    #[test]
    fn walk_canonical_paths() {
        let mut tree = PathStateTree::new();
        tree.set("/usr/lib64/libfoo.so", PathState::BindMounted);
        let (path, state) = tree.walk().next().unwrap();
        assert_eq!(path, "/usr/lib64/libfoo.so");
        assert_eq!(state, &PathState::BindMounted);
    }

    #[test]
    fn walk_skip_children() {
        let mut tree = PathStateTree::new();
        tree.set("/proc", PathState::BindMounted);
        tree.set("/proc/sys", PathState::BindMounted);
        tree.set("/srv", PathState::BindMounted);

        let mut walker = tree.walk();
        let (first, _) = walker.next().unwrap();
        assert_eq!(first, "/proc");
        walker.skip_children();
        let (second, _) = walker.next().unwrap();
        assert_eq!(second, "/srv");
        assert!(walker.next().is_none());
    }

    #[test]
    fn walk_root_state() {
        let mut tree = PathStateTree::new();
        tree.set("/", PathState::BindMounted);
        let visited: Vec<String> = tree.walk().map(|(path, _)| path).collect();
        assert_eq!(visited, vec!["/".to_string()]);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut tree = PathStateTree::new();
        tree.set("/zeta", PathState::BindMounted);
        tree.set("/alpha", PathState::BindMounted);

        let visited: Vec<String> = tree.walk().map(|(path, _)| path).collect();
        assert_eq!(visited, vec!["/zeta".to_string(), "/alpha".to_string()]);
    }

    #[test]
    fn marks_roundtrip() {
        let mut tree = PathStateTree::new();
        tree.mark("/etc", |marks| marks.ignore_if_empty = true);
        assert!(tree.marks("/etc").ignore_if_empty);
        assert!(!tree.marks("/etc").ignore_empty_subdirs);
        assert_eq!(tree.marks("/var"), NodeMarks::default());
    }

    #[test]
    fn dump_is_indented() {
        let mut tree = PathStateTree::new();
        tree.set("/usr/bin", PathState::BindMounted);
        let dump = tree.dump();
        assert!(dump.contains("/ (unchanged)"));
        assert!(dump.contains("  usr (unchanged)"));
        assert!(dump.contains("    bin (bind mounted)"));
    }

    #[test]
    fn root_directory_record() {
        let mut tree = PathStateTree::new();
        assert!(tree.root_directory().is_none());
        tree.set_root_directory("/var/tmp/overlay/root");
        assert_eq!(
            tree.root_directory(),
            Some(&PathBuf::from("/var/tmp/overlay/root"))
        );
    }
}
