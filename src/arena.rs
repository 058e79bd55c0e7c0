use generational_arena::{Arena, Index};
use std::collections::HashMap;
use std::fmt;
use tracing::{instrument, warn};

use crate::grammar::{Grammar, ParseOutcome};

/// Data payload for taxonomy nodes representing one failure mode.
#[derive(Debug, Clone)]
pub struct ModeData {
    /// Mode label, not globally unique
    pub name: String,
    /// Depth in the taxonomy, 0 for the root
    pub level: u32,
    /// Number of records attributed to this mode
    pub count: u64,
    /// Free-text description, may be empty
    pub desc: String,
}

impl fmt::Display for ModeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.name)
    }
}

/// Tree node in the arena-based taxonomy structure.
#[derive(Debug)]
pub struct ModeNode {
    /// Mode data for this node
    pub data: ModeData,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena
    pub children: Vec<Index>,
}

/// Arena-based taxonomy of failure modes.
///
/// Uses generational arena for memory-safe node references and O(1) lookups.
/// The root node always exists at level 0; detaching a node removes its
/// whole subtree from the arena, so stale indices can never resurface.
#[derive(Debug)]
pub struct TaxonomyTree {
    arena: Arena<ModeNode>,
    root: Index,
}

impl Default for TaxonomyTree {
    fn default() -> Self {
        Self::new("Modes")
    }
}

impl TaxonomyTree {
    pub fn new(root_name: &str) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(ModeNode {
            data: ModeData {
                name: root_name.to_string(),
                level: 0,
                count: 1,
                desc: "Root mode".to_string(),
            },
            parent: None,
            children: Vec::new(),
        });
        Self { arena, root }
    }

    pub fn root(&self) -> Index {
        self.root
    }

    pub fn get_node(&self, idx: Index) -> Option<&ModeNode> {
        self.arena.get(idx)
    }

    pub fn get_node_mut(&mut self, idx: Index) -> Option<&mut ModeNode> {
        self.arena.get_mut(idx)
    }

    /// Number of nodes excluding the root.
    pub fn len(&self) -> usize {
        self.arena.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach a mode under `parent`, merging with an existing direct child
    /// of the same name (case-sensitive) by summing counts.
    ///
    /// Dedup here is sibling-scoped only; `find_by_name_level` is the
    /// global, case-insensitive counterpart.
    #[instrument(level = "trace", skip(self))]
    pub fn add_child(
        &mut self,
        parent: Index,
        level: u32,
        name: &str,
        count: u64,
        desc: &str,
    ) -> Index {
        if let Some(parent_node) = self.arena.get(parent) {
            let existing = parent_node
                .children
                .iter()
                .copied()
                .find(|&c| self.arena.get(c).map(|n| n.data.name == name).unwrap_or(false));
            if let Some(idx) = existing {
                if let Some(node) = self.arena.get_mut(idx) {
                    node.data.count += count;
                }
                return idx;
            }
        }

        let node_idx = self.arena.insert(ModeNode {
            data: ModeData {
                name: name.to_string(),
                level,
                count,
                desc: desc.to_string(),
            },
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(parent_node) = self.arena.get_mut(parent) {
            parent_node.children.push(node_idx);
        }
        node_idx
    }

    /// Whole-tree lookup: every node (root excluded) whose level matches and
    /// whose name matches case-insensitively, across all parents.
    #[instrument(level = "trace", skip(self))]
    pub fn find_by_name_level(&self, name: &str, level: u32) -> Vec<Index> {
        let needle = name.to_lowercase();
        self.iter()
            .filter(|&(idx, node)| {
                idx != self.root
                    && node.data.level == level
                    && node.data.name.to_lowercase() == needle
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Detach `idx` from its parent and drop the whole subtree from the arena.
    #[instrument(level = "trace", skip(self))]
    pub fn remove_node(&mut self, idx: Index) {
        if idx == self.root {
            return;
        }
        let parent = match self.arena.get(idx) {
            Some(node) => node.parent,
            None => return,
        };
        if let Some(parent_idx) = parent {
            if let Some(parent_node) = self.arena.get_mut(parent_idx) {
                parent_node.children.retain(|&c| c != idx);
            }
        }
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.arena.remove(current) {
                stack.extend(node.children);
            }
        }
    }

    /// Format one node as `[level] name (Count: n): desc`, with the count
    /// and description parts toggled by the flags.
    pub fn node_to_str(node: &ModeNode, with_count: bool, with_desc: bool) -> String {
        let data = &node.data;
        match (with_count, with_desc) {
            (false, false) => format!("[{}] {}", data.level, data.name),
            (false, true) => format!("[{}] {}: {}", data.level, data.name, data.desc),
            (true, false) => format!("[{}] {} (Count: {})", data.level, data.name, data.count),
            (true, true) => format!(
                "[{}] {} (Count: {}): {}",
                data.level, data.name, data.count, data.desc
            ),
        }
    }

    /// Preorder descendant strings (root excluded).
    pub fn to_mode_list(&self, with_count: bool, with_desc: bool) -> Vec<String> {
        self.iter()
            .filter(|&(idx, _)| idx != self.root)
            .map(|(_, node)| Self::node_to_str(node, with_count, with_desc))
            .collect()
    }

    /// Persisted form: one line per node with a non-empty description,
    /// indented by `(level-1) * 4` spaces. Nodes without a description are
    /// silently omitted, so round-tripping is lossy exactly for those.
    #[instrument(level = "debug", skip(self))]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (idx, node) in self.iter() {
            if idx == self.root || node.data.desc.is_empty() {
                continue;
            }
            let indent = "    ".repeat(node.data.level.saturating_sub(1) as usize);
            out.push_str(&indent);
            out.push_str(&Self::node_to_str(node, true, true));
            out.push('\n');
        }
        out
    }

    /// Rebuild a tree from persisted lines.
    ///
    /// Keeps one last-node-seen pointer per level: a parsed node at level L
    /// attaches under the most recently constructed node at level L-1. The
    /// input is assumed to be a valid preorder flattening (true for files
    /// this engine wrote); re-ordered input silently yields a different
    /// shape. Unparsable lines are logged and skipped.
    #[instrument(level = "debug", skip(lines))]
    pub fn deserialize<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let grammar = Grammar::new();
        let mut tree = Self::default();
        let mut level_nodes: HashMap<u32, Index> = HashMap::new();
        level_nodes.insert(0, tree.root);

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match grammar.parse_tree_line(line) {
                ParseOutcome::Parsed(entry) => {
                    let parent = match entry.level.checked_sub(1).and_then(|l| level_nodes.get(&l))
                    {
                        Some(&p) => p,
                        None => {
                            warn!("no parent at level {} for: {}", entry.level, line);
                            continue;
                        }
                    };
                    let idx =
                        tree.add_child(parent, entry.level, &entry.name, entry.count, &entry.desc);
                    level_nodes.insert(entry.level, idx);
                }
                ParseOutcome::Skip(reason) => {
                    warn!("skipping taxonomy line ({reason}): {line}");
                }
            }
        }
        tree
    }

    /// Build a tree from seed lines of the form `[level] name` (no counts
    /// or descriptions).
    pub fn from_seed_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let grammar = Grammar::new();
        let mut tree = Self::default();
        let mut level_nodes: HashMap<u32, Index> = HashMap::new();
        level_nodes.insert(0, tree.root);

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match grammar.parse_seed_line(line) {
                ParseOutcome::Parsed((level, name)) => {
                    let parent = match level.checked_sub(1).and_then(|l| level_nodes.get(&l)) {
                        Some(&p) => p,
                        None => {
                            warn!("no parent at level {} for seed: {}", level, line);
                            continue;
                        }
                    };
                    let idx = tree.add_child(parent, level, &name, 1, "");
                    level_nodes.insert(level, idx);
                }
                ParseOutcome::Skip(reason) => {
                    warn!("skipping seed line ({reason}): {line}");
                }
            }
        }
        tree
    }

    /// Collects all leaf nodes with their root-exclusive path string,
    /// `[level] name` components joined by an arrow.
    #[instrument(level = "debug", skip(self))]
    pub fn leaf_paths(&self) -> Vec<(Index, String)> {
        let mut leaves = Vec::new();
        for (idx, node) in self.iter() {
            if idx == self.root || !node.children.is_empty() {
                continue;
            }
            let mut parts = Vec::new();
            let mut current = Some(idx);
            while let Some(c) = current {
                let n = match self.arena.get(c) {
                    Some(n) => n,
                    None => break,
                };
                if n.parent.is_none() {
                    break;
                }
                parts.push(Self::node_to_str(n, false, false));
                current = n.parent;
            }
            parts.reverse();
            leaves.push((idx, parts.join(" → ")));
        }
        leaves
    }

    /// Leaf nodes only (no children), preorder.
    pub fn leaf_nodes(&self) -> Vec<Index> {
        self.iter()
            .filter(|&(idx, node)| idx != self.root && node.children.is_empty())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn iter(&self) -> TreeIterator {
        TreeIterator::new(self)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        self.calculate_depth(self.root)
    }

    fn calculate_depth(&self, node_idx: Index) -> usize {
        if let Some(node) = self.get_node(node_idx) {
            1 + node
                .children
                .iter()
                .map(|&child| self.calculate_depth(child))
                .max()
                .unwrap_or(0)
        } else {
            0
        }
    }
}

pub struct TreeIterator<'a> {
    tree: &'a TaxonomyTree,
    stack: Vec<Index>,
}

impl<'a> TreeIterator<'a> {
    fn new(tree: &'a TaxonomyTree) -> Self {
        Self {
            tree,
            stack: vec![tree.root],
        }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (Index, &'a ModeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current_idx) = self.stack.pop() {
            if let Some(node) = self.tree.get_node(current_idx) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((current_idx, node));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_same_name_sibling_when_adding_then_counts_merge() {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        let a = tree.add_child(root, 1, "Ambiguity", 1, "unclear intent");
        let b = tree.add_child(root, 1, "Ambiguity", 2, "other desc");

        assert_eq!(a, b);
        assert_eq!(tree.get_node(a).unwrap().data.count, 3);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn given_different_case_siblings_when_adding_then_both_kept() {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        tree.add_child(root, 1, "Foo", 1, "a");
        tree.add_child(root, 1, "foo", 1, "b");

        // add_child dedup is case-sensitive; both coexist
        assert_eq!(tree.len(), 2);
        // but the global lookup matches both, case-insensitively
        assert_eq!(tree.find_by_name_level("FOO", 1).len(), 2);
    }

    #[test]
    fn given_subtree_when_removing_then_descendants_dropped() {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        let parent = tree.add_child(root, 1, "Parent", 1, "p");
        tree.add_child(parent, 2, "Child", 1, "c");
        assert_eq!(tree.len(), 2);

        tree.remove_node(parent);
        assert_eq!(tree.len(), 0);
        assert!(tree.find_by_name_level("Child", 2).is_empty());
    }

    #[test]
    fn given_root_when_removing_then_noop() {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        tree.remove_node(root);
        assert!(tree.get_node(root).is_some());
    }

    #[test]
    fn given_nested_tree_when_leaf_paths_then_arrow_joined() {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        let l1 = tree.add_child(root, 1, "Ambiguity", 1, "top");
        tree.add_child(l1, 2, "Vague Query", 1, "sub");

        let paths = tree.leaf_paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].1, "[1] Ambiguity → [2] Vague Query");
    }
}
