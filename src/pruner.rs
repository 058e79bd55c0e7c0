//! Frequency-based removal of rare top-level modes.

use tracing::{info, instrument};

use crate::arena::TaxonomyTree;

/// Remove level-1 modes whose count falls strictly below
/// `total * remove_threshold`, where total is the summed count of all
/// level-1 modes before removal. A mode sitting exactly on the threshold
/// survives. Removal takes the whole subtree with it.
#[instrument(skip(tree), fields(modes = tree.len()))]
pub fn remove_rare_modes(tree: &mut TaxonomyTree, remove_threshold: f64) -> Vec<(String, u64)> {
    let level_one: Vec<_> = tree
        .get_node(tree.root())
        .map(|root| root.children.clone())
        .unwrap_or_default();

    let total: u64 = level_one
        .iter()
        .filter_map(|&idx| tree.get_node(idx).map(|n| n.data.count))
        .sum();
    let cutoff = total as f64 * remove_threshold;

    let mut removed = Vec::new();
    for idx in level_one {
        let (name, count) = match tree.get_node(idx) {
            Some(node) => (node.data.name.clone(), node.data.count),
            None => continue,
        };
        if (count as f64) < cutoff {
            tree.remove_node(idx);
            removed.push((name, count));
        }
    }
    info!(removed = removed.len(), modes = tree.len(), "pruning complete");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(counts: &[(&str, u64)]) -> TaxonomyTree {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        for (name, count) in counts {
            tree.add_child(root, 1, name, *count, "d");
        }
        tree
    }

    #[test]
    fn given_rare_mode_when_pruning_then_removed() {
        // total 100, threshold 0.05 -> cutoff 5
        let mut tree = tree_with(&[("Common", 96), ("Rare", 4)]);
        let removed = remove_rare_modes(&mut tree, 0.05);
        assert_eq!(removed, vec![("Rare".to_string(), 4)]);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn given_mode_exactly_at_cutoff_when_pruning_then_survives() {
        // total 100, threshold 0.05 -> cutoff 5, count 5 is not strictly below
        let mut tree = tree_with(&[("Common", 95), ("Borderline", 5)]);
        let removed = remove_rare_modes(&mut tree, 0.05);
        assert!(removed.is_empty());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn given_rare_parent_when_pruning_then_subtree_removed() {
        let mut tree = tree_with(&[("Common", 99), ("Rare", 1)]);
        let rare = tree.find_by_name_level("Rare", 1)[0];
        tree.add_child(rare, 2, "Child", 1, "d");

        remove_rare_modes(&mut tree, 0.05);
        assert!(tree.find_by_name_level("Child", 2).is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn given_empty_tree_when_pruning_then_noop() {
        let mut tree = TaxonomyTree::default();
        assert!(remove_rare_modes(&mut tree, 0.05).is_empty());
    }
}
