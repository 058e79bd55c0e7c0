use std::fs;

use tempfile::TempDir;

use taxo::util::testing;
use taxo::TaxonomyTree;

#[ctor::ctor]
fn init() {
    testing::init_test_setup();
}

fn nested_tree() -> TaxonomyTree {
    let mut tree = TaxonomyTree::default();
    let root = tree.root();
    let amb = tree.add_child(root, 1, "Ambiguity", 7, "unclear user intent");
    tree.add_child(amb, 2, "Vague Query", 3, "missing constraints");
    tree.add_child(root, 1, "Length", 2, "answer too long");
    tree
}

#[test]
fn given_tree_when_round_tripping_file_then_structure_preserved() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("taxonomy.txt");
    let tree = nested_tree();

    fs::write(&path, tree.serialize()).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    let loaded = TaxonomyTree::deserialize(content.lines());

    assert_eq!(loaded.len(), 3);
    let amb = loaded.find_by_name_level("Ambiguity", 1);
    assert_eq!(amb.len(), 1);
    assert_eq!(loaded.get_node(amb[0]).unwrap().data.count, 7);

    let vague = loaded.find_by_name_level("Vague Query", 2);
    assert_eq!(vague.len(), 1);
    let parent = loaded.get_node(vague[0]).unwrap().parent.unwrap();
    assert_eq!(loaded.get_node(parent).unwrap().data.name, "Ambiguity");
}

#[test]
fn given_node_without_desc_when_serializing_then_dropped() {
    let mut tree = TaxonomyTree::default();
    let root = tree.root();
    tree.add_child(root, 1, "Described", 1, "has a description");
    tree.add_child(root, 1, "Undescribed", 5, "");

    let serialized = tree.serialize();
    let loaded = TaxonomyTree::deserialize(serialized.lines());

    assert_eq!(loaded.len(), 1);
    assert!(loaded.find_by_name_level("Undescribed", 1).is_empty());
}

#[test]
fn given_serialized_tree_when_inspecting_then_indentation_follows_level() {
    let tree = nested_tree();
    let serialized = tree.serialize();
    let lines: Vec<&str> = serialized.lines().collect();

    assert_eq!(lines[0], "[1] Ambiguity (Count: 7): unclear user intent");
    assert_eq!(
        lines[1],
        "    [2] Vague Query (Count: 3): missing constraints"
    );
    assert_eq!(lines[2], "[1] Length (Count: 2): answer too long");
}

#[test]
fn given_seed_file_when_loading_then_modes_have_default_counts() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seed.txt");
    fs::write(&path, "[1] Ambiguity\n[2] Vague Query\n[1] Length\n").unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let tree = TaxonomyTree::from_seed_lines(content.lines());

    assert_eq!(tree.len(), 3);
    let amb = tree.find_by_name_level("Ambiguity", 1)[0];
    assert_eq!(tree.get_node(amb).unwrap().data.count, 1);
    // seeded level-2 mode sits under the previous level-1 mode
    let vague = tree.find_by_name_level("Vague Query", 2)[0];
    let parent = tree.get_node(vague).unwrap().parent.unwrap();
    assert_eq!(tree.get_node(parent).unwrap().data.name, "Ambiguity");
}

#[test]
fn given_garbage_lines_when_deserializing_then_skipped_not_fatal() {
    let input = "[1] Valid (Count: 2): fine\nnot a taxonomy line\n[9] Orphan (Count: 1): no parent at level 8\n";
    let tree = TaxonomyTree::deserialize(input.lines());

    assert_eq!(tree.len(), 1);
    assert_eq!(tree.find_by_name_level("Valid", 1).len(), 1);
}
