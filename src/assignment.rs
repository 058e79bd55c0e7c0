//! Parallel assignment of taxonomy leaves to records.
//!
//! Records never mutate the tree here; each one is classified independently
//! against a frozen catalog of leaf modes, so the batch fans out over a
//! bounded worker pool.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, instrument, warn};

use crate::api::Completion;
use crate::arena::TaxonomyTree;
use crate::errors::{TaxonomyError, TaxonomyResult};
use crate::records::{format_record, Record};

const ASSIGNMENT_TEMPERATURE: f64 = 0.1;
const RECORD_PLACEHOLDER: &str = "{Record}";
const MODES_PLACEHOLDER: &str = "{Modes}";

/// Sentinel stored when a record could not be classified.
pub const ASSIGNMENT_FAILED: &str = "Error";

pub struct AssignmentEngine<'a> {
    llm: &'a dyn Completion,
    template: String,
    max_workers: usize,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(llm: &'a dyn Completion, template: String, max_workers: usize) -> Self {
        Self {
            llm,
            template,
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_template_file(
        llm: &'a dyn Completion,
        path: &Path,
        max_workers: usize,
    ) -> TaxonomyResult<Self> {
        let template = fs::read_to_string(path)?;
        for placeholder in [RECORD_PLACEHOLDER, MODES_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(TaxonomyError::BadTemplate {
                    path: path.to_path_buf(),
                    placeholder: placeholder.to_string(),
                });
            }
        }
        Ok(Self::new(llm, template, max_workers))
    }

    /// Leaf catalog shown to the model: `name (Level L): desc` per line,
    /// description omitted when empty.
    pub fn leaf_catalog(tree: &TaxonomyTree) -> String {
        tree.leaf_nodes()
            .into_iter()
            .filter_map(|idx| tree.get_node(idx))
            .map(|node| {
                if node.data.desc.is_empty() {
                    format!("{} (Level {})", node.data.name, node.data.level)
                } else {
                    format!(
                        "{} (Level {}): {}",
                        node.data.name, node.data.level, node.data.desc
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Classify every record against the tree's leaves, writing the raw
    /// response into each record's `assigned_modes`. Input order is
    /// preserved regardless of worker scheduling.
    #[instrument(skip_all, fields(records = records.len(), workers = self.max_workers))]
    pub fn assign(&self, records: &mut [Record], tree: &TaxonomyTree) -> TaxonomyResult<usize> {
        let catalog = Self::leaf_catalog(tree);
        let base = self.template.replace(MODES_PLACEHOLDER, &catalog);

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| TaxonomyError::InternalError(format!("thread pool: {e}")))?;

        let mut responses: Vec<(usize, String)> = pool.install(|| {
            records
                .par_iter()
                .enumerate()
                .map(|(idx, record)| {
                    let prompt = base.replace(RECORD_PLACEHOLDER, &format_record(record));
                    let response = self.llm.complete(&prompt, ASSIGNMENT_TEMPERATURE);
                    (idx, response)
                })
                .collect()
        });
        responses.sort_by_key(|(idx, _)| *idx);

        let mut failures = 0;
        for ((idx, response), record) in responses.into_iter().zip(records.iter_mut()) {
            if response.is_empty() {
                warn!(record = idx, "no assignment response");
                record.assigned_modes = Some(ASSIGNMENT_FAILED.to_string());
                failures += 1;
            } else {
                record.assigned_modes = Some(response);
            }
        }
        info!(failed = failures, "assignment complete");
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Completion that echoes a mode keyed off the question text.
    struct KeyedLlm;

    impl Completion for KeyedLlm {
        fn complete(&self, prompt: &str, _temperature: f64) -> String {
            if prompt.contains("unclear") {
                "[1] Ambiguity: matched".to_string()
            } else if prompt.contains("fail-me") {
                String::new()
            } else {
                "[1] Length: matched".to_string()
            }
        }
    }

    fn record(question: &str) -> Record {
        Record {
            question: question.to_string(),
            article: "a".to_string(),
            ..Record::default()
        }
    }

    fn leaf_tree() -> TaxonomyTree {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        tree.add_child(root, 1, "Ambiguity", 2, "unclear intent");
        tree.add_child(root, 1, "Length", 1, "");
        tree
    }

    #[test]
    fn given_leaves_when_building_catalog_then_desc_omitted_if_empty() {
        let catalog = AssignmentEngine::leaf_catalog(&leaf_tree());
        assert!(catalog.contains("Ambiguity (Level 1): unclear intent"));
        assert!(catalog.contains("Length (Level 1)"));
        assert!(!catalog.contains("Length (Level 1):"));
    }

    #[test]
    fn given_batch_when_assigning_then_responses_in_input_order() {
        let llm = KeyedLlm;
        let engine = AssignmentEngine::new(&llm, "{Modes}\n{Record}".to_string(), 3);
        let tree = leaf_tree();
        let mut records = vec![record("an unclear one"), record("a long one")];

        let failures = engine.assign(&mut records, &tree).unwrap();

        assert_eq!(failures, 0);
        assert_eq!(
            records[0].assigned_modes.as_deref(),
            Some("[1] Ambiguity: matched")
        );
        assert_eq!(
            records[1].assigned_modes.as_deref(),
            Some("[1] Length: matched")
        );
    }

    #[test]
    fn given_empty_response_when_assigning_then_sentinel_set() {
        let llm = KeyedLlm;
        let engine = AssignmentEngine::new(&llm, "{Modes}\n{Record}".to_string(), 2);
        let tree = leaf_tree();
        let mut records = vec![record("fail-me")];

        let failures = engine.assign(&mut records, &tree).unwrap();

        assert_eq!(failures, 1);
        assert_eq!(records[0].assigned_modes.as_deref(), Some(ASSIGNMENT_FAILED));
    }
}
