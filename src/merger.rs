//! Similarity-driven consolidation of near-duplicate modes.
//!
//! Mode descriptors (`[level] name: desc`) are embedded, pairwise cosine
//! similarities computed, and the most similar pair above threshold is
//! handed to the LLM to propose a replacement mode. Each applied proposal
//! restructures the tree, so the loop re-embeds and repeats until no
//! un-attempted pair clears the threshold.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use itertools::Itertools;
use tracing::{debug, info, instrument, warn};

use crate::api::{Completion, Embedder};
use crate::arena::TaxonomyTree;
use crate::errors::{TaxonomyError, TaxonomyResult};
use crate::grammar::{Grammar, ParseOutcome};

const REFINEMENT_TEMPERATURE: f64 = 0.1;
const MODES_PLACEHOLDER: &str = "{Modes}";
const EMBED_ATTEMPTS: usize = 3;
/// Shape of the placeholder matrix used when embedding fails outright.
const PLACEHOLDER_DIM: usize = 2048;

/// Candidate pair of mode descriptor strings with their similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ModePair {
    pub first: String,
    pub second: String,
    pub similarity: f64,
}

/// Summary of one refinement run.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Applied consolidations as (replacement, originals) pairs
    pub merges: Vec<(String, Vec<String>)>,
    /// Rounds that ended with an unusable LLM response
    pub skipped_rounds: usize,
}

pub struct SimilarityMerger<'a> {
    llm: &'a dyn Completion,
    embedder: &'a dyn Embedder,
    grammar: Grammar,
    template: String,
    threshold: f64,
    /// Delay before embedding retry n (0-based); injectable so tests run fast
    retry_delays: Vec<Duration>,
}

impl<'a> SimilarityMerger<'a> {
    pub fn new(
        llm: &'a dyn Completion,
        embedder: &'a dyn Embedder,
        template: String,
        threshold: f64,
    ) -> Self {
        Self {
            llm,
            embedder,
            grammar: Grammar::new(),
            template,
            threshold,
            retry_delays: vec![Duration::from_secs(10), Duration::from_secs(20)],
        }
    }

    pub fn from_template_file(
        llm: &'a dyn Completion,
        embedder: &'a dyn Embedder,
        path: &Path,
        threshold: f64,
    ) -> TaxonomyResult<Self> {
        let template = fs::read_to_string(path)?;
        if !template.contains(MODES_PLACEHOLDER) {
            return Err(TaxonomyError::BadTemplate {
                path: path.to_path_buf(),
                placeholder: MODES_PLACEHOLDER.to_string(),
            });
        }
        Ok(Self::new(llm, embedder, template, threshold))
    }

    #[cfg(test)]
    fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Embed mode descriptors, retrying with backoff. Total failure degrades
    /// to a single placeholder row, which produces no pairs and ends the
    /// loop instead of aborting the run.
    fn embed_with_retry(&self, descriptors: &[String]) -> Vec<Vec<f32>> {
        for attempt in 0..EMBED_ATTEMPTS {
            match self.embedder.embed(descriptors) {
                Ok(matrix) if matrix.len() == descriptors.len() => return matrix,
                Ok(matrix) => {
                    warn!(
                        attempt,
                        got = matrix.len(),
                        want = descriptors.len(),
                        "embedding row count mismatch"
                    );
                }
                Err(e) => warn!(attempt, error = %e, "embedding attempt failed"),
            }
            if let Some(&delay) = self.retry_delays.get(attempt) {
                thread::sleep(delay);
            }
        }
        warn!("embedding failed after {EMBED_ATTEMPTS} attempts, using placeholder");
        vec![vec![0.5; PLACEHOLDER_DIM]]
    }

    /// All pairs sorted by descending similarity.
    fn similar_pairs(&self, descriptors: &[String], matrix: &[Vec<f32>]) -> Vec<ModePair> {
        let mut pairs: Vec<ModePair> = (0..matrix.len().min(descriptors.len()))
            .tuple_combinations()
            .map(|(i, j)| ModePair {
                first: descriptors[i].clone(),
                second: descriptors[j].clone(),
                similarity: cosine(&matrix[i], &matrix[j]),
            })
            .collect();
        pairs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        pairs
    }

    /// Canonical key for a pair, order-insensitive.
    fn pair_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Pick the most similar pair above threshold that has not been tried.
    fn next_pair(
        &self,
        pairs: &[ModePair],
        attempted: &HashSet<(String, String)>,
    ) -> Option<ModePair> {
        pairs
            .iter()
            .filter(|p| p.similarity > self.threshold)
            .find(|p| !attempted.contains(&Self::pair_key(&p.first, &p.second)))
            .cloned()
    }

    /// Apply one merge proposal: gather every node matching any original,
    /// sum their counts, attach the replacement under the first match's
    /// parent (falling back to the root), then detach all originals.
    fn apply_merge(&self, tree: &mut TaxonomyTree, name: &str, desc: &str, originals: &[(String, u32)]) -> bool {
        let mut matched = Vec::new();
        for (orig_name, orig_level) in originals {
            matched.extend(tree.find_by_name_level(orig_name, *orig_level));
        }
        if matched.is_empty() {
            debug!(name, "merge proposal matched no live modes");
            return false;
        }

        let total: u64 = matched
            .iter()
            .filter_map(|&idx| tree.get_node(idx).map(|n| n.data.count))
            .sum();
        let parent = tree
            .get_node(matched[0])
            .and_then(|n| n.parent)
            .unwrap_or_else(|| tree.root());
        let level = tree
            .get_node(parent)
            .map(|n| n.data.level + 1)
            .unwrap_or(1);

        for idx in &matched {
            tree.remove_node(*idx);
        }
        tree.add_child(parent, level, name, total, desc);
        true
    }

    /// Run the consolidation loop to fixpoint.
    #[instrument(skip_all, fields(modes = tree.len(), threshold = self.threshold))]
    pub fn merge_modes(&self, tree: &mut TaxonomyTree) -> MergeReport {
        let mut report = MergeReport::default();
        let mut attempted: HashSet<(String, String)> = HashSet::new();

        loop {
            // descriptor strings carry name and description, the same form
            // that was embedded
            let descriptors = tree.to_mode_list(false, true);
            if descriptors.len() < 2 {
                break;
            }
            let matrix = self.embed_with_retry(&descriptors);
            let pairs = self.similar_pairs(&descriptors, &matrix);
            let pair = match self.next_pair(&pairs, &attempted) {
                Some(p) => p,
                None => break,
            };
            info!(
                first = %pair.first,
                second = %pair.second,
                similarity = pair.similarity,
                "consolidation candidate"
            );
            attempted.insert(Self::pair_key(&pair.first, &pair.second));

            // only the selected pair is offered for consolidation
            let prompt = self.template.replace(
                MODES_PLACEHOLDER,
                &format!("{}\n{}", pair.first, pair.second),
            );
            // normalize full-width parentheses so the merge grammar applies
            let response = self
                .llm
                .complete(&prompt, REFINEMENT_TEMPERATURE)
                .replace('（', "(")
                .replace('）', ")");

            if response.trim().is_empty() || response.trim().eq_ignore_ascii_case("none") {
                debug!("no consolidation proposed for this round");
                report.skipped_rounds += 1;
                continue;
            }

            let mut any_applied = false;
            for line in response.lines() {
                let proposal = match self.grammar.parse_merge_line(line) {
                    ParseOutcome::Parsed(p) => p,
                    ParseOutcome::Skip(reason) => {
                        if !line.trim().is_empty() {
                            debug!(line, reason, "skipping merge line");
                        }
                        continue;
                    }
                };
                if self.apply_merge(tree, &proposal.name, &proposal.desc, &proposal.originals) {
                    report.merges.push((
                        proposal.name.clone(),
                        proposal
                            .originals
                            .iter()
                            .map(|(n, _)| n.clone())
                            .collect(),
                    ));
                    any_applied = true;
                }
            }
            if !any_applied {
                report.skipped_rounds += 1;
            }
        }
        info!(
            merges = report.merges.len(),
            skipped = report.skipped_rounds,
            modes = tree.len(),
            "refinement complete"
        );
        report
    }
}

/// Cosine similarity of two vectors; 0 for mismatched or zero-norm inputs.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            let mut responses: Vec<String> =
                responses.into_iter().map(String::from).collect();
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    impl Completion for ScriptedLlm {
        fn complete(&self, _prompt: &str, _temperature: f64) -> String {
            self.responses.lock().unwrap().pop().unwrap_or_default()
        }
    }

    /// Embedder returning fixed vectors per descriptor, recording its inputs.
    struct NamedEmbedder {
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl NamedEmbedder {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Embedder for NamedEmbedder {
        fn embed(&self, texts: &[String]) -> TaxonomyResult<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| {
                    // Ambiguity and Vagueness point the same way
                    if ["Ambiguity", "Vagueness", "Unclear Intent"]
                        .iter()
                        .any(|name| t.contains(name))
                    {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _texts: &[String]) -> TaxonomyResult<Vec<Vec<f32>>> {
            Err(TaxonomyError::InternalError("down".into()))
        }
    }

    fn tree_with(names: &[(&str, u64)]) -> TaxonomyTree {
        let mut tree = TaxonomyTree::default();
        let root = tree.root();
        for (name, count) in names {
            tree.add_child(root, 1, name, *count, "desc");
        }
        tree
    }

    #[test]
    fn given_similar_pair_when_merging_then_counts_conserved() {
        let llm = ScriptedLlm::new(vec![
            "[1] Unclear Intent: lacks specificity ([1] Ambiguity, [1] Vagueness)",
        ]);
        let embedder = NamedEmbedder::new();
        let merger = SimilarityMerger::new(&llm, &embedder, "{Modes}".to_string(), 0.6)
            .with_retry_delays(vec![]);
        let mut tree = tree_with(&[("Ambiguity", 3), ("Vagueness", 2), ("Length", 4)]);

        let report = merger.merge_modes(&mut tree);

        assert_eq!(report.merges.len(), 1);
        assert_eq!(tree.len(), 2);
        let merged = tree.find_by_name_level("Unclear Intent", 1);
        assert_eq!(merged.len(), 1);
        assert_eq!(tree.get_node(merged[0]).unwrap().data.count, 5);
        assert!(tree.find_by_name_level("Ambiguity", 1).is_empty());
    }

    #[test]
    fn given_modes_when_embedding_then_descriptors_carry_descriptions() {
        let llm = ScriptedLlm::new(vec!["none"]);
        let embedder = NamedEmbedder::new();
        let merger = SimilarityMerger::new(&llm, &embedder, "{Modes}".to_string(), 0.6)
            .with_retry_delays(vec![]);
        let mut tree = tree_with(&[("Ambiguity", 3), ("Vagueness", 2)]);

        merger.merge_modes(&mut tree);

        let seen = embedder.seen.lock().unwrap();
        assert!(seen[0].contains(&"[1] Ambiguity: desc".to_string()));
        assert!(seen[0].contains(&"[1] Vagueness: desc".to_string()));
    }

    #[test]
    fn given_selected_pair_when_prompting_then_other_modes_absent() {
        struct CapturingLlm {
            prompts: Mutex<Vec<String>>,
        }
        impl Completion for CapturingLlm {
            fn complete(&self, prompt: &str, _temperature: f64) -> String {
                self.prompts.lock().unwrap().push(prompt.to_string());
                "none".to_string()
            }
        }
        let llm = CapturingLlm {
            prompts: Mutex::new(Vec::new()),
        };
        let embedder = NamedEmbedder::new();
        let merger = SimilarityMerger::new(&llm, &embedder, "{Modes}".to_string(), 0.6)
            .with_retry_delays(vec![]);
        let mut tree = tree_with(&[("Ambiguity", 3), ("Vagueness", 2), ("Length", 4)]);

        merger.merge_modes(&mut tree);

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Ambiguity"));
        assert!(prompts[0].contains("Vagueness"));
        assert!(!prompts[0].contains("Length"));
    }

    #[test]
    fn given_none_response_when_merging_then_pair_not_retried() {
        let llm = ScriptedLlm::new(vec!["none"]);
        let embedder = NamedEmbedder::new();
        let merger = SimilarityMerger::new(&llm, &embedder, "{Modes}".to_string(), 0.6)
            .with_retry_delays(vec![]);
        let mut tree = tree_with(&[("Ambiguity", 3), ("Vagueness", 2)]);

        let report = merger.merge_modes(&mut tree);

        assert_eq!(report.merges.len(), 0);
        assert_eq!(report.skipped_rounds, 1);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn given_no_pair_above_threshold_when_merging_then_loop_ends() {
        let llm = ScriptedLlm::new(vec![]);
        let embedder = NamedEmbedder::new();
        let merger = SimilarityMerger::new(&llm, &embedder, "{Modes}".to_string(), 0.6)
            .with_retry_delays(vec![]);
        let mut tree = tree_with(&[("Ambiguity", 3), ("Length", 4)]);

        let report = merger.merge_modes(&mut tree);
        assert!(report.merges.is_empty());
    }

    #[test]
    fn given_embedder_down_when_merging_then_placeholder_ends_loop() {
        let llm = ScriptedLlm::new(vec![]);
        let embedder = FailingEmbedder;
        let merger = SimilarityMerger::new(&llm, &embedder, "{Modes}".to_string(), 0.6)
            .with_retry_delays(vec![]);
        let mut tree = tree_with(&[("Ambiguity", 3), ("Vagueness", 2)]);

        let report = merger.merge_modes(&mut tree);
        assert!(report.merges.is_empty());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn given_orthogonal_vectors_when_cosine_then_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine(&[], &[]), 0.0);
    }
}
