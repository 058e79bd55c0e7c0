//! Incremental taxonomy construction from analyzed records.
//!
//! Each record's failure report is shown to the LLM together with the
//! current taxonomy; proposed level-1 modes are folded back into the tree
//! before the next record is processed, so earlier records shape the
//! vocabulary later ones are matched against.

use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::thread_rng;
use tracing::{debug, info, instrument, warn};

use crate::api::{estimate_tokens, truncate_to_tokens, Completion};
use crate::arena::TaxonomyTree;
use crate::errors::{TaxonomyError, TaxonomyResult};
use crate::grammar::{Grammar, ParseOutcome};
use crate::records::{format_report, Record};

const GENERATION_TEMPERATURE: f64 = 0.1;
const REPORT_PLACEHOLDER: &str = "{Report}";
const MODES_PLACEHOLDER: &str = "{Modes}";

/// Sentinel recorded when a report produced no usable response.
pub const GENERATION_FAILED: &str = "Error - Exception";

/// Outcome of coding one batch of reports.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Raw responses, one per input record, in input order
    pub responses: Vec<String>,
    /// Count of records whose response could not be used
    pub failures: usize,
}

pub struct ModeBuilder<'a> {
    llm: &'a dyn Completion,
    grammar: Grammar,
    template: String,
    /// Prompt budget in estimated tokens
    context_len: usize,
}

impl std::fmt::Debug for ModeBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeBuilder")
            .field("template", &self.template)
            .field("context_len", &self.context_len)
            .finish_non_exhaustive()
    }
}

impl<'a> ModeBuilder<'a> {
    pub fn new(llm: &'a dyn Completion, template: String, context_len: usize) -> Self {
        Self {
            llm,
            grammar: Grammar::new(),
            template,
            context_len,
        }
    }

    /// Load the generation prompt template from a file, validating that both
    /// placeholders are present.
    pub fn from_template_file(
        llm: &'a dyn Completion,
        path: &Path,
        context_len: usize,
    ) -> TaxonomyResult<Self> {
        let template = fs::read_to_string(path)?;
        for placeholder in [REPORT_PLACEHOLDER, MODES_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(TaxonomyError::BadTemplate {
                    path: path.to_path_buf(),
                    placeholder: placeholder.to_string(),
                });
            }
        }
        Ok(Self::new(llm, template, context_len))
    }

    /// Render the prompt for one report against the current mode list. The
    /// mode list is shuffled each time to avoid positional bias, and the
    /// report is truncated when the assembled prompt would overflow the
    /// context budget.
    fn build_prompt(&self, report: &str, tree: &TaxonomyTree) -> String {
        let mut modes = tree.to_mode_list(false, false);
        modes.shuffle(&mut thread_rng());
        let mode_block = modes.join("\n");

        let skeleton = self
            .template
            .replace(MODES_PLACEHOLDER, &mode_block)
            .replace(REPORT_PLACEHOLDER, "");
        let overhead = estimate_tokens(&skeleton);
        let report = if overhead + estimate_tokens(report) > self.context_len {
            let budget = self.context_len.saturating_sub(overhead);
            warn!(budget, "report truncated to fit context");
            truncate_to_tokens(report, budget)
        } else {
            report.to_string()
        };

        self.template
            .replace(MODES_PLACEHOLDER, &mode_block)
            .replace(REPORT_PLACEHOLDER, &report)
    }

    /// Fold one response's proposals into the tree. Only level-1 proposals
    /// are honored; for each, an existing mode anywhere in the tree (matched
    /// case-insensitively) gets its count bumped, otherwise a new level-1
    /// node is attached under the root.
    fn apply_response(&self, response: &str, tree: &mut TaxonomyTree) -> usize {
        let mut applied = 0;
        for line in response.lines() {
            let proposal = match self.grammar.parse_mode_line(line) {
                ParseOutcome::Parsed(p) => p,
                ParseOutcome::Skip(reason) => {
                    if !line.trim().is_empty() {
                        debug!(line, reason, "skipping response line");
                    }
                    continue;
                }
            };
            if proposal.level != 1 {
                debug!(level = proposal.level, name = %proposal.name, "ignoring non-top-level proposal");
                continue;
            }
            let duplicates = tree.find_by_name_level(&proposal.name, 1);
            if let Some(&first) = duplicates.first() {
                if let Some(node) = tree.get_node_mut(first) {
                    node.data.count += 1;
                }
            } else {
                tree.add_child(tree.root(), 1, &proposal.name, 1, &proposal.desc);
            }
            applied += 1;
        }
        applied
    }

    /// Code a batch of records into the tree, one LLM call per record.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn code_reports(&self, records: &[Record], tree: &mut TaxonomyTree) -> BuildReport {
        let mut report = BuildReport::default();
        for (idx, record) in records.iter().enumerate() {
            let prompt = self.build_prompt(&format_report(record), tree);
            let response = self.llm.complete(&prompt, GENERATION_TEMPERATURE);
            if response.is_empty() {
                warn!(record = idx, "no response for report");
                report.responses.push(GENERATION_FAILED.to_string());
                report.failures += 1;
                continue;
            }
            let applied = self.apply_response(&response, tree);
            debug!(record = idx, applied, modes = tree.len(), "report coded");
            report.responses.push(response);
        }
        info!(
            coded = records.len() - report.failures,
            failed = report.failures,
            modes = tree.len(),
            "batch complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted completion that replays canned responses in order.
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

    fn record(question: &str, analysis: &str) -> Record {
        Record {
            question: question.to_string(),
            article: "article body".to_string(),
            failure_analysis: Some(analysis.to_string()),
            ..Record::default()
        }
    }

    fn builder(llm: &ScriptedLlm) -> ModeBuilder<'_> {
        ModeBuilder::new(
            llm,
            "Modes:\n{Modes}\nReport:\n{Report}".to_string(),
            10_000,
        )
    }

    #[test]
    fn given_new_mode_when_coding_then_added_under_root() {
        let llm = ScriptedLlm::new(vec!["[1] Ambiguity: unclear intent"]);
        let mut tree = TaxonomyTree::default();
        let report = builder(&llm).code_reports(&[record("q", "a")], &mut tree);

        assert_eq!(report.failures, 0);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.find_by_name_level("Ambiguity", 1).len(), 1);
    }

    #[test]
    fn given_existing_mode_when_coding_then_count_bumped_not_duplicated() {
        let llm = ScriptedLlm::new(vec![
            "[1] Ambiguity: unclear intent",
            "[1] ambiguity: phrased differently",
        ]);
        let mut tree = TaxonomyTree::default();
        builder(&llm).code_reports(&[record("q1", "a1"), record("q2", "a2")], &mut tree);

        assert_eq!(tree.len(), 1);
        let idx = tree.find_by_name_level("Ambiguity", 1)[0];
        assert_eq!(tree.get_node(idx).unwrap().data.count, 2);
    }

    #[test]
    fn given_non_top_level_proposal_when_coding_then_ignored() {
        let llm = ScriptedLlm::new(vec!["[2] Subcase: should not attach"]);
        let mut tree = TaxonomyTree::default();
        builder(&llm).code_reports(&[record("q", "a")], &mut tree);

        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn given_empty_response_when_coding_then_sentinel_recorded() {
        let llm = ScriptedLlm::new(vec![""]);
        let mut tree = TaxonomyTree::default();
        let report = builder(&llm).code_reports(&[record("q", "a")], &mut tree);

        assert_eq!(report.failures, 1);
        assert_eq!(report.responses, vec![GENERATION_FAILED.to_string()]);
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn given_template_missing_placeholder_when_loading_then_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("gen.txt");
        std::fs::write(&path, "no placeholders here").unwrap();
        let llm = ScriptedLlm::new(vec![]);

        let err = ModeBuilder::from_template_file(&llm, &path, 1000).unwrap_err();
        assert!(matches!(err, TaxonomyError::BadTemplate { .. }));
    }
}
