//! Taxonomy scoring over assigned records.
//!
//! Every leaf is canonicalized to its level-1 ancestor, assignment responses
//! are mapped through that table, and each root mode is scored by how rare
//! it is across the record set. The saturating curve rewards low failure
//! rates without letting a single common mode dominate the mean.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::f64::consts::FRAC_PI_2;

use regex::Regex;
use tracing::{debug, instrument};

use crate::arena::TaxonomyTree;
use crate::assignment::ASSIGNMENT_FAILED;
use crate::records::Record;

/// Score for one level-1 mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeScore {
    pub name: String,
    /// Records attributed to this mode (deduplicated per record)
    pub records: usize,
    /// Percentage of scored records attributed to this mode, for reporting
    pub rate: f64,
    /// Saturating score in [0, 100], driven by the raw record count
    pub score: f64,
}

/// Full scoring result for a record set against a taxonomy.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyScore {
    pub per_mode: Vec<ModeScore>,
    /// Mean of the per-mode scores
    pub overall: f64,
    /// Records skipped: unassigned or carrying the failure sentinel
    pub skipped: usize,
    /// Assignment lines naming no known leaf
    pub unmatched_lines: usize,
}

/// Saturating score for a raw count of affected records. 0 maps to 100,
/// 100 records (or anything above) maps to 0, and the curve is strictly
/// decreasing in between.
pub fn saturating_score(affected: f64) -> f64 {
    100.0 * ((affected / 100.0).clamp(0.0, 1.0) * FRAC_PI_2).cos()
}

pub struct MetricsComputer {
    /// Extracts the level-1 component from an arrow-joined leaf path
    root_of_path: Regex,
    /// Extracts the mode name from one assignment response line
    response_line: Regex,
}

impl Default for MetricsComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsComputer {
    pub fn new() -> Self {
        Self {
            root_of_path: Regex::new(r"^\[1\]\s*([^\n→:]+)").unwrap(),
            response_line: Regex::new(
                r"(?i)^\s*(?:\[\d+\]\s*)?([^(:\n]+?)(?:\s*\(level\s+\d+\))?\s*:",
            )
            .unwrap(),
        }
    }

    /// Map from lowercase leaf name to its level-1 ancestor's name.
    fn canonical_map(&self, tree: &TaxonomyTree) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (idx, path) in tree.leaf_paths() {
            let root_name = match self.root_of_path.captures(&path) {
                Some(caps) => caps[1].trim().to_string(),
                None => continue,
            };
            if let Some(node) = tree.get_node(idx) {
                map.insert(node.data.name.to_lowercase(), root_name);
            }
        }
        map
    }

    /// Root modes named by one record's assignment response, deduplicated.
    fn record_root_modes(
        &self,
        response: &str,
        canonical: &HashMap<String, String>,
        unmatched: &mut usize,
    ) -> HashSet<String> {
        let mut roots = HashSet::new();
        for line in response.lines() {
            let caps = match self.response_line.captures(line) {
                Some(c) => c,
                None => continue,
            };
            let leaf = caps[1].trim().to_lowercase();
            match canonical.get(&leaf) {
                Some(root) => {
                    roots.insert(root.clone());
                }
                None => {
                    debug!(leaf, "assignment line names no known leaf");
                    *unmatched += 1;
                }
            }
        }
        roots
    }

    /// Score the record set. Every level-1 mode in the tree gets an entry,
    /// zero-mention modes included; records without a usable assignment are
    /// skipped.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn compute(&self, records: &[Record], tree: &TaxonomyTree) -> TaxonomyScore {
        let canonical = self.canonical_map(tree);
        let mut result = TaxonomyScore::default();

        // zero-initialized per root mode so unmentioned ones score 100
        let mut counts: BTreeMap<String, usize> = tree
            .get_node(tree.root())
            .map(|root| root.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|&idx| tree.get_node(idx))
            .map(|node| (node.data.name.clone(), 0))
            .collect();

        let mut scored_records = 0usize;
        for record in records {
            let response = match record.assigned_modes.as_deref() {
                Some(r) if r != ASSIGNMENT_FAILED && !r.trim().is_empty() => r,
                _ => {
                    result.skipped += 1;
                    continue;
                }
            };
            scored_records += 1;
            for root in self.record_root_modes(response, &canonical, &mut result.unmatched_lines)
            {
                *counts.entry(root).or_default() += 1;
            }
        }

        for (name, count) in counts {
            let rate = if scored_records > 0 {
                100.0 * count as f64 / scored_records as f64
            } else {
                0.0
            };
            result.per_mode.push(ModeScore {
                name,
                records: count,
                rate,
                score: saturating_score(count as f64),
            });
        }
        if !result.per_mode.is_empty() {
            result.overall =
                result.per_mode.iter().map(|m| m.score).sum::<f64>() / result.per_mode.len() as f64;
        }
        result
    }
}
