//! Record model and JSONL input/output.
//!
//! Records carry a question, the article it was asked against, and an
//! accumulated failure analysis. Unknown JSON fields are preserved across a
//! read/write cycle so upstream annotations survive the pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::{TaxonomyError, TaxonomyResult};

/// A single evaluation record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub article: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_modes: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    /// Whether a non-blank failure analysis is already present.
    pub fn has_analysis(&self) -> bool {
        self.failure_analysis
            .as_deref()
            .map(|fa| !fa.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Read all records from a JSONL file. Blank lines are ignored; a malformed
/// line is an error because silently dropping records skews every count
/// downstream.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_jsonl(path: &Path) -> TaxonomyResult<Vec<Record>> {
    if !path.exists() {
        return Err(TaxonomyError::FileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Record =
            serde_json::from_str(line).map_err(|e| TaxonomyError::InvalidRecord {
                path: path.to_path_buf(),
                reason: format!("line {}: {e}", idx + 1),
            })?;
        records.push(record);
    }
    debug!(count = records.len(), "records loaded");
    Ok(records)
}

/// Write records as JSONL, one object per line.
#[instrument(skip_all, fields(path = %path.display(), count = records.len()))]
pub fn write_jsonl(path: &Path, records: &[Record]) -> TaxonomyResult<()> {
    let mut file = fs::File::create(path)?;
    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// Drop `#fragment` suffixes from URLs in analysis text before it goes
/// into a prompt; the URL itself stays.
pub fn strip_url_fragments(text: &str) -> String {
    // compiled per call; report formatting is not on a hot path
    let url = Regex::new(r"https?://[^\s\)]+").unwrap();
    url.replace_all(text, |caps: &regex::Captures| {
        caps[0]
            .split('#')
            .next()
            .unwrap_or_default()
            .to_string()
    })
    .to_string()
}

/// True when the text contains any CJK ideograph.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Format one record as the report block fed to mode generation. Language
/// follows the question: CJK questions get the Chinese field labels.
pub fn format_report(record: &Record) -> String {
    let analysis = strip_url_fragments(record.failure_analysis.as_deref().unwrap_or(""));
    if contains_cjk(&record.question) {
        format!(
            "失败分析：\n{}\n问题：\n{}\n文章：\n{}\n",
            analysis, record.question, record.article
        )
    } else {
        format!(
            "Failure Analysis: \n{}\nQuestion: \n{}\narticle: \n{}\n",
            analysis, record.question, record.article
        )
    }
}

/// Format one record as the block fed to mode assignment: question and
/// article only, no analysis.
pub fn format_record(record: &Record) -> String {
    if contains_cjk(&record.question) {
        format!("问题：\n{}\n文章：\n{}\n", record.question, record.article)
    } else {
        format!(
            "Question: \n{}\narticle: \n{}\n",
            record.question, record.article
        )
    }
}
