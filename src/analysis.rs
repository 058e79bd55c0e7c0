//! Failure-analysis generation for records that arrive without one.
//!
//! Records that already carry a non-blank analysis are left untouched.
//! Language is chosen per record: CJK questions get the Chinese prompt.

use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::thread_rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, instrument, warn};

use crate::api::Completion;
use crate::errors::{TaxonomyError, TaxonomyResult};
use crate::records::{contains_cjk, Record};

const ANALYSIS_TEMPERATURE: f64 = 0.3;
const QUESTION_PLACEHOLDER: &str = "{Question}";
const ARTICLE_PLACEHOLDER: &str = "{Article}";

/// Sentinel stored when analysis generation produced nothing.
pub const ANALYSIS_FAILED: &str = "error";

pub struct AnalysisGenerator<'a> {
    llm: &'a dyn Completion,
    template_en: String,
    template_zh: String,
    /// Recorded on each record so later stages know which model analyzed it
    model_name: String,
    max_workers: usize,
}

impl<'a> AnalysisGenerator<'a> {
    pub fn new(
        llm: &'a dyn Completion,
        template_en: String,
        template_zh: String,
        model_name: String,
        max_workers: usize,
    ) -> Self {
        Self {
            llm,
            template_en,
            template_zh,
            model_name,
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_template_files(
        llm: &'a dyn Completion,
        path_en: &Path,
        path_zh: &Path,
        model_name: String,
        max_workers: usize,
    ) -> TaxonomyResult<Self> {
        let template_en = fs::read_to_string(path_en)?;
        let template_zh = fs::read_to_string(path_zh)?;
        for (path, template) in [(path_en, &template_en), (path_zh, &template_zh)] {
            for placeholder in [QUESTION_PLACEHOLDER, ARTICLE_PLACEHOLDER] {
                if !template.contains(placeholder) {
                    return Err(TaxonomyError::BadTemplate {
                        path: path.to_path_buf(),
                        placeholder: placeholder.to_string(),
                    });
                }
            }
        }
        Ok(Self::new(
            llm,
            template_en,
            template_zh,
            model_name,
            max_workers,
        ))
    }

    fn build_prompt(&self, record: &Record) -> String {
        let template = if contains_cjk(&record.question) {
            &self.template_zh
        } else {
            &self.template_en
        };
        template
            .replace(QUESTION_PLACEHOLDER, &record.question)
            .replace(ARTICLE_PLACEHOLDER, &record.article)
    }

    /// Fill in missing analyses in place; returns the number of failures.
    /// Pending records are processed in shuffled order so partial runs do
    /// not bias toward the file head, but each result lands back on its own
    /// record.
    #[instrument(skip_all, fields(records = records.len(), workers = self.max_workers))]
    pub fn generate(&self, records: &mut [Record]) -> TaxonomyResult<usize> {
        let mut pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.has_analysis())
            .map(|(idx, _)| idx)
            .collect();
        pending.shuffle(&mut thread_rng());
        info!(pending = pending.len(), "generating analyses");

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| TaxonomyError::InternalError(format!("thread pool: {e}")))?;

        let prompts: Vec<(usize, String)> = pending
            .iter()
            .map(|&idx| (idx, self.build_prompt(&records[idx])))
            .collect();

        let results: Vec<(usize, String)> = pool.install(|| {
            prompts
                .par_iter()
                .map(|(idx, prompt)| (*idx, self.llm.complete(prompt, ANALYSIS_TEMPERATURE)))
                .collect()
        });

        let mut failures = 0;
        for (idx, response) in results {
            let record = &mut records[idx];
            if response.trim().is_empty() {
                warn!(record = idx, "no analysis response");
                record.failure_analysis = Some(ANALYSIS_FAILED.to_string());
                failures += 1;
            } else {
                record.failure_analysis = Some(response);
            }
            record.analysis_model = Some(self.model_name.clone());
        }
        info!(failed = failures, "analysis generation complete");
        Ok(failures)
    }
}
