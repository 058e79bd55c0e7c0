use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::generate;
use generational_arena::Index;
use tracing::{debug, instrument};

use crate::analysis::AnalysisGenerator;
use crate::api::{RealCompletion, RealEmbedder};
use crate::arena::TaxonomyTree;
use crate::assignment::AssignmentEngine;
use crate::builder::ModeBuilder;
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::output;
use crate::config::{global_config_dir, global_config_path, Settings};
use crate::errors::{TaxonomyError, TaxonomyResult};
use crate::merger::SimilarityMerger;
use crate::metrics::MetricsComputer;
use crate::pruner::remove_rare_modes;
use crate::records::{read_jsonl, write_jsonl};

pub fn execute_command(cli: &Cli) -> TaxonomyResult<()> {
    let config_path = cli.config_file.clone().or_else(global_config_path);
    let settings = Settings::load_from(config_path.as_deref())?;

    match &cli.command {
        Some(Commands::Analyze {
            input,
            output,
            prompt_en,
            prompt_zh,
        }) => _analyze(&settings, input, output.as_deref(), prompt_en, prompt_zh),
        Some(Commands::Generate {
            input,
            taxonomy,
            seed,
            prompt,
            responses,
        }) => _generate(
            &settings,
            input,
            taxonomy,
            seed.as_deref(),
            prompt,
            responses.as_deref(),
        ),
        Some(Commands::Refine {
            taxonomy,
            prompt,
            merge_threshold,
            remove_threshold,
            no_prune,
        }) => _refine(
            &settings,
            taxonomy,
            prompt,
            *merge_threshold,
            *remove_threshold,
            *no_prune,
        ),
        Some(Commands::Assign {
            input,
            taxonomy,
            output,
            prompt,
        }) => _assign(&settings, input, taxonomy, output.as_deref(), prompt),
        Some(Commands::Score { input, taxonomy }) => _score(input, taxonomy),
        Some(Commands::Tree { taxonomy, desc }) => _tree(taxonomy, *desc),
        Some(Commands::Config { command }) => _config(&settings, command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "taxo", &mut io::stdout());
            Ok(())
        }
        None => Ok(()),
    }
}

fn load_tree(path: &Path) -> TaxonomyResult<TaxonomyTree> {
    if !path.exists() {
        return Err(TaxonomyError::FileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    Ok(TaxonomyTree::deserialize(content.lines()))
}

fn save_tree(path: &Path, tree: &TaxonomyTree) -> TaxonomyResult<()> {
    fs::write(path, tree.serialize())?;
    Ok(())
}

#[instrument(skip(settings))]
fn _analyze(
    settings: &Settings,
    input: &Path,
    output: Option<&Path>,
    prompt_en: &Path,
    prompt_zh: &Path,
) -> TaxonomyResult<()> {
    let mut records = read_jsonl(input)?;
    let llm = RealCompletion::from_settings(settings)?;
    let generator = AnalysisGenerator::from_template_files(
        &llm,
        prompt_en,
        prompt_zh,
        settings.llm.model.clone(),
        settings.max_workers,
    )?;

    let failures = generator.generate(&mut records)?;
    let target = output.unwrap_or(input);
    write_jsonl(target, &records)?;

    if failures > 0 {
        output::warning(&format!("{failures} records could not be analyzed"));
    }
    output::action("Analyzed", &format!("{} -> {}", records.len(), target.display()));
    Ok(())
}

#[instrument(skip(settings))]
fn _generate(
    settings: &Settings,
    input: &Path,
    taxonomy: &Path,
    seed: Option<&Path>,
    prompt: &Path,
    responses: Option<&Path>,
) -> TaxonomyResult<()> {
    let records = read_jsonl(input)?;
    let mut tree = if taxonomy.exists() {
        load_tree(taxonomy)?
    } else if let Some(seed_path) = seed {
        let content = fs::read_to_string(seed_path)?;
        TaxonomyTree::from_seed_lines(content.lines())
    } else {
        TaxonomyTree::default()
    };
    debug!(modes = tree.len(), "starting taxonomy");

    let llm = RealCompletion::from_settings(settings)?;
    let builder = ModeBuilder::from_template_file(&llm, prompt, settings.context_len())?;
    let report = builder.code_reports(&records, &mut tree);

    save_tree(taxonomy, &tree)?;
    if let Some(responses_path) = responses {
        let mut out = String::new();
        for response in &report.responses {
            out.push_str(&serde_json::to_string(response)?);
            out.push('\n');
        }
        fs::write(responses_path, out)?;
    }

    if report.failures > 0 {
        output::warning(&format!("{} reports produced no response", report.failures));
    }
    output::action(
        "Generated",
        &format!("{} modes -> {}", tree.len(), taxonomy.display()),
    );
    Ok(())
}

#[instrument(skip(settings))]
fn _refine(
    settings: &Settings,
    taxonomy: &Path,
    prompt: &Path,
    merge_threshold: Option<f64>,
    remove_threshold: Option<f64>,
    no_prune: bool,
) -> TaxonomyResult<()> {
    let mut tree = load_tree(taxonomy)?;
    let llm = RealCompletion::from_settings(settings)?;
    let embedder = RealEmbedder::from_settings(settings)?;
    let merger = SimilarityMerger::from_template_file(
        &llm,
        &embedder,
        prompt,
        merge_threshold.unwrap_or(settings.refine.merge_threshold),
    )?;

    let report = merger.merge_modes(&mut tree);
    for (replacement, originals) in &report.merges {
        output::detail(&format!("{} <- {}", replacement, originals.join(", ")));
    }

    if !no_prune {
        let removed = remove_rare_modes(
            &mut tree,
            remove_threshold.unwrap_or(settings.refine.remove_threshold),
        );
        for (name, count) in &removed {
            output::detail(&format!("pruned {name} (Count: {count})"));
        }
    }

    save_tree(taxonomy, &tree)?;
    output::action(
        "Refined",
        &format!(
            "{} merges, {} modes remain -> {}",
            report.merges.len(),
            tree.len(),
            taxonomy.display()
        ),
    );
    Ok(())
}

#[instrument(skip(settings))]
fn _assign(
    settings: &Settings,
    input: &Path,
    taxonomy: &Path,
    output_path: Option<&Path>,
    prompt: &Path,
) -> TaxonomyResult<()> {
    let mut records = read_jsonl(input)?;
    let tree = load_tree(taxonomy)?;
    let llm = RealCompletion::from_settings(settings)?;
    let engine = AssignmentEngine::from_template_file(&llm, prompt, settings.max_workers)?;

    let failures = engine.assign(&mut records, &tree)?;
    let target = output_path.unwrap_or(input);
    write_jsonl(target, &records)?;

    if failures > 0 {
        output::warning(&format!("{failures} records could not be assigned"));
    }
    output::action("Assigned", &format!("{} -> {}", records.len(), target.display()));
    Ok(())
}

#[instrument]
fn _score(input: &Path, taxonomy: &Path) -> TaxonomyResult<()> {
    let records = read_jsonl(input)?;
    let tree = load_tree(taxonomy)?;
    let score = MetricsComputer::new().compute(&records, &tree);

    output::header("Per-mode scores");
    for mode in &score.per_mode {
        output::detail(&format!(
            "{:<40} {:>5} records  {:>6.2}%  score {:>6.2}",
            mode.name, mode.records, mode.rate, mode.score
        ));
    }
    if score.skipped > 0 {
        output::warning(&format!("{} records skipped (no usable assignment)", score.skipped));
    }
    if score.unmatched_lines > 0 {
        output::warning(&format!(
            "{} assignment lines named no known leaf",
            score.unmatched_lines
        ));
    }
    output::action("Overall", &format!("{:.2}", score.overall));
    Ok(())
}

#[instrument]
fn _tree(taxonomy: &Path, with_desc: bool) -> TaxonomyResult<()> {
    let tree = load_tree(taxonomy)?;
    let display = build_display_tree(&tree, tree.root(), with_desc);
    output::info(&display);
    Ok(())
}

fn build_display_tree(tree: &TaxonomyTree, idx: Index, with_desc: bool) -> termtree::Tree<String> {
    let label = tree
        .get_node(idx)
        .map(|node| {
            if node.parent.is_none() {
                node.data.name.clone()
            } else {
                TaxonomyTree::node_to_str(node, true, with_desc)
            }
        })
        .unwrap_or_default();
    let mut display = termtree::Tree::new(label);
    if let Some(node) = tree.get_node(idx) {
        for &child in &node.children {
            display.push(build_display_tree(tree, child, with_desc));
        }
    }
    display
}

#[instrument(skip(settings))]
fn _config(settings: &Settings, command: &ConfigCommands) -> TaxonomyResult<()> {
    match command {
        ConfigCommands::Show => {
            output::info(&settings.to_toml()?);
            Ok(())
        }
        ConfigCommands::Init => {
            let path = global_config_path().ok_or_else(|| TaxonomyError::Config {
                message: "cannot determine config directory".to_string(),
            })?;
            if path.exists() {
                output::warning(&format!("config already exists: {}", path.display()));
                return Ok(());
            }
            if let Some(dir) = global_config_dir() {
                fs::create_dir_all(&dir)?;
            }
            fs::write(&path, Settings::template())?;
            output::success(&format!("created {}", path.display()));
            Ok(())
        }
        ConfigCommands::Path => {
            let path = global_config_path().unwrap_or_else(|| PathBuf::from("unknown"));
            let marker = if path.exists() { "(exists)" } else { "(not created)" };
            output::info(&format!("{} {}", path.display(), marker));
            Ok(())
        }
    }
}
