//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Self-organizing failure-mode taxonomy: discover, refine, and assign modes over evaluation records
#[derive(Parser, Debug)]
#[command(name = "taxo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-d info, -d -d debug, -d -d -d trace)
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file (default: ~/.config/taxo/taxo.toml)
    #[arg(short = 'c', long, global = true, value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    /// Show author and version
    #[arg(long)]
    pub info: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate missing failure analyses for records
    Analyze {
        /// Input records (JSONL)
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Output records (JSONL), defaults to rewriting the input
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
        /// English analysis prompt with {Question} and {Article}
        #[arg(long, value_hint = ValueHint::FilePath)]
        prompt_en: PathBuf,
        /// Chinese analysis prompt with {Question} and {Article}
        #[arg(long, value_hint = ValueHint::FilePath)]
        prompt_zh: PathBuf,
    },

    /// Grow the taxonomy from analyzed records
    Generate {
        /// Input records (JSONL)
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Taxonomy file to update (created if missing)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        taxonomy: PathBuf,
        /// Seed modes file, `[level] name` per line (only used when the taxonomy is new)
        #[arg(long, value_hint = ValueHint::FilePath)]
        seed: Option<PathBuf>,
        /// Generation prompt with {Report} and {Modes}
        #[arg(long, value_hint = ValueHint::FilePath)]
        prompt: PathBuf,
        /// Write raw per-record responses here (JSONL)
        #[arg(long, value_hint = ValueHint::FilePath)]
        responses: Option<PathBuf>,
    },

    /// Consolidate similar modes and prune rare ones
    Refine {
        /// Taxonomy file to refine in place
        #[arg(value_hint = ValueHint::FilePath)]
        taxonomy: PathBuf,
        /// Refinement prompt with {Modes}
        #[arg(long, value_hint = ValueHint::FilePath)]
        prompt: PathBuf,
        /// Override merge similarity threshold
        #[arg(long)]
        merge_threshold: Option<f64>,
        /// Override removal frequency threshold
        #[arg(long)]
        remove_threshold: Option<f64>,
        /// Skip the pruning step
        #[arg(long)]
        no_prune: bool,
    },

    /// Assign taxonomy leaves to records
    Assign {
        /// Input records (JSONL)
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Taxonomy file
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        taxonomy: PathBuf,
        /// Output records (JSONL), defaults to rewriting the input
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
        /// Assignment prompt with {Record} and {Modes}
        #[arg(long, value_hint = ValueHint::FilePath)]
        prompt: PathBuf,
    },

    /// Score assigned records against a taxonomy
    Score {
        /// Input records with assignments (JSONL)
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Taxonomy file
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        taxonomy: PathBuf,
    },

    /// Show a taxonomy as a tree
    Tree {
        /// Taxonomy file
        #[arg(value_hint = ValueHint::FilePath)]
        taxonomy: PathBuf,
        /// Show descriptions
        #[arg(long)]
        desc: bool,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Create config template
    Init,

    /// Show config paths
    Path,
}
