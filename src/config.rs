use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use confique::Config as _;
use confique::Layer as _;

#[derive(confique::Config, Debug, Clone)]
pub struct AppConfig {
    /// Anthropic API key.
    #[config(env = "ANTHROPIC_API_KEY")]
    pub api_key: Option<String>,

    /// Branch the working tree is compared against.
    #[config(default = "main", env = "BRANCH_REVIEW_BRANCH")]
    pub branch: String,

    #[config(default = "claude-3-5-sonnet-20240620", env = "BRANCH_REVIEW_MODEL")]
    pub model: String,

    #[config(default = 4000)]
    pub max_tokens: u32,

    #[config(default = "https://api.anthropic.com", env = "BRANCH_REVIEW_API_URL")]
    pub api_url: String,

    /// Where the system prompt is fetched from when no local file is set.
    #[config(
        default = "https://raw.githubusercontent.com/kkeeling/code-review-agent/refs/heads/main/src/system_prompt.xml",
        env = "BRANCH_REVIEW_PROMPT_URL"
    )]
    pub prompt_url: String,

    /// Local system prompt; takes precedence over `prompt_url`.
    pub system_prompt_file: Option<PathBuf>,

    /// Glob patterns excluded from collection.
    #[config(default = [])]
    pub ignore: Vec<String>,

    /// Files left out of whole-change-set diffs.
    #[config(default = ["package-lock.json", "yarn.lock"])]
    pub lockfiles: Vec<String>,

    #[config(default = false)]
    pub include_hidden: bool,

    #[config(default = false)]
    pub respect_gitignore: bool,

    #[config(default = false)]
    pub cxml: bool,

    /// Merge the comparison branch into the active one before diffing.
    #[config(default = false)]
    pub sync: bool,

    /// HTTP timeout in seconds; unset means wait indefinitely.
    pub timeout_secs: Option<u64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "branch-review",
    version,
    about = "Review the changes between your branch and another with Claude."
)]
pub struct Cli {
    /// Files or directories to review.
    #[arg(required = true, value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// Branch to compare against (default: main).
    #[arg(long = "branch")]
    pub branch: Option<String>,

    /// Anthropic API key (default: $ANTHROPIC_API_KEY).
    #[arg(long = "api-key")]
    pub api_key: Option<String>,

    /// Glob pattern to skip; may be repeated.
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Include files and directories whose names start with a dot.
    #[arg(
        long = "include-hidden",
        value_parser = clap::builder::BoolishValueParser::new(),
        default_missing_value = "true",
        num_args = 0..=1,
        require_equals = true
    )]
    pub include_hidden: Option<bool>,

    /// Lay the diff out as Claude-style `<documents>` XML.
    #[arg(
        long = "cxml",
        value_parser = clap::builder::BoolishValueParser::new(),
        default_missing_value = "true",
        num_args = 0..=1,
        require_equals = true
    )]
    pub cxml: Option<bool>,

    /// Check out, pull and merge the comparison branch before diffing.
    #[arg(
        long = "sync",
        value_parser = clap::builder::BoolishValueParser::new(),
        default_missing_value = "true",
        num_args = 0..=1,
        require_equals = true
    )]
    pub sync: Option<bool>,

    /// Honour .gitignore files while collecting paths.
    #[arg(
        long = "gitignore",
        value_parser = clap::builder::BoolishValueParser::new(),
        default_missing_value = "true",
        num_args = 0..=1,
        require_equals = true
    )]
    pub respect_gitignore: Option<bool>,

    /// Review the whole change set in a single request.
    #[arg(long = "whole", action = ArgAction::SetTrue)]
    pub whole: bool,

    /// Model identifier.
    #[arg(long = "model")]
    pub model: Option<String>,

    /// Response token limit.
    #[arg(long = "max-tokens", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_tokens: Option<u32>,

    /// Read the system prompt from this file instead of fetching it.
    #[arg(long = "system-prompt-file")]
    pub system_prompt_file: Option<PathBuf>,

    /// Optional path to a config file to load in addition to the standard locations.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut cli_layer = <AppConfig as confique::Config>::Layer::empty();
    cli_layer.api_key = cli.api_key.clone();
    cli_layer.branch = cli.branch.clone();
    cli_layer.model = cli.model.clone();
    cli_layer.max_tokens = cli.max_tokens;
    cli_layer.system_prompt_file = cli.system_prompt_file.clone();
    cli_layer.include_hidden = cli.include_hidden;
    cli_layer.respect_gitignore = cli.respect_gitignore;
    cli_layer.cxml = cli.cxml;
    cli_layer.sync = cli.sync;

    let mut builder = AppConfig::builder().preloaded(cli_layer).env();
    if let Some(path) = &cli.config_file {
        builder = builder.file(path);
    }

    if let Ok(cwd) = std::env::current_dir() {
        let local_root = cwd.join(".config");
        builder = add_if_exists(builder, local_root.join("branch-review.toml"));
        builder = add_if_exists(builder, local_root.join("branch-review").join("config.toml"));
    }

    if let Some(dir) = dirs::config_dir() {
        builder = add_if_exists(builder, dir.join("branch-review").join("config.toml"));
    }

    let mut config = builder.load().context("load branch-review config")?;
    config.ignore.extend(cli.ignore.iter().cloned());
    Ok(config)
}

fn add_if_exists(
    mut builder: confique::Builder<AppConfig>,
    path: impl AsRef<Path>,
) -> confique::Builder<AppConfig> {
    let path = path.as_ref();
    if path.exists() {
        builder = builder.file(path);
    }
    builder
}
