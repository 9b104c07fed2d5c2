pub mod config_cmd;
pub mod entity;
pub mod ingest;
pub mod repair;
pub mod source;
pub mod stats;
pub mod stitch;

use crate::config::StitcherFileConfig;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use stitcher_core::{Entity, EntityKind, StitchKey, Stitcher};

#[derive(Parser, Debug)]
#[command(name = "stitcher")]
#[command(version, about = "Record linkage over an embedded entity graph")]
pub struct Cli {
    /// Path to stitcher.toml
    #[arg(long, global = true, env = "STITCHER_CONFIG", default_value = "stitcher.toml")]
    pub config: PathBuf,

    /// Path to data directory (overrides config file)
    #[arg(long, global = true, env = "STITCHER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output format for listings
    #[arg(long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest files or URLs as data sources
    Ingest(IngestArgs),
    /// Preview the fields and types of a file
    Scan(ScanArgs),
    /// List data sources
    Sources,
    /// Data source operations
    #[command(subcommand)]
    Source(SourceCommands),
    /// Entity operations
    #[command(subcommand)]
    Entity(EntityCommands),
    /// Every entity reachable from a root
    Component(ComponentArgs),
    /// Connected-component partition of a label
    Components(ComponentsArgs),
    /// Fully connected groups sharing a key value
    Cliques(CliquesArgs),
    /// Withdraw over-connected key values within a source
    Deprecate(DeprecateArgs),
    /// Recolor components around a source
    Recolor(RecolorArgs),
    /// Tie outside entities to their closest source entity
    Closest(RecolorArgs),
    /// Versioned stitches
    #[command(subcommand)]
    Stitch(StitchCommands),
    /// Curation metrics for a label or the whole graph
    Metrics(MetricsArgs),
    /// Store statistics
    Stats,
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

// --- Ingest args ---

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Files or http(s) URLs
    #[arg(required = true)]
    pub inputs: Vec<String>,
    /// Source mapping file (TOML)
    #[arg(long)]
    pub mapping: Option<PathBuf>,
    /// Record format: csv, tsv or jsonl
    #[arg(long)]
    pub input_format: Option<String>,
    /// Single-character field delimiter
    #[arg(long)]
    pub delimiter: Option<String>,
    /// Data source name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
    /// External id field
    #[arg(long)]
    pub id: Option<String>,
    /// Stitch key assignment, KEY=FIELD[,FIELD...]; repeatable
    #[arg(long = "key", value_name = "KEY=FIELDS")]
    pub keys: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    pub file: PathBuf,
    /// Records to inspect (defaults to the configured scan limit)
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub mapping: Option<PathBuf>,
    #[arg(long)]
    pub input_format: Option<String>,
    #[arg(long)]
    pub delimiter: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum SourceCommands {
    /// Delete a data source and every entity it owns
    Delete(SourceDeleteArgs),
}

#[derive(Args, Debug)]
pub struct SourceDeleteArgs {
    pub key: String,
}

// --- Entity args ---

#[derive(Subcommand, Debug)]
pub enum EntityCommands {
    Get(EntityGetArgs),
    List(EntityListArgs),
    /// Entities whose property equals a literal value
    Filter(EntityFilterArgs),
    /// Entities registered under an external id
    Lookup(EntityLookupArgs),
}

#[derive(Args, Debug)]
pub struct EntityLookupArgs {
    pub external_id: String,
    #[arg(long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EntityGetArgs {
    pub id: u64,
}

#[derive(Args, Debug)]
pub struct EntityListArgs {
    /// Required labels; repeatable
    #[arg(long = "label")]
    pub labels: Vec<String>,
    #[arg(long, default_value = "0")]
    pub skip: usize,
    /// Capped at 1000
    #[arg(long, default_value = "100")]
    pub top: usize,
}

#[derive(Args, Debug)]
pub struct EntityFilterArgs {
    pub field: String,
    pub value: String,
    #[arg(long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ComponentArgs {
    pub root: u64,
}

#[derive(Args, Debug)]
pub struct ComponentsArgs {
    #[arg(long)]
    pub label: Option<String>,
    /// Write CC_<n> and SINGLETON labels as a new generation
    #[arg(long)]
    pub relabel: bool,
}

#[derive(Args, Debug)]
pub struct CliquesArgs {
    #[arg(value_parser = parse_key)]
    pub key: StitchKey,
    #[arg(long)]
    pub label: Option<String>,
    /// Stop after this many cliques
    #[arg(long)]
    pub max: Option<usize>,
}

// --- Repair args ---

#[derive(Args, Debug)]
pub struct DeprecateArgs {
    pub source: String,
    #[arg(value_parser = parse_key)]
    pub key: StitchKey,
    /// Peer count above which a value is deprecated
    #[arg(long)]
    pub limit: Option<usize>,
    /// Count peers from every source
    #[arg(long)]
    pub loose: bool,
    /// Report without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RecolorArgs {
    pub source: String,
    /// Entity kind in scope
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<EntityKind>,
    /// Comma-separated keys, most important first
    #[arg(long, value_delimiter = ',', value_parser = parse_key)]
    pub priority: Vec<StitchKey>,
}

// --- Stitch args ---

#[derive(Subcommand, Debug)]
pub enum StitchCommands {
    /// Build a new stitch version
    Build(StitchBuildArgs),
    /// Resolve a stitch by internal or external id
    Get(StitchGetArgs),
    /// List one version
    List(StitchListArgs),
}

#[derive(Args, Debug)]
pub struct StitchBuildArgs {
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Debug)]
pub struct StitchGetArgs {
    /// `3` or `V3`
    pub version: String,
    pub id: String,
}

#[derive(Args, Debug)]
pub struct StitchListArgs {
    pub version: String,
}

#[derive(Args, Debug)]
pub struct MetricsArgs {
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Validate,
    Show,
}

// --- Dispatch ---

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Config(cmd) = cli.command {
        return config_cmd::run(cmd, &cli.config, cli.data_dir.as_deref());
    }

    let mut config = StitcherFileConfig::load_or_default(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    let errors = config.validate();
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration {}: {}", cli.config.display(), errors.join("; "));
    }

    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("creating data dir {}", config.storage.data_dir.display()))?;
    let db_path = config.db_path();
    let stitcher = Stitcher::open(&db_path, config.engine_config())
        .with_context(|| format!("opening {}", db_path.display()))?;
    let format = cli.format;

    match cli.command {
        Commands::Ingest(args) => ingest::run(args, stitcher, &config, format),
        Commands::Scan(args) => ingest::scan(args, &stitcher, format),
        Commands::Sources => source::list(&stitcher, format),
        Commands::Source(SourceCommands::Delete(args)) => source::delete(args, &stitcher),
        Commands::Entity(cmd) => entity::run(cmd, &stitcher, format),
        Commands::Component(args) => entity::component(args, &stitcher, format),
        Commands::Components(args) => entity::components(args, &stitcher, format),
        Commands::Cliques(args) => entity::cliques(args, &stitcher, format),
        Commands::Deprecate(args) => repair::deprecate(args, &stitcher, format),
        Commands::Recolor(args) => repair::recolor(args, &stitcher, format),
        Commands::Closest(args) => repair::closest(args, &stitcher, format),
        Commands::Stitch(cmd) => stitch::run(cmd, &stitcher, format),
        Commands::Metrics(args) => stats::metrics(args, &stitcher, format),
        Commands::Stats => stats::run(&stitcher, format),
        Commands::Config(_) => Ok(()),
    }
}

// --- Output helpers ---

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_entity_table(entities: &[Entity]) {
    if entities.is_empty() {
        println!("(no results)");
        return;
    }
    println!("{:<10}  {:<14}  {:<10}  {:<16}  {}", "ID", "KIND", "SOURCE", "EXTERNAL ID", "LABELS");
    println!("{}", "─".repeat(80));
    for e in entities {
        let labels: Vec<&str> = e
            .labels
            .iter()
            .map(String::as_str)
            .filter(|l| *l != e.source && *l != e.kind.as_str())
            .collect();
        println!(
            "{:<10}  {:<14}  {:<10}  {:<16}  {}",
            e.id,
            e.kind.as_str(),
            e.source,
            truncate(e.external_id.as_deref().unwrap_or("-"), 16),
            labels.join(",")
        );
    }
}

pub fn print_entity_detail(e: &Entity) {
    println!("ID:          {}", e.id);
    println!("Kind:        {}", e.kind.as_str());
    println!("Source:      {}", e.source);
    println!("External id: {}", e.external_id.as_deref().unwrap_or("-"));
    println!("Labels:      {}", e.labels.iter().cloned().collect::<Vec<_>>().join(", "));
    println!("Created:     {}", e.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("{}", "─".repeat(50));
    for (name, value) in e.property_view() {
        println!("  {:<24} {}", name, truncate(&value.index_text(), 60));
    }
}

fn parse_key(raw: &str) -> std::result::Result<StitchKey, String> {
    raw.parse().map_err(|e: stitcher_core::StitchError| e.to_string())
}

fn parse_kind(raw: &str) -> std::result::Result<EntityKind, String> {
    raw.parse().map_err(|e: stitcher_core::StitchError| e.to_string())
}

/// Accepts `3` or `V3`.
pub fn parse_version(raw: &str) -> Result<u32> {
    let digits = raw.trim().trim_start_matches(['V', 'v']);
    digits
        .parse()
        .with_context(|| format!("invalid stitch version {:?}", raw))
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max - 1).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("V3").unwrap(), 3);
        assert_eq!(parse_version("12").unwrap(), 12);
        assert!(parse_version("V").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "stitcher", "--format", "json", "recolor", "abc123", "--priority", "I_UNII,I_CAS",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Recolor(args) => assert_eq!(args.priority, vec![StitchKey::Unii, StitchKey::Cas]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
