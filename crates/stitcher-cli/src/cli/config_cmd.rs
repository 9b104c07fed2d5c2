use crate::cli::ConfigCommands;
use crate::config::StitcherFileConfig;
use anyhow::Result;
use std::path::Path;

pub fn run(cmd: ConfigCommands, config_path: &Path, data_dir: Option<&Path>) -> Result<()> {
    match cmd {
        ConfigCommands::Validate => validate(config_path),
        ConfigCommands::Show => show(config_path, data_dir),
    }
}

fn validate(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        println!("{} not found; defaults apply.", config_path.display());
        return Ok(());
    }
    let config = StitcherFileConfig::load(config_path)?;
    let errors = config.validate();
    if errors.is_empty() {
        println!("✅ {} is valid.", config_path.display());
        return Ok(());
    }
    println!("❌ Validation errors in {}:", config_path.display());
    for e in &errors {
        println!("  - {}", e);
    }
    anyhow::bail!("{} error(s) in {}", errors.len(), config_path.display())
}

/// Effective configuration, with the data dir override applied.
fn show(config_path: &Path, data_dir: Option<&Path>) -> Result<()> {
    let mut config = StitcherFileConfig::load_or_default(config_path)?;
    if let Some(dir) = data_dir {
        config.storage.data_dir = dir.to_path_buf();
    }
    match toml::to_string_pretty(&config) {
        Ok(s) => println!("{}", s),
        Err(e) => anyhow::bail!("Failed to serialize config: {}", e),
    }
    Ok(())
}
