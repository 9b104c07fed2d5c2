use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stitcher_core::{
    DeprecationConfig, EntityKind, IngestConfig, RecolorConfig, StitchKey, StitcherConfig,
};

/// Contents of `stitcher.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StitcherFileConfig {
    pub storage: StorageSection,
    pub ingest: IngestSection,
    pub repair: RepairSection,
    pub jobs: JobsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// Records read by the scan pass
    pub scan_limit: usize,
    pub progress_capacity: usize,
    /// Directory for fetched URLs, relative to the data dir
    pub download_dir: PathBuf,
}

impl Default for IngestSection {
    fn default() -> Self {
        let defaults = IngestConfig::default();
        Self {
            scan_limit: defaults.scan_limit,
            progress_capacity: defaults.progress_capacity,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSection {
    pub deprecation_limit: usize,
    pub strict: bool,
    pub kind: EntityKind,
    pub seed_keys: Vec<StitchKey>,
    pub priority: Vec<StitchKey>,
}

impl Default for RepairSection {
    fn default() -> Self {
        let deprecation = DeprecationConfig::default();
        let recolor = RecolorConfig::default();
        Self {
            deprecation_limit: deprecation.limit,
            strict: deprecation.strict,
            kind: recolor.kind,
            seed_keys: recolor.seed_keys,
            priority: recolor.priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    /// How often job counters are reported while waiting
    pub poll_interval_ms: u64,
    /// Print progress notifications as they arrive
    pub show_progress: bool,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            show_progress: false,
        }
    }
}

impl StitcherFileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// A missing file means defaults; a broken one is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join("stitcher.redb")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.ingest.download_dir)
    }

    pub fn engine_config(&self) -> StitcherConfig {
        StitcherConfig::new()
            .with_ingest(
                IngestConfig::new()
                    .with_scan_limit(self.ingest.scan_limit)
                    .with_progress_capacity(self.ingest.progress_capacity),
            )
            .with_deprecation(
                DeprecationConfig::new()
                    .with_limit(self.repair.deprecation_limit)
                    .with_strict(self.repair.strict),
            )
            .with_recolor(
                RecolorConfig::new()
                    .with_kind(self.repair.kind)
                    .with_seed_keys(self.repair.seed_keys.clone())
                    .with_priority(self.repair.priority.clone()),
            )
    }

    /// Every problem found, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.storage.data_dir.as_os_str().is_empty() {
            errors.push("storage.data_dir must not be empty".to_string());
        }
        if self.jobs.poll_interval_ms == 0 {
            errors.push("jobs.poll_interval_ms must be > 0".to_string());
        }
        if let Err(e) = self.engine_config().validate() {
            errors.push(e.to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = StitcherFileConfig::load_or_default(&temp.path().join("none.toml")).unwrap();
        assert_eq!(config.ingest.scan_limit, 1000);
        assert_eq!(config.repair.deprecation_limit, 2);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stitcher.toml");
        std::fs::write(
            &path,
            r#"
[storage]
data_dir = "/var/lib/stitcher"

[repair]
deprecation_limit = 5
priority = ["H_InChIKey", "I_UNII", "I_CAS"]
"#,
        )
        .unwrap();

        let config = StitcherFileConfig::load(&path).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/stitcher/stitcher.redb"));
        assert_eq!(config.repair.deprecation_limit, 5);
        assert_eq!(config.repair.priority[0], StitchKey::InchiKey);
        assert_eq!(config.repair.seed_keys, vec![StitchKey::ActiveMoiety]);
        assert_eq!(config.ingest.scan_limit, 1000);
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = StitcherFileConfig::default();
        config.ingest.scan_limit = 0;
        config.jobs.poll_interval_ms = 0;
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stitcher.toml");
        std::fs::write(&path, "[repair]\npriority = [\"I_NOPE\"]\n").unwrap();
        assert!(StitcherFileConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = StitcherFileConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: StitcherFileConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.repair.priority, config.repair.priority);
    }
}
