//! Run configuration: naming policy, hierarchical keys and the two reserved
//! attribute keys.
//!
//! Lives at `<home>/.treeline/config.yaml`. A missing file means defaults.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default name rule shared by every entity kind.
pub const DEFAULT_NAME_PATTERN: &str = "^[a-zA-Z0-9_.]*$";

/// Per-kind name patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamePatterns {
    pub project: String,
    pub asset: String,
    pub task: String,
}

impl Default for NamePatterns {
    fn default() -> Self {
        Self {
            project: DEFAULT_NAME_PATTERN.to_string(),
            asset: DEFAULT_NAME_PATTERN.to_string(),
            task: DEFAULT_NAME_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub name_patterns: NamePatterns,
    /// Attribute keys inherited from the nearest ancestor defining them.
    pub hierarchical_keys: Vec<String>,
    /// Boolean attribute; when truthy the entity and its subtree are skipped.
    pub ignore_key: String,
    /// Attribute on the source entity holding the id of its target document.
    pub back_reference_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            name_patterns: NamePatterns::default(),
            hierarchical_keys: vec![
                "fps".to_string(),
                "frame_start".to_string(),
                "frame_end".to_string(),
                "handle_start".to_string(),
                "handle_end".to_string(),
                "resolution_width".to_string(),
                "resolution_height".to_string(),
            ],
            ignore_key: "ignore_sync".to_string(),
            back_reference_key: "target_id".to_string(),
        }
    }
}

/// Kind of entity a name is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Project,
    Asset,
    Task,
}

impl NameKind {
    fn label(self) -> &'static str {
        match self {
            NameKind::Project => "project",
            NameKind::Asset => "asset",
            NameKind::Task => "task",
        }
    }
}

/// Compiled form of [`NamePatterns`].
#[derive(Debug, Clone)]
pub struct NamePolicy {
    project: Regex,
    asset: Regex,
    task: Regex,
}

impl NamePolicy {
    pub fn is_valid(&self, kind: NameKind, name: &str) -> bool {
        let re = match kind {
            NameKind::Project => &self.project,
            NameKind::Asset => &self.asset,
            NameKind::Task => &self.task,
        };
        re.is_match(name)
    }

    /// The pattern text for `kind`, for messages.
    pub fn pattern(&self, kind: NameKind) -> &str {
        match kind {
            NameKind::Project => self.project.as_str(),
            NameKind::Asset => self.asset.as_str(),
            NameKind::Task => self.task.as_str(),
        }
    }
}

impl SyncConfig {
    /// Check the reserved keys and compile the name patterns.
    pub fn compile(&self) -> Result<NamePolicy, ConfigError> {
        if self.ignore_key.trim().is_empty() {
            return Err(ConfigError::EmptyKey { field: "ignore_key" });
        }
        if self.back_reference_key.trim().is_empty() {
            return Err(ConfigError::EmptyKey {
                field: "back_reference_key",
            });
        }
        Ok(NamePolicy {
            project: compile_pattern(NameKind::Project, &self.name_patterns.project)?,
            asset: compile_pattern(NameKind::Asset, &self.name_patterns.asset)?,
            task: compile_pattern(NameKind::Task, &self.name_patterns.task)?,
        })
    }

    pub fn is_hierarchical(&self, key: &str) -> bool {
        self.hierarchical_keys.iter().any(|k| k == key)
    }

    /// Keys used for bookkeeping; never copied into target attributes.
    pub fn is_internal(&self, key: &str) -> bool {
        key == self.back_reference_key || key == self.ignore_key
    }
}

fn compile_pattern(kind: NameKind, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        kind: kind.label(),
        pattern: pattern.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.treeline/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".treeline").join("config.yaml")
}

/// Load the config, falling back to defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
        path: path.clone(),
        source: e,
    })?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Write the config via `.tmp` + rename.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| ConfigError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, &path).map_err(|e| ConfigError::Io { path, source: e })
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.back_reference_key, "target_id");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "hierarchical_keys: [fps]\nname_patterns:\n  task: '^[a-z]+$'\n")
            .unwrap();

        let config = load_at(home.path()).unwrap();
        assert_eq!(config.hierarchical_keys, vec!["fps".to_string()]);
        assert_eq!(config.name_patterns.task, "^[a-z]+$");
        assert_eq!(config.name_patterns.asset, DEFAULT_NAME_PATTERN);
        assert_eq!(config.ignore_key, "ignore_sync");
    }

    #[test]
    fn save_then_load() {
        let home = TempDir::new().unwrap();
        let mut config = SyncConfig::default();
        config.ignore_key = "skip".into();
        save_at(home.path(), &config).unwrap();
        assert_eq!(load_at(home.path()).unwrap(), config);
    }

    #[test]
    fn default_policy_rejects_spaces_and_dashes() {
        let policy = SyncConfig::default().compile().unwrap();
        assert!(policy.is_valid(NameKind::Asset, "sh010_v2.final"));
        assert!(!policy.is_valid(NameKind::Asset, "sh 010"));
        assert!(!policy.is_valid(NameKind::Task, "comp-final"));
    }

    #[test]
    fn bad_pattern_is_reported_with_kind() {
        let mut config = SyncConfig::default();
        config.name_patterns.asset = "([".into();
        let err = config.compile().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { kind: "asset", .. }));
    }

    #[test]
    fn empty_reserved_key_is_rejected() {
        let config = SyncConfig {
            back_reference_key: " ".into(),
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.compile(),
            Err(ConfigError::EmptyKey {
                field: "back_reference_key"
            })
        ));
    }

    #[test]
    fn internal_keys() {
        let config = SyncConfig::default();
        assert!(config.is_internal("target_id"));
        assert!(config.is_internal("ignore_sync"));
        assert!(!config.is_internal("fps"));
        assert!(config.is_hierarchical("fps"));
    }
}
