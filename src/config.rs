// Configuration management for symgraph

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the per-project config file
pub const CONFIG_FILE: &str = ".symgraph.toml";

/// Name of the per-project database file
pub const DB_FILE: &str = ".symgraph.db";

/// Languages with a built-in extractor
pub const SUPPORTED_LANGUAGES: &[&str] = &["go", "python", "rust"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub languages: LanguagesConfig,
    pub indexing: IndexingConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Display name; the directory name is used when empty
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    /// Parser workers; 0 means available parallelism capped at 8
    pub workers: usize,
    /// Capacity of the path and result channels
    pub channel_capacity: usize,
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Default depth for dependency graphs
    pub max_depth: usize,
    /// Depth of the dependents walk behind indirect references
    pub impact_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            enabled: SUPPORTED_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                "target/".to_string(),
                "node_modules/".to_string(),
                "vendor/".to_string(),
                "__pycache__/".to_string(),
                ".git/".to_string(),
                ".venv/".to_string(),
                "**/testdata/**".to_string(),
                DB_FILE.to_string(),
                format!("{DB_FILE}-wal"),
                format!("{DB_FILE}-shm"),
            ],
            include: vec![],
            workers: 0,
            channel_capacity: 256,
            watch: false,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            impact_depth: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .symgraph.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_FILE);

        if !config_path.exists() {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE, project_dir.as_ref().display());
            return Self::default();
        }

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {}", config_path.display(), e);
                Self::default()
            }
        }
    }

    /// Worker count with the 0 = auto rule applied
    pub fn worker_count(&self) -> usize {
        if self.indexing.workers > 0 {
            return self.indexing.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8)
    }

    /// Check if a file path should be indexed based on include/exclude patterns
    pub fn should_index_file(&self, file_path: &str) -> bool {
        // Check exclude patterns first
        for pattern in &self.indexing.exclude {
            if self.matches_pattern(file_path, pattern) {
                return false;
            }
        }

        // If include patterns are specified, file must match at least one
        if !self.indexing.include.is_empty() {
            return self
                .indexing
                .include
                .iter()
                .any(|pattern| self.matches_pattern(file_path, pattern));
        }

        true
    }

    /// Whether a directory (relative path, no trailing slash) is excluded.
    /// Used to prune the walk before descending.
    pub fn is_excluded_dir(&self, dir_path: &str) -> bool {
        let with_slash = format!("{}/", dir_path.trim_end_matches('/'));
        self.indexing.exclude.iter().any(|pattern| {
            (pattern.ends_with('/') || pattern.contains("**"))
                && self.matches_pattern(&with_slash, pattern)
        })
    }

    /// Simple glob-style pattern matching
    fn matches_pattern(&self, file_path: &str, pattern: &str) -> bool {
        if let Some(dir) = pattern.strip_suffix('/') {
            // Directory pattern, matched at any depth
            file_path.starts_with(pattern) || file_path.contains(&format!("/{dir}/"))
        } else if let Some(inner) = pattern
            .strip_prefix("**/")
            .and_then(|p| p.strip_suffix("/**"))
        {
            // Recursive directory pattern like **/testdata/**
            file_path.starts_with(&format!("{inner}/")) || file_path.contains(&format!("/{inner}/"))
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            // Suffix pattern like *.pb.go or *_test.py
            file_path.ends_with(suffix)
        } else {
            // Exact file name or path
            file_path == pattern || file_path.ends_with(&format!("/{pattern}"))
        }
    }

    /// Get enabled languages, filtered by what's actually supported
    pub fn enabled_languages(&self) -> Vec<String> {
        self.languages
            .enabled
            .iter()
            .filter(|lang| SUPPORTED_LANGUAGES.contains(&lang.as_str()))
            .cloned()
            .collect()
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        for lang in &self.languages.enabled {
            if !SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                return Err(anyhow::anyhow!("Unsupported language: {}", lang));
            }
        }

        if self.indexing.channel_capacity == 0 {
            return Err(anyhow::anyhow!("Channel capacity must be greater than 0"));
        }

        if self.analysis.max_depth == 0 {
            return Err(anyhow::anyhow!("Analysis max depth must be greater than 0"));
        }
        if self.analysis.impact_depth == 0 {
            return Err(anyhow::anyhow!("Impact depth must be greater than 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.languages.enabled.contains(&"go".to_string()));
        assert!(config.indexing.exclude.contains(&"target/".to_string()));
        assert_eq!(config.analysis.max_depth, 5);
        assert_eq!(config.analysis.impact_depth, 3);
        assert!(config.worker_count() >= 1 && config.worker_count() <= 8);
    }

    #[test]
    fn test_should_index_file() {
        let config = Config::default();

        assert!(config.should_index_file("src/main.rs"));
        assert!(config.should_index_file("lib/utils.py"));

        assert!(!config.should_index_file("target/debug/build.rs"));
        assert!(!config.should_index_file("web/node_modules/pkg/index.py"));
        assert!(!config.should_index_file("pkg/testdata/fixture.go"));
        assert!(!config.should_index_file(".symgraph.db"));
    }

    #[test]
    fn test_pattern_matching() {
        let config = Config::default();

        assert!(config.matches_pattern("target/debug/file", "target/"));
        assert!(config.matches_pattern("src/target/file", "target/"));
        assert!(!config.matches_pattern("src/targets.rs", "target/"));

        assert!(config.matches_pattern("api/v1.pb.go", "*.pb.go"));
        assert!(!config.matches_pattern("api/v1.go", "*.pb.go"));

        assert!(config.matches_pattern("a/testdata/x.go", "**/testdata/**"));
        assert!(config.matches_pattern("gen.go", "gen.go"));
        assert!(config.matches_pattern("cmd/gen.go", "gen.go"));
    }

    #[test]
    fn test_excluded_dirs_prune_the_walk() {
        let config = Config::default();

        assert!(config.is_excluded_dir("target"));
        assert!(config.is_excluded_dir("frontend/node_modules"));
        assert!(config.is_excluded_dir("pkg/testdata"));
        assert!(!config.is_excluded_dir("src"));
    }

    #[test]
    fn test_include_patterns_restrict() {
        let mut config = Config::default();
        config.indexing.include = vec!["src/".to_string()];

        assert!(config.should_index_file("src/lib.rs"));
        assert!(!config.should_index_file("scripts/build.py"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.languages.enabled = vec!["cobol".to_string()];
        assert!(config.validate().is_err());
        config.languages.enabled = vec!["python".to_string()];

        config.indexing.channel_capacity = 0;
        assert!(config.validate().is_err());
        config.indexing.channel_capacity = 16;

        config.analysis.max_depth = 0;
        assert!(config.validate().is_err());
        config.analysis.max_depth = 5;

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[indexing]\nworkers = 2\n\n[analysis]\nmax_depth = 7\n",
        )
        .unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.indexing.workers, 2);
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.analysis.max_depth, 7);
        assert_eq!(config.analysis.impact_depth, 3);
        assert_eq!(config.indexing.channel_capacity, 256);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[logging]\nlevel = \"loud\"\n").unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.logging.level, "info");
    }
}
