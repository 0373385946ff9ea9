//! TOML configuration file support.
//!
//! Every table and key is optional; absent values keep their defaults.
//!
//! ```toml
//! [resolution]
//! max_concurrency = 20
//! max_depth = 3
//! blocking_threads = 4
//! s2_search_limit = 5
//! max_rate_limit_retries = 2
//!
//! [scoring]
//! first_author_default = 0.4
//!
//! [rate_limit]
//! enabled = true
//! crossref_per_second = 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Config, RateLimitConfig, ScoringConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// `[resolution]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResolutionSection {
    pub max_concurrency: Option<usize>,
    pub max_depth: Option<u32>,
    pub blocking_threads: Option<usize>,
    pub s2_search_limit: Option<usize>,
    pub max_rate_limit_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub resolution: ResolutionSection,
    pub scoring: Option<ScoringConfig>,
    pub rate_limit: Option<RateLimitConfig>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(file)
    }

    /// Overlay the values present in the file onto `config`.
    pub fn apply(&self, config: &mut Config) {
        let r = &self.resolution;
        if let Some(v) = r.max_concurrency {
            config.max_concurrency = v.max(1);
        }
        if let Some(v) = r.max_depth {
            config.max_depth = v;
        }
        if let Some(v) = r.blocking_threads {
            config.blocking_threads = v.max(1);
        }
        if let Some(v) = r.s2_search_limit {
            config.s2_search_limit = v;
        }
        if let Some(v) = r.max_rate_limit_retries {
            config.max_rate_limit_retries = v;
        }
        if let Some(scoring) = &self.scoring {
            config.scoring = scoring.clone();
        }
        if let Some(rate_limit) = &self.rate_limit {
            config.rate_limit = rate_limit.clone();
        }
    }

    /// Defaults with this file applied.
    pub fn into_config(self) -> Config {
        let mut config = Config::default();
        self.apply(&mut config);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let config = ConfigFile::parse("").unwrap().into_config();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_tables_overlay_defaults() {
        let file = ConfigFile::parse(
            r#"
            [resolution]
            max_concurrency = 20
            blocking_threads = 0

            [scoring]
            first_author_default = 0.4

            [rate_limit]
            enabled = true
            crossref_per_second = 2
            "#,
        )
        .unwrap();
        let config = file.into_config();

        assert_eq!(config.max_concurrency, 20);
        assert_eq!(config.blocking_threads, 1);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.scoring.first_author_default, 0.4);
        assert_eq!(config.scoring.author_match, 0.8);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.crossref_per_second, 2);
        assert_eq!(config.rate_limit.arxiv_interval_secs, 3);
    }

    #[test]
    fn unknown_resolution_key_is_rejected() {
        let err = ConfigFile::parse("[resolution]\nmax_concurrancy = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err =
            ConfigFile::load_from_path(Path::new("/nonexistent/refchain.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/refchain.toml"));
    }

    #[test]
    fn load_from_path_reads_file() {
        let path = std::env::temp_dir()
            .join(format!("refchain-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[resolution]\nmax_depth = 5\n").unwrap();
        let file = ConfigFile::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(file.resolution.max_depth, Some(5));
    }
}
