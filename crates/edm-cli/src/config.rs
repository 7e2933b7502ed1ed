//! Configuration loading and management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeDelta};
use edm_core::{AssetId, DEFAULT_WORKERS, PoolConfig, SourceId, SourceProfile, SourceRegistry};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sources processed concurrently.
    pub workers: usize,
    /// First day of every calendar.
    pub summary_start: NaiveDate,
    /// Days before the newest poll to report when no start day is given.
    pub include_days: u32,
    /// Days without a poll before an asset is stopped. Zero disables.
    pub silence_gap_days: u32,
    /// Strategy and validity window per source.
    #[serde(default)]
    pub sources: BTreeMap<SourceId, SourceProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            summary_start: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap_or_default(),
            include_days: 3,
            silence_gap_days: 21,
            sources: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // EDM_WORKERS, EDM_SUMMARY_START, ...
        figment = figment.merge(Env::prefixed("EDM_"));

        figment.extract()
    }

    /// The interpreter registry described by `sources`.
    pub fn registry(&self) -> SourceRegistry {
        self.sources
            .iter()
            .map(|(source_id, profile)| (source_id.clone(), *profile))
            .collect()
    }

    pub fn silence_gap(&self) -> Option<TimeDelta> {
        (self.silence_gap_days > 0).then(|| TimeDelta::days(i64::from(self.silence_gap_days)))
    }

    pub fn pool_config(&self, asset_filter: Option<AssetId>) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            asset_filter,
            silence_gap: self.silence_gap(),
        }
    }
}

/// Returns the platform-specific config directory for edm.
///
/// On Linux: `~/.config/edm`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("edm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use edm_core::Strategy;

    #[test]
    fn test_dirs_config_path_ends_with_edm() {
        let path = dirs_config_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "edm");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workers, 5);
        assert_eq!(config.summary_start, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(config.include_days, 3);
        assert_eq!(config.silence_gap(), Some(TimeDelta::days(21)));
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_load_sources_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("edm.toml");
        std::fs::write(
            &path,
            r#"
workers = 2
silence_gap_days = 0

[sources.anglian]
strategy = "type-1"

[sources.southern]
strategy = "type-2"
valid_from = "2024-12-20T00:00:00Z"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.silence_gap(), None);
        assert_eq!(config.include_days, 3);

        let southern = SourceId::new("southern").unwrap();
        assert_eq!(
            config.sources[&southern],
            SourceProfile::new(Strategy::Type2)
                .valid_from(Utc.with_ymd_and_hms(2024, 12, 20, 0, 0, 0).unwrap())
        );

        let registry = config.registry();
        let profile = registry.profile(&southern).unwrap();
        assert_eq!(profile.strategy, Strategy::Type2);
        assert!(registry.profile(&SourceId::new("anglian").unwrap()).is_some());
    }

    #[test]
    fn test_pool_config_carries_filter() {
        let config = Config::default();
        let asset = AssetId::new("TH-1").unwrap();
        let pool = config.pool_config(Some(asset.clone()));
        assert_eq!(pool.workers, 5);
        assert_eq!(pool.asset_filter, Some(asset));
        assert_eq!(pool.silence_gap, Some(TimeDelta::days(21)));
    }
}
