//! Configuration for the sync layer
//!
//! Durations are stored as milliseconds so a config round-trips through
//! TOML; use the accessor methods to get [`Duration`] values.

use std::path::Path;
use std::time::Duration;

use quire_core::WriteKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating a [`SyncConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Preset configurations for common use cases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Balanced defaults for general use
    #[default]
    Default,
    /// Small batches flushed quickly, for UI-driven interactions
    /// - Debounce 500ms
    /// - Cool-down 250ms
    Interactive,
    /// Large batches, fewer transactions, for imports and backfills
    /// - Thresholds x4
    /// - Debounce 10s
    Bulk,
}

impl Preset {
    /// Get the event channel capacity for this preset
    pub fn event_channel_capacity(&self) -> usize {
        match self {
            Preset::Default => 256,
            Preset::Interactive => 256,
            Preset::Bulk => 1024,
        }
    }

    /// Build a full config for this preset
    pub fn config(&self) -> SyncConfig {
        let base = SyncConfig {
            event_channel_capacity: self.event_channel_capacity(),
            ..SyncConfig::default()
        };
        match self {
            Preset::Default => base,
            Preset::Interactive => {
                let mut config = base.with_cool_down(Duration::from_millis(250));
                for kind in WriteKind::ALL {
                    let current = config.accumulators.get(kind);
                    config = config.with_accumulator(
                        kind,
                        AccumulatorConfig::new(current.threshold, 500),
                    );
                }
                config
            }
            Preset::Bulk => {
                let mut config = base;
                for kind in WriteKind::ALL {
                    let current = config.accumulators.get(kind);
                    config = config.with_accumulator(
                        kind,
                        AccumulatorConfig::new(current.threshold * 4, 10_000),
                    );
                }
                config
            }
        }
    }
}

/// Size and time thresholds for one accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// Pending count that triggers an immediate flush
    pub threshold: usize,
    /// Quiet period after the last add before a flush
    pub debounce_ms: u64,
}

impl AccumulatorConfig {
    pub const fn new(threshold: usize, debounce_ms: u64) -> Self {
        Self {
            threshold,
            debounce_ms,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Per-kind accumulator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorSet {
    pub generic: AccumulatorConfig,
    pub like: AccumulatorConfig,
    pub bookmark: AccumulatorConfig,
    pub repost: AccumulatorConfig,
    pub unified: AccumulatorConfig,
}

impl Default for AccumulatorSet {
    fn default() -> Self {
        Self {
            generic: AccumulatorConfig::new(20, 2_000),
            like: AccumulatorConfig::new(25, 2_000),
            bookmark: AccumulatorConfig::new(15, 2_000),
            repost: AccumulatorConfig::new(10, 3_000),
            unified: AccumulatorConfig::new(30, 1_500),
        }
    }
}

impl AccumulatorSet {
    /// Settings for `kind`
    pub fn get(&self, kind: WriteKind) -> AccumulatorConfig {
        match kind {
            WriteKind::Generic => self.generic,
            WriteKind::Like => self.like,
            WriteKind::Bookmark => self.bookmark,
            WriteKind::Repost => self.repost,
            WriteKind::Unified => self.unified,
        }
    }

    fn get_mut(&mut self, kind: WriteKind) -> &mut AccumulatorConfig {
        match kind {
            WriteKind::Generic => &mut self.generic,
            WriteKind::Like => &mut self.like,
            WriteKind::Bookmark => &mut self.bookmark,
            WriteKind::Repost => &mut self.repost,
            WriteKind::Unified => &mut self.unified,
        }
    }
}

/// Configuration for [`SyncLayer`](crate::SyncLayer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between two writes of the same signer
    pub cool_down_ms: u64,
    /// How long a fan-out read result stays fresh
    pub cache_ttl_ms: u64,
    /// Storage key of the publisher registry
    pub registry_key: String,
    /// Drop publishers idle for longer than this when loading
    pub registry_max_age_ms: Option<u64>,
    /// Capacity of the write event broadcast channel
    pub event_channel_capacity: usize,
    /// Route same-publisher entries of different classes into one transaction
    pub unified_routing: bool,
    /// Per-kind batching thresholds
    pub accumulators: AccumulatorSet,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cool_down_ms: 500,
            cache_ttl_ms: 30_000,
            registry_key: "quire.publishers".to_string(),
            registry_max_age_ms: None,
            event_channel_capacity: 256,
            unified_routing: true,
            accumulators: AccumulatorSet::default(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration from a preset
    pub fn with_preset(preset: Preset) -> Self {
        preset.config()
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in WriteKind::ALL {
            if self.accumulators.get(kind).threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} accumulator threshold must be at least 1",
                    kind
                )));
            }
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        if self.registry_key.is_empty() {
            return Err(ConfigError::Invalid("registry_key must not be empty".into()));
        }
        Ok(())
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn registry_max_age(&self) -> Option<Duration> {
        self.registry_max_age_ms.map(Duration::from_millis)
    }

    /// Set the inter-write cool-down
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down_ms = saturating_millis(cool_down);
        self
    }

    /// Set the read cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = saturating_millis(ttl);
        self
    }

    /// Set the storage key of the publisher registry
    pub fn with_registry_key(mut self, key: impl Into<String>) -> Self {
        self.registry_key = key.into();
        self
    }

    /// Enable age-based registry cleanup at load
    pub fn with_registry_max_age(mut self, max_age: Duration) -> Self {
        self.registry_max_age_ms = Some(saturating_millis(max_age));
        self
    }

    /// Set the write event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Enable or disable unified routing
    pub fn with_unified_routing(mut self, enabled: bool) -> Self {
        self.unified_routing = enabled;
        self
    }

    /// Override the thresholds of one accumulator
    pub fn with_accumulator(mut self, kind: WriteKind, config: AccumulatorConfig) -> Self {
        *self.accumulators.get_mut(kind) = config;
        self
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.cool_down(), Duration::from_millis(500));
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.registry_key, "quire.publishers");
        assert!(config.registry_max_age().is_none());

        let accumulators = &config.accumulators;
        assert_eq!(accumulators.get(WriteKind::Generic), AccumulatorConfig::new(20, 2_000));
        assert_eq!(accumulators.get(WriteKind::Like), AccumulatorConfig::new(25, 2_000));
        assert_eq!(accumulators.get(WriteKind::Bookmark), AccumulatorConfig::new(15, 2_000));
        assert_eq!(accumulators.get(WriteKind::Repost), AccumulatorConfig::new(10, 3_000));
        assert_eq!(accumulators.get(WriteKind::Unified), AccumulatorConfig::new(30, 1_500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            cool_down_ms = 100
            registry_max_age_ms = 86400000

            [accumulators.like]
            threshold = 5
            debounce_ms = 750
            "#,
        )
        .unwrap();

        assert_eq!(config.cool_down(), Duration::from_millis(100));
        assert_eq!(config.registry_max_age(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.accumulators.like, AccumulatorConfig::new(5, 750));
        assert_eq!(config.accumulators.repost, AccumulatorConfig::new(10, 3_000));
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let result = SyncConfig::from_toml_str(
            r#"
            [accumulators.bookmark]
            threshold = 0
            debounce_ms = 100
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("quire.toml");
        let written = SyncConfig::default().with_registry_key("custom.key");
        std::fs::write(&path, toml::to_string_pretty(&written).unwrap()).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, written);

        let missing = SyncConfig::load(temp_dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_duration_builders_saturate() {
        let config = SyncConfig::default()
            .with_cool_down(Duration::from_millis(1_250))
            .with_cache_ttl(Duration::MAX)
            .with_registry_max_age(Duration::MAX);
        assert_eq!(config.cool_down_ms, 1_250);
        assert_eq!(config.cache_ttl_ms, u64::MAX);
        assert_eq!(config.registry_max_age_ms, Some(u64::MAX));
    }

    #[test]
    fn test_presets() {
        let interactive = Preset::Interactive.config();
        assert_eq!(interactive.cool_down(), Duration::from_millis(250));
        assert_eq!(interactive.accumulators.like.debounce(), Duration::from_millis(500));
        assert_eq!(interactive.accumulators.like.threshold, 25);

        let bulk = SyncConfig::with_preset(Preset::Bulk);
        assert_eq!(bulk.accumulators.repost.threshold, 40);
        assert_eq!(bulk.event_channel_capacity, 1024);

        assert_eq!(Preset::default().config(), SyncConfig::default());
    }
}
