//! Logging configuration
//!
//! A [`LogConfig`] describes three things: how verbose each part of the sync
//! layer is, where output goes, and how much span context rides along with
//! each event. The span context matters more here than in most services: the
//! publisher and schema of an event live on the `flush_group` and
//! `fan_out_read` spans, not on the event itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level for every target (overridden wholesale by `RUST_LOG`)
    pub level: String,
    /// Per-crate level overrides
    pub components: ComponentLevels,
    /// Console output, `None` to disable
    pub console: Option<ConsoleFormat>,
    /// Rolling JSON file output
    pub file: Option<FileConfig>,
    /// Span context attached to JSON events
    pub context: SpanContext,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            components: ComponentLevels::default(),
            console: Some(ConsoleFormat::Json),
            file: None,
            context: SpanContext::default(),
        }
    }
}

impl LogConfig {
    /// Pretty console, sync internals at debug, full span list
    pub fn development() -> Self {
        Self {
            components: ComponentLevels {
                sync: Some("debug".to_string()),
                ..Default::default()
            },
            console: Some(ConsoleFormat::Pretty { ansi: true }),
            context: SpanContext {
                span_list: true,
                location: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// JSON files under `log_dir`, no console, registry chatter muted
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            components: ComponentLevels {
                storage: Some("warn".to_string()),
                ..Default::default()
            },
            console: None,
            file: Some(FileConfig::new(log_dir)),
            ..Default::default()
        }
    }

    /// Compact console at warn, for test binaries
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: Some(ConsoleFormat::Compact),
            ..Default::default()
        }
    }

    /// `EnvFilter` directives: the base level, then component overrides
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        directives.extend(self.components.directives());
        directives.join(",")
    }
}

/// Level overrides for the crates of the sync layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentLevels {
    /// `quire_sync`: accumulators, reader, writer
    pub sync: Option<String>,
    /// `quire_sync::serializer` alone; per-task events are noisy
    pub serializer: Option<String>,
    /// `quire_storage`: registry and stores
    pub storage: Option<String>,
}

impl ComponentLevels {
    fn directives(&self) -> Vec<String> {
        [
            ("quire_sync", &self.sync),
            ("quire_sync::serializer", &self.serializer),
            ("quire_storage", &self.storage),
        ]
        .into_iter()
        .filter_map(|(target, level)| level.as_ref().map(|level| format!("{target}={level}")))
        .collect()
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ConsoleFormat {
    /// One JSON object per line
    Json,
    /// Multi-line human output
    Pretty { ansi: bool },
    /// Single-line human output without colors
    Compact,
}

/// Rolling JSON file output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix, rotation suffixes are appended
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl FileConfig {
    /// Daily `quire-sync` files in `directory`
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            prefix: "quire-sync".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rotation(mut self, rotation: RotationStrategy) -> Self {
        self.rotation = rotation;
        self
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated on start
    Never,
}

/// Span context attached to JSON events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanContext {
    /// Innermost span: the publisher of a flush group or schema of a read
    pub current_span: bool,
    /// Every enclosing span
    pub span_list: bool,
    /// Source file and line
    pub location: bool,
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
}

impl Default for SpanContext {
    fn default() -> Self {
        Self {
            current_span: true,
            span_list: false,
            location: false,
            flatten: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter_directives(), "info");
        assert_eq!(config.console, Some(ConsoleFormat::Json));
        assert!(config.file.is_none());
        assert!(config.context.current_span);
    }

    #[test]
    fn test_presets() {
        let development = LogConfig::development();
        assert_eq!(development.filter_directives(), "info,quire_sync=debug");
        assert_eq!(development.console, Some(ConsoleFormat::Pretty { ansi: true }));
        assert!(development.context.span_list);

        let production = LogConfig::production(PathBuf::from("/var/log/quire"));
        assert!(production.console.is_none());
        assert_eq!(production.filter_directives(), "info,quire_storage=warn");
        let file = production.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/quire"));
        assert_eq!(file.prefix, "quire-sync");

        assert_eq!(LogConfig::testing().filter_directives(), "warn");
    }

    #[test]
    fn test_component_directives_in_fixed_order() {
        let config = LogConfig {
            components: ComponentLevels {
                sync: Some("debug".into()),
                serializer: Some("trace".into()),
                storage: Some("error".into()),
            },
            ..Default::default()
        };
        assert_eq!(
            config.filter_directives(),
            "info,quire_sync=debug,quire_sync::serializer=trace,quire_storage=error"
        );
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(
            r#"{"level": "debug", "console": {"format": "pretty", "ansi": false}}"#,
        )
        .unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.console, Some(ConsoleFormat::Pretty { ansi: false }));
        assert_eq!(config.context, SpanContext::default());
    }
}
