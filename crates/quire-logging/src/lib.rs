//! Structured logging setup for the Quire sync layer
//!
//! Wraps `tracing-subscriber` so applications embedding the sync layer get
//! the same output shape everywhere: JSON lines by default, pretty output
//! for development, and optional rolling files via `tracing-appender`.
//!
//! # Quick Start
//!
//! ```ignore
//! use quire_logging::{LogConfig, QuireSubscriberBuilder};
//!
//! // JSON lines to console
//! QuireSubscriberBuilder::new().init();
//!
//! // Serializer internals only, to a daily file
//! QuireSubscriberBuilder::new()
//!     .without_console()
//!     .with_component_level("serializer", "trace")
//!     .with_file_output(FileConfig::new("./logs".into()))
//!     .init();
//!
//! // Human-readable output while developing
//! QuireSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Publisher Spans
//!
//! Work done for a single publisher is wrapped in [`publisher_span`], so
//! every event emitted while flushing a group carries the publisher address.
//!
//! ```ignore
//! use tracing::Instrument;
//!
//! async { tracing::info!("Flushing") }
//!     .instrument(quire_logging::publisher_span(kind, &publisher))
//!     .await;
//! ```

pub mod config;
pub mod context;

pub use config::{
    ComponentLevels, ConsoleFormat, FileConfig, LogConfig, RotationStrategy, SpanContext,
};
pub use context::{fields, publisher_span, read_span, spans};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Builder for configuring and initializing the Quire logging subscriber
pub struct QuireSubscriberBuilder {
    config: LogConfig,
}

impl QuireSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Override the level of one component: `sync`, `serializer` or `storage`
    ///
    /// Unknown component names are ignored.
    pub fn with_component_level(mut self, component: &str, level: impl Into<String>) -> Self {
        let slot = match component {
            "sync" => &mut self.config.components.sync,
            "serializer" => &mut self.config.components.serializer,
            "storage" => &mut self.config.components.storage,
            _ => return self,
        };
        *slot = Some(level.into());
        self
    }

    /// Write console output in `format`
    pub fn with_console(mut self, format: ConsoleFormat) -> Self {
        self.config.console = Some(format);
        self
    }

    pub fn without_console(mut self) -> Self {
        self.config.console = None;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Initialize the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured; it must
    /// be kept alive for buffered lines to reach disk. Failures are reported
    /// on stderr and leave the existing subscriber in place.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }

    /// Initialize the subscriber globally, reporting failures
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter_directives()));

        let (layers, guard) = self.build_layers()?;

        Registry::default()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }

    fn build_layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let context = self.config.context;

        match self.config.console {
            Some(ConsoleFormat::Json) => layers.push(json_layer(context, std::io::stdout)),
            Some(ConsoleFormat::Pretty { ansi }) => layers.push(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(ansi)
                    .with_target(true)
                    .boxed(),
            ),
            Some(ConsoleFormat::Compact) => layers.push(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .boxed(),
            ),
            None => {}
        }

        let mut guard = None;
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = create_file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(json_layer(context, writer));
        }

        Ok((layers, guard))
    }
}

/// JSON lines carrying the span context selected in `context`
fn json_layer<W>(context: SpanContext, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(context.location)
        .with_line_number(context.location)
        .json()
        .with_current_span(context.current_span)
        .with_span_list(context.span_list)
        .flatten_event(context.flatten)
        .boxed()
}

impl Default for QuireSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a single file for `Never`, appends through a rolling appender otherwise
fn create_file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match file_config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&file_config.directory)?;
            let file_path = file_config
                .directory
                .join(format!("{}.log", file_config.prefix));
            let file = File::create(&file_path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::new(rotation, &file_config.directory, &file_config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize with defaults (JSON lines to console)
pub fn init_default() -> Option<WorkerGuard> {
    QuireSubscriberBuilder::new().init()
}

/// Initialize for development (pretty output, debug level)
pub fn init_development() -> Option<WorkerGuard> {
    QuireSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize for tests (compact, warn level)
pub fn init_testing() -> Option<WorkerGuard> {
    QuireSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init()
}
