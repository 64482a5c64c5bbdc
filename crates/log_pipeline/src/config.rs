//! Declarative logger configuration.
//!
//! A [`Config`] is usually deserialized from the application configuration:
//!
//! ```
//! use log_pipeline::Config;
//!
//! let config: Config = serde_json::from_str(
//!     r#"{
//!         "level": "debug",
//!         "formatter": {"format": "google", "data": {"service": "api", "version": "1.2.0"}},
//!         "addCaller": true,
//!         "contextGroup": "ctx",
//!         "localLogger": true
//!     }"#,
//! )?;
//! let components = config.init()?;
//! components.logger.info(&log_pipeline::Context::new(), "configured", Vec::new());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{num::NonZeroUsize, sync::Arc};

use serde::Deserialize;
use tracing::Subscriber;
use tracing_appender::{non_blocking::WorkerGuard, rolling::Rotation};
use tracing_subscriber::{
    filter::{Filtered, LevelFilter},
    fmt::writer::BoxMakeWriter,
    registry::LookupSpan,
    EnvFilter, Layer,
};

use crate::{
    attr::{Attr, Value},
    handler::{
        cloud::{self, ServiceContext},
        json::JsonHandler,
        text::TextHandler,
        zitadel::ZitadelHandler,
        Chain, Handler, HandlerOptions,
    },
    keys,
    layer::HandlerLayer,
    level::Level,
    logger::{set_default, Logger},
    LoggerError,
};

/// Comprehensive configuration of a logger.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Minimum level, e.g. `debug` or `warning`. Empty means `info`.
    pub level: String,

    /// Output format and its static data.
    pub formatter: FormatterConfig,

    /// Whether the `source` location of the call is written.
    pub add_source: bool,

    /// Whether the caller stage runs, adding `caller` and, for errors, `stack_trace`.
    pub add_caller: bool,

    /// Group under which the context data of a record is written. `None` disables the
    /// context-data stage, an empty group inlines the fields.
    pub context_group: Option<String>,

    /// If `true`, [`Config::init`] does not replace the default logger.
    pub local_logger: bool,

    /// Where records are written.
    pub output: OutputConfig,

    /// [`EnvFilter`] directive (e.g., `"info,my_crate=debug"`) of the layer built by
    /// [`Config::tracing_layer`].
    pub filtering_directive: Option<String>,

    /// Specifies where to print the effective filtering directive of the `tracing` layer.
    pub print_filtering_directive: DirectivePrintTarget,
}

/// Selects the encoder and carries its static data.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    /// One of `text` (the default when empty), `json`, `google` or `zitadel`.
    pub format: String,

    /// Static data of the encoder.
    ///
    /// For `text` and `json` every entry is added to each record. For `google`, `service` and
    /// `version` build the service context. For `zitadel`, `service`, `version` and `process`
    /// describe the service and all other entries become static dynamic fields.
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// The supported encoders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// `key=value` text.
    Text,
    /// One JSON object per line.
    Json,
    /// Google Cloud Logging JSON.
    Google,
    /// Zitadel access records.
    Zitadel,
}

impl TryFrom<&str> for Format {
    type Error = LoggerError;

    fn try_from(format: &str) -> Result<Self, Self::Error> {
        match format {
            "" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "google" => Ok(Self::Google),
            "zitadel" => Ok(Self::Zitadel),
            other => Err(LoggerError::Configuration(format!(
                "{other} formatter not supported"
            ))),
        }
    }
}

impl TryFrom<String> for Format {
    type Error = LoggerError;

    fn try_from(format: String) -> Result<Self, Self::Error> {
        Self::try_from(format.as_str())
    }
}

/// Destination of the encoded records.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    /// Standard error.
    #[default]
    Stderr,

    /// Standard output.
    Stdout,

    /// Rolling log files, written through a non-blocking worker.
    File(FileOutputConfig),
}

/// Configuration for file output.
#[derive(Clone, Debug, Deserialize)]
pub struct FileOutputConfig {
    /// Directory where log files will be stored.
    pub directory: String,

    /// Prefix for log file names.
    pub file_name_prefix: String,

    /// Rotation strategy for log files.
    #[serde(default)]
    pub rotation: FileRotation,

    /// Maximum number of log files to keep. If `None`, all files are kept.
    #[serde(default)]
    pub max_log_files: Option<NonZeroUsize>,
}

/// How often a new log file is started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRotation {
    /// Every minute.
    Minutely,
    /// Every hour.
    Hourly,
    /// Every day.
    #[default]
    Daily,
    /// Never.
    Never,
}

impl From<FileRotation> for Rotation {
    fn from(rotation: FileRotation) -> Self {
        match rotation {
            FileRotation::Minutely => Self::MINUTELY,
            FileRotation::Hourly => Self::HOURLY,
            FileRotation::Daily => Self::DAILY,
            FileRotation::Never => Self::NEVER,
        }
    }
}

/// Specifies where (if at all) to print the effective filtering directive during setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectivePrintTarget {
    /// Print to standard output.
    Stdout,

    /// Print to standard error.
    Stderr,

    /// Do not print the directive.
    #[default]
    None,
}

/// The logger built from a [`Config`] and the worker guards of its output.
///
/// Records are written as long as the guards are in scope.
#[derive(Debug)]
pub struct LoggingComponents {
    /// The configured logger.
    pub logger: Logger,

    /// Worker guards of non-blocking outputs.
    pub guards: Vec<WorkerGuard>,
}

impl OutputConfig {
    fn make_writer(&self, guards: &mut Vec<WorkerGuard>) -> Result<BoxMakeWriter, LoggerError> {
        match self {
            Self::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
            Self::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
            Self::File(file_config) => {
                let mut file_appender_builder =
                    tracing_appender::rolling::RollingFileAppender::builder()
                        .rotation(file_config.rotation.into())
                        .filename_prefix(file_config.file_name_prefix.as_str());

                if let Some(max_log_files) = file_config.max_log_files {
                    file_appender_builder =
                        file_appender_builder.max_log_files(usize::from(max_log_files));
                }

                let file_appender = file_appender_builder.build(&file_config.directory)?;
                let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
                guards.push(guard);
                Ok(BoxMakeWriter::new(non_blocking_appender))
            }
        }
    }
}

impl Config {
    /// Constructs the logger described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError`] for an unknown level or format, a reserved key in the static
    /// data of the `text` or `json` format, or a failure to set up the file output.
    pub fn build(&self) -> Result<LoggingComponents, LoggerError> {
        let level: Level = self.level.parse()?;
        let format = Format::try_from(self.formatter.format.as_str())?;
        let data = &self.formatter.data;

        let mut guards = Vec::new();
        let dst_writer = self.output.make_writer(&mut guards)?;
        let options = HandlerOptions::default()
            .with_level(level)
            .with_source(self.add_source);

        let terminal: Arc<dyn Handler> = match format {
            Format::Text => with_static_fields(TextHandler::new(dst_writer, options), data)?,
            Format::Json => with_static_fields(JsonHandler::new(dst_writer, options), data)?,
            Format::Google => Arc::new(cloud::handler(
                dst_writer,
                options,
                ServiceContext::from_data(data),
            )),
            Format::Zitadel => Arc::new(ZitadelHandler::from_data(dst_writer, options, data)),
        };

        let mut chain = Chain::from_handler(terminal);
        if let Some(group) = &self.context_group {
            chain = chain.context_data(group.as_str());
        }
        if self.add_caller {
            chain = chain.caller_and_stack();
        }

        Ok(LoggingComponents {
            logger: chain.into_logger(),
            guards,
        })
    }

    /// Like [`Config::build`], and installs the logger as the default logger unless
    /// `local_logger` is set.
    ///
    /// # Errors
    ///
    /// See [`Config::build`].
    pub fn init(&self) -> Result<LoggingComponents, LoggerError> {
        let components = self.build()?;
        if !self.local_logger {
            set_default(components.logger.clone());
        }
        Ok(components)
    }

    /// Creates a [`HandlerLayer`] forwarding `tracing` events to `logger`, filtered with the
    /// configured level and filtering directive.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError`] for an unknown level or an invalid filtering directive.
    pub fn tracing_layer<S>(
        &self,
        logger: Logger,
    ) -> Result<Filtered<HandlerLayer, EnvFilter, S>, LoggerError>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let level: Level = self.level.parse()?;
        let filter_directive = self.filtering_directive.as_deref().unwrap_or_default(); // Using an empty string causes it to use the default directive

        match self.print_filtering_directive {
            #[allow(clippy::print_stdout)]
            DirectivePrintTarget::Stdout => {
                println!(
                    "[INFO] {}: Using filtering directive: {filter_directive}",
                    env!("CARGO_PKG_NAME")
                );
            }
            #[allow(clippy::print_stderr)]
            DirectivePrintTarget::Stderr => {
                eprintln!(
                    "[INFO] {}: Using filtering directive: {filter_directive}",
                    env!("CARGO_PKG_NAME")
                );
            }
            DirectivePrintTarget::None => (),
        }

        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(level).into())
            .parse(filter_directive)?;

        Ok(HandlerLayer::new(logger).with_filter(filter))
    }
}

/// Adds the static data to every record written by `handler`.
fn with_static_fields(
    handler: impl Handler + 'static,
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<Arc<dyn Handler>, LoggerError> {
    if let Some(key) = data.keys().find(|key| keys::RESERVED_KEYS.contains(key.as_str())) {
        return Err(LoggerError::Configuration(format!(
            "A reserved key `{key}` was included in the static data of the formatter"
        )));
    }
    if data.is_empty() {
        return Ok(Arc::new(handler));
    }
    let attrs = data
        .iter()
        .map(|(key, value)| Attr::new(key.as_str(), Value::Json(value.clone())))
        .collect();
    Ok(handler.with_attrs(attrs))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(value: serde_json::Value) -> Config {
        serde_json::from_value(value).expect("invalid config")
    }

    #[test]
    fn defaults_to_text_on_stderr_at_info() {
        let config = config(json!({}));
        assert_eq!(
            Format::try_from(config.formatter.format.as_str()).ok(),
            Some(Format::Text)
        );
        assert!(matches!(config.output, OutputConfig::Stderr));

        let components = config.build().expect("build failed");
        assert!(components.logger.enabled(Level::INFO));
        assert!(!components.logger.enabled(Level::DEBUG));
        assert!(components.guards.is_empty());
    }

    #[test]
    fn reads_camel_case_fields() {
        let config = config(json!({
            "level": "Warning",
            "formatter": {"format": "zitadel", "data": {"service": "api", "region": "EU"}},
            "addSource": true,
            "addCaller": true,
            "contextGroup": "ctx",
            "localLogger": true,
            "output": {"kind": "stdout"},
        }));
        assert!(config.add_source && config.add_caller && config.local_logger);
        assert_eq!(config.context_group.as_deref(), Some("ctx"));
        assert!(matches!(config.output, OutputConfig::Stdout));

        let components = config.build().expect("build failed");
        assert!(components.logger.enabled(Level::WARN));
        assert!(!components.logger.enabled(Level::INFO));
    }

    #[test]
    fn reads_file_output() {
        let config = config(json!({
            "output": {
                "kind": "file",
                "directory": "logs",
                "file_name_prefix": "app",
                "rotation": "hourly",
                "max_log_files": 3,
            },
        }));
        let OutputConfig::File(file_config) = config.output else {
            panic!("expected file output");
        };
        assert_eq!(file_config.rotation, FileRotation::Hourly);
        assert_eq!(file_config.max_log_files, NonZeroUsize::new(3));
    }

    #[test]
    fn rejects_unknown_formats_and_levels() {
        let unknown_format = config(json!({"formatter": {"format": "xml"}}));
        assert!(matches!(
            unknown_format.build(),
            Err(LoggerError::Configuration(_))
        ));

        let unknown_level = config(json!({"level": "loud"}));
        assert!(matches!(
            unknown_level.build(),
            Err(LoggerError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_reserved_static_keys() {
        let config = config(json!({"formatter": {"format": "json", "data": {"msg": "x"}}}));
        assert!(matches!(config.build(), Err(LoggerError::Configuration(_))));
    }

    #[test]
    fn local_logger_keeps_the_default() {
        let config = config(json!({"level": "error", "localLogger": true}));
        config.init().expect("init failed");
        assert!(crate::logger::default_logger().enabled(Level::INFO));
    }

    #[test]
    fn invalid_filtering_directive_is_reported() {
        let config = config(json!({"filteringDirective": "my_crate=loudest"}));
        let logger = config.build().expect("build failed").logger;
        let layer = config.tracing_layer::<tracing_subscriber::Registry>(logger);
        assert!(matches!(
            layer,
            Err(LoggerError::InvalidFilteringDirective(_))
        ));
    }
}
