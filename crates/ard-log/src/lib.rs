use std::path::PathBuf;

use chrono::{Datelike, Timelike};
// Re-export logging functions for convenience.
pub use log::*;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use thiserror::Error;

pub const DEFAULT_PATTERN: &str = "{d} {l} {t} - {m}{n}";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Logs below this level are dropped.
    pub filter: LevelFilter,
    /// Directory for timestamped log files. Console only if `None`.
    pub directory: Option<PathBuf>,
    /// `log4rs` pattern used by every appender.
    pub pattern: String,
}

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("unable to open log file: {0}")]
    File(#[from] std::io::Error),
    #[error("invalid logging configuration: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),
    #[error("a logger is already installed: {0}")]
    AlreadyInitialized(#[from] SetLoggerError),
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: LevelFilter::Info,
            directory: Some(PathBuf::from("./logs")),
            pattern: String::from(DEFAULT_PATTERN),
        }
    }
}

impl LogConfig {
    pub fn console(filter: LevelFilter) -> Self {
        Self {
            filter,
            directory: None,
            ..Default::default()
        }
    }
}

/// Initializes logging. Should be called before any other logging functions.
///
/// # Panics
/// - If logging could not be initialized. See [`try_init`].
pub fn init(config: LogConfig) {
    try_init(config).expect("unable to initialize logging");
}

/// Installs a console appender, plus a file appender named after the current time if a directory
/// was given, and routes panics through the logger.
pub fn try_init(config: LogConfig) -> Result<(), LogInitError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(&config.pattern)))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");

    if let Some(directory) = &config.directory {
        let now = chrono::Utc::now();
        let log_file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(&config.pattern)))
            .build(directory.join(format!(
                "{} {} {} {} {} {}.txt",
                now.year(),
                now.month(),
                now.day(),
                now.hour(),
                now.minute(),
                now.second()
            )))?;
        builder = builder.appender(Appender::builder().build("log_file", Box::new(log_file)));
        root = root.appender("log_file");
    }

    let config = builder.build(root.build(config.filter))?;
    log4rs::init_config(config)?;
    log_panics::init();

    Ok(())
}
