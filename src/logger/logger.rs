use super::error::LoggerError;
use super::field::{Field, FieldList};
use super::format::{Caller, LineFormat};
use super::level::{AtomicLevel, Level};
use super::sink::{ConsoleSink, ConsoleTarget, FileRotation, FileSink, LevelGate};
use crate::settings::Log;
use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Dispatch;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;

struct Shared {
    dispatch: Dispatch,
    level: AtomicLevel,
    console: ConsoleSink,
    file: Option<FileSink>,
}

/// Leveled logger writing to the console and, optionally, a file.
///
/// Clones and loggers derived through [`Logger::with`] share the threshold,
/// the sinks and the file handle.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    fields: Arc<[Field]>,
}

impl Logger {
    /// Builds a logger at `level`. An empty `output_path` logs to the
    /// console only; an empty `log_file_name` means `app.log`.
    pub fn new(
        level: &str,
        output_path: impl AsRef<Path>,
        log_file_name: &str,
    ) -> Result<Self, LoggerError> {
        LoggerBuilder::new()
            .level(level)
            .output_path(output_path)
            .log_file_name(log_file_name)
            .build()
    }

    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    pub fn from_settings(settings: &Log) -> Result<Self, LoggerError> {
        let mut builder = LoggerBuilder::new()
            .level(settings.level.as_str())
            .rotation(settings.rotation)
            .console(settings.console);
        if let Some(path) = &settings.output_path {
            builder = builder.output_path(path);
        }
        if let Some(name) = &settings.log_file_name {
            builder = builder.log_file_name(name.as_str());
        }
        builder.build()
    }

    pub fn level(&self) -> Level {
        self.shared.level.get()
    }

    pub fn set_level(&self, level: Level) {
        self.shared.level.set(level);
    }

    /// Handle to the threshold, shared with this logger.
    pub fn atomic_level(&self) -> AtomicLevel {
        self.shared.level.clone()
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.shared.level.enabled(level)
    }

    /// Path of the file sink, if one was configured.
    ///
    /// With a rotation schedule other than [`FileRotation::Never`] this is
    /// the prefix of the rotated files, which are named `<path>.<date>`; no
    /// file exists at the returned path itself.
    pub fn file_path(&self) -> Option<&Path> {
        self.shared.file.as_ref().map(FileSink::path)
    }

    /// A logger carrying `fields` on every record, in addition to the
    /// fields already attached to `self`.
    pub fn with(&self, fields: &[Field]) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
            fields: self.fields.iter().chain(fields).cloned().collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[track_caller]
    pub fn debug(&self, message: &str, fields: &[Field]) {
        self.log(Level::Debug, Location::caller(), format_args!("{message}"), fields);
    }

    #[track_caller]
    pub fn info(&self, message: &str, fields: &[Field]) {
        self.log(Level::Info, Location::caller(), format_args!("{message}"), fields);
    }

    #[track_caller]
    pub fn warn(&self, message: &str, fields: &[Field]) {
        self.log(Level::Warn, Location::caller(), format_args!("{message}"), fields);
    }

    #[track_caller]
    pub fn error(&self, message: &str, fields: &[Field]) {
        self.log(Level::Error, Location::caller(), format_args!("{message}"), fields);
    }

    /// Logs at `DPanic`, then panics in debug builds.
    #[track_caller]
    pub fn dpanic(&self, message: &str, fields: &[Field]) {
        self.log(Level::DPanic, Location::caller(), format_args!("{message}"), fields);
        if cfg!(debug_assertions) {
            let _ = self.sync();
            panic!("{message}");
        }
    }

    /// Logs at `Panic`, flushes, then panics with `message`.
    #[track_caller]
    pub fn panic(&self, message: &str, fields: &[Field]) -> ! {
        self.log(Level::Panic, Location::caller(), format_args!("{message}"), fields);
        let _ = self.sync();
        panic!("{message}");
    }

    /// Logs at `Fatal`, flushes, then exits the process with status 1.
    #[track_caller]
    pub fn fatal(&self, message: &str, fields: &[Field]) -> ! {
        self.log(Level::Fatal, Location::caller(), format_args!("{message}"), fields);
        let _ = self.sync();
        std::process::exit(1);
    }

    fn log(
        &self,
        level: Level,
        location: &'static Location<'static>,
        message: fmt::Arguments<'_>,
        fields: &[Field],
    ) {
        if !self.enabled(level) {
            return;
        }
        let caller = Caller::new(location);
        let fields = FieldList {
            persistent: &self.fields,
            call: fields,
        };
        let severity = level.label();

        tracing::dispatcher::with_default(&self.shared.dispatch, || match level {
            Level::Debug => tracing::event!(
                tracing::Level::DEBUG,
                severity,
                caller = %caller,
                fields = %fields,
                "{}",
                message
            ),
            Level::Info => tracing::event!(
                tracing::Level::INFO,
                severity,
                caller = %caller,
                fields = %fields,
                "{}",
                message
            ),
            Level::Warn => tracing::event!(
                tracing::Level::WARN,
                severity,
                caller = %caller,
                fields = %fields,
                "{}",
                message
            ),
            Level::Error | Level::DPanic | Level::Panic | Level::Fatal => tracing::event!(
                tracing::Level::ERROR,
                severity,
                caller = %caller,
                fields = %fields,
                "{}",
                message
            ),
        });
    }

    /// Flushes the console and the file sink. Both are flushed even if the
    /// first one fails; the first failure is returned.
    pub fn sync(&self) -> Result<(), LoggerError> {
        let console = self.shared.console.flush();
        let file = self.shared.file.as_ref().map_or(Ok(()), FileSink::sync);
        console.and(file).map_err(LoggerError::Flush)
    }

    /// Flushes the console, then syncs and releases the file handle.
    ///
    /// The file is closed even when the console flush fails. A file close
    /// failure is returned as [`LoggerError::Close`] and takes precedence.
    /// Otherwise a console flush failure is returned as
    /// [`LoggerError::Flush`], so a console-only logger can fail to close
    /// when its stream is broken. Closing again does not touch the file.
    pub fn close(&self) -> Result<(), LoggerError> {
        let flushed = self.shared.console.flush().map_err(LoggerError::Flush);
        if let Some(file) = &self.shared.file {
            file.close().map_err(LoggerError::Close)?;
        }
        flushed
    }

    /// The backend dispatcher feeding both sinks.
    pub fn dispatch(&self) -> &Dispatch {
        &self.shared.dispatch
    }

    /// Runs `f` with this logger's sinks as the thread's default
    /// subscriber, so the `tracing` macros reach them too.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.shared.dispatch, f)
    }

    pub fn sugar(&self) -> SugaredLogger {
        SugaredLogger {
            logger: self.clone(),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("file", &self.file_path())
            .field("fields", &self.fields)
            .finish()
    }
}

/// Logger taking preformatted arguments, e.g.
/// `logger.sugar().infof(format_args!("listening on {addr}"))`.
#[derive(Debug, Clone)]
pub struct SugaredLogger {
    logger: Logger,
}

impl SugaredLogger {
    pub fn desugar(self) -> Logger {
        self.logger
    }

    pub fn with(&self, fields: &[Field]) -> SugaredLogger {
        self.logger.with(fields).sugar()
    }

    #[track_caller]
    pub fn debugf(&self, args: fmt::Arguments<'_>) {
        self.logger.log(Level::Debug, Location::caller(), args, &[]);
    }

    #[track_caller]
    pub fn infof(&self, args: fmt::Arguments<'_>) {
        self.logger.log(Level::Info, Location::caller(), args, &[]);
    }

    #[track_caller]
    pub fn warnf(&self, args: fmt::Arguments<'_>) {
        self.logger.log(Level::Warn, Location::caller(), args, &[]);
    }

    #[track_caller]
    pub fn errorf(&self, args: fmt::Arguments<'_>) {
        self.logger.log(Level::Error, Location::caller(), args, &[]);
    }

    #[track_caller]
    pub fn panicf(&self, args: fmt::Arguments<'_>) -> ! {
        self.logger.log(Level::Panic, Location::caller(), args, &[]);
        let _ = self.logger.sync();
        panic!("{args}");
    }

    #[track_caller]
    pub fn fatalf(&self, args: fmt::Arguments<'_>) -> ! {
        self.logger.log(Level::Fatal, Location::caller(), args, &[]);
        let _ = self.logger.sync();
        std::process::exit(1);
    }
}

pub struct LoggerBuilder {
    level: String,
    output_path: Option<PathBuf>,
    log_file_name: String,
    rotation: FileRotation,
    console: ConsoleTarget,
    console_writer: Option<BoxMakeWriter>,
    ansi: Option<bool>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            level: Level::default().to_string(),
            output_path: None,
            log_file_name: String::new(),
            rotation: FileRotation::default(),
            console: ConsoleTarget::default(),
            console_writer: None,
            ansi: None,
        }
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Directory of the file sink; an empty path disables it.
    pub fn output_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.output_path = (!path.as_os_str().is_empty()).then(|| path.to_path_buf());
        self
    }

    pub fn log_file_name(mut self, name: impl Into<String>) -> Self {
        self.log_file_name = name.into();
        self
    }

    pub fn rotation(mut self, rotation: FileRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn console(mut self, target: ConsoleTarget) -> Self {
        self.console = target;
        self
    }

    /// Sends console output to `writer` instead of stdout/stderr.
    pub fn console_writer<W>(mut self, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        self.console_writer = Some(BoxMakeWriter::new(writer));
        self
    }

    /// Forces colored console levels on or off. By default they are on
    /// when the console stream is a terminal.
    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = Some(ansi);
        self
    }

    pub fn build(self) -> Result<Logger, LoggerError> {
        let level = AtomicLevel::new(self.level.parse::<Level>()?);

        let file = match &self.output_path {
            Some(dir) => Some(FileSink::open(dir, &self.log_file_name, self.rotation)?),
            None => None,
        };

        let ansi = self
            .ansi
            .unwrap_or_else(|| self.console_writer.is_none() && self.console.is_terminal());
        let console = ConsoleSink::new(
            self.console_writer
                .unwrap_or_else(|| self.console.writer()),
        );

        let gate = LevelGate::new(level.clone());
        let console_layer = tracing_subscriber::fmt::layer()
            .event_format(LineFormat)
            .with_ansi(ansi)
            .with_writer(console.clone())
            .with_filter(gate.clone());
        let file_layer = file.clone().map(|file| {
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_ansi(false)
                .with_writer(file)
                .with_filter(gate)
        });
        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        Ok(Logger {
            shared: Arc::new(Shared {
                dispatch: Dispatch::new(subscriber),
                level,
                console,
                file,
            }),
            fields: Arc::from(Vec::new()),
        })
    }
}
