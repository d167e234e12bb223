//! Output sinks and the threshold gate applied to each of them.

use super::error::LoggerError;
use super::format::SEVERITY_FIELD;
use super::level::{AtomicLevel, Level};
use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::Interest;
use tracing::{Metadata, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Context, Filter};

pub const DEFAULT_LOG_FILE_NAME: &str = "app.log";

/// Per-sink filter backed by the shared threshold.
///
/// The threshold can change at any time, so callsites are never cached as
/// always/never enabled. Thresholds above error have no `tracing`
/// counterpart; under them only facade records, which carry their exact
/// severity and are checked before emission, get through.
#[derive(Debug, Clone)]
pub(crate) struct LevelGate {
    level: AtomicLevel,
}

impl LevelGate {
    pub(crate) fn new(level: AtomicLevel) -> Self {
        Self { level }
    }
}

impl<S: Subscriber> Filter<S> for LevelGate {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        if self.level.get() > Level::Error && meta.fields().field(SEVERITY_FIELD).is_none() {
            return false;
        }
        *meta.level() <= self.level.level_filter()
    }

    fn callsite_enabled(&self, _meta: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        None
    }
}

/// Stream the console sink writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

impl ConsoleTarget {
    pub(crate) fn is_terminal(&self) -> bool {
        match self {
            ConsoleTarget::Stdout => io::stdout().is_terminal(),
            ConsoleTarget::Stderr => io::stderr().is_terminal(),
        }
    }

    pub(crate) fn writer(&self) -> BoxMakeWriter {
        match self {
            ConsoleTarget::Stdout => BoxMakeWriter::new(io::stdout),
            ConsoleTarget::Stderr => BoxMakeWriter::new(io::stderr),
        }
    }
}

/// Console writer shared between the fmt layer and the logger, which
/// needs it again to flush.
#[derive(Clone)]
pub(crate) struct ConsoleSink {
    writer: Arc<BoxMakeWriter>,
}

impl ConsoleSink {
    pub(crate) fn new(writer: BoxMakeWriter) -> Self {
        Self {
            writer: Arc::new(writer),
        }
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        (*self.writer).make_writer().flush()
    }
}

impl<'a> MakeWriter<'a> for ConsoleSink {
    type Writer = Box<dyn Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        (*self.writer).make_writer()
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        (*self.writer).make_writer_for(meta)
    }
}

/// File rotation schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// A single file opened in append mode.
    #[default]
    Never,
    Minutely,
    Hourly,
    Daily,
}

impl FileRotation {
    fn as_rotation(&self) -> Option<Rotation> {
        match self {
            FileRotation::Never => None,
            FileRotation::Minutely => Some(Rotation::MINUTELY),
            FileRotation::Hourly => Some(Rotation::HOURLY),
            FileRotation::Daily => Some(Rotation::DAILY),
        }
    }
}

enum FileTarget {
    Plain(File),
    Rolling(RollingFileAppender),
}

impl FileTarget {
    fn sync(&mut self) -> io::Result<()> {
        match self {
            FileTarget::Plain(file) => {
                file.flush()?;
                file.sync_all()
            }
            FileTarget::Rolling(appender) => appender.flush(),
        }
    }
}

impl Write for FileTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileTarget::Plain(file) => file.write(buf),
            FileTarget::Rolling(appender) => appender.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileTarget::Plain(file) => file.flush(),
            FileTarget::Rolling(appender) => appender.flush(),
        }
    }
}

/// The file sink. Clones share one handle; writers hold its lock for a
/// whole record so concurrent lines never interleave.
#[derive(Clone)]
pub(crate) struct FileSink {
    path: PathBuf,
    target: Arc<Mutex<Option<FileTarget>>>,
}

impl FileSink {
    /// Creates `dir` if needed and opens `dir/file_name` for appending.
    pub(crate) fn open(
        dir: &Path,
        file_name: &str,
        rotation: FileRotation,
    ) -> Result<Self, LoggerError> {
        create_dir(dir).map_err(|source| LoggerError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let file_name = if file_name.is_empty() {
            DEFAULT_LOG_FILE_NAME
        } else {
            file_name
        };
        let path = dir.join(file_name);

        let target = match rotation.as_rotation() {
            None => open_append(&path).map(FileTarget::Plain),
            Some(rotation) => RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(file_name)
                .build(dir)
                .map(FileTarget::Rolling)
                .map_err(io::Error::other),
        }
        .map_err(|source| LoggerError::OpenFile {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            target: Arc::new(Mutex::new(Some(target))),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn sync(&self) -> io::Result<()> {
        match self.target.lock().as_mut() {
            Some(target) => target.sync(),
            None => Ok(()),
        }
    }

    /// Syncs and releases the handle. A failed final sync is the close
    /// failure, the handle is released either way. Closing again is a
    /// no-op.
    pub(crate) fn close(&self) -> io::Result<()> {
        let Some(mut target) = self.target.lock().take() else {
            return Ok(());
        };
        target.sync()
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.target.lock().is_none()
    }
}

/// Writer handed out for a single record.
pub(crate) struct FileWriter<'a> {
    guard: MutexGuard<'a, Option<FileTarget>>,
}

impl Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.guard.as_mut() {
            Some(target) => target.write(buf),
            // Records written after close are discarded.
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.guard.as_mut() {
            Some(target) => target.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = FileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            guard: self.target.lock(),
        }
    }
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).create(dir)
}

#[cfg(unix)]
fn open_append(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o644)
        .open(path)
}

#[cfg(not(unix))]
fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
