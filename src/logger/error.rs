use super::level::ParseLevelError;
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error(transparent)]
    InvalidLevel(#[from] ParseLevelError),
    #[error("failed to create log directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open log file {path:?}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to flush log output: {0}")]
    Flush(#[source] io::Error),
    #[error("failed to close log file: {0}")]
    Close(#[source] io::Error),
}

impl LoggerError {
    /// True for failures of the underlying file system or streams.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            LoggerError::CreateDir { .. }
                | LoggerError::OpenFile { .. }
                | LoggerError::Flush(_)
                | LoggerError::Close(_)
        )
    }
}
