//! The `logger` module wraps `tracing` in a leveled logger with a console
//! sink, an optional file sink and a threshold that can be changed at
//! runtime. See `bin/logger_demo.rs` for a demo binary.

mod error;
mod field;
mod format;
mod level;
mod logger;
mod sink;

pub use error::*;
pub use field::{Field, Value};
pub use format::LineFormat;
pub use level::*;
pub use logger::*;
pub use sink::{ConsoleTarget, DEFAULT_LOG_FILE_NAME, FileRotation};

pub use tracing::{debug, error, info, trace, warn};
