//! The `settings` module loads logger configuration from a TOML file.
//! See `bin/logger_demo.rs` for a demo binary using it.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
