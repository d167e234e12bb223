//! Human-readable line encoder shared by the console and file sinks.
//!
//! Each record becomes one tab separated line:
//! `timestamp  LEVEL  dir/file.rs:line  message  k=v k=v`.
//! The console sink enables ANSI escapes and gets a colored level.

use chrono::Local;
use owo_colors::OwoColorize;
use std::fmt::{self, Write as _};
use std::panic::Location;
use std::path::Path;
use tracing::field::{Field as TracingField, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

pub(crate) const SEVERITY_FIELD: &str = "severity";
pub(crate) const CALLER_FIELD: &str = "caller";
pub(crate) const FIELDS_FIELD: &str = "fields";
const MESSAGE_FIELD: &str = "message";

/// ISO-8601 with milliseconds and zone offset.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Call site rendered as `dir/file.rs:line`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Caller<'a> {
    file: &'a str,
    line: u32,
}

impl Caller<'static> {
    pub(crate) fn new(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for Caller<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = Path::new(self.file);
        let dir = path.parent().and_then(Path::file_name);
        match (dir, path.file_name()) {
            (Some(dir), Some(file)) => write!(
                f,
                "{}/{}:{}",
                dir.to_string_lossy(),
                file.to_string_lossy(),
                self.line
            ),
            _ => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

#[derive(Debug, Default)]
struct Record {
    severity: Option<String>,
    caller: Option<String>,
    message: String,
    fields: String,
}

impl Record {
    fn push_raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        self.fields.push_str(text);
    }

    fn push_field(&mut self, name: &str, value: &dyn fmt::Debug) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value:?}");
    }
}

impl Visit for Record {
    fn record_str(&mut self, field: &TracingField, value: &str) {
        match field.name() {
            SEVERITY_FIELD | CALLER_FIELD | MESSAGE_FIELD | FIELDS_FIELD => {
                self.record_debug(field, &format_args!("{value}"));
            }
            name => self.push_field(name, &value),
        }
    }

    fn record_debug(&mut self, field: &TracingField, value: &dyn fmt::Debug) {
        match field.name() {
            SEVERITY_FIELD => self.severity = Some(format!("{value:?}")),
            CALLER_FIELD => self.caller = Some(format!("{value:?}")),
            MESSAGE_FIELD => {
                let _ = write!(self.message, "{value:?}");
            }
            FIELDS_FIELD => self.push_raw(&format!("{value:?}")),
            name => self.push_field(name, value),
        }
    }
}

/// The encoder. ANSI coloring follows the layer's `with_ansi` setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut record = Record::default();
        // Fields of spans entered through the native `tracing` API come first.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    record.push_raw(fields);
                }
            }
        }
        event.record(&mut record);

        let meta = event.metadata();
        let label = record
            .severity
            .as_deref()
            .unwrap_or_else(|| meta.level().as_str());

        write!(writer, "{}\t", Local::now().format(TIMESTAMP_FORMAT))?;
        if writer.has_ansi_escapes() {
            write_colored_label(&mut writer, label)?;
        } else {
            writer.write_str(label)?;
        }
        writer.write_char('\t')?;

        match (&record.caller, meta.file(), meta.line()) {
            (Some(caller), _, _) => writer.write_str(caller)?,
            (None, Some(file), Some(line)) => write!(writer, "{}", Caller { file, line })?,
            _ => writer.write_str(meta.target())?,
        }

        write!(writer, "\t{}", record.message)?;
        if !record.fields.is_empty() {
            write!(writer, "\t{}", record.fields)?;
        }
        writeln!(writer)
    }
}

fn write_colored_label(writer: &mut Writer<'_>, label: &str) -> fmt::Result {
    match label {
        "TRACE" | "DEBUG" => write!(writer, "{}", label.magenta()),
        "INFO" => write!(writer, "{}", label.blue()),
        "WARN" => write!(writer, "{}", label.yellow()),
        _ => write!(writer, "{}", label.red()),
    }
}
