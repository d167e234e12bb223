use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use teelog::logger::*;
use tracing_subscriber::fmt::MakeWriter;

/// In-memory console capturing everything the console sink writes.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Console whose flush always fails, like a closed pipe.
#[derive(Clone, Copy)]
struct BrokenConsole;

impl Write for BrokenConsole {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"))
    }
}

impl<'a> MakeWriter<'a> for BrokenConsole {
    type Writer = BrokenConsole;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

fn console_logger(level: &str) -> (Logger, Captured) {
    let console = Captured::default();
    let logger = Logger::builder()
        .level(level)
        .console_writer(console.clone())
        .build()
        .unwrap();
    (logger, console)
}

#[test]
fn new_accepts_every_level_name() {
    for level in Level::ALL {
        let logger = Logger::new(level.as_str(), "", "").unwrap();
        assert_eq!(logger.level(), level);
    }
}

#[test]
fn new_rejects_invalid_level() {
    let err = Logger::new("loud", "", "").unwrap_err();
    assert!(matches!(err, LoggerError::InvalidLevel(_)));
    assert!(!err.is_io());
}

#[test]
fn console_only_logger_holds_no_file() {
    let (logger, console) = console_logger("info");
    assert!(logger.file_path().is_none());

    logger.info("console only", &[]);
    logger.close().unwrap();

    assert!(console.contents().contains("console only"));
}

#[test]
fn empty_file_name_defaults_to_app_log() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("logs");

    let logger = Logger::new("info", &dir, "").unwrap();
    assert_eq!(logger.file_path(), Some(dir.join("app.log").as_path()));
    assert!(dir.join("app.log").is_file());
    logger.close().unwrap();
}

#[test]
fn directory_creation_failure_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    fs::write(&blocker, "").unwrap();

    let err = Logger::new("info", blocker.join("logs"), "app.log").unwrap_err();
    assert!(matches!(err, LoggerError::CreateDir { .. }));
    assert!(err.is_io());
}

#[test]
fn written_message_is_read_back_from_file() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("log");

    let logger = Logger::new("debug", &dir, "test.log").unwrap();
    assert_eq!(logger.level(), Level::Debug);
    assert!(dir.join("test.log").exists());

    logger.info("test log", &[]);
    logger.sync().unwrap();

    let content = fs::read_to_string(dir.join("test.log")).unwrap();
    assert!(content.contains("test log"));
    logger.close().unwrap();
}

#[test]
fn records_below_threshold_reach_neither_sink() {
    let tmp = tempfile::tempdir().unwrap();
    let console = Captured::default();
    let logger = Logger::builder()
        .level("info")
        .output_path(tmp.path())
        .console_writer(console.clone())
        .build()
        .unwrap();

    logger.debug("hidden debug", &[]);
    logger.info("visible info", &[]);
    logger.error("visible error", &[]);
    logger.sync().unwrap();

    let file = fs::read_to_string(tmp.path().join("app.log")).unwrap();
    for output in [console.contents(), file] {
        assert!(!output.contains("hidden debug"));
        assert!(output.contains("visible info"));
        assert!(output.contains("visible error"));
    }
}

#[test]
fn line_has_timestamp_level_caller_message_and_fields() {
    let (logger, console) = console_logger("debug");

    let line = line!() + 1;
    logger.warn("disk almost full", &[Field::uint("free_mb", 12)]);

    let lines = console.lines();
    assert_eq!(lines.len(), 1);
    let parts: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(parts.len(), 5, "{parts:?}");
    assert!(chrono::DateTime::parse_from_str(parts[0], "%Y-%m-%dT%H:%M:%S%.3f%z").is_ok());
    assert_eq!(parts[1], "WARN");
    assert_eq!(parts[2], format!("tests/logger_test.rs:{line}"));
    assert_eq!(parts[3], "disk almost full");
    assert_eq!(parts[4], "free_mb=12");
}

#[test]
fn record_without_fields_has_no_trailing_column() {
    let (logger, console) = console_logger("info");
    logger.info("plain", &[]);
    assert_eq!(console.lines()[0].split('\t').count(), 4);
}

#[test]
fn file_sink_never_contains_color_codes() {
    let tmp = tempfile::tempdir().unwrap();
    let console = Captured::default();
    let logger = Logger::builder()
        .output_path(tmp.path())
        .console_writer(console.clone())
        .ansi(true)
        .build()
        .unwrap();

    logger.error("colored on console", &[]);
    logger.close().unwrap();

    assert!(console.contents().contains("\x1b["));
    let file = fs::read_to_string(tmp.path().join("app.log")).unwrap();
    assert!(file.contains("\tERROR\t"));
    assert!(!file.contains("\x1b["));
}

#[test]
fn concurrent_writers_produce_one_line_each() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = Logger::builder()
        .output_path(tmp.path())
        .log_file_name("concurrent.log")
        .console_writer(io::sink)
        .build()
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..100u64 {
            let logger = &logger;
            scope.spawn(move || {
                logger.info("concurrent write", &[Field::uint("worker", worker)]);
            });
        }
    });
    logger.close().unwrap();

    let content = fs::read_to_string(tmp.path().join("concurrent.log")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 100);

    let mut workers = BTreeSet::new();
    for line in lines {
        let parts: Vec<&str> = line.split('\t').collect();
        assert_eq!(parts.len(), 5, "corrupted line: {line:?}");
        assert_eq!(parts[1], "INFO");
        assert_eq!(parts[3], "concurrent write");
        let worker: u64 = parts[4].strip_prefix("worker=").unwrap().parse().unwrap();
        workers.insert(worker);
    }
    assert_eq!(workers, (0..100).collect());
}

#[test]
fn raising_threshold_suppresses_later_records_only() {
    let (logger, console) = console_logger("debug");

    logger.debug("before raise", &[]);
    logger.set_level(Level::Warn);
    assert_eq!(logger.level(), Level::Warn);
    logger.info("after raise", &[]);
    logger.warn("warn after raise", &[]);

    let lines = console.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("\tbefore raise"));
    assert!(lines[1].ends_with("\twarn after raise"));
}

#[test]
fn derived_logger_shares_threshold_with_parent() {
    let (logger, console) = console_logger("debug");
    let child = logger.with(&[Field::str("component", "child")]);

    child.set_level(Level::Error);
    assert_eq!(logger.level(), Level::Error);

    logger.warn("parent warn", &[]);
    child.warn("child warn", &[]);
    logger.atomic_level().set(Level::Debug);
    child.debug("child debug", &[]);

    let output = console.contents();
    assert!(!output.contains("parent warn"));
    assert!(!output.contains("child warn"));
    assert!(output.contains("child debug"));
}

#[test]
fn with_attaches_fields_to_derived_logger_only() {
    let (logger, console) = console_logger("info");
    let derived = logger.with(&[Field::str("request_id", "r-1")]);
    let nested = derived.with(&[Field::bool("retry", true)]);

    derived.info("derived", &[Field::int("attempt", 2)]);
    nested.info("nested", &[]);
    logger.info("parent", &[]);

    let lines = console.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("\tderived\trequest_id=r-1 attempt=2"));
    assert!(lines[1].ends_with("\tnested\trequest_id=r-1 retry=true"));
    assert!(lines[2].ends_with("\tparent"));
    assert!(logger.fields().is_empty());
    assert_eq!(nested.fields().len(), 2);
}

#[test]
fn close_releases_file_and_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = Logger::builder()
        .output_path(tmp.path())
        .console_writer(io::sink)
        .build()
        .unwrap();
    let derived = logger.with(&[Field::str("k", "v")]);

    logger.info("before close", &[]);
    logger.close().unwrap();
    derived.close().unwrap();
    derived.info("after close", &[]);

    let file = fs::read_to_string(tmp.path().join("app.log")).unwrap();
    assert!(file.contains("before close"));
    assert!(!file.contains("after close"));
}

#[test]
fn close_reports_console_flush_failure_after_closing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = Logger::builder()
        .output_path(tmp.path())
        .console_writer(BrokenConsole)
        .build()
        .unwrap();

    logger.info("before close", &[]);
    let err = logger.close().unwrap_err();
    assert!(matches!(err, LoggerError::Flush(_)));
    assert!(err.is_io());
    logger.info("after close", &[]);

    let file = fs::read_to_string(tmp.path().join("app.log")).unwrap();
    assert!(file.contains("before close"));
    assert!(!file.contains("after close"));
}

#[test]
fn reopening_appends_instead_of_truncating() {
    let tmp = tempfile::tempdir().unwrap();
    for message in ["first run", "second run"] {
        let logger = Logger::builder()
            .output_path(tmp.path())
            .console_writer(io::sink)
            .build()
            .unwrap();
        logger.info(message, &[]);
        logger.close().unwrap();
    }

    let file = fs::read_to_string(tmp.path().join("app.log")).unwrap();
    assert_eq!(file.lines().count(), 2);
    assert!(file.contains("first run"));
    assert!(file.contains("second run"));
}

#[test]
fn panic_logs_before_unwinding() {
    let (logger, console) = console_logger("info");

    let result = catch_unwind(AssertUnwindSafe(|| {
        logger.panic("cannot continue", &[Field::str("reason", "test")]);
    }));

    let payload = result.unwrap_err();
    assert_eq!(
        payload.downcast_ref::<String>().map(String::as_str),
        Some("cannot continue")
    );
    let output = console.contents();
    assert!(output.contains("\tPANIC\t"));
    assert!(output.contains("reason=test"));
}

#[cfg(debug_assertions)]
#[test]
fn dpanic_panics_in_debug_builds() {
    let (logger, console) = console_logger("info");
    let result = catch_unwind(AssertUnwindSafe(|| logger.dpanic("inconsistent state", &[])));
    assert!(result.is_err());
    assert!(console.contents().contains("\tDPANIC\t"));
}

#[test]
fn panic_still_unwinds_when_record_is_filtered() {
    let (logger, console) = console_logger("fatal");
    let result = catch_unwind(AssertUnwindSafe(|| {
        logger.panic("filtered panic", &[]);
    }));
    assert!(result.is_err());
    assert!(console.contents().is_empty());
}

#[test]
fn native_tracing_events_use_the_same_sinks_and_gate() {
    let (logger, console) = console_logger("info");

    logger.in_scope(|| {
        tracing::debug!(user = "bob", "native debug");
        let span = tracing::info_span!("request", id = 7);
        let _entered = span.enter();
        tracing::info!(user = "bob", "native info");
    });

    let lines = console.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\tINFO\t"));
    assert!(lines[0].contains("\tnative info\t"));
    assert!(lines[0].ends_with("id=7 user=\"bob\""));
}

#[test]
fn native_error_is_filtered_above_error_threshold() {
    let (logger, console) = console_logger("fatal");

    logger.in_scope(|| tracing::error!("native error"));
    logger.error("facade error", &[]);
    logger.set_level(Level::Error);
    logger.in_scope(|| tracing::error!("native error at error"));

    let lines = console.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\tnative error at error"));
}

#[test]
fn sugared_logger_formats_arguments() {
    let (logger, console) = console_logger("info");
    let sugar = logger.sugar().with(&[Field::str("mode", "sugar")]);

    sugar.debugf(format_args!("hidden {}", 1));
    let line = line!() + 1;
    sugar.infof(format_args!("{} of {} done", 3, 4));

    let lines = console.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&format!("tests/logger_test.rs:{line}")));
    assert!(lines[0].ends_with("\t3 of 4 done\tmode=sugar"));
    assert_eq!(sugar.desugar().fields().len(), 1);
}

#[test]
fn rotated_file_is_written_with_date_suffix() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = Logger::builder()
        .output_path(tmp.path())
        .log_file_name("rotating.log")
        .rotation(FileRotation::Hourly)
        .console_writer(io::sink)
        .build()
        .unwrap();
    logger.info("rotated record", &[]);
    logger.close().unwrap();

    let entries: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_ne!(logger.file_path(), Some(entries[0].as_path()));
    assert!(!tmp.path().join("rotating.log").exists());
    let name = entries[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("rotating.log."), "{name}");
    assert!(fs::read_to_string(&entries[0]).unwrap().contains("rotated record"));
}

#[test]
fn from_settings_builds_configured_logger() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = teelog::settings::Log {
        level: "warn".to_string(),
        output_path: Some(tmp.path().to_string_lossy().into_owned()),
        log_file_name: Some("configured.log".to_string()),
        ..Default::default()
    };

    let logger = Logger::from_settings(&settings).unwrap();
    assert_eq!(logger.level(), Level::Warn);
    assert_eq!(
        logger.file_path(),
        Some(tmp.path().join("configured.log").as_path())
    );
    logger.close().unwrap();
}

/// Set in the re-executed test binary to the directory the terminating
/// logger writes to.
const EXIT_DIR_VAR: &str = "TEELOG_TEST_EXIT_DIR";

/// Re-runs the current test binary on `test`, with `EXIT_DIR_VAR` pointing
/// at a fresh directory, and returns the exit code with the log contents.
fn run_terminating_test(test: &str) -> (Option<i32>, String) {
    let tmp = tempfile::tempdir().unwrap();
    let status = Command::new(std::env::current_exe().unwrap())
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(EXIT_DIR_VAR, tmp.path())
        .status()
        .unwrap();
    let file = fs::read_to_string(tmp.path().join("exit.log")).unwrap_or_default();
    (status.code(), file)
}

fn exiting_logger(dir: &Path) -> Logger {
    Logger::builder()
        .output_path(dir)
        .log_file_name("exit.log")
        .console_writer(io::sink)
        .build()
        .unwrap()
}

#[test]
fn fatal_writes_record_then_exits_with_status_one() {
    if let Some(dir) = std::env::var_os(EXIT_DIR_VAR) {
        exiting_logger(Path::new(&dir)).fatal("unrecoverable", &[Field::str("reason", "disk")]);
    }

    let (code, file) = run_terminating_test("fatal_writes_record_then_exits_with_status_one");
    assert_eq!(code, Some(1));
    assert_eq!(file.lines().count(), 1);
    assert!(file.contains("\tFATAL\t"));
    assert!(file.contains("\tunrecoverable\treason=disk"));
}

#[test]
fn fatalf_writes_formatted_record_then_exits_with_status_one() {
    if let Some(dir) = std::env::var_os(EXIT_DIR_VAR) {
        exiting_logger(Path::new(&dir))
            .sugar()
            .fatalf(format_args!("lost {} of {} replicas", 2, 3));
    }

    let (code, file) =
        run_terminating_test("fatalf_writes_formatted_record_then_exits_with_status_one");
    assert_eq!(code, Some(1));
    assert!(file.contains("\tFATAL\t"));
    assert!(file.contains("\tlost 2 of 3 replicas"));
}
