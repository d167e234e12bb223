use std::time::Duration;
use teelog::logger::*;
use teelog::settings::*;

fn main() -> anyhow::Result<()> {
    // $ cargo run --bin logger_demo -- --settings=settings/dev.toml --level=info
    let cli = Cli::parse();
    let mut project_settings = parse_settings(cli.settings.as_deref())?;
    if let Some(level) = cli.level {
        project_settings.log.level = level;
    }

    let logger = Logger::from_settings(&project_settings.log)?;
    logger.debug("bootstrap debug log", &[]);
    logger.info(
        "bootstrap info log",
        &[Field::str("settings", format!("{:?}", project_settings.log))],
    );

    let request_logger = logger.with(&[Field::str("request_id", "demo-1")]);
    request_logger.warn(
        "slow request",
        &[Field::duration("elapsed", Duration::from_millis(1250))],
    );
    request_logger.error("request failed", &[Field::error(&std::io::Error::other("reset"))]);

    logger.set_level(Level::Warn);
    logger.info("suppressed info log", &[]);
    logger.warn("application warn log", &[]);

    logger.in_scope(|| warn!(component = "demo", "native tracing event"));
    logger.sugar().errorf(format_args!("{} records written", 5));

    if let Some(path) = logger.file_path() {
        println!("log file: {}", path.display());
    }
    logger.close()?;
    Ok(())
}
