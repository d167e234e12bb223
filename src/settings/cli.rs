use super::Parser;

#[derive(Parser, Debug)]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,
    /// Overrides `log.level` from the settings file.
    #[arg(long)]
    pub level: Option<String>,
}
