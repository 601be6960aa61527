use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "clawguard",
    version,
    about = "Credential-holding approval gateway for untrusted agents"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "clawguard.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Audit database path (overrides config file setting)
    #[arg(long)]
    pub db: Option<PathBuf>,
}
