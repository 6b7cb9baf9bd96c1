use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::LazyLock;
use uuid::Uuid;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "pomona")]
#[command(
    author,
    version = version_info(),
    about = "Incremental harvester for XML indicator catalogs"
)]
#[command(after_help = "Examples:
  pomona harvest --source ine
  pomona harvest 'https://www.ine.pt/ine/xml_indic.jsp?opc=3&lang=PT'
  pomona jobs --limit 5
  pomona job 6f1c0f1e-8d53-4b8e-9a53-3f2a4b7a1c11 --failed

Tuning (environment):
  HARVEST_WORKERS, HARVEST_CHECKPOINT_INTERVAL, HARVEST_ITEM_TIMEOUT_SECS
  HTTP_CONNECT_TIMEOUT_SECS, HTTP_READ_TIMEOUT_SECS, HTTP_MAX_ATTEMPTS
  DB_MAX_CONNECTIONS")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest indicator catalogs into the database
    #[command(after_help = "Examples:
  pomona harvest                          # Harvest all enabled sources from config
  pomona harvest <URL>                    # Harvest a single catalog URL
  pomona harvest --source ine             # Harvest a source by name from config
  pomona harvest --config ~/sources.toml  # Use a custom config file
  pomona harvest --full-sync              # Rewrite every record, even unchanged ones")]
    Harvest {
        /// Catalog URL to harvest with default source settings
        #[arg(value_name = "URL")]
        source_url: Option<String>,

        /// Harvest a specific source by name from config file
        #[arg(short, long, value_name = "NAME", conflicts_with = "source_url")]
        source: Option<String>,

        /// Custom path to sources.toml configuration file
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Number of items processed concurrently
        #[arg(short, long, value_name = "N")]
        workers: Option<usize>,

        /// Save the job after every K finished items
        #[arg(long, value_name = "K")]
        checkpoint_interval: Option<usize>,

        /// Write every item even when nothing changed
        #[arg(long)]
        full_sync: bool,
    },
    /// List recent harvest jobs
    Jobs {
        /// Only jobs of this source
        #[arg(short, long, value_name = "NAME")]
        source: Option<String>,
        /// Maximum number of jobs to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one harvest job with its item outcomes
    Job {
        /// Job identifier
        id: Uuid,
        /// Only list failed items
        #[arg(long)]
        failed: bool,
    },
    /// Create or update the database schema
    Migrate,
}
