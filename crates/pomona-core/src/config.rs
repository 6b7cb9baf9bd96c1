//! Configuration types for pomona components.
//!
//! Defaults are overridable in layers: built-in defaults, then the
//! `sources.toml` file, then environment variables, then CLI arguments.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::TagPolicy;
use crate::error::AppError;
use crate::retry::RetryPolicy;

/// Parses an environment value, keeping `default` when unset or invalid.
fn env_or<T, L>(lookup: &L, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring invalid environment value");
                default
            }
        },
        None => default,
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

impl DbConfig {
    /// Reads `DB_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_or(&lookup, "DB_MAX_CONNECTIONS", defaults.max_connections),
        }
    }
}

/// HTTP client configuration for catalog downloads.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two body chunks.
    pub read_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
    /// Directory for downloaded scratch files; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(300),
            user_agent: format!("pomona/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
            scratch_dir: None,
        }
    }
}

impl HttpConfig {
    /// Reads `HTTP_CONNECT_TIMEOUT_SECS`, `HTTP_READ_TIMEOUT_SECS`,
    /// `HTTP_MAX_ATTEMPTS`, `HTTP_RETRY_INITIAL_DELAY_MS`,
    /// `HTTP_RETRY_MAX_DELAY_SECS` and `HTTP_SCRATCH_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(env_or(
                &lookup,
                "HTTP_RETRY_INITIAL_DELAY_MS",
                defaults.retry.initial_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_secs(env_or(
                &lookup,
                "HTTP_RETRY_MAX_DELAY_SECS",
                defaults.retry.max_delay.as_secs(),
            )),
            max_attempts: env_or(&lookup, "HTTP_MAX_ATTEMPTS", defaults.retry.max_attempts).max(1),
            jitter_ratio: defaults.retry.jitter_ratio,
        };
        Self {
            connect_timeout: Duration::from_secs(env_or(
                &lookup,
                "HTTP_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )),
            read_timeout: Duration::from_secs(env_or(
                &lookup,
                "HTTP_READ_TIMEOUT_SECS",
                defaults.read_timeout.as_secs(),
            )),
            user_agent: defaults.user_agent,
            retry,
            scratch_dir: lookup("HTTP_SCRATCH_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

/// Harvest run configuration.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Number of items processed concurrently.
    pub workers: usize,
    /// Persist the harvest job every this many item results.
    pub checkpoint_interval: usize,
    /// Upper bound for processing one item, fetch included.
    pub item_timeout: Duration,
    /// Items slower than this are logged and counted.
    pub slow_item_threshold: Duration,
    /// Rewrite every existing record regardless of change detection.
    pub force_full_sync: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            checkpoint_interval: 10,
            item_timeout: Duration::from_secs(600),
            slow_item_threshold: Duration::from_secs(30),
            force_full_sync: false,
        }
    }
}

impl HarvestConfig {
    /// Reads `HARVEST_WORKERS`, `HARVEST_CHECKPOINT_INTERVAL` and
    /// `HARVEST_ITEM_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self::default()
            .with_workers(env_or(&lookup, "HARVEST_WORKERS", defaults.workers))
            .with_checkpoint_interval(env_or(
                &lookup,
                "HARVEST_CHECKPOINT_INTERVAL",
                defaults.checkpoint_interval,
            ))
            .with_item_timeout(Duration::from_secs(env_or(
                &lookup,
                "HARVEST_ITEM_TIMEOUT_SECS",
                defaults.item_timeout.as_secs(),
            )))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_slow_item_threshold(mut self, threshold: Duration) -> Self {
        self.slow_item_threshold = threshold;
        self
    }

    pub fn with_full_sync(mut self) -> Self {
        self.force_full_sync = true;
        self
    }

    /// Applies the values set in the `[harvest]` section of `sources.toml`.
    pub fn with_settings(mut self, settings: &HarvestSettings) -> Self {
        if let Some(workers) = settings.workers {
            self = self.with_workers(workers);
        }
        if let Some(interval) = settings.checkpoint_interval {
            self = self.with_checkpoint_interval(interval);
        }
        if let Some(secs) = settings.item_timeout_secs {
            self = self.with_item_timeout(Duration::from_secs(secs));
        }
        self
    }
}

// =============================================================================
// Source Configuration (sources.toml)
// =============================================================================

/// Root configuration structure for sources.toml.
///
/// # Example
///
/// ```toml
/// [harvest]
/// workers = 4
///
/// [[sources]]
/// name = "ine"
/// url = "https://www.ine.pt/ine/xml_indic.jsp?opc=3&lang=PT"
/// enrichment_url = "https://www.ine.pt/ine/catalog.xml?tag=hvd"
/// seed_ids = ["0008074"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub harvest: HarvestSettings,
    pub sources: Vec<SourceEntry>,
}

/// Run settings from the `[harvest]` section.
///
/// Unset values keep what the environment or the defaults gave.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSettings {
    pub workers: Option<usize>,
    pub checkpoint_interval: Option<usize>,
    pub item_timeout_secs: Option<u64>,
}

impl SourcesConfig {
    /// Returns only enabled sources.
    pub fn enabled_sources(&self) -> Vec<&SourceEntry> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    /// Find a source by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// A single catalog source in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Source name, unique per store. Records are keyed by `(name, remote_id)`.
    pub name: String,

    /// Catalog document URL.
    pub url: String,

    /// Whether this source is enabled for batch harvesting.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub description: Option<String>,

    /// Id-list document flagging high-value indicators.
    pub enrichment_url: Option<String>,

    /// Ids to harvest even when missing from the catalog.
    #[serde(default)]
    pub seed_ids: Vec<String>,

    /// File with one seed id per line; `#` starts a comment.
    pub seed_file: Option<PathBuf>,

    /// Tags added to every record.
    #[serde(default = "default_sentinel_tags")]
    pub sentinel_tags: Vec<String>,

    /// Tag added to records whose id is in the enrichment set.
    #[serde(default = "default_enrichment_tag")]
    pub enrichment_tag: Option<String>,

    /// Prefix for extras keys (`<namespace>:<key>`).
    #[serde(default = "default_extras_namespace")]
    pub extras_namespace: String,

    /// Language requested from the per-item detail endpoint.
    #[serde(default = "default_detail_language")]
    pub detail_language: String,

    #[serde(default = "default_license")]
    pub license: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_sentinel_tags() -> Vec<String> {
    vec!["ine.pt".to_string()]
}

fn default_enrichment_tag() -> Option<String> {
    Some("hvd".to_string())
}

fn default_extras_namespace() -> String {
    "ine".to_string()
}

fn default_detail_language() -> String {
    "PT".to_string()
}

fn default_license() -> Option<String> {
    Some("cc-by".to_string())
}

impl SourceEntry {
    /// Creates an enabled entry with default settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            description: None,
            enrichment_url: None,
            seed_ids: Vec::new(),
            seed_file: None,
            sentinel_tags: default_sentinel_tags(),
            enrichment_tag: default_enrichment_tag(),
            extras_namespace: default_extras_namespace(),
            detail_language: default_detail_language(),
            license: default_license(),
        }
    }

    /// Tag policy shared by change detection and record finalization.
    pub fn tag_policy(&self) -> TagPolicy {
        TagPolicy::new(&self.sentinel_tags, self.enrichment_tag.as_deref())
    }

    /// Inline seed ids followed by those of `seed_file`, trimmed, without
    /// empties or duplicates.
    pub fn resolve_seed_ids(&self) -> Result<Vec<String>, AppError> {
        let mut ids: Vec<String> = self
            .seed_ids
            .iter()
            .map(|id| id.trim().to_string())
            .collect();

        if let Some(path) = &self.seed_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AppError::ConfigError(format!(
                    "Failed to read seed file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            ids.extend(
                content
                    .lines()
                    .map(|line| line.split('#').next().unwrap_or_default().trim().to_string()),
            );
        }

        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| !id.is_empty() && seen.insert(id.clone()));
        Ok(ids)
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "sources.toml";

/// Returns the default configuration directory path: `~/.config/pomona/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pomona"))
}

/// Returns the default configuration file path: `~/.config/pomona/sources.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# pomona source configuration
#
# Usage:
#   pomona harvest               # Harvest all enabled sources
#   pomona harvest --source ine  # Harvest one source by name
#   pomona harvest https://...   # Harvest a single catalog URL (ignores this file)
#
# Set enabled = false to skip a source during batch harvest.

# Run settings. HARVEST_* environment variables apply first, these override
# them, and --workers / --checkpoint-interval override both.
[harvest]
# workers = 3
# checkpoint_interval = 10
# item_timeout_secs = 600

# Statistics Portugal indicator catalog
[[sources]]
name = "ine"
url = "https://www.ine.pt/ine/xml_indic.jsp?opc=3&lang=PT"
description = "Instituto Nacional de Estatística - indicadores"
# enrichment_url = "https://www.ine.pt/ine/catalog.xml?tag=hvd"
# seed_ids = ["0008074"]
# seed_file = "/etc/pomona/ine-seed-ids.txt"
sentinel_tags = ["ine.pt"]
enrichment_tag = "hvd"
"#;

/// Load source configuration from a TOML file.
///
/// # Returns
/// * `Ok(Some(config))` - Configuration loaded successfully
/// * `Ok(None)` - No configuration file found and none could be created
/// * `Err(e)` - Configuration file exists but is invalid, or a custom path is missing
///
/// If no configuration file exists at the default path, a template file is
/// created and then loaded.
pub fn load_sources_config(path: Option<PathBuf>) -> Result<Option<SourcesConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            if let Err(e) = create_default_config(&config_path) {
                tracing::warn!("Could not create default config template: {}", e);
                return Ok(None);
            }
            tracing::info!(
                "Config file created at {}. Starting harvest with default sources...",
                config_path.display()
            );
        } else {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: SourcesConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
