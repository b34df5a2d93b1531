use crate::{
    app::dispatcher::MatchThreshold,
    storage::{self, StorageManager},
};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_ENRICHMENT_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GENERATION_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
/// Pause between two drained records, doubles as a rate limit on the enrichment api
const DEFAULT_INTER_RECORD_DELAY_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MATCH_COUNT: usize = 10;
const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:8080";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_url")]
    pub base_url: String,

    /// Usually left empty and provided through MARKSYNC_GEMINI_API_KEY
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_enrichment_url(),
            api_key: String::new(),
            model: default_generation_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project url of the backend, e.g. https://xyz.supabase.co
    #[serde(default)]
    pub url: String,

    /// Public (anon) key. Usually provided through MARKSYNC_SUPABASE_KEY
    #[serde(default)]
    pub anon_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_inter_record_delay_ms")]
    pub inter_record_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            inter_record_delay_ms: DEFAULT_INTER_RECORD_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub default_threshold: MatchThreshold,

    #[serde(default = "default_match_count")]
    pub match_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: MatchThreshold::default(),
            match_count: DEFAULT_MATCH_COUNT,
        }
    }
}

fn default_enrichment_url() -> String {
    DEFAULT_ENRICHMENT_URL.to_string()
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_inter_record_delay_ms() -> u64 {
    DEFAULT_INTER_RECORD_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_match_count() -> usize {
    DEFAULT_MATCH_COUNT
}

fn default_daemon_addr() -> String {
    DEFAULT_DAEMON_ADDR.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Browser profile `Bookmarks` file (or a getTree export) used by `sync` and `watch`
    #[serde(default)]
    pub bookmarks_file: Option<String>,
    #[serde(default = "default_daemon_addr")]
    pub daemon_addr: String,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bookmarks_file: None,
            daemon_addr: default_daemon_addr(),
            enrichment: EnrichmentConfig::default(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            search: SearchConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.enrichment.base_url)
            .with_context(|| format!("enrichment.base_url is not a url: {}", self.enrichment.base_url))?;

        if !self.remote.url.is_empty() {
            url::Url::parse(&self.remote.url)
                .with_context(|| format!("remote.url is not a url: {}", self.remote.url))?;
        }

        if self.sync.request_timeout_secs == 0 {
            bail!("sync.request_timeout_secs must be greater than 0");
        }

        if self.search.match_count == 0 {
            bail!("search.match_count must be greater than 0");
        }

        self.daemon_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("daemon_addr is not a socket address: {}", self.daemon_addr))?;

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}
