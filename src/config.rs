use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Explicit kubeconfig path; when unset the client infers in-cluster
    /// config or the standard kubeconfig locations.
    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Upper bound on a single control-plane call, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Total attempts per call for transient failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds; doubles per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Authoritative image reference when the CLI is not given one.
    /// The image is always configuration; no registry is hard-coded.
    #[serde(default)]
    pub default_image: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let settings: Config = config
            .try_deserialize()
            .unwrap_or_else(|_| Config::default());

        Ok(settings)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace: default_namespace(),
            call_timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            default_image: None,
        }
    }
}
