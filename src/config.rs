use std::path::PathBuf;

/// Runtime settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub models_dir: PathBuf,
    pub port: u16,
    /// Presence switches summaries to the delegated strategy.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub summary_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://health.db".to_string()
}
fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}
fn default_port() -> u16 {
    5000
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_summary_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            models_dir: default_models_dir(),
            port: default_port(),
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            summary_timeout_secs: default_summary_timeout_secs(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(default_database_url),
            models_dir: lookup("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_models_dir),
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_port),
            openai_api_key: lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()),
            openai_base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(default_openai_base_url),
            openai_model: lookup("OPENAI_MODEL").unwrap_or_else(default_openai_model),
            summary_timeout_secs: lookup("SUMMARY_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_summary_timeout_secs),
        }
    }
}
