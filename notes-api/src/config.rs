use std::sync::OnceLock;

use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_url")]
    pub database_url: String,

    // auth
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default)]
    pub seed_demo: bool,

    // media
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    // logging
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub tokio_console: bool,

    // build
    pub app_version: Option<String>,
    #[serde(default = "default_local")]
    pub source: String,
    #[serde(default = "default_local")]
    pub git_commit: String,
    #[serde(default = "default_local")]
    pub pipeline_id: String,
    #[serde(default = "default_local")]
    pub version: String,
}

fn default_port() -> u16 {
    4000
}

fn default_database_url() -> String {
    "sqlite.db".into()
}

fn default_token_secret() -> String {
    "dev-secret-change-me".into()
}

fn default_token_ttl_hours() -> i64 {
    24 * 7
}

fn default_uploads_dir() -> String {
    "uploads".into()
}

fn default_public_url() -> String {
    "http://127.0.0.1:4000".into()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_local() -> String {
    "local".into()
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        match envy::from_env::<Self>() {
            Ok(config) => config,
            Err(error) => panic!("invalid configuration: {error}"),
        }
    }

    /// Absolute URL prefix under which stored media paths are served.
    pub fn uploads_url(&self) -> String {
        format!("{}/uploads", self.public_url.trim_end_matches('/'))
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

#[cfg(test)]
pub fn config_override<F>(override_config: F) -> &'static Config
where
    F: FnOnce(Config) -> Config,
{
    CONFIG.get_or_init(|| override_config(Config::from_env()))
}
