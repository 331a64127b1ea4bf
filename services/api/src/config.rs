//! Service configuration

use serde::Deserialize;

/// Which catalog store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

/// HTTP service configuration, read from `VAL_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    /// Apply embedded migrations at startup (postgres store only)
    pub run_migrations: bool,
    /// Runs of one write before a serialization conflict is returned
    pub write_attempts: u32,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000)?
            .set_default("store", "postgres")?
            .set_default("run_migrations", true)?
            .set_default("write_attempts", i64::from(catalog::DEFAULT_WRITE_ATTEMPTS))?
            .add_source(config::Environment::with_prefix("VAL").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
