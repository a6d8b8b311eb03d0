use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::Environment;

/// One user's Deribit API credentials. Credential encryption at rest is the
/// outer platform's job; this core receives them already decrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerCredential {
    pub user_id: String,
    pub environment: Environment,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_port: u16,
    pub brokers: Vec<BrokerCredential>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./razor_core.db".to_string(),
            listen_port: 8080,
            brokers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads `config.toml` (optional) layered under `RAZOR_*` environment
    /// variables. A `.env` file is honoured when present.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("RAZOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("failed to parse configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert!(config.database_url.starts_with("sqlite:"));
        assert_eq!(config.listen_port, 8080);
        assert!(config.brokers.is_empty());
    }

    #[test]
    fn toml_shape_deserializes() {
        let raw = r#"
            database_url = "sqlite:/tmp/razor.db"
            listen_port = 9000

            [[brokers]]
            user_id = "u1"
            environment = "testnet"
            client_id = "id"
            client_secret = "secret"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.brokers.len(), 1);
        assert_eq!(config.brokers[0].environment, Environment::Testnet);
    }
}
