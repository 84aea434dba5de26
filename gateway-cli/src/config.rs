//! Loads [`GatewayConfig`] the way `acton-service::config::Config::load`
//! does: defaults, then `./config.toml`, then `GATEWAY_`-prefixed env
//! vars, highest priority last.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use gateway_core::GatewayConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

pub fn load(path: Option<&str>) -> Result<GatewayConfig, ConfigError> {
    let mut figment = Figment::new().merge(Serialized::defaults(GatewayConfig::default()));

    let config_path = path.unwrap_or("config.toml");
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    }

    figment = figment.merge(Env::prefixed("GATEWAY_").split("__"));

    Ok(figment.extract()?)
}
