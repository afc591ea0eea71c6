use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_deployment_file")]
    pub deployment_file: PathBuf,

    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: PathBuf,

    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_deployment_file() -> PathBuf {
    PathBuf::from("deployment.yaml")
}

fn default_kubeconfig() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}

fn default_health_timeout_secs() -> u64 {
    crate::deploy::HEALTH_TIMEOUT.as_secs()
}

fn default_log_format() -> String {
    "text".to_string()
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

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment_file: default_deployment_file(),
            kubeconfig: default_kubeconfig(),
            health_timeout_secs: default_health_timeout_secs(),
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.deployment_file, PathBuf::from("deployment.yaml"));
        assert!(config.kubeconfig.ends_with(".kube/config"));
        assert_eq!(config.health_timeout(), Duration::from_secs(60));
        assert!(!config.json_logs());
    }
}
