//! Configuration loader and validator for the product-resolver service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub marketplace: Marketplace,
    #[serde(default)]
    pub limits: Limits,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_addr: String,
    pub data_dir: String,
}

/// Upstream marketplace API settings and application credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marketplace {
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    /// Site prefix prepended to bare numeric identifiers (e.g. "MLB").
    pub default_site: String,
}

/// Fan-out and transport bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Limits {
    pub competitor_candidates: usize,
    pub seller_fanout: usize,
    pub http_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            competitor_candidates: 20,
            seller_fanout: 15,
            http_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.marketplace.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.api_base must be non-empty"));
    }
    if cfg.marketplace.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.client_id must be non-empty"));
    }
    if cfg.marketplace.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.client_secret must be non-empty"));
    }
    let site = cfg.marketplace.default_site.trim();
    if site.len() != 3 || !site.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::Invalid(
            "marketplace.default_site must be a 3-letter uppercase site code",
        ));
    }

    if cfg.limits.competitor_candidates == 0 {
        return Err(ConfigError::Invalid("limits.competitor_candidates must be > 0"));
    }
    if cfg.limits.seller_fanout == 0 {
        return Err(ConfigError::Invalid("limits.seller_fanout must be > 0"));
    }
    if cfg.limits.http_timeout_secs == 0 {
        return Err(ConfigError::Invalid("limits.http_timeout_secs must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the repository.
pub fn example() -> &'static str {
    r#"app:
  bind_addr: "0.0.0.0:8080"
  data_dir: "./data"

marketplace:
  api_base: "https://api.mercadolibre.com"
  client_id: "YOUR_APP_CLIENT_ID"
  client_secret: "YOUR_APP_CLIENT_SECRET"
  default_site: "MLB"

limits:
  competitor_candidates: 20
  seller_fanout: 15
  http_timeout_secs: 10
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.marketplace.default_site, "MLB");
        assert_eq!(cfg.limits.seller_fanout, 15);
    }

    #[test]
    fn limits_default_when_absent() {
        let yaml = r#"
app:
  bind_addr: "127.0.0.1:8080"
  data_dir: "./data"
marketplace:
  api_base: "https://api.mercadolibre.com"
  client_id: "id"
  client_secret: "secret"
  default_site: "MLA"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.limits.competitor_candidates, 20);
        assert_eq!(cfg.limits.http_timeout_secs, 10);
    }

    #[test]
    fn invalid_credentials() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.marketplace.client_id = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("client_id")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.marketplace.client_secret = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_site_code() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.marketplace.default_site = "mlb".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.marketplace.default_site = "ML".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_limits() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.limits.competitor_candidates = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.limits.http_timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.bind_addr, "0.0.0.0:8080");
    }
}
