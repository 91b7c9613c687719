use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Settings for the outbound HTTP client that fetches target pages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 20,
            user_agent: "RewritingReverseProxy/1.0".to_string(),
        }
    }
}

/// Origin-memory cookie written when serving a document, so subsequent
/// proxy-relative requests without an explicit target can still resolve.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    #[serde(with = "duration_serde")]
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "__pt".to_string(),
            ttl: Duration::from_secs(1800),
        }
    }
}

/// Defaults for the content-replacement overlay script. These used to be
/// ambient globals in the overlay payload; they are explicit configuration
/// substituted into the script when it is served.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    pub script_path: String,
    pub default_xpath: String,
    pub default_delay_ms: u64,
    pub default_tries: u32,
    pub default_interval_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            script_path: "/overlay.js".to_string(),
            default_xpath: "/html/body//h1".to_string(),
            default_delay_ms: 300,
            default_tries: 900,
            default_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be zero");
        }

        if !self.overlay.script_path.starts_with('/') {
            anyhow::bail!("Overlay script_path must start with '/'");
        }

        if self.session.cookie_name.is_empty() {
            anyhow::bail!("Session cookie_name cannot be empty");
        }

        if self.session.ttl.as_secs() == 0 {
            anyhow::bail!("Session ttl cannot be zero");
        }

        if self.overlay.default_tries == 0 {
            anyhow::bail!("Overlay default_tries cannot be zero");
        }

        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        serializer.serialize_str(&format!("{}s", secs))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> std::result::Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
        if s.ends_with('s') {
            let num: u64 = s.trim_end_matches('s').parse()?;
            Ok(Duration::from_secs(num))
        } else if s.ends_with('m') {
            let num: u64 = s.trim_end_matches('m').parse()?;
            Ok(Duration::from_secs(num * 60))
        } else if s.ends_with('h') {
            let num: u64 = s.trim_end_matches('h').parse()?;
            Ok(Duration::from_secs(num * 3600))
        } else {
            let num: u64 = s.parse()?;
            Ok(Duration::from_secs(num))
        }
    }
}
