// src/config.rs
use anyhow::{Context, Result, bail};
use std::path::PathBuf;

pub const DEFAULT_ENDPOINT: &str = "https://api.hailvision.ai/v1/detect";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
/// One sample per 30 source frames, about 1 sample/s on 30 fps footage.
pub const DEFAULT_FRAME_INTERVAL: u32 = 30;

/// Connection settings for the detection backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub frame_interval: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub redis_url: String,
    pub bind_addr: String,
    pub label_font: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoint = get("HAILVISION_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("HAILVISION_ENDPOINT must be an http(s) URL, got {}", endpoint);
        }

        let frame_interval = match get("HAILVISION_FRAME_INTERVAL") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("HAILVISION_FRAME_INTERVAL is not an integer: {}", raw))?,
            None => DEFAULT_FRAME_INTERVAL,
        };
        if frame_interval == 0 {
            bail!("HAILVISION_FRAME_INTERVAL must be greater than zero");
        }

        Ok(Self {
            backend: BackendConfig {
                endpoint,
                api_key: get("HAILVISION_API_KEY"),
                frame_interval,
            },
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            label_font: get("HAILVISION_LABEL_FONT").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.backend.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(cfg.backend.frame_interval, 30);
        assert!(cfg.backend.api_key.is_none());
        assert_eq!(cfg.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert!(cfg.label_font.is_none());
    }

    #[test]
    fn reads_overrides_and_trims_endpoint() {
        let cfg = config(&[
            ("HAILVISION_ENDPOINT", "http://localhost:9000/"),
            ("HAILVISION_API_KEY", "sk-test"),
            ("HAILVISION_FRAME_INTERVAL", "15"),
            ("HAILVISION_LABEL_FONT", "/usr/share/fonts/mono.ttf"),
        ])
        .unwrap();
        assert_eq!(cfg.backend.endpoint, "http://localhost:9000");
        assert_eq!(cfg.backend.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.backend.frame_interval, 15);
        assert_eq!(
            cfg.label_font,
            Some(PathBuf::from("/usr/share/fonts/mono.ttf"))
        );
    }

    #[test]
    fn blank_api_key_is_unset() {
        let cfg = config(&[("HAILVISION_API_KEY", "  ")]).unwrap();
        assert!(cfg.backend.api_key.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("HAILVISION_FRAME_INTERVAL", "0")]).is_err());
        assert!(config(&[("HAILVISION_FRAME_INTERVAL", "thirty")]).is_err());
        assert!(config(&[("HAILVISION_ENDPOINT", "ftp://example.com")]).is_err());
    }
}
