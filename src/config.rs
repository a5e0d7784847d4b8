use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_AI_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("invalid log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `merittracd=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

// Keep the key out of logs.
impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_AI_BASE_URL.to_string(),
            model: DEFAULT_AI_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_AI_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub workspace: Option<PathBuf>,
    pub log: LogConfig,
    pub ai: AiConfig,
}

impl AppConfig {
    /// Reads `MERITTRAC_*` variables. A `.env` file in the working directory is
    /// loaded first if present; real environment variables win.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut cfg = AppConfig {
            workspace: get("MERITTRAC_WORKSPACE").map(PathBuf::from),
            ..Default::default()
        };

        if let Some(filter) = get("MERITTRAC_LOG") {
            cfg.log.filter = filter;
        }
        if let Some(format) = get("MERITTRAC_LOG_FORMAT") {
            cfg.log.format = format.parse()?;
        }

        cfg.ai.api_key = get("MERITTRAC_AI_API_KEY");
        if let Some(url) = get("MERITTRAC_AI_BASE_URL") {
            cfg.ai.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("MERITTRAC_AI_MODEL") {
            cfg.ai.model = model;
        }
        if let Some(secs) = get("MERITTRAC_AI_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| anyhow::anyhow!("MERITTRAC_AI_TIMEOUT_SECS must be an integer"))?;
            cfg.ai.timeout = Duration::from_secs(secs);
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = AppConfig::from_lookup(lookup(&[])).expect("config");
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log.filter, "info");
        assert_eq!(cfg.log.format, LogFormat::Text);
        assert!(cfg.ai.api_key.is_none());
        assert_eq!(cfg.ai.base_url, DEFAULT_AI_BASE_URL);
        assert_eq!(cfg.ai.model, DEFAULT_AI_MODEL);
        assert_eq!(cfg.ai.timeout, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("MERITTRAC_LOG", "debug"),
            ("MERITTRAC_LOG_FORMAT", "JSON"),
            ("MERITTRAC_AI_API_KEY", "k"),
            ("MERITTRAC_AI_BASE_URL", "http://127.0.0.1:9/v1/"),
            ("MERITTRAC_AI_TIMEOUT_SECS", "5"),
        ]))
        .expect("config");
        assert_eq!(cfg.log.filter, "debug");
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.ai.api_key.as_deref(), Some("k"));
        assert_eq!(cfg.ai.base_url, "http://127.0.0.1:9/v1");
        assert_eq!(cfg.ai.timeout, Duration::from_secs(5));
    }

    #[test]
    fn blank_key_counts_as_unset() {
        let cfg = AppConfig::from_lookup(lookup(&[("MERITTRAC_AI_API_KEY", "  ")])).expect("config");
        assert!(cfg.ai.api_key.is_none());
    }

    #[test]
    fn bad_timeout_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("MERITTRAC_AI_TIMEOUT_SECS", "soon")])).is_err());
    }

    #[test]
    fn debug_masks_key() {
        let cfg = AppConfig::from_lookup(lookup(&[("MERITTRAC_AI_API_KEY", "secret")])).expect("config");
        let dbg = format!("{:?}", cfg.ai);
        assert!(!dbg.contains("secret"));
    }
}
