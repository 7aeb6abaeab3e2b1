use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use guildjob_operator::discord::DEFAULT_API_BASE;
use guildjob_operator::dispatch::DEFAULT_DISPATCH_TIMEOUT;

#[derive(Debug, Clone)]
pub struct Config {
    pub application_id: String,
    pub bot_token: String,
    /// Hex-encoded Ed25519 key used to verify inbound requests
    pub public_key: String,
    pub namespace: String,
    pub api_base: String,
    pub dispatch_timeout: Duration,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            var(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{} must be set", key))
        };

        let dispatch_timeout = match var("GUILDJOB_DISPATCH_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse()
                    .context("GUILDJOB_DISPATCH_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            None => DEFAULT_DISPATCH_TIMEOUT,
        };

        Ok(Self {
            application_id: required("DISCORD_APPLICATION_ID")?,
            bot_token: required("DISCORD_BOT_TOKEN")?,
            public_key: required("DISCORD_APPLICATION_PUBLIC_KEY")?,
            namespace: var("GUILDJOB_NAMESPACE")
                .or_else(|| var("POD_NAMESPACE"))
                .unwrap_or_else(|| "default".to_string()),
            api_base: var("DISCORD_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            dispatch_timeout,
            log_dir: var("GUILDJOB_LOG_DIR").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DISCORD_APPLICATION_ID", "1234"),
        ("DISCORD_BOT_TOKEN", "bot-token"),
        ("DISCORD_APPLICATION_PUBLIC_KEY", "abcd"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.dispatch_timeout, Duration::from_secs(5));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_namespace_falls_back_to_pod_namespace() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POD_NAMESPACE", "bots"));
        assert_eq!(load(&vars).unwrap().namespace, "bots");

        vars.push(("GUILDJOB_NAMESPACE", "guildjob"));
        assert_eq!(load(&vars).unwrap().namespace, "guildjob");
    }

    #[test]
    fn test_missing_required_variable() {
        let err = load(&REQUIRED[..2]).unwrap_err();
        assert_eq!(err.to_string(), "DISCORD_APPLICATION_PUBLIC_KEY must be set");
    }

    #[test]
    fn test_invalid_timeout() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("GUILDJOB_DISPATCH_TIMEOUT_SECS", "soon"));
        assert!(load(&vars).is_err());

        vars.pop();
        vars.push(("GUILDJOB_DISPATCH_TIMEOUT_SECS", "12"));
        assert_eq!(load(&vars).unwrap().dispatch_timeout, Duration::from_secs(12));
    }
}
