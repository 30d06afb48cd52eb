//! Server configuration from the environment

use crate::llm::DEFAULT_COMPLETIONS_URL;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub completions_url: String,
    /// Credential used when none is saved in settings
    pub openai_api_key: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("PAGEMATE_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".pagemate").join("pagemate.db")
            },
            PathBuf::from,
        );

        let port = var("PAGEMATE_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            db_path,
            port,
            completions_url: var("PAGEMATE_COMPLETIONS_URL")
                .unwrap_or_else(|| DEFAULT_COMPLETIONS_URL.to_string()),
            openai_api_key: var("OPENAI_API_KEY").filter(|k| !k.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/u")]);
        assert_eq!(config.db_path, PathBuf::from("/home/u/.pagemate/pagemate.db"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.completions_url, DEFAULT_COMPLETIONS_URL);
        assert_eq!(config.openai_api_key, None);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PAGEMATE_DB_PATH", "/data/pm.db"),
            ("PAGEMATE_PORT", "9100"),
            ("PAGEMATE_COMPLETIONS_URL", "http://localhost:1234/v1/chat/completions"),
            ("OPENAI_API_KEY", "sk-env"),
        ]);
        assert_eq!(config.db_path, PathBuf::from("/data/pm.db"));
        assert_eq!(config.port, 9100);
        assert_eq!(config.completions_url, "http://localhost:1234/v1/chat/completions");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn test_bad_port_falls_back() {
        assert_eq!(config(&[("PAGEMATE_PORT", "eighty")]).port, DEFAULT_PORT);
    }
}
