use std::env;
use std::fmt;
use std::time::Duration;

/// Runtime configuration for GitHub API clients.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    pub token: String,
    pub api_url: String,
    pub graphql_url: String,
    pub api_version: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub log_timeout_secs: u64,
    pub validate_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - GITHUB_TOKEN (or GH_TOKEN) [required]
    /// - GITHUB_API_URL (default: https://api.github.com)
    /// - GITHUB_GRAPHQL_URL (default: <GITHUB_API_URL>/graphql)
    /// - GITHUB_API_VERSION (default: 2022-11-28)
    /// - GITHUB_HTTP_TIMEOUT_SECS (default: 30)
    /// - GITHUB_LOG_TIMEOUT_SECS (default: 30)
    /// - GITHUB_VALIDATE_TIMEOUT_SECS (default: 10)
    /// - GITHUB_USER_AGENT (default: ghview/<version>)
    pub fn from_env() -> Result<Self, String> {
        let token = env::var("GITHUB_TOKEN")
            .or_else(|_| env::var("GH_TOKEN"))
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| "Missing GITHUB_TOKEN or GH_TOKEN".to_string())?;

        let api_url = env::var("GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let graphql_url =
            env::var("GITHUB_GRAPHQL_URL").unwrap_or_else(|_| format!("{}/graphql", api_url));
        let api_version =
            env::var("GITHUB_API_VERSION").unwrap_or_else(|_| "2022-11-28".to_string());
        let user_agent = env::var("GITHUB_USER_AGENT")
            .unwrap_or_else(|_| format!("ghview/{}", env!("CARGO_PKG_VERSION")));

        Ok(Self {
            token,
            api_url,
            graphql_url,
            api_version,
            user_agent,
            timeout_secs: secs_from_env("GITHUB_HTTP_TIMEOUT_SECS", 30),
            log_timeout_secs: secs_from_env("GITHUB_LOG_TIMEOUT_SECS", 30),
            validate_timeout_secs: secs_from_env("GITHUB_VALIDATE_TIMEOUT_SECS", 10),
        })
    }

    /// Configuration pointing both protocols at a single base URL. Used by tests and
    /// GitHub Enterprise setups that don't need the env lookup.
    pub fn for_base_url(token: impl Into<String>, api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self {
            token: token.into(),
            graphql_url: format!("{}/graphql", api_url),
            api_url,
            api_version: "2022-11-28".to_string(),
            user_agent: format!("ghview/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            log_timeout_secs: 30,
            validate_timeout_secs: 10,
        }
    }

    pub fn log_timeout(&self) -> Duration {
        Duration::from_secs(self.log_timeout_secs)
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(default)
}

// The token must never end up in logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("graphql_url", &self.graphql_url)
            .field("api_version", &self.api_version)
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("log_timeout_secs", &self.log_timeout_secs)
            .field("validate_timeout_secs", &self.validate_timeout_secs)
            .finish()
    }
}
