use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

/// Default GitHub REST API root.  GitHub Enterprise Server installs use
/// `https://<host>/api/v3`.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Process configuration.  Every option can be given as a flag or through
/// its environment variable.
#[derive(Parser, Clone)]
#[command(name = "assetgate", about = "Authenticated GitHub release asset proxy")]
pub struct Config {
    /// Path to the htpasswd file holding caller credentials.
    #[arg(long, env = "PASSWD_PATH", default_value = "./.passwd")]
    pub passwd_path: PathBuf,

    /// Access token used for every upstream API call.
    #[arg(long, env = "GITHUB_PERSONAL_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// Root URL of the upstream REST API.
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL)]
    pub github_api_url: String,

    /// Address to bind the HTTP listener on.
    #[arg(long, env = "HTTP_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub http_host: IpAddr,

    /// Port to bind the HTTP listener on.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Maximum size in bytes of each chunk relayed to the caller.
    #[arg(long, env = "STREAM_CHUNK_SIZE", default_value_t = 512)]
    pub chunk_size: usize,

    /// Upper bound on establishing an upstream connection.  Unset means the
    /// transport default.
    #[arg(long, env = "UPSTREAM_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.http_port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    /// Configuration used by unit tests: points the upstream at `api_url`
    /// and the credential store at `passwd_path`.
    #[cfg(test)]
    pub fn for_tests(api_url: &str, passwd_path: impl Into<PathBuf>) -> Self {
        Self {
            passwd_path: passwd_path.into(),
            github_token: "test-token".to_string(),
            github_api_url: api_url.to_string(),
            http_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            chunk_size: 512,
            connect_timeout_secs: None,
        }
    }
}

// The token must never end up in logs, so Debug is written by hand.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("passwd_path", &self.passwd_path)
            .field("github_token", &"<redacted>")
            .field("github_api_url", &self.github_api_url)
            .field("http_host", &self.http_host)
            .field("http_port", &self.http_port)
            .field("chunk_size", &self.chunk_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Basic sanity checks that cannot be expressed purely with clap.
pub fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.github_token.trim().is_empty(),
        "GITHUB_PERSONAL_TOKEN must not be empty"
    );
    anyhow::ensure!(config.chunk_size > 0, "chunk_size must be greater than 0");
    anyhow::ensure!(
        config.github_api_url.starts_with("https://")
            || config.github_api_url.starts_with("http://"),
        "github_api_url must be an http(s) URL, got {:?}",
        config.github_api_url
    );
    Ok(())
}
