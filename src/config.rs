use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{GatewayError, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Upstream inference API configuration
    pub upstream: UpstreamConfig,
    /// Outbound proxy pool configuration
    pub pool: PoolConfig,
    /// Generated image storage configuration
    pub images: ImageConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the gateway server (default: 8000)
    pub port: u16,
    /// Bearer key clients must present on /v1 routes
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Chat inference endpoint
    pub chat_url: Url,
    /// Image inference endpoint
    pub image_url: Url,
    /// Upstream interface version sent with image requests
    pub version: String,
    /// Model IDs that are routed to the image endpoint
    pub image_models: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// URL returning one candidate address per line
    pub source_url: Url,
    /// Candidate ports each address is expanded against
    pub ports: Vec<u16>,
    /// Interval between pool refreshes
    pub refresh_interval: Duration,
    /// Maximum dispatch attempts per outbound call
    pub max_attempts: u32,
    /// Timeout for establishing outbound connections
    pub connect_timeout: Duration,
    /// Per-read inactivity timeout on outbound responses
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Directory for on-disk image storage (None = memory only)
    pub dir: Option<PathBuf>,
    /// How long images are retained before the sweep removes them
    pub retention: Duration,
    /// Return images inline as base64 data URLs instead of links
    pub return_base64: bool,
    /// Base URL for image links (None = derive from the request Host header)
    pub base_url: Option<String>,
}

impl UpstreamConfig {
    /// Whether the given model ID is served by the image endpoint
    pub fn is_image_model(&self, model: &str) -> bool {
        self.image_models.iter().any(|m| m == model)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: get_env_or("GONDOLA_HOST", "0.0.0.0"),
                port: get_env_or("GONDOLA_PORT", "8000").parse().map_err(|_| {
                    GatewayError::InvalidConfig("GONDOLA_PORT must be a valid port number".into())
                })?,
                api_key: get_env_or("GONDOLA_API_KEY", ""),
            },
            upstream: UpstreamConfig {
                chat_url: parse_url(
                    "UPSTREAM_CHAT_URL",
                    "https://outerface.venice.ai/api/inference/chat",
                )?,
                image_url: parse_url(
                    "UPSTREAM_IMAGE_URL",
                    "https://outerface.venice.ai/api/inference/image",
                )?,
                version: get_env_or("UPSTREAM_VERSION", "interface@20251007.055834+464da4e"),
                image_models: parse_list(&get_env_or(
                    "IMAGE_MODELS",
                    "stable-diffusion-3.5-rev2,qwen-image,hidream",
                )),
            },
            pool: PoolConfig {
                source_url: parse_url(
                    "ENDPOINT_SOURCE_URL",
                    "https://ipdb.api.030101.xyz/?type=cfv4;proxy",
                )?,
                ports: parse_port_list(&get_env_or(
                    "ENDPOINT_PORTS",
                    "443,2053,2083,2087,2096,8443",
                ))?,
                refresh_interval: Duration::from_secs(
                    get_env_or("POOL_REFRESH_INTERVAL", "300").parse().unwrap_or(300),
                ),
                max_attempts: get_env_or("DISPATCH_MAX_ATTEMPTS", "3").parse().unwrap_or(3),
                connect_timeout: Duration::from_secs(
                    get_env_or("DISPATCH_CONNECT_TIMEOUT", "10").parse().unwrap_or(10),
                ),
                read_timeout: Duration::from_secs(
                    get_env_or("DISPATCH_READ_TIMEOUT", "120").parse().unwrap_or(120),
                ),
            },
            images: ImageConfig {
                dir: match get_env_or("IMAGE_DIR", "/tmp/public/images") {
                    s if s.is_empty() => None,
                    s => Some(PathBuf::from(s)),
                },
                retention: Duration::from_secs(
                    // Clamped to at least one hour; a zero retention would
                    // expire images before clients can fetch them.
                    get_env_or("IMAGE_RETENTION_HOURS", "1")
                        .parse::<u64>()
                        .unwrap_or(1)
                        .max(1)
                        * 3600,
                ),
                return_base64: get_env_or("IMAGE_RETURN_BASE64", "true")
                    .parse()
                    .unwrap_or(true),
                base_url: match get_env_or("IMAGE_BASE_URL", "") {
                    s if s.trim().is_empty() => None,
                    s => Some(s.trim().trim_end_matches('/').to_string()),
                },
            },
        })
    }
}

/// Get an environment variable or a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_url(key: &str, default: &str) -> Result<Url> {
    let raw = get_env_or(key, default);
    Url::parse(&raw)
        .map_err(|e| GatewayError::InvalidConfig(format!("{} is not a valid URL: {}", key, e)))
}

/// Parse a comma-separated list of strings, dropping blanks
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma-separated list of ports
fn parse_port_list(raw: &str) -> Result<Vec<u16>> {
    let ports: Vec<u16> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>().map_err(|_| {
                GatewayError::InvalidConfig(format!("invalid port in ENDPOINT_PORTS: {}", s))
            })
        })
        .collect::<Result<_>>()?;

    if ports.is_empty() {
        return Err(GatewayError::InvalidConfig(
            "ENDPOINT_PORTS must name at least one port".into(),
        ));
    }

    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_list() {
        assert_eq!(
            parse_port_list("443,2053, 8443").unwrap(),
            vec![443, 2053, 8443]
        );
        assert!(parse_port_list("443,banana").is_err());
        assert!(parse_port_list("").is_err());
    }

    #[test]
    fn test_parse_list_drops_blanks() {
        assert_eq!(
            parse_list("qwen-image, hidream,,"),
            vec!["qwen-image".to_string(), "hidream".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_is_image_model() {
        let upstream = UpstreamConfig {
            chat_url: Url::parse("https://example.com/chat").unwrap(),
            image_url: Url::parse("https://example.com/image").unwrap(),
            version: "test".to_string(),
            image_models: vec!["hidream".to_string()],
        };
        assert!(upstream.is_image_model("hidream"));
        assert!(!upstream.is_image_model("mistral-31-24b"));
    }
}
