use crate::core::kernel::signer::NonceSource;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_REST_URL: &str = "https://api.kraken.com";
pub const DEFAULT_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Exchange API key pair. Shared as `Arc<Credential>`, never cloned into components.
///
/// The key pair owns its nonce sequence, so every signer built from the same
/// credential draws from one strictly increasing series.
#[derive(Debug)]
pub struct Credential {
    api_key: Secret<String>,
    private_key: Secret<String>,
    nonces: NonceSource,
}

// Never expose secrets in serialization
impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credential", 2)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("private_key", "[REDACTED]")?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialHelper {
            api_key: String,
            private_key: String,
        }

        let helper = CredentialHelper::deserialize(deserializer)?;
        Ok(Self::new(helper.api_key, helper.private_key))
    }
}

impl Credential {
    #[must_use]
    pub fn new(api_key: String, private_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            private_key: Secret::new(private_key),
            nonces: NonceSource::new(),
        }
    }

    /// Create credentials from environment variables
    ///
    /// Expected environment variables:
    /// - `{EXCHANGE}_API_KEY` (e.g., `KRAKEN_API_KEY`)
    /// - `{EXCHANGE}_PRIVATE_KEY` (e.g., `KRAKEN_PRIVATE_KEY`), base64 encoded
    pub fn from_env(exchange_prefix: &str) -> Result<Self, ConfigError> {
        let api_key_var = format!("{}_API_KEY", exchange_prefix.to_uppercase());
        let private_key_var = format!("{}_PRIVATE_KEY", exchange_prefix.to_uppercase());

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let private_key = env::var(&private_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(private_key_var))?;

        Ok(Self::new(api_key, private_key))
    }

    /// Load a .env file (if present) before reading the environment
    #[cfg(feature = "env-file")]
    pub fn from_env_file(exchange_prefix: &str) -> Result<Self, ConfigError> {
        match dotenv::dotenv() {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file: {}",
                    e
                )));
            }
        }
        Self::from_env(exchange_prefix)
    }

    /// Credentials for public endpoints only
    #[must_use]
    pub fn read_only() -> Self {
        Self::new(String::new(), String::new())
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.private_key.expose_secret().is_empty()
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get base64 private key (use carefully - exposes secret)
    pub fn private_key(&self) -> &str {
        self.private_key.expose_secret()
    }

    /// Next nonce for a private request signed with this key
    pub fn next_nonce(&self) -> u64 {
        self.nonces.next_nonce()
    }
}

/// Runtime settings for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub rest_base_url: String,
    pub ws_url: String,
    /// Read deadline for browser sockets, refreshed on every pong.
    pub pong_wait: Duration,
    /// Largest browser frame accepted, in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue depth.
    pub outbound_capacity: usize,
    /// Upstream event stream depth before the oldest events are dropped.
    pub event_capacity: usize,
    /// Enables the permissive CORS layer.
    pub development: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1323)),
            rest_base_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            pong_wait: Duration::from_secs(10),
            max_message_size: 1024,
            outbound_capacity: 256,
            event_capacity: 1024,
            development: false,
        }
    }
}

impl GatewayConfig {
    /// Read overrides from `GATEWAY_BIND_ADDR`, `KRAKEN_REST_URL`, `KRAKEN_WS_URL`
    /// and `ENV` (`development` enables CORS).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = env::var("GATEWAY_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|e| {
                ConfigError::InvalidConfiguration(format!(
                    "GATEWAY_BIND_ADDR '{}' is not a socket address: {}",
                    addr, e
                ))
            })?;
        }
        if let Ok(url) = env::var("KRAKEN_REST_URL") {
            config.rest_base_url = url;
        }
        if let Ok(url) = env::var("KRAKEN_WS_URL") {
            config.ws_url = url;
        }
        config.development = env::var("ENV").is_ok_and(|v| v == "development");

        Ok(config)
    }

    /// Interval between keepalive pings, 9/10 of the pong wait.
    pub fn ping_interval(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_is_redacted() {
        let credential = Credential::new("public".to_string(), "c2VjcmV0".to_string());
        let json = serde_json::to_string(&credential).unwrap();
        assert!(!json.contains("public"));
        assert!(!json.contains("c2VjcmV0"));
        assert!(!format!("{:?}", credential).contains("c2VjcmV0"));
        assert!(credential.has_credentials());
        assert!(!Credential::read_only().has_credentials());
    }

    #[test]
    fn test_ping_interval() {
        let config = GatewayConfig::default();
        assert_eq!(config.ping_interval(), Duration::from_secs(9));
    }
}
