//! Node configuration from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use thiserror::Error;

use crate::rpc::Commitment;

pub mod programs;

pub use programs::{ProgramEntry, ProgramsConfig};

/// Environment-style variable lookup.
pub type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("oracle keypair: {0}")]
    Keypair(String),
}

/// Where the oracle's signing key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// JSON array of 64 bytes: secret seed followed by the public key.
    File(PathBuf),
    /// 64 hex characters encoding the 32-byte seed.
    Hex(String),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Hex(_) => f.write_str("Hex(<redacted>)"),
        }
    }
}

impl KeySource {
    pub async fn load(&self) -> Result<SigningKey, ConfigError> {
        match self {
            Self::File(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|err| ConfigError::Keypair(format!("{}: {err}", path.display())))?;
                keypair_from_json(&raw)
            }
            Self::Hex(seed) => keypair_from_hex(seed),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnswerConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    /// Fixed answer for dry runs; bypasses the completion endpoint.
    pub static_answer: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub commitment: Commitment,
    pub key_source: KeySource,
    pub programs: ProgramsConfig,
    pub answer: AnswerConfig,
    pub fulfillment_delay: Duration,
    pub confirm_timeout: Duration,
    pub action_queue_capacity: usize,
    pub max_concurrent_actions: usize,
    pub request_ttl: Duration,
    pub sweep_interval: Duration,
    pub status_addr: SocketAddr,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let rpc_url = lookup("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let ws_url = lookup("WS_URL").unwrap_or_else(|| websocket_url(&rpc_url));

        let key_source = match (lookup("ORACLE_KEYPAIR_PATH"), lookup("ORACLE_SECRET_KEY")) {
            (Some(path), _) => KeySource::File(PathBuf::from(path)),
            (None, Some(hex)) => KeySource::Hex(hex),
            (None, None) => return Err(ConfigError::Missing("ORACLE_KEYPAIR_PATH or ORACLE_SECRET_KEY")),
        };

        Ok(Self {
            ws_url,
            rpc_url,
            commitment: parse_or(lookup, "COMMITMENT", Commitment::Confirmed)?,
            key_source,
            programs: ProgramsConfig::from_lookup(lookup)?,
            answer: AnswerConfig {
                api_url: lookup("LLM_API_URL").unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string()),
                api_key: lookup("LLM_API_KEY").filter(|key| !key.is_empty()),
                default_model: lookup("LLM_DEFAULT_MODEL").unwrap_or_else(|| "gpt-4".to_string()),
                static_answer: lookup("STATIC_ANSWER"),
            },
            fulfillment_delay: Duration::from_millis(parse_or(lookup, "FULFILLMENT_DELAY_MS", 2_000)?),
            confirm_timeout: Duration::from_secs(parse_or(lookup, "CONFIRM_TIMEOUT_SECS", 30)?),
            action_queue_capacity: parse_or(lookup, "ACTION_QUEUE_CAPACITY", 256)?,
            max_concurrent_actions: parse_or(lookup, "MAX_CONCURRENT_ACTIONS", 4)?,
            request_ttl: Duration::from_secs(parse_or(lookup, "REQUEST_TTL_SECS", 3_600)?),
            sweep_interval: Duration::from_secs(parse_or::<u64>(lookup, "SWEEP_INTERVAL_SECS", 60)?.max(1)),
            status_addr: parse_or(lookup, "STATUS_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)))?,
        })
    }
}

fn parse_or<T>(lookup: &Lookup<'_>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

/// Websocket endpoint paired with an HTTP RPC endpoint: `http` becomes `ws`,
/// `https` becomes `wss`, and an explicit port is incremented by one.
pub fn websocket_url(rpc_url: &str) -> String {
    let (scheme, rest) = match rpc_url.split_once("://") {
        Some(("https", rest)) => ("wss", rest),
        Some(("http", rest)) => ("ws", rest),
        Some((scheme, rest)) => (scheme, rest),
        None => ("ws", rpc_url),
    };
    let (authority, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };

    let authority = match authority.rsplit_once(':').map(|(host, port)| (host, port.parse::<u16>())) {
        Some((host, Ok(port))) => format!("{host}:{}", port.saturating_add(1)),
        _ => authority.to_string(),
    };
    format!("{scheme}://{authority}{path}")
}

pub fn keypair_from_json(raw: &str) -> Result<SigningKey, ConfigError> {
    let bytes: Vec<u8> =
        serde_json::from_str(raw).map_err(|err| ConfigError::Keypair(format!("not a byte array: {err}")))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| ConfigError::Keypair(format!("expected 64 bytes, got {}", bytes.len())))?;

    let key = SigningKey::from_keypair_bytes(&bytes)
        .map_err(|_| ConfigError::Keypair("public key does not match secret key".into()))?;
    Ok(key)
}

pub fn keypair_from_hex(seed: &str) -> Result<SigningKey, ConfigError> {
    let bytes = hex::decode(seed.trim()).map_err(|err| ConfigError::Keypair(format!("invalid hex: {err}")))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ConfigError::Keypair("hex seed must be 64 characters".into()))?;
    Ok(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const ROUTER: &str = "CATsZNcHms98EcQo1qzGcA3XLPf47NLhQC5g2cRe19Gu";

    fn config(vars: &[(&str, &str)]) -> Result<NodeConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        NodeConfig::from_lookup(&|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let seed = "07".repeat(32);
        let config = config(&[
            ("ROUTER_PROGRAM_ID", ROUTER),
            ("ORACLE_SECRET_KEY", seed.as_str()),
        ])
        .unwrap();

        assert_eq!(config.ws_url, "wss://api.devnet.solana.com");
        assert_eq!(config.commitment, Commitment::Confirmed);
        assert_eq!(config.fulfillment_delay, Duration::from_millis(2_000));
        assert_eq!(config.action_queue_capacity, 256);
        assert_eq!(config.max_concurrent_actions, 4);
        assert_eq!(config.request_ttl, Duration::from_secs(3_600));
        assert_eq!(config.status_addr.port(), 3001);
        assert_eq!(config.answer.default_model, "gpt-4");
        assert!(config.programs.consumer.is_none());
        assert_eq!(config.programs.monitored_programs().len(), 1);
    }

    #[test]
    fn missing_and_invalid_values_are_reported() {
        assert!(matches!(
            config(&[("ORACLE_SECRET_KEY", "00")]),
            Err(ConfigError::Missing("ROUTER_PROGRAM_ID"))
        ));
        assert!(matches!(
            config(&[("ROUTER_PROGRAM_ID", ROUTER)]),
            Err(ConfigError::Missing(_))
        ));
        assert!(matches!(
            config(&[
                ("ROUTER_PROGRAM_ID", ROUTER),
                ("ORACLE_SECRET_KEY", "00"),
                ("MAX_CONCURRENT_ACTIONS", "many"),
            ]),
            Err(ConfigError::Invalid { key: "MAX_CONCURRENT_ACTIONS", .. })
        ));
        assert!(matches!(
            config(&[
                ("ROUTER_PROGRAM_ID", ROUTER),
                ("ORACLE_SECRET_KEY", "00"),
                ("CONSUMER_PROGRAM_ID", ROUTER),
            ]),
            Err(ConfigError::Missing("CONSUMER_IDL_PATH"))
        ));
    }

    #[test]
    fn websocket_url_follows_rpc_url() {
        assert_eq!(websocket_url("http://127.0.0.1:8899"), "ws://127.0.0.1:8900");
        assert_eq!(websocket_url("https://api.mainnet-beta.solana.com"), "wss://api.mainnet-beta.solana.com");
        assert_eq!(websocket_url("https://rpc.example.com/key/abc"), "wss://rpc.example.com/key/abc");
    }

    #[test]
    fn keypairs_load_from_json_and_hex() {
        let key = keypair_from_hex(&"07".repeat(32)).unwrap();
        let json = serde_json::to_string(&key.to_keypair_bytes().to_vec()).unwrap();
        assert_eq!(keypair_from_json(&json).unwrap().verifying_key(), key.verifying_key());

        let mut tampered = key.to_keypair_bytes();
        tampered[63] ^= 1;
        let json = serde_json::to_string(&tampered.to_vec()).unwrap();
        assert!(keypair_from_json(&json).is_err());

        assert!(keypair_from_hex("abcd").is_err());
        assert!(keypair_from_json("[1, 2, 3]").is_err());
    }
}
