//! Delivery configuration loaded from the environment.
//!
//! Timeouts and candidate ports for the realtime session, plus the fallback
//! poller bounds. Change behavior without code edits.

use crate::error::{DeliveryError, DeliveryResult};
use std::time::Duration;
use url::Url;

/// Configuration for one companion's delivery pipeline.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | COMPANION_API_URL | http://127.0.0.1:5000 | Backend base address (scheme + host + port). |
/// | COMPANION_USERNAME | User | Identity sent in the session init message. |
/// | COMPANION_SESSION_PORTS | 10002,10000,10003 | Candidate realtime ports, tried in order. |
/// | COMPANION_CONNECT_TIMEOUT_MS | 4000 | Per-candidate connect timeout. |
/// | COMPANION_RECONNECT_DELAY_MS | 5000 | Delay before the single reconnect attempt. |
/// | COMPANION_STALL_TIMEOUT_MS | 10000 | Drain-loop safety timeout per segment. |
/// | COMPANION_LOAD_GRACE_MS | 3000 | Grace for fetching a segment before forcing failure. |
/// | COMPANION_GATE_GRACE_MS | 1000 | Delay before lowering the talking gate after a reply ends. |
/// | COMPANION_FALLBACK_ENABLED | true | Probe the one-shot retrieval path when the session is unreachable. |
/// | COMPANION_FALLBACK_ATTEMPTS | 10 | Bounded poll count for the fallback path. |
/// | COMPANION_FALLBACK_INTERVAL_MS | 500 | Interval between fallback polls. |
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Backend base address, e.g. `http://192.168.1.100:5000`.
    pub api_url: String,
    /// Username declared in the channel init message.
    pub username: String,
    /// Candidate session ports, in priority order.
    pub session_ports: Vec<u16>,
    /// Bounded timeout for each candidate endpoint attempt.
    pub connect_timeout: Duration,
    /// Fixed delay before the single automatic reconnect.
    pub reconnect_delay: Duration,
    /// Safety timeout: a stuck segment never stalls the queue longer than this.
    pub stall_timeout: Duration,
    /// Grace for resource fetch before the segment is marked failed.
    pub load_grace: Duration,
    /// Grace before lowering the talking gate, to avoid flicker between replies.
    pub gate_grace: Duration,
    /// Whether the fallback retrieval poller runs when negotiation is exhausted.
    pub fallback_enabled: bool,
    /// Bounded attempt count for the fallback poller.
    pub fallback_attempts: u32,
    /// Interval between fallback poll attempts.
    pub fallback_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5000".to_string(),
            username: "User".to_string(),
            session_ports: vec![10002, 10000, 10003],
            connect_timeout: Duration::from_millis(4000),
            reconnect_delay: Duration::from_millis(5000),
            stall_timeout: Duration::from_millis(10000),
            load_grace: Duration::from_millis(3000),
            gate_grace: Duration::from_millis(1000),
            fallback_enabled: true,
            fallback_attempts: 10,
            fallback_interval: Duration::from_millis(500),
        }
    }
}

impl DeliveryConfig {
    /// Load from environment. Unset or invalid => defaults (see struct docs).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env_string("COMPANION_API_URL", &defaults.api_url),
            username: env_string("COMPANION_USERNAME", &defaults.username),
            session_ports: env_ports("COMPANION_SESSION_PORTS", &defaults.session_ports),
            connect_timeout: env_duration_ms("COMPANION_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            reconnect_delay: env_duration_ms("COMPANION_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            stall_timeout: env_duration_ms("COMPANION_STALL_TIMEOUT_MS", defaults.stall_timeout),
            load_grace: env_duration_ms("COMPANION_LOAD_GRACE_MS", defaults.load_grace),
            gate_grace: env_duration_ms("COMPANION_GATE_GRACE_MS", defaults.gate_grace),
            fallback_enabled: env_bool("COMPANION_FALLBACK_ENABLED", defaults.fallback_enabled),
            fallback_attempts: env_u32("COMPANION_FALLBACK_ATTEMPTS", defaults.fallback_attempts),
            fallback_interval: env_duration_ms(
                "COMPANION_FALLBACK_INTERVAL_MS",
                defaults.fallback_interval,
            ),
        }
    }

    /// Parse the configured base address. The session scheme (`ws`/`wss`) and
    /// relative segment resolution both derive from this.
    pub fn base_url(&self) -> DeliveryResult<Url> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| DeliveryError::Config(format!("invalid api_url {:?}: {}", self.api_url, e)))?;
        if url.host_str().is_none() {
            return Err(DeliveryError::Config(format!(
                "api_url {:?} has no host",
                self.api_url
            )));
        }
        Ok(url)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            // Unrecognized values behave like unset, same as the other helpers.
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_ports(key: &str, default: &[u16]) -> Vec<u16> {
    let parsed: Vec<u16> = match std::env::var(key) {
        Ok(v) => v
            .split(',')
            .filter_map(|p| p.trim().parse::<u16>().ok())
            .collect(),
        Err(_) => Vec::new(),
    };
    if parsed.is_empty() {
        default.to_vec()
    } else {
        parsed
    }
}
