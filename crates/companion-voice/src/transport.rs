//! Transport negotiation: probe candidate session endpoints in order.
//!
//! The backend exposes the realtime session on one of several fixed ports
//! depending on deployment. Each candidate is attempted with a bounded
//! timeout; the first live websocket wins. Retry on total failure is the
//! orchestrator's job, not ours.

use crate::error::{DeliveryError, DeliveryResult};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// A live websocket to the backend session.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One candidate session endpoint. Immutable; built fresh per negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    /// `ws` or `wss`, derived from the base address scheme.
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl SessionTarget {
    /// Render as a connectable websocket URL.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Derive the ordered candidate list from the base API address.
/// `https` bases negotiate over `wss`, everything else over `ws`.
pub fn candidate_targets(base: &Url, ports: &[u16]) -> Vec<SessionTarget> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let host = base.host_str().unwrap_or("127.0.0.1").to_string();
    ports
        .iter()
        .map(|&port| SessionTarget {
            scheme: scheme.to_string(),
            host: host.clone(),
            port,
        })
        .collect()
}

/// Try each candidate in order with a bounded timeout. Returns the first live
/// stream, or `TransportUnreachable` once every candidate has failed.
///
/// A failed attempt is fully dropped (socket closed) before the next one
/// starts; nothing leaks across attempts.
pub async fn negotiate(
    base: &Url,
    ports: &[u16],
    connect_timeout: Duration,
) -> DeliveryResult<(WsStream, SessionTarget)> {
    let candidates = candidate_targets(base, ports);
    debug!("negotiating session across {} candidates", candidates.len());

    let mut last_error = String::from("no candidates configured");
    for target in candidates {
        debug!("attempting session endpoint {}", target);
        match tokio::time::timeout(connect_timeout, connect_async(target.url())).await {
            Ok(Ok((stream, _response))) => {
                info!("session endpoint live: {}", target);
                return Ok((stream, target));
            }
            Ok(Err(e)) => {
                warn!("session endpoint {} failed: {}", target, e);
                last_error = format!("{}: {}", target, e);
            }
            Err(_) => {
                warn!(
                    "session endpoint {} timed out after {:?}",
                    target, connect_timeout
                );
                last_error = format!("{}: connect timeout", target);
            }
        }
    }

    Err(DeliveryError::TransportUnreachable(last_error))
}
