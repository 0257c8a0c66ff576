//! Error types for the spoken-reply delivery pipeline

use thiserror::Error;

/// Result type alias for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors that can occur while delivering a spoken reply.
///
/// Every async boundary in the pipeline catches its failures and converts them
/// into one of these kinds; none of them is allowed to escape as a panic that
/// would take the hosting view down.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// All candidate session endpoints failed to open.
    #[error("no reachable session endpoint: {0}")]
    TransportUnreachable(String),

    /// The live channel closed without the owner asking for it.
    #[error("session channel dropped: {0}")]
    ChannelDropped(String),

    /// An inbound frame could not be parsed. The channel stays alive.
    #[error("malformed inbound message: {0}")]
    MalformedMessage(String),

    /// A segment resource could not be fetched or decoded in time.
    #[error("segment load failed: {0}")]
    SegmentLoad(String),

    /// Playback of a loaded segment failed.
    #[error("playback failed: {0}")]
    Playback(String),

    /// A segment exceeded the drain loop's safety timeout.
    #[error("playback stalled after {0:?}")]
    PlaybackStalled(std::time::Duration),

    /// Platform autoplay policy is blocking audio output. Transient, not a
    /// hard failure: playback is deferred until the next user interaction.
    #[error("audio output locked by platform autoplay policy")]
    AudioLocked,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for DeliveryError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DeliveryError::ChannelDropped(err.to_string())
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::SegmentLoad(err.to_string())
    }
}

impl From<url::ParseError> for DeliveryError {
    fn from(err: url::ParseError) -> Self {
        DeliveryError::Config(err.to_string())
    }
}
