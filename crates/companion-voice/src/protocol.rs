//! Wire protocol for the realtime session.
//!
//! The backend speaks PascalCase JSON; field names here are bit-exact for
//! interoperability. Parsing is per-message and never panics: a frame we
//! cannot read is reported as `MalformedMessage` and the channel stays alive.

use crate::error::{DeliveryError, DeliveryResult};
use crate::queue::AudioSegment;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Client→server message sent once on channel open, declaring identity and
/// subscribing to audio output.
#[derive(Debug, Clone, Serialize)]
pub struct InitMessage {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Output")]
    pub output: bool,
}

impl InitMessage {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            output: true,
        }
    }

    pub fn to_json(&self) -> DeliveryResult<String> {
        serde_json::to_string(self).map_err(|e| DeliveryError::ChannelSend(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Topic", default)]
    topic: Option<String>,
    #[serde(rename = "Data", default)]
    data: Option<SegmentData>,
    #[serde(rename = "panelReply", default)]
    panel_reply: Option<PanelReply>,
}

#[derive(Debug, Deserialize)]
struct SegmentData {
    #[serde(rename = "HttpValue", default)]
    http_value: Option<String>,
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "IsFirst", default)]
    is_first: u8,
    #[serde(rename = "IsEnd", default)]
    is_end: u8,
}

#[derive(Debug, Deserialize)]
struct PanelReply {
    #[serde(default)]
    content: String,
}

/// A parsed inbound frame.
#[derive(Debug)]
pub enum InboundEvent {
    /// An audio segment to enqueue for playback.
    Segment(AudioSegment),
    /// Streamed reply text for the transcript view; opaque to this core.
    Transcript(String),
    /// Valid JSON we do not care about (other topics, no `HttpValue`).
    Unrecognized,
}

/// Parse one inbound text frame. Only `Topic: "human"` messages carrying
/// `Data.HttpValue` become segments; `panelReply` frames carry transcript
/// text; everything else valid is `Unrecognized`.
pub fn parse_inbound(raw: &str) -> DeliveryResult<InboundEvent> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| DeliveryError::MalformedMessage(e.to_string()))?;

    if envelope.topic.as_deref() == Some("human") {
        if let Some(data) = envelope.data {
            if let Some(http_value) = data.http_value {
                return Ok(InboundEvent::Segment(AudioSegment {
                    resource_ref: http_value,
                    text: data.text,
                    is_first: data.is_first == 1,
                    is_last: data.is_end == 1,
                    received_at: Utc::now(),
                }));
            }
        }
    }

    if let Some(reply) = envelope.panel_reply {
        if !reply.content.is_empty() {
            return Ok(InboundEvent::Transcript(reply.content));
        }
    }

    Ok(InboundEvent::Unrecognized)
}
