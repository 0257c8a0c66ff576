//! Segment queue: strictly-ordered, single-consumer delivery of reply audio.
//!
//! Inbound segments are pushed without blocking; a single drain task pops them
//! one at a time and waits for playback completion before touching the next.
//! That wait is the pipeline's only suspension point, bounded by a safety
//! timeout so a stuck player can never stall the queue forever. Boundary
//! markers drive the avatar animation gate.

use crate::error::{DeliveryError, DeliveryResult};
use crate::gate::AnimationGate;
use crate::playback::{resolve_resource, SegmentPlayer};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// One playable slice of a spoken reply, tagged with its position in the
/// reply's segment sequence. Consumed once played to completion or abandoned
/// on error.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Resource path or absolute URL as delivered by the backend.
    pub resource_ref: String,
    /// Text for this slice (transcript display; not interpreted here).
    pub text: String,
    /// First segment of a reply: raises the talking gate.
    pub is_first: bool,
    /// Last segment of a reply: lowers the gate after the grace delay.
    pub is_last: bool,
    /// Arrival time; segments are totally ordered by arrival within a reply.
    pub received_at: DateTime<Utc>,
}

impl AudioSegment {
    pub fn new(resource_ref: impl Into<String>, is_first: bool, is_last: bool) -> Self {
        Self {
            resource_ref: resource_ref.into(),
            text: String::new(),
            is_first,
            is_last,
            received_at: Utc::now(),
        }
    }
}

/// Push handle for the queue. Cloneable; the drain task holds the only
/// receiver, so exactly one consumer exists by construction.
#[derive(Clone)]
pub struct SegmentQueue {
    tx: mpsc::UnboundedSender<AudioSegment>,
}

impl SegmentQueue {
    /// Spawn the drain task and return the push handle plus the task handle.
    /// The caller owns the task; aborting it abandons any queued segments.
    pub fn start(
        player: Arc<dyn SegmentPlayer>,
        gate: AnimationGate,
        base: Url,
        stall_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain_loop(rx, player, gate, base, stall_timeout));
        (Self { tx }, handle)
    }

    /// Enqueue a segment. Never blocks; O(1).
    pub fn push(&self, segment: AudioSegment) -> DeliveryResult<()> {
        self.tx
            .send(segment)
            .map_err(|e| DeliveryError::ChannelSend(e.to_string()))
    }
}

/// The single consumer. Pops segments in arrival order and plays each to
/// completion before the next; one failed or stalled segment never halts the
/// rest of the reply.
async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<AudioSegment>,
    player: Arc<dyn SegmentPlayer>,
    gate: AnimationGate,
    base: Url,
    stall_timeout: Duration,
) {
    while let Some(segment) = rx.recv().await {
        if segment.is_first {
            gate.on_segment_start();
        }

        match resolve_resource(&base, &segment.resource_ref) {
            Ok(url) => {
                debug!("playing segment {}", url);
                match tokio::time::timeout(stall_timeout, player.play(&url)).await {
                    Ok(Ok(())) => debug!("segment finished: {}", segment.resource_ref),
                    Ok(Err(e)) => {
                        warn!("segment {} failed, continuing: {}", segment.resource_ref, e)
                    }
                    Err(_) => {
                        player.stop();
                        warn!(
                            "{}",
                            DeliveryError::PlaybackStalled(stall_timeout)
                        );
                    }
                }
            }
            Err(e) => warn!("segment {} unresolvable: {}", segment.resource_ref, e),
        }

        if segment.is_last {
            gate.on_reply_end();
        }
    }
    debug!("segment queue drained and closed");
}
