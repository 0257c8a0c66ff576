//! Session channel: one live bidirectional connection to the backend.
//!
//! On open it declares the client identity, then a reader task parses inbound
//! frames and forwards them — segments to the queue, transcript text to the
//! chat view's sink. The reader does only cheap parsing plus a channel push;
//! it never waits on playback. When the connection ends, the owner is told
//! whether the close was intentional so it can decide about reconnecting.

use crate::error::DeliveryResult;
use crate::protocol::{parse_inbound, InboundEvent, InitMessage};
use crate::queue::SegmentQueue;
use crate::transport::{SessionTarget, WsStream};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Connection lifecycle: `Connecting -> Open -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Receives streamed reply text (the chat transcript). This core forwards it
/// verbatim and does not interpret it.
pub trait TranscriptSink: Send + Sync {
    fn on_transcript(&self, text: &str);
}

/// Notification that the channel ended, and whether the owner asked for it.
#[derive(Debug, Clone, Copy)]
pub struct ChannelClosed {
    pub intentional: bool,
}

/// One live session connection. Owned exclusively by the orchestrator for a
/// single companion binding; superseded or destroyed with the binding.
pub struct SessionChannel {
    target: SessionTarget,
    state: Arc<Mutex<ChannelState>>,
    closed_intentionally: Arc<AtomicBool>,
    writer: Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>,
    reader: JoinHandle<()>,
}

impl SessionChannel {
    /// Take ownership of a negotiated stream: send the init message, then
    /// start the reader task.
    pub async fn open(
        stream: WsStream,
        target: SessionTarget,
        username: &str,
        queue: SegmentQueue,
        transcript: Option<Arc<dyn TranscriptSink>>,
        closed_tx: mpsc::UnboundedSender<ChannelClosed>,
    ) -> DeliveryResult<Self> {
        let state = Arc::new(Mutex::new(ChannelState::Connecting));
        let closed_intentionally = Arc::new(AtomicBool::new(false));

        let (mut write, read) = stream.split();
        let init = InitMessage::new(username).to_json()?;
        write.send(Message::Text(init)).await?;
        *state.lock().unwrap_or_else(|e| e.into_inner()) = ChannelState::Open;
        info!("session channel open on {}", target);

        let reader = tokio::spawn(read_loop(
            read,
            queue,
            transcript,
            Arc::clone(&state),
            Arc::clone(&closed_intentionally),
            closed_tx,
        ));

        Ok(Self {
            target,
            state,
            closed_intentionally,
            writer: Arc::new(tokio::sync::Mutex::new(write)),
            reader,
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn closed_intentionally(&self) -> bool {
        self.closed_intentionally.load(Ordering::SeqCst)
    }

    /// Intentional teardown. Flags the close first so the reader does not
    /// report it as a drop, then closes the websocket.
    pub async fn close(&self) {
        self.closed_intentionally.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ChannelState::Closed;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            debug!("close frame send failed (already gone): {}", e);
        }
        self.reader.abort();
        info!("session channel closed on {}", self.target);
    }
}

async fn read_loop(
    mut read: futures_util::stream::SplitStream<WsStream>,
    queue: SegmentQueue,
    transcript: Option<Arc<dyn TranscriptSink>>,
    state: Arc<Mutex<ChannelState>>,
    closed_intentionally: Arc<AtomicBool>,
    closed_tx: mpsc::UnboundedSender<ChannelClosed>,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_inbound(&text) {
                Ok(InboundEvent::Segment(segment)) => {
                    debug!(
                        "segment arrived: {} (first={}, last={})",
                        segment.resource_ref, segment.is_first, segment.is_last
                    );
                    if let Err(e) = queue.push(segment) {
                        warn!("segment dropped, queue gone: {}", e);
                        break;
                    }
                }
                Ok(InboundEvent::Transcript(text)) => {
                    if let Some(ref sink) = transcript {
                        sink.on_transcript(&text);
                    }
                }
                Ok(InboundEvent::Unrecognized) => debug!("ignoring unrecognized frame"),
                // Parse errors are per-message; the channel stays alive.
                Err(e) => warn!("{}", e),
            },
            Ok(Message::Close(_)) => {
                debug!("server sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("session read error: {}", e);
                break;
            }
        }
    }

    *state.lock().unwrap_or_else(|e| e.into_inner()) = ChannelState::Closed;
    let intentional = closed_intentionally.load(Ordering::SeqCst);
    let _ = closed_tx.send(ChannelClosed { intentional });
    debug!("session reader finished (intentional={})", intentional);
}
