//! Session orchestrator: wires transport, channel, queue, playback, and gate
//! together for one companion binding.
//!
//! Each binding owns its channel, queue, and playback state exclusively;
//! nothing is shared across bindings. A single supervisor task drives the
//! connection lifecycle, which is what makes "at most one reconnect in
//! flight" true by construction: reconnects are sequential arms of one loop,
//! never parallel tasks.

use crate::channel::{ChannelClosed, SessionChannel, TranscriptSink};
use crate::config::DeliveryConfig;
use crate::error::DeliveryResult;
use crate::fallback::FallbackPoller;
use crate::gate::{AnimationGate, AnimationSink};
use crate::playback::SegmentPlayer;
use crate::queue::{AudioSegment, SegmentQueue};
use crate::transport;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

struct SupervisorCtx {
    config: DeliveryConfig,
    base: Url,
    queue: SegmentQueue,
    transcript: Option<Arc<dyn TranscriptSink>>,
    channel: Arc<tokio::sync::Mutex<Option<SessionChannel>>>,
    // Liveness token: stale negotiations and reconnects for an unbound
    // binding check this before touching anything.
    alive: Arc<AtomicBool>,
}

/// The delivery pipeline for one active companion. Created on bind, torn
/// down when the companion changes, is deleted, or the view goes away.
pub struct CompanionBinding {
    queue: SegmentQueue,
    drain: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    player: Arc<dyn SegmentPlayer>,
    gate: AnimationGate,
    channel: Arc<tokio::sync::Mutex<Option<SessionChannel>>>,
    alive: Arc<AtomicBool>,
    base: Url,
    config: DeliveryConfig,
}

impl CompanionBinding {
    /// Bring up the pipeline: start the drain task, then let the supervisor
    /// negotiate a channel in the background. Binding succeeds even if the
    /// backend is not reachable yet; the failure surfaces through logs and
    /// the fallback path rather than blocking the view.
    pub async fn bind(
        config: DeliveryConfig,
        player: Arc<dyn SegmentPlayer>,
        sink: Arc<dyn AnimationSink>,
        transcript: Option<Arc<dyn TranscriptSink>>,
    ) -> DeliveryResult<Self> {
        let base = config.base_url()?;
        info!("binding companion delivery pipeline to {}", base);

        let gate = AnimationGate::new(sink, config.gate_grace);
        let (queue, drain) = SegmentQueue::start(
            Arc::clone(&player),
            gate.clone(),
            base.clone(),
            config.stall_timeout,
        );

        let channel = Arc::new(tokio::sync::Mutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));

        let ctx = SupervisorCtx {
            config: config.clone(),
            base: base.clone(),
            queue: queue.clone(),
            transcript,
            channel: Arc::clone(&channel),
            alive: Arc::clone(&alive),
        };
        let supervisor = tokio::spawn(supervise(ctx));

        Ok(Self {
            queue,
            drain,
            supervisor,
            player,
            gate,
            channel,
            alive,
            base,
            config,
        })
    }

    /// Whether a live session channel currently exists.
    pub fn is_connected(&self) -> bool {
        self.channel
            .try_lock()
            .map(|slot| slot.as_ref().map_or(false, |c| c.is_open()))
            .unwrap_or(false)
    }

    /// Push handle for this binding's queue.
    pub fn queue(&self) -> SegmentQueue {
        self.queue.clone()
    }

    /// Best-effort recovery after a chat exchange when the realtime session
    /// is down: poll the one-shot retrieval path and, on a hit, deliver the
    /// clip as a single whole-reply segment. Returns whether audio was found.
    pub async fn recover_reply_audio(&self, sent_at_ms: i64) -> bool {
        if !self.config.fallback_enabled {
            return false;
        }
        let poller = FallbackPoller::new(
            self.base.clone(),
            self.config.fallback_attempts,
            self.config.fallback_interval,
        );
        match poller.poll_recent_audio(sent_at_ms).await {
            Some(url) if self.alive.load(Ordering::SeqCst) => {
                let _ = self.queue.push(AudioSegment::new(url.as_str(), true, true));
                true
            }
            _ => false,
        }
    }

    /// Tear the binding down. Idempotent: a second call is a no-op, with no
    /// duplicate resource releases. The queue is abandoned, not drained.
    pub async fn unbind(&mut self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            debug!("unbind: already unbound");
            return;
        }
        info!("unbinding companion delivery pipeline");

        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }
        self.supervisor.abort();
        self.drain.abort();
        self.player.stop();
        self.gate.lower_now();
    }
}

impl Drop for CompanionBinding {
    fn drop(&mut self) {
        // Synchronous best-effort cleanup if unbind was never awaited. The
        // token swap makes release single-shot: after unbind this is a no-op.
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.supervisor.abort();
        self.drain.abort();
        self.player.stop();
    }
}

async fn supervise(ctx: SupervisorCtx) {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    if !connect(&ctx, &closed_tx).await {
        // Negotiation exhausted on first contact: the only automatic recovery
        // left is the secondary retrieval path.
        run_fallback(&ctx).await;
        return;
    }

    while let Some(ChannelClosed { intentional }) = closed_rx.recv().await {
        if intentional || !ctx.alive.load(Ordering::SeqCst) {
            break;
        }

        ctx.channel.lock().await.take();
        warn!(
            "session channel dropped; reconnecting in {:?}",
            ctx.config.reconnect_delay
        );
        tokio::time::sleep(ctx.config.reconnect_delay).await;

        if !ctx.alive.load(Ordering::SeqCst) {
            break;
        }
        if ctx.channel.lock().await.is_some() {
            // A channel already exists for this binding; never create a
            // parallel duplicate.
            debug!("reconnect skipped, channel already present");
            continue;
        }
        if !connect(&ctx, &closed_tx).await {
            run_fallback(&ctx).await;
            break;
        }
    }
    debug!("supervisor finished");
}

/// One negotiation + channel open. Returns false once everything failed;
/// the caller decides what that means (initial failure vs failed reconnect).
async fn connect(ctx: &SupervisorCtx, closed_tx: &mpsc::UnboundedSender<ChannelClosed>) -> bool {
    let negotiated = transport::negotiate(
        &ctx.base,
        &ctx.config.session_ports,
        ctx.config.connect_timeout,
    )
    .await;

    let (stream, target) = match negotiated {
        Ok(pair) => pair,
        Err(e) => {
            warn!("{}", e);
            return false;
        }
    };

    if !ctx.alive.load(Ordering::SeqCst) {
        debug!("binding gone during negotiation; dropping fresh stream");
        return false;
    }

    let opened = SessionChannel::open(
        stream,
        target,
        &ctx.config.username,
        ctx.queue.clone(),
        ctx.transcript.clone(),
        closed_tx.clone(),
    )
    .await;

    match opened {
        Ok(channel) => {
            let mut slot = ctx.channel.lock().await;
            if !ctx.alive.load(Ordering::SeqCst) {
                channel.close().await;
                return false;
            }
            *slot = Some(channel);
            true
        }
        Err(e) => {
            warn!("channel open failed: {}", e);
            false
        }
    }
}

async fn run_fallback(ctx: &SupervisorCtx) {
    if !ctx.config.fallback_enabled || !ctx.alive.load(Ordering::SeqCst) {
        return;
    }
    let poller = FallbackPoller::new(
        ctx.base.clone(),
        ctx.config.fallback_attempts,
        ctx.config.fallback_interval,
    );
    if let Some(url) = poller.poll_recent_audio(Utc::now().timestamp_millis()).await {
        if ctx.alive.load(Ordering::SeqCst) {
            let _ = ctx.queue.push(AudioSegment::new(url.as_str(), true, true));
        }
    }
}
