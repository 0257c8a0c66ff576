//! Playback engine: resolve a segment reference and play it to completion.
//!
//! The pipeline only ever talks to the `SegmentPlayer` trait; `RodioPlayer` is
//! the production implementation. Decoding and the blocking wait for
//! end-of-audio live on a dedicated thread (rodio's `OutputStream` is not
//! Send), with completion reported back over a oneshot.

use crate::error::{DeliveryError, DeliveryResult};
use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{error, info, warn};
use url::Url;

/// Plays one resolved segment resource to completion. The returned future
/// resolves when audio has finished sounding (or failed); it is the only
/// signal that advances the segment queue.
#[async_trait]
pub trait SegmentPlayer: Send + Sync {
    async fn play(&self, url: &Url) -> DeliveryResult<()>;

    /// Abort any in-flight playback. Teardown path; default no-op.
    fn stop(&self) {}
}

/// Resolve a segment reference against the backend base address.
/// Absolute `http(s)` references pass through untouched; relative ones are
/// joined onto the base, with or without a leading slash.
pub fn resolve_resource(base: &Url, resource_ref: &str) -> DeliveryResult<Url> {
    if resource_ref.starts_with("http://") || resource_ref.starts_with("https://") {
        return Url::parse(resource_ref)
            .map_err(|e| DeliveryError::SegmentLoad(format!("bad resource url {:?}: {}", resource_ref, e)));
    }
    let base_str = base.as_str().trim_end_matches('/');
    let full = if resource_ref.starts_with('/') {
        format!("{}{}", base_str, resource_ref)
    } else {
        format!("{}/{}", base_str, resource_ref)
    };
    Url::parse(&full)
        .map_err(|e| DeliveryError::SegmentLoad(format!("bad resource ref {:?}: {}", resource_ref, e)))
}

/// Mutable playback flag: at most one active resource at any time.
#[derive(Debug, Default)]
pub struct PlaybackState {
    playing: AtomicBool,
    active: Mutex<Option<String>>,
}

impl PlaybackState {
    /// Mark a resource active. Returns false if something was already playing.
    pub fn begin(&self, resource: &str) -> bool {
        let was_idle = !self.playing.swap(true, Ordering::SeqCst);
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(resource.to_string());
        was_idle
    }

    /// Clear the active resource (completion, error, or abort).
    pub fn finish(&self) {
        self.playing.store(false, Ordering::SeqCst);
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn active_resource(&self) -> Option<String> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Platform capability seam for autoplay restrictions. Desktop targets use
/// `NoUnlock`; WebView-style targets that refuse autoplay until a user gesture
/// use `PrimingUnlock`. The rest of the pipeline stays platform-agnostic.
#[async_trait]
pub trait UnlockStrategy: Send + Sync {
    /// Ensure audio output is allowed to start. `prime` plays a near-silent
    /// clip; a successful prime proves the platform will let audio through.
    async fn ensure_unlocked(
        &self,
        prime: &(dyn Fn() -> DeliveryResult<()> + Sync),
    ) -> DeliveryResult<()>;
}

/// No restriction: always unlocked.
#[derive(Debug, Default)]
pub struct NoUnlock;

#[async_trait]
impl UnlockStrategy for NoUnlock {
    async fn ensure_unlocked(
        &self,
        _prime: &(dyn Fn() -> DeliveryResult<()> + Sync),
    ) -> DeliveryResult<()> {
        Ok(())
    }
}

/// Unlock by priming a near-silent playback once. If priming is blocked,
/// playback is deferred until the host reports a user interaction, then
/// retried once. `unlocked` never resets for the life of the process.
pub struct PrimingUnlock {
    unlocked: AtomicBool,
    interaction: Arc<Notify>,
}

impl PrimingUnlock {
    pub fn new() -> Self {
        Self {
            unlocked: AtomicBool::new(false),
            interaction: Arc::new(Notify::new()),
        }
    }

    /// Handle for the host UI to report user interactions (tap, click).
    pub fn interaction_handle(&self) -> UnlockHandle {
        UnlockHandle {
            interaction: Arc::clone(&self.interaction),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }
}

impl Default for PrimingUnlock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnlockStrategy for PrimingUnlock {
    async fn ensure_unlocked(
        &self,
        prime: &(dyn Fn() -> DeliveryResult<()> + Sync),
    ) -> DeliveryResult<()> {
        if self.unlocked.load(Ordering::SeqCst) {
            return Ok(());
        }
        match prime() {
            Ok(()) => {
                self.unlocked.store(true, Ordering::SeqCst);
                info!("audio output unlocked by priming playback");
                Ok(())
            }
            Err(e) => {
                warn!("priming playback blocked ({}); waiting for user interaction", e);
                self.interaction.notified().await;
                match prime() {
                    Ok(()) => {
                        self.unlocked.store(true, Ordering::SeqCst);
                        info!("audio output unlocked after user interaction");
                        Ok(())
                    }
                    Err(_) => Err(DeliveryError::AudioLocked),
                }
            }
        }
    }
}

/// Fire this from the host's input handling to release a deferred playback.
#[derive(Clone)]
pub struct UnlockHandle {
    interaction: Arc<Notify>,
}

impl UnlockHandle {
    pub fn user_interacted(&self) {
        self.interaction.notify_one();
    }
}

struct PlayCmd {
    bytes: Vec<u8>,
    done: oneshot::Sender<DeliveryResult<()>>,
}

/// Production player: fetch the resource over HTTP, decode with rodio, play
/// on the dedicated audio thread, resolve when the sink drains.
pub struct RodioPlayer {
    http: reqwest::Client,
    cmd_tx: std::sync::mpsc::Sender<PlayCmd>,
    sink: Arc<Sink>,
    state: Arc<PlaybackState>,
    unlock: Arc<dyn UnlockStrategy>,
    load_grace: Duration,
}

impl RodioPlayer {
    /// Create the player and its audio thread on the default output device.
    pub fn new(unlock: Arc<dyn UnlockStrategy>, load_grace: Duration) -> DeliveryResult<Self> {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<PlayCmd>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("companion-playback".to_string())
            .spawn(move || playback_thread(cmd_rx, ready_tx))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| DeliveryError::Playback("playback thread died during init".to_string()))??;

        info!("playback engine ready");
        Ok(Self {
            http: reqwest::Client::new(),
            cmd_tx,
            sink,
            state: Arc::new(PlaybackState::default()),
            unlock,
            load_grace,
        })
    }

    /// Shared playback flag, e.g. for UI state.
    pub fn state(&self) -> Arc<PlaybackState> {
        Arc::clone(&self.state)
    }

    fn prime_silent(&self) -> DeliveryResult<()> {
        let source = rodio::source::Zero::<f32>::new(1, 44100)
            .take_duration(Duration::from_millis(30));
        self.sink.append(source);
        Ok(())
    }

    async fn play_inner(&self, url: &Url) -> DeliveryResult<()> {
        self.unlock.ensure_unlocked(&|| self.prime_silent()).await?;

        let bytes = tokio::time::timeout(self.load_grace, async {
            let response = self.http.get(url.clone()).send().await?.error_for_status()?;
            Ok::<_, DeliveryError>(response.bytes().await?.to_vec())
        })
        .await
        .map_err(|_| {
            DeliveryError::SegmentLoad(format!(
                "fetch timed out after {:?}: {}",
                self.load_grace, url
            ))
        })??;

        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(PlayCmd {
                bytes,
                done: done_tx,
            })
            .map_err(|_| DeliveryError::Playback("playback thread gone".to_string()))?;

        done_rx
            .await
            .map_err(|_| DeliveryError::Playback("playback thread dropped completion".to_string()))?
    }
}

#[async_trait]
impl SegmentPlayer for RodioPlayer {
    async fn play(&self, url: &Url) -> DeliveryResult<()> {
        // The queue guarantees sequential calls; a concurrent call is a caller
        // bug, surfaced loudly but not fatal.
        if !self.state.begin(url.as_str()) {
            error!("playback engine invoked while busy: {}", url);
        }
        let result = self.play_inner(url).await;
        self.state.finish();
        result
    }

    fn stop(&self) {
        self.sink.stop();
        self.state.finish();
    }
}

fn playback_thread(
    cmd_rx: std::sync::mpsc::Receiver<PlayCmd>,
    ready_tx: std::sync::mpsc::Sender<DeliveryResult<Arc<Sink>>>,
) {
    let (stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(DeliveryError::Playback(e.to_string())));
            return;
        }
    };
    let sink = match Sink::try_new(&stream_handle) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            let _ = ready_tx.send(Err(DeliveryError::Playback(e.to_string())));
            return;
        }
    };
    if ready_tx.send(Ok(Arc::clone(&sink))).is_err() {
        return;
    }

    while let Ok(cmd) = cmd_rx.recv() {
        let result = Decoder::new(Cursor::new(cmd.bytes))
            .map_err(|e| DeliveryError::Playback(format!("decode failed: {}", e)))
            .map(|source| {
                sink.append(source.convert_samples::<f32>());
                sink.sleep_until_end();
            });
        let _ = cmd.done.send(result);
    }

    // Keep the output stream alive until the command channel closes.
    drop(stream);
}
