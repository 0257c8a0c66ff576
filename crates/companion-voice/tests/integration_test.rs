//! Integration tests for the spoken-reply delivery pipeline.
//!
//! These run against local in-process servers and fake players, so no audio
//! hardware or external backend is needed.

use async_trait::async_trait;
use companion_voice::{
    AnimationSink, AudioSegment, AnimationGate, CompanionBinding, DeliveryConfig, DeliveryError,
    DeliveryResult, SegmentPlayer, SegmentQueue, SessionChannel, FallbackPoller,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone)]
struct PlayRecord {
    name: String,
    started: Instant,
    ended: Instant,
}

/// Fake player: records every playback with timestamps, can fail or hang on
/// chosen names, and flags any concurrent invocation.
struct RecordingPlayer {
    delay: Duration,
    fail_names: Vec<&'static str>,
    hang_names: Vec<&'static str>,
    active: AtomicBool,
    overlap: AtomicBool,
    plays: Mutex<Vec<PlayRecord>>,
}

impl RecordingPlayer {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail_names: Vec::new(),
            hang_names: Vec::new(),
            active: AtomicBool::new(false),
            overlap: AtomicBool::new(false),
            plays: Mutex::new(Vec::new()),
        })
    }

    fn with_failures(delay: Duration, fail: Vec<&'static str>, hang: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail_names: fail,
            hang_names: hang,
            active: AtomicBool::new(false),
            overlap: AtomicBool::new(false),
            plays: Mutex::new(Vec::new()),
        })
    }

    fn played_names(&self) -> Vec<String> {
        self.plays.lock().unwrap().iter().map(|p| p.name.clone()).collect()
    }

    fn assert_no_overlap(&self) {
        assert!(!self.overlap.load(Ordering::SeqCst), "two playbacks ran concurrently");
        let plays = self.plays.lock().unwrap();
        for pair in plays.windows(2) {
            assert!(
                pair[0].ended <= pair[1].started,
                "play intervals interleaved: {:?} then {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

#[async_trait]
impl SegmentPlayer for RecordingPlayer {
    async fn play(&self, url: &Url) -> DeliveryResult<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        let name = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_string();

        if self.hang_names.contains(&name.as_str()) {
            // Simulates a player that never reports completion.
            sleep(Duration::from_secs(3600)).await;
        }

        let started = Instant::now();
        sleep(self.delay).await;
        let ended = Instant::now();

        self.plays.lock().unwrap().push(PlayRecord {
            name: name.clone(),
            started,
            ended,
        });
        self.active.store(false, Ordering::SeqCst);

        if self.fail_names.contains(&name.as_str()) {
            return Err(DeliveryError::Playback(format!("{} refused to decode", name)));
        }
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSink {
    transitions: Mutex<Vec<(bool, Instant)>>,
}

impl AnimationSink for RecordingSink {
    fn set_talking(&self, talking: bool) {
        self.transitions.lock().unwrap().push((talking, Instant::now()));
    }
}

impl RecordingSink {
    fn states(&self) -> Vec<bool> {
        self.transitions.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

fn segment_json(name: &str, is_first: u8, is_end: u8) -> String {
    format!(
        r#"{{"Topic":"human","Data":{{"HttpValue":"/samples/{}","Text":"","IsFirst":{},"IsEnd":{}}}}}"#,
        name, is_first, is_end
    )
}

fn base_url() -> Url {
    Url::parse("http://127.0.0.1:5000").unwrap()
}

#[tokio::test]
async fn scenario_a_ordered_playback_with_gate() {
    let player = RecordingPlayer::new(Duration::from_millis(50));
    let sink = Arc::new(RecordingSink::default());
    let gate = AnimationGate::new(sink.clone(), Duration::from_millis(100));
    let (queue, drain) =
        SegmentQueue::start(player.clone(), gate, base_url(), Duration::from_secs(5));

    queue.push(AudioSegment::new("a.wav", true, false)).unwrap();
    queue.push(AudioSegment::new("b.wav", false, true)).unwrap();

    sleep(Duration::from_millis(500)).await;
    drain.abort();

    assert_eq!(player.played_names(), vec!["a.wav", "b.wav"]);
    player.assert_no_overlap();

    // Gate raised once at the start, lowered once after the reply plus grace.
    assert_eq!(sink.states(), vec![true, false]);
    let transitions = sink.transitions.lock().unwrap().clone();
    let plays = player.plays.lock().unwrap().clone();
    assert!(transitions[0].1 <= plays[0].started, "gate raised after first play started");
    assert!(
        transitions[1].1 >= plays[1].ended + Duration::from_millis(90),
        "gate lowered before the grace delay elapsed"
    );
}

#[tokio::test]
async fn order_preserved_regardless_of_latency() {
    // All segments share one player delay, but pushes arrive faster than
    // playback; ordering must still be strict FIFO.
    let player = RecordingPlayer::new(Duration::from_millis(40));
    let sink = Arc::new(RecordingSink::default());
    let gate = AnimationGate::new(sink, Duration::from_millis(10));
    let (queue, drain) =
        SegmentQueue::start(player.clone(), gate, base_url(), Duration::from_secs(5));

    for name in ["s1.wav", "s2.wav", "s3.wav", "s4.wav"] {
        queue.push(AudioSegment::new(name, false, false)).unwrap();
    }

    sleep(Duration::from_millis(400)).await;
    drain.abort();

    assert_eq!(player.played_names(), vec!["s1.wav", "s2.wav", "s3.wav", "s4.wav"]);
    player.assert_no_overlap();
}

#[tokio::test]
async fn scenario_d_failed_segment_does_not_halt_reply() {
    let player = RecordingPlayer::with_failures(
        Duration::from_millis(20),
        vec!["bad.wav"],
        Vec::new(),
    );
    let sink = Arc::new(RecordingSink::default());
    let gate = AnimationGate::new(sink.clone(), Duration::from_millis(30));
    let (queue, drain) =
        SegmentQueue::start(player.clone(), gate, base_url(), Duration::from_secs(5));

    queue.push(AudioSegment::new("bad.wav", true, false)).unwrap();
    queue.push(AudioSegment::new("good.wav", false, true)).unwrap();

    sleep(Duration::from_millis(300)).await;
    drain.abort();

    assert_eq!(player.played_names(), vec!["bad.wav", "good.wav"]);
    // Reply still terminates cleanly: gate lowered at the end.
    assert_eq!(sink.states(), vec![true, false]);
}

#[tokio::test]
async fn stalled_segment_is_skipped_after_safety_timeout() {
    let player = RecordingPlayer::with_failures(
        Duration::from_millis(20),
        Vec::new(),
        vec!["stuck.wav"],
    );
    let sink = Arc::new(RecordingSink::default());
    let gate = AnimationGate::new(sink, Duration::from_millis(10));
    // Short safety timeout so the test stays fast.
    let (queue, drain) =
        SegmentQueue::start(player.clone(), gate, base_url(), Duration::from_millis(100));

    queue.push(AudioSegment::new("stuck.wav", true, false)).unwrap();
    queue.push(AudioSegment::new("after.wav", false, true)).unwrap();

    sleep(Duration::from_millis(400)).await;
    drain.abort();

    // The stuck segment never completed, but the next one still played.
    assert_eq!(player.played_names(), vec!["after.wav"]);
}

#[tokio::test]
async fn scenario_b_negotiation_stops_at_first_live_endpoint() {
    // Candidate 1: nothing listening (bind then drop to reserve a dead port).
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    // Candidate 2: a live websocket endpoint.
    let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = live.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = live.accept().await.unwrap();
        let _ws = accept_async(stream).await.unwrap();
        sleep(Duration::from_secs(5)).await;
    });

    // Candidate 3: must never be contacted.
    let third = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let third_port = third.local_addr().unwrap().port();
    let third_contacted = Arc::new(AtomicU32::new(0));
    let counter = third_contacted.clone();
    tokio::spawn(async move {
        while let Ok((_stream, _)) = third.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let base = Url::parse("http://127.0.0.1:5000").unwrap();
    let (_stream, target) = companion_voice::negotiate(
        &base,
        &[dead_port, live_port, third_port],
        Duration::from_millis(500),
    )
    .await
    .unwrap();

    assert_eq!(target.port, live_port);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(third_contacted.load(Ordering::SeqCst), 0, "later candidate was attempted");
}

#[tokio::test]
async fn channel_sends_init_and_routes_segments() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // The first frame must be the bit-exact init message.
        let init = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(init.to_text().unwrap()).unwrap();
        assert_eq!(value["Username"], "tester");
        assert_eq!(value["Output"], true);

        ws.send(Message::Text(segment_json("one.wav", 1, 1))).await.unwrap();
        // Unknown topic and garbage must both be survivable.
        ws.send(Message::Text(r#"{"Topic":"panel","Data":{}}"#.to_string())).await.unwrap();
        ws.send(Message::Text("{not json".to_string())).await.unwrap();
        ws.send(Message::Text(segment_json("two.wav", 1, 1))).await.unwrap();
        sleep(Duration::from_secs(5)).await;
    });

    let player = RecordingPlayer::new(Duration::from_millis(10));
    let sink = Arc::new(RecordingSink::default());
    let gate = AnimationGate::new(sink, Duration::from_millis(10));
    let (queue, drain) =
        SegmentQueue::start(player.clone(), gate, base_url(), Duration::from_secs(5));

    let base = Url::parse("http://127.0.0.1:5000").unwrap();
    let (stream, target) =
        companion_voice::negotiate(&base, &[port], Duration::from_millis(500)).await.unwrap();
    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();
    let channel = SessionChannel::open(stream, target, "tester", queue, None, closed_tx)
        .await
        .unwrap();
    assert!(channel.is_open());

    sleep(Duration::from_millis(300)).await;
    // Malformed frames were dropped without killing the channel; both real
    // segments made it through in order.
    assert_eq!(player.played_names(), vec!["one.wav", "two.wav"]);
    assert!(channel.is_open());

    channel.close().await;
    assert!(!channel.is_open());
    assert!(channel.closed_intentionally());
    drain.abort();
}

#[tokio::test]
async fn scenario_c_single_reconnect_preserves_pending_segments() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handshakes = Arc::new(AtomicU32::new(0));

    let counter = handshakes.clone();
    tokio::spawn(async move {
        // First connection: two segments, then an unexpected drop.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        counter.fetch_add(1, Ordering::SeqCst);
        let _init = ws.next().await;
        ws.send(Message::Text(segment_json("seg1.wav", 1, 0))).await.unwrap();
        ws.send(Message::Text(segment_json("seg2.wav", 0, 0))).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        drop(ws);

        // Second connection (the reconnect): the reply's tail.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        counter.fetch_add(1, Ordering::SeqCst);
        let _init = ws.next().await;
        ws.send(Message::Text(segment_json("seg3.wav", 0, 1))).await.unwrap();
        sleep(Duration::from_secs(10)).await;
    });

    let config = DeliveryConfig {
        api_url: "http://127.0.0.1:5000".to_string(),
        session_ports: vec![port],
        connect_timeout: Duration::from_millis(500),
        reconnect_delay: Duration::from_millis(200),
        gate_grace: Duration::from_millis(50),
        fallback_enabled: false,
        ..Default::default()
    };

    let player = RecordingPlayer::new(Duration::from_millis(150));
    let sink = Arc::new(RecordingSink::default());
    let mut binding = CompanionBinding::bind(config, player.clone(), sink.clone(), None)
        .await
        .unwrap();

    sleep(Duration::from_millis(1500)).await;

    // Exactly one reconnect happened, and segments queued before the drop
    // played in order alongside the post-reconnect tail.
    assert_eq!(handshakes.load(Ordering::SeqCst), 2);
    assert_eq!(player.played_names(), vec!["seg1.wav", "seg2.wav", "seg3.wav"]);
    player.assert_no_overlap();
    assert_eq!(sink.states(), vec![true, false]);
    assert!(binding.is_connected());

    binding.unbind().await;
    binding.unbind().await; // idempotent
    assert!(!binding.is_connected());
}

#[tokio::test]
async fn scenario_e_fallback_poller_finds_recent_audio() {
    let app = axum::Router::new().route(
        "/audio/:name",
        axum::routing::head(|| async {}),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    let poller = FallbackPoller::new(base, 3, Duration::from_millis(20));
    let found = poller
        .poll_recent_audio(chrono::Utc::now().timestamp_millis())
        .await;

    let url = found.expect("fallback should find the probed clip");
    assert!(url.path().starts_with("/audio/sample-"));
    assert!(url.path().ends_with(".wav"));
}
