//! # Companion Voice - Spoken-Reply Delivery Pipeline
//!
//! This crate delivers a virtual companion's spoken replies in real time: a
//! persistent session to the voice backend streams each reply as an ordered
//! series of audio segments, which are played exactly once, in arrival order,
//! without overlap, while the avatar's talking animation is kept in lockstep
//! with audio that is actually sounding.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Companion Binding                        │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────┐      │
//! │  │  Transport  │→ │   Session    │→ │  Segment Queue  │      │
//! │  │ Negotiator  │  │   Channel    │  │  (FIFO drain)   │      │
//! │  └─────────────┘  └──────────────┘  └─────────────────┘      │
//! │         ↑                ↓                   ↓               │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────┐      │
//! │  │  Fallback   │  │  Transcript  │  │ Playback Engine │      │
//! │  │   Poller    │  │     Sink     │  │    (rodio)      │      │
//! │  └─────────────┘  └──────────────┘  └────────┬────────┘      │
//! │                                     ┌────────▼────────┐      │
//! │                                     │ Animation Gate  │      │
//! │                                     │ (talking/idle)  │      │
//! │                                     └─────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One binding exists per active companion; switching companions tears the
//! whole pipeline down and builds a fresh one. The central invariant the
//! design protects: one drain loop, one active playback resource, per binding.

pub mod channel;
pub mod config;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod orchestrator;
pub mod playback;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use channel::{ChannelClosed, ChannelState, SessionChannel, TranscriptSink};
pub use config::DeliveryConfig;
pub use error::{DeliveryError, DeliveryResult};
pub use fallback::FallbackPoller;
pub use gate::{AnimationGate, AnimationSink, NullSink};
pub use orchestrator::CompanionBinding;
pub use playback::{
    resolve_resource, NoUnlock, PlaybackState, PrimingUnlock, RodioPlayer, SegmentPlayer,
    UnlockHandle, UnlockStrategy,
};
pub use protocol::{parse_inbound, InboundEvent, InitMessage};
pub use queue::{AudioSegment, SegmentQueue};
pub use transport::{candidate_targets, negotiate, SessionTarget, WsStream};
