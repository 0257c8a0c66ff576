//! Demo: run the full delivery pipeline against a live backend.
//!
//! Reads `COMPANION_API_URL` / `COMPANION_USERNAME` from the environment (or
//! `.env`), binds the pipeline with the real rodio player, and prints avatar
//! state transitions until Ctrl-C.

use anyhow::Result;
use companion_voice::{
    AnimationSink, CompanionBinding, DeliveryConfig, NoUnlock, RodioPlayer, TranscriptSink,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

struct ConsoleAvatar;

impl AnimationSink for ConsoleAvatar {
    fn set_talking(&self, talking: bool) {
        if talking {
            println!("[avatar] talking");
        } else {
            println!("[avatar] idle");
        }
    }
}

struct ConsoleTranscript;

impl TranscriptSink for ConsoleTranscript {
    fn on_transcript(&self, text: &str) {
        println!("[reply] {}", text);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = DeliveryConfig::from_env();
    info!("connecting to {}", config.api_url);

    let player = Arc::new(RodioPlayer::new(
        Arc::new(NoUnlock),
        config.load_grace,
    )?);

    let mut binding = CompanionBinding::bind(
        config,
        player,
        Arc::new(ConsoleAvatar),
        Some(Arc::new(ConsoleTranscript)),
    )
    .await?;

    println!("pipeline bound; waiting for streamed replies (Ctrl-C to exit)");
    tokio::signal::ctrl_c().await?;

    binding.unbind().await;
    Ok(())
}
