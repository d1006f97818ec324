// presentation-coach/crates/presentation-coach/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use dotenvy::dotenv;
#[cfg(feature = "cli")]
use presentation_coach::{
    model_runtime::{Script, ScriptedRuntimeFactory},
    telemetry::init_tracing,
    CallbackDispatcher, Config, ImageFrame, ModelKind, PresentationCoach,
};
#[cfg(feature = "cli")]
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
#[cfg(feature = "cli")]
use tracing::{info, warn};

#[cfg(feature = "cli")]
const DEMO_RESPONSE: &str = "Eye Contact: B+\nFraming: A\nPosture: B\nLighting: C+\n\
Explanation: Good framing and steady posture; the face is slightly underexposed.";

/// Feeds a simulated camera into the coach using the scripted runtime and
/// prints every event as a JSON line.
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "presentation-coach", version, about)]
struct Args {
    /// Simulated camera frame rate
    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// How long to run the camera, in seconds
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Overrides COACH_MIN_INTERVAL_MS
    #[arg(long)]
    min_interval_ms: Option<u64>,

    /// Delay between streamed tokens
    #[arg(long, default_value_t = 5)]
    token_delay_ms: u64,

    /// Canned model response to replay
    #[arg(long)]
    response: Option<String>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut cfg = Config::from_env()?;
    if let Some(ms) = args.min_interval_ms {
        cfg.min_interval_ms = ms;
    }
    if cfg.model_paths(ModelKind::Vision).is_none() {
        // the scripted runtime never opens these
        cfg.vision_model_path = "llava.pte".to_string();
        cfg.vision_tokenizer_path = "tokenizer.bin".to_string();
    }
    cfg.print_config();

    let response = args.response.unwrap_or_else(|| DEMO_RESPONSE.to_string());
    let script = Script::from_response(&response).with_token_delay(Duration::from_millis(args.token_delay_ms));
    let factory = Arc::new(ScriptedRuntimeFactory::new(script));

    let (dispatcher, mut events) = CallbackDispatcher::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", event.to_json());
        }
    });

    let coach = PresentationCoach::start(cfg, factory, dispatcher)?;
    for (kind, outcome) in coach.load_from_config() {
        if let Err(e) = outcome {
            warn!("Could not load {} model: {}", kind, e);
        }
    }
    coach.wait_settled(ModelKind::Vision).await;

    info!("📷 Simulated camera at {} fps for {}s", args.fps, args.duration_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(args.fps.max(1))));
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut frame_index: u64 = 0;
    while Instant::now() < deadline {
        ticker.tick().await;
        let shade = (frame_index % 256) as u8;
        coach.offer_frame(ImageFrame::solid_rgb(336, 336, [shade, 128, 255 - shade]));
        frame_index += 1;
    }

    let stats = coach.stats();
    coach.shutdown();
    drop(coach);
    printer.await?;

    println!("{}", serde_json::json!({ "event": "stats", "stats": stats }));
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
