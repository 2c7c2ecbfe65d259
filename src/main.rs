mod audio;
mod config;
mod link;
mod protocol;
mod session;
mod tasks;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use audio::{
    AlsaCapture, AlsaPlayback, CaptureSource, DecoderPolicy, Mp3Capability, RenderSink,
    StreamDecoder,
};
use config::Config;
use link::FrameSink;
use session::{CaptureFactory, DecoderFactory, SessionController, SharedState, SinkFactory};
use tasks::LinkSystem;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "serial_audio_link.toml".to_string());
    let config = Config::load_or_default(Path::new(&config_path));

    let (reader, writer) = link::open(&config)?;
    let frames: Arc<dyn FrameSink> = writer;

    let shared = SharedState::new();

    let playback_device = config.playback_device.clone();
    let playback_rate = config.playback_sample_rate;
    let sink_factory: SinkFactory = Box::new(move || {
        let sink = AlsaPlayback::open(&playback_device, playback_rate)?;
        Ok(Box::new(sink) as Box<dyn RenderSink>)
    });

    let policy = DecoderPolicy {
        min_decode_bytes: config.min_decode_bytes,
        error_streak_threshold: config.error_streak_threshold,
        resync_max_skip: config.resync_max_skip,
        max_scratch_samples: config.max_scratch_samples,
    };
    let staging_capacity = config.staging_capacity;
    let decoder_factory: DecoderFactory = Box::new(move || {
        StreamDecoder::new(
            Box::new(Mp3Capability::new()),
            audio::is_mp3_sync,
            staging_capacity,
            policy.clone(),
        )
    });

    let capture_device = config.capture_device.clone();
    let capture_rate = config.capture_sample_rate;
    let capture_factory: CaptureFactory = Box::new(move || {
        let source = AlsaCapture::open(&capture_device, capture_rate)?;
        Ok(Box::new(source) as Box<dyn CaptureSource>)
    });

    let controller = SessionController::new(
        shared.clone(),
        frames.clone(),
        sink_factory,
        decoder_factory,
        capture_factory,
    );
    let capture = controller.capture_slot();

    let mut system = LinkSystem::start(
        &config,
        reader,
        controller,
        shared.clone(),
        frames,
        capture,
    )?;

    // Periodic status reporter, logs every mode transition.
    let status_shared = shared.clone();
    tokio::spawn(async move {
        let mut last = status_shared.mode();
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let mode = status_shared.mode();
            if mode != last {
                log::info!("mode: {:?} -> {:?}", last, mode);
                last = mode;
            }
        }
    });

    signal::ctrl_c().await?;
    log::info!("received Ctrl+C, shutting down");
    system.stop();
    Ok(())
}
