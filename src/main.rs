//! Stereo capture binary: load config, open the rig, record until quit

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use stereocap::capture;
use stereocap::pipeline::{StereoCamera, StereoSettings};
use stereocap::record::{self, EncoderSettings, VideoRecorder};
use stereocap::session::run_session;
use stereocap::utils;
use stereocap::Config;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stereocap=info"));
    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()),
    );
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Stereocap launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    stereocap::CONFIG.store(Arc::new(config.clone()));

    let camera = Arc::new(StereoCamera::new(StereoSettings::from(&config.stereo)));
    let enumerator = capture::enumerator_for(&config)?;
    camera.open(
        enumerator.as_ref(),
        &config.stereo.left_camera,
        &config.stereo.right_camera,
    )?;
    camera.configure(config.stereo.feature_profile.clone())?;

    let destination = utils::session_file_name(
        &config.recording.directory,
        &config.recording.file_prefix,
        &config.recording.extension,
        &Local::now(),
    );
    let settings = EncoderSettings::from_config(
        &config.recording,
        destination,
        config.capture.width * 2,
        config.capture.height,
        camera.frame_rate(),
    );
    let recorder = Arc::new(VideoRecorder::new(record::encoder_for(&config.recording)?));
    recorder.open(&settings)?;

    let quit = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = run_session(camera, recorder, quit).await?;
    info!(
        frames = report.encoded,
        seconds = report.duration.as_secs_f64(),
        "Session complete"
    );
    info!("Stereocap shutting down");
    Ok(())
}
