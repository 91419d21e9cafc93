//! One recording session: grab, compose and record until quit or fault
//!
//! The grab loop runs on a blocking thread. The session ends on the first of
//! a quit request, a controller fault event or the loop ending by itself;
//! acquisition is then stopped before the recorder is drained and closed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::pipeline::{Side, StereoCamera, SyncError, SyncEvent, SyncStats};
use crate::record::{compose_side_by_side, ComposeError, RecordError, VideoRecorder};
use crate::utils::Stopwatch;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{side} camera failed: {error}")]
    Camera {
        side: Side,
        #[source]
        error: SyncError,
    },

    #[error("acquisition failed: {0}")]
    Grab(#[from] SyncError),

    #[error("failed to compose pair: {0}")]
    Compose(#[from] ComposeError),

    #[error("acquisition stopped unexpectedly")]
    Stopped,

    #[error("failed to close recording: {0}")]
    Record(#[from] RecordError),

    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What a finished session did
#[derive(Debug, Clone, Copy)]
pub struct SessionReport {
    pub submitted: u64,
    pub encoded: u64,
    pub stats: SyncStats,
    pub duration: Duration,
}

/// Consumer loop: runs until the controller stops grabbing or faults
fn record_loop(camera: &StereoCamera, recorder: &VideoRecorder) -> Result<u64, SessionError> {
    let mut pairs = 0u64;
    let mut watch = Stopwatch::new();
    loop {
        watch.reset();
        let pair = match camera.grab() {
            Ok(pair) => pair,
            Err(SyncError::NotGrabbing) => return Ok(pairs),
            Err(e) => return Err(e.into()),
        };
        let grabbed = watch.split();

        let image = compose_side_by_side(&pair.left, &pair.right)?;
        recorder.submit(image);
        pairs += 1;
        trace!(
            sequence = pair.sequence(),
            grab_us = grabbed.as_micros() as u64,
            submit_us = watch.split().as_micros() as u64,
            "Pair submitted"
        );
    }
}

async fn next_fault(events: flume::Receiver<SyncEvent>) -> (Side, SyncError) {
    while let Ok(event) = events.recv_async().await {
        match event {
            SyncEvent::Fault { side, error } => return (side, error),
            other => debug!(?other, "Controller event"),
        }
    }
    std::future::pending().await
}

/// Start grabbing on a configured camera and record into an open recorder
/// until `quit` resolves or the controller faults.
///
/// Acquisition is always stopped and the recorder always closed before this
/// returns. A fault is returned as an error after that cleanup.
pub async fn run_session<Q>(
    camera: Arc<StereoCamera>,
    recorder: Arc<VideoRecorder>,
    quit: Q,
) -> Result<SessionReport, SessionError>
where
    Q: Future<Output = ()>,
{
    let clock = Stopwatch::new();
    let events = camera.events();
    camera.start_grab()?;

    let mut grab_loop = {
        let camera = camera.clone();
        let recorder = recorder.clone();
        tokio::task::spawn_blocking(move || record_loop(&camera, &recorder))
    };

    let mut fault = None;
    let mut loop_result = None;
    tokio::select! {
        _ = quit => info!("Quit requested"),
        (side, error) = next_fault(events) => {
            error!("Camera exception on {} side: {}", side, error);
            fault = Some(SessionError::Camera { side, error });
        }
        joined = &mut grab_loop => loop_result = Some(joined),
    }
    let ended_by_itself = loop_result.is_some();

    // Stop acquisition first so no more pairs arrive, then drain the recorder
    let stopper = camera.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopper.stop_grab()).await {
        error!("Stopping acquisition failed: {}", e);
    }

    let loop_result = match loop_result {
        Some(result) => result,
        None => grab_loop.await,
    };
    let loop_error = match loop_result {
        Ok(Ok(pairs)) => {
            info!("Recorded {} pairs", pairs);
            None
        }
        Ok(Err(e)) => {
            error!("Grab loop ended: {}", e);
            Some(e)
        }
        Err(e) => Some(SessionError::Task(e)),
    };
    let stats = camera.stats();
    info!(?stats, "Acquisition statistics");

    let closer = recorder.clone();
    let closed = tokio::task::spawn_blocking(move || closer.close()).await;
    let report = SessionReport {
        submitted: recorder.frames_submitted(),
        encoded: recorder.frames_encoded(),
        stats,
        duration: clock.elapsed(),
    };
    info!(
        submitted = report.submitted,
        encoded = report.encoded,
        seconds = report.duration.as_secs_f64(),
        "Recorder closed"
    );

    if let Some(fault) = fault.or(loop_error) {
        return Err(fault);
    }
    if ended_by_itself {
        return Err(SessionError::Stopped);
    }
    closed??;
    Ok(report)
}
