//! Asynchronous video recorder
//!
//! `submit` only enqueues; a single worker thread drives the encoder and
//! encodes images in submission order. `close` disconnects the queue, which
//! lets the worker drain everything still queued before the final flush and
//! close run on the caller's thread.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::encoder::{EncoderError, EncoderSettings, Image, MediaEncoder};

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to open encoder: {0}")]
    Init(#[source] EncoderError),

    #[error("encoding failed after {frames} frames: {source}")]
    Encode {
        frames: u64,
        #[source]
        source: EncoderError,
    },

    #[error("failed to finalize recording: {0}")]
    Finalize(#[source] EncoderError),

    #[error("recording session is finished, create a new recorder")]
    Finished,

    #[error("failed to spawn encoding worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("encoding worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Closed,
    Open,
    /// Closed after a session; cannot be reopened
    Finished,
}

type SharedEncoder = Arc<Mutex<Box<dyn MediaEncoder>>>;

struct WorkerOutcome {
    frames: u64,
    failure: Option<EncoderError>,
}

type WorkerJob = Box<dyn FnOnce() -> WorkerOutcome + Send>;

struct Inner {
    state: RecorderState,
    tx: Option<flume::Sender<Image>>,
    worker: Option<JoinHandle<WorkerOutcome>>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    encoded: AtomicU64,
}

/// One recording session writing to one destination
pub struct VideoRecorder {
    inner: Mutex<Inner>,
    encoder: SharedEncoder,
    counters: Arc<Counters>,
}

impl VideoRecorder {
    pub fn new(encoder: Box<dyn MediaEncoder>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RecorderState::Closed,
                tx: None,
                worker: None,
            }),
            encoder: Arc::new(Mutex::new(encoder)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == RecorderState::Open
    }

    /// Images accepted by `submit`
    pub fn frames_submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    /// Images the encoder has accepted
    pub fn frames_encoded(&self) -> u64 {
        self.counters.encoded.load(Ordering::Relaxed)
    }

    /// Open the encoder and start the worker. No-op if already open.
    pub fn open(&self, settings: &EncoderSettings) -> Result<(), RecordError> {
        self.open_with(settings, |job| {
            thread::Builder::new().name("recorder".into()).spawn(job)
        })
    }

    fn open_with<S>(&self, settings: &EncoderSettings, spawn: S) -> Result<(), RecordError>
    where
        S: FnOnce(WorkerJob) -> io::Result<JoinHandle<WorkerOutcome>>,
    {
        let mut inner = self.inner.lock();
        match inner.state {
            RecorderState::Open => return Ok(()),
            RecorderState::Finished => return Err(RecordError::Finished),
            RecorderState::Closed => {}
        }

        let opened = self.encoder.lock().open(settings);
        if let Err(e) = opened {
            error!("Failed to open encoder for {}: {}", settings.destination.display(), e);
            self.release_encoder("failed open");
            inner.state = RecorderState::Finished;
            return Err(RecordError::Init(e));
        }

        let (tx, rx) = flume::unbounded();
        let encoder = self.encoder.clone();
        let counters = self.counters.clone();
        let worker = match spawn(Box::new(move || encode_worker(encoder, rx, counters))) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Failed to spawn encoding worker: {}", e);
                self.release_encoder("failed spawn");
                inner.state = RecorderState::Finished;
                return Err(RecordError::Spawn(e));
            }
        };

        inner.tx = Some(tx);
        inner.worker = Some(worker);
        inner.state = RecorderState::Open;
        info!(
            "Recording {}x{} @ {} fps, {} bit/s to {}",
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.bit_rate,
            settings.destination.display()
        );
        Ok(())
    }

    /// Queue an image for encoding. Silently ignored unless open.
    pub fn submit(&self, image: Image) {
        let inner = self.inner.lock();
        let Some(tx) = inner.tx.as_ref() else {
            return;
        };
        if tx.send(image).is_err() {
            // the worker has already stopped on an encode failure
            trace!("Dropping image, encoder stopped");
            return;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("recorder_queue_depth").set(tx.len() as f64);
    }

    /// Drain the queue, flush and close the encoder. Idempotent.
    ///
    /// The encoder is flushed and closed even when encoding failed; the first
    /// error encountered is returned.
    pub fn close(&self) -> Result<(), RecordError> {
        let (tx, worker) = {
            let mut inner = self.inner.lock();
            if inner.state != RecorderState::Open {
                return Ok(());
            }
            inner.state = RecorderState::Finished;
            (inner.tx.take(), inner.worker.take())
        };

        if let Some(tx) = tx {
            info!("{} frames remaining", tx.len());
        }
        let Some(worker) = worker else {
            return Ok(());
        };

        let joined = worker.join();

        let (flushed, closed) = {
            let mut encoder = self.encoder.lock();
            (encoder.flush(), encoder.close())
        };

        let WorkerOutcome { frames, failure } = joined.map_err(|_| RecordError::WorkerPanicked)?;
        info!(frames, "Recording closed");

        if let Some(source) = failure {
            return Err(RecordError::Encode { frames, source });
        }
        flushed.map_err(RecordError::Finalize)?;
        closed.map_err(RecordError::Finalize)?;
        Ok(())
    }

    /// Best-effort close of an encoder that never got a worker.
    fn release_encoder(&self, after: &str) {
        if let Err(e) = self.encoder.lock().close() {
            warn!("Encoder close after {}: {}", after, e);
        }
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close recorder: {}", e);
        }
    }
}

fn encode_worker(
    encoder: SharedEncoder,
    rx: flume::Receiver<Image>,
    counters: Arc<Counters>,
) -> WorkerOutcome {
    debug!("Encoding worker started");
    let mut pts = 0u64;

    // Ends once every sender is gone and the queue is empty
    for image in rx.iter() {
        let started = Instant::now();
        let encoded = encoder.lock().submit_image(&image, pts);
        if let Err(e) = encoded {
            error!(pts, "Failed to encode frame: {}", e);
            return WorkerOutcome {
                frames: pts,
                failure: Some(e),
            };
        }
        pts += 1;

        counters.encoded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("recorder_frames_encoded_total").increment(1);
        metrics::histogram!("encode_time_us").record(started.elapsed().as_micros() as f64);
        metrics::gauge!("recorder_queue_depth").set(rx.len() as f64);
        trace!(pts, "Encoded frame");
    }

    debug!(frames = pts, "Encoding worker drained");
    WorkerOutcome {
        frames: pts,
        failure: None,
    }
}
