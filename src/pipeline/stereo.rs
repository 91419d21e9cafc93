//! Stereo synchronization controller
//!
//! Two workers feed one queue per camera:
//!
//! ```text
//!  trigger worker (reference)          follower worker
//!  ├─ mirror gain/exposure/balance     │
//!  ├─ wait: follower caught up         │
//!  ├─ wait: both trigger-ready         │
//!  ├─ pulse trigger line ─────edge────►├─ retrieve frame
//!  ├─ retrieve frame                   ├─ push follower queue
//!  ├─ push reference queue             └─ notify
//!  ├─ notify
//!  └─ Rate::sleep
//!                  │
//!                  ▼
//!           grab(): wait until both queues are non-empty,
//!                   pop both heads, compare sequence ids
//! ```
//!
//! The trigger worker never fires while the follower still owes a frame for
//! the previous trigger, so the heads of both queues always belong to the
//! same edge unless a camera skips or reorders frames. Such a mismatch is
//! reported as [`SyncError::SyncFault`] and never repaired by dropping frames.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use super::frame_queue::{FrameQueue, QueueStats};
use super::rate::Rate;
use crate::capture::{
    CaptureChannel, CaptureError, ColorChannel, DeviceDescriptor, DeviceEnumerator,
    FeatureProfile, Frame, OutputLevel, Scalar,
};
use crate::{utils, StereoConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Open,
    Configured,
    Grabbing,
    /// Workers are being joined
    Stopping,
}

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("{side} camera (serial {serial}) not found among {available} enumerated devices")]
    DeviceNotFound {
        side: Side,
        serial: String,
        available: usize,
    },

    #[error("{side} camera timed out after {waited:?} waiting for {operation}")]
    DeviceTimeout {
        side: Side,
        operation: &'static str,
        waited: Duration,
    },

    #[error("{side} camera failed: {source}")]
    Device {
        side: Side,
        #[source]
        source: CaptureError,
    },

    #[error("device enumeration failed: {0}")]
    Enumeration(#[source] CaptureError),

    #[error("stereo camera is not grabbing")]
    NotGrabbing,

    #[error("frame sequence mismatch: left {left}, right {right}")]
    SyncFault { left: u64, right: u64 },

    #[error("{side} frame queue overflowed at depth {depth}")]
    QueueOverflow { side: Side, depth: usize },

    #[error("operation requires the {expected} state, controller is {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: CameraState,
    },

    #[error("failed to spawn {0} worker: {1}")]
    Spawn(&'static str, String),
}

impl SyncError {
    fn device(side: Side, source: CaptureError) -> Self {
        match source {
            CaptureError::Timeout { operation, waited } => SyncError::DeviceTimeout {
                side,
                operation,
                waited,
            },
            source => SyncError::Device { side, source },
        }
    }
}

/// Lifecycle and failure notifications from the controller
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Stopped,
    /// A worker hit a fatal fault and exited
    Fault { side: Side, error: SyncError },
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct StereoSettings {
    pub frame_rate: f64,
    /// Camera that runs the automatic loops and owns the trigger line
    pub reference: Side,
    pub trigger_output: u32,
    pub trigger_pulse: Duration,
    pub trigger_ready_timeout: Duration,
    pub retrieve_timeout: Duration,
    pub queue_depth: usize,
    /// CPU core the trigger worker is pinned to
    pub trigger_core: Option<usize>,
}

impl Default for StereoSettings {
    fn default() -> Self {
        Self::from(&StereoConfig::default())
    }
}

impl From<&StereoConfig> for StereoSettings {
    fn from(config: &StereoConfig) -> Self {
        Self {
            frame_rate: config.frame_rate,
            reference: config.reference,
            trigger_output: config.trigger_output,
            trigger_pulse: Duration::from_millis(config.trigger_pulse_ms),
            trigger_ready_timeout: Duration::from_millis(config.trigger_ready_timeout_ms),
            retrieve_timeout: Duration::from_millis(config.retrieve_timeout_ms),
            queue_depth: config.queue_depth,
            trigger_core: config.trigger_core,
        }
    }
}

/// Two frames from the same trigger edge
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub left: Frame,
    pub right: Frame,
}

impl MatchedPair {
    pub fn sequence(&self) -> u64 {
        self.left.sequence()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub left: QueueStats,
    pub right: QueueStats,
    pub pairs: u64,
}

/// Locate both serial numbers in an enumerated device list.
pub fn find_cameras(
    left_serial: &str,
    right_serial: &str,
    devices: &[DeviceDescriptor],
) -> Result<(usize, usize), SyncError> {
    let position = |side: Side, serial: &str| {
        devices
            .iter()
            .position(|d| d.serial_number == serial)
            .ok_or_else(|| SyncError::DeviceNotFound {
                side,
                serial: serial.to_string(),
                available: devices.len(),
            })
    };
    Ok((
        position(Side::Left, left_serial)?,
        position(Side::Right, right_serial)?,
    ))
}

#[derive(Debug)]
enum WorkerExit {
    Stopped,
    Faulted(SyncError),
}

enum CycleError {
    Stopped,
    Fault(SyncError),
}

impl From<SyncError> for CycleError {
    fn from(error: SyncError) -> Self {
        CycleError::Fault(error)
    }
}

fn device(side: Side) -> impl Fn(CaptureError) -> CycleError {
    move |source| CycleError::Fault(SyncError::device(side, source))
}

struct Queues {
    frames: [FrameQueue; 2],
    retrieved: [u64; 2],
    fault: Option<SyncError>,
    accepting: bool,
    pairs: u64,
}

/// State shared between the consumer and both workers
struct Shared {
    queues: Mutex<Queues>,
    changed: Condvar,
    stop: [AtomicBool; 2],
    events: flume::Sender<SyncEvent>,
}

impl Shared {
    fn stopping(&self, side: Side) -> bool {
        self.stop[side.index()].load(Ordering::Acquire)
    }

    fn request_stop(&self, side: Side) {
        {
            let _queues = self.queues.lock();
            self.stop[side.index()].store(true, Ordering::Release);
        }
        self.changed.notify_all();
    }

    fn push(&self, side: Side, frame: Frame) -> Result<(), SyncError> {
        let mut queues = self.queues.lock();
        queues.retrieved[side.index()] += 1;
        if !queues.accepting {
            drop(queues);
            self.changed.notify_all();
            return Ok(());
        }

        let queue = &mut queues.frames[side.index()];
        let depth = queue.capacity();
        let pushed = queue.push(frame);
        drop(queues);
        self.changed.notify_all();

        pushed.map_err(|_| SyncError::QueueOverflow { side, depth })
    }

    /// Block the trigger worker until the follower has retrieved a frame for
    /// every trigger issued so far.
    fn wait_for_follower(&self, driver: Side, timeout: Duration) -> Result<(), CycleError> {
        let follower = driver.other();
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        let mut timed_out = false;
        loop {
            if queues.retrieved[follower.index()] >= queues.retrieved[driver.index()] {
                return Ok(());
            }
            if self.stopping(driver) || queues.fault.is_some() {
                return Err(CycleError::Stopped);
            }
            if timed_out {
                return Err(CycleError::Fault(SyncError::DeviceTimeout {
                    side: follower,
                    operation: "frame retrieval of the previous trigger",
                    waited: timeout,
                }));
            }
            timed_out = self.changed.wait_until(&mut queues, deadline).timed_out();
        }
    }

    fn fault(&self, side: Side, error: SyncError) -> WorkerExit {
        error!("Camera exception ({}): {}", side, error);
        metrics::counter!("stereo_worker_faults_total").increment(1);
        {
            let mut queues = self.queues.lock();
            if queues.fault.is_none() {
                queues.fault = Some(error.clone());
            }
        }
        self.changed.notify_all();
        let _ = self.events.send(SyncEvent::Fault {
            side,
            error: error.clone(),
        });
        WorkerExit::Faulted(error)
    }
}

/// Trigger worker: paces, mirrors features, fires and retrieves the reference frame
struct Driver {
    side: Side,
    reference: Arc<dyn CaptureChannel>,
    follower: Arc<dyn CaptureChannel>,
    settings: StereoSettings,
    shared: Arc<Shared>,
}

impl Driver {
    fn run(self) -> WorkerExit {
        if let Some(id) = self.settings.trigger_core {
            if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                warn!(core = id, "Failed to pin trigger worker");
            }
        }

        let mut rate = Rate::new(self.settings.frame_rate);
        rate.init();
        info!(side = %self.side, rate = rate.frequency(), "Trigger worker started");

        let mut triggers = 0u64;
        while !self.shared.stopping(self.side) {
            match self.cycle() {
                Ok(sequence) => {
                    triggers += 1;
                    trace!(sequence, triggers, "Triggered");
                }
                Err(CycleError::Stopped) => break,
                Err(CycleError::Fault(_)) if self.shared.stopping(self.side) => break,
                Err(CycleError::Fault(error)) => return self.shared.fault(self.side, error),
            }
            rate.sleep();
        }

        info!(triggers, overruns = rate.overruns(), "Trigger worker stopped");
        WorkerExit::Stopped
    }

    fn cycle(&self) -> Result<u64, CycleError> {
        let timeout = self.settings.trigger_ready_timeout;

        self.sync_features()?;
        self.shared.wait_for_follower(self.side, timeout)?;
        self.reference
            .wait_trigger_ready(timeout)
            .map_err(device(self.side))?;
        self.follower
            .wait_trigger_ready(timeout)
            .map_err(device(self.side.other()))?;

        self.trigger_pulse()?;

        let frame = self
            .reference
            .retrieve_frame(self.settings.retrieve_timeout)
            .map_err(device(self.side))?;
        let sequence = frame.sequence();
        self.shared.push(self.side, frame)?;
        Ok(sequence)
    }

    /// Copy the reference camera's measured values onto the follower.
    /// All values are read before any is written.
    fn sync_features(&self) -> Result<(), CycleError> {
        let read = |scalar: Scalar| {
            self.reference
                .read_scalar(scalar)
                .map_err(device(self.side))
        };
        let gain = read(Scalar::Gain)?;
        let exposure_time = read(Scalar::ExposureTime)?;
        let mut balance = [0.0; 3];
        for (value, channel) in balance.iter_mut().zip(ColorChannel::ALL) {
            *value = read(Scalar::BalanceRatio(channel))?;
        }

        let write = |scalar: Scalar, value: f64| {
            self.follower
                .write_scalar(scalar, value)
                .map_err(device(self.side.other()))
        };
        write(Scalar::Gain, gain)?;
        write(Scalar::ExposureTime, exposure_time)?;
        for (value, channel) in balance.into_iter().zip(ColorChannel::ALL) {
            write(Scalar::BalanceRatio(channel), value)?;
        }
        Ok(())
    }

    fn trigger_pulse(&self) -> Result<(), CycleError> {
        let line = self.settings.trigger_output;
        self.reference
            .set_digital_output(line, OutputLevel::High)
            .map_err(device(self.side))?;
        thread::sleep(self.settings.trigger_pulse);
        self.reference
            .set_digital_output(line, OutputLevel::Low)
            .map_err(device(self.side))?;
        Ok(())
    }
}

/// Follower worker: retrieve-only
struct Follower {
    side: Side,
    channel: Arc<dyn CaptureChannel>,
    timeout: Duration,
    shared: Arc<Shared>,
}

impl Follower {
    fn run(self) -> WorkerExit {
        info!(side = %self.side, "Follower worker started");
        let mut frames = 0u64;
        while !self.shared.stopping(self.side) {
            let pushed = self
                .channel
                .retrieve_frame(self.timeout)
                .map_err(|e| SyncError::device(self.side, e))
                .and_then(|frame| self.shared.push(self.side, frame));
            match pushed {
                Ok(()) => frames += 1,
                Err(_) if self.shared.stopping(self.side) => break,
                Err(error) => return self.shared.fault(self.side, error),
            }
        }
        info!(frames, "Follower worker stopped");
        WorkerExit::Stopped
    }
}

struct Workers {
    driver: JoinHandle<WorkerExit>,
    follower: JoinHandle<WorkerExit>,
}

struct Cell {
    state: CameraState,
    channels: Option<[Arc<dyn CaptureChannel>; 2]>,
    workers: Option<Workers>,
}

/// Hardware-triggered stereo camera pair
pub struct StereoCamera {
    settings: StereoSettings,
    cell: Mutex<Cell>,
    shared: Arc<Shared>,
    events: flume::Receiver<SyncEvent>,
}

impl StereoCamera {
    pub fn new(settings: StereoSettings) -> Self {
        let (tx, rx) = flume::unbounded();
        let depth = settings.queue_depth;
        Self {
            cell: Mutex::new(Cell {
                state: CameraState::Idle,
                channels: None,
                workers: None,
            }),
            shared: Arc::new(Shared {
                queues: Mutex::new(Queues {
                    frames: [FrameQueue::new(depth), FrameQueue::new(depth)],
                    retrieved: [0, 0],
                    fault: None,
                    accepting: false,
                    pairs: 0,
                }),
                changed: Condvar::new(),
                stop: [AtomicBool::new(false), AtomicBool::new(false)],
                events: tx,
            }),
            events: rx,
            settings,
        }
    }

    pub fn state(&self) -> CameraState {
        self.cell.lock().state
    }

    /// Configured trigger frequency in Hz
    pub fn frame_rate(&self) -> f64 {
        self.settings.frame_rate
    }

    pub fn settings(&self) -> &StereoSettings {
        &self.settings
    }

    /// Receiver for lifecycle and fault events
    pub fn events(&self) -> flume::Receiver<SyncEvent> {
        self.events.clone()
    }

    /// Bind both cameras by serial number.
    #[instrument(skip(self, enumerator))]
    pub fn open(
        &self,
        enumerator: &dyn DeviceEnumerator,
        left_serial: &str,
        right_serial: &str,
    ) -> Result<(), SyncError> {
        let mut cell = self.cell.lock();
        if cell.state != CameraState::Idle {
            return Err(SyncError::InvalidState {
                expected: "idle",
                actual: cell.state,
            });
        }

        let devices = enumerator.enumerate().map_err(SyncError::Enumeration)?;
        info!("Found {} camera(s)", devices.len());
        for (index, descriptor) in devices.iter().enumerate() {
            utils::log_device_info(index, descriptor);
        }

        let (left_index, right_index) = find_cameras(left_serial, right_serial, &devices)?;
        let left = enumerator
            .open(&devices[left_index])
            .map_err(|e| SyncError::device(Side::Left, e))?;
        let right = enumerator
            .open(&devices[right_index])
            .map_err(|e| SyncError::device(Side::Right, e))?;

        cell.channels = Some([left, right]);
        cell.state = CameraState::Open;
        info!(left = left_serial, right = right_serial, "Stereo camera opened");
        Ok(())
    }

    /// Apply the shared feature profile and arm both cameras.
    ///
    /// The reference camera keeps its automatic loops; the follower has them
    /// switched off and receives the reference values before every trigger.
    #[instrument(skip(self))]
    pub fn configure(&self, profile_source: Option<PathBuf>) -> Result<(), SyncError> {
        let mut cell = self.cell.lock();
        if cell.state != CameraState::Open {
            return Err(SyncError::InvalidState {
                expected: "open",
                actual: cell.state,
            });
        }
        let Some(channels) = cell.channels.as_ref() else {
            return Err(SyncError::InvalidState {
                expected: "open",
                actual: cell.state,
            });
        };

        let reference_side = self.settings.reference;
        let follower_side = reference_side.other();
        let reference = &channels[reference_side.index()];
        let follower = &channels[follower_side.index()];
        let line = self.settings.trigger_output;

        reference
            .apply_feature_profile(&FeatureProfile::reference(profile_source.clone(), line))
            .map_err(|e| SyncError::device(reference_side, e))?;
        follower
            .apply_feature_profile(&FeatureProfile::follower(profile_source))
            .map_err(|e| SyncError::device(follower_side, e))?;
        reference
            .set_digital_output(line, OutputLevel::Low)
            .map_err(|e| SyncError::device(reference_side, e))?;

        reference
            .start_acquisition()
            .map_err(|e| SyncError::device(reference_side, e))?;
        follower
            .start_acquisition()
            .map_err(|e| SyncError::device(follower_side, e))?;

        cell.state = CameraState::Configured;
        info!(reference = %reference_side, line, "Stereo camera configured");
        Ok(())
    }

    /// Start both workers. Returns immediately if already grabbing.
    pub fn start_grab(&self) -> Result<(), SyncError> {
        let mut cell = self.cell.lock();
        match cell.state {
            CameraState::Grabbing => return Ok(()),
            CameraState::Configured => {}
            actual => {
                return Err(SyncError::InvalidState {
                    expected: "configured",
                    actual,
                })
            }
        }
        let Some(channels) = cell.channels.clone() else {
            return Err(SyncError::InvalidState {
                expected: "configured",
                actual: cell.state,
            });
        };

        {
            let mut queues = self.shared.queues.lock();
            for queue in queues.frames.iter_mut() {
                queue.clear();
            }
            queues.retrieved = [0, 0];
            queues.fault = None;
            queues.accepting = true;
        }
        for flag in &self.shared.stop {
            flag.store(false, Ordering::Release);
        }

        let reference_side = self.settings.reference;
        let follower_side = reference_side.other();

        let follower = Follower {
            side: follower_side,
            channel: channels[follower_side.index()].clone(),
            timeout: self.settings.retrieve_timeout,
            shared: self.shared.clone(),
        };
        let follower = thread::Builder::new()
            .name("stereo-follower".into())
            .spawn(move || follower.run())
            .map_err(|e| SyncError::Spawn("follower", e.to_string()))?;

        let driver = Driver {
            side: reference_side,
            reference: channels[reference_side.index()].clone(),
            follower: channels[follower_side.index()].clone(),
            settings: self.settings.clone(),
            shared: self.shared.clone(),
        };
        let driver = match thread::Builder::new()
            .name("stereo-trigger".into())
            .spawn(move || driver.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.request_stop(follower_side);
                self.shared.queues.lock().accepting = false;
                let _ = follower.join();
                return Err(SyncError::Spawn("trigger", e.to_string()));
            }
        };

        cell.workers = Some(Workers { driver, follower });
        cell.state = CameraState::Grabbing;
        let _ = self.shared.events.send(SyncEvent::Started);
        info!("Started grabbing");
        Ok(())
    }

    /// Stop and join both workers, follower first. No-op unless grabbing.
    ///
    /// Blocks until both workers have exited; a worker stuck in a device call
    /// delays this by at most that call's timeout.
    pub fn stop_grab(&self) {
        let workers = {
            let mut cell = self.cell.lock();
            if cell.state != CameraState::Grabbing {
                return;
            }
            cell.state = CameraState::Stopping;
            cell.workers.take()
        };

        self.shared.queues.lock().accepting = false;
        self.shared.changed.notify_all();

        if let Some(workers) = workers {
            let reference_side = self.settings.reference;
            let follower_side = reference_side.other();

            self.shared.request_stop(follower_side);
            log_exit("follower", workers.follower.join());

            self.shared.request_stop(reference_side);
            log_exit("trigger", workers.driver.join());
        }

        let mut cell = self.cell.lock();
        cell.state = CameraState::Idle;
        cell.channels = None;
        let _ = self.shared.events.send(SyncEvent::Stopped);
        info!("Stopped grabbing");
    }

    /// Block until both cameras delivered a frame and return them as a pair.
    ///
    /// Intended for a single consumer. Fails with [`SyncError::SyncFault`]
    /// when the heads of the two queues carry different sequence ids; both
    /// frames are consumed in that case.
    pub fn grab(&self) -> Result<MatchedPair, SyncError> {
        if self.state() != CameraState::Grabbing {
            return Err(SyncError::NotGrabbing);
        }

        let mut queues = self.shared.queues.lock();
        while queues.frames.iter().any(FrameQueue::is_empty) {
            if let Some(fault) = &queues.fault {
                return Err(fault.clone());
            }
            if !queues.accepting {
                return Err(SyncError::NotGrabbing);
            }
            self.shared.changed.wait(&mut queues);
        }

        let [left_queue, right_queue] = &mut queues.frames;
        let (Some(left), Some(right)) = (left_queue.pop(), right_queue.pop()) else {
            return Err(SyncError::NotGrabbing);
        };
        queues.pairs += 1;
        drop(queues);

        debug!(
            "Grabbed left frame {} right frame {}",
            left.sequence(),
            right.sequence()
        );

        if left.sequence() != right.sequence() {
            metrics::counter!("stereo_sync_faults_total").increment(1);
            error!(
                left = left.sequence(),
                right = right.sequence(),
                "Left and right frame numbers differ"
            );
            return Err(SyncError::SyncFault {
                left: left.sequence(),
                right: right.sequence(),
            });
        }

        let waited = left.timestamp.min(right.timestamp).elapsed();
        metrics::histogram!("stereo_pair_latency_us").record(waited.as_micros() as f64);
        metrics::counter!("stereo_pairs_total").increment(1);
        Ok(MatchedPair { left, right })
    }

    pub fn stats(&self) -> SyncStats {
        let queues = self.shared.queues.lock();
        SyncStats {
            left: queues.frames[Side::Left.index()].stats(),
            right: queues.frames[Side::Right.index()].stats(),
            pairs: queues.pairs,
        }
    }
}

impl Drop for StereoCamera {
    fn drop(&mut self) {
        self.stop_grab();
    }
}

fn log_exit(worker: &str, joined: thread::Result<WorkerExit>) {
    match joined {
        Ok(WorkerExit::Stopped) => debug!(worker, "Worker joined"),
        Ok(WorkerExit::Faulted(error)) => debug!(worker, "Worker had faulted: {}", error),
        Err(_) => error!(worker, "Worker panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(serials: &[&str]) -> Vec<DeviceDescriptor> {
        serials.iter().map(|s| DeviceDescriptor::new(*s)).collect()
    }

    #[test]
    fn finds_both_cameras_by_serial() {
        let list = devices(&["A", "B", "C"]);
        assert_eq!(find_cameras("C", "A", &list).unwrap(), (2, 0));
    }

    #[test]
    fn missing_camera_names_its_side() {
        let list = devices(&["A"]);
        match find_cameras("A", "B", &list) {
            Err(SyncError::DeviceNotFound { side, serial, available }) => {
                assert_eq!(side, Side::Right);
                assert_eq!(serial, "B");
                assert_eq!(available, 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            find_cameras("X", "A", &list),
            Err(SyncError::DeviceNotFound { side: Side::Left, .. })
        ));
    }

    #[test]
    fn timeouts_map_to_device_timeout() {
        let error = SyncError::device(
            Side::Right,
            CaptureError::Timeout {
                operation: "frame retrieval",
                waited: Duration::from_millis(5),
            },
        );
        assert!(matches!(error, SyncError::DeviceTimeout { side: Side::Right, .. }));

        let error = SyncError::device(Side::Left, CaptureError::NotStreaming);
        assert!(matches!(error, SyncError::Device { side: Side::Left, .. }));
    }

    #[test]
    fn fresh_controller_is_idle_and_not_grabbing() {
        let camera = StereoCamera::new(StereoSettings::default());
        assert_eq!(camera.state(), CameraState::Idle);
        assert!(matches!(camera.grab(), Err(SyncError::NotGrabbing)));
        assert!(matches!(
            camera.start_grab(),
            Err(SyncError::InvalidState { .. })
        ));
        camera.stop_grab();
        assert_eq!(camera.state(), CameraState::Idle);
    }

    #[test]
    fn side_display_and_other() {
        assert_eq!(Side::Left.to_string(), "left");
        assert_eq!(Side::Left.other(), Side::Right);
        assert_eq!(Side::Right.other(), Side::Left);
    }
}
