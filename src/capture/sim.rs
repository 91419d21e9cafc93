//! Simulated hardware-triggered cameras
//!
//! A [`SimulatedRig`] models cameras whose trigger inputs share one wire.
//! Driving the rig's trigger line high on any camera exposes one frame on
//! every armed camera, each stamped with that camera's own frame counter.
//! Scalar values are latched at exposure time, so a follower exposes with
//! whatever was written to it before the edge.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::channel::{
    AutoMode, CaptureChannel, CaptureError, CaptureResult, ColorChannel, DeviceDescriptor,
    DeviceEnumerator, FeatureProfile, OutputLevel, Scalar,
};
use super::frame::{Frame, FrameMetadata, PixelFormat};

/// Exposures a camera can hold before it stops reporting trigger-ready
const DEFAULT_BUFFER_SLOTS: usize = 2;

/// Where a simulated camera takes its sequence identifiers from
#[derive(Debug, Clone)]
pub enum SequenceSource {
    Counter { start: u64 },
    /// Fixed list of ids; once exhausted the camera ignores triggers
    Script(Vec<u64>),
}

#[derive(Debug, Clone)]
pub struct SimCameraSpec {
    pub serial: String,
    pub width: u32,
    pub height: u32,
    pub sequence: SequenceSource,
    /// Retrieval hangs until its timeout once this many frames were delivered
    pub fail_after: Option<u64>,
    /// Never report trigger-ready
    pub stall_trigger_ready: bool,
    pub buffer_slots: usize,
}

impl SimCameraSpec {
    pub fn new(serial: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            serial: serial.into(),
            width,
            height,
            sequence: SequenceSource::Counter { start: 1 },
            fail_after: None,
            stall_trigger_ready: false,
            buffer_slots: DEFAULT_BUFFER_SLOTS,
        }
    }

    pub fn with_script(mut self, ids: Vec<u64>) -> Self {
        self.sequence = SequenceSource::Script(ids);
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stall_trigger_ready = true;
        self
    }
}

/// Scalar values a camera exposed a frame with
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRecord {
    pub sequence: u64,
    pub gain: f64,
    pub exposure_time: f64,
    pub balance: [f64; 3],
}

/// Shared trigger wire
struct TriggerBus {
    line: u32,
    pulses: AtomicU64,
    cameras: Mutex<Vec<Weak<SimulatedCamera>>>,
}

impl TriggerBus {
    fn pulse(&self) {
        let pulse = self.pulses.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(pulse, "Trigger edge");
        let cameras: Vec<_> = self.cameras.lock().iter().filter_map(Weak::upgrade).collect();
        for camera in cameras {
            camera.expose();
        }
    }
}

/// A set of simulated cameras wired to one trigger line
pub struct SimulatedRig {
    bus: Arc<TriggerBus>,
    cameras: Vec<Arc<SimulatedCamera>>,
}

impl SimulatedRig {
    pub fn new(trigger_line: u32) -> Self {
        Self {
            bus: Arc::new(TriggerBus {
                line: trigger_line,
                pulses: AtomicU64::new(0),
                cameras: Mutex::new(Vec::new()),
            }),
            cameras: Vec::new(),
        }
    }

    pub fn with_camera(mut self, spec: SimCameraSpec) -> Self {
        self.add_camera(spec);
        self
    }

    pub fn add_camera(&mut self, spec: SimCameraSpec) -> Arc<SimulatedCamera> {
        let camera = Arc::new(SimulatedCamera::new(spec, self.bus.clone()));
        self.bus.cameras.lock().push(Arc::downgrade(&camera));
        self.cameras.push(camera.clone());
        camera
    }

    pub fn camera(&self, serial: &str) -> Option<Arc<SimulatedCamera>> {
        self.cameras
            .iter()
            .find(|camera| camera.descriptor.serial_number == serial)
            .cloned()
    }

    /// Rising edges seen on the trigger line so far
    pub fn pulses(&self) -> u64 {
        self.bus.pulses.load(Ordering::Acquire)
    }
}

impl DeviceEnumerator for SimulatedRig {
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        Ok(self.cameras.iter().map(|c| c.descriptor.clone()).collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> CaptureResult<Arc<dyn CaptureChannel>> {
        let camera = self
            .camera(&descriptor.serial_number)
            .ok_or_else(|| CaptureError::Device(format!("no device {}", descriptor.serial_number)))?;
        debug!(serial = %descriptor.serial_number, "Opened simulated camera");
        Ok(camera)
    }
}

struct CameraState {
    armed: bool,
    next_counter: u64,
    script: Option<VecDeque<u64>>,
    pending: VecDeque<ExposureRecord>,
    delivered: u64,
    scalars: HashMap<Scalar, f64>,
    gain_auto: AutoMode,
    exposure_auto: AutoMode,
    balance_white_auto: AutoMode,
    outputs: HashMap<u32, OutputLevel>,
    profile: Option<FeatureProfile>,
    history: Vec<ExposureRecord>,
}

pub struct SimulatedCamera {
    descriptor: DeviceDescriptor,
    spec: SimCameraSpec,
    bus: Arc<TriggerBus>,
    state: Mutex<CameraState>,
    exposed: Condvar,
    retrieved: Condvar,
}

impl SimulatedCamera {
    fn new(spec: SimCameraSpec, bus: Arc<TriggerBus>) -> Self {
        let (next_counter, script) = match &spec.sequence {
            SequenceSource::Counter { start } => (*start, None),
            SequenceSource::Script(ids) => (0, Some(ids.iter().copied().collect())),
        };

        let mut scalars = HashMap::new();
        scalars.insert(Scalar::Gain, 0.0);
        scalars.insert(Scalar::ExposureTime, 5000.0);
        for channel in ColorChannel::ALL {
            scalars.insert(Scalar::BalanceRatio(channel), 1.0);
        }

        let descriptor = DeviceDescriptor {
            serial_number: spec.serial.clone(),
            model_name: Some("Simulated Camera".into()),
            vendor: Some("stereocap".into()),
            ..Default::default()
        };

        Self {
            descriptor,
            spec,
            bus,
            state: Mutex::new(CameraState {
                armed: false,
                next_counter,
                script,
                pending: VecDeque::new(),
                delivered: 0,
                scalars,
                gain_auto: AutoMode::Off,
                exposure_auto: AutoMode::Off,
                balance_white_auto: AutoMode::Off,
                outputs: HashMap::new(),
                profile: None,
                history: Vec::new(),
            }),
            exposed: Condvar::new(),
            retrieved: Condvar::new(),
        }
    }

    /// Exposures so far, in trigger order
    pub fn history(&self) -> Vec<ExposureRecord> {
        self.state.lock().history.clone()
    }

    pub fn applied_profile(&self) -> Option<FeatureProfile> {
        self.state.lock().profile.clone()
    }

    pub fn output_level(&self, line: u32) -> Option<OutputLevel> {
        self.state.lock().outputs.get(&line).copied()
    }

    fn expose(&self) {
        let mut state = self.state.lock();
        if !state.armed {
            return;
        }

        let sequence = match state.script.as_mut() {
            Some(script) => match script.pop_front() {
                Some(id) => id,
                None => return,
            },
            None => {
                let id = state.next_counter;
                state.next_counter += 1;
                id
            }
        };

        let record = ExposureRecord {
            sequence,
            gain: state.scalars[&Scalar::Gain],
            exposure_time: state.scalars[&Scalar::ExposureTime],
            balance: ColorChannel::ALL.map(|c| state.scalars[&Scalar::BalanceRatio(c)]),
        };
        state.history.push(record.clone());
        state.pending.push_back(record);

        // Automatic loops settle on new values after every exposure
        let step = (sequence % 8) as f64;
        if state.gain_auto == AutoMode::Continuous {
            state.scalars.insert(Scalar::Gain, 1.0 + step * 0.5);
        }
        if state.exposure_auto == AutoMode::Continuous {
            state.scalars.insert(Scalar::ExposureTime, 4000.0 + step * 250.0);
        }
        if state.balance_white_auto == AutoMode::Continuous {
            state.scalars.insert(Scalar::BalanceRatio(ColorChannel::Red), 1.2 + step * 0.01);
            state.scalars.insert(Scalar::BalanceRatio(ColorChannel::Green), 1.0);
            state.scalars.insert(Scalar::BalanceRatio(ColorChannel::Blue), 1.6 - step * 0.01);
        }

        drop(state);
        self.exposed.notify_all();
    }

    fn render(&self, record: &ExposureRecord) -> Frame {
        let width = self.spec.width;
        let height = self.spec.height;
        let stride = width * 3;
        let mut data = Vec::with_capacity((stride * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let shade = (x + y) as u64 + record.sequence;
                data.extend_from_slice(&[shade as u8, (shade >> 1) as u8, (shade >> 2) as u8]);
            }
        }

        Frame::new(
            Bytes::from(data),
            FrameMetadata {
                sequence: record.sequence,
                width,
                height,
                stride,
                format: PixelFormat::Bgr24,
                device_timestamp: None,
            },
        )
    }
}

impl CaptureChannel for SimulatedCamera {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn apply_feature_profile(&self, profile: &FeatureProfile) -> CaptureResult<()> {
        let mut state = self.state.lock();
        state.gain_auto = profile.gain_auto;
        state.exposure_auto = profile.exposure_auto;
        state.balance_white_auto = profile.balance_white_auto;
        if let Some(line) = profile.trigger_output {
            state.outputs.insert(line, OutputLevel::Low);
        }
        state.profile = Some(profile.clone());
        Ok(())
    }

    fn start_acquisition(&self) -> CaptureResult<()> {
        self.state.lock().armed = true;
        Ok(())
    }

    fn set_digital_output(&self, line: u32, level: OutputLevel) -> CaptureResult<()> {
        let previous = self.state.lock().outputs.insert(line, level);
        let rising = level == OutputLevel::High && previous != Some(OutputLevel::High);
        if rising && line == self.bus.line {
            self.bus.pulse();
        }
        Ok(())
    }

    fn wait_trigger_ready(&self, timeout: Duration) -> CaptureResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if !state.armed {
            return Err(CaptureError::NotStreaming);
        }
        while self.spec.stall_trigger_ready || state.pending.len() >= self.spec.buffer_slots {
            if self.retrieved.wait_until(&mut state, deadline).timed_out() {
                return Err(CaptureError::Timeout {
                    operation: "frame trigger ready",
                    waited: timeout,
                });
            }
        }
        Ok(())
    }

    fn retrieve_frame(&self, timeout: Duration) -> CaptureResult<Frame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if !state.armed {
            return Err(CaptureError::NotStreaming);
        }

        let hung = self
            .spec
            .fail_after
            .is_some_and(|limit| state.delivered >= limit);

        loop {
            if !hung {
                if let Some(record) = state.pending.pop_front() {
                    state.delivered += 1;
                    drop(state);
                    self.retrieved.notify_all();
                    return Ok(self.render(&record));
                }
            }
            if self.exposed.wait_until(&mut state, deadline).timed_out() {
                return Err(CaptureError::Timeout {
                    operation: "frame retrieval",
                    waited: timeout,
                });
            }
        }
    }

    fn read_scalar(&self, scalar: Scalar) -> CaptureResult<f64> {
        self.state
            .lock()
            .scalars
            .get(&scalar)
            .copied()
            .ok_or_else(|| CaptureError::Unsupported(scalar.to_string()))
    }

    fn write_scalar(&self, scalar: Scalar, value: f64) -> CaptureResult<()> {
        self.state.lock().scalars.insert(scalar, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: u32 = 3;
    const TIMEOUT: Duration = Duration::from_millis(200);

    fn armed_pair() -> (SimulatedRig, Arc<SimulatedCamera>, Arc<SimulatedCamera>) {
        let mut rig = SimulatedRig::new(LINE);
        let a = rig.add_camera(SimCameraSpec::new("A", 4, 2));
        let b = rig.add_camera(SimCameraSpec::new("B", 4, 2));
        a.start_acquisition().unwrap();
        b.start_acquisition().unwrap();
        (rig, a, b)
    }

    fn pulse(camera: &SimulatedCamera) {
        camera.set_digital_output(LINE, OutputLevel::High).unwrap();
        camera.set_digital_output(LINE, OutputLevel::Low).unwrap();
    }

    #[test]
    fn one_edge_exposes_every_armed_camera() {
        let (rig, a, b) = armed_pair();
        pulse(&a);

        assert_eq!(rig.pulses(), 1);
        assert_eq!(a.retrieve_frame(TIMEOUT).unwrap().sequence(), 1);
        assert_eq!(b.retrieve_frame(TIMEOUT).unwrap().sequence(), 1);
    }

    #[test]
    fn holding_the_line_high_is_a_single_edge() {
        let (rig, a, _b) = armed_pair();
        a.set_digital_output(LINE, OutputLevel::High).unwrap();
        a.set_digital_output(LINE, OutputLevel::High).unwrap();
        assert_eq!(rig.pulses(), 1);

        a.set_digital_output(LINE + 1, OutputLevel::High).unwrap();
        assert_eq!(rig.pulses(), 1);
    }

    #[test]
    fn retrieval_without_trigger_times_out() {
        let (_rig, a, _b) = armed_pair();
        let err = a.retrieve_frame(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn disarmed_camera_ignores_triggers() {
        let mut rig = SimulatedRig::new(LINE);
        let a = rig.add_camera(SimCameraSpec::new("A", 2, 2));
        let b = rig.add_camera(SimCameraSpec::new("B", 2, 2));
        a.start_acquisition().unwrap();
        pulse(&a);

        assert!(a.retrieve_frame(TIMEOUT).is_ok());
        assert!(matches!(
            b.retrieve_frame(TIMEOUT),
            Err(CaptureError::NotStreaming)
        ));
    }

    #[test]
    fn full_buffer_blocks_trigger_ready() {
        let (_rig, a, _b) = armed_pair();
        pulse(&a);
        pulse(&a);
        assert!(a.wait_trigger_ready(Duration::from_millis(20)).is_err());

        a.retrieve_frame(TIMEOUT).unwrap();
        assert!(a.wait_trigger_ready(TIMEOUT).is_ok());
    }

    #[test]
    fn scalars_are_latched_at_exposure() {
        let (_rig, a, b) = armed_pair();
        b.write_scalar(Scalar::Gain, 3.5).unwrap();
        pulse(&a);
        b.write_scalar(Scalar::Gain, 9.0).unwrap();

        let history = b.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].gain, 3.5);
    }

    #[test]
    fn auto_loops_update_values_after_exposure() {
        let (_rig, a, _b) = armed_pair();
        a.apply_feature_profile(&FeatureProfile::reference(None, LINE))
            .unwrap();
        let before = a.read_scalar(Scalar::Gain).unwrap();
        pulse(&a);
        let after = a.read_scalar(Scalar::Gain).unwrap();
        assert_ne!(before, after);
        assert_eq!(a.output_level(LINE), Some(OutputLevel::Low));
    }

    #[test]
    fn scripted_ids_are_delivered_in_order() {
        let mut rig = SimulatedRig::new(LINE);
        let a = rig.add_camera(SimCameraSpec::new("A", 2, 2).with_script(vec![1, 3, 2]));
        a.start_acquisition().unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            pulse(&a);
            ids.push(a.retrieve_frame(TIMEOUT).unwrap().sequence());
        }
        assert_eq!(ids, vec![1, 3, 2]);

        pulse(&a);
        assert!(a.retrieve_frame(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn rendered_frames_are_tightly_packed_bgr() {
        let (_rig, a, _b) = armed_pair();
        pulse(&a);
        let frame = a.retrieve_frame(TIMEOUT).unwrap();
        assert_eq!(frame.meta.format, PixelFormat::Bgr24);
        assert_eq!(frame.meta.stride, 12);
        assert_eq!(frame.data.len(), 24);
    }

    #[test]
    fn enumerator_opens_by_serial() {
        let (rig, _a, _b) = armed_pair();
        let devices = rig.enumerate().unwrap();
        assert_eq!(devices.len(), 2);
        assert!(rig.open(&devices[1]).is_ok());
        assert!(rig.open(&DeviceDescriptor::new("missing")).is_err());
    }
}
