//! Capture channel contract
//!
//! One [`CaptureChannel`] wraps one physical camera. Implementations must be
//! internally synchronized: the trigger worker reads scalars from the
//! reference camera and writes them to the follower while the follower's own
//! worker is blocked inside [`CaptureChannel::retrieve_frame`].

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::Frame;

/// Device-layer failures
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("timed out after {waited:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("device is not streaming")]
    NotStreaming,

    #[error("feature not supported: {0}")]
    Unsupported(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl CaptureError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CaptureError::Timeout { .. })
    }
}

impl From<io::Error> for CaptureError {
    fn from(error: io::Error) -> Self {
        CaptureError::Io(Arc::new(error))
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Identity of an enumerated camera
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub serial_number: String,
    pub user_defined_name: Option<String>,
    pub model_name: Option<String>,
    pub vendor: Option<String>,
    pub device_path: Option<String>,
    pub driver: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
}

impl ColorChannel {
    pub const ALL: [ColorChannel; 3] = [ColorChannel::Red, ColorChannel::Green, ColorChannel::Blue];
}

/// Scalar camera features mirrored from the reference camera to the follower
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    Gain,
    ExposureTime,
    BalanceRatio(ColorChannel),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Gain => write!(f, "Gain"),
            Scalar::ExposureTime => write!(f, "ExposureTime"),
            Scalar::BalanceRatio(channel) => write!(f, "BalanceRatio[{:?}]", channel),
        }
    }
}

/// Logical level of a digital output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLevel {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoMode {
    Off,
    Continuous,
}

/// Feature settings applied to a camera before acquisition starts
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureProfile {
    /// Vendor feature file loaded onto the device, if any
    pub source: Option<PathBuf>,
    pub gain_auto: AutoMode,
    pub exposure_auto: AutoMode,
    pub balance_white_auto: AutoMode,
    /// Output line driven for triggering; idled low after the profile is applied
    pub trigger_output: Option<u32>,
}

impl FeatureProfile {
    /// Reference camera: automatic control loops run here and it owns the trigger line.
    pub fn reference(source: Option<PathBuf>, trigger_output: u32) -> Self {
        Self {
            source,
            gain_auto: AutoMode::Continuous,
            exposure_auto: AutoMode::Continuous,
            balance_white_auto: AutoMode::Continuous,
            trigger_output: Some(trigger_output),
        }
    }

    /// Follower camera: every automatic loop is off, values are pushed per trigger.
    pub fn follower(source: Option<PathBuf>) -> Self {
        Self {
            source,
            gain_auto: AutoMode::Off,
            exposure_auto: AutoMode::Off,
            balance_white_auto: AutoMode::Off,
            trigger_output: None,
        }
    }
}

/// Trait for a single opened camera.
pub trait CaptureChannel: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn apply_feature_profile(&self, profile: &FeatureProfile) -> CaptureResult<()>;

    /// Arm the device for triggered acquisition.
    fn start_acquisition(&self) -> CaptureResult<()>;

    fn set_digital_output(&self, line: u32, level: OutputLevel) -> CaptureResult<()>;

    /// Block until the device accepts a new frame trigger.
    fn wait_trigger_ready(&self, timeout: Duration) -> CaptureResult<()>;

    /// Block until the next frame is available.
    fn retrieve_frame(&self, timeout: Duration) -> CaptureResult<Frame>;

    /// Current measured value, including values driven by automatic loops.
    fn read_scalar(&self, scalar: Scalar) -> CaptureResult<f64>;

    fn write_scalar(&self, scalar: Scalar, value: f64) -> CaptureResult<()>;
}

/// Trait for a capture backend that can list and open cameras.
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>>;

    fn open(&self, descriptor: &DeviceDescriptor) -> CaptureResult<Arc<dyn CaptureChannel>>;
}
