//! V4L2 capture channels
//!
//! UVC-class devices expose no trigger input or digital outputs, so these
//! channels run free: trigger pulses are accepted and ignored, trigger-ready
//! returns immediately, and frames are paired purely by the driver's
//! sequence counter. Gain, exposure and red/blue balance map onto the
//! standard V4L2 user controls.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::channel::{
    AutoMode, CaptureChannel, CaptureError, CaptureResult, ColorChannel, DeviceDescriptor,
    DeviceEnumerator, FeatureProfile, OutputLevel, Scalar,
};
use super::frame::{Frame, FrameMetadata, PixelFormat};
use crate::CaptureConfig;

const V4L2_CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const V4L2_CID_RED_BALANCE: u32 = 0x0098_090e;
const V4L2_CID_BLUE_BALANCE: u32 = 0x0098_090f;
const V4L2_CID_AUTOGAIN: u32 = 0x0098_0912;
const V4L2_CID_GAIN: u32 = 0x0098_0913;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

const V4L2_EXPOSURE_MANUAL: i64 = 1;
const V4L2_EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Highest /dev/videoN probed during enumeration
const MAX_VIDEO_NODES: u32 = 16;

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Mono8 => FourCC::new(b"GREY"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
    }
}

fn control_id(scalar: Scalar) -> Option<u32> {
    match scalar {
        Scalar::Gain => Some(V4L2_CID_GAIN),
        Scalar::ExposureTime => Some(V4L2_CID_EXPOSURE_ABSOLUTE),
        Scalar::BalanceRatio(ColorChannel::Red) => Some(V4L2_CID_RED_BALANCE),
        Scalar::BalanceRatio(ColorChannel::Blue) => Some(V4L2_CID_BLUE_BALANCE),
        Scalar::BalanceRatio(ColorChannel::Green) => None,
    }
}

/// Enumerates video capture nodes under /dev
pub struct V4l2Enumerator {
    config: CaptureConfig,
}

impl V4l2Enumerator {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl DeviceEnumerator for V4l2Enumerator {
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        info!("Enumerating V4L2 capture devices...");

        let mut devices = Vec::new();
        for i in 0..MAX_VIDEO_NODES {
            let path = format!("/dev/video{}", i);
            if !Path::new(&path).exists() {
                continue;
            }

            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                continue;
            }

            devices.push(DeviceDescriptor {
                serial_number: caps.bus.clone(),
                user_defined_name: None,
                model_name: Some(caps.card.clone()),
                vendor: None,
                device_path: Some(path),
                driver: Some(caps.driver.clone()),
            });
        }

        Ok(devices)
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> CaptureResult<Arc<dyn CaptureChannel>> {
        let path = descriptor
            .device_path
            .as_deref()
            .ok_or_else(|| CaptureError::Device("descriptor has no device path".into()))?;
        Ok(Arc::new(V4l2Channel::new(
            descriptor.clone(),
            path,
            self.config.clone(),
        )?))
    }
}

/// One V4L2 camera streaming through memory-mapped buffers
pub struct V4l2Channel {
    descriptor: DeviceDescriptor,
    device: Device,
    config: CaptureConfig,
    stream: Mutex<Option<MmapStream<'static>>>,
    stride: Mutex<u32>,
    free_run_warned: AtomicBool,
}

impl V4l2Channel {
    pub fn new(descriptor: DeviceDescriptor, path: &str, config: CaptureConfig) -> CaptureResult<Self> {
        info!("Opening V4L2 device: {}", path);

        let device = Device::with_path(path)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unsupported(format!(
                "{} doesn't support video capture",
                path
            )));
        }

        Ok(Self {
            descriptor,
            device,
            stride: Mutex::new(config.width * 3),
            config,
            stream: Mutex::new(None),
            free_run_warned: AtomicBool::new(false),
        })
    }

    fn warn_free_run(&self) {
        if !self.free_run_warned.swap(true, Ordering::Relaxed) {
            warn!(
                serial = %self.descriptor.serial_number,
                "V4L2 device has no trigger I/O, running free"
            );
        }
    }

    fn set_integer(&self, id: u32, value: i64) -> CaptureResult<()> {
        self.device.set_control(Control {
            id,
            value: Value::Integer(value),
        })?;
        Ok(())
    }

    fn set_auto(&self, id: u32, on: i64, off: i64, mode: AutoMode) {
        let value = match mode {
            AutoMode::Continuous => on,
            AutoMode::Off => off,
        };
        if let Err(e) = self.set_integer(id, value) {
            warn!(control = id, "Failed to set auto control: {}", e);
        }
    }
}

impl CaptureChannel for V4l2Channel {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, profile), fields(serial = %self.descriptor.serial_number))]
    fn apply_feature_profile(&self, profile: &FeatureProfile) -> CaptureResult<()> {
        if let Some(source) = &profile.source {
            warn!("V4L2 has no feature files, ignoring {}", source.display());
        }

        let mut fmt = self.device.format()?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = fourcc(self.config.format);
        let fmt = self.device.set_format(&fmt)?;
        if fmt.width != self.config.width || fmt.height != self.config.height {
            return Err(CaptureError::Unsupported(format!(
                "requested {}x{}, driver negotiated {}x{}",
                self.config.width, self.config.height, fmt.width, fmt.height
            )));
        }
        *self.stride.lock() = fmt.stride;

        self.set_auto(V4L2_CID_AUTOGAIN, 1, 0, profile.gain_auto);
        self.set_auto(
            V4L2_CID_EXPOSURE_AUTO,
            V4L2_EXPOSURE_APERTURE_PRIORITY,
            V4L2_EXPOSURE_MANUAL,
            profile.exposure_auto,
        );
        self.set_auto(V4L2_CID_AUTO_WHITE_BALANCE, 1, 0, profile.balance_white_auto);
        Ok(())
    }

    fn start_acquisition(&self) -> CaptureResult<()> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;
        *self.stream.lock() = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    fn set_digital_output(&self, line: u32, level: OutputLevel) -> CaptureResult<()> {
        self.warn_free_run();
        debug!(line, ?level, "Ignoring digital output on V4L2 device");
        Ok(())
    }

    fn wait_trigger_ready(&self, _timeout: Duration) -> CaptureResult<()> {
        self.warn_free_run();
        Ok(())
    }

    fn retrieve_frame(&self, timeout: Duration) -> CaptureResult<Frame> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(CaptureError::NotStreaming)?;
        stream.set_timeout(timeout);

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => CaptureError::Timeout {
                operation: "frame retrieval",
                waited: timeout,
            },
            _ => CaptureError::from(e),
        })?;

        let data = Bytes::copy_from_slice(buf);
        let device_timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        Ok(Frame::new(
            data,
            FrameMetadata {
                sequence: meta.sequence as u64,
                width: self.config.width,
                height: self.config.height,
                stride: *self.stride.lock(),
                format: self.config.format,
                device_timestamp: Some(device_timestamp),
            },
        ))
    }

    fn read_scalar(&self, scalar: Scalar) -> CaptureResult<f64> {
        let Some(id) = control_id(scalar) else {
            // UVC exposes no green gain; it is the balance reference
            return Ok(1.0);
        };
        match self.device.control(id)?.value {
            Value::Integer(value) => Ok(value as f64),
            Value::Boolean(value) => Ok(if value { 1.0 } else { 0.0 }),
            _ => Err(CaptureError::Unsupported(scalar.to_string())),
        }
    }

    fn write_scalar(&self, scalar: Scalar, value: f64) -> CaptureResult<()> {
        match control_id(scalar) {
            Some(id) => self.set_integer(id, value.round() as i64),
            None => Ok(()),
        }
    }
}
