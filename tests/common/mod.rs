#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stereocap::capture::{SimCameraSpec, SimulatedRig};
use stereocap::pipeline::StereoSettings;
use stereocap::record::{EncoderError, EncoderSettings, Image, MediaEncoder};

pub const LINE: u32 = 3;

/// One call made on the mock encoder
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open {
        destination: PathBuf,
        width: u32,
        height: u32,
        frame_rate: f64,
        bit_rate: u64,
    },
    Submit {
        pts: u64,
        first_byte: u8,
        width: u32,
    },
    Flush,
    Close,
}

/// Encoder that records every call and optionally misbehaves
#[derive(Clone, Default)]
pub struct MockEncoder {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub fail_open: bool,
    pub fail_at_pts: Option<u64>,
    pub delay: Duration,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn submitted_pts(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit { pts, .. } => Some(pts),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls().iter().filter(|call| *call == wanted).count()
    }
}

impl MediaEncoder for MockEncoder {
    fn open(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError> {
        self.calls.lock().push(Call::Open {
            destination: settings.destination.clone(),
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
            bit_rate: settings.bit_rate,
        });
        if self.fail_open {
            return Err(EncoderError::Init("mock refused to open".into()));
        }
        Ok(())
    }

    fn submit_image(&mut self, image: &Image, pts: u64) -> Result<(), EncoderError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.lock().push(Call::Submit {
            pts,
            first_byte: image.data.first().copied().unwrap_or(0),
            width: image.width,
        });
        if self.fail_at_pts == Some(pts) {
            return Err(EncoderError::Encode(format!("mock failed at pts {}", pts)));
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        self.calls.lock().push(Call::Flush);
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        self.calls.lock().push(Call::Close);
        Ok(())
    }
}

/// Fast settings so scenario tests finish quickly
pub fn fast_settings() -> StereoSettings {
    StereoSettings {
        frame_rate: 200.0,
        trigger_ready_timeout: Duration::from_millis(300),
        retrieve_timeout: Duration::from_millis(300),
        ..StereoSettings::default()
    }
}

pub fn rig(left: SimCameraSpec, right: SimCameraSpec) -> SimulatedRig {
    SimulatedRig::new(LINE).with_camera(left).with_camera(right)
}

pub fn camera(serial: &str) -> SimCameraSpec {
    SimCameraSpec::new(serial, 8, 4)
}
