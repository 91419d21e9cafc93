pub mod channel;
pub mod frame;
pub mod sim;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use channel::{
    AutoMode, CaptureChannel, CaptureError, CaptureResult, ColorChannel, DeviceDescriptor,
    DeviceEnumerator, FeatureProfile, OutputLevel, Scalar,
};
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use sim::{SimCameraSpec, SimulatedCamera, SimulatedRig};

use crate::{CaptureBackend, Config};

/// Build the device enumerator selected by the configuration
pub fn enumerator_for(config: &Config) -> CaptureResult<Box<dyn DeviceEnumerator>> {
    match config.capture.backend {
        CaptureBackend::Simulated => {
            let width = config.capture.width;
            let height = config.capture.height;
            let rig = SimulatedRig::new(config.stereo.trigger_output)
                .with_camera(SimCameraSpec::new(&config.stereo.left_camera, width, height))
                .with_camera(SimCameraSpec::new(&config.stereo.right_camera, width, height));
            Ok(Box::new(rig))
        }
        #[cfg(feature = "v4l2-capture")]
        CaptureBackend::V4l2 => Ok(Box::new(v4l2::V4l2Enumerator::new(config.capture.clone()))),
        #[cfg(not(feature = "v4l2-capture"))]
        CaptureBackend::V4l2 => Err(CaptureError::Unsupported(
            "built without the v4l2-capture feature".into(),
        )),
    }
}
