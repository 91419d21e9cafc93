pub mod compose;
pub mod encoder;
pub mod ffmpeg;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_encoder;
pub mod recorder;

pub use compose::{compose_side_by_side, ComposeError};
pub use encoder::{Container, EncoderError, EncoderSettings, Image, MediaEncoder};
pub use ffmpeg::FfmpegEncoder;
pub use recorder::{RecordError, RecorderState, VideoRecorder};

use crate::{EncoderBackend, RecordingConfig};

/// Build the encoder selected by the configuration
pub fn encoder_for(config: &RecordingConfig) -> Result<Box<dyn MediaEncoder>, EncoderError> {
    match config.encoder {
        EncoderBackend::Ffmpeg => Ok(Box::new(FfmpegEncoder::with_binary(&config.ffmpeg_binary))),
        #[cfg(feature = "gstreamer-pipeline")]
        EncoderBackend::Gstreamer => Ok(Box::new(gst_encoder::GstEncoder::new())),
        #[cfg(not(feature = "gstreamer-pipeline"))]
        EncoderBackend::Gstreamer => Err(EncoderError::Init(
            "built without the gstreamer-pipeline feature".into(),
        )),
    }
}
