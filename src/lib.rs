pub mod capture;
pub mod pipeline;
pub mod record;
pub mod session;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::PixelFormat;
use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use pipeline::Side;
use serde::{Deserialize, Serialize};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment overrides, e.g. `STEREOCAP__STEREO__FRAME_RATE=15`
pub const ENV_PREFIX: &str = "STEREOCAP";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stereo: StereoConfig,
    pub capture: CaptureConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoConfig {
    /// Serial number of the left camera
    pub left_camera: String,
    /// Serial number of the right camera
    pub right_camera: String,
    /// Trigger frequency in Hz
    pub frame_rate: f64,
    /// Camera feature file applied to both cameras
    pub feature_profile: Option<PathBuf>,
    /// Digital output line of the reference camera wired to the trigger inputs
    pub trigger_output: u32,
    pub trigger_pulse_ms: u64,
    pub trigger_ready_timeout_ms: u64,
    pub retrieve_timeout_ms: u64,
    /// Frames buffered per camera before it counts as desynchronized
    pub queue_depth: usize,
    pub reference: Side,
    /// Pin the trigger worker to this core
    pub trigger_core: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    Simulated,
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    Ffmpeg,
    Gstreamer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Container extension; also selects the muxer
    pub extension: String,
    /// Target bit rate in bit/s
    pub bit_rate: u64,
    pub codec: String,
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub encoder: EncoderBackend,
    pub ffmpeg_binary: PathBuf,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            left_camera: "left".into(),
            right_camera: "right".into(),
            frame_rate: 10.0,
            feature_profile: None,
            trigger_output: 3,
            trigger_pulse_ms: 1,
            trigger_ready_timeout_ms: 1000,
            retrieve_timeout_ms: 5000,
            queue_depth: 4,
            reference: Side::Left,
            trigger_core: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::Simulated,
            width: 640,
            height: 480,
            format: PixelFormat::Bgr24,
            buffer_count: 4,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_prefix: "Basler".into(),
            extension: "avi".into(),
            bit_rate: 8_000_000,
            codec: "mpeg4".into(),
            gop_size: 1,
            max_b_frames: 0,
            encoder: EncoderBackend::Ffmpeg,
            ffmpeg_binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML/JSON file, overlaid by
    /// `STEREOCAP__<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .wrap_err_with(|| match path {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let stereo = &self.stereo;
        if !(stereo.frame_rate.is_finite() && stereo.frame_rate > 0.0) {
            return Err(eyre!("frame_rate must be positive, got {}", stereo.frame_rate));
        }
        if stereo.left_camera == stereo.right_camera {
            return Err(eyre!(
                "left_camera and right_camera are both {}",
                stereo.left_camera
            ));
        }
        if stereo.trigger_ready_timeout_ms == 0 || stereo.retrieve_timeout_ms == 0 {
            return Err(eyre!("device timeouts must be non-zero"));
        }
        if stereo.queue_depth == 0 {
            return Err(eyre!("queue_depth must be at least 1"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(eyre!(
                "capture size {}x{} is empty",
                self.capture.width,
                self.capture.height
            ));
        }
        if self.recording.bit_rate == 0 {
            return Err(eyre!("bit_rate must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.stereo.frame_rate, 10.0);
        assert_eq!(config.stereo.trigger_output, 3);
        assert_eq!(config.recording.file_prefix, "Basler");
        assert_eq!(config.recording.bit_rate, 8_000_000);
    }

    #[test]
    fn file_overrides_defaults_per_key() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[stereo]\nleft_camera = \"22954041\"\nright_camera = \"22954042\"\nframe_rate = 15.0\n\n[recording]\nbit_rate = 4000000"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.stereo.left_camera, "22954041");
        assert_eq!(config.stereo.right_camera, "22954042");
        assert_eq!(config.stereo.frame_rate, 15.0);
        assert_eq!(config.stereo.queue_depth, 4);
        assert_eq!(config.recording.bit_rate, 4_000_000);
        assert_eq!(config.recording.codec, "mpeg4");
    }

    #[test]
    fn json_files_are_accepted() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"stereo": {{"left_camera": "a", "right_camera": "b", "frame_rate": 5}}}}"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.stereo.frame_rate, 5.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.stereo.frame_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stereo.right_camera = config.stereo.left_camera.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stereo.queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/stereocap.toml"))).is_err());
    }
}
