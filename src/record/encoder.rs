//! Media encoder contract and output settings

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::capture::PixelFormat;
use crate::RecordingConfig;

/// Owned, row-major raw image handed to the recorder
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding
    pub stride: u32,
    pub format: PixelFormat,
}

impl Image {
    /// Zero-filled image with tightly packed rows.
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let stride = width as usize * format.bytes_per_pixel()?;
        Some(Self {
            data: vec![0; stride * height as usize],
            width,
            height,
            stride: stride as u32,
            format,
        })
    }

    /// Bytes of one row without padding
    pub fn packed_row_len(&self) -> Option<usize> {
        Some(self.width as usize * self.format.bytes_per_pixel()?)
    }

    /// Pixel bytes of row `y`, without trailing stride padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride as usize;
        self.data.get(start..start + self.packed_row_len()?)
    }

    pub fn is_packed(&self) -> bool {
        self.packed_row_len() == Some(self.stride as usize)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder initialization failed: {0}")]
    Init(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("no container for destination {0}")]
    UnsupportedContainer(PathBuf),

    #[error("encoder is not open")]
    NotOpen,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Container format, inferred from the destination's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Avi,
    Mp4,
    Matroska,
    QuickTime,
}

impl Container {
    pub fn from_path(path: &Path) -> Result<Self, EncoderError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("avi") => Ok(Container::Avi),
            Some("mp4") => Ok(Container::Mp4),
            Some("mkv") => Ok(Container::Matroska),
            Some("mov") => Ok(Container::QuickTime),
            _ => Err(EncoderError::UnsupportedContainer(path.to_path_buf())),
        }
    }

    /// ffmpeg `-f` muxer name
    pub fn ffmpeg_format(self) -> &'static str {
        match self {
            Container::Avi => "avi",
            Container::Mp4 => "mp4",
            Container::Matroska => "matroska",
            Container::QuickTime => "mov",
        }
    }

    /// GStreamer muxer element
    pub fn gst_muxer(self) -> &'static str {
        match self {
            Container::Avi => "avimux",
            Container::Mp4 => "mp4mux",
            Container::Matroska => "matroskamux",
            Container::QuickTime => "qtmux",
        }
    }
}

/// Everything an encoder needs to open an output
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub destination: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Target bit rate in bit/s
    pub bit_rate: u64,
    pub codec: String,
    pub gop_size: u32,
    pub max_b_frames: u32,
    /// Layout of the submitted images
    pub source_format: PixelFormat,
}

impl EncoderSettings {
    /// Intra-only MPEG-4 from packed BGR
    pub fn new(
        destination: impl Into<PathBuf>,
        width: u32,
        height: u32,
        frame_rate: f64,
        bit_rate: u64,
    ) -> Self {
        Self {
            destination: destination.into(),
            width,
            height,
            frame_rate,
            bit_rate,
            codec: "mpeg4".into(),
            gop_size: 1,
            max_b_frames: 0,
            source_format: PixelFormat::Bgr24,
        }
    }

    /// Settings for one session, taking codec parameters from the configuration
    pub fn from_config(
        config: &RecordingConfig,
        destination: impl Into<PathBuf>,
        width: u32,
        height: u32,
        frame_rate: f64,
    ) -> Self {
        Self {
            codec: config.codec.clone(),
            gop_size: config.gop_size,
            max_b_frames: config.max_b_frames,
            ..Self::new(destination, width, height, frame_rate, config.bit_rate)
        }
    }

    pub fn container(&self) -> Result<Container, EncoderError> {
        Container::from_path(&self.destination)
    }

    /// Reject an image that does not match the opened stream
    pub fn check_image(&self, image: &Image) -> Result<(), EncoderError> {
        if image.width != self.width
            || image.height != self.height
            || image.format != self.source_format
        {
            return Err(EncoderError::Encode(format!(
                "image {}x{} {:?} does not match stream {}x{} {:?}",
                image.width,
                image.height,
                image.format,
                self.width,
                self.height,
                self.source_format
            )));
        }
        let needed = (image.height as usize).saturating_sub(1) * image.stride as usize
            + image.packed_row_len().unwrap_or(0);
        if image.height > 0 && image.data.len() < needed {
            return Err(EncoderError::Encode(format!(
                "image holds {} bytes, {} needed",
                image.data.len(),
                needed
            )));
        }
        Ok(())
    }
}

/// Compression and muxing backend driven by the recorder's worker
///
/// Calls arrive in the order `open`, `submit_image`*, `flush`, `close`.
/// `close` must tolerate a missing or failed `open`.
pub trait MediaEncoder: Send {
    fn open(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError>;

    /// Encode one image at presentation timestamp `pts` (in frame periods)
    fn submit_image(&mut self, image: &Image, pts: u64) -> Result<(), EncoderError>;

    /// Drain frames buffered inside the encoder
    fn flush(&mut self) -> Result<(), EncoderError>;

    /// Finalize the container and release every resource
    fn close(&mut self) -> Result<(), EncoderError>;
}
