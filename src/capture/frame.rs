use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame handle with zero-copy semantics
///
/// `data` is a reference-counted view of the driver buffer; cloning a frame
/// never copies pixels. Consumers should produce an owned image from it
/// before the next retrieval on the same channel.
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Retrieval timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Device-assigned frame counter
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Pixel bytes of row `y`, without trailing stride padding.
    ///
    /// Returns `None` for compressed formats or when the buffer is shorter
    /// than the metadata claims.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let bpp = self.meta.format.bytes_per_pixel()?;
        if y >= self.meta.height {
            return None;
        }
        let start = y as usize * self.meta.stride as usize;
        let end = start + self.meta.width as usize * bpp;
        self.data.get(start..end)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Mono8,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Packed bytes per pixel; `None` for compressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mono8 => Some(1),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`
    pub fn ffmpeg_name(self) -> Option<&'static str> {
        match self {
            PixelFormat::Rgb24 => Some("rgb24"),
            PixelFormat::Bgr24 => Some("bgr24"),
            PixelFormat::Mono8 => Some("gray"),
            PixelFormat::Yuyv4 => Some("yuyv422"),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Raw video format string for GStreamer caps
    pub fn gst_name(self) -> Option<&'static str> {
        match self {
            PixelFormat::Rgb24 => Some("RGB"),
            PixelFormat::Bgr24 => Some("BGR"),
            PixelFormat::Mono8 => Some("GRAY8"),
            PixelFormat::Yuyv4 => Some("YUY2"),
            PixelFormat::Mjpeg => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stride: u32) -> Frame {
        let data: Vec<u8> = (0..(stride * 2) as u8).collect();
        Frame::new(
            Bytes::from(data),
            FrameMetadata {
                sequence: 7,
                width: 2,
                height: 2,
                stride,
                format: PixelFormat::Bgr24,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn row_skips_stride_padding() {
        let frame = frame(8);
        assert_eq!(frame.row(0), Some(&[0, 1, 2, 3, 4, 5][..]));
        assert_eq!(frame.row(1), Some(&[8, 9, 10, 11, 12, 13][..]));
        assert_eq!(frame.row(2), None);
    }

    #[test]
    fn compressed_frames_have_no_rows() {
        let mut frame = frame(6);
        Arc::make_mut(&mut frame.meta).format = PixelFormat::Mjpeg;
        assert_eq!(frame.row(0), None);
        assert_eq!(frame.sequence(), 7);
    }
}
