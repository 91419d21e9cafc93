//! Side-by-side composition of a matched pair

use thiserror::Error;

use super::encoder::Image;
use crate::capture::{Frame, PixelFormat};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    #[error("frame heights differ: left {left}, right {right}")]
    HeightMismatch { left: u32, right: u32 },

    #[error("pixel formats differ: left {left:?}, right {right:?}")]
    FormatMismatch { left: PixelFormat, right: PixelFormat },

    #[error("{0:?} frames cannot be composed")]
    Compressed(PixelFormat),

    #[error("frame buffer too short for row {row}")]
    ShortBuffer { row: u32 },
}

/// Concatenate two frames horizontally into one packed image.
///
/// Row padding of either input is dropped.
pub fn compose_side_by_side(left: &Frame, right: &Frame) -> Result<Image, ComposeError> {
    let (l, r) = (&left.meta, &right.meta);
    if l.height != r.height {
        return Err(ComposeError::HeightMismatch {
            left: l.height,
            right: r.height,
        });
    }
    if l.format != r.format {
        return Err(ComposeError::FormatMismatch {
            left: l.format,
            right: r.format,
        });
    }
    let bpp = l
        .format
        .bytes_per_pixel()
        .ok_or(ComposeError::Compressed(l.format))?;

    let width = l.width + r.width;
    let stride = width as usize * bpp;
    let mut data = Vec::with_capacity(stride * l.height as usize);
    for y in 0..l.height {
        let left_row = left.row(y).ok_or(ComposeError::ShortBuffer { row: y })?;
        let right_row = right.row(y).ok_or(ComposeError::ShortBuffer { row: y })?;
        data.extend_from_slice(left_row);
        data.extend_from_slice(right_row);
    }

    Ok(Image {
        data,
        width,
        height: l.height,
        stride: stride as u32,
        format: l.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;
    use bytes::Bytes;

    fn frame(fill: u8, width: u32, height: u32, stride: u32, format: PixelFormat) -> Frame {
        Frame::new(
            Bytes::from(vec![fill; (stride * height) as usize]),
            FrameMetadata {
                sequence: 1,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn rows_are_concatenated_left_then_right() {
        let left = frame(1, 2, 2, 6, PixelFormat::Bgr24);
        // padded to 8 bytes per row
        let right = frame(2, 2, 2, 8, PixelFormat::Bgr24);
        let image = compose_side_by_side(&left, &right).unwrap();

        assert_eq!(image.width, 4);
        assert_eq!(image.height, 2);
        assert_eq!(image.stride, 12);
        assert_eq!(image.data.len(), 24);
        assert_eq!(image.row(0).unwrap(), &[1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2]);
        assert_eq!(image.row(1).unwrap(), image.row(0).unwrap());
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let left = frame(0, 2, 2, 6, PixelFormat::Bgr24);
        let short = frame(0, 2, 3, 6, PixelFormat::Bgr24);
        let gray = frame(0, 2, 2, 2, PixelFormat::Mono8);
        let jpeg = frame(0, 2, 2, 6, PixelFormat::Mjpeg);

        assert_eq!(
            compose_side_by_side(&left, &short),
            Err(ComposeError::HeightMismatch { left: 2, right: 3 })
        );
        assert!(matches!(
            compose_side_by_side(&left, &gray),
            Err(ComposeError::FormatMismatch { .. })
        ));
        assert_eq!(
            compose_side_by_side(&jpeg, &jpeg),
            Err(ComposeError::Compressed(PixelFormat::Mjpeg))
        );
    }
}
