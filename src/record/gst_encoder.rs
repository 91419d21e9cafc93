//! GStreamer encoder: `appsrc ! videoconvert ! <encoder> ! <muxer> ! filesink`

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::encoder::{EncoderError, EncoderSettings, Image, MediaEncoder};

/// How long `flush` waits for end-of-stream to reach the sink
const EOS_TIMEOUT_SECS: u64 = 10;

/// Map an ffmpeg-style codec name onto a GStreamer encoder element.
fn encoder_element(settings: &EncoderSettings) -> Result<String, EncoderError> {
    let kbps = (settings.bit_rate / 1000).max(1);
    let element = match settings.codec.as_str() {
        "mpeg4" => format!(
            "avenc_mpeg4 bitrate={} gop-size={} max-bframes={}",
            settings.bit_rate, settings.gop_size, settings.max_b_frames
        ),
        "h264" | "libx264" => format!(
            "x264enc bitrate={} key-int-max={} bframes={} tune=zerolatency",
            kbps, settings.gop_size, settings.max_b_frames
        ),
        "mjpeg" => "jpegenc".to_string(),
        other => {
            return Err(EncoderError::Init(format!(
                "no GStreamer encoder for codec {}",
                other
            )))
        }
    };
    Ok(element)
}

/// Launch description for one output
pub fn build_pipeline(settings: &EncoderSettings) -> Result<String, EncoderError> {
    let container = settings.container()?;
    settings.source_format.gst_name().ok_or_else(|| {
        EncoderError::Init(format!("{:?} is not raw video", settings.source_format))
    })?;
    Ok(format!(
        "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! {} ! filesink location=\"{}\"",
        encoder_element(settings)?,
        container.gst_muxer(),
        settings.destination.display()
    ))
}

/// Copy image rows into a buffer laid out with `stride` bytes per row.
fn copy_rows(image: &Image, dest: &mut [u8], stride: usize) {
    for (y, chunk) in (0..image.height).zip(dest.chunks_mut(stride)) {
        if let Some(row) = image.row(y) {
            let len = row.len().min(chunk.len());
            chunk[..len].copy_from_slice(&row[..len]);
        }
    }
}

struct Session {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    settings: EncoderSettings,
    /// Layout appsrc advertises; rows are padded to its stride
    info: gst_video::VideoInfo,
    frame_duration: gst::ClockTime,
}

/// Encoder running a GStreamer pipeline fed through appsrc
#[derive(Default)]
pub struct GstEncoder {
    session: Option<Session>,
}

impl GstEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaEncoder for GstEncoder {
    fn open(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError> {
        gst::init().map_err(|e| EncoderError::Init(format!("Failed to initialize GStreamer: {}", e)))?;

        let description = build_pipeline(settings)?;
        info!("Pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| EncoderError::Init(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| EncoderError::Init("Failed to create pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<AppSrc>().ok())
            .ok_or_else(|| EncoderError::Init("Failed to downcast to AppSrc".into()))?;

        let format = gst_video::VideoFormat::from_string(
            settings.source_format.gst_name().unwrap_or("BGR"),
        );
        let fps = gst::Fraction::approximate_f64(settings.frame_rate)
            .unwrap_or_else(|| gst::Fraction::new(10, 1));
        let info = gst_video::VideoInfo::builder(format, settings.width, settings.height)
            .fps(fps)
            .build()
            .map_err(|e| EncoderError::Init(format!("Invalid video info: {}", e)))?;
        let caps = info
            .to_caps()
            .map_err(|e| EncoderError::Init(format!("Invalid caps: {}", e)))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(false);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Init(format!("Failed to start pipeline: {}", e)))?;

        let frame_duration =
            gst::ClockTime::from_nseconds((1_000_000_000f64 / settings.frame_rate) as u64);
        self.session = Some(Session {
            pipeline,
            appsrc,
            settings: settings.clone(),
            info,
            frame_duration,
        });
        Ok(())
    }

    fn submit_image(&mut self, image: &Image, pts: u64) -> Result<(), EncoderError> {
        let session = self.session.as_ref().ok_or(EncoderError::NotOpen)?;
        session.settings.check_image(image)?;

        let stride = session.info.stride()[0] as usize;
        let mut buffer = gst::Buffer::with_size(session.info.size())
            .map_err(|e| EncoderError::Encode(format!("Failed to create buffer: {}", e)))?;
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| EncoderError::Encode("Failed to get mutable buffer reference".into()))?;
            buffer_ref.set_pts(session.frame_duration * pts);
            buffer_ref.set_duration(session.frame_duration);

            let mut map = buffer_ref
                .map_writable()
                .map_err(|e| EncoderError::Encode(format!("Failed to map buffer: {}", e)))?;
            copy_rows(image, &mut map, stride);
        }

        session
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Encode(format!("Failed to push frame: {:?}", e)))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        session
            .appsrc
            .end_of_stream()
            .map_err(|e| EncoderError::Encode(format!("Failed to send EOS: {}", e)))?;

        let Some(bus) = session.pipeline.bus() else {
            return Ok(());
        };
        let timeout = gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS);
        match bus.timed_pop_filtered(
            timeout,
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(message) => match message.view() {
                gst::MessageView::Error(err) => Err(EncoderError::Encode(format!(
                    "{} ({:?})",
                    err.error(),
                    err.debug()
                ))),
                _ => {
                    debug!("End of stream reached the sink");
                    Ok(())
                }
            },
            None => {
                warn!("Timed out waiting for end of stream");
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session
            .pipeline
            .set_state(gst::State::Null)
            .map_err(|e| EncoderError::Encode(format!("Failed to stop pipeline: {}", e)))?;
        info!("GStreamer encoder closed");
        Ok(())
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.pipeline.set_state(gst::State::Null);
        }
    }
}
