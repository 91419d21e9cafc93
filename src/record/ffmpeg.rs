//! ffmpeg subprocess encoder
//!
//! Raw frames are piped to the `ffmpeg` binary's stdin; the codec, pixel
//! conversion and container muxing all happen in the child process.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use super::encoder::{EncoderError, EncoderSettings, Image, MediaEncoder};

/// Lines of ffmpeg's stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Read stderr to EOF so the child never blocks on a full pipe.
/// Yields the last few lines once the child exits.
fn drain_stderr(stderr: ChildStderr) -> std::io::Result<JoinHandle<String>> {
    thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!(target: "ffmpeg", "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        })
}

/// Encoder backed by an `ffmpeg` child process
pub struct FfmpegEncoder {
    binary: PathBuf,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    settings: Option<EncoderSettings>,
    frames: u64,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            process: None,
            stdin: None,
            stderr: None,
            settings: None,
            frames: 0,
        }
    }

    /// Command line for one output
    pub fn build_args(settings: &EncoderSettings) -> Result<Vec<String>, EncoderError> {
        let container = settings.container()?;
        let pixel_format = settings.source_format.ffmpeg_name().ok_or_else(|| {
            EncoderError::Init(format!(
                "{:?} cannot be fed to ffmpeg as raw video",
                settings.source_format
            ))
        })?;

        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            pixel_format.to_string(),
            "-s".to_string(),
            format!("{}x{}", settings.width, settings.height),
            "-r".to_string(),
            settings.frame_rate.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
            settings.codec.clone(),
            "-b:v".to_string(),
            settings.bit_rate.to_string(),
            "-g".to_string(),
            settings.gop_size.to_string(),
            "-bf".to_string(),
            settings.max_b_frames.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            container.ffmpeg_format().to_string(),
            settings.destination.to_string_lossy().into_owned(),
        ];
        Ok(args)
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEncoder for FfmpegEncoder {
    fn open(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError> {
        let args = Self::build_args(settings)?;
        info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::Init(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let (Some(stdin), Some(stderr)) = (process.stdin.take(), process.stderr.take()) else {
            let _ = process.kill();
            let _ = process.wait();
            return Err(EncoderError::Init("Failed to capture FFmpeg pipes".to_string()));
        };
        let stderr = match drain_stderr(stderr) {
            Ok(reader) => reader,
            Err(e) => {
                drop(stdin);
                let _ = process.kill();
                let _ = process.wait();
                return Err(EncoderError::Init(format!("Failed to read FFmpeg stderr: {}", e)));
            }
        };

        self.process = Some(process);
        self.stdin = Some(stdin);
        self.stderr = Some(stderr);
        self.settings = Some(settings.clone());
        self.frames = 0;
        Ok(())
    }

    fn submit_image(&mut self, image: &Image, pts: u64) -> Result<(), EncoderError> {
        let settings = self.settings.as_ref().ok_or(EncoderError::NotOpen)?;
        settings.check_image(image)?;
        let stdin = self.stdin.as_mut().ok_or(EncoderError::NotOpen)?;

        // rawvideo input is timestamped by arrival, one period per frame
        if pts != self.frames {
            warn!(pts, written = self.frames, "Presentation timestamp gap");
        }

        let write = |stdin: &mut ChildStdin| -> std::io::Result<()> {
            if image.is_packed() {
                let len = image.stride as usize * image.height as usize;
                return stdin.write_all(&image.data[..len]);
            }
            for y in 0..image.height {
                if let Some(row) = image.row(y) {
                    stdin.write_all(row)?;
                }
            }
            Ok(())
        };
        write(stdin).map_err(|e| EncoderError::Encode(format!("Failed to write frame: {}", e)))?;

        self.frames += 1;
        trace!(pts, "Frame written to FFmpeg");
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        // EOF on stdin makes ffmpeg drain its encoder and write the trailer
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
            debug!("FFmpeg stdin closed");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        drop(self.stdin.take());
        self.settings = None;
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        let status = process
            .wait()
            .map_err(|e| EncoderError::Encode(format!("Failed to wait for FFmpeg: {}", e)))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(EncoderError::Encode(format!(
                "FFmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        info!("FFmpeg encoder finished: {} frames written", self.frames);
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn args_describe_input_and_output() {
        let settings = EncoderSettings::new("/tmp/Basler[x].avi", 1280, 480, 10.0, 8_000_000);
        let args = FfmpegEncoder::build_args(&settings).unwrap();

        assert_eq!(value_after(&args, "-pix_fmt"), vec!["bgr24", "yuv420p"]);
        assert_eq!(value_after(&args, "-s"), vec!["1280x480"]);
        assert_eq!(value_after(&args, "-r"), vec!["10"]);
        assert_eq!(value_after(&args, "-c:v"), vec!["mpeg4"]);
        assert_eq!(value_after(&args, "-b:v"), vec!["8000000"]);
        assert_eq!(value_after(&args, "-g"), vec!["1"]);
        assert_eq!(value_after(&args, "-bf"), vec!["0"]);
        assert_eq!(value_after(&args, "-f"), vec!["rawvideo", "avi"]);
        assert_eq!(args.last().unwrap(), "/tmp/Basler[x].avi");
    }

    #[test]
    fn unknown_container_is_rejected() {
        let settings = EncoderSettings::new("test.out", 640, 480, 30.0, 1_000_000);
        assert!(matches!(
            FfmpegEncoder::build_args(&settings),
            Err(EncoderError::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn compressed_source_is_rejected() {
        let mut settings = EncoderSettings::new("a.mkv", 640, 480, 30.0, 1_000_000);
        settings.source_format = PixelFormat::Mjpeg;
        assert!(matches!(
            FfmpegEncoder::build_args(&settings),
            Err(EncoderError::Init(_))
        ));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &tempfile::TempDir, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn chatty_child_does_not_stall_frame_writes() {
        let dir = tempfile::tempdir().unwrap();
        // ~600 KiB of progress lines before stdin is read at all
        let binary = fake_ffmpeg(
            &dir,
            "yes 'frame=1 fps=0.0 q=0.0 size=0kB' | head -n 20000 >&2\ncat > /dev/null",
        );
        let mut encoder = FfmpegEncoder::with_binary(binary);
        let settings = EncoderSettings::new(dir.path().join("out.avi"), 640, 480, 30.0, 1_000_000);
        encoder.open(&settings).unwrap();

        let image = Image::blank(640, 480, PixelFormat::Bgr24).unwrap();
        for pts in 0..4 {
            encoder.submit_image(&image, pts).unwrap();
        }
        encoder.flush().unwrap();
        encoder.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failed_exit_reports_the_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_ffmpeg(
            &dir,
            "cat > /dev/null\necho \"Unknown encoder 'nope'\" >&2\nexit 1",
        );
        let mut encoder = FfmpegEncoder::with_binary(binary);
        let settings = EncoderSettings::new(dir.path().join("out.avi"), 4, 4, 30.0, 1_000_000);
        encoder.open(&settings).unwrap();
        encoder
            .submit_image(&Image::blank(4, 4, PixelFormat::Bgr24).unwrap(), 0)
            .unwrap();
        encoder.flush().unwrap();

        match encoder.close() {
            Err(EncoderError::Encode(message)) => {
                assert!(message.contains("Unknown encoder 'nope'"), "{}", message)
            }
            other => panic!("expected encode error, got {:?}", other),
        }
    }

    #[test]
    fn missing_binary_fails_open_and_close_is_harmless() {
        let mut encoder = FfmpegEncoder::with_binary("/nonexistent/ffmpeg-binary");
        let settings = EncoderSettings::new("a.avi", 4, 4, 30.0, 1_000_000);
        assert!(matches!(encoder.open(&settings), Err(EncoderError::Init(_))));

        let image = Image::blank(4, 4, PixelFormat::Bgr24).unwrap();
        assert!(matches!(
            encoder.submit_image(&image, 0),
            Err(EncoderError::NotOpen)
        ));
        assert!(encoder.flush().is_ok());
        assert!(encoder.close().is_ok());
    }
}
