use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone};
use tracing::info;

use crate::capture::DeviceDescriptor;

/// Log every identifying field a device reports
pub fn log_device_info(index: usize, device: &DeviceDescriptor) {
    info!("Camera {}:", index);
    info!("  Serial number: {}", device.serial_number);
    if let Some(name) = &device.user_defined_name {
        info!("  User defined name: {}", name);
    }
    if let Some(model) = &device.model_name {
        info!("  Model: {}", model);
    }
    if let Some(vendor) = &device.vendor {
        info!("  Vendor: {}", vendor);
    }
    if let Some(path) = &device.device_path {
        info!("  Device path: {}", path);
    }
    if let Some(driver) = &device.driver {
        info!("  Driver: {}", driver);
    }
}

/// `<directory>/<prefix>[YYYY-MM-DD-HH-MM-SS].<extension>`
pub fn session_file_name<Tz>(
    directory: &Path,
    prefix: &str,
    extension: &str,
    started: &DateTime<Tz>,
) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    directory.join(format!(
        "{}[{}].{}",
        prefix,
        started.format("%Y-%m-%d-%H-%M-%S"),
        extension
    ))
}

/// Interval timer with split times
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
    last_split: Instant,
}

impl Stopwatch {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_split: now,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Time since the previous split (or reset)
    pub fn split(&mut self) -> Duration {
        let now = Instant::now();
        let split = now - self.last_split;
        self.last_split = now;
        split
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, Utc};

    #[test]
    fn file_name_embeds_the_start_time() {
        let started = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let path = session_file_name(Path::new("/data"), "Basler", "avi", &started);
        assert_eq!(path, PathBuf::from("/data/Basler[2024-03-07-09-05-01].avi"));
    }

    #[test]
    fn local_time_file_names_keep_the_shape() {
        let path = session_file_name(Path::new("."), "Basler", "mkv", &Local::now());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Basler["));
        assert!(name.ends_with("].mkv"));
        assert_eq!(name.len(), "Basler[YYYY-MM-DD-HH-MM-SS].mkv".len());
    }

    #[test]
    fn splits_measure_from_the_previous_split() {
        let mut watch = Stopwatch::new();
        std::thread::sleep(Duration::from_millis(20));
        let first = watch.split();
        let second = watch.split();
        assert!(first >= Duration::from_millis(20));
        assert!(second < first);
        assert!(watch.elapsed() >= first);
    }
}
