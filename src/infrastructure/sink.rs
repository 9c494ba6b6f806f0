//! Frame consumers
//!
//! [`FrameSink`] is where reassembled frames leave the connection manager.
//! [`CaptureSink`] is the local-inference deployment: images are stored on
//! disk and status results are appended to a text log.

use crate::domain::models::Frame;
use crate::domain::settings::CaptureSettings;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};

const DETECTED: &str = "Person is detected -> Local inference!";
const NOT_DETECTED: &str = "Person is not detected -> Local inference!";

pub trait FrameSink {
    /// Handle one frame. Returned bytes are written back to the peripheral.
    fn consume(&mut self, frame: Frame) -> Option<Vec<u8>>;
}

pub struct CaptureSink {
    image_dir: PathBuf,
    output_file: PathBuf,
    results: u64,
}

impl CaptureSink {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            image_dir: PathBuf::from(&settings.image_dir),
            output_file: PathBuf::from(&settings.output_file),
            results: 0,
        }
    }

    /// Images and status results handled so far
    pub fn results(&self) -> u64 {
        self.results
    }

    fn save_image(&self, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.image_dir)?;

        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut path = self.image_dir.join(format!("{}-result.jpg", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = self
                .image_dir
                .join(format!("{}-result-{}.jpg", stamp, suffix));
            suffix += 1;
        }

        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_file)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn record(&self, line: &str) {
        if let Err(e) = self.append_line(line) {
            error!("Failed to append to {}: {}", self.output_file.display(), e);
        }
    }
}

impl FrameSink for CaptureSink {
    fn consume(&mut self, frame: Frame) -> Option<Vec<u8>> {
        match frame {
            Frame::Image { bytes } | Frame::TruncatedImage { bytes } => {
                self.results += 1;
                match self.save_image(&bytes) {
                    Ok(path) => info!("Saved {} byte image to {}", bytes.len(), path.display()),
                    Err(e) => error!("Failed to save image: {}", e),
                }
            }
            Frame::Status { detected } => {
                self.results += 1;
                let line = if detected { DETECTED } else { NOT_DETECTED };
                info!("{}", line);
                self.record(line);
            }
            frame @ Frame::Unknown { .. } => {
                let text = frame.text().unwrap_or_default();
                info!("Peripheral message: {}", text);
                self.record(&text);
            }
        }
        None
    }
}
