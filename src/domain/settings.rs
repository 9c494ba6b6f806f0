use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at an alternative settings file
pub const SETTINGS_PATH_ENV: &str = "PERIPHERAL_GATEWAY_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "peripheral_gateway".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Where the peripheral lives and which GATT attributes it exposes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// MAC address of the peripheral, e.g. "8D:3E:BD:BE:13:3E"
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    /// Characteristic the peripheral notifies on
    #[serde(default = "default_notify_uuid")]
    pub notify_char_uuid: String,
    /// Characteristic for replies; only set in the remote-inference deployment
    #[serde(default)]
    pub write_char_uuid: Option<String>,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            service_uuid: default_service_uuid(),
            notify_char_uuid: default_notify_uuid(),
            write_char_uuid: None,
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

fn default_address() -> String {
    "8D:3E:BD:BE:13:3E".to_string()
}
fn default_service_uuid() -> String {
    "0000180f-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_notify_uuid() -> String {
    "2d2f88c4-f244-5a80-21f1-ee0224e80658".to_string()
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}

/// Framing constants baked into the peripheral firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameProtocol {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
    #[serde(default = "default_truncated_len")]
    pub truncated_len: usize,
    #[serde(default = "default_termination_digit")]
    pub termination_digit: char,
}

impl FrameProtocol {
    /// Size of a complete image transfer
    pub fn total_size(&self) -> usize {
        self.chunk_size.saturating_mul(self.chunk_count)
    }

    /// Reject constants that would make frames impossible to tell apart.
    /// Chunks must be longer than the single byte status and termination
    /// messages.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size <= 1 {
            anyhow::bail!("chunk_size must be greater than 1, got {}", self.chunk_size);
        }
        if self.chunk_count == 0 {
            anyhow::bail!("chunk_count must be at least 1");
        }
        let total = self.chunk_size.checked_mul(self.chunk_count).ok_or_else(|| {
            anyhow::anyhow!(
                "chunk_size {} x chunk_count {} overflows",
                self.chunk_size,
                self.chunk_count
            )
        })?;
        if self.truncated_len > total {
            anyhow::bail!(
                "truncated_len {} exceeds the full image size {}",
                self.truncated_len,
                total
            );
        }
        if !self.termination_digit.is_ascii_digit() {
            anyhow::bail!(
                "termination_digit must be an ASCII digit, got {:?}",
                self.termination_digit
            );
        }
        Ok(())
    }
}

impl Default for FrameProtocol {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_count: default_chunk_count(),
            truncated_len: default_truncated_len(),
            termination_digit: default_termination_digit(),
        }
    }
}

fn default_chunk_size() -> usize {
    220
}
fn default_chunk_count() -> usize {
    14
}
fn default_truncated_len() -> usize {
    2056
}
fn default_termination_digit() -> char {
    '7'
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_discovery_warmup_ms")]
    pub discovery_warmup_ms: u64,
}

impl TimingSettings {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn discovery_warmup(&self) -> Duration {
        Duration::from_millis(self.discovery_warmup_ms)
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            discovery_warmup_ms: default_discovery_warmup_ms(),
        }
    }
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}
fn default_discovery_warmup_ms() -> u64 {
    2000
}

/// Where received images and result lines end up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            output_file: default_output_file(),
        }
    }
}

fn default_image_dir() -> String {
    "captures".to_string()
}
fn default_output_file() -> String {
    "captured_data.txt".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub protocol: FrameProtocol,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
}

pub struct SettingsService {
    settings: GatewaySettings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the env override or the per-user config directory.
    /// A missing file is created with defaults so it can be edited.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = match std::env::var_os(SETTINGS_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::get_settings_path()?,
        };
        Self::open(settings_path)
    }

    pub fn open(settings_path: PathBuf) -> anyhow::Result<Self> {
        if settings_path.exists() {
            let settings = Self::load_from_file(&settings_path)?;
            return Ok(Self {
                settings,
                settings_path,
            });
        }

        let service = Self {
            settings: GatewaySettings::default(),
            settings_path,
        };
        service.save()?;
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PeripheralGateway");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<GatewaySettings> {
        let contents = fs::read_to_string(path)?;
        let settings: GatewaySettings = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid settings file {}: {}", path.display(), e))?;
        settings
            .protocol
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid protocol in {}: {}", path.display(), e))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
