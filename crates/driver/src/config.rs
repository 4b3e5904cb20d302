//! Driver configuration management

use crate::camera::ProbeSettings;
use anyhow::{Context, Result, anyhow};
use protocol::{CameraControl, MAX_TIMEOUT_MS};
use protocol::types::{CAMERA_PRODUCT_ID, CAMERA_VENDOR_ID, DEFAULT_ISO_PACKET_SIZE, DEFAULT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest payload one isochronous transaction can carry (11-bit field)
const MAX_ISO_PACKET_SIZE: u16 = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub streaming: StreamingSettings,
    #[serde(default)]
    pub controls: ControlSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub log_level: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Camera family identity, as "0x"-prefixed hex strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub vendor_id: String,
    pub product_id: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: format!("0x{:04x}", CAMERA_VENDOR_ID),
            product_id: format!("0x{:04x}", CAMERA_PRODUCT_ID),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Timeout of every control transfer in milliseconds
    #[serde(default = "TransferSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl TransferSettings {
    fn default_timeout_ms() -> u64 {
        DEFAULT_TIMEOUT_MS
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Interface layout of the camera family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSettings {
    /// Isochronous packet size the streaming alternate setting must offer
    #[serde(default = "StreamingSettings::default_iso_packet_size")]
    pub iso_packet_size: u16,
    #[serde(default)]
    pub control_interface: u8,
    #[serde(default = "StreamingSettings::default_streaming_interface")]
    pub streaming_interface: u8,
    /// Unit addressed by control requests
    #[serde(default = "StreamingSettings::default_control_unit_id")]
    pub control_unit_id: u8,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            iso_packet_size: Self::default_iso_packet_size(),
            control_interface: 0,
            streaming_interface: Self::default_streaming_interface(),
            control_unit_id: Self::default_control_unit_id(),
        }
    }
}

impl StreamingSettings {
    fn default_iso_packet_size() -> u16 {
        DEFAULT_ISO_PACKET_SIZE
    }

    fn default_streaming_interface() -> u8 {
        1
    }

    fn default_control_unit_id() -> u8 {
        3
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Controls reset to their factory default when a camera is attached
    ///
    /// Empty by default, so attaching keeps the values last written.
    #[serde(default)]
    pub reset_on_probe: Vec<CameraControl>,
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/uvc-cam/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("uvc-cam").join("driver.toml")
        } else {
            PathBuf::from(".config/uvc-cam/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        Self::validate_hex_id(&self.device.vendor_id, "vendor_id")?;
        Self::validate_hex_id(&self.device.product_id, "product_id")?;

        let timeout_ms = self.transfer.timeout_ms;
        if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
            return Err(anyhow!(
                "Invalid timeout_ms {}, must be 1-{}",
                timeout_ms,
                MAX_TIMEOUT_MS
            ));
        }

        let size = self.streaming.iso_packet_size;
        if size == 0 || size > MAX_ISO_PACKET_SIZE {
            return Err(anyhow!(
                "Invalid iso_packet_size {}, must be 1-{}",
                size,
                MAX_ISO_PACKET_SIZE
            ));
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<u16> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1e4e')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
    }

    pub fn vendor_id(&self) -> Result<u16> {
        Self::validate_hex_id(&self.device.vendor_id, "vendor_id")
    }

    pub fn product_id(&self) -> Result<u16> {
        Self::validate_hex_id(&self.device.product_id, "product_id")
    }

    /// Device filter in "0xVID:0xPID" form
    pub fn device_filter(&self) -> String {
        format!("{}:{}", self.device.vendor_id, self.device.product_id)
    }

    /// Settings handed to every camera probe
    pub fn probe_settings(&self) -> Result<ProbeSettings> {
        Ok(ProbeSettings {
            vendor_id: self.vendor_id()?,
            product_id: self.product_id()?,
            timeout: self.transfer.timeout(),
            control_interface: self.streaming.control_interface,
            streaming_interface: self.streaming.streaming_interface,
            unit_id: self.streaming.control_unit_id,
            iso_packet_size: self.streaming.iso_packet_size,
            reset_on_probe: self.controls.reset_on_probe.clone(),
        })
    }
}

/// Load configuration from a path, expanding a leading `~`
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}
