//! # Device Profile
//!
//! Describes the microcontroller being emulated: how many GPIO ports and pins
//! it has, which baud rates its UART accepts, and the shape of its ADC.
//!
//! ## Example: TOML Profile
//!
//! ```toml
//! name = "tm4c123"
//!
//! [gpio]
//! num_ports = 6
//! pins_per_port = 8
//!
//! [uart]
//! default_baud = 115200
//! supported_baud_rates = [9600, 115200]
//!
//! [adc]
//! num_channels = 12
//! max_sample_rate = 1000000
//! ```
//!
//! Every field is optional. The profile bounds what the command layer
//! accepts; the registries themselves do not consult it.

// src/config.rs - Device profile configuration
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid profile: {0}")]
    Invalid(String),
}

/// Top-level description of an emulated device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceProfile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub gpio: GpioProfile,
    #[serde(default)]
    pub uart: UartProfile,
    #[serde(default)]
    pub adc: AdcProfile,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            name: default_name(),
            gpio: GpioProfile::default(),
            uart: UartProfile::default(),
            adc: AdcProfile::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpioProfile {
    #[serde(default = "default_num_ports")]
    pub num_ports: u8,
    #[serde(default = "default_pins_per_port")]
    pub pins_per_port: u16,
    #[serde(default = "default_true")]
    pub has_pull_up: bool,
    #[serde(default = "default_true")]
    pub has_pull_down: bool,
}

impl Default for GpioProfile {
    fn default() -> Self {
        Self {
            num_ports: default_num_ports(),
            pins_per_port: default_pins_per_port(),
            has_pull_up: true,
            has_pull_down: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UartProfile {
    #[serde(default = "default_baud")]
    pub default_baud: u32,
    #[serde(default = "default_supported_baud_rates")]
    pub supported_baud_rates: Vec<u32>,
}

impl Default for UartProfile {
    fn default() -> Self {
        Self {
            default_baud: default_baud(),
            supported_baud_rates: default_supported_baud_rates(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdcProfile {
    #[serde(default = "default_num_channels")]
    pub num_channels: u16,
    #[serde(default = "default_resolution")]
    pub resolution: u8,
    #[serde(default = "default_max_sample_rate")]
    pub max_sample_rate: u32,
}

impl Default for AdcProfile {
    fn default() -> Self {
        Self {
            num_channels: default_num_channels(),
            resolution: default_resolution(),
            max_sample_rate: default_max_sample_rate(),
        }
    }
}

impl DeviceProfile {
    /// Reject profiles the command layer could not work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gpio.num_ports == 0 || self.gpio.pins_per_port == 0 {
            return Err(ConfigError::Invalid("GPIO needs at least one port and one pin".to_string()));
        }
        if self.gpio.pins_per_port > 256 {
            return Err(ConfigError::Invalid("GPIO pins_per_port must be <= 256".to_string()));
        }
        if !self.uart.supported_baud_rates.contains(&self.uart.default_baud) {
            return Err(ConfigError::Invalid(format!(
                "UART default_baud {} is not in supported_baud_rates",
                self.uart.default_baud
            )));
        }
        if self.adc.num_channels == 0 || self.adc.num_channels > 256 {
            return Err(ConfigError::Invalid("ADC num_channels must be between 1 and 256".to_string()));
        }
        if self.adc.max_sample_rate == 0 {
            return Err(ConfigError::Invalid("ADC max_sample_rate must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_name() -> String { "generic-mcu".to_string() }
fn default_num_ports() -> u8 { 8 }
fn default_pins_per_port() -> u16 { 16 }
fn default_true() -> bool { true }
fn default_baud() -> u32 { 115200 }
fn default_supported_baud_rates() -> Vec<u32> { vec![9600, 19200, 38400, 57600, 115200] }
fn default_num_channels() -> u16 { 8 }
fn default_resolution() -> u8 { 12 }
fn default_max_sample_rate() -> u32 { 10_000 }

/// Load and validate a device profile from a TOML file at the given path.
pub fn load_profile(path: &str) -> Result<DeviceProfile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read profile '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let profile: DeviceProfile = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse profile TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    profile.validate()?;
    Ok(profile)
}
