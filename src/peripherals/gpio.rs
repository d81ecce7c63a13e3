// src/peripherals/gpio.rs - GPIO pin registry
use super::{Peripheral, lock, snapshot};
use crate::error::{PeripheralError, PeripheralResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    InputPullUp,
    InputPullDown,
}

impl PinMode {
    /// Integer encoding used in snapshots.
    pub fn code(self) -> u8 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::InputPullUp => 2,
            PinMode::InputPullDown => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PinMode::Input),
            1 => Some(PinMode::Output),
            2 => Some(PinMode::InputPullUp),
            3 => Some(PinMode::InputPullDown),
            _ => None,
        }
    }
}

impl FromStr for PinMode {
    type Err = PeripheralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" => Ok(PinMode::Input),
            "output" => Ok(PinMode::Output),
            "input-pullup" => Ok(PinMode::InputPullUp),
            "input-pulldown" => Ok(PinMode::InputPullDown),
            other => Err(PeripheralError::InvalidArgument(format!(
                "unknown pin mode '{}' (expected input, output, input-pullup, input-pulldown)",
                other
            ))),
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
            PinMode::InputPullUp => "input-pullup",
            PinMode::InputPullDown => "input-pulldown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinState {
    #[default]
    Low,
    High,
}

impl PinState {
    pub fn toggled(self) -> Self {
        match self {
            PinState::Low => PinState::High,
            PinState::High => PinState::Low,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PinState::Low => 0,
            PinState::High => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PinState::Low),
            1 => Some(PinState::High),
            _ => None,
        }
    }
}

impl FromStr for PinState {
    type Err = PeripheralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "low" => Ok(PinState::Low),
            "1" | "high" => Ok(PinState::High),
            other => Err(PeripheralError::InvalidArgument(format!(
                "invalid pin value '{}' (use 0/low or 1/high)",
                other
            ))),
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinState::Low => f.write_str("LOW"),
            PinState::High => f.write_str("HIGH"),
        }
    }
}

/// Composite key for a pin: port in the high byte, pin in the low byte.
pub type PinId = u16;

pub fn pin_id(port: u8, pin: u8) -> PinId {
    ((port as u16) << 8) | pin as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PinConfig {
    mode: PinMode,
    state: PinState,
}

#[derive(Debug, Default)]
struct GpioState {
    initialized: bool,
    pins: BTreeMap<PinId, PinConfig>,
}

impl GpioState {
    fn output_pin(&mut self, port: u8, pin: u8) -> PeripheralResult<&mut PinConfig> {
        if !self.initialized {
            return Err(PeripheralError::Uninitialized);
        }
        let config = self
            .pins
            .get_mut(&pin_id(port, pin))
            .ok_or(PeripheralError::NotConfigured)?;
        if config.mode != PinMode::Output {
            return Err(PeripheralError::WrongMode);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GpioSnapshot {
    initialized: bool,
    pins: BTreeMap<String, PinRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PinRecord {
    port: u8,
    pin: u8,
    mode: u8,
    state: u8,
}

/// Registry of configured GPIO pins.
///
/// A pin that was never configured is treated as absent: writes and toggles
/// against it fail, reads return `PinState::Low`.
#[derive(Debug, Default)]
pub struct Gpio {
    state: Mutex<GpioState>,
}

impl Gpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every pin and mark the registry ready.
    pub fn initialize(&self) {
        let mut state = lock(&self.state);
        state.pins.clear();
        state.initialized = true;
        tracing::info!("GPIO initialized");
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    /// Insert or overwrite a pin's configuration. The pin starts `Low`.
    pub fn configure_pin(&self, port: u8, pin: u8, mode: PinMode) -> PeripheralResult<()> {
        let mut state = lock(&self.state);
        if !state.initialized {
            return Err(PeripheralError::Uninitialized);
        }
        state.pins.insert(
            pin_id(port, pin),
            PinConfig {
                mode,
                state: PinState::Low,
            },
        );
        tracing::debug!("GPIO {}.{} configured as {}", port, pin, mode);
        Ok(())
    }

    pub fn write_pin(&self, port: u8, pin: u8, value: PinState) -> PeripheralResult<()> {
        let mut state = lock(&self.state);
        state.output_pin(port, pin)?.state = value;
        tracing::debug!("GPIO {}.{} <- {}", port, pin, value);
        Ok(())
    }

    /// Current level of a pin, `Low` when uninitialized or unconfigured.
    pub fn read_pin(&self, port: u8, pin: u8) -> PinState {
        let state = lock(&self.state);
        if !state.initialized {
            return PinState::Low;
        }
        state
            .pins
            .get(&pin_id(port, pin))
            .map(|config| config.state)
            .unwrap_or(PinState::Low)
    }

    /// Flip an output pin and return its new level.
    pub fn toggle_pin(&self, port: u8, pin: u8) -> PeripheralResult<PinState> {
        let mut state = lock(&self.state);
        let config = state.output_pin(port, pin)?;
        config.state = config.state.toggled();
        let value = config.state;
        tracing::debug!("GPIO {}.{} toggled to {}", port, pin, value);
        Ok(value)
    }

    pub fn pin_mode(&self, port: u8, pin: u8) -> Option<PinMode> {
        lock(&self.state)
            .pins
            .get(&pin_id(port, pin))
            .map(|config| config.mode)
    }
}

impl Peripheral for Gpio {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn save_state(&self) -> PeripheralResult<String> {
        let state = lock(&self.state);
        let pins = state
            .pins
            .iter()
            .map(|(id, config)| {
                let record = PinRecord {
                    port: (id >> 8) as u8,
                    pin: (id & 0xFF) as u8,
                    mode: config.mode.code(),
                    state: config.state.code(),
                };
                (id.to_string(), record)
            })
            .collect();
        snapshot::encode(&GpioSnapshot {
            initialized: state.initialized,
            pins,
        })
    }

    fn restore_state(&self, blob: &str) -> PeripheralResult<()> {
        let restored = Self::parse_snapshot(blob)?;
        self.apply_snapshot(restored);
        Ok(())
    }
}

/// A fully validated GPIO snapshot, ready to replace live state.
#[derive(Debug)]
pub(crate) struct GpioRestore {
    initialized: bool,
    pins: BTreeMap<PinId, PinConfig>,
}

impl Gpio {
    pub(crate) fn parse_snapshot(blob: &str) -> PeripheralResult<GpioRestore> {
        let saved: GpioSnapshot = snapshot::decode("gpio", blob)?;
        let mut pins = BTreeMap::new();
        for (key, record) in &saved.pins {
            let mode = PinMode::from_code(record.mode).ok_or_else(|| {
                PeripheralError::MalformedSnapshot(format!("pin {} has invalid mode {}", key, record.mode))
            })?;
            let value = PinState::from_code(record.state).ok_or_else(|| {
                PeripheralError::MalformedSnapshot(format!("pin {} has invalid state {}", key, record.state))
            })?;
            pins.insert(pin_id(record.port, record.pin), PinConfig { mode, state: value });
        }
        Ok(GpioRestore {
            initialized: saved.initialized,
            pins,
        })
    }

    pub(crate) fn apply_snapshot(&self, restored: GpioRestore) {
        let mut state = lock(&self.state);
        state.initialized = restored.initialized;
        state.pins = restored.pins;
        tracing::info!("GPIO state restored ({} pins)", state.pins.len());
    }
}
