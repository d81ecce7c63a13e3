// src/peripherals/mod.rs - Emulated peripheral registries
pub mod adc;
pub mod gpio;
pub mod snapshot;
pub mod uart;

use crate::config::DeviceProfile;
use crate::error::PeripheralResult;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use adc::{Adc, SampleCallback};
pub use gpio::{Gpio, PinMode, PinState};
pub use uart::Uart;

/// Save/restore contract shared by every registry.
///
/// `restore_state` validates the whole blob before touching live state and
/// replaces the registry contents wholesale.
pub trait Peripheral: Send + Sync {
    fn name(&self) -> &'static str;
    fn save_state(&self) -> PeripheralResult<String>;
    fn restore_state(&self, blob: &str) -> PeripheralResult<()>;
}

/// Registry state stays consistent across a panicking caller, so a poisoned
/// lock is simply taken over.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshot blobs for all three registries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub gpio: String,
    pub uart: String,
    pub adc: String,
}

/// One registry of each kind, owned by the application.
#[derive(Default)]
pub struct Peripherals {
    pub gpio: Gpio,
    pub uart: Uart,
    pub adc: Adc,
}

impl Peripherals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring up every registry the way the emulated part does at reset.
    pub fn initialize(&self, profile: &DeviceProfile) {
        tracing::info!("Initializing peripherals for device '{}'", profile.name);
        self.gpio.initialize();
        self.uart.initialize(profile.uart.default_baud);
        self.adc.initialize();
    }

    pub fn save_all(&self) -> PeripheralResult<SystemSnapshot> {
        Ok(SystemSnapshot {
            gpio: self.gpio.save_state()?,
            uart: self.uart.save_state()?,
            adc: self.adc.save_state()?,
        })
    }

    /// Restore all three registries, or none if any blob is malformed.
    pub fn restore_all(&self, snapshot: &SystemSnapshot) -> PeripheralResult<()> {
        let gpio = Gpio::parse_snapshot(&snapshot.gpio)?;
        let uart = Uart::parse_snapshot(&snapshot.uart)?;
        let adc = Adc::parse_snapshot(&snapshot.adc)?;
        self.gpio.apply_snapshot(gpio);
        self.uart.apply_snapshot(uart);
        self.adc.apply_snapshot(adc);
        Ok(())
    }

    /// Combined state as a single JSON document `{gpio, uart, adc}`.
    pub fn state_json(&self) -> PeripheralResult<serde_json::Value> {
        let registries: [&dyn Peripheral; 3] = [&self.gpio, &self.uart, &self.adc];
        let mut state = serde_json::Map::new();
        for registry in registries {
            let blob = registry.save_state()?;
            state.insert(registry.name().to_string(), serde_json::from_str(&blob)?);
        }
        Ok(serde_json::Value::Object(state))
    }
}
