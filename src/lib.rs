// src/lib.rs - Microcontroller peripheral emulator
//
// GPIO, UART and ADC registries with JSON save/restore, plus the command
// shell and HTTP front ends that drive them.

pub mod config;
pub mod error;
pub mod peripherals;
pub mod shell;
pub mod web;

pub use config::{DeviceProfile, load_profile};
pub use error::{PeripheralError, PeripheralResult};
pub use peripherals::{Adc, Gpio, Peripheral, Peripherals, PinMode, PinState, SampleCallback, SystemSnapshot, Uart};
pub use shell::{Dispatcher, Shell, ShellError};
