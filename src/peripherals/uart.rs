// src/peripherals/uart.rs - Single UART channel with receive and transmit queues
use super::{Peripheral, lock, snapshot};
use crate::error::{PeripheralError, PeripheralResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct UartState {
    initialized: bool,
    baud_rate: u32,
    rx_buffer: VecDeque<u8>,
    tx_buffer: VecDeque<u8>,
}

impl UartState {
    fn ensure_initialized(&self) -> PeripheralResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(PeripheralError::Uninitialized)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UartSnapshot {
    initialized: bool,
    baud_rate: u32,
    rx_buffer: Vec<u8>,
    tx_buffer: Vec<u8>,
}

/// The emulated UART.
///
/// Bytes written go to the transmit queue and stay there; nothing on the
/// device side drains it. The receive queue is fed by `inject`.
#[derive(Debug, Default)]
pub struct Uart {
    state: Mutex<UartState>,
}

impl Uart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baud rate and mark the channel ready.
    ///
    /// Queued bytes survive re-initialization.
    pub fn initialize(&self, baud_rate: u32) {
        let mut state = lock(&self.state);
        state.initialized = true;
        state.baud_rate = baud_rate;
        tracing::info!("UART initialized at {} baud", baud_rate);
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    pub fn baud_rate(&self) -> u32 {
        lock(&self.state).baud_rate
    }

    pub fn write(&self, byte: u8) -> PeripheralResult<()> {
        let mut state = lock(&self.state);
        state.ensure_initialized()?;
        state.tx_buffer.push_back(byte);
        Ok(())
    }

    /// Pop the oldest received byte, `None` when the receive queue is empty.
    pub fn read(&self) -> PeripheralResult<Option<u8>> {
        let mut state = lock(&self.state);
        state.ensure_initialized()?;
        Ok(state.rx_buffer.pop_front())
    }

    pub fn available(&self) -> bool {
        !lock(&self.state).rx_buffer.is_empty()
    }

    /// Queue bytes as if they had arrived on the wire.
    pub fn inject(&self, bytes: &[u8]) -> PeripheralResult<()> {
        let mut state = lock(&self.state);
        state.ensure_initialized()?;
        state.rx_buffer.extend(bytes.iter().copied());
        tracing::debug!("UART received {} byte(s)", bytes.len());
        Ok(())
    }

    /// Copy of the transmit queue, oldest byte first.
    pub fn transmitted(&self) -> Vec<u8> {
        lock(&self.state).tx_buffer.iter().copied().collect()
    }
}

impl Peripheral for Uart {
    fn name(&self) -> &'static str {
        "uart"
    }

    fn save_state(&self) -> PeripheralResult<String> {
        let state = lock(&self.state);
        snapshot::encode(&UartSnapshot {
            initialized: state.initialized,
            baud_rate: state.baud_rate,
            rx_buffer: state.rx_buffer.iter().copied().collect(),
            tx_buffer: state.tx_buffer.iter().copied().collect(),
        })
    }

    fn restore_state(&self, blob: &str) -> PeripheralResult<()> {
        let restored = Self::parse_snapshot(blob)?;
        self.apply_snapshot(restored);
        Ok(())
    }
}

impl Uart {
    pub(crate) fn parse_snapshot(blob: &str) -> PeripheralResult<UartSnapshot> {
        snapshot::decode("uart", blob)
    }

    pub(crate) fn apply_snapshot(&self, restored: UartSnapshot) {
        let mut state = lock(&self.state);
        state.initialized = restored.initialized;
        state.baud_rate = restored.baud_rate;
        state.rx_buffer = restored.rx_buffer.into();
        state.tx_buffer = restored.tx_buffer.into();
        tracing::info!(
            "UART state restored ({} rx, {} tx bytes queued)",
            state.rx_buffer.len(),
            state.tx_buffer.len()
        );
    }
}
