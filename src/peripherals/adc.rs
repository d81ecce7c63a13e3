// src/peripherals/adc.rs - ADC channel registry with background sampling
//!
//! Each configured channel can run one sampler thread. The sampler takes the
//! registry lock only for the instant of a reading; the wait between samples
//! happens unlocked on a stop channel, so stopping is cooperative and bounded
//! by one sample period.
//!
//! Every path that stops a sampler or replaces channel state
//! (`initialize`, `configure_channel`, `start_continuous`, `stop_continuous`,
//! `restore_state`, drop) goes through one quiesce step. A channel whose
//! sampler is being joined stays marked as stopping until the join completes,
//! and other callers wait on that mark, so no sampler ever observes a
//! swapped-out configuration.

use super::{Peripheral, lock, snapshot};
use crate::error::{PeripheralError, PeripheralResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Midpoint of the 12-bit range, the simulated input level.
pub const ADC_BASELINE: u16 = 2048;
/// Largest value a 12-bit conversion can produce.
pub const ADC_MAX: u16 = 4095;
const NOISE_LOW: i32 = -50;
const NOISE_HIGH: i32 = 50;

/// Invoked with every reading while continuous sampling is active.
pub type SampleCallback = Arc<dyn Fn(u16) + Send + Sync>;

struct Sampler {
    channel: u8,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sampler {
    /// Signal the thread and wait for it to exit.
    fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            tracing::error!("ADC channel {} sampler panicked", self.channel);
        }
        tracing::info!("ADC channel {} continuous sampling stopped", self.channel);
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Channel {
    sample_rate: u32,
    last_value: u16,
    callback: Option<SampleCallback>,
    sampler: Option<Sampler>,
}

impl Channel {
    fn new(sample_rate: u32, last_value: u16) -> Self {
        Self {
            sample_rate,
            last_value,
            callback: None,
            sampler: None,
        }
    }
}

#[derive(Clone, Copy)]
enum Scope {
    All,
    Channel(u8),
}

#[derive(Default)]
struct AdcState {
    initialized: bool,
    channels: BTreeMap<u8, Channel>,
    /// Channels whose sampler has been taken out and is still being joined.
    stopping: BTreeSet<u8>,
}

/// Registry state plus the signal raised whenever an in-flight stop finishes.
#[derive(Default)]
struct Shared {
    state: Mutex<AdcState>,
    stopped: Condvar,
}

impl AdcState {
    fn configured(&mut self, channel: u8) -> PeripheralResult<&mut Channel> {
        if !self.initialized {
            return Err(PeripheralError::Uninitialized);
        }
        self.channels
            .get_mut(&channel)
            .ok_or(PeripheralError::NotConfigured)
    }

    fn is_stopping(&self, scope: Scope) -> bool {
        match scope {
            Scope::All => !self.stopping.is_empty(),
            Scope::Channel(channel) => self.stopping.contains(&channel),
        }
    }

    fn take_samplers(&mut self, scope: Scope) -> Vec<Sampler> {
        match scope {
            Scope::All => self
                .channels
                .values_mut()
                .filter_map(|ch| ch.sampler.take())
                .collect(),
            Scope::Channel(channel) => self
                .channels
                .get_mut(&channel)
                .and_then(|ch| ch.sampler.take())
                .into_iter()
                .collect(),
        }
    }
}

/// Take one simulated reading and record it as the channel's last value.
fn sample(state: &Mutex<AdcState>, channel: u8) -> u16 {
    let mut state = lock(state);
    if !state.initialized {
        return 0;
    }
    match state.channels.get_mut(&channel) {
        Some(ch) => {
            let noise = rand::rng().random_range(NOISE_LOW..NOISE_HIGH);
            let value = (ADC_BASELINE as i32 + noise) as u16;
            ch.last_value = value;
            value
        }
        None => 0,
    }
}

fn sampling_loop(
    shared: Arc<Shared>,
    channel: u8,
    callback: Option<SampleCallback>,
    period: Duration,
    stop_rx: Receiver<()>,
) {
    tracing::debug!("ADC channel {} sampler running every {:?}", channel, period);
    loop {
        let value = sample(&shared.state, channel);
        if let Some(callback) = &callback {
            callback(value);
        }
        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("ADC channel {} sampler exited", channel);
}

fn sample_period(sample_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / sample_rate.max(1) as u64)
}

#[derive(Debug, Serialize, Deserialize)]
struct AdcSnapshot {
    initialized: bool,
    channels: BTreeMap<String, ChannelRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelRecord {
    sample_rate: u32,
    last_value: u16,
}

/// Registry of ADC channels.
///
/// Dropping the registry stops and joins every running sampler.
pub struct Adc {
    shared: Arc<Shared>,
}

impl Default for Adc {
    fn default() -> Self {
        Self::new()
    }
}

impl Adc {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    /// Run `f` under the lock once no sampler in `scope` is running or
    /// being stopped by another caller.
    ///
    /// Samplers are joined with the lock released, since they need it to
    /// finish their current reading. Their channels stay in `stopping` until
    /// the join completes.
    fn with_quiesced<R>(&self, scope: Scope, f: impl FnOnce(&mut AdcState) -> R) -> R {
        let mut state = lock(&self.shared.state);
        loop {
            state = self
                .shared
                .stopped
                .wait_while(state, |s| s.is_stopping(scope))
                .unwrap_or_else(PoisonError::into_inner);
            let running = state.take_samplers(scope);
            if running.is_empty() {
                return f(&mut state);
            }
            let channels: Vec<u8> = running.iter().map(|sampler| sampler.channel).collect();
            state.stopping.extend(channels.iter().copied());
            drop(state);
            for sampler in running {
                sampler.stop();
            }
            state = lock(&self.shared.state);
            for channel in &channels {
                state.stopping.remove(channel);
            }
            self.shared.stopped.notify_all();
        }
    }

    /// Stop all samplers, drop every channel and mark the registry ready.
    pub fn initialize(&self) {
        self.with_quiesced(Scope::All, |state| {
            state.channels.clear();
            state.initialized = true;
        });
        tracing::info!("ADC initialized");
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.shared.state).initialized
    }

    /// Create or overwrite a channel. A sampler already running on it is
    /// stopped first.
    pub fn configure_channel(&self, channel: u8, sample_rate: u32) -> PeripheralResult<()> {
        self.with_quiesced(Scope::Channel(channel), |state| {
            if !state.initialized {
                return Err(PeripheralError::Uninitialized);
            }
            state.channels.insert(channel, Channel::new(sample_rate, 0));
            Ok(())
        })?;
        tracing::debug!("ADC channel {} configured at {} Hz", channel, sample_rate);
        Ok(())
    }

    /// Simulated conversion: the baseline plus noise in `[-50, 49]`.
    /// Returns 0 for an uninitialized registry or an unconfigured channel.
    pub fn read(&self, channel: u8) -> u16 {
        sample(&self.shared.state, channel)
    }

    /// Integer mean of `samples` consecutive reads, each taken separately.
    pub fn read_average(&self, channel: u8, samples: u32) -> u16 {
        if samples == 0 || !self.is_initialized() {
            return 0;
        }
        let sum: u64 = (0..samples).map(|_| self.read(channel) as u64).sum();
        (sum / samples as u64) as u16
    }

    /// Begin sampling `channel` on a background thread every
    /// `1_000_000 / sample_rate` microseconds. An existing sampler on the
    /// channel is stopped and joined before the new one starts.
    pub fn start_continuous(
        &self,
        channel: u8,
        callback: Option<SampleCallback>,
    ) -> PeripheralResult<()> {
        self.with_quiesced(Scope::Channel(channel), |state| {
            let ch = state.configured(channel)?;
            if ch.sample_rate == 0 {
                return Err(PeripheralError::InvalidArgument(format!(
                    "channel {} has no sample rate for continuous mode",
                    channel
                )));
            }
            let period = sample_period(ch.sample_rate);
            let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
            let shared = Arc::clone(&self.shared);
            let worker_callback = callback.clone();
            let handle = thread::spawn(move || {
                sampling_loop(shared, channel, worker_callback, period, stop_rx)
            });
            ch.callback = callback;
            ch.sampler = Some(Sampler {
                channel,
                stop_tx,
                handle,
            });
            Ok(())
        })?;
        tracing::info!("ADC channel {} continuous sampling started", channel);
        Ok(())
    }

    /// Stop continuous sampling on `channel`. When this returns the sampler
    /// has exited and its callback will not be invoked again, including when
    /// the stop was started by another thread.
    pub fn stop_continuous(&self, channel: u8) -> PeripheralResult<()> {
        self.with_quiesced(Scope::Channel(channel), |state| {
            state.configured(channel)?.callback = None;
            Ok(())
        })
    }

    pub fn is_sampling(&self, channel: u8) -> bool {
        lock(&self.shared.state)
            .channels
            .get(&channel)
            .and_then(|ch| ch.sampler.as_ref())
            .is_some_and(Sampler::is_running)
    }

    pub fn sample_rate(&self, channel: u8) -> Option<u32> {
        lock(&self.shared.state).channels.get(&channel).map(|ch| ch.sample_rate)
    }

    pub fn last_value(&self, channel: u8) -> Option<u16> {
        lock(&self.shared.state).channels.get(&channel).map(|ch| ch.last_value)
    }
}

impl Drop for Adc {
    fn drop(&mut self) {
        self.with_quiesced(Scope::All, |_| ());
    }
}

impl Peripheral for Adc {
    fn name(&self) -> &'static str {
        "adc"
    }

    fn save_state(&self) -> PeripheralResult<String> {
        let state = lock(&self.shared.state);
        let channels = state
            .channels
            .iter()
            .map(|(channel, ch)| {
                let record = ChannelRecord {
                    sample_rate: ch.sample_rate,
                    last_value: ch.last_value,
                };
                (channel.to_string(), record)
            })
            .collect();
        snapshot::encode(&AdcSnapshot {
            initialized: state.initialized,
            channels,
        })
    }

    /// Replace every channel. Samplers and callbacks are not part of a
    /// snapshot; restored channels are idle.
    fn restore_state(&self, blob: &str) -> PeripheralResult<()> {
        let restored = Self::parse_snapshot(blob)?;
        self.apply_snapshot(restored);
        Ok(())
    }
}

/// A fully validated ADC snapshot, ready to replace live state.
pub(crate) struct AdcRestore {
    initialized: bool,
    channels: BTreeMap<u8, Channel>,
}

impl Adc {
    pub(crate) fn parse_snapshot(blob: &str) -> PeripheralResult<AdcRestore> {
        let saved: AdcSnapshot = snapshot::decode("adc", blob)?;
        let mut channels = BTreeMap::new();
        for (key, record) in &saved.channels {
            let channel: u8 = snapshot::parse_key("adc", key)?;
            if record.last_value > ADC_MAX {
                return Err(PeripheralError::MalformedSnapshot(format!(
                    "channel {} value {} exceeds {}",
                    channel, record.last_value, ADC_MAX
                )));
            }
            channels.insert(channel, Channel::new(record.sample_rate, record.last_value));
        }
        Ok(AdcRestore {
            initialized: saved.initialized,
            channels,
        })
    }

    pub(crate) fn apply_snapshot(&self, restored: AdcRestore) {
        let count = restored.channels.len();
        self.with_quiesced(Scope::All, |state| {
            state.initialized = restored.initialized;
            state.channels = restored.channels;
        });
        tracing::info!("ADC state restored ({} channels)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn ready() -> Adc {
        let adc = Adc::new();
        adc.initialize();
        adc
    }

    fn counter() -> (Arc<AtomicUsize>, SampleCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let callback: SampleCallback = Arc::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    /// Callback whose first call blocks for `hold`; counts finished calls.
    fn slow_first_call(hold: Duration) -> (Arc<AtomicUsize>, SampleCallback) {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let first = AtomicBool::new(true);
        let callback: SampleCallback = Arc::new(move |_| {
            if first.swap(false, Ordering::SeqCst) {
                thread::sleep(hold);
            }
            done.fetch_add(1, Ordering::SeqCst);
        });
        (finished, callback)
    }

    #[test]
    fn test_read_defaults_to_zero() {
        let adc = Adc::new();
        assert_eq!(adc.read(0), 0);
        adc.initialize();
        assert_eq!(adc.read(0), 0);
        assert_eq!(adc.read_average(0, 4), 0);
    }

    #[test]
    fn test_read_stays_near_midpoint() {
        let adc = ready();
        adc.configure_channel(1, 1000).unwrap();
        for _ in 0..500 {
            let value = adc.read(1);
            assert!((1998..=2097).contains(&value), "value {} out of range", value);
        }
        assert!(adc.last_value(1).is_some_and(|v| (1998..=2097).contains(&v)));
    }

    #[test]
    fn test_read_average_bounds() {
        let adc = ready();
        adc.configure_channel(2, 1000).unwrap();
        assert_eq!(adc.read_average(2, 0), 0);
        let average = adc.read_average(2, 64);
        assert!((1998..=2097).contains(&average));
    }

    #[test]
    fn test_configure_requires_initialize() {
        let adc = Adc::new();
        assert_eq!(adc.configure_channel(0, 100), Err(PeripheralError::Uninitialized));
    }

    #[test]
    fn test_start_and_stop_errors() {
        let adc = Adc::new();
        assert_eq!(adc.start_continuous(0, None), Err(PeripheralError::Uninitialized));
        assert_eq!(adc.stop_continuous(0), Err(PeripheralError::Uninitialized));
        adc.initialize();
        assert_eq!(adc.start_continuous(0, None), Err(PeripheralError::NotConfigured));
        assert_eq!(adc.stop_continuous(0), Err(PeripheralError::NotConfigured));
        adc.configure_channel(0, 0).unwrap();
        assert!(matches!(
            adc.start_continuous(0, None),
            Err(PeripheralError::InvalidArgument(_))
        ));
        assert!(!adc.is_sampling(0));
    }

    #[test]
    fn test_continuous_sampling_stops_cleanly() {
        let adc = ready();
        adc.configure_channel(3, 100).unwrap();
        let (count, callback) = counter();
        adc.start_continuous(3, Some(callback)).unwrap();
        assert!(adc.is_sampling(3));
        thread::sleep(Duration::from_millis(50));
        adc.stop_continuous(3).unwrap();
        assert!(!adc.is_sampling(3));
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_restart_replaces_callback() {
        let adc = ready();
        adc.configure_channel(1, 500).unwrap();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();
        adc.start_continuous(1, Some(first_cb)).unwrap();
        thread::sleep(Duration::from_millis(10));
        adc.start_continuous(1, Some(second_cb)).unwrap();
        let frozen = first.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(first.load(Ordering::SeqCst), frozen);
        adc.stop_continuous(1).unwrap();
        assert!(second.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_start_waits_for_stop_on_another_thread() {
        let adc = Arc::new(ready());
        adc.configure_channel(0, 1000).unwrap();
        let (old, old_cb) = slow_first_call(Duration::from_millis(200));
        adc.start_continuous(0, Some(old_cb)).unwrap();
        let stopper = {
            let adc = Arc::clone(&adc);
            thread::spawn(move || adc.stop_continuous(0))
        };
        thread::sleep(Duration::from_millis(50));

        let (_, new_cb) = counter();
        adc.start_continuous(0, Some(new_cb)).unwrap();
        assert_eq!(old.load(Ordering::SeqCst), 1);
        stopper.join().unwrap().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(old.load(Ordering::SeqCst), 1);
        adc.stop_continuous(0).unwrap();
    }

    #[test]
    fn test_concurrent_stops_both_wait_for_exit() {
        let adc = Arc::new(ready());
        adc.configure_channel(2, 1000).unwrap();
        let (finished, callback) = slow_first_call(Duration::from_millis(150));
        adc.start_continuous(2, Some(callback)).unwrap();
        let stopper = {
            let adc = Arc::clone(&adc);
            thread::spawn(move || adc.stop_continuous(2))
        };
        thread::sleep(Duration::from_millis(30));
        adc.stop_continuous(2).unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!adc.is_sampling(2));
        stopper.join().unwrap().unwrap();
    }

    #[test]
    fn test_reconfigure_stops_sampler() {
        let adc = ready();
        adc.configure_channel(4, 200).unwrap();
        let (count, callback) = counter();
        adc.start_continuous(4, Some(callback)).unwrap();
        adc.configure_channel(4, 50).unwrap();
        assert!(!adc.is_sampling(4));
        assert_eq!(adc.sample_rate(4), Some(50));
        assert_eq!(adc.last_value(4), Some(0));
        let seen = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_initialize_stops_all_samplers() {
        let adc = ready();
        adc.configure_channel(0, 200).unwrap();
        adc.configure_channel(1, 200).unwrap();
        adc.start_continuous(0, None).unwrap();
        adc.start_continuous(1, None).unwrap();
        adc.initialize();
        assert!(!adc.is_sampling(0));
        assert!(!adc.is_sampling(1));
        assert_eq!(adc.sample_rate(0), None);
    }

    #[test]
    fn test_restore_leaves_channels_idle() {
        let adc = ready();
        adc.configure_channel(3, 100).unwrap();
        adc.read(3);
        let blob = adc.save_state().unwrap();
        let (count, callback) = counter();
        adc.start_continuous(3, Some(callback)).unwrap();
        adc.restore_state(&blob).unwrap();
        assert!(!adc.is_sampling(3));
        let seen = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(25));
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert_eq!(adc.sample_rate(3), Some(100));
    }

    #[test]
    fn test_restore_rejects_bad_key_or_value() {
        let adc = ready();
        adc.configure_channel(1, 10).unwrap();
        let bad_key = r#"{"initialized":true,"channels":{"x":{"sampleRate":1,"lastValue":0}}}"#;
        let bad_value = r#"{"initialized":true,"channels":{"2":{"sampleRate":1,"lastValue":5000}}}"#;
        assert!(matches!(adc.restore_state(bad_key), Err(PeripheralError::MalformedSnapshot(_))));
        assert!(matches!(adc.restore_state(bad_value), Err(PeripheralError::MalformedSnapshot(_))));
        assert_eq!(adc.sample_rate(1), Some(10));
        assert_eq!(adc.sample_rate(2), None);
    }

    #[test]
    fn test_drop_joins_samplers() {
        let adc = ready();
        adc.configure_channel(0, 1000).unwrap();
        let (count, callback) = counter();
        adc.start_continuous(0, Some(callback)).unwrap();
        thread::sleep(Duration::from_millis(5));
        drop(adc);
        let seen = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_sample_period() {
        assert_eq!(sample_period(100), Duration::from_millis(10));
        assert_eq!(sample_period(1), Duration::from_secs(1));
    }
}
