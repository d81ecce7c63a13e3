// src/shell/commands.rs - Command table translating shell lines into registry calls
use super::ShellError;
use super::parser::{is_valid_command_name, tokenize};
use crate::config::DeviceProfile;
use crate::error::PeripheralError;
use crate::peripherals::{Peripherals, PinMode, PinState, SampleCallback, SystemSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

type Handler = fn(&Dispatcher, &[String]) -> Result<String, ShellError>;

struct Command {
    usage: &'static str,
    help: &'static str,
    handler: Handler,
}

/// Dispatches tokenized command lines to the peripheral registries.
///
/// Arguments are checked against the device profile before any registry is
/// touched. Snapshots taken with `save` live in named slots for the lifetime
/// of the dispatcher.
pub struct Dispatcher {
    peripherals: Arc<Peripherals>,
    profile: DeviceProfile,
    commands: BTreeMap<&'static str, Command>,
    slots: Mutex<HashMap<String, SystemSnapshot>>,
    latest_samples: Arc<Mutex<BTreeMap<u8, u16>>>,
}

impl Dispatcher {
    pub fn new(peripherals: Arc<Peripherals>, profile: DeviceProfile) -> Self {
        let mut dispatcher = Self {
            peripherals,
            profile,
            commands: BTreeMap::new(),
            slots: Mutex::new(HashMap::new()),
            latest_samples: Arc::new(Mutex::new(BTreeMap::new())),
        };
        dispatcher.register("help", "help", "List available commands", help);
        dispatcher.register("gpio-config", "gpio-config <port> <pin> <mode>", "Configure a GPIO pin (input, output, input-pullup, input-pulldown)", gpio_config);
        dispatcher.register("gpio-write", "gpio-write <port> <pin> <value>", "Write to a GPIO output pin (0/low or 1/high)", gpio_write);
        dispatcher.register("gpio-read", "gpio-read <port> <pin>", "Read a GPIO pin", gpio_read);
        dispatcher.register("gpio-toggle", "gpio-toggle <port> <pin>", "Toggle a GPIO output pin", gpio_toggle);
        dispatcher.register("uart-init", "uart-init <baud>", "Initialize the UART at a supported baud rate", uart_init);
        dispatcher.register("uart-write", "uart-write <text>", "Transmit text over the UART (quote it to keep spacing)", uart_write);
        dispatcher.register("uart-inject", "uart-inject <text>", "Queue text on the UART receive line (quote it to keep spacing)", uart_inject);
        dispatcher.register("uart-read", "uart-read [count]", "Read received UART bytes", uart_read);
        dispatcher.register("uart-tx", "uart-tx", "Show bytes transmitted so far", uart_tx);
        dispatcher.register("adc-config", "adc-config <channel> <sample-rate>", "Configure an ADC channel", adc_config);
        dispatcher.register("adc-read", "adc-read <channel> [samples]", "Read an ADC channel, optionally averaged", adc_read);
        dispatcher.register("adc-start", "adc-start <channel>", "Start continuous sampling on a channel", adc_start);
        dispatcher.register("adc-stop", "adc-stop <channel>", "Stop continuous sampling on a channel", adc_stop);
        dispatcher.register("save", "save <slot>", "Snapshot all peripherals into a named slot", save);
        dispatcher.register("restore", "restore <slot>", "Restore all peripherals from a named slot", restore);
        dispatcher.register("state", "state", "Print the full peripheral state as JSON", state);
        dispatcher
    }

    fn register(&mut self, name: &'static str, usage: &'static str, help: &'static str, handler: Handler) {
        debug_assert!(is_valid_command_name(name));
        self.commands.insert(name, Command { usage, help, handler });
    }

    /// Run one command line. A blank line produces empty output.
    pub fn execute(&self, line: &str) -> Result<String, ShellError> {
        let tokens = tokenize(line);
        let Some((name, args)) = tokens.split_first() else {
            return Ok(String::new());
        };
        let command = self
            .commands
            .get(name.as_str())
            .ok_or_else(|| ShellError::UnknownCommand(name.clone()))?;
        tracing::debug!("Executing command: {}", line.trim());
        (command.handler)(self, args)
    }

    pub fn command_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    pub fn peripherals(&self) -> &Arc<Peripherals> {
        &self.peripherals
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn usage(&self, name: &str) -> ShellError {
        let usage = self.commands.get(name).map(|c| c.usage).unwrap_or(name);
        ShellError::Usage(usage.to_string())
    }

    fn arg<'a>(&self, name: &str, args: &'a [String], index: usize) -> Result<&'a str, ShellError> {
        args.get(index).map(String::as_str).ok_or_else(|| self.usage(name))
    }

    fn port_and_pin(&self, name: &str, args: &[String]) -> Result<(u8, u8), ShellError> {
        let port: u8 = parse_number("port", self.arg(name, args, 0)?)?;
        let pin: u16 = parse_number("pin", self.arg(name, args, 1)?)?;
        if port >= self.profile.gpio.num_ports {
            return Err(ShellError::InvalidArgument(format!(
                "port {} out of range (device has {} ports)",
                port, self.profile.gpio.num_ports
            )));
        }
        if pin >= self.profile.gpio.pins_per_port {
            return Err(ShellError::InvalidArgument(format!(
                "pin {} out of range (ports have {} pins)",
                pin, self.profile.gpio.pins_per_port
            )));
        }
        Ok((port, pin as u8))
    }

    fn channel(&self, name: &str, args: &[String]) -> Result<u8, ShellError> {
        let channel: u16 = parse_number("channel", self.arg(name, args, 0)?)?;
        if channel >= self.profile.adc.num_channels {
            return Err(ShellError::InvalidArgument(format!(
                "channel {} out of range (device has {} channels)",
                channel, self.profile.adc.num_channels
            )));
        }
        Ok(channel as u8)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, SystemSnapshot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the recorded sample for `channel`, or for every channel.
    fn forget_samples(&self, channel: Option<u8>) {
        let mut latest = self.latest_samples.lock().unwrap_or_else(PoisonError::into_inner);
        match channel {
            Some(channel) => {
                latest.remove(&channel);
            }
            None => latest.clear(),
        }
    }

    fn latest_sample(&self, channel: u8) -> Option<u16> {
        self.latest_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .copied()
    }
}

fn parse_number<T: FromStr>(what: &str, text: &str) -> Result<T, ShellError> {
    text.parse::<T>()
        .map_err(|_| ShellError::InvalidArgument(format!("invalid {} '{}'", what, text)))
}

fn describe_bytes(bytes: &[u8]) -> String {
    format!("\"{}\" ({} byte(s))", bytes.escape_ascii(), bytes.len())
}

fn help(dispatcher: &Dispatcher, _args: &[String]) -> Result<String, ShellError> {
    let mut lines = vec!["Available commands:".to_string()];
    for command in dispatcher.commands.values() {
        lines.push(format!("  {:<36} {}", command.usage, command.help));
    }
    lines.push(format!("  {:<36} {}", "history", "Show command history"));
    lines.push(format!("  {:<36} {}", "exit", "Leave the shell"));
    Ok(lines.join("\n"))
}

fn gpio_config(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let (port, pin) = dispatcher.port_and_pin("gpio-config", args)?;
    let mode = PinMode::from_str(dispatcher.arg("gpio-config", args, 2)?)?;
    let gpio = &dispatcher.profile.gpio;
    if (mode == PinMode::InputPullUp && !gpio.has_pull_up) || (mode == PinMode::InputPullDown && !gpio.has_pull_down) {
        return Err(ShellError::InvalidArgument(format!(
            "device '{}' does not support {}",
            dispatcher.profile.name, mode
        )));
    }
    dispatcher.peripherals.gpio.configure_pin(port, pin, mode)?;
    Ok("Pin configured successfully".to_string())
}

fn gpio_write(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let (port, pin) = dispatcher.port_and_pin("gpio-write", args)?;
    let value = PinState::from_str(dispatcher.arg("gpio-write", args, 2)?)?;
    dispatcher.peripherals.gpio.write_pin(port, pin, value)?;
    Ok("Value written successfully".to_string())
}

fn gpio_read(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let (port, pin) = dispatcher.port_and_pin("gpio-read", args)?;
    Ok(format!("Pin value: {}", dispatcher.peripherals.gpio.read_pin(port, pin)))
}

fn gpio_toggle(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let (port, pin) = dispatcher.port_and_pin("gpio-toggle", args)?;
    let value = dispatcher.peripherals.gpio.toggle_pin(port, pin)?;
    Ok(format!("Pin toggled to {}", value))
}

fn uart_init(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let baud: u32 = parse_number("baud rate", dispatcher.arg("uart-init", args, 0)?)?;
    let supported = &dispatcher.profile.uart.supported_baud_rates;
    if !supported.contains(&baud) {
        return Err(ShellError::InvalidArgument(format!(
            "unsupported baud rate {} (supported: {:?})",
            baud, supported
        )));
    }
    dispatcher.peripherals.uart.initialize(baud);
    Ok(format!("UART initialized at {} baud", baud))
}

/// Unquoted words are re-joined with single spaces; quoted text is sent as typed.
fn uart_write(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    if args.is_empty() {
        return Err(dispatcher.usage("uart-write"));
    }
    let text = args.join(" ");
    for byte in text.bytes() {
        dispatcher.peripherals.uart.write(byte)?;
    }
    Ok(format!("Transmitted {}", describe_bytes(text.as_bytes())))
}

fn uart_inject(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    if args.is_empty() {
        return Err(dispatcher.usage("uart-inject"));
    }
    let text = args.join(" ");
    dispatcher.peripherals.uart.inject(text.as_bytes())?;
    Ok(format!("Queued {}", describe_bytes(text.as_bytes())))
}

fn uart_read(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let limit = match args.first() {
        Some(count) => parse_number::<usize>("count", count)?,
        None => usize::MAX,
    };
    let uart = &dispatcher.peripherals.uart;
    let mut received = Vec::new();
    while received.len() < limit {
        match uart.read()? {
            Some(byte) => received.push(byte),
            None => break,
        }
    }
    if received.is_empty() {
        Ok("No data available".to_string())
    } else {
        Ok(format!("Received {}", describe_bytes(&received)))
    }
}

fn uart_tx(dispatcher: &Dispatcher, _args: &[String]) -> Result<String, ShellError> {
    let transmitted = dispatcher.peripherals.uart.transmitted();
    Ok(format!("Transmitted so far: {}", describe_bytes(&transmitted)))
}

fn adc_config(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let channel = dispatcher.channel("adc-config", args)?;
    let rate: u32 = parse_number("sample rate", dispatcher.arg("adc-config", args, 1)?)?;
    let max = dispatcher.profile.adc.max_sample_rate;
    if rate > max {
        return Err(ShellError::InvalidArgument(format!(
            "sample rate {} exceeds device maximum {}",
            rate, max
        )));
    }
    dispatcher.peripherals.adc.configure_channel(channel, rate)?;
    dispatcher.forget_samples(Some(channel));
    Ok("ADC channel configured successfully".to_string())
}

fn adc_read(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let channel = dispatcher.channel("adc-read", args)?;
    let adc = &dispatcher.peripherals.adc;
    match args.get(1) {
        Some(samples) => {
            let samples: u32 = parse_number("sample count", samples)?;
            if samples == 0 {
                return Err(PeripheralError::InvalidArgument("sample count must be > 0".to_string()).into());
            }
            Ok(format!("Average ADC value: {}", adc.read_average(channel, samples)))
        }
        None => Ok(format!("ADC value: {}", adc.read(channel))),
    }
}

fn adc_start(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let channel = dispatcher.channel("adc-start", args)?;
    let adc = &dispatcher.peripherals.adc;
    // Join any earlier sampler so its callback cannot record over the new run
    adc.stop_continuous(channel)?;
    dispatcher.forget_samples(Some(channel));
    let latest = Arc::clone(&dispatcher.latest_samples);
    let callback: SampleCallback = Arc::new(move |value| {
        tracing::debug!("ADC channel {} sample: {}", channel, value);
        latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, value);
    });
    adc.start_continuous(channel, Some(callback))?;
    Ok(format!("Continuous sampling started on channel {}", channel))
}

fn adc_stop(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let channel = dispatcher.channel("adc-stop", args)?;
    dispatcher.peripherals.adc.stop_continuous(channel)?;
    match dispatcher.latest_sample(channel) {
        Some(value) => Ok(format!(
            "Continuous sampling stopped on channel {} (last sample: {})",
            channel, value
        )),
        None => Ok(format!("Continuous sampling stopped on channel {}", channel)),
    }
}

fn save(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let slot = dispatcher.arg("save", args, 0)?;
    let snapshot = dispatcher.peripherals.save_all()?;
    dispatcher.slots().insert(slot.to_string(), snapshot);
    tracing::info!("Saved peripheral state to slot '{}'", slot);
    Ok(format!("State saved to slot '{}'", slot))
}

fn restore(dispatcher: &Dispatcher, args: &[String]) -> Result<String, ShellError> {
    let slot = dispatcher.arg("restore", args, 0)?;
    let snapshot = dispatcher
        .slots()
        .get(slot)
        .cloned()
        .ok_or_else(|| ShellError::UnknownSnapshot(slot.to_string()))?;
    dispatcher.peripherals.restore_all(&snapshot)?;
    dispatcher.forget_samples(None);
    Ok(format!("State restored from slot '{}'", slot))
}

fn state(dispatcher: &Dispatcher, _args: &[String]) -> Result<String, ShellError> {
    let json = dispatcher.peripherals.state_json()?;
    serde_json::to_string_pretty(&json).map_err(|e| PeripheralError::from(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let profile = DeviceProfile::default();
        let peripherals = Arc::new(Peripherals::new());
        peripherals.initialize(&profile);
        Dispatcher::new(peripherals, profile)
    }

    #[test]
    fn test_blank_and_unknown() {
        let d = dispatcher();
        assert_eq!(d.execute("   ").unwrap(), "");
        assert!(matches!(d.execute("frobnicate"), Err(ShellError::UnknownCommand(_))));
    }

    #[test]
    fn test_gpio_commands() {
        let d = dispatcher();
        assert_eq!(d.execute("gpio-config 1 0 output").unwrap(), "Pin configured successfully");
        assert_eq!(d.execute("gpio-write 1 0 high").unwrap(), "Value written successfully");
        assert_eq!(d.execute("gpio-read 1 0").unwrap(), "Pin value: HIGH");
        assert_eq!(d.execute("gpio-toggle 1 0").unwrap(), "Pin toggled to LOW");
        assert_eq!(d.execute("gpio-read 1 0").unwrap(), "Pin value: LOW");
    }

    #[test]
    fn test_gpio_argument_errors() {
        let d = dispatcher();
        assert!(matches!(d.execute("gpio-config 1"), Err(ShellError::Usage(_))));
        assert!(matches!(d.execute("gpio-config 9 0 output"), Err(ShellError::InvalidArgument(_))));
        assert!(matches!(d.execute("gpio-config 1 16 output"), Err(ShellError::InvalidArgument(_))));
        assert!(matches!(d.execute("gpio-config x 0 output"), Err(ShellError::InvalidArgument(_))));
        assert!(matches!(
            d.execute("gpio-config 1 0 analog"),
            Err(ShellError::Peripheral(PeripheralError::InvalidArgument(_)))
        ));
        d.execute("gpio-config 1 0 input").unwrap();
        assert!(matches!(
            d.execute("gpio-write 1 0 1"),
            Err(ShellError::Peripheral(PeripheralError::WrongMode))
        ));
    }

    #[test]
    fn test_pull_modes_follow_profile() {
        let mut profile = DeviceProfile::default();
        profile.gpio.has_pull_down = false;
        let peripherals = Arc::new(Peripherals::new());
        peripherals.initialize(&profile);
        let d = Dispatcher::new(peripherals, profile);
        assert!(d.execute("gpio-config 0 0 input-pullup").is_ok());
        assert!(matches!(d.execute("gpio-config 0 0 input-pulldown"), Err(ShellError::InvalidArgument(_))));
    }

    #[test]
    fn test_uart_commands() {
        let d = dispatcher();
        assert!(matches!(d.execute("uart-init 1234"), Err(ShellError::InvalidArgument(_))));
        assert_eq!(d.execute("uart-init 9600").unwrap(), "UART initialized at 9600 baud");
        d.execute("uart-write \"AB\"").unwrap();
        assert_eq!(d.peripherals().uart.transmitted(), b"AB".to_vec());
        assert_eq!(d.execute("uart-read").unwrap(), "No data available");
        d.execute("uart-inject hi there").unwrap();
        assert_eq!(d.execute("uart-read 2").unwrap(), "Received \"hi\" (2 byte(s))");
        assert_eq!(d.execute("uart-read").unwrap(), "Received \" there\" (6 byte(s))");
    }

    #[test]
    fn test_adc_commands() {
        let d = dispatcher();
        assert!(matches!(d.execute("adc-config 8 100"), Err(ShellError::InvalidArgument(_))));
        assert!(matches!(d.execute("adc-config 0 20000"), Err(ShellError::InvalidArgument(_))));
        d.execute("adc-config 2 1000").unwrap();
        assert!(d.execute("adc-read 2").unwrap().starts_with("ADC value: "));
        assert!(d.execute("adc-read 2 8").unwrap().starts_with("Average ADC value: "));
        assert!(matches!(
            d.execute("adc-read 2 0"),
            Err(ShellError::Peripheral(PeripheralError::InvalidArgument(_)))
        ));
        d.execute("adc-start 2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let stopped = d.execute("adc-stop 2").unwrap();
        assert!(stopped.contains("last sample"));
        assert!(!d.peripherals().adc.is_sampling(2));
    }

    #[test]
    fn test_adc_stop_forgets_samples_from_earlier_runs() {
        let d = dispatcher();
        d.execute("adc-config 2 1000").unwrap();
        d.execute("adc-start 2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(d.execute("adc-stop 2").unwrap().contains("last sample"));

        d.execute("adc-config 2 500").unwrap();
        assert_eq!(d.execute("adc-stop 2").unwrap(), "Continuous sampling stopped on channel 2");

        d.execute("save idle").unwrap();
        d.execute("adc-start 2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        d.execute("restore idle").unwrap();
        assert!(!d.peripherals().adc.is_sampling(2));
        assert_eq!(d.execute("adc-stop 2").unwrap(), "Continuous sampling stopped on channel 2");
    }

    #[test]
    fn test_uart_text_spacing() {
        let d = dispatcher();
        d.execute("uart-inject \"a  b\"").unwrap();
        assert_eq!(d.execute("uart-read").unwrap(), "Received \"a  b\" (4 byte(s))");
        d.execute("uart-write a   b").unwrap();
        assert_eq!(d.peripherals().uart.transmitted(), b"a b".to_vec());
    }

    #[test]
    fn test_save_and_restore_slots() {
        let d = dispatcher();
        d.execute("gpio-config 1 0 output").unwrap();
        d.execute("gpio-write 1 0 1").unwrap();
        d.execute("save before").unwrap();
        d.execute("gpio-write 1 0 0").unwrap();
        assert!(matches!(d.execute("restore nowhere"), Err(ShellError::UnknownSnapshot(_))));
        d.execute("restore before").unwrap();
        assert_eq!(d.execute("gpio-read 1 0").unwrap(), "Pin value: HIGH");
    }

    #[test]
    fn test_state_and_help() {
        let d = dispatcher();
        let state: serde_json::Value = serde_json::from_str(&d.execute("state").unwrap()).unwrap();
        assert_eq!(state["uart"]["baudRate"], 115200);
        let help = d.execute("help").unwrap();
        for name in d.command_names() {
            assert!(help.contains(name));
        }
    }
}
