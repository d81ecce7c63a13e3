// src/main.rs - Interactive peripheral emulator shell
use clap::Parser;
use mcu_emu::config::{self, DeviceProfile};
use mcu_emu::peripherals::Peripherals;
use mcu_emu::shell::{Dispatcher, Shell};
use mcu_emu::web;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "mcu-shell", version, about = "Emulate microcontroller GPIO, UART and ADC peripherals")]
struct Args {
    /// Device profile (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Serve the JSON API on 127.0.0.1:<PORT>
    #[arg(long, value_name = "PORT")]
    web: Option<u16>,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Logs go to stderr so they do not interleave with shell output
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting MCU peripheral emulator");

    let profile = match &args.config {
        Some(path) => {
            tracing::info!("Loading device profile from: {}", path);
            config::load_profile(path).map_err(|e| {
                tracing::error!("Failed to load profile from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => DeviceProfile::default(),
    };

    tracing::info!(
        "Device: {} ({} GPIO ports x {} pins, {} ADC channels)",
        profile.name,
        profile.gpio.num_ports,
        profile.gpio.pins_per_port,
        profile.adc.num_channels
    );

    let peripherals = Arc::new(Peripherals::new());
    peripherals.initialize(&profile);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&peripherals), profile));

    if let Some(port) = args.web {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let web_dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(e) = web::api::serve(web_dispatcher, listener).await {
                tracing::error!("Web API stopped: {}", e);
            }
        });
    }

    // The shell blocks on stdin, so it gets its own thread
    let mut shell = Shell::new(dispatcher);
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        shell.run(stdin.lock(), std::io::stdout())
    })
    .await??;

    tracing::info!("Shell exited, shutting down");
    Ok(())
}
