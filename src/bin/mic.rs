//! Wireless Microphone
//!
//! Advertises itself on the LAN, waits for a receiver's handshake and
//! streams captured audio to it as raw PCM over UDP.
//!
//! Usage: `mic [--config <path>] [--tone [hz]] [--list-devices] [--json]`

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wireless_mic::{
    audio::{list_input_devices, CaptureBackend, CpalBackend, InputDevicePermission, ToneBackend},
    config::AppConfig,
    network::MdnsRegistry,
    session::{PermissionProbe, Session, SessionParts, SessionState, StaticPermission, UserAction},
};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    tone: Option<f64>,
    list_devices: bool,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1).peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--tone" => {
                let hz = match iter.peek() {
                    Some(next) if !next.starts_with("--") => {
                        let value = iter.next().unwrap_or_default();
                        value
                            .parse::<f64>()
                            .with_context(|| format!("invalid tone frequency '{}'", value))?
                    }
                    _ => 440.0,
                };
                args.tone = Some(hz);
            }
            "--list-devices" => args.list_devices = true,
            "--json" => args.json = true,
            other => bail!("unknown argument '{}'", other),
        }
    }
    Ok(args)
}

fn print_state(state: &SessionState, json: bool) {
    if json {
        match serde_json::to_string(state) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to encode state: {}", e),
        }
        return;
    }

    print!("[{:>6.1}s] {}", state.elapsed_ms as f64 / 1000.0, state.phase);
    if let Some(error) = &state.error {
        print!("  error: {}", error);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    if args.list_devices {
        let devices = list_input_devices();
        if args.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else {
            println!("\n=== Available Input Devices ===");
            for device in &devices {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}{}", device.name, default_marker);
                println!("    Sample rates: {:?}", device.sample_rates);
                println!("    Channels: {:?}", device.channels);
            }
            println!();
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default()?,
    };

    tracing::info!("Starting wireless mic '{}'", config.pairing.device_name);

    let host_name: String = config
        .pairing
        .device_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let registry = MdnsRegistry::new(&host_name)?;

    let (backend, permission): (Arc<dyn CaptureBackend>, Arc<dyn PermissionProbe>) = match args.tone {
        Some(hz) => {
            tracing::info!("Using synthetic {} Hz tone instead of a capture device", hz);
            (Arc::new(ToneBackend::new(hz, 0.3)), Arc::new(StaticPermission(true)))
        }
        None => (
            Arc::new(CpalBackend::new(config.capture.read_timeout())),
            Arc::new(InputDevicePermission),
        ),
    };

    let mut session = Session::spawn(
        config,
        SessionParts {
            backend,
            registry: Arc::new(registry),
            permission,
        },
    )?;

    let mut states = session.subscribe_state();
    let events = session.events();

    session.dispatch(UserAction::StartPairing);
    session.dispatch(UserAction::StartRecording);

    tracing::info!("Running - press Ctrl+C to stop");

    let mut last_phase = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                // Elapsed-only updates are printed once per second
                let phase_changed = last_phase != Some((state.phase, state.error.clone()));
                if phase_changed || state.elapsed_ms % 1000 == 0 {
                    print_state(&state, args.json);
                    last_phase = Some((state.phase, state.error.clone()));
                }
            }
        }

        while let Ok(event) = events.try_recv() {
            tracing::info!("UI event: {:?}", event);
        }
    }

    tokio::task::block_in_place(|| session.shutdown());
    tracing::info!("Stopped");
    Ok(())
}
