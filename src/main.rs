// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! btlink command line driver.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btlink::bluetooth::{
    BluetoothPlatform, BluezPlatform, ClientSession, ConnectionRegistry, Device,
    DeviceAddress, DeviceCatalog, HostAdvertiser, HostSession, LoopbackAir, LoopbackPlatform,
    SessionEvent, SessionRole,
};
use btlink::config::Config;
use btlink::state::{discoverable_text, paired_devices_summary, AppState};

#[derive(Parser)]
#[command(name = "btlink", version, about = "Bluetooth RFCOMM text sessions")]
struct Cli {
    /// Path to config.toml (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List paired devices.
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Connect to a paired device and chat over stdin.
    Connect {
        #[arg(long, conflicts_with = "prefix")]
        address: Option<String>,
        /// Name prefix; defaults to the configured prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Advertise the service and wait for one peer.
    Host,
    /// Toggle local discoverability.
    Discoverable {
        #[arg(long)]
        off: bool,
        #[arg(long)]
        seconds: Option<i64>,
    },
    /// In-memory client/host exchange.
    Loopback {
        #[arg(long, default_value = "hello")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("btlink={}", config.logging.level).parse()?),
        )
        .init();

    info!("Starting btlink v{}...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Devices { json } => list_devices(&config, json).await,
        Command::Connect { address, prefix } => run_client(&config, address, prefix).await,
        Command::Host => run_host(&config).await,
        Command::Discoverable { off, seconds } => toggle_discoverable(&config, !off, seconds).await,
        Command::Loopback { message } => run_loopback(&config, &message).await,
    }
}

async fn open_platform(config: &Config) -> Result<Arc<dyn BluetoothPlatform>> {
    let platform = BluezPlatform::new(config.bluetooth.adapter_name())
        .await
        .context("opening Bluetooth adapter")?
        .with_channel(config.bluetooth.rfcomm_channel);
    Ok(Arc::new(platform))
}

async fn list_devices(config: &Config, json: bool) -> Result<()> {
    let platform = open_platform(config).await?;
    let catalog = DeviceCatalog::new(platform, ConnectionRegistry::new());
    let devices = catalog.list_paired().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        println!("{}", paired_devices_summary(&devices));
    }
    Ok(())
}

async fn toggle_discoverable(config: &Config, enabled: bool, seconds: Option<i64>) -> Result<()> {
    let advertiser = HostAdvertiser::new(open_platform(config).await?);
    let shown = advertiser.toggle_discoverability(enabled, seconds).await?;
    println!("{}", discoverable_text(shown));
    Ok(())
}

async fn run_client(config: &Config, address: Option<String>, prefix: Option<String>) -> Result<()> {
    let platform = open_platform(config).await?;
    let registry = ConnectionRegistry::new();
    let state = AppState::new();

    let catalog = DeviceCatalog::new(platform.clone(), registry.clone());
    let devices = catalog.list_paired().await?;
    state.set_paired_count(devices.len());
    println!("{}", paired_devices_summary(&devices));

    let mut device = match address {
        Some(address) => {
            let address = DeviceAddress::new(address);
            devices
                .iter()
                .find(|d| d.address == address)
                .cloned()
                .unwrap_or_else(|| Device::new("", address))
        }
        None => {
            let prefix = prefix.unwrap_or_else(|| config.bluetooth.device_name_prefix.clone());
            DeviceCatalog::find_by_name_prefix(&devices, &prefix)
                .cloned()
                .ok_or_else(|| anyhow!("no paired device named {}*", prefix))?
        }
    };
    if !state.can_connect(&device) {
        bail!("{} is not a paired device", device.display_name());
    }

    let client = ClientSession::new(platform, registry)
        .with_codec(config.codec())
        .with_connect_timeout(config.bluetooth.connect_timeout());

    state.set_connecting();
    let link = match client.connect(&mut device).await {
        Ok(connected) => connected.into_link(),
        Err(e) => {
            state.set_error();
            return Err(e.into());
        }
    };
    let Some(link) = link else {
        info!("{} is already connected", device.display_name());
        return Ok(());
    };

    let (event_tx, mut event_rx) = mpsc::channel(32);
    let _ = event_tx
        .send(SessionEvent::Connected {
            device: device.clone(),
            role: SessionRole::Client,
        })
        .await;
    let session = Arc::clone(link.session());
    let reader_task = client.spawn_reader(link, event_tx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let done = matches!(event, SessionEvent::Disconnected { .. });
                render(&state, &event);
                if done {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = session.send(text).await {
                    error!("Send failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Pending notifications are of no interest once we are leaving.
    drop(event_rx);
    client.disconnect(&mut device).await;
    let _ = reader_task.await;
    info!("btlink stopped");
    Ok(())
}

async fn run_host(config: &Config) -> Result<()> {
    let platform = open_platform(config).await?;
    let state = AppState::new();

    let advertiser = HostAdvertiser::new(platform.clone());
    let paired = advertiser.paired_device_count().await?;
    state.set_paired_count(paired);
    println!("{}", state.paired_status_text());

    if advertiser.should_advertise().await? {
        let shown = advertiser
            .toggle_discoverability(true, Some(i64::from(config.bluetooth.host_discoverable_seconds)))
            .await?;
        state.set_discoverable(shown);
        println!("{}", state.discoverable_text());
    }

    let (event_tx, mut event_rx) = mpsc::channel(32);
    let host = HostSession::with_config(
        platform,
        ConnectionRegistry::new(),
        event_tx,
        config.host_config(),
    );
    host.start().await?;
    println!("{}", state.listen_button_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let restart = matches!(event, SessionEvent::Disconnected { .. });
                render(&state, &event);
                if restart {
                    if let Err(e) = host.start().await {
                        warn!("Could not listen again: {}", e);
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                // Refusals arrive as warning events.
                let _ = host.send(&line).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    drop(event_rx);
    host.disconnect().await;
    info!("btlink stopped");
    Ok(())
}

async fn run_loopback(config: &Config, message: &str) -> Result<()> {
    let air = LoopbackAir::new();
    let host_platform = LoopbackPlatform::new(&air, "00:00:00:00:00:01", "display-loopback");
    let client_platform = LoopbackPlatform::new(&air, "00:00:00:00:00:02", "loopback-client");
    host_platform.add_paired(client_platform.local().clone());
    client_platform.add_paired(host_platform.local().clone());

    let (host_tx, mut host_rx) = mpsc::channel(32);
    let host = HostSession::with_config(
        Arc::new(host_platform),
        ConnectionRegistry::new(),
        host_tx,
        config.host_config(),
    );
    host.start().await?;

    let registry = ConnectionRegistry::new();
    let catalog = DeviceCatalog::new(Arc::new(client_platform.clone()), registry.clone());
    let devices = catalog.list_paired().await?;
    println!("{}", paired_devices_summary(&devices));

    let prefix = &config.bluetooth.device_name_prefix;
    let mut device = DeviceCatalog::find_by_name_prefix(&devices, prefix)
        .cloned()
        .ok_or_else(|| anyhow!("no paired device named {}*", prefix))?;

    let client = ClientSession::new(Arc::new(client_platform), registry).with_codec(config.codec());
    let mut link = client
        .connect(&mut device)
        .await?
        .into_link()
        .ok_or_else(|| anyhow!("{} unexpectedly already connected", device.address))?;

    next_event(&mut host_rx, |e| matches!(e, SessionEvent::Connected { .. })).await?;
    link.send(message).await?;

    let SessionEvent::MessageReceived { text: received, .. } = next_event(&mut host_rx, |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await?
    else {
        bail!("expected a message from the client");
    };
    println!("host received: {}", received);

    host.send(&format!("echo: {}", received)).await?;
    println!("client received: {}", link.next_message().await?);

    client.disconnect(&mut device).await;
    next_event(&mut host_rx, |e| matches!(e, SessionEvent::Disconnected { .. })).await?;
    host.disconnect().await;
    Ok(())
}

async fn next_event(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Ok(event);
            }
        }
        Err(anyhow!("event channel closed"))
    })
    .await
    .context("timed out waiting for session event")?
}

fn render(state: &AppState, event: &SessionEvent) {
    state.apply(event);
    match event {
        SessionEvent::Connected { device, .. } => {
            println!("{}: {}", state.get_status().as_str(), device.display_name());
        }
        SessionEvent::MessageReceived { from, text } => println!("[{}] {}", from, text),
        SessionEvent::Disconnected { address, .. } => {
            println!("{}: {}", state.get_status().as_str(), address);
        }
        SessionEvent::HostStateChanged(_) => {}
        SessionEvent::Warning(text) => println!("{}", text),
        SessionEvent::Error(text) => eprintln!("Error: {}", text),
    }
}
