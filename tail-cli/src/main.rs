//! tailctl - console for tail and ear gear
//!
//! Runs the connection manager against simulated gear described in the
//! settings file and drives it from a line-oriented console on stdin.
//! Manager events are printed as they happen.

mod catalog;
mod console;
mod settings;

use anyhow::Context;
use tail_control::{spawn_manager, ConnectionManager, ManagerHandle};
use tail_sim::{
    SimulatedAdapter, SimulatedDeviceConfig, SimulatedDiscovery, SimulatedTransport,
    TransportHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::console::{describe_event, ConsoleCommand, HELP};
use crate::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = Settings::load();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tailctl");

    // Simulated collaborators all report on one link channel
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let in_range = settings
        .devices
        .iter()
        .map(SimulatedDeviceConfig::info)
        .collect();
    let (transport, transport_handle) =
        SimulatedTransport::with_devices(link_tx.clone(), &settings.devices);
    let (discovery, _discovery_handle) = SimulatedDiscovery::new(in_range, link_tx.clone());
    let (adapter, _adapter_handle) = SimulatedAdapter::new(link_tx);

    let manager = ConnectionManager::with_config(
        settings.manager.clone(),
        Box::new(transport),
        Box::new(discovery),
        Box::new(adapter),
    );
    let (handle, mut events, task) = spawn_manager(manager, link_rx);

    // Print events from the start so startup requests are never left
    // waiting behind an unread channel
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = describe_event(&event) {
                println!("{}", line);
            }
        }
    });

    let records = catalog::load_catalogs(settings.catalog_files.as_slice())?;
    let accepted = handle.load_catalog(records).await?;
    info!("Catalog ready with {} command(s)", accepted);
    handle
        .load_device_names(settings.device_names.clone())
        .await?;

    if settings.fake_tail_mode {
        handle.set_fake_tail_mode(true).await?;
    }
    if settings.auto_discovery {
        handle.start_discovery().await?;
    }

    println!("tailctl ready, type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match ConsoleCommand::parse(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(cmd)) => {
                if let Err(e) = execute(cmd, &handle, &transport_handle, &mut settings).await {
                    println!("error: {:#}", e);
                }
            }
            Ok(None) => {}
            Err(e) => println!("{}", e),
        }
    }

    handle.shutdown().await?;
    task.await.context("Manager task panicked")?;
    printer.await.context("Event printer panicked")?;

    info!("tailctl stopped");
    Ok(())
}

/// Run one console command against the manager
async fn execute(
    cmd: ConsoleCommand,
    handle: &ManagerHandle,
    gear: &TransportHandle,
    settings: &mut Settings,
) -> anyhow::Result<()> {
    match cmd {
        ConsoleCommand::Discover => handle.start_discovery().await?,
        ConsoleCommand::StopDiscovery => handle.stop_discovery().await?,
        ConsoleCommand::Connect(id) => handle.connect_to_device(id).await?,
        ConsoleCommand::Disconnect(id) => handle.disconnect_device(id).await?,
        ConsoleCommand::Queue { command, devices } => {
            match handle.enqueue(command.as_str(), devices).await? {
                Some(entry) => println!("queued {} as #{}", command, entry),
                None => println!("unknown command: {}", command),
            }
        }
        ConsoleCommand::Cancel(entry) => {
            if !handle.cancel_queued(entry).await? {
                println!("no queue entry #{}", entry);
            }
        }
        ConsoleCommand::Run(command) => handle.run_command(command).await?,
        ConsoleCommand::Send(text) => handle.send_message(text, Vec::new()).await?,
        ConsoleCommand::Finish { device, command } => gear.finish(&device, &command),
        ConsoleCommand::Fake(enabled) => handle.set_fake_tail_mode(enabled).await?,
        ConsoleCommand::Name { device, name } => handle.set_device_name(device, name).await?,
        ConsoleCommand::ClearNames => handle.clear_device_names().await?,
        ConsoleCommand::Commands => {
            for cmd in handle.commands().await? {
                let state = if cmd.is_running {
                    "running"
                } else if cmd.is_available || cmd.is_home() {
                    "ready"
                } else {
                    "blocked"
                };
                println!(
                    "  {:<8} {:<20} group={:<6} {}ms+{}ms  {}",
                    cmd.command,
                    cmd.name,
                    cmd.group,
                    cmd.duration_ms,
                    cmd.minimum_cooldown_ms,
                    state
                );
            }
        }
        ConsoleCommand::Devices => {
            let devices = handle.devices().await?;
            if devices.is_empty() {
                println!("  no devices known, try 'discover'");
            }
            for device in devices {
                println!(
                    "  {:<12} {:<16} {:<18} {}{}",
                    device.id.as_str(),
                    device.name,
                    device.address,
                    device.state,
                    if device.is_fake { " (fake)" } else { "" }
                );
            }
        }
        ConsoleCommand::Status => {
            let snapshot = handle.snapshot().await?;
            println!("  adapter:    {}", snapshot.adapter_state.name());
            println!("  connected:  {}", snapshot.is_connected);
            println!("  discovery:  {}", snapshot.discovery_running);
            println!("  fake mode:  {}", snapshot.fake_tail_mode);
            println!("  devices:    {}", snapshot.device_count);
            println!("  queue:      {}", snapshot.queue_len);
            println!("  catalog:    {}", snapshot.catalog_len);
            if let Some(cmd) = snapshot.current_command {
                println!("  current:    {}", cmd.command);
            }
        }
        ConsoleCommand::Save => {
            settings.device_names = handle.device_names().await?;
            settings.save()?;
            if let Some(path) = Settings::settings_path() {
                println!("saved {}", path.display());
            }
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
