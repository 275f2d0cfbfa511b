use clap::{App, Arg};
use maritime_sim::scheduler::BroadcastScheduler;
use maritime_sim::server::{self, COMMAND_CHANNEL_SIZE};
use maritime_sim::{BroadcastHub, PortCatalog, Settings};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = App::new("maritime-sim")
        .version("0.1.0")
        .author("Maritime Systems Engineering Team")
        .about("🚢 Maritime voyage simulator - broadcasts AIS-style vessel positions over TCP")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("YAML settings file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Address to accept subscribers on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("speed-factor")
                .short("s")
                .long("speed-factor")
                .value_name("FACTOR")
                .help("Tick rate multiplier; 0 or less runs without sleeping")
                .takes_value(true)
                .allow_hyphen_values(true),
        )
        .get_matches();

    let mut settings = Settings::load(matches.value_of("config"))?;
    if let Some(bind) = matches.value_of("bind") {
        settings.simulator.bind_address = bind.to_string();
    }
    if let Some(factor) = matches.value_of("speed-factor") {
        settings.simulator.speed_factor = factor.parse()?;
    }
    settings.validate()?;

    println!("🚢 Maritime Voyage Simulator");
    println!("============================");

    let catalog = match &settings.simulator.ports_file {
        Some(path) => PortCatalog::from_csv_path(path)?,
        None => PortCatalog::default(),
    };
    info!("Loaded {} ports", catalog.len());

    let hub = BroadcastHub::new(settings.simulator.broadcast_buffer_size);
    let mut scheduler =
        BroadcastScheduler::new(settings.simulator.scheduler_config(), catalog, hub.clone());

    for vessel in &settings.simulator.initial_vessels {
        if let Err(e) = scheduler.add_vessel(&vessel.mmsi, vessel.speed) {
            warn!("Skipping initial vessel {}: {}", vessel.mmsi, e);
        }
    }

    let listener = TcpListener::bind(&settings.simulator.bind_address).await?;
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

    let tcp_server = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, hub, command_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    tokio::select! {
        _ = scheduler.run(command_rx) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
    }

    tcp_server.abort();
    println!("⚓ Maritime Voyage Simulator stopped");

    Ok(())
}
