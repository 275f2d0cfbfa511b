use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use futures::StreamExt;
use maritime_sim::protocol::{
    encode_line, AivdmMessage, ControlCommand, Outbound, ServerEvent, MAX_LINE_LENGTH,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8765";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;
type ServerLines = FramedRead<OwnedReadHalf, LinesCodec>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("voyage-ctl")
        .version("0.1.0")
        .author("Maritime Systems Engineering Team")
        .about("🧭 Control and watch a running maritime voyage simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("add-vessel")
                .about("🚢 Start a voyage for a vessel between two random ports")
                .arg(
                    Arg::with_name("mmsi")
                        .help("9-digit vessel identifier")
                        .required(true),
                )
                .arg(
                    Arg::with_name("speed")
                        .short("s")
                        .long("speed")
                        .value_name("KNOTS")
                        .help("Vessel speed in knots")
                        .takes_value(true)
                        .default_value("15")
                        .validator(|v| match v.parse::<f64>() {
                            Ok(speed) if speed > 0.0 => Ok(()),
                            _ => Err("Speed must be a positive number".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("set-speed")
                .about("⏩ Change the simulation speed factor")
                .arg(
                    Arg::with_name("factor")
                        .help("Speed factor; 0 or less runs as fast as possible")
                        .required(true)
                        .allow_hyphen_values(true)
                        .validator(|v| match v.parse::<f64>() {
                            Ok(f) if !f.is_nan() => Ok(()),
                            _ => Err("Speed factor must be a number".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("📡 Watch the live position broadcast")
                .arg(
                    Arg::with_name("mmsi")
                        .long("mmsi")
                        .value_name("MMSI")
                        .help("Only show this vessel")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("N")
                        .help("Stop after N position reports")
                        .takes_value(true),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("add-vessel", Some(sub)) => handle_add_vessel(sub, host, port, format).await,
        ("set-speed", Some(sub)) => handle_set_speed(sub, host, port, format).await,
        ("watch", Some(sub)) => handle_watch(sub, host, port, format).await,
        _ => Ok(()),
    }
}

async fn handle_add_vessel(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult<()> {
    let mmsi = matches.value_of("mmsi").unwrap_or_default().to_string();
    let speed = matches.value_of("speed").unwrap_or("15").parse::<f64>()?;

    let command = ControlCommand::AddVessel {
        mmsi: mmsi.clone(),
        speed,
    };
    let event = send_command(host, port, &command, |event| {
        matches!(event, ServerEvent::VesselAdded { mmsi: added, .. } if *added == mmsi)
    })
    .await?;

    print_event(&event, format);
    Ok(())
}

async fn handle_set_speed(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult<()> {
    let speed_factor = matches.value_of("factor").unwrap_or_default().parse::<f64>()?;

    let command = ControlCommand::SetSpeed { speed_factor };
    let event = send_command(host, port, &command, |event| {
        matches!(event, ServerEvent::SpeedUpdated { .. })
    })
    .await?;

    print_event(&event, format);
    Ok(())
}

async fn handle_watch(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult<()> {
    let filter = matches.value_of("mmsi");
    let limit = matches.value_of("count").map(str::parse::<usize>).transpose()?;

    let (mut lines, _writer) = connect(host, port).await?;
    if format != "json" {
        println!("{}", "📡 Watching vessel positions (Press Ctrl+C to stop)...".bright_blue().bold());
        println!(
            "{}",
            format!(
                "{:<10} {:<27} {:>10} {:>11} {:>6} {:>6} {:>5}",
                "MMSI", "Timestamp", "Latitude", "Longitude", "Speed", "Course", "Msg"
            )
            .bright_white()
        );
    }

    let mut shown = 0;
    while let Some(line) = lines.next().await {
        let line = line?;
        if format == "json" {
            println!("{}", line);
            continue;
        }

        match serde_json::from_str::<Outbound>(&line) {
            Ok(Outbound::Position(position)) => {
                if filter.map_or(false, |m| m != position.mmsi) {
                    continue;
                }
                print_position(&position);
                shown += 1;
                if limit.map_or(false, |n| shown >= n) {
                    break;
                }
            }
            Ok(Outbound::Event(event)) => print_event(&event, format),
            Err(_) => println!("{} {}", "?".yellow(), line.dimmed()),
        }
    }

    Ok(())
}

async fn connect(host: &str, port: u16) -> CliResult<(ServerLines, OwnedWriteHalf)> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin maritime-sim".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let (reader, writer) = stream.into_split();
    let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    Ok((lines, writer))
}

/// Sends one command and waits for either the matching broadcast event or an
/// error reply. Position lines arriving meanwhile are skipped.
async fn send_command<F>(host: &str, port: u16, command: &ControlCommand, is_reply: F) -> CliResult<ServerEvent>
where
    F: Fn(&ServerEvent) -> bool,
{
    let (mut lines, mut writer) = connect(host, port).await?;
    let line = encode_line(command)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let wait = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Ok(Outbound::Event(event)) = serde_json::from_str::<Outbound>(&line) {
                if matches!(event, ServerEvent::Error { .. }) || is_reply(&event) {
                    return Ok(event);
                }
            }
        }
        Err::<ServerEvent, Box<dyn std::error::Error>>("Server closed connection".into())
    };

    match tokio::time::timeout(REPLY_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} No reply within {} seconds", "⏰".yellow(), REPLY_TIMEOUT.as_secs());
            Err("Command timeout".into())
        }
    }
}

fn print_event(event: &ServerEvent, format: &str) {
    if format == "json" {
        if let Ok(line) = encode_line(event) {
            println!("{}", line);
        }
        return;
    }

    match event {
        ServerEvent::VesselAdded {
            mmsi,
            start_port,
            end_port,
            distance_nm,
        } => println!(
            "{} Vessel {} sailing {} → {} ({:.1} nm)",
            "✅".green(),
            mmsi.bright_cyan(),
            start_port.bright_white(),
            end_port.bright_white(),
            distance_nm
        ),
        ServerEvent::SpeedUpdated { speed_factor } => println!(
            "{} Simulation speed set to {}",
            "✅".green(),
            format!("{}x", speed_factor).bright_cyan()
        ),
        ServerEvent::Error { message } => println!("{} {}", "❌".red(), message.bright_red()),
    }
}

fn print_position(position: &AivdmMessage) {
    let d = &position.decoded;
    println!(
        "{:<10} {:<27} {:>10.5} {:>11.5} {:>6.1} {:>6.1} {:>5}",
        position.mmsi.bright_cyan(),
        position.timestamp,
        d.latitude,
        d.longitude,
        d.speed,
        d.course,
        d.message_count
    );
}
