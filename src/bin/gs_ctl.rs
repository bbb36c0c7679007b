use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use gsrelay::tasks::{parse_latest, Response, ERROR_PREFIX, NOT_IMPLEMENTED_PREFIX, OK_PREFIX};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
// Longer than the relay's own response wait, which already covers a 3 s handshake.
const DEFAULT_TIMEOUT_SECS: &str = "8";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("gs-ctl")
        .version("0.1.0")
        .author("Ground Station Software Team")
        .about("📡 Ground station control - send operator tasks to a running gs-relay")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Relay host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Relay task port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("SECONDS")
                .help("How long to wait for the task response")
                .takes_value(true)
                .default_value(DEFAULT_TIMEOUT_SECS)
                .global(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Timeout must be a whole number of seconds".into()),
                }),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print the raw JSON response")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("change-freq")
                .about("📻 Move ground and rocket to a new frequency (handshake)")
                .arg(frequency_arg()),
        )
        .subcommand(
            SubCommand::with_name("force-ground-freq")
                .about("⚠️  Retune the ground radio only, without telling the rocket")
                .arg(frequency_arg()),
        )
        .subcommand(SubCommand::with_name("send-flight-ready").about("🚀 Signal flight ready"))
        .subcommand(
            SubCommand::with_name("set-gs-id")
                .about("🏷️  Set the ground station id")
                .arg(id_arg("New ground station ID")),
        )
        .subcommand(
            SubCommand::with_name("set-rocket-id")
                .about("🏷️  Set the rocket id")
                .arg(id_arg("New rocket ID")),
        )
        .subcommand(SubCommand::with_name("telemetry").about("📊 Show the latest stored value of every series"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let timeout = Duration::from_secs(matches.value_of("timeout").unwrap_or(DEFAULT_TIMEOUT_SECS).parse()?);
    let raw_json = matches.is_present("json");

    let (task, params) = match matches.subcommand() {
        ("change-freq", Some(sub)) => ("change_frequency", json!({ "frequency": parse_f64(sub, "frequency")? })),
        ("force-ground-freq", Some(sub)) => (
            "force_ground_frequency",
            json!({ "frequency": parse_f64(sub, "frequency")? }),
        ),
        ("send-flight-ready", Some(_)) => ("send_flight_ready", json!({})),
        ("set-gs-id", Some(sub)) => ("set_ground_station_id", json!({ "id": parse_i64(sub, "id")? })),
        ("set-rocket-id", Some(sub)) => ("set_rocket_id", json!({ "id": parse_i64(sub, "id")? })),
        ("telemetry", Some(_)) => ("latest_telemetry", json!({})),
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            return Ok(());
        }
    };

    let task_id = new_task_id();
    let line = json!({ "task_id": task_id, "task": task, "params": params }).to_string();
    println!("{} {} {}", "Sending".dimmed(), task.bright_white(), format!("({task_id})").as_str().dimmed());

    let response = send_task(host, port, &line, timeout).await?;
    if raw_json {
        println!("{}", serde_json::to_string(&response)?);
    } else {
        print_response(&response);
    }

    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn frequency_arg() -> Arg<'static, 'static> {
    Arg::with_name("frequency")
        .help("Frequency in MHz (900-930)")
        .required(true)
        .validator(|v| match v.parse::<f64>() {
            Ok(_) => Ok(()),
            Err(_) => Err("Frequency must be a number".into()),
        })
}

fn id_arg(help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name("id").help(help).required(true).validator(|v| match v.parse::<i64>() {
        Ok(_) => Ok(()),
        Err(_) => Err("ID must be an integer".into()),
    })
}

fn parse_f64(matches: &ArgMatches, name: &str) -> Result<f64, Box<dyn std::error::Error>> {
    Ok(matches.value_of(name).ok_or("missing argument")?.parse()?)
}

fn parse_i64(matches: &ArgMatches, name: &str) -> Result<i64, Box<dyn std::error::Error>> {
    Ok(matches.value_of(name).ok_or("missing argument")?.parse()?)
}

/// Epoch time with sub-second precision, unique enough for one operator.
fn new_task_id() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

async fn send_task(host: &str, port: u16, line: &str, timeout: Duration) -> Result<Response, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to ground station relay at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Relay is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin gs-relay".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            return Err(e.into());
        }
    };

    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut reply = String::new();
        if BufReader::new(reader).read_line(&mut reply).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Relay closed connection",
            ));
        }
        Ok(reply)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(reply) => Ok(serde_json::from_str(reply?.trim())?),
        Err(_) => {
            eprintln!("{} No response received after {} seconds", "⏰".yellow(), timeout.as_secs());
            Err("Task timeout".into())
        }
    }
}

fn print_response(response: &Response) {
    let result = response.result.as_str();
    if let Some(latest) = parse_latest(result) {
        println!("{}", "📊 Latest telemetry".bright_blue().bold());
        for series in latest {
            match series.sample {
                Some(sample) => println!(
                    "  {:<18} {:>14.6}  {}",
                    series.key.bright_white(),
                    sample.value,
                    format!("@ {} ms", sample.timestamp).as_str().dimmed()
                ),
                None => println!("  {:<18} {:>14}", series.key.bright_white(), "no data".yellow()),
            }
        }
    } else if result.starts_with(OK_PREFIX) {
        println!("{} {}", "✅".green(), result.bright_green());
    } else if result.starts_with(NOT_IMPLEMENTED_PREFIX) {
        println!("{} {}", "🚧".yellow(), result.yellow());
    } else if result.starts_with(ERROR_PREFIX) {
        println!("{} {}", "❌".red(), result.bright_red());
    } else {
        println!("{} {}", "📨".bright_blue(), result);
    }
}
