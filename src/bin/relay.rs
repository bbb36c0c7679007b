use clap::{App, Arg};
use gsrelay::config::{ConfigError, StationConfig};
use gsrelay::queue::{ChannelTaskQueue, SharedResponses};
use gsrelay::server::{self, TaskEndpoint};
use gsrelay::shutdown::{self, ShutdownSignal};
use gsrelay::{Collaborators, CsvLog, GroundStation, MemoryStore, SimulatedRocket, SystemClock};
use tokio::net::TcpListener;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("gs-relay")
        .version("0.1.0")
        .author("Ground Station Software Team")
        .about("📡 Ground station relay - decodes rocket telemetry and executes operator tasks")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("flight")
                .long("flight")
                .value_name("NAME")
                .help("Flight name used to namespace stored series")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("frequency")
                .long("frequency")
                .value_name("MHZ")
                .help("Initial radio frequency")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Operator task endpoint address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .value_name("FILE")
                .help("CSV telemetry log path")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match matches.value_of("config") {
        Some(path) => StationConfig::from_json_file(path)?,
        None => StationConfig::default(),
    };
    if let Some(flight) = matches.value_of("flight") {
        config.flight = flight.to_string();
    }
    if let Some(frequency) = matches.value_of("frequency") {
        config.frequency_mhz = frequency
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("frequency '{frequency}' is not a number")))?;
    }
    if let Some(listen) = matches.value_of("listen") {
        config.listen_addr = listen.to_string();
    }
    if let Some(log) = matches.value_of("log") {
        config.log_path = log.into();
    }
    config.validate()?;

    println!("📡 Ground Station Relay");
    println!("=======================");
    info!(flight = %config.flight, frequency = config.frequency_mhz, "configuration loaded");

    let (task_tx, tasks) = ChannelTaskQueue::channel();
    let responses = SharedResponses::new();

    let listener = TcpListener::bind(&config.listen_addr).await?;
    let endpoint = TaskEndpoint::new(task_tx, responses.clone(), config.response_wait());
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, endpoint).await {
            error!("task endpoint error: {}", e);
        }
    });

    let mut station = GroundStation::new(
        config.clone(),
        Collaborators {
            radio: Box::new(SimulatedRocket::new(SystemClock::new(), config.frequency_mhz)),
            clock: Box::new(SystemClock::new()),
            store: Box::new(MemoryStore::new(&config.flight)),
            tasks: Box::new(tasks),
            responses: Box::new(responses),
            log: Box::new(CsvLog::create(&config.log_path)?),
        },
    )?;
    station.start()?;

    let signals = ShutdownSignal::install()?;
    shutdown::cancel_on_shutdown(signals, station.cancel_token());

    // The core blocks on radio receives, so it gets its own thread.
    let result = tokio::task::spawn_blocking(move || {
        let result = station.run();
        (result, station.state().clone())
    })
    .await;

    tcp_server.abort();

    let (result, state) = result?;
    info!(
        cycles = state.cycles,
        readings = state.readings_persisted,
        tasks = state.tasks_handled,
        "relay stopped"
    );
    result?;
    println!("📡 Ground Station Relay stopped");
    Ok(())
}
