use anyhow::{bail, Context};
use fabkit::{
    init_logging_with, list_ports, Config, ConnectionDriver, GcodeDevice, Job, LocalGcodeFileJob,
    LogFormat, Protocol, ProtocolListener, ProtocolState, SdFileJob, SerialTransport, Tags,
    TcpTransport, TracingProtocolListener, Transport, VirtualTransport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const IDLE_WAIT: Duration = Duration::from_millis(10);

const USAGE: &str = "\
Send a G-code file to a fabrication machine

Usage: fabkit [OPTIONS] [FILE]

Options:
  -c, --config <PATH>  Configuration file (.toml or .json)
      --list-ports     List serial ports and exit
      --dry-run        Talk to an in-memory device that acknowledges every line
      --sd <NAME>      Print a file stored on the device's SD card
      --log-json       Emit logs as JSON
  -h, --help           Print help
  -V, --version        Print version";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    list_ports: bool,
    dry_run: bool,
    sd: Option<String>,
    log_json: bool,
    help: bool,
    version: bool,
    file: Option<PathBuf>,
}

impl Args {
    fn parse_from<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let value = args.next().context("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(value));
                }
                "--sd" => parsed.sd = Some(args.next().context("--sd needs a file name")?),
                "--list-ports" => parsed.list_ports = true,
                "--dry-run" => parsed.dry_run = true,
                "--log-json" => parsed.log_json = true,
                "-h" | "--help" => parsed.help = true,
                "-V" | "--version" => parsed.version = true,
                flag if flag.starts_with('-') => bail!("unknown option {}\n\n{}", flag, USAGE),
                _ if parsed.file.is_some() => bail!("only one file can be printed at a time"),
                other => parsed.file = Some(PathBuf::from(other)),
            }
        }

        if parsed.sd.is_some() && parsed.file.is_some() {
            bail!("--sd cannot be combined with a local file");
        }
        Ok(parsed)
    }
}

fn load_config(path: &Path) -> anyhow::Result<(Config, bool)> {
    if !path.exists() {
        tracing::info!("No configuration at {}, using defaults", path.display());
        return Ok((Config::default(), false));
    }
    let config = Config::load_from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    Ok((config, true))
}

fn make_transport(driver: ConnectionDriver, dry_run: bool) -> Arc<dyn Transport> {
    if dry_run {
        return Arc::new(VirtualTransport::new("dry-run").with_auto_ok());
    }
    match driver {
        ConnectionDriver::Serial => Arc::new(SerialTransport::new()),
        ConnectionDriver::Tcp => Arc::new(TcpTransport::new()),
        ConnectionDriver::Virtual => Arc::new(VirtualTransport::new("virtual").with_auto_ok()),
    }
}

fn interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse_from(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }
    if args.version {
        println!("fabkit {} ({})", fabkit::VERSION, fabkit::BUILD_DATE);
        return Ok(());
    }

    init_logging_with(if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    })?;
    tracing::info!("FabKit {} (built {})", fabkit::VERSION, fabkit::BUILD_DATE);

    if args.list_ports {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(fabkit::default_config_path);
    let (mut config, from_file) = load_config(&config_path)?;

    let mut params = config.connection.to_params();
    if args.dry_run {
        params.driver = ConnectionDriver::Virtual;
    }
    let transport = make_transport(params.driver, args.dry_run);

    let device = Arc::new(GcodeDevice::with_name(config.protocol.flavor.clone()));
    let protocol = Protocol::new(device.clone());
    let logger: Arc<dyn ProtocolListener> = Arc::new(TracingProtocolListener::new());
    protocol.register_listener(&logger);

    protocol
        .connect(transport, &params)
        .with_context(|| format!("connecting to {}", params.port))?;

    let tags = Tags::new();
    let sd_job = match (&args.sd, &args.file) {
        (Some(name), _) => {
            let status = Duration::from_millis(config.jobs.sd_status_interval_ms);
            let job = SdFileJob::new(name.clone(), status);
            protocol.process(job.clone(), 0, &tags)?;
            Some(job)
        }
        (None, Some(path)) => {
            let job = Arc::new(LocalGcodeFileJob::new(path)?);
            tracing::info!("Printing {} ({:?} bytes)", path.display(), job.size());
            protocol.process(job, 0, &tags)?;
            if from_file {
                config.add_recent_file(path.clone());
                if let Err(e) = config.save_to_file(&config_path) {
                    tracing::warn!("Could not update recent files: {}", e);
                }
            }
            None
        }
        (None, None) => None,
    };

    let temperature_poll = interval(config.protocol.temperature_poll_interval_ms);
    let sd_poll = interval(config.jobs.sd_status_interval_ms);
    let mut last_temperature = Instant::now();
    let mut last_status = Instant::now();
    let started = Instant::now();
    let has_work = args.sd.is_some() || args.file.is_some();

    loop {
        let state = protocol.state();
        if state.is_disconnected() {
            tracing::warn!("Connection closed ({})", state);
            break;
        }
        if has_work && protocol.active_job().is_none() && state == ProtocolState::Connected {
            break;
        }
        if !has_work
            && (!device.temperatures().is_empty()
                || started.elapsed() > Duration::from_millis(params.timeout_ms))
        {
            break;
        }

        if protocol.receive()? == 0 {
            std::thread::sleep(IDLE_WAIT);
        }

        if let Some(period) = temperature_poll {
            if last_temperature.elapsed() >= period && protocol.can_send() {
                device.request_temperature(&protocol)?;
                last_temperature = Instant::now();
            }
        }
        if let (Some(job), Some(period)) = (&sd_job, sd_poll) {
            if last_status.elapsed() >= period {
                job.poll_status()?;
                last_status = Instant::now();
            }
        }
    }

    for (heater, reading) in device.temperatures() {
        match reading.target {
            Some(target) => println!("{heater}: {:.1} / {:.1} °C", reading.actual, target),
            None => println!("{heater}: {:.1} °C", reading.actual),
        }
    }

    if !protocol.state().is_disconnecting_or_disconnected() {
        protocol.disconnect(false)?;
    }
    Ok(())
}
