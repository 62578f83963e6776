//! mqttcd - MQTT subscriber daemon entry point
//!
//! Startup order: parse arguments, daemonize, install signal handlers,
//! open the log, then start the runtime and run the broker session.

use clap::{Args, Parser, Subcommand};
use mqttcd::config::{ConfigOverrides, DaemonConfig, KeepaliveMode, QosLevel};
use mqttcd::daemon::{daemonize, ForkOutcome};
use mqttcd::observability::{init_default_logging, LogSink};
use mqttcd::{lifecycle, DaemonError, ExitStatus, ShutdownLatch};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// MQTT subscriber daemon
#[derive(Parser)]
#[command(name = "mqttcd")]
#[command(about = "Subscribe to an MQTT topic and keep the session alive until stopped")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and receive until SIGINT/SIGTERM
    Run {
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,

        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[derive(Args, Default)]
struct SettingsArgs {
    /// Broker host
    #[arg(short = 'H', long, env = "MQTTCD_HOST")]
    host: Option<String>,

    /// Broker port
    #[arg(short, long, env = "MQTTCD_PORT")]
    port: Option<u16>,

    /// Client identifier (default: mqttcd-<pid>)
    #[arg(short = 'i', long)]
    client_id: Option<String>,

    /// Username for broker authentication
    #[arg(short, long, env = "MQTTCD_USERNAME")]
    username: Option<String>,

    /// Password for broker authentication
    #[arg(short = 'P', long, env = "MQTTCD_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Topic filter to subscribe to
    #[arg(short, long, env = "MQTTCD_TOPIC")]
    topic: Option<String>,

    /// Requested QoS (0, 1 or 2)
    #[arg(short, long)]
    qos: Option<QosLevel>,

    /// Keepalive interval in seconds
    #[arg(short, long, value_name = "SECS")]
    keepalive: Option<u64>,

    /// Keepalive trigger: interval or iterations
    #[arg(long, value_name = "MODE")]
    keepalive_mode: Option<KeepaliveMode>,

    /// Loop iterations between keepalives in iterations mode
    #[arg(long, value_name = "N")]
    keepalive_iterations: Option<u32>,

    /// Upper bound of one receive poll in milliseconds
    #[arg(long, value_name = "MS")]
    poll_timeout_ms: Option<u64>,

    /// Detach and run in the background
    #[arg(short, long)]
    daemonize: bool,

    /// Append log output to this file
    #[arg(short, long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Append received messages to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

impl From<SettingsArgs> for ConfigOverrides {
    fn from(args: SettingsArgs) -> Self {
        ConfigOverrides {
            host: args.host,
            port: args.port,
            client_id: args.client_id,
            username: args.username,
            password: args.password,
            topic: args.topic,
            qos: args.qos,
            keepalive_secs: args.keepalive,
            keepalive_mode: args.keepalive_mode,
            keepalive_iterations: args.keepalive_iterations,
            poll_timeout_ms: args.poll_timeout_ms,
            daemonize: args.daemonize,
            log_file: args.log_file,
            output_file: args.output,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let status = if e.use_stderr() {
                ExitStatus::ArgumentParseFailed
            } else {
                ExitStatus::Succeeded
            };
            process::exit(status.code());
        }
    };

    let status = match start(cli) {
        Ok(status) => status,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                error!(error = %e, "mqttcd failed");
            } else {
                eprintln!("mqttcd: {e}");
            }
            e.exit_status()
        }
    };
    process::exit(status.code());
}

fn start(cli: Cli) -> Result<ExitStatus, DaemonError> {
    match cli.command {
        Commands::Run { settings } => {
            let config = DaemonConfig::resolve(cli.config.as_deref(), settings.into())?;
            run(config, cli.verbose)
        }
        Commands::Config { show, settings } => {
            let config = DaemonConfig::resolve(cli.config.as_deref(), settings.into())?;
            handle_config_command(&config, show);
            Ok(ExitStatus::Succeeded)
        }
    }
}

fn run(config: DaemonConfig, verbose: u8) -> Result<ExitStatus, DaemonError> {
    if config.daemon.daemonize {
        if let ForkOutcome::Parent { child } = daemonize()? {
            println!("{child}");
            return Ok(ExitStatus::Succeeded);
        }
    }

    let shutdown = ShutdownLatch::new();
    shutdown
        .install_signal_handlers()
        .map_err(DaemonError::SignalSetup)?;

    let sink = match &config.daemon.log_file {
        Some(path) => LogSink::File(path.clone()),
        None => LogSink::Stderr,
    };
    init_default_logging(verbose, &sink).map_err(DaemonError::LoggerOpen)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.broker.host,
        port = config.broker.port,
        topic = %config.subscription.topic,
        "starting mqttcd"
    );

    // The session is driven from one thread; no worker pool needed
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;

    let report = runtime.block_on(lifecycle::run_daemon(&config, &shutdown))?;
    let status = ExitStatus::for_termination(&report.reason);
    info!(exit_code = status.code(), "mqttcd shutdown complete");
    Ok(status)
}

fn handle_config_command(config: &DaemonConfig, show: bool) {
    if show {
        match toml::to_string_pretty(config) {
            Ok(rendered) => {
                println!("# Resolved mqttcd configuration");
                println!("{rendered}");
            }
            Err(e) => eprintln!("mqttcd: failed to render configuration: {e}"),
        }
    }
    println!("Configuration is valid");
}
