use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing_subscriber::EnvFilter;

use runout_console::config::Config;
use runout_console::display;
use runout_console::monitor::MonitorHandle;
use runout_console::net::{DeviceApi, HttpDevice};
use runout_console::settings::{Field, FieldValue, SettingsSync};
use runout_console::simulate::SimulatedDevice;
use runout_console::status::Severity;

#[derive(Debug, Parser)]
#[command(name = "runout-console", version, about = "Configure and monitor a filament-runout sensor")]
struct Cli {
    /// Base URL of the sensor, e.g. http://192.168.1.60
    #[arg(long, global = true)]
    device: Option<String>,

    /// Talk to an in-memory simulated sensor instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show or change device settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Follow live sensor status until Ctrl-C
    Monitor {
        /// Clear the device's tick statistics before following
        #[arg(long)]
        reset_stats: bool,
    },
    /// Clear the device's tick statistics
    ResetStats,
    /// Show firmware identity
    Version,
    /// Dump the device log buffer
    Logs,
    /// Console configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    Set(SetArgs),
}

#[derive(Debug, clap::Args)]
struct SetArgs {
    #[arg(long)]
    ssid: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    elegoo_ip: Option<String>,
    /// Movement sensor timeout, ms
    #[arg(long)]
    timeout: Option<String>,
    #[arg(long)]
    first_layer_timeout: Option<String>,
    #[arg(long)]
    start_print_timeout: Option<String>,
    #[arg(long, action = clap::ArgAction::Set)]
    pause_on_runout: Option<bool>,
    #[arg(long, action = clap::ArgAction::Set)]
    enabled: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    Save,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = &cli.device {
        config.device_url = url.trim_end_matches('/').to_string();
    }
    log::info!("Console starting with config: {:?}", config);

    if cli.simulate {
        let device = Arc::new(SimulatedDevice::new());
        if matches!(cli.command, Command::Monitor { .. }) {
            tokio::spawn(demo_print(device.clone()));
        }
        run(device, &config, cli.command).await
    } else {
        let device = Arc::new(HttpDevice::from_config(&config)?);
        run(device, &config, cli.command).await
    }
}

async fn run<D: DeviceApi>(device: Arc<D>, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Settings { action } => settings(device, config, action).await,
        Command::Monitor { reset_stats } => monitor(device, config, reset_stats).await,
        Command::ResetStats => {
            device.reset_stats().await?;
            println!("Tick statistics cleared.");
            Ok(())
        }
        Command::Version => {
            let identity = device.version().await?;
            println!("{}", display::identity(&identity));
            Ok(())
        }
        Command::Logs => {
            let logs = device.logs().await?;
            println!("{}", serde_json::to_string_pretty(&logs)?);
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Show => println!("{}", serde_json::to_string_pretty(config)?),
                ConfigAction::Save => {
                    let path = config.save_to_file()?;
                    println!("Saved configuration to {}", path.display());
                }
            }
            Ok(())
        }
    }
}

async fn settings<D: DeviceApi>(device: Arc<D>, config: &Config, action: SettingsAction) -> Result<()> {
    let sync = SettingsSync::from_config(device, config);
    let mut form = sync.load().await?;

    let args = match action {
        SettingsAction::Show => {
            print!("{}", display::settings_form(&form));
            return Ok(());
        }
        SettingsAction::Set(args) => args,
    };

    if let Some(ssid) = args.ssid {
        form.ssid = ssid;
    }
    if let Some(password) = args.password {
        form.password = password;
    }
    if let Some(ip) = args.elegoo_ip {
        form.elegoo_ip = ip;
    }
    for (field, input) in Field::ALL.into_iter().zip([
        args.timeout,
        args.first_layer_timeout,
        args.start_print_timeout,
    ]) {
        if let Some(input) = input {
            form.set(field, FieldValue::from_input(&input));
        }
    }
    if let Some(pause) = args.pause_on_runout {
        form.pause_on_runout = pause;
    }
    if let Some(enabled) = args.enabled {
        form.enabled = enabled;
    }

    match sync.save(&mut form).await {
        Ok(_) => {
            println!("Settings saved successfully!");
            print!("{}", display::settings_form(&form));
            Ok(())
        }
        Err(e) => {
            print!("{}", display::settings_form(&form));
            bail!("{}", e)
        }
    }
}

async fn monitor<D: DeviceApi>(device: Arc<D>, config: &Config, reset_stats: bool) -> Result<()> {
    let handle = MonitorHandle::from_config(device, config);
    if reset_stats {
        handle.reset_stats().await?;
    }

    let mut view = handle.subscribe();
    let mut last_update = None;
    let mut last_severity = Severity::Success;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = view.borrow_and_update().clone();
                if state.updated_at() != last_update {
                    last_update = state.updated_at();
                    println!("{}", display::status_line(&state));
                }
                let severity = state.severity();
                if severity == Severity::Error && last_severity != Severity::Error {
                    println!("!! filament stalled {}", display::stall_readout(&state));
                }
                last_severity = severity;
            }
            _ = &mut ctrl_c => {
                println!();
                print!("{}", display::diagnostics(&handle.current().snapshot().elegoo));
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

// Runs a print on the simulated sensor with a stall every half minute.
async fn demo_print(device: Arc<SimulatedDevice>) {
    device.start_print(120);
    let mut interval = time::interval(Duration::from_secs(30));
    interval.tick().await;
    loop {
        interval.tick().await;
        log::info!("Simulating a filament stall.");
        device.set_stopped(true);
        time::sleep(Duration::from_secs(6)).await;
        device.set_stopped(false);
    }
}
