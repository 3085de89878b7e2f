use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blockclock_rotate::config::validate_text;
use blockclock_rotate::panel::{router, Panel};
use blockclock_rotate::{
    broadcast_text, check_devices, classify, DeviceApi, DisplayReading, Error, EventSink,
    HttpDeviceClient, RotationConfig, Scheduler,
};

/// Rotate custom text on BlockClock displays in step with their refresh cycle.
#[derive(Parser, Debug)]
#[command(name = "blockclock", version, about)]
struct Cli {
    /// Configuration file (created with defaults if missing)
    #[arg(
        short,
        long,
        global = true,
        default_value = "config/blockclock.yaml",
        env = "BLOCKCLOCK_CONFIG"
    )]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the text rotation in the foreground until Ctrl-C
    Run,

    /// Serve the web control panel
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:5010", env = "BLOCKCLOCK_BIND")]
        bind: String,
    },

    /// Send one text to every configured device
    Show {
        /// Text to display (at most 7 characters)
        text: String,
    },

    /// Print what every configured device is showing
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Command::Run => rotate(RotationConfig::load_or_create(&cli.config)?).await,
        Command::Serve { bind } => serve(cli.config, &bind).await,
        Command::Show { text } => show(RotationConfig::load_or_create(&cli.config)?, &text).await,
        Command::Status => status(RotationConfig::load_or_create(&cli.config)?).await,
    }
}

async fn rotate(config: RotationConfig) -> Result<(), Error> {
    tracing::info!("Starting BlockClock Custom Text Rotation");
    config.log_summary();

    let mut scheduler = Scheduler::new(config, HttpDeviceClient::new())?;
    tokio::select! {
        result = scheduler.run(|| true) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, stopping text rotation");
        }
    }
    Ok(())
}

async fn serve(config_path: PathBuf, bind: &str) -> Result<(), Error> {
    // Create the file up front so a bad path fails here, not on the first request.
    RotationConfig::load_or_create(&config_path)?;

    let panel = Arc::new(Panel::new(HttpDeviceClient::new(), config_path));
    let app = router(panel.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Control panel listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if panel.supervisor().is_active() {
        panel.supervisor().stop()?;
    }
    Ok(())
}

async fn show(config: RotationConfig, text: &str) -> Result<(), Error> {
    validate_text(text)?;

    let client = HttpDeviceClient::new();
    let reachable = check_devices(&client, &config.devices, &EventSink::default(), 0).await;
    if reachable.is_empty() {
        return Err(Error::NoReachableDevices);
    }

    let accepted = broadcast_text(&client, &config.devices, text).await;
    println!(
        "\"{}\" accepted by {}/{} device(s)",
        text,
        accepted,
        config.devices.len()
    );
    Ok(())
}

async fn status(config: RotationConfig) -> Result<(), Error> {
    let client = HttpDeviceClient::new();
    for device in &config.devices {
        match client.get_display(device).await {
            DisplayReading::Text(text) => {
                let display = classify(&text);
                println!(
                    "{} ({}): {} [{}]",
                    device.name,
                    device.address,
                    display.label,
                    display.category.display_name()
                );
            }
            DisplayReading::Error => {
                println!("{} ({}): unreachable", device.name, device.address);
            }
        }
    }
    Ok(())
}
