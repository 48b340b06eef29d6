//! One-shot operations against the home hub.
//!
//! Usage:
//!   cargo run --bin hub-ctl -- toggle <room> <device> [--current-state]
//!   cargo run --bin hub-ctl -- detect <image.b64>
//!   cargo run --bin hub-ctl -- watch

use clap::{Parser, Subcommand};
use log::info;
use maison_link::config::{AlertMode, Config, load_dotenv};
use maison_link::input::detection::DetectionClient;
use maison_link::session::Session;
use maison_link::{HubError, Result};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hub-ctl")]
#[command(about = "One-shot commands for the Maison Link hub")]
struct Cli {
    /// Broker URL, e.g. mqtt://10.0.0.2:1883
    #[arg(long, env = "MQTT_URL")]
    broker: Option<String>,

    /// How long to wait for the broker before giving up, in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Toggle a device away from its current state
    Toggle {
        room: String,
        device: String,

        /// The device is currently on (sends "0")
        #[arg(long)]
        current_state: bool,
    },
    /// Run fall detection on a base64-encoded image file
    Detect { image_file: String },
    /// Print every state change as JSON until Ctrl+C
    Watch {
        #[arg(long, default_value_t = AlertMode::Auto)]
        alert_mode: AlertMode,
    },
}

async fn wait_online(session: &Session, timeout: Duration) -> Result<()> {
    let mut state = session.watch();
    tokio::time::timeout(timeout, async {
        while !state.borrow_and_update().is_online() {
            state.changed().await.map_err(|_| HubError::SessionClosed)?;
        }
        Ok::<_, HubError>(())
    })
    .await
    .map_err(|_| HubError::NotConnected)?
}

async fn toggle(
    mut config: Config,
    timeout: Duration,
    room: &str,
    device: &str,
    current_state: bool,
) -> Result<()> {
    // Device commands never depend on the alert feed.
    config.alert.mode = AlertMode::Poll;
    let session = Session::start(config).await?;

    let result = async {
        wait_online(&session, timeout).await?;
        session.toggle_device(room, device, current_state).await
    }
    .await;
    session.close().await;

    let command = result?;
    println!("{} <- {}", command.topic, command.payload);
    Ok(())
}

async fn detect(config: Config, image_file: &str) -> Result<()> {
    let image = std::fs::read_to_string(image_file)?;
    let client = DetectionClient::new(&config.detection)?;
    let result = client.detect(image.trim()).await;

    match result.confidence {
        Some(confidence) => println!("fall: {} (confidence {:.2})", result.fall, confidence),
        None => println!("fall: {}", result.fall),
    }
    Ok(())
}

async fn watch(mut config: Config, alert_mode: AlertMode) -> Result<()> {
    config.alert.mode = alert_mode;
    let session = Session::start(config).await?;
    info!("Watching ({} alerts), press Ctrl+C to stop", session.alert_mode());

    let mut state = session.watch();
    loop {
        println!("{}", serde_json::to_string(&*state.borrow_and_update())?);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => if changed.is_err() { break },
        }
    }

    session.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let result = async {
        let mut config = Config::from_env()?;
        if let Some(url) = &cli.broker {
            config.mqtt.set_url(url)?;
        }
        let timeout = Duration::from_secs(cli.connect_timeout);

        match &cli.command {
            Commands::Toggle {
                room,
                device,
                current_state,
            } => toggle(config, timeout, room, device, *current_state).await,
            Commands::Detect { image_file } => detect(config, image_file).await,
            Commands::Watch { alert_mode } => watch(config, *alert_mode).await,
        }
    }
    .await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
