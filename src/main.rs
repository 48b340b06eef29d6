use clap::Parser;
use log::{error, info};
use maison_link::config::{AlertMode, Config, load_dotenv};
use maison_link::session::Session;
use maison_link::state::Snapshot;
use tokio::signal;

#[derive(Parser)]
#[command(name = "maison-link")]
#[command(about = "Home sensor and fall-alert hub")]
struct Cli {
    /// Broker URL, e.g. mqtt://10.0.0.2:1883
    #[arg(long, env = "MQTT_URL")]
    broker: Option<String>,

    /// Fall-alert transport: auto, push or poll
    #[arg(long, env = "ALERT_MODE")]
    alert_mode: Option<AlertMode>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn log_changes(previous: &Snapshot, current: &Snapshot) {
    if previous.connectivity != current.connectivity {
        info!("[Session] Broker {}", current.connectivity);
    }
    if previous.reading != current.reading {
        let reading = &current.reading;
        info!(
            "[Session] {:.1} °C, {:.1} % humidity, gas {}",
            reading.temperature, reading.humidity, reading.gas
        );
    }
    if previous.gas_alert != current.gas_alert
        && let Some(alert) = &current.gas_alert
    {
        info!("[Session] Gas alert: {}", alert.message);
    }
    if previous.alert != current.alert
        && let Some(alert) = &current.alert
    {
        info!("[Session] {}", alert.message);
    }
    for (room, devices) in &current.devices {
        for (device, on) in devices {
            if previous.device_state(room, device) != Some(*on) {
                info!("[Session] {}/{} is {}", room, device, if *on { "on" } else { "off" });
            }
        }
    }
}

async fn run(cli: Cli) -> maison_link::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(url) = &cli.broker {
        config.mqtt.set_url(url)?;
    }
    if let Some(mode) = cli.alert_mode {
        config.alert.mode = mode;
    }

    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Topic area: {}", config.mqtt.topic_area);
    info!("  Alert mode: {}", config.alert.mode);

    let session = Session::start(config).await?;
    info!("Maison Link is running ({} alerts)", session.alert_mode());
    info!("  - Press Ctrl+C to exit");

    let mut state = session.watch();
    let mut previous = state.borrow_and_update().clone();

    loop {
        tokio::select! {
            shutdown = signal::ctrl_c() => {
                match shutdown {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                log_changes(&previous, &current);
                previous = current;
            }
        }
    }

    session.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();

    let cli = Cli::parse();
    info!("Starting Maison Link");

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Maison Link stopped");
}
