//! tetherd — the Tether hub daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::driver::ProcessDriver;
use tether::hub::{Hub, HubConfig, HubDeps, HubInput, NoopThumbnailer};
use tether::relay::WsRelay;
use tether::settings::Settings;
use tether::store::FsStore;

#[derive(Parser)]
#[command(
    name = "tetherd",
    about = "Relay-side routing hub for the Tether multi-device agent bridge",
    version
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hub (the default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings = Settings::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Config {
            command: ConfigCommand::Show,
        } => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={default},tetherd={default}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(settings: Settings) -> Result<()> {
    let device_id = settings.device_id()?;
    let data_dir = settings.storage.resolve_data_dir();
    info!(
        "tetherd starting as device {device_id}, data in {}",
        data_dir.display()
    );

    let store = Arc::new(FsStore::new(&data_dir));
    let (input_tx, input_rx) = mpsc::channel::<HubInput>(256);

    // Agent events feed the hub's input channel.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let driver = Arc::new(ProcessDriver::new(
        settings.agent.command.clone(),
        settings.agent.args.clone(),
        event_tx,
    ));
    {
        let input_tx = input_tx.clone();
        tokio::spawn(async move {
            while let Some((id, event)) = event_rx.recv().await {
                if input_tx.send(HubInput::Agent(id, event)).await.is_err() {
                    break;
                }
            }
        });
    }

    // So do relay envelopes.
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    let url = format!("{}?device={}", settings.relay.url, device_id.raw());
    let relay = Arc::new(WsRelay::spawn(url, inbound_tx));
    {
        let input_tx = input_tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbound_rx.recv().await {
                if input_tx.send(HubInput::Inbound(envelope)).await.is_err() {
                    break;
                }
            }
        });
    }

    // Ctrl-C starts the ordered shutdown.
    {
        let input_tx = input_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = input_tx.send(HubInput::Shutdown).await;
            }
        });
    }

    let mut config = HubConfig::new(device_id);
    config.status_debounce = Duration::from_millis(settings.debounce.status_ms);
    config.history_debounce = Duration::from_millis(settings.debounce.history_ms);
    let deps = HubDeps {
        transport: relay,
        driver,
        workspaces: store.clone(),
        histories: store,
        thumbnailer: Arc::new(NoopThumbnailer),
    };
    let (hub, flush_rx) = Hub::new(config, deps);
    hub.run(input_rx, flush_rx).await
}
