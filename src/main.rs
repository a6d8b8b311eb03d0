mod api;
mod broker;
mod config;
mod indicators;
mod journal;
mod market;
mod orders;
mod sizing;
mod strategy;
mod supervisor;
mod types;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use broker::{BrokerConnection, BrokerRegistry, DeribitClient, DeribitTickerStream};
use config::AppConfig;
use journal::TradeJournal;
use supervisor::StrategySupervisor;

#[derive(Parser)]
#[command(name = "razor-core")]
#[command(author = "Tradebaas")]
#[command(version = "0.1.0")]
#[command(about = "Strategy execution core for the Deribit trading platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the execution core: auto-resume strategies and serve the
    /// control-plane API
    Serve {
        /// Control-plane port (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print persisted strategy status rows and exit
    Status {
        /// Restrict to one user
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("razor-core v0.1.0");
    let app_config = AppConfig::load()?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(app_config.listen_port);
            run_server(app_config, port).await?;
        }
        Commands::Status { user } => {
            show_status(app_config, user).await?;
        }
    }

    Ok(())
}

async fn run_server(app_config: AppConfig, port: u16) -> Result<()> {
    let journal = Arc::new(TradeJournal::new(&app_config.database_url).await?);

    // Connect every configured user's broker; an unreachable broker is
    // registered anyway so auto-resume can skip it gracefully.
    let registry = Arc::new(BrokerRegistry::new());
    for credential in &app_config.brokers {
        let client = Arc::new(DeribitClient::new(
            credential.client_id.clone(),
            credential.client_secret.clone(),
            credential.environment,
        ));
        if let Err(err) = client.connect().await {
            warn!(
                "broker connect failed for {} ({}): {}",
                credential.user_id, credential.environment, err
            );
        }
        let ticker = Arc::new(DeribitTickerStream::spawn(credential.environment));
        registry
            .register(
                &credential.user_id,
                credential.environment,
                BrokerConnection {
                    client,
                    ticker,
                },
            )
            .await;
    }
    info!("{} broker connection(s) registered", app_config.brokers.len());

    let supervisor = Arc::new(StrategySupervisor::new(
        Arc::clone(&journal),
        Arc::clone(&registry),
    ));

    // Resume everything that was running before the last shutdown.
    supervisor.initialize().await?;

    let state = api::AppState {
        supervisor: Arc::clone(&supervisor),
        journal: Arc::clone(&journal),
    };
    let server = tokio::spawn(async move {
        if let Err(err) = api::start_control_server(state, port).await {
            error!("control-plane server error: {}", err);
        }
    });

    info!("running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutdown requested");
    supervisor.shutdown().await;
    server.abort();
    info!("shutdown complete");
    Ok(())
}

async fn show_status(app_config: AppConfig, user: Option<String>) -> Result<()> {
    let journal = TradeJournal::new(&app_config.database_url).await?;
    let rows = match user {
        Some(user_id) => journal.status_rows_for_user(&user_id).await?,
        None => journal.all_status_rows().await?,
    };

    if rows.is_empty() {
        println!("no strategy status rows");
        return Ok(());
    }

    for row in rows {
        println!(
            "{:<50} {:<8} {:<20} reconnect={} errors={} heartbeat={}",
            row.key.to_string(),
            row.status.as_str(),
            row.last_action.as_str(),
            row.auto_reconnect,
            row.error_count,
            row.last_heartbeat
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
