use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netds::{Config, Datastore, GrpcSchemaClient, SchemaLookup};

/// netds - transactional configuration datastore
#[derive(Parser, Debug)]
#[command(name = "netds", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "/etc/netds/netds.toml")]
    config: PathBuf,

    /// Schema server endpoint, overrides the config file
    #[arg(long)]
    schema_server: Option<String>,

    /// Capacity of each datastore's sync channel, overrides the config file
    #[arg(long)]
    sync_buffer: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netds=info,tonic=warn,tower=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    if let Some(address) = args.schema_server {
        config.schema_server.address = address;
    }
    if let Some(buffer) = args.sync_buffer {
        anyhow::ensure!(buffer > 0, "--sync-buffer must be > 0");
        for ds in &mut config.datastores {
            ds.sync.buffer_size = buffer;
        }
    }

    info!("Starting netds with {} datastores", config.datastores.len());
    info!("Schema server: {}", config.schema_server.address);

    let schema: Arc<dyn SchemaLookup> = Arc::new(
        GrpcSchemaClient::connect_lazy(
            &config.schema_server.address,
            config.schema_server.timeout(),
        )
        .context("Invalid schema server address")?,
    );

    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    // Datastores block until their target connects, so build them concurrently
    // and stay responsive to signals meanwhile.
    let mut pending = JoinSet::new();
    for ds_config in config.datastores {
        let schema = Arc::clone(&schema);
        pending.spawn(async move {
            let name = ds_config.name.clone();
            (name, Datastore::new(ds_config, schema).await)
        });
    }

    let mut datastores: HashMap<String, Arc<Datastore>> = HashMap::new();
    tokio::pin!(ctrl_c);
    let signalled = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received SIGINT");
                break true;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break true;
            }
            joined = pending.join_next() => match joined {
                Some(Ok((name, Ok(ds)))) => {
                    info!("Datastore {} ready", name);
                    datastores.insert(name, Arc::new(ds));
                }
                Some(Ok((name, Err(e)))) => {
                    error!("Failed to create datastore {}: {}", name, e);
                }
                Some(Err(e)) => {
                    error!("Datastore task failed: {}", e);
                }
                None => break false,
            },
        }
    };

    if !signalled {
        info!("All datastores started ({} running)", datastores.len());
        tokio::select! {
            _ = &mut ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    info!("Shutting down");
    pending.abort_all();
    for (name, ds) in &datastores {
        ds.stop().await;
        info!("Datastore {} stopped", name);
    }

    Ok(())
}
