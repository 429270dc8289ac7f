//! Standalone zone host.
//!
//! Loads a JSON store and a resource directory, starts every zone the store
//! defines and runs until interrupted.
//!
//! ```text
//! emberfall [--data ./data] [--config sim.json]
//! ```
//!
//! `data/store.json` holds the tables, map and patrol files sit next to it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use emberfall_sim::prelude::*;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless Emberfall zone host", long_about = None)]
struct Args {
    /// Directory holding store.json, block maps and patrol files.
    #[arg(long, default_value = "data")]
    data: PathBuf,
    /// Optional JSON file overriding simulation defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(SimConfig::from_json(&text)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let store_path = args.data.join("store.json");
    let text = std::fs::read_to_string(&store_path).with_context(|| format!("reading {}", store_path.display()))?;
    let store = Arc::new(MemoryStore::from_json(&text)?);
    let zone_ids = store.zone_ids();
    if zone_ids.is_empty() {
        bail!("{} defines no zones", store_path.display());
    }

    let deps = ZoneDeps::new(store, Arc::new(DirResources::new(args.data.clone())), config);
    let registry = ZoneRegistry::start(deps, &zone_ids).await?;
    for stats in registry.zone_info().await {
        info!(zone = stats.id, name = %stats.name, monsters = stats.monsters, "zone ready");
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    registry.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
