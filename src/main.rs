use std::sync::Arc;

use clap::Parser;
use drawdown::api::cli::{Cli, Command, run_simulate};
use drawdown::api::{AppState, run_http_server};
use drawdown::store::{JsonFilePlanStore, MemoryPlanStore, PlanStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Serve { port, store, tax } => {
            let store: Arc<dyn PlanStore> = match store {
                Some(path) => Arc::new(JsonFilePlanStore::open(path)?),
                None => Arc::new(MemoryPlanStore::new()),
            };
            let state = AppState::new(store, tax.into_regime()?);
            run_http_server(port, state).await?;
        }
        Command::Simulate { plan, json, tax } => run_simulate(&plan, json, tax)?,
    }
    Ok(())
}
