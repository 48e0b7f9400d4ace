use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use specflow::config::{Config, StoreBackendKind};
use specflow::core::trigger::ExecutionTrigger;
use specflow::logging;
use specflow::store::{SqliteBackend, Store};
use specflow::web::{AppState, AuthPolicy, serve};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("specflow failed to start: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config);
    info!(
        service = %config.service_name,
        port = config.port,
        "starting specflow"
    );
    config.warn_on_gaps();

    let store = match config.store_backend {
        StoreBackendKind::Sqlite => {
            let path = config.store_path();
            info!(path = %path.display(), "opening store");
            Store::new(Arc::new(SqliteBackend::open(&path)?))
        }
        StoreBackendKind::Memory => {
            info!("using in-memory store; state will not survive restarts");
            Store::in_memory()
        }
    };

    let state = AppState {
        store,
        trigger: Arc::new(ExecutionTrigger::from_config(&config)?),
        auth: Arc::new(AuthPolicy::from_config(&config)?),
    };

    serve(state, config.port).await
}
