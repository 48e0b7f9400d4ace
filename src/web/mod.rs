pub mod auth;
mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::core::trigger::ExecutionTrigger;
use crate::store::Store;

pub use auth::AuthPolicy;
pub use router::build_router;

/// Shared per-request state. The store handle is the only process-wide
/// mutable resource; everything else is immutable configuration.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub trigger: Arc<ExecutionTrigger>,
    pub auth: Arc<AuthPolicy>,
}

/// Bind and serve the API until the process is stopped.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
