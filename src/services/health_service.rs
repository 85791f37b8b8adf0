use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the installed store and report which backend answers.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let Some(store) = state.store().await else {
        warn!("store unavailable (degraded mode)");
        return HealthResponse::degraded();
    };

    if let Err(err) = store.health_check().await {
        warn!(error = %err, "store health check failed");
        return HealthResponse::degraded();
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok(store.name())
    }
}
