use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Storage backend in use, absent while none is installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

impl HealthResponse {
    /// The store answered its health check.
    pub fn ok(store: &str) -> Self {
        Self {
            status: "ok".to_string(),
            store: Some(store.to_string()),
        }
    }

    /// No store, or the store is failing.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            store: None,
        }
    }
}
