use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Swagger UI under `/docs`, serving the document stamped with the crate version.
pub fn router() -> Router<SharedState> {
    let mut doc = ApiDoc::openapi();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();

    SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", doc)
        .into()
}
