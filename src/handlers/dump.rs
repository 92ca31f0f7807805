//! Dump endpoint handler.
//!
//! `/dump` renders the dump string of every instance; `/dump?properties=true`
//! renders property sets instead.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct DumpQuery {
    #[serde(default)]
    pub properties: bool,
}

/// Handler for the /dump endpoint.
#[instrument(skip(state))]
pub async fn dump_handler(
    State(state): State<SharedState>,
    Query(query): Query<DumpQuery>,
) -> impl IntoResponse {
    debug!("Processing /dump request");
    state.record_http_request();

    let renderer = state.clone();
    let rendered = tokio::task::spawn_blocking(move || {
        renderer.enumerations.refresh();
        renderer.enumerations.render(query.properties)
    })
    .await;

    match rendered {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => {
            error!("Dump task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                "Failed to render dump".to_string(),
            )
        }
    }
}
