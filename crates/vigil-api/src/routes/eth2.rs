//! Eth2 signing routes

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info};
use vigil_signing::{SignatureEncoding, SigningRequest};

use super::parse_json;
use crate::error::ApiResult;
use crate::server::ApiState;

/// Query parameters of the sign route
#[derive(Debug, Default, Deserialize)]
pub struct SignParams {
    /// `base64` selects base64 output; anything else is hex
    #[serde(default)]
    pub encoding: Option<String>,
}

/// `POST /api/v1/eth2/sign/{identifier}`
pub async fn sign(
    State(state): State<ApiState>,
    Path(identifier): Path<String>,
    Query(params): Query<SignParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let request: SigningRequest = parse_json(&body)?;
    let encoding = match params.encoding.as_deref() {
        Some(encoding) if encoding.eq_ignore_ascii_case("base64") => SignatureEncoding::Base64,
        _ => SignatureEncoding::Hex,
    };
    let response = state
        .orchestrator
        .sign(&identifier, &request, encoding)
        .await?;

    let wants_json = headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));
    Ok(if wants_json {
        Json(response).into_response()
    } else {
        response.signature.into_response()
    })
}

/// `GET /api/v1/eth2/publicKeys`
pub async fn public_keys(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(
        state
            .registry()
            .available_identifiers()
            .iter()
            .map(|identifier| identifier.to_prefixed())
            .collect(),
    )
}

/// `POST /reload`; the load runs in the background and is cancelled on
/// shutdown.
pub async fn reload(State(state): State<ApiState>) -> StatusCode {
    let registry = state.registry().clone();
    state.tasks.spawn_cancellable(async move {
        match registry.load().await {
            Ok(report) => info!(loaded = report.loaded, errors = report.errors, "reload finished"),
            Err(e) => error!("reload failed: {e}"),
        }
    });
    StatusCode::OK
}
