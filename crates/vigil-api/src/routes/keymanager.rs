//! Key manager routes under `/eth/v1/keystores`

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use vigil_signing::{
    DeleteKeystoresRequest, DeleteKeystoresResponse, ImportKeystoresRequest,
    ImportKeystoresResponse, KeyManager, ListKeystoresResponse,
};

use super::parse_json;
use crate::error::{ApiError, ApiResult};
use crate::server::ApiState;

fn key_manager(state: &ApiState) -> ApiResult<&KeyManager> {
    state
        .key_manager
        .as_ref()
        .ok_or(ApiError::Disabled("key manager"))
}

/// `GET /eth/v1/keystores`
pub async fn list(State(state): State<ApiState>) -> ApiResult<Json<ListKeystoresResponse>> {
    Ok(Json(key_manager(&state)?.list()))
}

/// `POST /eth/v1/keystores`
pub async fn import(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<ImportKeystoresResponse>> {
    let manager = key_manager(&state)?;
    let request: ImportKeystoresRequest = parse_json(&body)?;
    Ok(Json(manager.import(request).await?))
}

/// `DELETE /eth/v1/keystores`
pub async fn delete(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<DeleteKeystoresResponse>> {
    let manager = key_manager(&state)?;
    let request: DeleteKeystoresRequest = parse_json(&body)?;
    Ok(Json(manager.delete(request).await?))
}
