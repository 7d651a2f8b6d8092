//! Commit-boost signer routes

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use vigil_signing::{
    CommitBoostSignRequest, GenerateProxyKeyRequest, PublicKeysResponse, SignedProxyDelegation,
};

use super::parse_json;
use crate::error::{ApiError, ApiResult};
use crate::server::ApiState;

/// `GET /signer/v1/get_pubkeys`
pub async fn public_keys(State(state): State<ApiState>) -> Json<PublicKeysResponse> {
    Json(state.commit_boost.public_keys())
}

/// `POST /signer/v1/request_signature`; the body is the hex signature as a
/// JSON string.
pub async fn request_signature(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<String>> {
    let request: CommitBoostSignRequest = parse_json(&body)?;
    Ok(Json(state.commit_boost.sign(&request).await?))
}

/// `POST /signer/v1/generate_proxy_key`
pub async fn generate_proxy_key(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<SignedProxyDelegation>> {
    if !state.commit_boost.generates_proxies() {
        return Err(ApiError::Disabled("proxy key generation"));
    }
    let request: GenerateProxyKeyRequest = parse_json(&body)?;
    Ok(Json(state.commit_boost.generate_proxy_key(&request).await?))
}
