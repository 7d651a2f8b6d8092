//! Route handlers, one module per API family

pub mod commit_boost;
pub mod eth2;
pub mod health;
pub mod keymanager;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ApiResult;

/// Parse a JSON body; any failure is a 400.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    Ok(serde_json::from_slice(body)?)
}
