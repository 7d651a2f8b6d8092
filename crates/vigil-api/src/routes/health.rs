//! Liveness and health

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::server::ApiState;

/// Check outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Healthy
    Up,
    /// Unhealthy
    Down,
}

impl Status {
    fn from_ok(ok: bool) -> Self {
        if ok {
            Self::Up
        } else {
            Self::Down
        }
    }
}

/// Key counts behind the keys check
#[derive(Debug, Clone, Serialize)]
pub struct KeysData {
    /// Loaded consensus keys
    pub keys_loaded: usize,
    /// Sources that failed in the last load
    pub error_count: usize,
}

/// One named check
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    /// Check name
    pub id: &'static str,
    /// Outcome
    pub status: Status,
    /// Detail, for the keys check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<KeysData>,
}

/// Body of `/healthcheck`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall outcome
    pub status: Status,
    /// Individual checks
    pub checks: Vec<Check>,
}

/// `GET /upcheck`
pub async fn upcheck() -> &'static str {
    "OK"
}

/// `GET /healthcheck`; 503 when any check is down.
pub async fn healthcheck(State(state): State<ApiState>) -> (StatusCode, Json<HealthReport>) {
    let registry = state.registry();
    let error_count = registry.last_load_errors();
    let mut checks = vec![Check {
        id: "keys-check",
        status: Status::from_ok(error_count == 0),
        data: Some(KeysData {
            keys_loaded: registry.len(),
            error_count,
        }),
    }];
    if let Some(protection) = &state.protection {
        checks.push(Check {
            id: "slashing-protection-db-health-check",
            status: Status::from_ok(protection.is_healthy().await),
            data: None,
        });
    }

    let status = Status::from_ok(checks.iter().all(|check| check.status == Status::Up));
    let code = match status {
        Status::Up => StatusCode::OK,
        Status::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(HealthReport { status, checks }))
}
