//! Router assembly and the listening server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use vigil_core::TaskRegistry;
use vigil_keys::SignerRegistry;
use vigil_protection::SlashingProtection;
use vigil_signing::{CommitBoostSigner, KeyManager, SigningOrchestrator};

use crate::routes::{commit_boost, eth2, health, keymanager};

/// Everything the handlers need
pub struct ApiContext {
    /// Signs eth2 requests
    pub orchestrator: SigningOrchestrator,
    /// Signs commit-boost requests
    pub commit_boost: CommitBoostSigner,
    /// Key manager; `None` disables the keystore routes
    pub key_manager: Option<KeyManager>,
    /// Protection store, for health reporting
    pub protection: Option<Arc<dyn SlashingProtection>>,
    /// Owner of tasks spawned by handlers
    pub tasks: Arc<TaskRegistry>,
}

impl ApiContext {
    pub(crate) fn registry(&self) -> &SignerRegistry {
        self.orchestrator.registry()
    }
}

/// Shared handler state
pub type ApiState = Arc<ApiContext>;

/// Build the full route table.
pub fn router(context: ApiContext) -> Router {
    Router::new()
        .route("/upcheck", get(health::upcheck))
        .route("/healthcheck", get(health::healthcheck))
        .route("/reload", post(eth2::reload))
        .route("/api/v1/eth2/publicKeys", get(eth2::public_keys))
        .route("/api/v1/eth2/sign/:identifier", post(eth2::sign))
        .route(
            "/eth/v1/keystores",
            get(keymanager::list)
                .post(keymanager::import)
                .delete(keymanager::delete),
        )
        .route("/signer/v1/get_pubkeys", get(commit_boost::public_keys))
        .route(
            "/signer/v1/request_signature",
            post(commit_boost::request_signature),
        )
        .route(
            "/signer/v1/generate_proxy_key",
            post(commit_boost::generate_proxy_key),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(Arc::new(context))
}

/// HTTP server bound to one address
pub struct ApiServer {
    listen: SocketAddr,
    router: Router,
}

impl ApiServer {
    /// Server for `context` on `listen`.
    pub fn new(listen: SocketAddr, context: ApiContext) -> Self {
        Self {
            listen,
            router: router(context),
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.listen).await?;
        info!(address = %listener.local_addr()?, "signer API listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
