//! Remote secret stores
//!
//! Vault-backed metadata only names where a secret lives. A [`SecretProvider`]
//! turns such a reference into the hex secret. HashiCorp Vault (KV v2 over
//! HTTP) is built in; other vault kinds are plugged in by the embedding
//! application. A metadata file whose kind has no provider fails on its own
//! without affecting the rest of a load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{KeyError, Result};
use crate::metadata::{HashicorpMetadata, SigningMetadata};

/// Fetches secret material referenced by vault metadata
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Return the hex-encoded secret named by `metadata`.
    async fn fetch_secret(&self, metadata: &SigningMetadata) -> Result<Zeroizing<String>>;
}

/// Providers keyed by metadata `type`
#[derive(Clone, Default)]
pub struct SecretProviders {
    providers: HashMap<&'static str, Arc<dyn SecretProvider>>,
}

impl SecretProviders {
    /// Registry with only the built-in HashiCorp provider.
    pub fn with_defaults() -> Self {
        let mut providers = Self::default();
        providers.register("hashicorp", Arc::new(HashicorpProvider::new()));
        providers
    }

    /// Register (or replace) the provider for a vault kind.
    pub fn register(&mut self, kind: &'static str, provider: Arc<dyn SecretProvider>) {
        self.providers.insert(kind, provider);
    }

    /// Resolve the secret for vault-backed `metadata`.
    pub async fn fetch(&self, metadata: &SigningMetadata) -> Result<Zeroizing<String>> {
        let provider = self
            .providers
            .get(metadata.kind())
            .ok_or_else(|| KeyError::MissingProvider {
                kind: metadata.kind().to_string(),
            })?;
        provider.fetch_secret(metadata).await
    }
}

/// HashiCorp Vault KV v2 reader
pub struct HashicorpProvider {
    client: reqwest::Client,
}

impl HashicorpProvider {
    /// Create a provider with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn url(metadata: &HashicorpMetadata) -> String {
        let scheme = if metadata.tls_enabled { "https" } else { "http" };
        let path = metadata.key_path.trim_start_matches('/');
        format!(
            "{scheme}://{}:{}/{path}",
            metadata.server_host, metadata.server_port
        )
    }
}

impl Default for HashicorpProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick `key_name` out of a KV v2 response body (`data.data.<key_name>`).
pub fn extract_kv2_secret(body: &Value, key_name: &str) -> Result<Zeroizing<String>> {
    body.get("data")
        .and_then(|data| data.get("data"))
        .and_then(|data| data.get(key_name))
        .and_then(Value::as_str)
        .map(|secret| Zeroizing::new(secret.to_string()))
        .ok_or_else(|| KeyError::vault(format!("secret field {key_name} not found in response")))
}

#[async_trait]
impl SecretProvider for HashicorpProvider {
    async fn fetch_secret(&self, metadata: &SigningMetadata) -> Result<Zeroizing<String>> {
        let SigningMetadata::Hashicorp(hashicorp) = metadata else {
            return Err(KeyError::vault(format!(
                "hashicorp provider cannot read {} metadata",
                metadata.kind()
            )));
        };

        let url = Self::url(hashicorp);
        tracing::debug!(%url, "fetching secret from hashicorp vault");
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &hashicorp.token)
            .timeout(Duration::from_millis(hashicorp.timeout))
            .send()
            .await
            .map_err(|e| KeyError::vault(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(KeyError::vault(format!(
                "vault returned {} for {url}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| KeyError::vault(format!("malformed vault response: {e}")))?;
        extract_kv2_secret(&body, &hashicorp.key_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::GcpSecretMetadata;
    use assert_matches::assert_matches;
    use vigil_core::KeyType;

    #[test]
    fn extracts_nested_kv2_field() {
        let body = serde_json::json!({"data": {"data": {"value": "0xabc"}, "metadata": {}}});
        assert_eq!(extract_kv2_secret(&body, "value").unwrap().as_str(), "0xabc");
        assert!(extract_kv2_secret(&body, "other").is_err());
    }

    #[test]
    fn url_respects_tls_and_port() {
        let metadata = HashicorpMetadata {
            server_host: "vault".to_string(),
            server_port: 8300,
            tls_enabled: true,
            key_path: "/v1/secret/data/k".to_string(),
            key_name: "value".to_string(),
            token: "t".to_string(),
            timeout: 1000,
            key_type: KeyType::Bls,
        };
        assert_eq!(
            HashicorpProvider::url(&metadata),
            "https://vault:8300/v1/secret/data/k"
        );
    }

    struct StaticProvider(&'static str);

    #[async_trait]
    impl SecretProvider for StaticProvider {
        async fn fetch_secret(&self, _: &SigningMetadata) -> Result<Zeroizing<String>> {
            Ok(Zeroizing::new(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn missing_provider_is_reported_per_kind() {
        let metadata = SigningMetadata::GcpSecret(GcpSecretMetadata {
            project_id: "p".to_string(),
            secret_name: "s".to_string(),
            key_type: KeyType::Bls,
        });
        let mut providers = SecretProviders::with_defaults();
        assert_matches!(
            providers.fetch(&metadata).await,
            Err(KeyError::MissingProvider { kind }) if kind == "gcp-secret"
        );

        providers.register("gcp-secret", Arc::new(StaticProvider("abcd")));
        assert_eq!(providers.fetch(&metadata).await.unwrap().as_str(), "abcd");
    }
}
