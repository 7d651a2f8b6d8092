//! Signer registry
//!
//! Maps identifiers to signing capabilities for the lifetime of the process.
//!
//! # Concurrency
//!
//! Readers clone an `Arc` of the current immutable [`Snapshot`] and look keys up
//! without further synchronization. Every mutation (bulk load, add, remove, add
//! proxy) is a command sent to a single writer task, which builds the next
//! snapshot from the current one and swaps the pointer. Readers therefore see
//! either the old or the new map, never a partial one, and writers never race.
//!
//! A signer removed while a `sign` call holds its `Arc` stays alive until that
//! call finishes.
//!
//! Every bulk load rebuilds the proxy keys of every installed consensus key
//! from the proxy keystore directory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use vigil_core::{KeyType, SignerIdentifier};

use crate::error::{KeyError, Result};
use crate::loader::{LoadCache, SignerLoader};
use crate::proxy::{load_proxy_signers, ProxyKeysConfig};
use crate::signer::ArtifactSigner;

const COMMAND_BUFFER: usize = 64;

/// Immutable view of all installed signers
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    signers: HashMap<SignerIdentifier, Arc<dyn ArtifactSigner>>,
    proxies: HashMap<SignerIdentifier, Vec<Arc<dyn ArtifactSigner>>>,
    proxy_index: HashMap<SignerIdentifier, Arc<dyn ArtifactSigner>>,
}

impl Snapshot {
    fn remove(&mut self, identifier: &SignerIdentifier) -> bool {
        if let Some(proxies) = self.proxies.remove(identifier) {
            for proxy in proxies {
                self.proxy_index.remove(proxy.identifier());
            }
        }
        self.signers.remove(identifier).is_some()
    }

    fn replace_proxies(
        &mut self,
        consensus: &SignerIdentifier,
        signers: Vec<Arc<dyn ArtifactSigner>>,
    ) {
        if let Some(previous) = self.proxies.remove(consensus) {
            for proxy in previous {
                self.proxy_index.remove(proxy.identifier());
            }
        }
        for signer in signers {
            self.add_proxy(consensus, signer);
        }
    }

    fn add_proxy(&mut self, consensus: &SignerIdentifier, signer: Arc<dyn ArtifactSigner>) {
        let entry = self.proxies.entry(consensus.clone()).or_default();
        entry.retain(|existing| existing.identifier() != signer.identifier());
        entry.push(signer.clone());
        self.proxy_index.insert(signer.identifier().clone(), signer);
    }
}

/// Counts reported by a bulk load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Signers installed by this load
    pub loaded: usize,
    /// Sources that failed
    pub errors: usize,
}

/// Notified after every bulk load with the full identifier set
#[async_trait]
pub trait RegistryListener: Send + Sync {
    /// Called from the writer task once the new snapshot is visible.
    async fn on_signers_loaded(&self, identifiers: &[SignerIdentifier]);
}

enum Command {
    Load(oneshot::Sender<Result<LoadReport>>),
    Add(Arc<dyn ArtifactSigner>, oneshot::Sender<()>),
    AddProxy(SignerIdentifier, Arc<dyn ArtifactSigner>, oneshot::Sender<()>),
    Remove(SignerIdentifier, oneshot::Sender<bool>),
    Shutdown,
}

/// Configures and starts a [`SignerRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    loader: Option<SignerLoader>,
    proxy_keys: Option<ProxyKeysConfig>,
    listeners: Vec<Arc<dyn RegistryListener>>,
}

impl RegistryBuilder {
    /// Source of bulk loads; without one `load` is a no-op.
    pub fn loader(mut self, loader: SignerLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Enable proxy key loading.
    pub fn proxy_keys(mut self, config: ProxyKeysConfig) -> Self {
        self.proxy_keys = Some(config);
        self
    }

    /// Add a post-load listener.
    pub fn listener(mut self, listener: Arc<dyn RegistryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Spawn the writer task. Requires a Tokio runtime.
    pub fn spawn(self) -> SignerRegistry {
        let snapshot = Arc::new(RwLock::new(Arc::new(Snapshot::default())));
        let last_errors = Arc::new(AtomicUsize::new(0));
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);

        let writer = Writer {
            snapshot: snapshot.clone(),
            last_errors: last_errors.clone(),
            loader: self.loader,
            proxy_keys: self.proxy_keys,
            listeners: self.listeners,
            cache: LoadCache::default(),
        };
        tokio::spawn(writer.run(receiver));

        SignerRegistry {
            snapshot,
            last_errors,
            commands,
        }
    }
}

/// Handle to the registry; cheap to clone
#[derive(Clone)]
pub struct SignerRegistry {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    last_errors: Arc<AtomicUsize>,
    commands: mpsc::Sender<Command>,
}

impl SignerRegistry {
    /// Start configuring a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> Result<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| KeyError::RegistryClosed)?;
        reply.await.map_err(|_| KeyError::RegistryClosed)
    }

    /// Run a bulk load and merge its result into the registry.
    ///
    /// An unlistable key directory leaves the registry unchanged and is
    /// reported as a single error.
    pub async fn load(&self) -> Result<LoadReport> {
        match self.try_load().await {
            Err(KeyError::DirectoryUnreadable { .. }) => Ok(LoadReport {
                loaded: 0,
                errors: 1,
            }),
            other => other,
        }
    }

    /// Like [`load`](Self::load), but an unlistable key directory is returned
    /// as [`KeyError::DirectoryUnreadable`].
    pub async fn try_load(&self) -> Result<LoadReport> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Load(tx), rx).await?
    }

    /// Signer for `identifier` (any case, prefix optional).
    pub fn get_signer(&self, identifier: &str) -> Option<Arc<dyn ArtifactSigner>> {
        let signer = SignerIdentifier::parse(identifier)
            .ok()
            .and_then(|id| self.current().signers.get(&id).cloned());
        if signer.is_none() {
            warn!(identifier, "no signer was loaded matching identifier");
        }
        signer
    }

    /// Proxy signer for `identifier`.
    pub fn get_proxy_signer(&self, identifier: &str) -> Option<Arc<dyn ArtifactSigner>> {
        let id = SignerIdentifier::parse(identifier).ok()?;
        self.current().proxy_index.get(&id).cloned()
    }

    /// All consensus identifiers.
    pub fn available_identifiers(&self) -> BTreeSet<SignerIdentifier> {
        self.current().signers.keys().cloned().collect()
    }

    /// Proxies of `identifier` grouped by scheme.
    pub fn get_proxy_identifiers(
        &self,
        identifier: &SignerIdentifier,
    ) -> BTreeMap<KeyType, Vec<SignerIdentifier>> {
        let mut grouped: BTreeMap<KeyType, Vec<SignerIdentifier>> = BTreeMap::new();
        if let Some(proxies) = self.current().proxies.get(identifier) {
            for proxy in proxies {
                grouped
                    .entry(proxy.key_type())
                    .or_default()
                    .push(proxy.identifier().clone());
            }
        }
        for ids in grouped.values_mut() {
            ids.sort();
        }
        grouped
    }

    /// Number of consensus signers.
    pub fn len(&self) -> usize {
        self.current().signers.len()
    }

    /// Whether no signer is installed.
    pub fn is_empty(&self) -> bool {
        self.current().signers.is_empty()
    }

    /// Errors counted by the most recent load.
    pub fn last_load_errors(&self) -> usize {
        self.last_errors.load(Ordering::Relaxed)
    }

    /// Install or replace a signer.
    pub async fn add_signer(&self, signer: Arc<dyn ArtifactSigner>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Add(signer, tx), rx).await
    }

    /// Attach a proxy signer to `consensus`.
    pub async fn add_proxy_signer(
        &self,
        consensus: &SignerIdentifier,
        signer: Arc<dyn ArtifactSigner>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::AddProxy(consensus.clone(), signer, tx), rx)
            .await
    }

    /// Remove a signer and its proxies. Returns whether it was present.
    pub async fn remove_signer(&self, identifier: &SignerIdentifier) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Remove(identifier.clone(), tx), rx)
            .await
    }

    /// Stop the writer task. Lookups keep serving the last snapshot.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

struct Writer {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    last_errors: Arc<AtomicUsize>,
    loader: Option<SignerLoader>,
    proxy_keys: Option<ProxyKeysConfig>,
    listeners: Vec<Arc<dyn RegistryListener>>,
    cache: LoadCache,
}

impl Writer {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Load(reply) => {
                    let report = self.load().await;
                    let _ = reply.send(report);
                }
                Command::Add(signer, reply) => {
                    let mut next = self.next();
                    debug!(identifier = %signer.identifier(), "adding signer");
                    next.signers.insert(signer.identifier().clone(), signer);
                    self.publish(next);
                    let _ = reply.send(());
                }
                Command::AddProxy(consensus, signer, reply) => {
                    let mut next = self.next();
                    next.add_proxy(&consensus, signer);
                    self.publish(next);
                    let _ = reply.send(());
                }
                Command::Remove(identifier, reply) => {
                    let mut next = self.next();
                    let removed = next.remove(&identifier);
                    if removed {
                        info!(%identifier, "signer removed");
                        self.publish(next);
                    }
                    let _ = reply.send(removed);
                }
                Command::Shutdown => break,
            }
        }
        debug!("signer registry writer stopped");
    }

    fn next(&self) -> Snapshot {
        Snapshot::clone(&self.snapshot.read())
    }

    fn publish(&self, next: Snapshot) {
        *self.snapshot.write() = Arc::new(next);
    }

    async fn load(&mut self) -> Result<LoadReport> {
        let Some(loader) = self.loader.clone() else {
            return Ok(LoadReport::default());
        };

        let outcome = match loader.load(&mut self.cache).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("signer load failed: {e}");
                self.last_errors.store(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut next = self.next();
        for identifier in &outcome.stale {
            if next.remove(identifier) {
                info!(%identifier, "signer source removed or modified, unloading");
            }
        }

        let mut installed = Vec::new();
        let mut recorded: HashMap<PathBuf, (SystemTime, Vec<SignerIdentifier>)> = HashMap::new();
        for source in outcome.loaded {
            let identifier = source.signer.identifier().clone();
            let record = recorded
                .entry(source.path.clone())
                .or_insert_with(|| (source.modified, Vec::new()));
            record.1.push(identifier.clone());
            if next.signers.contains_key(&identifier) {
                warn!(
                    %identifier,
                    path = %source.path.display(),
                    "duplicate key found while loading, keeping the first"
                );
                continue;
            }
            next.signers.insert(identifier.clone(), source.signer);
            installed.push(identifier);
        }
        for (path, (modified, identifiers)) in recorded {
            self.cache.record(path, modified, identifiers);
        }

        let mut errors = outcome.errors;
        if let Some(proxy_keys) = self.proxy_keys.clone() {
            let consensus: Vec<SignerIdentifier> = next.signers.keys().cloned().collect();
            errors += load_proxies(&proxy_keys, &consensus, &mut next).await;
        }

        let loaded = installed.len();
        let identifiers: Vec<SignerIdentifier> = next.signers.keys().cloned().collect();
        self.publish(next);
        self.last_errors.store(errors, Ordering::Relaxed);
        info!(loaded, errors, total = identifiers.len(), "signer registry updated");

        for listener in &self.listeners {
            listener.on_signers_loaded(&identifiers).await;
        }

        Ok(LoadReport { loaded, errors })
    }
}

async fn load_proxies(
    config: &ProxyKeysConfig,
    consensus: &[SignerIdentifier],
    next: &mut Snapshot,
) -> usize {
    if consensus.is_empty() {
        return 0;
    }
    let config = config.clone();
    let consensus = consensus.to_vec();
    let loaded = tokio::task::spawn_blocking(move || {
        consensus
            .into_iter()
            .map(|id| {
                let (signers, errors) = load_proxy_signers(&config, &id);
                (id, signers, errors)
            })
            .collect::<Vec<_>>()
    })
    .await;

    match loaded {
        Ok(results) => {
            let mut errors = 0;
            for (consensus, signers, failed) in results {
                errors += failed;
                next.replace_proxies(&consensus, signers);
            }
            errors
        }
        Err(e) => {
            error!("proxy key loading failed: {e}");
            1
        }
    }
}
