//! Bulk loading of metadata files
//!
//! A load lists the key directory, skips hidden files and files whose
//! modification time matches the [`LoadCache`], and decodes the remaining files
//! in parallel. Decoding is bounded twice: a semaphore caps concurrent batches
//! at the worker count, and every file gets its own timeout. A file that fails
//! or times out is logged and counted, never fatal. Only an unlistable
//! directory fails the whole load.
//!
//! The cache is owned by the caller (the registry writer) rather than being
//! process-global, so independent loaders never interfere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use vigil_core::SignerIdentifier;

use crate::error::{KeyError, Result};
use crate::factory::SignerFactory;
use crate::metadata::SigningMetadata;
use crate::signer::ArtifactSigner;

const FILES_PROCESSED_TO_REPORT: usize = 10;

/// Where and how to load metadata files
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory holding metadata documents
    pub directory: PathBuf,
    /// File extension of metadata documents, without the dot
    pub extension: String,
    /// Concurrent decode batches; defaults to available parallelism
    pub parallelism: Option<usize>,
    /// Smallest number of files handed to one batch
    pub min_batch_size: usize,
    /// Upper bound on decoding a single file
    pub decode_timeout: Duration,
}

impl LoaderConfig {
    /// Defaults for `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: "toml".to_string(),
            parallelism: None,
            min_batch_size: 20,
            decode_timeout: Duration::from_secs(30),
        }
    }

    fn workers(&self) -> usize {
        self.parallelism
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1)
    }
}

#[derive(Debug, Clone)]
struct CachedSource {
    modified: SystemTime,
    identifiers: Vec<SignerIdentifier>,
}

/// Modification times of processed files and the identifiers they produced
#[derive(Debug, Default)]
pub struct LoadCache {
    entries: HashMap<PathBuf, CachedSource>,
}

impl LoadCache {
    /// Remember that `path` at `modified` produced `identifiers`, including
    /// identifiers another file installed first.
    pub fn record(
        &mut self,
        path: PathBuf,
        modified: SystemTime,
        identifiers: Vec<SignerIdentifier>,
    ) {
        self.entries.insert(
            path,
            CachedSource {
                modified,
                identifiers,
            },
        );
    }
}

/// A signer decoded from one file
#[derive(Debug, Clone)]
pub struct LoadedSource {
    /// Metadata file
    pub path: PathBuf,
    /// Modification time observed before decoding
    pub modified: SystemTime,
    /// Resulting signer
    pub signer: Arc<dyn ArtifactSigner>,
}

/// Result of one load pass
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Newly decoded signers
    pub loaded: Vec<LoadedSource>,
    /// Identifiers whose files were deleted or modified since the last pass
    pub stale: Vec<SignerIdentifier>,
    /// Files that failed to read, parse, decode or finished too late
    pub errors: usize,
}

/// Decodes metadata files into signers
#[derive(Clone)]
pub struct SignerLoader {
    config: LoaderConfig,
    factory: SignerFactory,
}

impl SignerLoader {
    /// Loader for `config`, building signers with `factory`.
    pub fn new(config: LoaderConfig, factory: SignerFactory) -> Self {
        Self { config, factory }
    }

    /// Run one pass against `cache`.
    ///
    /// Entries of deleted or modified files are removed from `cache`; their
    /// identifiers are reported as stale unless another cached file still
    /// provides them. Decoded signers come back ordered by path. Successful
    /// files are not recorded here; the caller records them once it has
    /// installed the signers.
    pub async fn load(&self, cache: &mut LoadCache) -> Result<LoadOutcome> {
        let start = Instant::now();
        info!(directory = %self.config.directory.display(), "loading signing metadata");

        let directory = self.config.directory.clone();
        let extension = self.config.extension.clone();
        let (listed, mut errors) =
            tokio::task::spawn_blocking(move || list_sources(&directory, &extension))
                .await
                .map_err(|e| KeyError::DirectoryUnreadable {
                    path: self.config.directory.clone(),
                    source: std::io::Error::other(e.to_string()),
                })??;

        let mut outcome = LoadOutcome::default();
        {
            let present: HashMap<&PathBuf, SystemTime> =
                listed.iter().map(|(path, modified)| (path, *modified)).collect();
            cache.entries.retain(|path, source| {
                let unchanged = present.get(path) == Some(&source.modified);
                if !unchanged {
                    outcome.stale.extend(source.identifiers.iter().cloned());
                }
                unchanged
            });
        }
        // An identifier stays loaded while any unchanged file still provides it.
        outcome.stale.sort();
        outcome.stale.dedup();
        outcome.stale.retain(|identifier| {
            !cache
                .entries
                .values()
                .any(|source| source.identifiers.contains(identifier))
        });

        let pending: Vec<(PathBuf, SystemTime)> = listed
            .into_iter()
            .filter(|(path, _)| !cache.entries.contains_key(path))
            .collect();
        debug!(
            pending = pending.len(),
            stale = outcome.stale.len(),
            "metadata files to decode"
        );

        let (loaded, decode_errors) = self.decode_all(pending).await;
        errors += decode_errors;
        outcome.loaded = loaded;
        outcome.errors = errors;

        info!(
            loaded = outcome.loaded.len(),
            errors = outcome.errors,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "signing metadata processed"
        );
        Ok(outcome)
    }

    async fn decode_all(&self, pending: Vec<(PathBuf, SystemTime)>) -> (Vec<LoadedSource>, usize) {
        if pending.is_empty() {
            return (Vec::new(), 0);
        }

        let workers = self.config.workers();
        let batch_size = pending
            .len()
            .div_ceil(workers)
            .max(self.config.min_batch_size.max(1));
        let permits = Arc::new(Semaphore::new(workers));
        let processed = Arc::new(AtomicUsize::new(0));
        let expected = pending.len();

        let mut batches = JoinSet::new();
        for batch in pending.chunks(batch_size) {
            let batch = batch.to_vec();
            let permits = permits.clone();
            let processed = processed.clone();
            let factory = self.factory.clone();
            let base_dir = self.config.directory.clone();
            let timeout = self.config.decode_timeout;
            batches.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let mut results = Vec::with_capacity(batch.len());
                for (path, modified) in batch {
                    let result =
                        match tokio::time::timeout(timeout, load_source(&factory, &base_dir, &path))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(KeyError::Timeout { path: path.clone() }),
                        };
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % FILES_PROCESSED_TO_REPORT == 0 {
                        info!("{done} metadata files processed");
                    }
                    results.push((path, modified, result));
                }
                results
            });
        }

        let mut loaded = Vec::new();
        let mut errors = 0;
        let mut seen = 0;
        while let Some(joined) = batches.join_next().await {
            match joined {
                Ok(results) => {
                    for (path, modified, result) in results {
                        seen += 1;
                        match result {
                            Ok(signer) => loaded.push(LoadedSource {
                                path,
                                modified,
                                signer,
                            }),
                            Err(e) => {
                                error!(path = %path.display(), "error loading signing metadata: {e}");
                                errors += 1;
                            }
                        }
                    }
                }
                Err(e) => error!("metadata decode batch failed: {e}"),
            }
        }
        // Batches finish in any order; duplicates resolve by path.
        loaded.sort_by(|a, b| a.path.cmp(&b.path));
        (loaded, errors + expected.saturating_sub(seen))
    }
}

async fn load_source(
    factory: &SignerFactory,
    base_dir: &Path,
    path: &Path,
) -> Result<Arc<dyn ArtifactSigner>> {
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || std::fs::read_to_string(&owned))
        .await
        .map_err(|e| KeyError::io(path, std::io::Error::other(e.to_string())))?
        .map_err(|e| KeyError::io(path, e))?;
    let metadata = SigningMetadata::from_toml(path, &text)?;
    factory.create(base_dir, metadata).await
}

fn is_candidate(path: &Path, extension: &str) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));
    let matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
    !hidden && matches && path.is_file()
}

/// List candidate files with their modification times. Entries whose metadata
/// cannot be read are counted as errors.
fn list_sources(directory: &Path, extension: &str) -> Result<(Vec<(PathBuf, SystemTime)>, usize)> {
    let entries = std::fs::read_dir(directory).map_err(|source| {
        error!(directory = %directory.display(), "unable to access the key directory: {source}");
        KeyError::DirectoryUnreadable {
            path: directory.to_path_buf(),
            source,
        }
    })?;

    let mut sources = Vec::new();
    let mut errors = 0;
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                error!(directory = %directory.display(), "unreadable directory entry: {e}");
                errors += 1;
                continue;
            }
        };
        if !is_candidate(&path, extension) {
            continue;
        }
        match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => sources.push((path, modified)),
            Err(e) => {
                error!(path = %path.display(), "error reading metadata file: {e}");
                errors += 1;
            }
        }
    }
    Ok((sources, errors))
}
