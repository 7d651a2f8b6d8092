//! Bulk loading behavior of the signer registry against a real key directory.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use blst::min_pk::SecretKey;
use parking_lot::Mutex;
use vigil_core::{KeyType, SignerIdentifier};
use vigil_keys::loader::LoadCache;
use vigil_keys::metadata::{FileRawMetadata, SigningMetadata};
use vigil_keys::{
    ArtifactSigner, BlsArtifactSigner, KeyError, Keystore, LoadReport, LoaderConfig,
    ProxyKeysConfig, RegistryListener, SecretProvider, SecretProviders, SignerFactory,
    SignerLoader, SignerRegistry,
};
use zeroize::Zeroizing;

fn secret(seed: u8) -> [u8; 32] {
    SecretKey::key_gen(&[seed; 32], &[]).unwrap().to_bytes()
}

fn identifier(seed: u8) -> SignerIdentifier {
    BlsArtifactSigner::from_secret_bytes(&secret(seed))
        .unwrap()
        .identifier()
        .clone()
}

fn write_raw(dir: &Path, name: &str, seed: u8) {
    let metadata = SigningMetadata::FileRaw(FileRawMetadata {
        private_key: format!("0x{}", hex::encode(secret(seed))),
        key_type: Default::default(),
    });
    std::fs::write(dir.join(name), metadata.to_toml().unwrap()).unwrap();
}

fn bump_mtime(path: &Path) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
}

fn loader_for(dir: &Path, providers: SecretProviders) -> SignerLoader {
    let mut config = LoaderConfig::new(dir);
    config.parallelism = Some(2);
    config.min_batch_size = 1;
    config.decode_timeout = Duration::from_millis(200);
    SignerLoader::new(config, SignerFactory::new(providers))
}

fn registry_for(dir: &Path, providers: SecretProviders) -> SignerRegistry {
    SignerRegistry::builder()
        .loader(loader_for(dir, providers))
        .spawn()
}

#[tokio::test]
async fn loads_every_valid_file_and_counts_failures() {
    let dir = tempfile::tempdir().unwrap();
    for seed in 1..=5 {
        write_raw(dir.path(), &format!("key{seed}.toml"), seed);
    }
    std::fs::write(dir.path().join("broken.toml"), "type = \"file-raw\"").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let registry = registry_for(dir.path(), SecretProviders::default());
    let report = registry.load().await.unwrap();

    assert_eq!(
        report,
        LoadReport {
            loaded: 5,
            errors: 1
        }
    );
    assert_eq!(registry.last_load_errors(), 1);
    let expected: Vec<_> = (1..=5).map(identifier).collect();
    for id in &expected {
        assert!(registry.get_signer(id.as_str()).is_some());
    }
    assert_eq!(registry.len(), 5);
}

#[tokio::test]
async fn second_load_of_unchanged_directory_loads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 1);
    write_raw(dir.path(), "b.toml", 2);

    let registry = registry_for(dir.path(), SecretProviders::default());
    assert_eq!(registry.load().await.unwrap().loaded, 2);
    assert_eq!(registry.load().await.unwrap(), LoadReport::default());
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn deleted_and_modified_files_are_reconciled() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 1);
    write_raw(dir.path(), "b.toml", 2);
    let registry = registry_for(dir.path(), SecretProviders::default());
    registry.load().await.unwrap();

    std::fs::remove_file(dir.path().join("a.toml")).unwrap();
    write_raw(dir.path(), "b.toml", 3);
    bump_mtime(&dir.path().join("b.toml"));

    let report = registry.load().await.unwrap();
    assert_eq!(report.loaded, 1);
    assert!(registry.get_signer(identifier(1).as_str()).is_none());
    assert!(registry.get_signer(identifier(2).as_str()).is_none());
    assert!(registry.get_signer(identifier(3).as_str()).is_some());
}

#[tokio::test]
async fn duplicate_key_keeps_a_single_entry() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 7);
    write_raw(dir.path(), "b.toml", 7);

    let registry = registry_for(dir.path(), SecretProviders::default());
    let report = registry.load().await.unwrap();
    assert_eq!(
        report,
        LoadReport {
            loaded: 1,
            errors: 0
        }
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn duplicate_source_keeps_key_after_first_file_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 7);
    let registry = registry_for(dir.path(), SecretProviders::default());
    registry.load().await.unwrap();

    write_raw(dir.path(), "b.toml", 7);
    assert_eq!(registry.load().await.unwrap(), LoadReport::default());

    std::fs::remove_file(dir.path().join("a.toml")).unwrap();
    registry.load().await.unwrap();
    assert!(registry.get_signer(identifier(7).as_str()).is_some());

    std::fs::remove_file(dir.path().join("b.toml")).unwrap();
    registry.load().await.unwrap();
    assert!(registry.get_signer(identifier(7).as_str()).is_none());
}

#[tokio::test]
async fn decoded_sources_are_ordered_by_path() {
    let dir = tempfile::tempdir().unwrap();
    for (name, seed) in [("c.toml", 3), ("a.toml", 1), ("d.toml", 4), ("b.toml", 2)] {
        write_raw(dir.path(), name, seed);
    }
    let loader = loader_for(dir.path(), SecretProviders::default());

    let outcome = loader.load(&mut LoadCache::default()).await.unwrap();
    let names: Vec<_> = outcome
        .loaded
        .iter()
        .map(|source| {
            source
                .path
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(names, ["a.toml", "b.toml", "c.toml", "d.toml"]);
}

#[tokio::test]
async fn reload_picks_up_new_proxies_of_loaded_keys() {
    let dir = tempfile::tempdir().unwrap();
    let proxy_dir = tempfile::tempdir().unwrap();
    let password_file = proxy_dir.path().join("proxy.password");
    std::fs::write(&password_file, "proxy-pw").unwrap();
    let proxy_keys = ProxyKeysConfig {
        directory: proxy_dir.path().to_path_buf(),
        password_file,
    };
    write_raw(dir.path(), "a.toml", 1);
    let registry = SignerRegistry::builder()
        .loader(loader_for(dir.path(), SecretProviders::default()))
        .proxy_keys(proxy_keys.clone())
        .spawn();
    registry.load().await.unwrap();
    assert!(registry.get_proxy_identifiers(&identifier(1)).is_empty());

    let proxy = BlsArtifactSigner::from_secret_bytes(&secret(21)).unwrap();
    let keystore = Keystore::encrypt(&secret(21), "proxy-pw", &proxy.public_key(), 2).unwrap();
    let bls_dir = proxy_keys.key_directory(&identifier(1), KeyType::Bls);
    std::fs::create_dir_all(&bls_dir).unwrap();
    std::fs::write(bls_dir.join("p.json"), keystore.to_json().unwrap()).unwrap();

    assert_eq!(registry.load().await.unwrap(), LoadReport::default());
    let proxies = registry.get_proxy_identifiers(&identifier(1));
    assert_eq!(proxies[&KeyType::Bls], vec![proxy.identifier().clone()]);

    // Rebuilding does not duplicate existing proxies.
    registry.load().await.unwrap();
    assert_eq!(
        registry.get_proxy_identifiers(&identifier(1))[&KeyType::Bls].len(),
        1
    );
}

#[tokio::test]
async fn unreadable_directory_reports_one_error() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_for(&dir.path().join("missing"), SecretProviders::default());
    assert_eq!(
        registry.load().await.unwrap(),
        LoadReport {
            loaded: 0,
            errors: 1
        }
    );
    assert!(registry.is_empty());
    assert!(matches!(
        registry.try_load().await,
        Err(KeyError::DirectoryUnreadable { .. })
    ));
}

#[tokio::test]
async fn removed_signer_is_not_resurrected_by_reload() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 1);
    let registry = registry_for(dir.path(), SecretProviders::default());
    registry.load().await.unwrap();

    assert!(registry.remove_signer(&identifier(1)).await.unwrap());
    registry.load().await.unwrap();
    assert!(registry.get_signer(identifier(1).as_str()).is_none());
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Vec<SignerIdentifier>>>,
}

#[async_trait]
impl RegistryListener for Recorder {
    async fn on_signers_loaded(&self, identifiers: &[SignerIdentifier]) {
        self.calls.lock().push(identifiers.to_vec());
    }
}

#[tokio::test]
async fn listeners_see_the_full_identifier_set() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 1);
    let recorder = Arc::new(Recorder::default());
    let registry = SignerRegistry::builder()
        .loader(SignerLoader::new(
            LoaderConfig::new(dir.path()),
            SignerFactory::new(SecretProviders::default()),
        ))
        .listener(recorder.clone())
        .spawn();

    registry.load().await.unwrap();
    write_raw(dir.path(), "b.toml", 2);
    registry.load().await.unwrap();

    let calls = recorder.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], vec![identifier(1)]);
    let mut second = calls[1].clone();
    second.sort();
    let mut expected = vec![identifier(1), identifier(2)];
    expected.sort();
    assert_eq!(second, expected);
}

struct StalledVault;

#[async_trait]
impl SecretProvider for StalledVault {
    async fn fetch_secret(
        &self,
        _metadata: &SigningMetadata,
    ) -> vigil_keys::Result<Zeroizing<String>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(KeyError::vault("unreachable"))
    }
}

#[tokio::test]
async fn slow_sources_time_out_without_blocking_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "a.toml", 1);
    std::fs::write(
        dir.path().join("vault.toml"),
        "type = \"hashicorp\"\nserverHost = \"localhost\"\nkeyPath = \"/v1/secret/data/k\"\ntoken = \"t\"\n",
    )
    .unwrap();

    let mut providers = SecretProviders::default();
    providers.register("hashicorp", Arc::new(StalledVault));
    let registry = registry_for(dir.path(), providers);

    let report = registry.load().await.unwrap();
    assert_eq!(
        report,
        LoadReport {
            loaded: 1,
            errors: 1
        }
    );
}
