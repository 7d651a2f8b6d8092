//! Operator commands against real database files.

use assert_matches::assert_matches;
use vigil_cli::commands::interchange::{export, import, ExportArgs, ImportArgs};
use vigil_cli::commands::open_protection;
use vigil_cli::commands::run::{build_registry, load_keys, RunArgs};
use vigil_cli::commands::watermark::{repair, WatermarkRepairArgs};
use vigil_cli::VigilConfig;
use vigil_core::{Root, SignerIdentifier};
use vigil_protection::{Decision, Rejection, SlashingProtection};

fn config_in(dir: &tempfile::TempDir, name: &str) -> VigilConfig {
    let mut config = VigilConfig::default();
    config.slashing_protection.database = dir.path().join(name);
    config
}

fn key(byte: u8) -> SignerIdentifier {
    SignerIdentifier::from_public_key(&[byte; 48])
}

#[tokio::test]
async fn export_then_import_between_databases() {
    let dir = tempfile::tempdir().unwrap();
    let source = config_in(&dir, "source.db");
    let engine = open_protection(&source).unwrap();
    for byte in [1, 2] {
        engine
            .may_sign_block(&key(byte), Root::from([byte; 32]), 10, Root::from([0xaa; 32]))
            .await
            .unwrap();
    }

    let file = dir.path().join("interchange.json");
    let exported = export(
        ExportArgs {
            to: file.clone(),
            pubkeys: vec![key(1).to_prefixed()],
        },
        &source,
    )
    .await
    .unwrap();
    assert_eq!(exported, 1);

    let target = config_in(&dir, "target.db");
    let summary = import(ImportArgs { from: file }, &target).await.unwrap();
    assert_eq!(summary.validators, 1);
    assert_eq!(summary.blocks_imported, 1);

    let engine = open_protection(&target).unwrap();
    assert_matches!(
        engine
            .may_sign_block(&key(1), Root::from([9; 32]), 10, Root::from([0xaa; 32]))
            .await
            .unwrap(),
        Decision::Reject(_)
    );
}

#[tokio::test]
async fn export_rejects_malformed_pubkeys() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, "protection.db");
    let result = export(
        ExportArgs {
            to: dir.path().join("out.json"),
            pubkeys: vec!["0xzz".to_string()],
        },
        &config,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn watermark_repair_raises_and_caps() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, "protection.db");
    let engine = open_protection(&config).unwrap();
    engine.register_validators(&[key(1)]).await.unwrap();

    repair(
        WatermarkRepairArgs {
            slot: Some(100),
            epoch: None,
            set_high_watermark: false,
            remove_high_watermark: false,
        },
        &config,
    )
    .await
    .unwrap();
    assert_matches!(
        engine
            .may_sign_block(&key(1), Root::from([1; 32]), 50, Root::from([0xaa; 32]))
            .await
            .unwrap(),
        Decision::Reject(Rejection::BlockBelowWatermark { .. })
    );

    repair(
        WatermarkRepairArgs {
            slot: Some(500),
            epoch: Some(50),
            set_high_watermark: true,
            remove_high_watermark: false,
        },
        &config,
    )
    .await
    .unwrap();
    assert_eq!(engine.high_watermark().await.unwrap().slot, Some(500));

    repair(
        WatermarkRepairArgs {
            slot: None,
            epoch: None,
            set_high_watermark: false,
            remove_high_watermark: true,
        },
        &config,
    )
    .await
    .unwrap();
    assert!(engine.high_watermark().await.unwrap().is_empty());

    let nothing = WatermarkRepairArgs {
        slot: None,
        epoch: None,
        set_high_watermark: false,
        remove_high_watermark: false,
    };
    assert!(repair(nothing, &config).await.is_err());
}

#[test]
fn run_flags_override_configuration() {
    let mut config = VigilConfig::default();
    let args = RunArgs {
        listen: Some("0.0.0.0:9999".parse().unwrap()),
        no_slashing_protection: true,
        key_manager: true,
        ..RunArgs::default()
    };
    args.apply(&mut config);
    assert_eq!(config.server.listen.port(), 9999);
    assert!(!config.slashing_protection.enabled);
    assert!(config.key_manager.enabled);
    config.validate().unwrap();
}

#[tokio::test]
async fn unreadable_key_directory_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir, "protection.db");
    config.keys.directory = dir.path().join("missing");

    let registry = build_registry(&config, None);
    let err = load_keys(&registry).await.unwrap_err();
    assert!(format!("{err:#}").contains("cannot list key directory"));
    assert!(registry.is_empty());

    config.keys.directory = dir.path().to_path_buf();
    let registry = build_registry(&config, None);
    let report = load_keys(&registry).await.unwrap();
    assert_eq!((report.loaded, report.errors), (0, 0));
}
