//! Decisions, repair and interchange against a real database file.

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use proptest::prelude::*;
use vigil_core::{Root, SignerIdentifier};
use vigil_protection::{
    Decision, DbSlashingProtection, HighWatermark, Interchange, ProtectionError, Rejection,
    SlashingProtection, StoreConfig,
};

fn root(byte: u8) -> Root {
    Root::from([byte; 32])
}

fn key(byte: u8) -> SignerIdentifier {
    SignerIdentifier::from_public_key(&[byte; 48])
}

const GVR: u8 = 0xaa;

fn open(dir: &tempfile::TempDir) -> DbSlashingProtection {
    DbSlashingProtection::open(&StoreConfig::new(dir.path().join("protection.db"))).unwrap()
}

#[tokio::test]
async fn happy_path_then_stale_block() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);

    let decision = engine
        .may_sign_block(&key(1), root(1), 10, root(GVR))
        .await
        .unwrap();
    assert_eq!(decision, Decision::Accept { record: true });

    let decision = engine
        .may_sign_block(&key(1), root(2), 9, root(GVR))
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Reject(Rejection::BlockBelowWatermark {
            slot: 9,
            watermark: 10
        })
    );
}

#[tokio::test]
async fn identical_block_is_accepted_twice_and_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);

    for _ in 0..2 {
        assert!(engine
            .may_sign_block(&key(1), root(1), 10, root(GVR))
            .await
            .unwrap()
            .is_accept());
    }
    let exported = engine.export(None).await.unwrap();
    assert_eq!(exported.data[0].signed_blocks.len(), 1);

    assert_eq!(
        engine
            .may_sign_block(&key(1), root(2), 10, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(Rejection::DoubleBlockProposal { slot: 10 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conflicting_blocks_accept_at_most_one() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(open(&dir));

    let mut handles = Vec::new();
    for byte in 1..=8u8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .may_sign_block(&key(1), root(byte), 42, root(GVR))
                .await
                .unwrap()
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_accept() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn surround_votes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);

    assert!(engine
        .may_sign_attestation(&key(1), root(1), 2, 5, root(GVR))
        .await
        .unwrap()
        .is_accept());

    // Other keys are independent.
    assert!(engine
        .may_sign_attestation(&key(2), root(2), 3, 4, root(GVR))
        .await
        .unwrap()
        .is_accept());

    assert_matches!(
        engine
            .may_sign_attestation(&key(1), root(3), 3, 4, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(_)
    );
    assert_matches!(
        engine
            .may_sign_attestation(&key(1), root(4), 1, 6, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(_)
    );
    assert_eq!(
        engine
            .may_sign_attestation(&key(1), root(1), 2, 5, root(GVR))
            .await
            .unwrap(),
        Decision::Accept { record: false }
    );
}

#[tokio::test]
async fn genesis_validators_root_is_fixed_by_first_use() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);

    assert!(engine
        .may_sign_block(&key(1), root(1), 1, root(GVR))
        .await
        .unwrap()
        .is_accept());
    assert_eq!(
        engine
            .may_sign_block(&key(1), root(1), 2, root(0xbb))
            .await
            .unwrap(),
        Decision::Reject(Rejection::GenesisValidatorsRootMismatch)
    );
}

#[tokio::test]
async fn disabled_validator_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);

    engine.register_validators(&[key(1)]).await.unwrap();
    assert!(engine.set_enabled(&key(1), false).await.unwrap());
    assert!(!engine.set_enabled(&key(9), false).await.unwrap());

    assert_eq!(
        engine
            .may_sign_block(&key(1), root(1), 1, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(Rejection::ValidatorDisabled)
    );
    engine.set_enabled(&key(1), true).await.unwrap();
    assert!(engine
        .may_sign_block(&key(1), root(1), 1, root(GVR))
        .await
        .unwrap()
        .is_accept());
}

#[tokio::test]
async fn watermark_repair() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);
    engine.register_validators(&[key(1), key(2)]).await.unwrap();

    assert_eq!(
        engine.update_low_watermarks(Some(100), Some(10)).await.unwrap(),
        2
    );
    assert_matches!(
        engine
            .may_sign_block(&key(2), root(1), 99, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(Rejection::BlockBelowWatermark { .. })
    );
    assert_matches!(
        engine.update_low_watermarks(None, None).await,
        Err(ProtectionError::InvalidArgument { .. })
    );

    engine
        .set_high_watermark(HighWatermark {
            slot: Some(200),
            epoch: Some(20),
        })
        .await
        .unwrap();
    assert_matches!(
        engine
            .may_sign_block(&key(1), root(1), 200, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(Rejection::BlockAboveHighWatermark { .. })
    );
    assert!(engine
        .may_sign_block(&key(1), root(1), 199, root(GVR))
        .await
        .unwrap()
        .is_accept());

    engine.remove_high_watermark().await.unwrap();
    assert!(engine.high_watermark().await.unwrap().is_empty());
    assert!(engine
        .may_sign_block(&key(1), root(2), 250, root(GVR))
        .await
        .unwrap()
        .is_accept());
}

#[tokio::test]
async fn export_then_import_into_fresh_database() {
    let source_dir = tempfile::tempdir().unwrap();
    let source = open(&source_dir);
    source
        .may_sign_block(&key(1), root(1), 10, root(GVR))
        .await
        .unwrap();
    source
        .may_sign_attestation(&key(1), root(2), 3, 4, root(GVR))
        .await
        .unwrap();
    source
        .may_sign_block(&key(2), root(3), 11, root(GVR))
        .await
        .unwrap();

    let only_first: BTreeSet<_> = [key(1)].into_iter().collect();
    let exported = source.export(Some(only_first)).await.unwrap();
    assert_eq!(exported.data.len(), 1);
    let json = exported.to_json().unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target = open(&target_dir);
    let summary = target
        .import(Interchange::from_json(&json).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.blocks_imported, 1);
    assert_eq!(summary.attestations_imported, 1);

    // Importing again changes nothing.
    let summary = target.import(exported.clone()).await.unwrap();
    assert_eq!(summary.blocks_imported + summary.attestations_imported, 0);
    assert_eq!(summary.blocks_skipped + summary.attestations_skipped, 2);

    // Imported history protects the key.
    assert_matches!(
        target
            .may_sign_block(&key(1), root(9), 10, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(_)
    );
    assert_matches!(
        target
            .may_sign_attestation(&key(1), root(9), 3, 4, root(GVR))
            .await
            .unwrap(),
        Decision::Reject(_)
    );
}

#[tokio::test]
async fn import_validates_header_and_attestations() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);
    engine
        .may_sign_block(&key(1), root(1), 1, root(GVR))
        .await
        .unwrap();

    let mut document = engine.export(None).await.unwrap();
    document.metadata.interchange_format_version = "4".to_string();
    assert_matches!(
        engine.import(document.clone()).await,
        Err(ProtectionError::Interchange { .. })
    );

    document.metadata.interchange_format_version = "5".to_string();
    document.metadata.genesis_validators_root = root(0xbb);
    assert_matches!(
        engine.import(document.clone()).await,
        Err(ProtectionError::GenesisRootMismatch { .. })
    );

    let json = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{}"}},
            "data":[{{"pubkey":"{}","signed_blocks":[],
                      "signed_attestations":[{{"source_epoch":"7","target_epoch":"6"}}]}}]}}"#,
        root(GVR),
        key(3).to_prefixed()
    );
    assert_matches!(
        engine.import(Interchange::from_json(&json).unwrap()).await,
        Err(ProtectionError::Interchange { .. })
    );
}

#[tokio::test]
async fn export_before_first_signature_has_no_chain() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);
    engine.register_validators(&[key(1)]).await.unwrap();
    assert_matches!(
        engine.export(None).await,
        Err(ProtectionError::MissingGenesisRoot)
    );
}

#[tokio::test]
async fn healthy_database_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();
    assert!(open(&dir).is_healthy().await);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stored_slot_watermark_never_decreases(slots in proptest::collection::vec(0u64..50, 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let engine = open(&dir);
            let mut highest_accepted: Option<u64> = None;
            for (i, slot) in slots.into_iter().enumerate() {
                let decision = engine
                    .may_sign_block(&key(1), root(i as u8), slot, root(GVR))
                    .await
                    .unwrap();
                if decision.is_accept() {
                    if let Some(previous) = highest_accepted {
                        assert!(slot >= previous);
                    }
                    highest_accepted = Some(highest_accepted.map_or(slot, |h| h.max(slot)));
                } else if let Some(previous) = highest_accepted {
                    assert!(slot <= previous);
                }
            }
        });
    }
}
