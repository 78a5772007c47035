//! End-to-end rotation tests
//!
//! Covers the successful path, failures during re-encryption and after
//! activation, structured stores, shared recipients and parallel workers.

mod common;

use common::*;
use keyrot_backup::Backup;
use keyrot_core::ErrorKind;
use keyrot_rotation::{JournalEvent, Journal, Phase, StoreOutcome};
use keyrot_secrets::{
    find_temp_files, read_identity_file, AgeCrypto, CreationRule, Identity, RecipientMap,
    SecretStore,
};
use std::fs;
use std::sync::Arc;

#[tokio::test]
async fn test_single_store_rotation() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"secretA");
    let original = sandbox.snapshot_stores();
    let policy_before = fs::read(sandbox.config.policy_path()).unwrap();
    let old = sandbox.recipient();

    let result = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&result);
    assert_eq!(result.canary.as_deref(), Some("a.age"));

    let new_recipient = result.new_recipient.clone().unwrap();
    assert_ne!(new_recipient, old);

    let active = sandbox.active_identity();
    assert_eq!(active.to_public(), new_recipient);
    assert_eq!(sandbox.open_store("a.age", &active), blob(b"secretA"));

    let store = SecretStore::inspect(&sandbox.config.store_dir, &sandbox.store_path("a.age")).unwrap();
    assert!(store.open(&AgeCrypto, &sandbox.identity).is_err());

    let backup = Backup::open(result.backup_path.as_deref().unwrap()).unwrap();
    backup.verify().unwrap();
    assert_eq!(backup.identity().unwrap().to_public(), old);
    assert_eq!(
        fs::read(backup.artifact_path(&backup.manifest.policy)).unwrap(),
        policy_before
    );
    let entry = backup.manifest.store("a.age").unwrap();
    assert_eq!(
        fs::read(backup.artifact_path(&entry.artifact)).unwrap(),
        original["a.age"]
    );

    let previous = read_identity_file(&sandbox.config.previous_identity_path()).unwrap();
    assert_eq!(previous.to_public(), old);

    let policy = RecipientMap::load(&sandbox.config.policy_path()).unwrap();
    assert!(policy.contains(&new_recipient));
    assert!(!policy.contains(&old));

    assert!(!sandbox.config.session_marker_path().exists());
    assert!(!sandbox.config.staging_dir().exists());
}

#[tokio::test]
async fn test_corrupt_store_rolls_back_earlier_stores() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"secretA");
    sandbox.write_corrupt("b.age");
    let stores = sandbox.snapshot_stores();
    let keyring = sandbox.snapshot_keyring();

    let result = sandbox.engine().rotate().await.unwrap();

    assert_failed_with(&result, ErrorKind::Crypto);
    assert_eq!(result.errors[0].store.as_deref(), Some("b.age"));
    assert_eq!(result.per_store_status["a.age"], StoreOutcome::RolledBack);
    assert_eq!(result.per_store_status["b.age"], StoreOutcome::Failed);

    assert_restored(&sandbox, &stores, &keyring);
    assert_eq!(sandbox.active_identity().to_public(), sandbox.recipient());
    assert_eq!(sandbox.open_store("a.age", &sandbox.identity), blob(b"secretA"));
    assert!(result.backup_path.unwrap().exists());
}

#[tokio::test]
async fn test_truncated_structured_store_rolls_back() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"secretA");
    sandbox.write_structured("b.enc.yaml", &[("DB_PASSWORD", "pw")]);
    sandbox.truncate("b.enc.yaml");
    let stores = sandbox.snapshot_stores();
    let keyring = sandbox.snapshot_keyring();

    let result = sandbox.engine().rotate().await.unwrap();

    assert_failed_with(&result, ErrorKind::Crypto);
    assert_eq!(result.errors[0].store.as_deref(), Some("b.enc.yaml"));
    assert_eq!(result.per_store_status["a.age"], StoreOutcome::RolledBack);
    assert_eq!(result.per_store_status["b.enc.yaml"], StoreOutcome::Failed);
    assert_restored(&sandbox, &stores, &keyring);
}

#[tokio::test]
async fn test_keypair_failure_leaves_only_the_backup() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"secretA");
    sandbox.write_structured("b.enc.yaml", &[("K", "v")]);
    let stores = sandbox.snapshot_stores();
    let keyring = sandbox.snapshot_keyring();

    let crypto = Arc::new(FaultyCrypto::new().fail_generate());
    let result = sandbox.engine_with(crypto.clone()).rotate().await.unwrap();

    assert_failed_with(&result, ErrorKind::Crypto);
    assert_eq!(result.errors[0].stage, Phase::BackedUp.to_string());
    assert_eq!(result.errors.len(), 1);
    assert!(result.new_recipient.is_none());
    assert_eq!(crypto.generate_calls(), 1);
    assert_eq!(crypto.encrypt_calls(), 0);
    assert_eq!(crypto.decrypt_calls(), 0);

    assert_restored(&sandbox, &stores, &keyring);
    assert!(!sandbox.config.previous_dir().exists());
    assert_eq!(sandbox.backup_count(), 1);
    let backup = Backup::open(result.backup_path.as_deref().unwrap()).unwrap();
    backup.verify().unwrap();
    assert_eq!(backup.manifest.stores.len(), 2);
}

#[tokio::test]
async fn test_canary_failure_reverts_activation() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"secretA");
    let stores = sandbox.snapshot_stores();
    let keyring = sandbox.snapshot_keyring();

    // Decrypt calls: old key, write verification, then the canary
    let crypto = Arc::new(FaultyCrypto::new().fail_decrypt_on(3));
    let result = sandbox.engine_with(crypto.clone()).rotate().await.unwrap();

    assert_failed_with(&result, ErrorKind::Validation);
    assert_eq!(result.errors[0].stage, Phase::Activated.to_string());
    assert_eq!(result.per_store_status["a.age"], StoreOutcome::RolledBack);
    assert_eq!(crypto.decrypt_calls(), 3);

    assert_restored(&sandbox, &stores, &keyring);
    assert_eq!(sandbox.active_identity().to_public(), sandbox.recipient());
    assert!(!sandbox.config.previous_dir().exists());
}

#[tokio::test]
async fn test_no_mixed_key_state_after_encrypt_failure() {
    let sandbox = Sandbox::new();
    for name in ["a.age", "b.age", "c.age", "d.age"] {
        sandbox.write_blob(name, name.as_bytes());
    }
    let stores = sandbox.snapshot_stores();
    let keyring = sandbox.snapshot_keyring();

    let crypto = Arc::new(FaultyCrypto::new().fail_encrypt_on(3));
    let result = sandbox.engine_with(crypto).rotate().await.unwrap();

    assert_failed_with(&result, ErrorKind::Crypto);
    assert_eq!(result.errors[0].store.as_deref(), Some("c.age"));
    assert_eq!(
        result.stores_with(StoreOutcome::RolledBack),
        vec!["a.age", "b.age"]
    );
    assert_eq!(result.stores_with(StoreOutcome::Pending), vec!["d.age"]);

    assert_restored(&sandbox, &stores, &keyring);
    assert!(find_temp_files(&sandbox.config).is_empty());
}

#[tokio::test]
async fn test_structured_store_rotation() {
    let sandbox = Sandbox::new();
    sandbox.write_structured("app/db.enc.yaml", &[("user", "admin"), ("password", "hunter2")]);
    sandbox.write_blob("app/tls.age", &vec![7u8; 2 * 1024 * 1024]);

    let result = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&result);

    let active = sandbox.active_identity();
    assert_eq!(
        sandbox.open_store("app/db.enc.yaml", &active),
        keyrot_secrets::Plaintext::Entries(entries(&[("user", "admin"), ("password", "hunter2")]))
    );
    assert_eq!(
        sandbox.open_store("app/tls.age", &active),
        blob(&vec![7u8; 2 * 1024 * 1024])
    );

    let store =
        SecretStore::inspect(&sandbox.config.store_dir, &sandbox.store_path("app/db.enc.yaml"))
            .unwrap();
    assert!(store.current_recipients.contains(&active.to_public()));
    assert!(!store.current_recipients.contains(&sandbox.recipient()));

    let yaml = fs::read_to_string(sandbox.store_path("app/db.enc.yaml")).unwrap();
    assert!(yaml.contains("password"));
    assert!(!yaml.contains("hunter2"));
}

#[tokio::test]
async fn test_shared_rule_keeps_co_recipients() {
    let sandbox = Sandbox::new();
    let teammate = Identity::generate();
    RecipientMap {
        creation_rules: vec![
            CreationRule {
                path_regex: "^shared/".to_string(),
                recipients: vec![sandbox.recipient(), teammate.to_public()],
            },
            CreationRule {
                path_regex: ".*".to_string(),
                recipients: vec![sandbox.recipient()],
            },
        ],
    }
    .save(&sandbox.config.policy_path())
    .unwrap();

    sandbox.write_blob("shared/team.age", b"team secret");
    sandbox.write_blob("solo.age", b"solo secret");

    let result = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&result);

    let active = sandbox.active_identity();
    assert_eq!(sandbox.open_store("shared/team.age", &active), blob(b"team secret"));
    assert_eq!(sandbox.open_store("shared/team.age", &teammate), blob(b"team secret"));
    assert_eq!(sandbox.open_store("solo.age", &active), blob(b"solo secret"));

    let store = SecretStore::inspect(&sandbox.config.store_dir, &sandbox.store_path("solo.age"))
        .unwrap();
    assert!(store.open(&AgeCrypto, &teammate).is_err());

    let policy = RecipientMap::load(&sandbox.config.policy_path()).unwrap();
    assert_eq!(
        policy.creation_rules[0].recipients,
        vec![active.to_public(), teammate.to_public()]
    );
}

#[tokio::test]
async fn test_journal_records_every_transition() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"a");
    sandbox.write_blob("b.age", b"b");

    let result = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&result);

    let entries = Journal::new(sandbox.config.journal_path())
        .entries_for(&result.session_id)
        .unwrap();
    let phases: Vec<Phase> = entries
        .iter()
        .filter_map(|e| match &e.event {
            JournalEvent::Phase { phase } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            Phase::BackedUp,
            Phase::KeyGenerated,
            Phase::PolicyStaged,
            Phase::Reencrypting,
            Phase::Activated,
            Phase::Validated,
        ]
    );
    let stores = entries
        .iter()
        .filter(|e| matches!(e.event, JournalEvent::Store { .. }))
        .count();
    assert_eq!(stores, 2);
    assert_eq!(entries.last().unwrap().event, JournalEvent::Completed);
}

#[tokio::test]
async fn test_second_rotation_replaces_previous_slot() {
    let sandbox = Sandbox::new();
    sandbox.write_blob("a.age", b"secretA");

    let first = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&first);
    let second = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&second);

    let previous = read_identity_file(&sandbox.config.previous_identity_path()).unwrap();
    assert_eq!(Some(previous.to_public()), first.new_recipient);
    assert_eq!(
        Some(sandbox.active_identity().to_public()),
        second.new_recipient
    );
    assert_eq!(sandbox.backup_count(), 2);
}

#[tokio::test]
async fn test_parallel_rotation() {
    let sandbox = Sandbox::new().with_parallelism(4);
    for i in 0..10 {
        sandbox.write_blob(&format!("svc/{:02}.age", i), format!("secret-{}", i).as_bytes());
    }

    let result = sandbox.engine().rotate().await.unwrap();
    assert_rotated(&result);
    assert_eq!(result.per_store_status.len(), 10);

    let active = sandbox.active_identity();
    for i in 0..10 {
        assert_eq!(
            sandbox.open_store(&format!("svc/{:02}.age", i), &active),
            blob(format!("secret-{}", i).as_bytes())
        );
    }
}

#[tokio::test]
async fn test_parallel_failure_restores_everything() {
    let sandbox = Sandbox::new().with_parallelism(4);
    for i in 0..10 {
        sandbox.write_blob(&format!("svc/{:02}.age", i), format!("secret-{}", i).as_bytes());
    }
    sandbox.write_corrupt("svc/05-broken.age");
    let stores = sandbox.snapshot_stores();
    let keyring = sandbox.snapshot_keyring();

    let result = sandbox.engine().rotate().await.unwrap();

    assert_failed_with(&result, ErrorKind::Crypto);
    assert_eq!(result.errors[0].store.as_deref(), Some("svc/05-broken.age"));
    assert!(result.stores_with(StoreOutcome::Done).is_empty());
    assert_restored(&sandbox, &stores, &keyring);
    assert!(find_temp_files(&sandbox.config).is_empty());
}
