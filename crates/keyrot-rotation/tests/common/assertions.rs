//! Assertion helpers for rotation outcomes

#![allow(dead_code)]

use super::fixtures::Sandbox;
use keyrot_core::ErrorKind;
use keyrot_rotation::{RotationResult, StoreOutcome};
use std::collections::BTreeMap;

/// Assert the rotation succeeded, printing its errors otherwise
pub fn assert_rotated(result: &RotationResult) {
    assert!(
        result.success,
        "rotation unexpectedly failed: {:?}",
        result.errors
    );
    assert!(result.errors.is_empty());
    assert!(result
        .per_store_status
        .values()
        .all(|s| *s == StoreOutcome::Done));
}

/// Assert the rotation failed with `kind` as its first error
pub fn assert_failed_with(result: &RotationResult, kind: ErrorKind) {
    assert!(!result.success, "rotation unexpectedly succeeded");
    let first = result.errors.first().expect("failed rotation reports an error");
    assert_eq!(first.kind, kind, "unexpected first error: {:?}", first);
}

/// Assert the sandbox is back in its pre-rotation state
pub fn assert_restored(
    sandbox: &Sandbox,
    stores: &BTreeMap<String, Vec<u8>>,
    keyring: &BTreeMap<String, Vec<u8>>,
) {
    assert_eq!(&sandbox.snapshot_stores(), stores, "store bytes changed");
    assert_eq!(&sandbox.snapshot_keyring(), keyring, "keyring changed");
    assert!(!sandbox.config.staging_dir().exists());
    assert!(!sandbox.config.session_marker_path().exists());
}
