// crates/warden-store-sqlite/tests/reconciler_unit.rs
// ============================================================================
// Module: Linkage Reconciler Tests
// Description: Unit and property tests for idempotent linkage reconciliation.
// Purpose: Verify find-or-create idempotence, re-enrollment after
//          termination, reuse audit metadata, and the concurrent-create race.
// Dependencies: warden-store-sqlite, warden-core, tempfile, proptest, serde_json
// ============================================================================

//! Reconciler tests on a temporary `SQLite` database.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::thread;

use proptest::prelude::*;
use tempfile::TempDir;
use warden_core::AuditAction;
use warden_core::DirectoryStore;
use warden_core::IdentityRef;
use warden_core::LinkageKey;
use warden_core::LinkageStatus;
use warden_core::PartyRef;
use warden_core::PrincipalRole;
use warden_core::PrincipalStatus;
use warden_core::ProvisioningStore;
use warden_core::TenantId;
use warden_store_sqlite::SqliteDirectoryStore;
use warden_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn open_store(dir: &TempDir) -> SqliteDirectoryStore {
    let config = SqliteStoreConfig::new(dir.path().join("warden.db"));
    SqliteDirectoryStore::open(config).expect("open store")
}

fn seed_caller(store: &SqliteDirectoryStore, identity: &str) -> TenantId {
    let tenant_id = store.provision_tenant("Acme", "en-US", "USD").expect("provision tenant");
    store
        .provision_principal(
            &IdentityRef::new(identity),
            tenant_id,
            PrincipalRole::TenantMember,
            PrincipalStatus::Active,
            identity,
        )
        .expect("provision principal");
    tenant_id
}

fn sample_key(descriptor: &str) -> LinkageKey {
    LinkageKey::new(PartyRef::new("subject-1"), PartyRef::new("target-1"), descriptor)
}

// ============================================================================
// SECTION: Idempotence
// ============================================================================

#[test]
fn repeated_reconciliation_reuses_the_active_row() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let tenant_id = seed_caller(&store, "p1");
    let identity = IdentityRef::new("p1");
    let key = sample_key("program-x");

    let first = store
        .find_or_create_linkage(&identity, &key, serde_json::json!({"resource": "payout"}))
        .expect("first call");
    assert!(!first.reused);

    let second = store
        .find_or_create_linkage(&identity, &key, serde_json::json!({"resource": "invoice"}))
        .expect("second call");
    assert!(second.reused);
    assert_eq!(second.linkage_id, first.linkage_id);

    let trail = store.audit_records(tenant_id).expect("audit trail");
    let actions: Vec<AuditAction> = trail.iter().map(|record| record.action).collect();
    assert_eq!(actions, vec![AuditAction::Create, AuditAction::Reuse]);
    assert_eq!(trail[0].metadata["consumer"]["resource"], "payout");
    assert_eq!(trail[1].metadata["consumer"]["resource"], "invoice");
}

#[test]
fn distinct_keys_produce_distinct_linkages() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    seed_caller(&store, "p1");
    let identity = IdentityRef::new("p1");

    let first = store
        .find_or_create_linkage(&identity, &sample_key("program-x"), serde_json::Value::Null)
        .expect("first key");
    let second = store
        .find_or_create_linkage(&identity, &sample_key("program-y"), serde_json::Value::Null)
        .expect("second key");
    assert!(!first.reused);
    assert!(!second.reused);
    assert_ne!(first.linkage_id, second.linkage_id);
}

#[test]
fn same_key_in_different_tenants_never_collides() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    seed_caller(&store, "p1");
    let tenant_b = store.provision_tenant("Beta", "en-US", "USD").expect("tenant b");
    store
        .provision_principal(
            &IdentityRef::new("p2"),
            tenant_b,
            PrincipalRole::TenantMember,
            PrincipalStatus::Active,
            "p2",
        )
        .expect("principal b");
    let key = sample_key("shared-descriptor");

    let a = store
        .find_or_create_linkage(&IdentityRef::new("p1"), &key, serde_json::Value::Null)
        .expect("tenant a");
    let b = store
        .find_or_create_linkage(&IdentityRef::new("p2"), &key, serde_json::Value::Null)
        .expect("tenant b");
    assert!(!a.reused);
    assert!(!b.reused);
    assert_ne!(a.linkage_id, b.linkage_id);
}

// ============================================================================
// SECTION: Re-Enrollment
// ============================================================================

#[test]
fn terminated_rows_never_block_re_enrollment() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    seed_caller(&store, "p1");
    let identity = IdentityRef::new("p1");
    let key = sample_key("program-x");

    let first = store
        .find_or_create_linkage(&identity, &key, serde_json::Value::Null)
        .expect("first call");
    store
        .update_linkage_status(&identity, first.linkage_id, LinkageStatus::Cancelled)
        .expect("cancel");

    let second = store
        .find_or_create_linkage(&identity, &key, serde_json::Value::Null)
        .expect("re-enroll");
    assert!(!second.reused);
    assert_ne!(second.linkage_id, first.linkage_id);

    // The cancelled row stays in place as history.
    let cancelled = store.get_linkage(&identity, first.linkage_id).expect("history read");
    assert_eq!(cancelled.status, LinkageStatus::Cancelled);
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

#[test]
fn concurrent_callers_converge_on_one_active_row() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("warden.db");
    let seed = SqliteDirectoryStore::open(SqliteStoreConfig::new(&path)).expect("seed store");
    seed_caller(&seed, "p1");
    drop(seed);

    // Separate handles on the same path coordinate only through SQLite
    // locking and the active-key unique index.
    let handles: Vec<SqliteDirectoryStore> = (0..8)
        .map(|_| {
            SqliteDirectoryStore::open(SqliteStoreConfig::new(&path)).expect("worker store")
        })
        .collect();
    let workers: Vec<_> = handles
        .into_iter()
        .map(|store| {
            thread::spawn(move || {
                store
                    .find_or_create_linkage(
                        &IdentityRef::new("p1"),
                        &sample_key("contended"),
                        serde_json::Value::Null,
                    )
                    .expect("reconcile")
            })
        })
        .collect();
    let outcomes: Vec<_> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker thread"))
        .collect();

    let created = outcomes.iter().filter(|outcome| !outcome.reused).count();
    assert_eq!(created, 1);
    let winner = outcomes[0].linkage_id;
    assert!(outcomes.iter().all(|outcome| outcome.linkage_id == winner));
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Reconciliation is idempotent for any key: calling twice returns the
    /// same linkage and the second call always reuses.
    #[test]
    fn reconciliation_is_idempotent_for_any_key(
        subject in "[a-z]{1,8}",
        target in "[a-z]{1,8}",
        descriptor in "[a-z0-9-]{1,12}",
    ) {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        seed_caller(&store, "p1");
        let identity = IdentityRef::new("p1");
        let key = LinkageKey::new(PartyRef::new(subject), PartyRef::new(target), descriptor);

        let first = store
            .find_or_create_linkage(&identity, &key, serde_json::Value::Null)
            .expect("first call");
        let second = store
            .find_or_create_linkage(&identity, &key, serde_json::Value::Null)
            .expect("second call");
        prop_assert!(!first.reused);
        prop_assert!(second.reused);
        prop_assert_eq!(second.linkage_id, first.linkage_id);
    }
}
