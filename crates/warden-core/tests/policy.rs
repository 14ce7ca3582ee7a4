// crates/warden-core/tests/policy.rs
// ============================================================================
// Module: Policy Predicate Tests
// Description: Validate the standard isolation policy table.
// Purpose: Ensure predicate evaluation and SQL compilation fail closed and
//          enforce tenant, self, and role boundaries deterministically.
// Dependencies: warden-core
// ============================================================================

//! Predicate-table tests for the standard Warden isolation policy.

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

use warden_core::AccessContext;
use warden_core::ContextResolution;
use warden_core::Decision;
use warden_core::DenyReason;
use warden_core::EntityKind;
use warden_core::FilterColumns;
use warden_core::IdentityRef;
use warden_core::LinkageStatus;
use warden_core::OperationClass;
use warden_core::PolicySet;
use warden_core::PrincipalId;
use warden_core::PrincipalRole;
use warden_core::RowScope;
use warden_core::SqlArg;
use warden_core::TenantId;
use warden_core::UnresolvedReason;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn tenant(raw: u64) -> TenantId {
    TenantId::from_raw(raw).expect("nonzero tenant id")
}

fn resolved(tenant_raw: u64, role: PrincipalRole, identity: &str) -> ContextResolution {
    ContextResolution::Resolved(AccessContext {
        principal_id: PrincipalId::from_raw(7).expect("nonzero principal id"),
        identity: IdentityRef::new(identity),
        tenant_id: tenant(tenant_raw),
        role,
    })
}

fn unresolved(identity: &str) -> ContextResolution {
    ContextResolution::Unresolved {
        identity: IdentityRef::new(identity),
        reason: UnresolvedReason::UnknownPrincipal,
    }
}

fn principal_row(tenant_raw: u64, identity: &str) -> RowScope {
    RowScope::principal(tenant(tenant_raw), IdentityRef::new(identity))
}

// ============================================================================
// SECTION: Tenant Rules
// ============================================================================

#[test]
fn tenant_read_allows_own_tenant_only() {
    let policies = PolicySet::standard();
    let caller = resolved(1, PrincipalRole::TenantMember, "alice");
    let own = RowScope::tenant(tenant(1));
    let other = RowScope::tenant(tenant(2));
    assert_eq!(
        policies.evaluate(EntityKind::Tenant, OperationClass::Read, &caller, &own),
        Decision::Allow
    );
    assert_eq!(
        policies.evaluate(EntityKind::Tenant, OperationClass::Read, &caller, &other),
        Decision::Deny(DenyReason::OutOfScope)
    );
}

#[test]
fn tenant_mutation_is_always_denied() {
    let policies = PolicySet::standard();
    let admin = resolved(1, PrincipalRole::TenantAdmin, "alice");
    let own = RowScope::tenant(tenant(1));
    for operation in [OperationClass::Update, OperationClass::Delete, OperationClass::Create] {
        assert_eq!(
            policies.evaluate(EntityKind::Tenant, operation, &admin, &own),
            Decision::Deny(DenyReason::OperationForbidden)
        );
    }
}

// ============================================================================
// SECTION: Principal Rules
// ============================================================================

#[test]
fn principal_read_allows_same_tenant_and_self() {
    let policies = PolicySet::standard();
    let caller = resolved(1, PrincipalRole::TenantMember, "alice");
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Read,
            &caller,
            &principal_row(1, "bob")
        ),
        Decision::Allow
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Read,
            &caller,
            &principal_row(2, "carol")
        ),
        Decision::Deny(DenyReason::OutOfScope)
    );
}

#[test]
fn principal_self_read_works_without_context() {
    let policies = PolicySet::standard();
    let caller = unresolved("alice");
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Read,
            &caller,
            &principal_row(1, "alice")
        ),
        Decision::Allow
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Read,
            &caller,
            &principal_row(1, "bob")
        ),
        Decision::Deny(DenyReason::NoContext)
    );
}

#[test]
fn principal_update_allows_self_and_same_tenant_admin() {
    let policies = PolicySet::standard();
    let member = resolved(1, PrincipalRole::TenantMember, "alice");
    let admin = resolved(1, PrincipalRole::TenantAdmin, "root");
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Update,
            &member,
            &principal_row(1, "alice")
        ),
        Decision::Allow
    );
    // A member cannot update another principal's profile.
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Update,
            &member,
            &principal_row(1, "bob")
        ),
        Decision::Deny(DenyReason::RoleForbidden)
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Update,
            &admin,
            &principal_row(1, "bob")
        ),
        Decision::Allow
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Update,
            &admin,
            &principal_row(2, "carol")
        ),
        Decision::Deny(DenyReason::OutOfScope)
    );
}

#[test]
fn principal_role_change_requires_admin_and_denies_self() {
    let policies = PolicySet::standard();
    let member = resolved(1, PrincipalRole::TenantMember, "alice");
    let admin = resolved(1, PrincipalRole::TenantAdmin, "root");
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::UpdateRole,
            &member,
            &principal_row(1, "alice")
        ),
        Decision::Deny(DenyReason::RoleForbidden)
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::UpdateRole,
            &admin,
            &principal_row(1, "bob")
        ),
        Decision::Allow
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::UpdateRole,
            &admin,
            &principal_row(1, "root")
        ),
        Decision::Deny(DenyReason::SelfOperationForbidden)
    );
}

#[test]
fn principal_delete_requires_admin_and_denies_self() {
    let policies = PolicySet::standard();
    let admin = resolved(1, PrincipalRole::TenantAdmin, "root");
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Delete,
            &admin,
            &principal_row(1, "bob")
        ),
        Decision::Allow
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Delete,
            &admin,
            &principal_row(1, "root")
        ),
        Decision::Deny(DenyReason::SelfOperationForbidden)
    );
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Delete,
            &admin,
            &principal_row(2, "carol")
        ),
        Decision::Deny(DenyReason::OutOfScope)
    );
}

#[test]
fn principal_create_is_denied_through_the_policy_layer() {
    let policies = PolicySet::standard();
    let admin = resolved(1, PrincipalRole::TenantAdmin, "root");
    assert_eq!(
        policies.evaluate(
            EntityKind::Principal,
            OperationClass::Create,
            &admin,
            &principal_row(1, "bob")
        ),
        Decision::Deny(DenyReason::OperationForbidden)
    );
}

// ============================================================================
// SECTION: Linkage Rules
// ============================================================================

#[test]
fn linkage_access_is_tenant_scoped() {
    let policies = PolicySet::standard();
    let caller = resolved(1, PrincipalRole::TenantMember, "alice");
    let own = RowScope::tenant(tenant(1));
    let other = RowScope::tenant(tenant(2));
    for operation in [OperationClass::Read, OperationClass::Update, OperationClass::Create] {
        assert_eq!(
            policies.evaluate(EntityKind::Linkage, operation, &caller, &own),
            Decision::Allow
        );
        assert_eq!(
            policies.evaluate(EntityKind::Linkage, operation, &caller, &other),
            Decision::Deny(DenyReason::OutOfScope)
        );
    }
}

#[test]
fn linkage_rows_are_never_deleted() {
    let policies = PolicySet::standard();
    let admin = resolved(1, PrincipalRole::TenantAdmin, "root");
    assert_eq!(
        policies.evaluate(
            EntityKind::Linkage,
            OperationClass::Delete,
            &admin,
            &RowScope::tenant(tenant(1))
        ),
        Decision::Deny(DenyReason::OperationForbidden)
    );
}

#[test]
fn unresolved_context_fails_closed_on_linkages() {
    let policies = PolicySet::standard();
    let caller = unresolved("ghost");
    assert_eq!(
        policies.evaluate(
            EntityKind::Linkage,
            OperationClass::Read,
            &caller,
            &RowScope::tenant(tenant(1))
        ),
        Decision::Deny(DenyReason::NoContext)
    );
}

// ============================================================================
// SECTION: Filter Compilation
// ============================================================================

#[test]
fn principal_read_filter_compiles_tenant_and_self_groups() {
    let policies = PolicySet::standard();
    let caller = resolved(1, PrincipalRole::TenantMember, "alice");
    let columns = FilterColumns {
        tenant: "tenant_id",
        identity: Some("identity"),
    };
    let filter = policies
        .predicate(EntityKind::Principal, OperationClass::Read)
        .compile(&caller, &columns)
        .expect("viable filter");
    assert_eq!(filter.clause, "(tenant_id = ?) OR (identity = ?)");
    assert_eq!(filter.args, vec![SqlArg::Int(1), SqlArg::Text("alice".to_string())]);
}

#[test]
fn principal_read_filter_keeps_self_group_without_context() {
    let policies = PolicySet::standard();
    let caller = unresolved("alice");
    let columns = FilterColumns {
        tenant: "tenant_id",
        identity: Some("identity"),
    };
    let filter = policies
        .predicate(EntityKind::Principal, OperationClass::Read)
        .compile(&caller, &columns)
        .expect("self group survives");
    assert_eq!(filter.clause, "(identity = ?)");
    assert_eq!(filter.args, vec![SqlArg::Text("alice".to_string())]);
}

#[test]
fn linkage_read_filter_is_unviable_without_context() {
    let policies = PolicySet::standard();
    let caller = unresolved("ghost");
    let columns = FilterColumns {
        tenant: "tenant_id",
        identity: None,
    };
    assert!(
        policies
            .predicate(EntityKind::Linkage, OperationClass::Read)
            .compile(&caller, &columns)
            .is_none()
    );
}

// ============================================================================
// SECTION: Linkage Status Machine
// ============================================================================

#[test]
fn linkage_status_transitions_are_linear() {
    assert!(LinkageStatus::Active.can_transition_to(LinkageStatus::Completed));
    assert!(LinkageStatus::Active.can_transition_to(LinkageStatus::Cancelled));
    assert!(!LinkageStatus::Cancelled.can_transition_to(LinkageStatus::Active));
    assert!(!LinkageStatus::Completed.can_transition_to(LinkageStatus::Active));
    assert!(!LinkageStatus::Cancelled.can_transition_to(LinkageStatus::Completed));
    assert!(!LinkageStatus::Active.can_transition_to(LinkageStatus::Active));
}
