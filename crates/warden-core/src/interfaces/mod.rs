// crates/warden-core/src/interfaces/mod.rs
// ============================================================================
// Module: Warden Interfaces
// Description: Backend-agnostic interfaces for directory access, provisioning,
//              and audit delivery.
// Purpose: Define the contract surfaces used by Warden store backends and
//          their consumers.
// Dependencies: thiserror, serde, crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how Warden integrates with a storage backend without
//! embedding backend-specific details. The [`DirectoryStore`] surface is the
//! only path ordinary callers hold; every operation on it resolves the
//! caller's context and enforces the standard policy inside one transaction.
//! The [`ProvisioningStore`] surface is privileged and must never be handed
//! to tenant-scoped callers.
//!
//! Security posture: implementations must fail closed on missing or invalid
//! context and must never reveal cross-tenant existence through error
//! variants.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::audit::AuditRecord;
use crate::core::context::ContextResolution;
use crate::core::directory::Principal;
use crate::core::directory::PrincipalProfile;
use crate::core::directory::PrincipalRole;
use crate::core::directory::PrincipalStatus;
use crate::core::directory::Tenant;
use crate::core::identifiers::DocumentRef;
use crate::core::identifiers::IdentityRef;
use crate::core::identifiers::LinkageId;
use crate::core::identifiers::PrincipalId;
use crate::core::identifiers::TenantId;
use crate::core::linkage::LinkageKey;
use crate::core::linkage::LinkageRecord;
use crate::core::linkage::LinkageStatus;
use crate::core::linkage::ReconcileOutcome;
use crate::core::policy::DenyReason;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Caller-facing error taxonomy for policy-enforced operations.
///
/// # Invariants
/// - `Denied` carries the same reason whether the target row is absent or
///   lives in another tenant.
/// - `Conflict` escapes only when the reconciler's single transparent retry
///   could not observe the winning row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Policy predicate failed; never retried automatically.
    #[error("access denied: {}", .0.as_str())]
    Denied(DenyReason),
    /// A concurrent creator won and its row could not be observed on retry.
    #[error("reconciliation conflict")]
    Conflict,
    /// Datastore unreachable or timed out; safe to retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Invariant violation inside the store; not caller-recoverable.
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Errors surfaced by the privileged provisioning surface.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Database engine error.
    #[error("store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid provisioning input or store data.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Store unreachable or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while appending an audit record.
///
/// # Invariants
/// - Never propagated to the caller of the primary operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// Append failed at the storage layer.
    #[error("audit append failed: {0}")]
    Append(String),
}

// ============================================================================
// SECTION: Directory Store
// ============================================================================

/// Policy-enforced store surface held by ordinary callers.
///
/// Every method takes the caller's verified identity, resolves an access
/// context inside the operation's transaction, and evaluates the standard
/// policy before touching any row. Accepted mutations append exactly one
/// audit record after commit.
pub trait DirectoryStore {
    /// Resolves the caller's context without performing an operation.
    ///
    /// The result is valid only for the duration of the caller's current
    /// request and must not be cached across requests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup itself fails; an unknown or
    /// inactive principal is an `Unresolved` outcome, not an error.
    fn resolve_context(&self, identity: &IdentityRef) -> Result<ContextResolution, StoreError>;

    /// Reads the caller's own tenant record.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] outside the caller's scope.
    fn get_tenant(&self, identity: &IdentityRef) -> Result<Tenant, AccessError>;

    /// Reads one principal within the caller's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] when the row is absent or outside
    /// the caller's scope.
    fn get_principal(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
    ) -> Result<Principal, AccessError>;

    /// Reads the caller's own principal record via the self-access fallback.
    ///
    /// Succeeds even when no tenant context resolves (for example a
    /// suspended principal mid-provisioning reading its own state).
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] when no principal row exists for the
    /// identity.
    fn get_principal_self(&self, identity: &IdentityRef) -> Result<Principal, AccessError>;

    /// Lists the principals of the caller's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] when no context resolves.
    fn list_principals(&self, identity: &IdentityRef) -> Result<Vec<Principal>, AccessError>;

    /// Updates profile fields on a principal.
    ///
    /// Permitted for the principal itself or a same-tenant admin. The
    /// payload cannot express role or tenant changes.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] outside the caller's scope.
    fn update_principal_profile(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
        profile: &PrincipalProfile,
    ) -> Result<Principal, AccessError>;

    /// Reassigns a principal's role.
    ///
    /// Permitted only for a same-tenant admin and never on the caller's own
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] outside the caller's scope.
    fn set_principal_role(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
        role: PrincipalRole,
    ) -> Result<Principal, AccessError>;

    /// Deletes a principal.
    ///
    /// Permitted only for a same-tenant admin and never on the caller's own
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] outside the caller's scope.
    fn delete_principal(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
    ) -> Result<(), AccessError>;

    /// Reads one linkage record within the caller's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] when the row is absent or outside
    /// the caller's scope.
    fn get_linkage(
        &self,
        identity: &IdentityRef,
        linkage_id: LinkageId,
    ) -> Result<LinkageRecord, AccessError>;

    /// Lists the linkage records of the caller's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] when no context resolves.
    fn list_linkages(&self, identity: &IdentityRef) -> Result<Vec<LinkageRecord>, AccessError>;

    /// Finds the active linkage for a key or creates a fresh one.
    ///
    /// Atomic with respect to concurrent callers for the same key: exactly
    /// one caller wins the create path; all others observe the winner's row
    /// with `reused = true`. `consumer` names the downstream resource that
    /// requested the linkage and is recorded in the audit metadata.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] when no context resolves and
    /// [`AccessError::Conflict`] when the post-race retry fails.
    fn find_or_create_linkage(
        &self,
        identity: &IdentityRef,
        key: &LinkageKey,
        consumer: serde_json::Value,
    ) -> Result<ReconcileOutcome, AccessError>;

    /// Transitions a linkage's status.
    ///
    /// Permitted transitions are `active -> completed` and
    /// `active -> cancelled`; reactivation is not a transition (a fresh row
    /// is created through [`Self::find_or_create_linkage`] instead).
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] outside the caller's scope or for an
    /// invalid transition.
    fn update_linkage_status(
        &self,
        identity: &IdentityRef,
        linkage_id: LinkageId,
        status: LinkageStatus,
    ) -> Result<LinkageRecord, AccessError>;

    /// Attaches or clears the document locator on a linkage.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Denied`] outside the caller's scope.
    fn set_linkage_document(
        &self,
        identity: &IdentityRef,
        linkage_id: LinkageId,
        document: Option<DocumentRef>,
    ) -> Result<LinkageRecord, AccessError>;
}

// ============================================================================
// SECTION: Provisioning Store
// ============================================================================

/// Privileged provisioning surface.
///
/// Bypasses the policy layer by design; deployments must gate access to this
/// trait behind their own operator authentication, never hand it to
/// tenant-scoped request handlers.
pub trait ProvisioningStore {
    /// Creates a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    fn provision_tenant(
        &self,
        display_name: &str,
        locale: &str,
        currency: &str,
    ) -> Result<TenantId, StoreError>;

    /// Creates a principal bound to a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the identity is already bound
    /// or the tenant does not exist.
    fn provision_principal(
        &self,
        identity: &IdentityRef,
        tenant_id: TenantId,
        role: PrincipalRole,
        status: PrincipalStatus,
        display_name: &str,
    ) -> Result<PrincipalId, StoreError>;

    /// Sets a principal's lifecycle status (operator path).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the principal does not exist.
    fn set_principal_status(
        &self,
        principal_id: PrincipalId,
        status: PrincipalStatus,
    ) -> Result<(), StoreError>;

    /// Removes a tenant and cascades to its principals and linkages.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the tenant does not exist.
    fn remove_tenant(&self, tenant_id: TenantId) -> Result<(), StoreError>;

    /// Reads the audit trail for one tenant (operator path).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn audit_records(&self, tenant_id: TenantId) -> Result<Vec<AuditRecord>, StoreError>;
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Append-only sink for accepted-mutation audit records.
pub trait AuditSink {
    /// Appends one audit record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the append fails; callers report the
    /// failure to the operational sink and continue.
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

// ============================================================================
// SECTION: Operational Event Sink
// ============================================================================

/// Operational error channel for failures that must not reach callers.
pub trait OpsEventSink: Send + Sync {
    /// Reports an audit append failure for the given record.
    fn audit_append_failed(&self, record: &AuditRecord, error: &AuditError);
}

/// No-op operational sink.
///
/// # Invariants
/// - Events are intentionally discarded.
pub struct NoopOpsEventSink;

impl OpsEventSink for NoopOpsEventSink {
    fn audit_append_failed(&self, _record: &AuditRecord, _error: &AuditError) {}
}
