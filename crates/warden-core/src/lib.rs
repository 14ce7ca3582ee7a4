// crates/warden-core/src/lib.rs
// ============================================================================
// Module: Warden Core
// Description: Tenant isolation model, policy predicates, audit contract, and
//              backend-agnostic store interfaces.
// Purpose: Provide the correctness-critical core shared by every Warden
//          deployment surface.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Warden guarantees that every read and write of tenant-scoped data is
//! constrained to the caller's tenant, that privilege escalation is
//! impossible even through ad-hoc query paths, and that every accepted
//! mutation leaves exactly one audit record. The crate is split into a pure
//! model layer ([`core`]) and the contract surfaces backends implement
//! ([`interfaces`]).
//!
//! Security posture: all enforcement fails closed; see the policy module
//! for the predicate table.

/// Core model: identifiers, entities, context, policy, audit.
pub mod core;
/// Backend-agnostic store and sink interfaces.
pub mod interfaces;

pub use crate::core::audit::AuditAction;
pub use crate::core::audit::AuditRecord;
pub use crate::core::audit::EntityRef;
pub use crate::core::audit::Timestamp;
pub use crate::core::context::AccessContext;
pub use crate::core::context::ContextResolution;
pub use crate::core::context::UnresolvedReason;
pub use crate::core::directory::Principal;
pub use crate::core::directory::PrincipalProfile;
pub use crate::core::directory::PrincipalRole;
pub use crate::core::directory::PrincipalStatus;
pub use crate::core::directory::Tenant;
pub use crate::core::identifiers::DocumentRef;
pub use crate::core::identifiers::IdentityRef;
pub use crate::core::identifiers::LinkageId;
pub use crate::core::identifiers::PartyRef;
pub use crate::core::identifiers::PrincipalId;
pub use crate::core::identifiers::TenantId;
pub use crate::core::linkage::LinkageKey;
pub use crate::core::linkage::LinkageRecord;
pub use crate::core::linkage::LinkageStatus;
pub use crate::core::linkage::ReconcileOutcome;
pub use crate::core::policy::Decision;
pub use crate::core::policy::DenyReason;
pub use crate::core::policy::EntityKind;
pub use crate::core::policy::FilterColumns;
pub use crate::core::policy::OperationClass;
pub use crate::core::policy::PolicySet;
pub use crate::core::policy::Predicate;
pub use crate::core::policy::RowScope;
pub use crate::core::policy::ScopeRule;
pub use crate::core::policy::SqlArg;
pub use crate::core::policy::SqlFilter;
pub use crate::interfaces::AccessError;
pub use crate::interfaces::AuditError;
pub use crate::interfaces::AuditSink;
pub use crate::interfaces::DirectoryStore;
pub use crate::interfaces::NoopOpsEventSink;
pub use crate::interfaces::OpsEventSink;
pub use crate::interfaces::ProvisioningStore;
pub use crate::interfaces::StoreError;
