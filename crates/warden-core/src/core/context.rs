// crates/warden-core/src/core/context.rs
// ============================================================================
// Module: Warden Access Context
// Description: Resolved caller context threaded through every operation.
// Purpose: Carry the (tenant, role) pair for one request explicitly, never
//          through ambient state.
// Dependencies: serde, crate::core
// ============================================================================

//! ## Overview
//! An access context is resolved from a verified identity at the start of
//! each operation and passed by value through the policy layer. Resolution
//! results are scoped to one request/transaction; caching a context across
//! requests would reintroduce the cross-request leakage this design removes.
//!
//! Security posture: an unresolved context fails closed. The only rule that
//! may match without a resolved tenant is the self-access fallback on the
//! caller's own principal record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::directory::PrincipalRole;
use crate::core::identifiers::IdentityRef;
use crate::core::identifiers::PrincipalId;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Resolution Outcomes
// ============================================================================

/// Fully resolved caller context for one operation.
///
/// # Invariants
/// - Values are snapshots taken inside the operation's transaction; holders
///   must not reuse a context beyond that transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Principal acting in this operation.
    pub principal_id: PrincipalId,
    /// Verified identity the context was resolved from.
    pub identity: IdentityRef,
    /// Tenant scope for the operation.
    pub tenant_id: TenantId,
    /// Role of the principal within the tenant.
    pub role: PrincipalRole,
}

impl AccessContext {
    /// Returns `true` when the caller holds the tenant admin role.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, PrincipalRole::TenantAdmin)
    }
}

/// Reason a context could not be resolved.
///
/// # Invariants
/// - Variants are stable for denial labeling and audit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No principal record exists for the identity.
    UnknownPrincipal,
    /// A principal record exists but its status is not `active`.
    InactivePrincipal,
}

impl UnresolvedReason {
    /// Returns a stable label for the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownPrincipal => "unknown_principal",
            Self::InactivePrincipal => "inactive_principal",
        }
    }
}

/// Outcome of resolving a verified identity into an access context.
///
/// # Invariants
/// - `Unresolved` still carries the identity so self-access rules can match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextResolution {
    /// Identity resolved to an active principal.
    Resolved(AccessContext),
    /// Identity did not resolve; operations fail closed except self-access.
    Unresolved {
        /// Identity the resolution was attempted for.
        identity: IdentityRef,
        /// Why resolution failed.
        reason: UnresolvedReason,
    },
}

impl ContextResolution {
    /// Returns the resolved context when available.
    #[must_use]
    pub const fn context(&self) -> Option<&AccessContext> {
        match self {
            Self::Resolved(context) => Some(context),
            Self::Unresolved { .. } => None,
        }
    }

    /// Returns the caller identity regardless of resolution outcome.
    #[must_use]
    pub const fn identity(&self) -> &IdentityRef {
        match self {
            Self::Resolved(context) => &context.identity,
            Self::Unresolved { identity, .. } => identity,
        }
    }

    /// Returns the resolved tenant when available.
    #[must_use]
    pub const fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Resolved(context) => Some(context.tenant_id),
            Self::Unresolved { .. } => None,
        }
    }
}
