// crates/warden-core/src/core/directory.rs
// ============================================================================
// Module: Warden Directory Model
// Description: Tenant and principal entity records for the directory stores.
// Purpose: Define tenant-scoped directory entities and their lifecycle labels.
// Dependencies: serde, crate::core::identifiers
// ============================================================================

//! ## Overview
//! The tenant directory is the root of isolation; the principal directory
//! binds every authenticated actor to exactly one tenant and one role.
//! Records here are plain data carriers; all scoping decisions happen in the
//! policy layer, and all persistence happens behind the store interfaces.
//!
//! Security posture: a principal's `tenant_id` is immutable after creation
//! and its `role` can only change through the admin-gated role operation;
//! no update payload in this module can express either change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::IdentityRef;
use crate::core::identifiers::PrincipalId;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Tenant
// ============================================================================

/// Tenant record; one isolated customer organization.
///
/// # Invariants
/// - Never created, structurally updated, or deleted through the policy
///   layer; provisioning and cascade removal are privileged operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: TenantId,
    /// Human-readable display name.
    pub display_name: String,
    /// Locale tag for tenant-facing formatting (for example `en-GB`).
    pub locale: String,
    /// ISO 4217 currency code used by tenant-facing amounts.
    pub currency: String,
}

// ============================================================================
// SECTION: Principal Role and Status
// ============================================================================

/// Role granted to a principal within its tenant.
///
/// # Invariants
/// - Variants are stable for serialization and policy matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalRole {
    /// May manage principals within the same tenant.
    TenantAdmin,
    /// May act on tenant data but not on other principals.
    TenantMember,
}

impl PrincipalRole {
    /// Returns a stable label for the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TenantAdmin => "tenant_admin",
            Self::TenantMember => "tenant_member",
        }
    }

    /// Parses a stable label back into a role.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "tenant_admin" => Some(Self::TenantAdmin),
            "tenant_member" => Some(Self::TenantMember),
            _ => None,
        }
    }
}

/// Lifecycle status of a principal.
///
/// # Invariants
/// - Only `Active` principals resolve an access context.
/// - Variants are stable for serialization and policy matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalStatus {
    /// Principal may resolve a context and act.
    Active,
    /// Principal is provisioned but not yet (or no longer) enabled.
    Inactive,
    /// Principal is administratively suspended.
    Suspended,
}

impl PrincipalStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    /// Parses a stable label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Principal
// ============================================================================

/// Principal record; one authenticated actor bound to exactly one tenant.
///
/// # Invariants
/// - `identity` is unique across the deployment and verified externally.
/// - `tenant_id` is immutable after creation.
/// - `role` changes only through the admin-gated role operation, never
///   through a self profile update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub id: PrincipalId,
    /// Verified identity reference from the external identity provider.
    pub identity: IdentityRef,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Role within the tenant.
    pub role: PrincipalRole,
    /// Lifecycle status.
    pub status: PrincipalStatus,
    /// Human-readable display name.
    pub display_name: String,
    /// Optional contact address (mail or phone; not interpreted).
    pub contact: Option<String>,
}

/// Profile fields a principal may change about itself.
///
/// # Invariants
/// - Deliberately excludes `tenant_id`, `role`, and `status` so a self
///   update cannot express a privilege change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalProfile {
    /// New display name, when set.
    pub display_name: Option<String>,
    /// New contact address, when set (`Some(None)` clears it).
    pub contact: Option<Option<String>>,
}

impl PrincipalProfile {
    /// Returns `true` when the update carries no field changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.contact.is_none()
    }
}
