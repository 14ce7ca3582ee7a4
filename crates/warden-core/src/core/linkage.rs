// crates/warden-core/src/core/linkage.rs
// ============================================================================
// Module: Warden Linkage Model
// Description: Tenant-scoped linkage records and their status machine.
// Purpose: Define the linkage key, record, status transitions, and
//          reconciliation outcome used by the linkage reconciler.
// Dependencies: serde, crate::core::identifiers
// ============================================================================

//! ## Overview
//! A linkage record joins two external parties under one tenant with a
//! descriptor (for example an enrollment joining a subject to a target under
//! a program name). The reconciler guarantees at most one `active` row per
//! (tenant, subject, target, descriptor) key; terminated rows never block a
//! fresh active row for the same key.
//!
//! Linkage rows are never physically deleted. History stays linear: a
//! terminated row is never flipped back to `active`; re-enrollment always
//! creates a fresh row through the reconciler.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DocumentRef;
use crate::core::identifiers::LinkageId;
use crate::core::identifiers::PartyRef;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Linkage Status
// ============================================================================

/// Lifecycle status of a linkage record.
///
/// # Invariants
/// - `Active` is the only status participating in key uniqueness.
/// - Variants are stable for serialization and storage labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkageStatus {
    /// Linkage is in force and reusable by downstream consumers.
    Active,
    /// Linkage ran to completion.
    Completed,
    /// Linkage was cancelled before completion.
    Cancelled,
}

impl LinkageStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a stable label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns `true` when a direct transition to `next` is permitted.
    ///
    /// Only `active -> completed` and `active -> cancelled` are valid.
    /// Reactivation of a terminated row is not a transition; it is a fresh
    /// row created by the reconciler.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next), (Self::Active, Self::Completed | Self::Cancelled))
    }

    /// Returns `true` when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

// ============================================================================
// SECTION: Linkage Key and Record
// ============================================================================

/// Reconciliation key identifying one logical linkage within a tenant.
///
/// # Invariants
/// - Uniqueness applies only among rows with status `active`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkageKey {
    /// First linked party (for example the enrolled subject).
    pub subject: PartyRef,
    /// Second linked party (for example the target organization).
    pub target: PartyRef,
    /// Descriptor qualifying the relationship (for example a program name).
    pub descriptor: String,
}

impl LinkageKey {
    /// Creates a new linkage key.
    #[must_use]
    pub fn new(subject: PartyRef, target: PartyRef, descriptor: impl Into<String>) -> Self {
        Self {
            subject,
            target,
            descriptor: descriptor.into(),
        }
    }
}

/// Persisted linkage record.
///
/// # Invariants
/// - `tenant_id` scopes every read and write of the record.
/// - `document` is an opaque locator gated by the same tenant predicate as
///   the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkageRecord {
    /// Linkage identifier.
    pub id: LinkageId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Reconciliation key.
    pub key: LinkageKey,
    /// Lifecycle status.
    pub status: LinkageStatus,
    /// Optional attached-document locator.
    pub document: Option<DocumentRef>,
}

// ============================================================================
// SECTION: Reconciliation Outcome
// ============================================================================

/// Result of a `find_or_create` reconciliation.
///
/// # Invariants
/// - `linkage_id` always refers to an `active` row at the time the
///   reconciling transaction committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Identifier of the active linkage for the requested key.
    pub linkage_id: LinkageId,
    /// `true` when an existing active row was returned instead of a new one.
    pub reused: bool,
}
