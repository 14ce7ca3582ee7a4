// crates/warden-core/src/core/audit.rs
// ============================================================================
// Module: Warden Audit Model
// Description: Append-only audit records for accepted mutations.
// Purpose: Capture actor, tenant, entity, action, and before/after snapshots
//          for every state change accepted by the policy layer.
// Dependencies: serde, serde_json, crate::core
// ============================================================================

//! ## Overview
//! Every accepted mutation produces exactly one audit record. Records are
//! appended after the mutating transaction commits and before the result is
//! returned; an append failure is reported to the operational event sink and
//! never rolls back or fails the primary operation. No update or delete path
//! exists for audit rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::PrincipalId;
use crate::core::identifiers::TenantId;
use crate::core::policy::EntityKind;

// ============================================================================
// SECTION: Timestamps
// ============================================================================

/// Wall-clock timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Supplied by the store at append time; the core never reads a clock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Audit Actions
// ============================================================================

/// Action label for an audit record.
///
/// # Invariants
/// - Variants are stable for serialization and trail queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Row created.
    Create,
    /// Row fields updated.
    Update,
    /// Row status transitioned.
    StatusChange,
    /// Row deleted.
    Delete,
    /// Existing active linkage returned to a linking consumer.
    Reuse,
}

impl AuditAction {
    /// Returns a stable label for the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::StatusChange => "status_change",
            Self::Delete => "delete",
            Self::Reuse => "reuse",
        }
    }

    /// Parses a stable label back into an action.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "status_change" => Some(Self::StatusChange),
            "delete" => Some(Self::Delete),
            "reuse" => Some(Self::Reuse),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Entity References
// ============================================================================

/// Reference to the entity an audit record describes.
///
/// # Invariants
/// - `id` is the entity's own identifier rendered as a string; it is not
///   interpreted beyond display and trail queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity identifier rendered as a string.
    pub id: String,
}

impl EntityRef {
    /// Creates an entity reference.
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

// ============================================================================
// SECTION: Audit Records
// ============================================================================

/// One append-only audit record.
///
/// # Invariants
/// - Never mutated or deleted after append.
/// - `old` is `None` for creations; `new` is `None` for deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Principal that performed the action.
    pub actor: PrincipalId,
    /// Tenant scope of the action.
    pub tenant_id: TenantId,
    /// Entity the action applied to.
    pub entity: EntityRef,
    /// Action performed.
    pub action: AuditAction,
    /// Snapshot of the row before the action, when one existed.
    pub old: Option<serde_json::Value>,
    /// Snapshot of the row after the action, when one remains.
    pub new: Option<serde_json::Value>,
    /// Append timestamp.
    pub recorded_at: Timestamp,
    /// Free-form metadata (for example the linking consumer on a reuse).
    pub metadata: serde_json::Value,
}
