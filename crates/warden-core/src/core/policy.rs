// crates/warden-core/src/core/policy.rs
// ============================================================================
// Module: Warden Policy Predicates
// Description: First-class scope predicates evaluated by the enforcement layer.
// Purpose: Encode the tenant isolation table as composable predicate objects
//          that both evaluate in-process and compile to storage filters.
// Dependencies: serde, crate::core
// ============================================================================

//! ## Overview
//! Isolation rules are first-class predicate objects rather than declarative
//! per-table clauses. Each (entity kind, operation class) pair maps to one
//! [`Predicate`]: an OR of AND-groups over a small set of [`ScopeRule`]
//! atoms (tenant match, self match, admin role, not-self). Predicates are
//! evaluated uniformly for row-level checks and compiled to parameterized
//! SQL filter fragments for list/lookup queries, so no query path can skip
//! enforcement.
//!
//! Security posture: evaluation fails closed. An unresolved context denies
//! with `no_context` unless a self-match group applies, and denial reasons
//! never distinguish "exists in another tenant" from "does not exist".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::context::AccessContext;
use crate::core::context::ContextResolution;
use crate::core::identifiers::IdentityRef;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Entity and Operation Classes
// ============================================================================

/// Tenant-scoped entity kinds governed by the policy layer.
///
/// # Invariants
/// - Variants are stable for policy lookup and audit labeling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Tenant directory record.
    Tenant,
    /// Principal directory record.
    Principal,
    /// Linkage record.
    Linkage,
}

impl EntityKind {
    /// Returns a stable label for the entity kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Principal => "principal",
            Self::Linkage => "linkage",
        }
    }

    /// Parses a stable label back into an entity kind.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "tenant" => Some(Self::Tenant),
            "principal" => Some(Self::Principal),
            "linkage" => Some(Self::Linkage),
            _ => None,
        }
    }
}

/// Operation classes evaluated against a predicate.
///
/// # Invariants
/// - `UpdateRole` is distinct from `Update` because the role field carries
///   its own gating (admin-only, never self).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Row read or list.
    Read,
    /// Non-privileged field update (profile fields, status transitions).
    Update,
    /// Role reassignment on a principal.
    UpdateRole,
    /// Row deletion.
    Delete,
    /// Row creation.
    Create,
}

impl OperationClass {
    /// Returns a stable label for the operation class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::UpdateRole => "update_role",
            Self::Delete => "delete",
            Self::Create => "create",
        }
    }
}

// ============================================================================
// SECTION: Row Scope
// ============================================================================

/// Scope attributes of the row an operation targets.
///
/// # Invariants
/// - `tenant_id` is `None` only for rows outside tenant scoping (never the
///   case for the entities governed here; callers populate it from the row).
/// - `identity` is present only for principal rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowScope {
    /// Tenant owning the row.
    pub tenant_id: Option<TenantId>,
    /// Identity bound to the row, for self-match rules.
    pub identity: Option<IdentityRef>,
}

impl RowScope {
    /// Scope for a tenant-owned row without an identity binding.
    #[must_use]
    pub const fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            identity: None,
        }
    }

    /// Scope for a principal row.
    #[must_use]
    pub const fn principal(tenant_id: TenantId, identity: IdentityRef) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            identity: Some(identity),
        }
    }
}

// ============================================================================
// SECTION: Denial Reasons and Decisions
// ============================================================================

/// Reason attached to a policy denial.
///
/// # Invariants
/// - `OutOfScope` covers both "row in another tenant" and "row absent" so
///   denials never reveal cross-tenant existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No context could be resolved and no self-access rule matched.
    NoContext,
    /// Row is outside the caller's authorized scope (or does not exist).
    OutOfScope,
    /// Operation requires the tenant admin role.
    RoleForbidden,
    /// Operation may not target the caller's own record.
    SelfOperationForbidden,
    /// Operation class is never permitted through this layer.
    OperationForbidden,
    /// Underlying datastore failed transiently; no policy state was applied.
    TransientFailure,
}

impl DenyReason {
    /// Returns a stable label for the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoContext => "no_context",
            Self::OutOfScope => "out_of_scope",
            Self::RoleForbidden => "role_forbidden",
            Self::SelfOperationForbidden => "self_operation_forbidden",
            Self::OperationForbidden => "operation_forbidden",
            Self::TransientFailure => "transient_failure",
        }
    }
}

/// Outcome of evaluating a predicate against one row scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Operation is permitted.
    Allow,
    /// Operation is denied with a stable reason.
    Deny(DenyReason),
}

impl Decision {
    /// Returns `true` when the decision permits the operation.
    #[must_use]
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }
}

// ============================================================================
// SECTION: Scope Rules
// ============================================================================

/// Atomic scope rule; AND-composed within a group, OR-composed across groups.
///
/// # Invariants
/// - Atoms are deliberately limited to tenant-match, self-match, and
///   role-gated forms; this is not a general policy language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeRule {
    /// Row tenant equals the resolved context tenant.
    TenantMatch,
    /// Row identity equals the caller identity (works without a context).
    SelfMatch,
    /// Caller holds the tenant admin role.
    AdminRole,
    /// Row identity differs from the caller identity.
    NotSelf,
}

impl ScopeRule {
    /// Evaluates the atom for one caller/row pair.
    fn matches(self, resolution: &ContextResolution, row: &RowScope) -> bool {
        match self {
            Self::TenantMatch => match (resolution.tenant_id(), row.tenant_id) {
                (Some(context_tenant), Some(row_tenant)) => context_tenant == row_tenant,
                _ => false,
            },
            Self::SelfMatch => {
                row.identity.as_ref().is_some_and(|identity| identity == resolution.identity())
            }
            Self::AdminRole => resolution.context().is_some_and(AccessContext::is_admin),
            Self::NotSelf => {
                row.identity.as_ref().is_none_or(|identity| identity != resolution.identity())
            }
        }
    }

    /// Returns the denial reason attributed to this atom failing.
    const fn deny_reason(self, resolved: bool) -> DenyReason {
        match self {
            Self::TenantMatch if !resolved => DenyReason::NoContext,
            Self::TenantMatch | Self::SelfMatch => DenyReason::OutOfScope,
            Self::AdminRole => DenyReason::RoleForbidden,
            Self::NotSelf => DenyReason::SelfOperationForbidden,
        }
    }
}

// ============================================================================
// SECTION: Predicates
// ============================================================================

/// Composable predicate: OR across groups, AND within each group.
///
/// # Invariants
/// - An empty group list denies everything (the fail-closed default).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    /// OR-composed AND-groups of scope rules.
    groups: Vec<Vec<ScopeRule>>,
}

impl Predicate {
    /// Builds a predicate from OR-composed AND-groups.
    #[must_use]
    pub const fn any_of(groups: Vec<Vec<ScopeRule>>) -> Self {
        Self { groups }
    }

    /// Builds the always-deny predicate.
    #[must_use]
    pub const fn deny() -> Self {
        Self { groups: Vec::new() }
    }

    /// Evaluates the predicate for one caller/row pair.
    ///
    /// Returns `Allow` when any group matches fully. On denial, the reason
    /// comes from the failing atom of the group that made the most progress,
    /// which keeps reasons deterministic for identical inputs.
    #[must_use]
    pub fn evaluate(&self, resolution: &ContextResolution, row: &RowScope) -> Decision {
        if self.groups.is_empty() {
            return Decision::Deny(DenyReason::OperationForbidden);
        }
        let resolved = resolution.context().is_some();
        let mut best_progress: Option<(usize, DenyReason)> = None;
        for group in &self.groups {
            let mut satisfied = 0_usize;
            let mut failure: Option<DenyReason> = None;
            for rule in group {
                if rule.matches(resolution, row) {
                    satisfied += 1;
                } else {
                    failure = Some(rule.deny_reason(resolved));
                    break;
                }
            }
            match failure {
                None => return Decision::Allow,
                Some(reason) => {
                    let replace = best_progress.is_none_or(|(progress, _)| satisfied > progress);
                    if replace {
                        best_progress = Some((satisfied, reason));
                    }
                }
            }
        }
        match best_progress {
            Some((_, reason)) => Decision::Deny(reason),
            None => Decision::Deny(DenyReason::OperationForbidden),
        }
    }

    /// Compiles the predicate into a SQL filter for read/list queries.
    ///
    /// Groups that cannot match under the given resolution (unresolved
    /// tenant, missing admin role, no identity column) are dropped. Returns
    /// `None` when no group survives, in which case the caller must treat
    /// the query as matching nothing.
    #[must_use]
    pub fn compile(
        &self,
        resolution: &ContextResolution,
        columns: &FilterColumns,
    ) -> Option<SqlFilter> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<SqlArg> = Vec::new();
        for group in &self.groups {
            let mut group_clauses: Vec<String> = Vec::new();
            let mut group_args: Vec<SqlArg> = Vec::new();
            let mut viable = true;
            for rule in group {
                match rule {
                    ScopeRule::TenantMatch => match resolution.tenant_id() {
                        Some(tenant_id) => {
                            group_clauses.push(format!("{} = ?", columns.tenant));
                            group_args.push(SqlArg::Int(tenant_id.get().cast_signed()));
                        }
                        None => {
                            viable = false;
                            break;
                        }
                    },
                    ScopeRule::SelfMatch => match columns.identity {
                        Some(identity_column) => {
                            group_clauses.push(format!("{identity_column} = ?"));
                            group_args
                                .push(SqlArg::Text(resolution.identity().as_str().to_string()));
                        }
                        None => {
                            viable = false;
                            break;
                        }
                    },
                    ScopeRule::AdminRole => {
                        if !resolution.context().is_some_and(AccessContext::is_admin) {
                            viable = false;
                            break;
                        }
                        // Satisfied by the caller, not by row data; no clause.
                    }
                    ScopeRule::NotSelf => match columns.identity {
                        Some(identity_column) => {
                            group_clauses.push(format!("{identity_column} <> ?"));
                            group_args
                                .push(SqlArg::Text(resolution.identity().as_str().to_string()));
                        }
                        None => {
                            viable = false;
                            break;
                        }
                    },
                }
            }
            if !viable {
                continue;
            }
            if group_clauses.is_empty() {
                // A group with no row constraints matches every row.
                return Some(SqlFilter {
                    clause: "1 = 1".to_string(),
                    args: Vec::new(),
                });
            }
            clauses.push(format!("({})", group_clauses.join(" AND ")));
            args.extend(group_args);
        }
        if clauses.is_empty() {
            return None;
        }
        Some(SqlFilter {
            clause: clauses.join(" OR "),
            args,
        })
    }
}

// ============================================================================
// SECTION: SQL Filter Compilation
// ============================================================================

/// Column names a predicate compiles against for one relation.
///
/// # Invariants
/// - `identity` is `None` for relations without an identity binding; any
///   self-match group is dropped for such relations.
#[derive(Debug, Clone, Copy)]
pub struct FilterColumns {
    /// Tenant id column name.
    pub tenant: &'static str,
    /// Identity column name, when the relation has one.
    pub identity: Option<&'static str>,
}

/// Parameter value for a compiled filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// Integer parameter.
    Int(i64),
    /// Text parameter.
    Text(String),
}

/// Compiled, parameterized filter fragment for one relation.
///
/// # Invariants
/// - `clause` references only the columns named in [`FilterColumns`] and
///   contains one `?` placeholder per entry in `args`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    /// WHERE-clause fragment (without the `WHERE` keyword).
    pub clause: String,
    /// Positional parameters for the fragment.
    pub args: Vec<SqlArg>,
}

// ============================================================================
// SECTION: Policy Set
// ============================================================================

/// Immutable mapping from (entity kind, operation class) to a predicate.
///
/// # Invariants
/// - Lookup for an unmapped pair yields the always-deny predicate.
#[derive(Debug, Clone)]
pub struct PolicySet {
    /// Predicate table.
    table: BTreeMap<(EntityKind, OperationClass), Predicate>,
    /// Fail-closed default returned for unmapped pairs.
    deny_all: Predicate,
}

impl PolicySet {
    /// Builds the standard Warden isolation policy.
    ///
    /// Encodes: tenant rows readable only within scope and never mutable;
    /// principal rows readable within scope or via self-access, profile
    /// updates by self or a same-tenant admin, role changes and deletions
    /// by a same-tenant admin never targeting itself, creation denied;
    /// linkage rows readable/writable within scope and never deleted.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            (EntityKind::Tenant, OperationClass::Read),
            Predicate::any_of(vec![vec![ScopeRule::TenantMatch]]),
        );
        table.insert(
            (EntityKind::Principal, OperationClass::Read),
            Predicate::any_of(vec![vec![ScopeRule::TenantMatch], vec![ScopeRule::SelfMatch]]),
        );
        table.insert(
            (EntityKind::Principal, OperationClass::Update),
            Predicate::any_of(vec![
                vec![ScopeRule::AdminRole, ScopeRule::TenantMatch],
                vec![ScopeRule::SelfMatch],
            ]),
        );
        table.insert(
            (EntityKind::Principal, OperationClass::UpdateRole),
            Predicate::any_of(vec![vec![
                ScopeRule::AdminRole,
                ScopeRule::TenantMatch,
                ScopeRule::NotSelf,
            ]]),
        );
        table.insert(
            (EntityKind::Principal, OperationClass::Delete),
            Predicate::any_of(vec![vec![
                ScopeRule::AdminRole,
                ScopeRule::TenantMatch,
                ScopeRule::NotSelf,
            ]]),
        );
        table.insert(
            (EntityKind::Linkage, OperationClass::Read),
            Predicate::any_of(vec![vec![ScopeRule::TenantMatch]]),
        );
        table.insert(
            (EntityKind::Linkage, OperationClass::Update),
            Predicate::any_of(vec![vec![ScopeRule::TenantMatch]]),
        );
        table.insert(
            (EntityKind::Linkage, OperationClass::Create),
            Predicate::any_of(vec![vec![ScopeRule::TenantMatch]]),
        );
        Self {
            table,
            deny_all: Predicate::deny(),
        }
    }

    /// Returns the predicate for one (entity kind, operation class) pair.
    #[must_use]
    pub fn predicate(&self, entity: EntityKind, operation: OperationClass) -> &Predicate {
        self.table.get(&(entity, operation)).unwrap_or(&self.deny_all)
    }

    /// Evaluates the predicate for one operation against one row scope.
    #[must_use]
    pub fn evaluate(
        &self,
        entity: EntityKind,
        operation: OperationClass,
        resolution: &ContextResolution,
        row: &RowScope,
    ) -> Decision {
        self.predicate(entity, operation).evaluate(resolution, row)
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::standard()
    }
}
