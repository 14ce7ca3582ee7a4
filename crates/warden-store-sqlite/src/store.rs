// crates/warden-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Directory Store
// Description: Policy-enforced tenant/principal/linkage store on SQLite WAL.
// Purpose: Resolve caller context, enforce scope predicates, reconcile
//          linkages, and append audit records against one relational store.
// Dependencies: warden-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the policy-enforced [`DirectoryStore`] and the
//! privileged [`ProvisioningStore`] on a single `SQLite` database. Context
//! resolution, predicate evaluation, and the guarded mutation all execute
//! inside one transaction so the resolved tenant cannot change between check
//! and use. Audit records are appended after the mutating transaction
//! commits; an append failure is routed to the operational sink and never
//! fails the primary operation.
//!
//! The linkage reconciler runs its read-check-then-write sequence in one
//! IMMEDIATE transaction. A partial unique index over the active key is the
//! backstop for races between separate store handles; a constraint collision
//! triggers exactly one transparent re-read of the winning row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::ToSql;
use rusqlite::types::ToSqlOutput;
use serde::Deserialize;
use thiserror::Error;
use warden_core::AccessContext;
use warden_core::AccessError;
use warden_core::AuditAction;
use warden_core::AuditError;
use warden_core::AuditRecord;
use warden_core::AuditSink;
use warden_core::ContextResolution;
use warden_core::Decision;
use warden_core::DenyReason;
use warden_core::DirectoryStore;
use warden_core::DocumentRef;
use warden_core::EntityKind;
use warden_core::EntityRef;
use warden_core::FilterColumns;
use warden_core::IdentityRef;
use warden_core::LinkageId;
use warden_core::LinkageKey;
use warden_core::LinkageRecord;
use warden_core::LinkageStatus;
use warden_core::NoopOpsEventSink;
use warden_core::OperationClass;
use warden_core::OpsEventSink;
use warden_core::PartyRef;
use warden_core::PolicySet;
use warden_core::Principal;
use warden_core::PrincipalId;
use warden_core::PrincipalProfile;
use warden_core::PrincipalRole;
use warden_core::PrincipalStatus;
use warden_core::ProvisioningStore;
use warden_core::ReconcileOutcome;
use warden_core::RowScope;
use warden_core::SqlArg;
use warden_core::StoreError;
use warden_core::Tenant;
use warden_core::TenantId;
use warden_core::Timestamp;
use warden_core::UnresolvedReason;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Column list selected for principal rows.
const PRINCIPAL_COLUMNS: &str = "id, identity, tenant_id, role, status, display_name, contact";
/// Column list selected for linkage rows.
const LINKAGE_COLUMNS: &str = "id, tenant_id, subject, target, descriptor, status, document_ref";
/// Filter columns for the tenants relation.
const TENANT_FILTER: FilterColumns = FilterColumns {
    tenant: "id",
    identity: None,
};
/// Filter columns for the principals relation.
const PRINCIPAL_FILTER: FilterColumns = FilterColumns {
    tenant: "tenant_id",
    identity: Some("identity"),
};
/// Filter columns for the linkages relation.
const LINKAGE_FILTER: FilterColumns = FilterColumns {
    tenant: "tenant_id",
    identity: None,
};

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` directory store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding row payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store busy or unreachable; the caller may retry with backoff.
    #[error("sqlite store unavailable: {0}")]
    Unavailable(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Unavailable(message) => Self::Unavailable(message),
        }
    }
}

impl From<SqliteStoreError> for AccessError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Unavailable(message) => Self::Unavailable(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Maps a `rusqlite` error into a store error, classifying busy/locked
/// conditions as retryable.
fn db_error(error: &rusqlite::Error) -> SqliteStoreError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SqliteStoreError::Unavailable(error.to_string())
        }
        _ => SqliteStoreError::Db(error.to_string()),
    }
}

/// Returns `true` when the error is a uniqueness/constraint collision.
fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(error.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
}

// ============================================================================
// SECTION: Identifier Conversion
// ============================================================================

/// Converts a stored rowid into a tenant identifier.
fn tenant_id_from_db(raw: i64) -> Result<TenantId, SqliteStoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(TenantId::from_raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid tenant id: {raw}")))
}

/// Converts a stored rowid into a principal identifier.
fn principal_id_from_db(raw: i64) -> Result<PrincipalId, SqliteStoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(PrincipalId::from_raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid principal id: {raw}")))
}

/// Converts a stored rowid into a linkage identifier.
fn linkage_id_from_db(raw: i64) -> Result<LinkageId, SqliteStoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(LinkageId::from_raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid linkage id: {raw}")))
}

/// Converts a numeric identifier into a SQL parameter value.
fn id_param(raw: u64) -> i64 {
    raw.cast_signed()
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Raw principal row as stored.
struct RawPrincipal {
    /// Rowid.
    id: i64,
    /// Identity string.
    identity: String,
    /// Owning tenant rowid.
    tenant_id: i64,
    /// Role label.
    role: String,
    /// Status label.
    status: String,
    /// Display name.
    display_name: String,
    /// Optional contact.
    contact: Option<String>,
}

/// Decodes one principal row from a query result.
fn read_principal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPrincipal> {
    Ok(RawPrincipal {
        id: row.get(0)?,
        identity: row.get(1)?,
        tenant_id: row.get(2)?,
        role: row.get(3)?,
        status: row.get(4)?,
        display_name: row.get(5)?,
        contact: row.get(6)?,
    })
}

/// Converts a raw principal row into the core entity.
fn principal_from_raw(raw: RawPrincipal) -> Result<Principal, SqliteStoreError> {
    let role = PrincipalRole::parse(&raw.role)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid principal role: {}", raw.role)))?;
    let status = PrincipalStatus::parse(&raw.status).ok_or_else(|| {
        SqliteStoreError::Invalid(format!("invalid principal status: {}", raw.status))
    })?;
    Ok(Principal {
        id: principal_id_from_db(raw.id)?,
        identity: IdentityRef::new(raw.identity),
        tenant_id: tenant_id_from_db(raw.tenant_id)?,
        role,
        status,
        display_name: raw.display_name,
        contact: raw.contact,
    })
}

/// Raw linkage row as stored.
struct RawLinkage {
    /// Rowid.
    id: i64,
    /// Owning tenant rowid.
    tenant_id: i64,
    /// Subject party reference.
    subject: String,
    /// Target party reference.
    target: String,
    /// Descriptor.
    descriptor: String,
    /// Status label.
    status: String,
    /// Optional document locator.
    document_ref: Option<String>,
}

/// Decodes one linkage row from a query result.
fn read_linkage_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLinkage> {
    Ok(RawLinkage {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        subject: row.get(2)?,
        target: row.get(3)?,
        descriptor: row.get(4)?,
        status: row.get(5)?,
        document_ref: row.get(6)?,
    })
}

/// Converts a raw linkage row into the core entity.
fn linkage_from_raw(raw: RawLinkage) -> Result<LinkageRecord, SqliteStoreError> {
    let status = LinkageStatus::parse(&raw.status).ok_or_else(|| {
        SqliteStoreError::Invalid(format!("invalid linkage status: {}", raw.status))
    })?;
    Ok(LinkageRecord {
        id: linkage_id_from_db(raw.id)?,
        tenant_id: tenant_id_from_db(raw.tenant_id)?,
        key: LinkageKey::new(PartyRef::new(raw.subject), PartyRef::new(raw.target), raw.descriptor),
        status,
        document: raw.document_ref.map(DocumentRef::new),
    })
}

// ============================================================================
// SECTION: Filter Binding
// ============================================================================

/// Binds one compiled filter argument to a SQL parameter.
struct FilterArg<'a>(&'a SqlArg);

impl ToSql for FilterArg<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self.0 {
            SqlArg::Int(value) => Ok(ToSqlOutput::from(*value)),
            SqlArg::Text(value) => Ok(ToSqlOutput::from(value.as_str())),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed, policy-enforced directory store.
///
/// # Invariants
/// - Context resolution and predicate evaluation for one operation execute
///   in the same transaction as the guarded query or mutation.
/// - Connection access is serialized through a mutex; clones share one
///   connection. Separate handles opened on the same path coordinate
///   through `SQLite` locking and the active-key unique index.
#[derive(Clone)]
pub struct SqliteDirectoryStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
    /// Standard isolation policy.
    policies: PolicySet,
    /// Operational error channel for audit append failures.
    ops_sink: Arc<dyn OpsEventSink>,
}

impl SqliteDirectoryStore {
    /// Opens (or creates) the store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// its schema version is unsupported.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        Self::open_with_ops_sink(config, Arc::new(NoopOpsEventSink))
    }

    /// Opens the store with a caller-supplied operational sink.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// its schema version is unsupported.
    pub fn open_with_ops_sink(
        config: SqliteStoreConfig,
        ops_sink: Arc<dyn OpsEventSink>,
    ) -> Result<Self, SqliteStoreError> {
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
            policies: PolicySet::standard(),
            ops_sink,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Acquires the connection guard.
    fn lock_connection(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("connection mutex poisoned".to_string()))
    }

    /// Appends an audit record, routing failures to the operational sink.
    fn append_audit(&self, record: AuditRecord) {
        if let Err(error) = AuditSink::record(self, &record) {
            self.ops_sink.audit_append_failed(&record, &error);
        }
    }

    /// Builds an audit record for an accepted mutation.
    fn audit_event(
        actor: PrincipalId,
        tenant_id: TenantId,
        entity: EntityRef,
        action: AuditAction,
        old: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
        metadata: serde_json::Value,
    ) -> AuditRecord {
        AuditRecord {
            actor,
            tenant_id,
            entity,
            action,
            old,
            new,
            recorded_at: Timestamp::from_unix_millis(now_millis()),
            metadata,
        }
    }
}

// ============================================================================
// SECTION: Context Resolution
// ============================================================================

/// Resolves a verified identity inside the operation's transaction.
///
/// Returns `Unresolved` for unknown identities and for principals whose
/// status is not `active`; the lookup itself failing is a store error.
fn resolve_in_tx(
    tx: &Transaction<'_>,
    identity: &IdentityRef,
) -> Result<ContextResolution, SqliteStoreError> {
    let row = tx
        .query_row(
            "SELECT id, tenant_id, role, status FROM principals WHERE identity = ?1",
            params![identity.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    let Some((principal_id, tenant_id, role, status)) = row else {
        return Ok(ContextResolution::Unresolved {
            identity: identity.clone(),
            reason: UnresolvedReason::UnknownPrincipal,
        });
    };
    let status = PrincipalStatus::parse(&status)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid principal status: {status}")))?;
    if status != PrincipalStatus::Active {
        return Ok(ContextResolution::Unresolved {
            identity: identity.clone(),
            reason: UnresolvedReason::InactivePrincipal,
        });
    }
    let role = PrincipalRole::parse(&role)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid principal role: {role}")))?;
    Ok(ContextResolution::Resolved(AccessContext {
        principal_id: principal_id_from_db(principal_id)?,
        identity: identity.clone(),
        tenant_id: tenant_id_from_db(tenant_id)?,
        role,
    }))
}

/// Denial reason when no compiled filter group is viable for the caller.
fn unviable_deny_reason(resolution: &ContextResolution) -> DenyReason {
    if resolution.context().is_none() {
        DenyReason::NoContext
    } else {
        DenyReason::OutOfScope
    }
}

/// Converts a policy decision into an operation outcome.
fn require_allow(decision: Decision) -> Result<(), AccessError> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(AccessError::Denied(reason)),
    }
}

/// Audit actor for an accepted mutation: the resolved principal, or the
/// target principal itself on the self-access path.
fn audit_actor(resolution: &ContextResolution, self_target: PrincipalId) -> PrincipalId {
    resolution.context().map_or(self_target, |context| context.principal_id)
}

/// Current wall-clock time in unix milliseconds.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

/// Serializes an entity snapshot for an audit record.
fn snapshot<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// SECTION: Row Lookups
// ============================================================================

/// Fetches one principal row by id, without policy filtering.
///
/// Callers must evaluate the policy against the returned row before using
/// it; absence and out-of-scope are reported identically to callers.
fn principal_by_id(
    tx: &Transaction<'_>,
    principal_id: PrincipalId,
) -> Result<Option<Principal>, SqliteStoreError> {
    let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = ?1");
    let raw = tx
        .query_row(&sql, params![id_param(principal_id.get())], read_principal_row)
        .optional()
        .map_err(|err| db_error(&err))?;
    raw.map(principal_from_raw).transpose()
}

/// Fetches one principal row by identity, without policy filtering.
fn principal_by_identity(
    tx: &Transaction<'_>,
    identity: &IdentityRef,
) -> Result<Option<Principal>, SqliteStoreError> {
    let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE identity = ?1");
    let raw = tx
        .query_row(&sql, params![identity.as_str()], read_principal_row)
        .optional()
        .map_err(|err| db_error(&err))?;
    raw.map(principal_from_raw).transpose()
}

/// Fetches one linkage row by id, without policy filtering.
fn linkage_by_id(
    tx: &Transaction<'_>,
    linkage_id: LinkageId,
) -> Result<Option<LinkageRecord>, SqliteStoreError> {
    let sql = format!("SELECT {LINKAGE_COLUMNS} FROM linkages WHERE id = ?1");
    let raw = tx
        .query_row(&sql, params![id_param(linkage_id.get())], read_linkage_row)
        .optional()
        .map_err(|err| db_error(&err))?;
    raw.map(linkage_from_raw).transpose()
}

/// Fetches the active linkage row for one key within a tenant.
fn active_linkage_by_key(
    tx: &Transaction<'_>,
    tenant_id: TenantId,
    key: &LinkageKey,
) -> Result<Option<LinkageRecord>, SqliteStoreError> {
    let sql = format!(
        "SELECT {LINKAGE_COLUMNS} FROM linkages
         WHERE tenant_id = ?1 AND subject = ?2 AND target = ?3 AND descriptor = ?4
           AND status = 'active'"
    );
    let raw = tx
        .query_row(
            &sql,
            params![
                id_param(tenant_id.get()),
                key.subject.as_str(),
                key.target.as_str(),
                key.descriptor
            ],
            read_linkage_row,
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    raw.map(linkage_from_raw).transpose()
}

/// Row scope for a principal row.
fn principal_scope(principal: &Principal) -> RowScope {
    RowScope::principal(principal.tenant_id, principal.identity.clone())
}

/// Row scope for a linkage row.
fn linkage_scope(linkage: &LinkageRecord) -> RowScope {
    RowScope::tenant(linkage.tenant_id)
}

/// Row scope standing in for an absent row.
///
/// Evaluating the predicate against an empty scope yields the same denial a
/// cross-tenant row yields, so callers cannot probe for existence.
const fn absent_scope() -> RowScope {
    RowScope {
        tenant_id: None,
        identity: None,
    }
}

// ============================================================================
// SECTION: Directory Store Implementation
// ============================================================================

impl DirectoryStore for SqliteDirectoryStore {
    fn resolve_context(&self, identity: &IdentityRef) -> Result<ContextResolution, StoreError> {
        let mut guard = self.lock_connection().map_err(StoreError::from)?;
        let tx = guard.transaction().map_err(|err| StoreError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(resolution)
    }

    fn get_tenant(&self, identity: &IdentityRef) -> Result<Tenant, AccessError> {
        let mut guard = self.lock_connection()?;
        let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        let predicate = self.policies.predicate(EntityKind::Tenant, OperationClass::Read);
        let Some(filter) = predicate.compile(&resolution, &TENANT_FILTER) else {
            return Err(AccessError::Denied(unviable_deny_reason(&resolution)));
        };
        let sql = format!(
            "SELECT id, display_name, locale, currency FROM tenants WHERE {}",
            filter.clause
        );
        let row = tx
            .query_row(&sql, params_from_iter(filter.args.iter().map(FilterArg)), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()
            .map_err(|err| AccessError::from(db_error(&err)))?;
        let Some((id, display_name, locale, currency)) = row else {
            // A resolved context always references an existing tenant row.
            return Err(AccessError::Internal("tenant row missing for resolved context".to_string()));
        };
        Ok(Tenant {
            id: tenant_id_from_db(id)?,
            display_name,
            locale,
            currency,
        })
    }

    fn get_principal(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
    ) -> Result<Principal, AccessError> {
        let mut guard = self.lock_connection()?;
        let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        let principal = principal_by_id(&tx, principal_id)?;
        let scope = principal.as_ref().map_or_else(absent_scope, principal_scope);
        require_allow(self.policies.evaluate(
            EntityKind::Principal,
            OperationClass::Read,
            &resolution,
            &scope,
        ))?;
        principal.ok_or(AccessError::Denied(DenyReason::OutOfScope))
    }

    fn get_principal_self(&self, identity: &IdentityRef) -> Result<Principal, AccessError> {
        let mut guard = self.lock_connection()?;
        let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        let principal = principal_by_identity(&tx, identity)?;
        let scope = principal.as_ref().map_or_else(absent_scope, principal_scope);
        require_allow(self.policies.evaluate(
            EntityKind::Principal,
            OperationClass::Read,
            &resolution,
            &scope,
        ))?;
        principal.ok_or(AccessError::Denied(DenyReason::OutOfScope))
    }

    fn list_principals(&self, identity: &IdentityRef) -> Result<Vec<Principal>, AccessError> {
        let mut guard = self.lock_connection()?;
        let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        let predicate = self.policies.predicate(EntityKind::Principal, OperationClass::Read);
        let Some(filter) = predicate.compile(&resolution, &PRINCIPAL_FILTER) else {
            return Err(AccessError::Denied(unviable_deny_reason(&resolution)));
        };
        let sql = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE {} ORDER BY id",
            filter.clause
        );
        let mut statement = tx.prepare(&sql).map_err(|err| AccessError::from(db_error(&err)))?;
        let rows = statement
            .query_map(params_from_iter(filter.args.iter().map(FilterArg)), read_principal_row)
            .map_err(|err| AccessError::from(db_error(&err)))?;
        let mut principals = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|err| AccessError::from(db_error(&err)))?;
            principals.push(principal_from_raw(raw)?);
        }
        Ok(principals)
    }

    fn update_principal_profile(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
        profile: &PrincipalProfile,
    ) -> Result<Principal, AccessError> {
        let audit;
        let updated;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| AccessError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let principal = principal_by_id(&tx, principal_id)?;
            let scope = principal.as_ref().map_or_else(absent_scope, principal_scope);
            require_allow(self.policies.evaluate(
                EntityKind::Principal,
                OperationClass::Update,
                &resolution,
                &scope,
            ))?;
            let Some(current) = principal else {
                return Err(AccessError::Denied(DenyReason::OutOfScope));
            };
            if profile.is_empty() {
                return Ok(current);
            }
            let mut next = current.clone();
            if let Some(display_name) = &profile.display_name {
                next.display_name.clone_from(display_name);
            }
            if let Some(contact) = &profile.contact {
                next.contact.clone_from(contact);
            }
            tx.execute(
                "UPDATE principals SET display_name = ?1, contact = ?2 WHERE id = ?3",
                params![next.display_name, next.contact, id_param(principal_id.get())],
            )
            .map_err(|err| AccessError::from(db_error(&err)))?;
            tx.commit().map_err(|err| AccessError::from(db_error(&err)))?;
            audit = Self::audit_event(
                audit_actor(&resolution, current.id),
                current.tenant_id,
                EntityRef::new(EntityKind::Principal, principal_id.to_string()),
                AuditAction::Update,
                Some(snapshot(&current)),
                Some(snapshot(&next)),
                serde_json::Value::Null,
            );
            updated = next;
        }
        self.append_audit(audit);
        Ok(updated)
    }

    fn set_principal_role(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
        role: PrincipalRole,
    ) -> Result<Principal, AccessError> {
        let audit;
        let updated;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| AccessError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let principal = principal_by_id(&tx, principal_id)?;
            let scope = principal.as_ref().map_or_else(absent_scope, principal_scope);
            require_allow(self.policies.evaluate(
                EntityKind::Principal,
                OperationClass::UpdateRole,
                &resolution,
                &scope,
            ))?;
            let Some(current) = principal else {
                return Err(AccessError::Denied(DenyReason::OutOfScope));
            };
            let mut next = current.clone();
            next.role = role;
            tx.execute(
                "UPDATE principals SET role = ?1 WHERE id = ?2",
                params![role.as_str(), id_param(principal_id.get())],
            )
            .map_err(|err| AccessError::from(db_error(&err)))?;
            tx.commit().map_err(|err| AccessError::from(db_error(&err)))?;
            audit = Self::audit_event(
                audit_actor(&resolution, current.id),
                current.tenant_id,
                EntityRef::new(EntityKind::Principal, principal_id.to_string()),
                AuditAction::Update,
                Some(snapshot(&current)),
                Some(snapshot(&next)),
                serde_json::Value::Null,
            );
            updated = next;
        }
        self.append_audit(audit);
        Ok(updated)
    }

    fn delete_principal(
        &self,
        identity: &IdentityRef,
        principal_id: PrincipalId,
    ) -> Result<(), AccessError> {
        let audit;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| AccessError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let principal = principal_by_id(&tx, principal_id)?;
            let scope = principal.as_ref().map_or_else(absent_scope, principal_scope);
            require_allow(self.policies.evaluate(
                EntityKind::Principal,
                OperationClass::Delete,
                &resolution,
                &scope,
            ))?;
            let Some(current) = principal else {
                return Err(AccessError::Denied(DenyReason::OutOfScope));
            };
            tx.execute("DELETE FROM principals WHERE id = ?1", params![id_param(principal_id.get())])
                .map_err(|err| AccessError::from(db_error(&err)))?;
            tx.commit().map_err(|err| AccessError::from(db_error(&err)))?;
            audit = Self::audit_event(
                audit_actor(&resolution, current.id),
                current.tenant_id,
                EntityRef::new(EntityKind::Principal, principal_id.to_string()),
                AuditAction::Delete,
                Some(snapshot(&current)),
                None,
                serde_json::Value::Null,
            );
        }
        self.append_audit(audit);
        Ok(())
    }

    fn get_linkage(
        &self,
        identity: &IdentityRef,
        linkage_id: LinkageId,
    ) -> Result<LinkageRecord, AccessError> {
        let mut guard = self.lock_connection()?;
        let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        let linkage = linkage_by_id(&tx, linkage_id)?;
        let scope = linkage.as_ref().map_or_else(absent_scope, linkage_scope);
        require_allow(self.policies.evaluate(
            EntityKind::Linkage,
            OperationClass::Read,
            &resolution,
            &scope,
        ))?;
        linkage.ok_or(AccessError::Denied(DenyReason::OutOfScope))
    }

    fn list_linkages(&self, identity: &IdentityRef) -> Result<Vec<LinkageRecord>, AccessError> {
        let mut guard = self.lock_connection()?;
        let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
        let resolution = resolve_in_tx(&tx, identity)?;
        let predicate = self.policies.predicate(EntityKind::Linkage, OperationClass::Read);
        let Some(filter) = predicate.compile(&resolution, &LINKAGE_FILTER) else {
            return Err(AccessError::Denied(unviable_deny_reason(&resolution)));
        };
        let sql =
            format!("SELECT {LINKAGE_COLUMNS} FROM linkages WHERE {} ORDER BY id", filter.clause);
        let mut statement = tx.prepare(&sql).map_err(|err| AccessError::from(db_error(&err)))?;
        let rows = statement
            .query_map(params_from_iter(filter.args.iter().map(FilterArg)), read_linkage_row)
            .map_err(|err| AccessError::from(db_error(&err)))?;
        let mut linkages = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|err| AccessError::from(db_error(&err)))?;
            linkages.push(linkage_from_raw(raw)?);
        }
        Ok(linkages)
    }

    fn find_or_create_linkage(
        &self,
        identity: &IdentityRef,
        key: &LinkageKey,
        consumer: serde_json::Value,
    ) -> Result<ReconcileOutcome, AccessError> {
        match self.reconcile_once(identity, key, &consumer) {
            Ok(outcome) => Ok(outcome),
            // A concurrent creator from another handle won between our check
            // and insert; resolve the winner's row exactly once.
            Err(ReconcileError::Race) => self.resolve_existing(identity, key, &consumer),
            Err(ReconcileError::Access(error)) => Err(error),
        }
    }

    fn update_linkage_status(
        &self,
        identity: &IdentityRef,
        linkage_id: LinkageId,
        status: LinkageStatus,
    ) -> Result<LinkageRecord, AccessError> {
        let audit;
        let updated;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| AccessError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let linkage = linkage_by_id(&tx, linkage_id)?;
            let scope = linkage.as_ref().map_or_else(absent_scope, linkage_scope);
            require_allow(self.policies.evaluate(
                EntityKind::Linkage,
                OperationClass::Update,
                &resolution,
                &scope,
            ))?;
            let Some(current) = linkage else {
                return Err(AccessError::Denied(DenyReason::OutOfScope));
            };
            if !current.status.can_transition_to(status) {
                return Err(AccessError::Denied(DenyReason::OperationForbidden));
            }
            let mut next = current.clone();
            next.status = status;
            tx.execute(
                "UPDATE linkages SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id_param(linkage_id.get())],
            )
            .map_err(|err| AccessError::from(db_error(&err)))?;
            tx.commit().map_err(|err| AccessError::from(db_error(&err)))?;
            audit = Self::audit_event(
                actor_or_internal(&resolution)?,
                current.tenant_id,
                EntityRef::new(EntityKind::Linkage, linkage_id.to_string()),
                AuditAction::StatusChange,
                Some(snapshot(&current)),
                Some(snapshot(&next)),
                serde_json::Value::Null,
            );
            updated = next;
        }
        self.append_audit(audit);
        Ok(updated)
    }

    fn set_linkage_document(
        &self,
        identity: &IdentityRef,
        linkage_id: LinkageId,
        document: Option<DocumentRef>,
    ) -> Result<LinkageRecord, AccessError> {
        let audit;
        let updated;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| AccessError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let linkage = linkage_by_id(&tx, linkage_id)?;
            let scope = linkage.as_ref().map_or_else(absent_scope, linkage_scope);
            require_allow(self.policies.evaluate(
                EntityKind::Linkage,
                OperationClass::Update,
                &resolution,
                &scope,
            ))?;
            let Some(current) = linkage else {
                return Err(AccessError::Denied(DenyReason::OutOfScope));
            };
            let mut next = current.clone();
            next.document = document;
            tx.execute(
                "UPDATE linkages SET document_ref = ?1 WHERE id = ?2",
                params![
                    next.document.as_ref().map(DocumentRef::as_str),
                    id_param(linkage_id.get())
                ],
            )
            .map_err(|err| AccessError::from(db_error(&err)))?;
            tx.commit().map_err(|err| AccessError::from(db_error(&err)))?;
            audit = Self::audit_event(
                actor_or_internal(&resolution)?,
                current.tenant_id,
                EntityRef::new(EntityKind::Linkage, linkage_id.to_string()),
                AuditAction::Update,
                Some(snapshot(&current)),
                Some(snapshot(&next)),
                serde_json::Value::Null,
            );
            updated = next;
        }
        self.append_audit(audit);
        Ok(updated)
    }
}

/// Audit actor for linkage mutations, which always require a resolved
/// context.
fn actor_or_internal(resolution: &ContextResolution) -> Result<PrincipalId, AccessError> {
    resolution.context().map(|context| context.principal_id).ok_or_else(|| {
        AccessError::Internal("linkage mutation accepted without resolved context".to_string())
    })
}

// ============================================================================
// SECTION: Reconciler
// ============================================================================

/// Internal outcome classification for one reconciliation attempt.
enum ReconcileError {
    /// A concurrent creator won the unique-index race.
    Race,
    /// The attempt failed with a caller-facing error.
    Access(AccessError),
}

impl From<AccessError> for ReconcileError {
    fn from(error: AccessError) -> Self {
        Self::Access(error)
    }
}

impl From<SqliteStoreError> for ReconcileError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Access(AccessError::from(error))
    }
}

impl SqliteDirectoryStore {
    /// One atomic find-or-create attempt inside an IMMEDIATE transaction.
    fn reconcile_once(
        &self,
        identity: &IdentityRef,
        key: &LinkageKey,
        consumer: &serde_json::Value,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let audit;
        let outcome;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| ReconcileError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let Some(context) = resolution.context().cloned() else {
                return Err(ReconcileError::Access(AccessError::Denied(DenyReason::NoContext)));
            };
            require_allow(self.policies.evaluate(
                EntityKind::Linkage,
                OperationClass::Create,
                &resolution,
                &RowScope::tenant(context.tenant_id),
            ))?;
            if let Some(existing) = active_linkage_by_key(&tx, context.tenant_id, key)? {
                tx.commit().map_err(|err| ReconcileError::from(db_error(&err)))?;
                audit = Self::audit_event(
                    context.principal_id,
                    context.tenant_id,
                    EntityRef::new(EntityKind::Linkage, existing.id.to_string()),
                    AuditAction::Reuse,
                    None,
                    Some(snapshot(&existing)),
                    serde_json::json!({ "consumer": consumer }),
                );
                outcome = ReconcileOutcome {
                    linkage_id: existing.id,
                    reused: true,
                };
            } else {
                let inserted = tx.execute(
                    "INSERT INTO linkages (tenant_id, subject, target, descriptor, status)
                     VALUES (?1, ?2, ?3, ?4, 'active')",
                    params![
                        id_param(context.tenant_id.get()),
                        key.subject.as_str(),
                        key.target.as_str(),
                        key.descriptor
                    ],
                );
                if let Err(error) = inserted {
                    if is_constraint_violation(&error) {
                        return Err(ReconcileError::Race);
                    }
                    return Err(ReconcileError::from(db_error(&error)));
                }
                let linkage_id = linkage_id_from_db(tx.last_insert_rowid())?;
                let created = LinkageRecord {
                    id: linkage_id,
                    tenant_id: context.tenant_id,
                    key: key.clone(),
                    status: LinkageStatus::Active,
                    document: None,
                };
                tx.commit().map_err(|err| ReconcileError::from(db_error(&err)))?;
                audit = Self::audit_event(
                    context.principal_id,
                    context.tenant_id,
                    EntityRef::new(EntityKind::Linkage, linkage_id.to_string()),
                    AuditAction::Create,
                    None,
                    Some(snapshot(&created)),
                    serde_json::json!({ "consumer": consumer }),
                );
                outcome = ReconcileOutcome {
                    linkage_id,
                    reused: false,
                };
            }
        }
        self.append_audit(audit);
        Ok(outcome)
    }

    /// Post-race resolution: observe the winning row exactly once.
    fn resolve_existing(
        &self,
        identity: &IdentityRef,
        key: &LinkageKey,
        consumer: &serde_json::Value,
    ) -> Result<ReconcileOutcome, AccessError> {
        let audit;
        let outcome;
        {
            let mut guard = self.lock_connection()?;
            let tx = guard.transaction().map_err(|err| AccessError::from(db_error(&err)))?;
            let resolution = resolve_in_tx(&tx, identity)?;
            let Some(context) = resolution.context().cloned() else {
                return Err(AccessError::Denied(DenyReason::NoContext));
            };
            let Some(existing) = active_linkage_by_key(&tx, context.tenant_id, key)? else {
                // The winner disappeared between its commit and our retry;
                // surface the conflict instead of looping.
                return Err(AccessError::Conflict);
            };
            audit = Self::audit_event(
                context.principal_id,
                context.tenant_id,
                EntityRef::new(EntityKind::Linkage, existing.id.to_string()),
                AuditAction::Reuse,
                None,
                Some(snapshot(&existing)),
                serde_json::json!({ "consumer": consumer }),
            );
            outcome = ReconcileOutcome {
                linkage_id: existing.id,
                reused: true,
            };
        }
        self.append_audit(audit);
        Ok(outcome)
    }
}

// ============================================================================
// SECTION: Audit Sink Implementation
// ============================================================================

impl AuditSink for SqliteDirectoryStore {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let guard =
            self.lock_connection().map_err(|error| AuditError::Append(error.to_string()))?;
        let old_json = record
            .old
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| AuditError::Append(error.to_string()))?;
        let new_json = record
            .new
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| AuditError::Append(error.to_string()))?;
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|error| AuditError::Append(error.to_string()))?;
        guard
            .execute(
                "INSERT INTO audit_records
                 (actor, tenant_id, entity_kind, entity_id, action, old_json, new_json,
                  recorded_at, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id_param(record.actor.get()),
                    id_param(record.tenant_id.get()),
                    record.entity.kind.as_str(),
                    record.entity.id,
                    record.action.as_str(),
                    old_json,
                    new_json,
                    record.recorded_at.as_unix_millis(),
                    metadata_json
                ],
            )
            .map_err(|error| AuditError::Append(error.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Provisioning Store Implementation
// ============================================================================

impl ProvisioningStore for SqliteDirectoryStore {
    fn provision_tenant(
        &self,
        display_name: &str,
        locale: &str,
        currency: &str,
    ) -> Result<TenantId, StoreError> {
        if display_name.is_empty() {
            return Err(StoreError::Invalid("tenant display_name must not be empty".to_string()));
        }
        let guard = self.lock_connection().map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO tenants (display_name, locale, currency) VALUES (?1, ?2, ?3)",
                params![display_name, locale, currency],
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        tenant_id_from_db(guard.last_insert_rowid()).map_err(StoreError::from)
    }

    fn provision_principal(
        &self,
        identity: &IdentityRef,
        tenant_id: TenantId,
        role: PrincipalRole,
        status: PrincipalStatus,
        display_name: &str,
    ) -> Result<PrincipalId, StoreError> {
        let mut guard = self.lock_connection().map_err(StoreError::from)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let tenant_exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM tenants WHERE id = ?1",
                params![id_param(tenant_id.get())],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        if tenant_exists.is_none() {
            return Err(StoreError::Invalid(format!("unknown tenant: {tenant_id}")));
        }
        let inserted = tx.execute(
            "INSERT INTO principals (identity, tenant_id, role, status, display_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.as_str(),
                id_param(tenant_id.get()),
                role.as_str(),
                status.as_str(),
                display_name
            ],
        );
        if let Err(error) = inserted {
            if is_constraint_violation(&error) {
                return Err(StoreError::Invalid(format!("identity already bound: {identity}")));
            }
            return Err(StoreError::from(db_error(&error)));
        }
        let principal_id =
            principal_id_from_db(tx.last_insert_rowid()).map_err(StoreError::from)?;
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(principal_id)
    }

    fn set_principal_status(
        &self,
        principal_id: PrincipalId,
        status: PrincipalStatus,
    ) -> Result<(), StoreError> {
        let guard = self.lock_connection().map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE principals SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id_param(principal_id.get())],
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        if changed == 0 {
            return Err(StoreError::Invalid(format!("unknown principal: {principal_id}")));
        }
        Ok(())
    }

    fn remove_tenant(&self, tenant_id: TenantId) -> Result<(), StoreError> {
        let mut guard = self.lock_connection().map_err(StoreError::from)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let removed = tx
            .execute("DELETE FROM tenants WHERE id = ?1", params![id_param(tenant_id.get())])
            .map_err(|err| StoreError::from(db_error(&err)))?;
        if removed == 0 {
            return Err(StoreError::Invalid(format!("unknown tenant: {tenant_id}")));
        }
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(())
    }

    fn audit_records(&self, tenant_id: TenantId) -> Result<Vec<AuditRecord>, StoreError> {
        let guard = self.lock_connection().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(
                "SELECT actor, tenant_id, entity_kind, entity_id, action, old_json, new_json,
                        recorded_at, metadata_json
                 FROM audit_records WHERE tenant_id = ?1 ORDER BY id",
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let rows = statement
            .query_map(params![id_param(tenant_id.get())], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let mut records = Vec::new();
        for row in rows {
            let (actor, tenant, kind, entity_id, action, old_json, new_json, recorded_at, metadata) =
                row.map_err(|err| StoreError::from(db_error(&err)))?;
            records.push(decode_audit_row(
                actor,
                tenant,
                &kind,
                entity_id,
                &action,
                old_json.as_deref(),
                new_json.as_deref(),
                recorded_at,
                &metadata,
            )?);
        }
        Ok(records)
    }
}

/// Decodes one stored audit row into the core record.
#[allow(
    clippy::too_many_arguments,
    reason = "Column-per-argument decoding mirrors the audit relation."
)]
fn decode_audit_row(
    actor: i64,
    tenant_id: i64,
    kind: &str,
    entity_id: String,
    action: &str,
    old_json: Option<&str>,
    new_json: Option<&str>,
    recorded_at: i64,
    metadata_json: &str,
) -> Result<AuditRecord, StoreError> {
    let kind = EntityKind::parse(kind)
        .ok_or_else(|| StoreError::Invalid(format!("invalid audit entity kind: {kind}")))?;
    let action = AuditAction::parse(action)
        .ok_or_else(|| StoreError::Invalid(format!("invalid audit action: {action}")))?;
    let old = old_json
        .map(serde_json::from_str)
        .transpose()
        .map_err(|error| StoreError::Invalid(format!("invalid audit old snapshot: {error}")))?;
    let new = new_json
        .map(serde_json::from_str)
        .transpose()
        .map_err(|error| StoreError::Invalid(format!("invalid audit new snapshot: {error}")))?;
    let metadata = serde_json::from_str(metadata_json)
        .map_err(|error| StoreError::Invalid(format!("invalid audit metadata: {error}")))?;
    Ok(AuditRecord {
        actor: principal_id_from_db(actor).map_err(StoreError::from)?,
        tenant_id: tenant_id_from_db(tenant_id).map_err(StoreError::from)?,
        entity: EntityRef::new(kind, entity_id),
        action,
        old,
        new,
        recorded_at: Timestamp::from_unix_millis(recorded_at),
        metadata,
    })
}

// ============================================================================
// SECTION: Connection and Schema
// ============================================================================

/// Opens a connection with the required flags and pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| db_error(&err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability and isolation.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| db_error(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS tenants (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    display_name TEXT NOT NULL,
                    locale TEXT NOT NULL,
                    currency TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS principals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    identity TEXT NOT NULL UNIQUE,
                    tenant_id INTEGER NOT NULL
                        REFERENCES tenants(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    status TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    contact TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_principals_tenant
                    ON principals (tenant_id);
                CREATE TABLE IF NOT EXISTS linkages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id INTEGER NOT NULL
                        REFERENCES tenants(id) ON DELETE CASCADE,
                    subject TEXT NOT NULL,
                    target TEXT NOT NULL,
                    descriptor TEXT NOT NULL,
                    status TEXT NOT NULL,
                    document_ref TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_linkages_tenant
                    ON linkages (tenant_id);
                CREATE INDEX IF NOT EXISTS idx_linkages_key
                    ON linkages (subject, target, descriptor, status);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_linkages_active_key
                    ON linkages (tenant_id, subject, target, descriptor)
                    WHERE status = 'active';
                CREATE TABLE IF NOT EXISTS audit_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    actor INTEGER NOT NULL,
                    tenant_id INTEGER NOT NULL,
                    entity_kind TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    action TEXT NOT NULL,
                    old_json TEXT,
                    new_json TEXT,
                    recorded_at INTEGER NOT NULL,
                    metadata_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_tenant
                    ON audit_records (tenant_id);",
            )
            .map_err(|err| db_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db_error(&err))?;
    Ok(())
}
