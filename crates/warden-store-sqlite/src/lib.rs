// crates/warden-store-sqlite/src/lib.rs
// ============================================================================
// Module: Warden SQLite Store
// Description: Policy-enforced tenant directory store backed by SQLite.
// Purpose: Provide the single relational store with in-transaction context
//          resolution, compiled policy filters, and append-only audit.
// Dependencies: warden-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This crate implements [`warden_core::DirectoryStore`] and
//! [`warden_core::ProvisioningStore`] on SQLite. Every policy-enforced
//! operation resolves the caller's context and evaluates the standard
//! predicate table inside one transaction; list and lookup queries carry the
//! compiled predicate filter so no query path can bypass enforcement.
//!
//! Security posture: the database file is the single source of truth and is
//! treated as trusted at rest; all caller-facing scoping decisions fail
//! closed inside the store.

/// SQLite-backed directory store implementation.
pub mod store;

pub use store::SqliteDirectoryStore;
pub use store::SqliteJournalMode;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
