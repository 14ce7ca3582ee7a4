// crates/warden-core/src/core/mod.rs
// ============================================================================
// Module: Warden Core Model
// Description: Entity model, access context, policy predicates, and audit
//              records shared by all Warden backends.
// Purpose: Re-export the core model types under one namespace.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The core model is pure data plus policy evaluation; it performs no I/O.
//! Store backends implement the interfaces in [`crate::interfaces`] on top
//! of these types.

/// Append-only audit records and timestamps.
pub mod audit;
/// Resolved caller context and resolution outcomes.
pub mod context;
/// Tenant and principal entity records.
pub mod directory;
/// Canonical identifiers with stable wire forms.
pub mod identifiers;
/// Linkage records, keys, and status machine.
pub mod linkage;
/// Scope predicates and the standard policy set.
pub mod policy;
