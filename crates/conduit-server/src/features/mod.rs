//! Feature modules served by the status API
//!
//! # Features
//!
//! - **backfills**: backfill progress and sync cursor lookups
//!
//! Each feature owns a `routes.rs` with its handlers and a `routes_test.rs`
//! exercising them through the router.

pub mod backfills;

use axum::Router;

pub use backfills::StatusState;

/// Creates the API router with all feature routes mounted
///
/// - `/backfills/:tenant_id` - Recent backfills for a tenant
/// - `/backfills/:tenant_id/:backfill_id` - Counters for one backfill
/// - `/cursors/:tenant_id/:source` - Sync cursors for a connection
pub fn router(state: StatusState) -> Router<()> {
    Router::new().merge(backfills::backfill_routes().with_state(state))
}
