//! Backfill status feature
//!
//! Public read-only access to backfill progress and sync cursors.
//! Nothing here triggers work.

pub mod routes;


pub use routes::{backfill_routes, StatusState};
