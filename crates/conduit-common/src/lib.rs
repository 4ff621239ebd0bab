//! Conduit Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared identifiers, error handling, and logging bootstrap for the Conduit
//! workspace.
//!
//! # Overview
//!
//! - **Types**: tenant, source, entity and backfill identifiers that appear in
//!   every job message
//! - **Error Handling**: [`ConduitError`] and the [`Result`] alias
//! - **Digests**: stable SHA-256 digests used for queue deduplication and
//!   lane sharding
//! - **Logging**: `tracing` subscriber configuration shared by all binaries
//!
//! # Example
//!
//! ```no_run
//! use conduit_common::types::{Source, TenantId};
//!
//! fn parse(raw_tenant: &str, raw_source: &str) -> conduit_common::Result<(TenantId, Source)> {
//!     Ok((TenantId::parse(raw_tenant)?, raw_source.parse()?))
//! }
//! ```

pub mod digest;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ConduitError, Result};
