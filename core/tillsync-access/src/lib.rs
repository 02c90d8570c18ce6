//! Access control for TillSync.
//!
//! - [`BranchFilter`]: role-based branch visibility, fail-closed
//! - [`TenantIsolation`]: tenant stamping and tenant-scoped reads
//! - [`SoftDelete`]: soft delete, restore and the owner-only purge

mod branch;
mod error;
mod soft_delete;
mod tenant;

pub use branch::{BranchFilter, ReadScope};
pub use error::{AccessError, AccessResult};
pub use soft_delete::{RestoreReport, SoftDelete};
pub use tenant::TenantIsolation;
