//! Role-based branch visibility.
//!
//! Owners see every branch of their tenant and may narrow a read to one.
//! Staff see only their assigned branch; records without a branch are hidden
//! from them. Staff without an assignment see nothing and cannot write.

use crate::error::{AccessError, AccessResult};
use tillsync_types::{BranchId, IdentityContext, Record, Role};
use tracing::warn;

/// Which branches a read may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadScope {
    /// Every record of the tenant, branchless ones included.
    AllBranches,
    /// Only records stamped with this branch.
    Branch(BranchId),
    /// Nothing at all.
    Denied,
}

/// Stateless branch access rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchFilter;

impl BranchFilter {
    /// Resolves the scope a read runs with.
    ///
    /// `requested` narrows an owner's read. For staff it must be absent or
    /// equal to the assigned branch, otherwise the read is denied.
    #[must_use]
    pub fn read_scope(ctx: &IdentityContext, requested: Option<&BranchId>) -> ReadScope {
        match ctx.role {
            Role::Owner => match requested {
                Some(branch) => ReadScope::Branch(branch.clone()),
                None => ReadScope::AllBranches,
            },
            Role::Staff => match (&ctx.branch_id, requested) {
                (Some(own), None) => ReadScope::Branch(own.clone()),
                (Some(own), Some(req)) if own == req => ReadScope::Branch(own.clone()),
                (Some(own), Some(req)) => {
                    warn!(
                        "Staff of branch {} asked for branch {} in tenant {}",
                        own, req, ctx.tenant_id
                    );
                    ReadScope::Denied
                }
                (None, _) => ReadScope::Denied,
            },
            Role::Unknown => ReadScope::Denied,
        }
    }

    /// Whether a single record is visible under `scope`. Fails closed on
    /// records without a branch.
    #[must_use]
    pub fn is_visible(scope: &ReadScope, record: &Record) -> bool {
        match scope {
            ReadScope::AllBranches => true,
            ReadScope::Branch(branch) => record.branch_id.as_ref() == Some(branch),
            ReadScope::Denied => false,
        }
    }

    /// Drops every record not visible to the caller.
    #[must_use]
    pub fn filter(
        ctx: &IdentityContext,
        requested: Option<&BranchId>,
        records: Vec<Record>,
    ) -> Vec<Record> {
        let scope = Self::read_scope(ctx, requested);
        records
            .into_iter()
            .filter(|r| Self::is_visible(&scope, r))
            .collect()
    }

    /// Corrects the branch of a record about to be written.
    ///
    /// Owners write to whatever branch the record names. Staff writes are
    /// forced onto the caller's own branch.
    pub fn authorize_write(ctx: &IdentityContext, mut record: Record) -> AccessResult<Record> {
        match ctx.role {
            Role::Owner => Ok(record),
            Role::Staff => {
                let Some(own) = ctx.branch_id.clone() else {
                    return Err(AccessError::PermissionDenied(format!(
                        "staff of tenant {} has no branch assignment",
                        ctx.tenant_id
                    )));
                };
                if record.branch_id.as_ref() != Some(&own) {
                    warn!(
                        "Staff write of {} targeted branch {:?}; corrected to {}",
                        record.id, record.branch_id, own
                    );
                    record.branch_id = Some(own);
                }
                Ok(record)
            }
            Role::Unknown => Err(AccessError::PermissionDenied(format!(
                "unrecognised role in tenant {}",
                ctx.tenant_id
            ))),
        }
    }

    /// Owner-only operations (purge, administrative requeue).
    pub fn require_owner(ctx: &IdentityContext, operation: &str) -> AccessResult<()> {
        if ctx.role.is_elevated() {
            Ok(())
        } else {
            Err(AccessError::PermissionDenied(format!(
                "{operation} requires the owner role (caller is {})",
                ctx.role
            )))
        }
    }
}
