//! Caller identity as handed over by the authentication module.
//!
//! The core never authenticates. It only enforces isolation for an identity
//! that has already been established.

use crate::{BranchId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The caller's role within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Account owner: sees and writes every branch.
    Owner,
    /// Staff member: confined to the assigned branch.
    Staff,
    /// Anything the core does not recognise. Denied everything.
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Parses a role name; unrecognised names map to [`Role::Unknown`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "owner" => Role::Owner,
            "staff" => Role::Staff,
            _ => Role::Unknown,
        }
    }

    /// Whether the role sees (and writes) every branch of the tenant.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Role::Owner)
    }

    /// Whether the role may perform any operation at all.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Role::Unknown)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Staff => write!(f, "staff"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

/// Opaque identity context attached to every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    pub tenant_id: TenantId,
    pub branch_id: Option<BranchId>,
    pub role: Role,
}

impl IdentityContext {
    /// Context for the tenant's owner.
    pub fn owner(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            branch_id: None,
            role: Role::Owner,
        }
    }

    /// Context for a staff member assigned to `branch_id`.
    pub fn staff(tenant_id: impl Into<TenantId>, branch_id: impl Into<BranchId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            branch_id: Some(branch_id.into()),
            role: Role::Staff,
        }
    }

    /// Replaces the role.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Replaces the branch assignment.
    #[must_use]
    pub fn with_branch(mut self, branch_id: Option<BranchId>) -> Self {
        self.branch_id = branch_id;
        self
    }
}
