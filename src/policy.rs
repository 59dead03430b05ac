//! Role and ownership rules shared by every handler.

use crate::error::AppError;
use crate::users::repo_types::Role;

/// Authenticated principal taken from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadShift,
    WriteShift,
    ReadUser,
    UpdateUser,
    ChangeRole,
    ListUsers,
    CreateUser,
    DeleteUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// `owner_id` is the user owning the resource, or `None` for
/// collection-level actions.
pub fn authorize(caller: &Caller, owner_id: Option<&str>, action: Action) -> Decision {
    if caller.is_admin() {
        return Decision::Allow;
    }
    match action {
        Action::ReadShift | Action::WriteShift | Action::ReadUser | Action::UpdateUser => {
            if owner_id == Some(caller.id.as_str()) {
                Decision::Allow
            } else {
                Decision::Deny
            }
        }
        Action::ChangeRole | Action::ListUsers | Action::CreateUser | Action::DeleteUser => {
            Decision::Deny
        }
    }
}

pub fn require(caller: &Caller, owner_id: Option<&str>, action: Action) -> Result<(), AppError> {
    match authorize(caller, owner_id, action) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::warn!(caller = %caller.id, role = %caller.role, ?action, owner = ?owner_id, "access denied");
            Err(AppError::Forbidden)
        }
    }
}

/// Owner filter for shift listings. A plain user without a filter is
/// narrowed to their own shifts.
pub fn scope_shift_listing(caller: &Caller, requested: Option<String>) -> Result<Option<String>, AppError> {
    let requested = requested.filter(|u| !u.is_empty());
    if caller.is_admin() {
        return Ok(requested);
    }
    let owner = requested.unwrap_or_else(|| caller.id.clone());
    require(caller, Some(&owner), Action::ReadShift)?;
    Ok(Some(owner))
}
