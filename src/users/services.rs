use lazy_static::lazy_static;
use regex::Regex;

use super::repo_types::Role;
use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Trims and checks a login name: 3 to 30 characters of `[A-Za-z0-9_.-]`.
pub fn normalize_name(raw: &str) -> Result<String, AppError> {
    lazy_static! {
        static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,30}$").unwrap();
    }
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::validation("name required"));
    }
    if !NAME_RE.is_match(name) {
        return Err(AppError::validation(
            "name must be 3-30 characters of letters, digits, '.', '_' or '-'",
        ));
    }
    Ok(name.to_string())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::validation("password required"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation("password too short"));
    }
    Ok(())
}

pub fn parse_role(raw: &str) -> Result<Role, AppError> {
    if raw.is_empty() {
        return Err(AppError::validation("role required"));
    }
    raw.parse().map_err(|_| AppError::validation("invalid role"))
}
