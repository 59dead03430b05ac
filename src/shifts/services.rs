use thiserror::Error;
use time::OffsetDateTime;

use super::dto::UpdateShiftRequest;
use super::repo_types::{NewShift, Shift};
use crate::error::{AppError, StoreError};

/// Interval being written, checked against the owner's stored shifts.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Set on updates so the row never conflicts with itself.
    pub id: Option<&'a str>,
    pub user_id: &'a str,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl<'a> Candidate<'a> {
    pub fn insert(new: &'a NewShift) -> Self {
        Self {
            id: None,
            user_id: &new.user_id,
            start: new.start,
            end: new.end,
        }
    }

    pub fn update(id: &'a str, change: &'a NewShift) -> Self {
        Self {
            id: Some(id),
            ..Self::insert(change)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("shift timespan cannot intersect other shifts for the same user")]
pub struct OverlapError {
    pub conflicting_id: String,
}

impl From<OverlapError> for StoreError {
    fn from(e: OverlapError) -> Self {
        StoreError::Overlap {
            conflicting_id: e.conflicting_id,
        }
    }
}

/// Half-open `[start, end)` intersection; touching intervals do not overlap.
pub fn overlaps(existing: &Shift, start: OffsetDateTime, end: OffsetDateTime) -> bool {
    existing.end > start && existing.start < end
}

/// Rejects the candidate if any other shift of the same user intersects it.
/// `existing` is the pre-filtered set, normally `ShiftQuery::for_user`.
pub fn ensure_no_overlap(candidate: &Candidate<'_>, existing: &[Shift]) -> Result<(), OverlapError> {
    let hit = existing.iter().find(|s| {
        s.user_id == candidate.user_id
            && Some(s.id.as_str()) != candidate.id
            && overlaps(s, candidate.start, candidate.end)
    });
    match hit {
        Some(s) => Err(OverlapError {
            conflicting_id: s.id.clone(),
        }),
        None => Ok(()),
    }
}

pub fn validate_interval(start: OffsetDateTime, end: OffsetDateTime) -> Result<(), AppError> {
    if start >= end {
        return Err(AppError::validation(
            "shift start time must precede shift end time",
        ));
    }
    Ok(())
}

/// Replace-with-defaults-preserved: absent fields keep the stored value.
pub fn merge_update(existing: &Shift, req: UpdateShiftRequest) -> NewShift {
    NewShift {
        user_id: req
            .user_id
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| existing.user_id.clone()),
        start: req.start.unwrap_or(existing.start),
        end: req.end.unwrap_or(existing.end),
    }
}
