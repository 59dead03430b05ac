use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Shift record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Shift {
    pub id: String,
    #[sqlx(rename = "start_at")]
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[sqlx(rename = "end_at")]
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Field values for an insert, or the merged result of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShift {
    pub user_id: String,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Filters for listing shifts. Empty filters do not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftQuery {
    pub user_id: Option<String>,
    /// Keep shifts starting at or after this instant.
    pub start: Option<OffsetDateTime>,
    /// Keep shifts ending at or before this instant.
    pub end: Option<OffsetDateTime>,
    /// `<= 0` means unlimited.
    pub limit: i64,
}

impl ShiftQuery {
    /// Every shift of one user, the candidate set for an overlap check.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn row_limit(&self) -> Option<i64> {
        (self.limit > 0).then_some(self.limit)
    }

    pub fn matches(&self, shift: &Shift) -> bool {
        if let Some(uid) = &self.user_id {
            if &shift.user_id != uid {
                return false;
            }
        }
        if let Some(start) = self.start {
            if shift.start < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if shift.end > end {
                return false;
            }
        }
        true
    }

    /// In-memory evaluation: filter, order by start, then cap.
    pub fn apply<'a>(&self, shifts: impl IntoIterator<Item = &'a Shift>) -> Vec<Shift> {
        let mut out: Vec<Shift> = shifts
            .into_iter()
            .filter(|s| self.matches(s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = self.row_limit() {
            out.truncate(limit as usize);
        }
        out
    }
}
