use serde::Deserialize;
use time::OffsetDateTime;

use super::repo_types::ShiftQuery;

/// Request body for creating a shift.
#[derive(Debug, Deserialize)]
pub struct CreateShiftRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
}

/// Request body for updating a shift; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateShiftRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
}

/// Query string of `GET /shifts`.
#[derive(Debug, Default, Deserialize)]
pub struct ListShiftsParams {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub filter_start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub filter_end: Option<OffsetDateTime>,
    #[serde(default)]
    pub limit: i64,
}

impl ListShiftsParams {
    pub fn into_query(self, user_id: Option<String>) -> ShiftQuery {
        ShiftQuery {
            user_id,
            start: self.filter_start,
            end: self.filter_end,
            limit: self.limit,
        }
    }
}
