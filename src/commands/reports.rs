use axum::extract::State;
use axum::{Extension, Json};

use super::extract::ApiQuery;
use super::{blocking, DateRangeQuery};
use crate::error::ServiceError;
use crate::mode::Mode;
use crate::summary::{self, DailyReport};
use crate::AppState;

/// `GET /api/reports/daily?startDate&endDate`: one summary per business date.
pub async fn daily_report(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiQuery(range): ApiQuery<DateRangeQuery>,
) -> Result<Json<DailyReport>, ServiceError> {
    let report = blocking(&state, move |conn, _| {
        summary::daily_report(conn, mode, range.start_date.as_deref(), range.end_date.as_deref())
    })
    .await?;
    Ok(Json(report))
}
