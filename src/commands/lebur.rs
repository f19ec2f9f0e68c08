use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use super::extract::{ApiJson, ApiQuery};
use super::{blocking, DateRangeQuery};
use crate::error::ServiceError;
use crate::lebur::{self, LeburInput, LeburResult};
use crate::mode::Mode;
use crate::outgoing::OutgoingItem;
use crate::AppState;

pub async fn list_lebur(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiQuery(range): ApiQuery<DateRangeQuery>,
) -> Result<Json<Vec<OutgoingItem>>, ServiceError> {
    let items = blocking(&state, move |conn, _| {
        lebur::list_lebur(conn, mode, range.start_date.as_deref(), range.end_date.as_deref())
    })
    .await?;
    Ok(Json(items))
}

pub async fn melt(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiJson(input): ApiJson<LeburInput>,
) -> Result<(StatusCode, Json<LeburResult>), ServiceError> {
    let result = blocking(&state, move |conn, _| lebur::melt_items(conn, mode, &input)).await?;
    Ok((StatusCode::CREATED, Json(result)))
}
