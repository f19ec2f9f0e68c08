use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use super::extract::{ApiJson, ApiQuery};
use super::blocking;
use crate::config::MAX_PAGE_SIZE;
use crate::data_helpers::Paged;
use crate::error::ServiceError;
use crate::mode::Mode;
use crate::purchases::{self, IncomingItem, PurchaseInput, PurchaseQuery, PurchaseReceipt};
use crate::AppState;

pub async fn list_purchases(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiQuery(query): ApiQuery<PurchaseQuery>,
) -> Result<Json<Paged<IncomingItem>>, ServiceError> {
    let page = blocking(&state, move |conn, config| {
        purchases::list_purchases(conn, mode, &query, config.page_size, MAX_PAGE_SIZE)
    })
    .await?;
    Ok(Json(page))
}

pub async fn create_purchase(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiJson(input): ApiJson<PurchaseInput>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), ServiceError> {
    let receipt = blocking(&state, move |conn, _| {
        purchases::record_purchase(conn, mode, &input)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
