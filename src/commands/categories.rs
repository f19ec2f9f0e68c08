use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::{ApiJson, ApiQuery};
use super::blocking;
use crate::categories::{self, Category, CategoryUpdate, NewCategory, StockDrift};
use crate::error::ServiceError;
use crate::mode::Mode;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySearchQuery {
    #[serde(alias = "q")]
    search: Option<String>,
}

pub async fn list_categories(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiQuery(query): ApiQuery<CategorySearchQuery>,
) -> Result<Json<Vec<Category>>, ServiceError> {
    let list = blocking(&state, move |conn, _| {
        categories::list_categories(conn, mode, query.search.as_deref())
    })
    .await?;
    Ok(Json(list))
}

pub async fn create_category(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiJson(input): ApiJson<NewCategory>,
) -> Result<(StatusCode, Json<Category>), ServiceError> {
    let category = blocking(&state, move |conn, _| {
        categories::create_category(conn, mode, &input)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn get_category(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    Path(id): Path<String>,
) -> Result<Json<Category>, ServiceError> {
    let category = blocking(&state, move |conn, _| categories::get_category(conn, mode, &id)).await?;
    Ok(Json(category))
}

pub async fn update_category(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<CategoryUpdate>,
) -> Result<Json<Category>, ServiceError> {
    let category = blocking(&state, move |conn, _| {
        categories::update_category(conn, mode, &id, &update)
    })
    .await?;
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let deleted = id.clone();
    blocking(&state, move |conn, _| categories::delete_category(conn, mode, &id)).await?;
    Ok(Json(json!({ "success": true, "id": deleted })))
}

pub async fn next_code(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let code = blocking(&state, move |conn, _| categories::next_code_preview(conn, mode, &id)).await?;
    Ok(Json(json!({ "code": code })))
}

pub async fn drift_report(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
) -> Result<Json<Vec<StockDrift>>, ServiceError> {
    let drift = blocking(&state, move |conn, _| categories::drift_report(conn, mode)).await?;
    Ok(Json(drift))
}
