use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::extract::{ApiJson, ApiQuery};
use super::blocking;
use crate::config::MAX_PAGE_SIZE;
use crate::customers::{
    self, Customer, CustomerCreated, CustomerQuery, CustomerUpdate, NewCustomer,
};
use crate::data_helpers::Paged;
use crate::error::ServiceError;
use crate::AppState;

pub async fn list_customers(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CustomerQuery>,
) -> Result<Json<Paged<Customer>>, ServiceError> {
    let page = blocking(&state, move |conn, config| {
        customers::list_customers(conn, &query, config.page_size, MAX_PAGE_SIZE)
    })
    .await?;
    Ok(Json(page))
}

/// 201 for a new customer, 200 when an existing one matched.
pub async fn create_customer(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<NewCustomer>,
) -> Result<(StatusCode, Json<CustomerCreated>), ServiceError> {
    let result = blocking(&state, move |conn, _| customers::create_customer(conn, &input)).await?;
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Customer>, ServiceError> {
    let customer = blocking(&state, move |conn, _| customers::get_customer(conn, &id)).await?;
    Ok(Json(customer))
}

pub async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<CustomerUpdate>,
) -> Result<Json<Customer>, ServiceError> {
    let customer = blocking(&state, move |conn, _| {
        customers::update_customer(conn, &id, &update)
    })
    .await?;
    Ok(Json(customer))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let deleted = id.clone();
    blocking(&state, move |conn, _| customers::delete_customer(conn, &id)).await?;
    Ok(Json(json!({ "success": true, "id": deleted })))
}
