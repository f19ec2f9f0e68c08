use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use super::extract::{ApiJson, ApiQuery};
use super::{blocking, DateRangeQuery};
use crate::error::ServiceError;
use crate::mode::Mode;
use crate::outgoing::OutgoingItem;
use crate::sales::{self, SaleInput, SalesList};
use crate::AppState;

pub async fn list_sales(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiQuery(range): ApiQuery<DateRangeQuery>,
) -> Result<Json<SalesList>, ServiceError> {
    let list = blocking(&state, move |conn, _| {
        sales::list_sales(conn, mode, range.start_date.as_deref(), range.end_date.as_deref())
    })
    .await?;
    Ok(Json(list))
}

pub async fn create_sale(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiJson(input): ApiJson<SaleInput>,
) -> Result<(StatusCode, Json<OutgoingItem>), ServiceError> {
    let sold = blocking(&state, move |conn, _| sales::sell_item(conn, mode, &input)).await?;
    Ok((StatusCode::CREATED, Json(sold)))
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn sale_payload_customer_is_optional() {
        let parsed: SaleInput =
            serde_json::from_value(serde_json::json!({ "code": "CCTAA00001", "price": 1500000 }))
                .expect("payload should parse");
        assert!(parsed.customer_id.is_none());

        let parsed: SaleInput = serde_json::from_value(serde_json::json!({
            "code": "CCTAA00001",
            "price": 1500000,
            "customer_id": "cust-1"
        }))
        .expect("snake_case customer should parse");
        assert_eq!(parsed.customer_id.as_deref(), Some("cust-1"));
    }
}
