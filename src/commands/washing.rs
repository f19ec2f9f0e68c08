use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;

use super::extract::{ApiJson, ApiQuery};
use super::blocking;
use crate::error::ServiceError;
use crate::mode::Mode;
use crate::washing::{self, GroceryData, WashingItem, WashingStatus};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WashingListQuery {
    #[serde(default)]
    status: WashingStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteWashingPayload {
    #[serde(alias = "washingItemId", alias = "washing_item_id")]
    id: String,
    #[serde(alias = "grocery_data")]
    grocery_data: GroceryData,
}

pub async fn list_washing(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiQuery(query): ApiQuery<WashingListQuery>,
) -> Result<Json<Vec<WashingItem>>, ServiceError> {
    let items = blocking(&state, move |conn, _| {
        washing::list_washing(conn, mode, query.status)
    })
    .await?;
    Ok(Json(items))
}

/// `POST /api/washing-items`: finish the wash and return the updated item.
pub async fn complete_washing(
    State(state): State<AppState>,
    Extension(mode): Extension<Mode>,
    ApiJson(payload): ApiJson<CompleteWashingPayload>,
) -> Result<Json<WashingItem>, ServiceError> {
    let item = blocking(&state, move |conn, _| {
        washing::complete_washing(conn, mode, &payload.id, &payload.grocery_data)
    })
    .await?;
    Ok(Json(item))
}


#[cfg(test)]
mod tests {
    use super::super::test_support::{send, test_state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_customer_purchase_then_wash_over_http() {
        let state = test_state();
        let (_, cat) = send(
            &state,
            Method::POST,
            "/api/categories",
            Some(json!({ "code": "AT", "name": "Anting" })),
        )
        .await;
        let (_, customer) = send(
            &state,
            Method::POST,
            "/api/customers",
            Some(json!({ "name": "Ani" })),
        )
        .await;
        let (status, receipt) = send(
            &state,
            Method::POST,
            "/api/purchases",
            Some(json!({
                "categoryId": cat["id"],
                "customerId": customer["customer"]["id"],
                "weight": 1.5,
                "price": 1200000
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let washing_id = receipt["washingItemId"].clone();

        let (_, pending) = send(&state, Method::GET, "/api/washing-items", None).await;
        assert_eq!(pending.as_array().map(Vec::len), Some(1));

        let body = json!({
            "id": washing_id,
            "groceryData": { "categoryId": cat["id"], "weight": 1.4, "price": 1300000 }
        });
        let (status, done) = send(&state, Method::POST, "/api/washing-items", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["isWashed"], true);
        assert_eq!(done["newCode"], "ATTAA00001");

        let (status, err) = send(&state, Method::POST, "/api/washing-items", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["code"], "ALREADY_WASHED");

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/washing-items",
            Some(json!({ "id": "missing", "groceryData": { "categoryId": cat["id"], "weight": 1.0 } })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
