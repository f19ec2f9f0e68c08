//! HTTP handlers.
//!
//! Every mode-scoped resource is mounted twice: tua at `/api/<resource>` and
//! muda at `/api/muda-<resource>`. Both mounts run the same handlers; the
//! mode reaches them as an `Extension<Mode>` set on the mount.

use axum::routing::{get, post};
use axum::{Extension, Router};
use rusqlite::Connection;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::mode::Mode;
use crate::AppState;

pub mod categories;
pub mod customers;
pub mod extract;
pub mod lebur;
pub mod purchases;
pub mod reports;
pub mod sales;
pub mod system;
pub mod washing;

/// Run one unit of database work off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> ServiceResult<T>
where
    F: FnOnce(&Connection, &AppConfig) -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    let config = state.config.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        f(&conn, &config)
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("blocking task failed: {e}")))?
}

/// `?startDate=YYYY-MM-DD&endDate=YYYY-MM-DD`, both optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    #[serde(alias = "start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "end_date")]
    pub end_date: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let mut api = Router::new();
    for mode in Mode::ALL {
        api = api.merge(mode_routes(mode));
    }
    api.merge(shared_routes()).with_state(state)
}

fn mode_routes(mode: Mode) -> Router<AppState> {
    let at = |resource: &str| format!("/api/{}{resource}", mode.route_prefix());

    Router::new()
        .route(
            &at("purchases"),
            get(purchases::list_purchases).post(purchases::create_purchase),
        )
        .route(
            &at("categories"),
            get(categories::list_categories).post(categories::create_category),
        )
        .route(&at("categories/drift"), get(categories::drift_report))
        .route(
            &at("categories/:id"),
            get(categories::get_category)
                .put(categories::update_category)
                .delete(categories::delete_category),
        )
        .route(&at("categories/:id/next-code"), get(categories::next_code))
        .route(
            &at("washing-items"),
            get(washing::list_washing).post(washing::complete_washing),
        )
        .route(&at("sales"), get(sales::list_sales).post(sales::create_sale))
        .route(&at("lebur"), get(lebur::list_lebur).post(lebur::melt))
        .route(&at("reports/daily"), get(reports::daily_report))
        .layer(Extension(mode))
}

fn shared_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route(
            "/api/customers/:id",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        .route("/api/health", get(system::health))
        .route("/api/about", get(system::about))
}

// ===========================================================================
// Router tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub(crate) fn test_state() -> AppState {
        AppState {
            db: Arc::new(crate::db::test_db_state()),
            config: Arc::new(AppConfig::default()),
        }
    }

    /// Send one request through a fresh router sharing `state`.
    pub(crate) async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(json) => request.body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
