//! Selling live stock.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::categories;
use crate::customers;
use crate::data_helpers::{business_date_today, clean_text, date_range, now_rfc3339};
use crate::db::with_immediate_tx;
use crate::error::{ServiceError, ServiceResult};
use crate::groceries;
use crate::mode::Mode;
use crate::outgoing::{self, OutgoingItem, OutgoingKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleInput {
    pub code: String,
    pub price: f64,
    #[serde(default, alias = "customer_id")]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesList {
    pub start_date: String,
    pub end_date: String,
    pub items: Vec<OutgoingItem>,
    pub total_price: f64,
    pub total_weight: f64,
}

/// Sell one grocery by code.
///
/// Refused when the item is already sold or melted, or when the price per
/// gram is under the category's minimum (a minimum of 0 disables the check).
pub fn sell_item(conn: &Connection, mode: Mode, input: &SaleInput) -> ServiceResult<OutgoingItem> {
    if !input.price.is_finite() || input.price < 0.0 {
        return Err(ServiceError::Validation(
            "price must be a non-negative number".into(),
        ));
    }
    let code = clean_text(Some(&input.code))
        .ok_or_else(|| ServiceError::Validation("code is required".into()))?
        .to_ascii_uppercase();
    let customer_id = clean_text(input.customer_id.as_deref());

    with_immediate_tx(conn, |conn| {
        let grocery = groceries::require_live(conn, mode, &code)?;
        if let Some(id) = &customer_id {
            customers::require_customer(conn, id)?;
        }

        let category = categories::require_category(conn, mode, &grocery.category_id)?;
        if category.minimum_price > 0.0 && grocery.weight > 0.0 {
            let per_gram = input.price / grocery.weight;
            if per_gram < category.minimum_price {
                return Err(ServiceError::rejected(
                    "BELOW_MINIMUM_PRICE",
                    format!(
                        "Price {:.0}/g is below the minimum {:.0}/g for {}",
                        per_gram, category.minimum_price, category.name
                    ),
                ));
            }
        }

        let now = now_rfc3339();
        groceries::mark_sold(conn, &grocery.id, input.price, &now)?;
        let outgoing_id = outgoing::record(
            conn,
            OutgoingKind::Sale,
            &grocery,
            customer_id.as_deref(),
            input.price,
            &business_date_today(),
            &now,
        )?;
        categories::adjust_stock(conn, &category.id, -1, -grocery.weight)?;

        info!(mode = %mode, code = %grocery.code, price = input.price, "Item sold");
        outgoing::get(conn, &outgoing_id)
    })
}

pub fn list_sales(
    conn: &Connection,
    mode: Mode,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> ServiceResult<SalesList> {
    let (start, end) = date_range(start_date, end_date)?;
    let items = outgoing::list(conn, mode, OutgoingKind::Sale, &start, &end)?;
    Ok(SalesList {
        total_price: items.iter().map(|i| i.price).sum(),
        total_weight: items.iter().map(|i| i.weight).sum(),
        start_date: start,
        end_date: end,
        items,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::tests::seed_category;
    use crate::categories::{update_category, CategoryUpdate};
    use crate::customers::tests::seed_customer;
    use crate::db;
    use crate::purchases::record_purchase;
    use crate::purchases::tests::purchase;
    use crate::summary;

    fn stocked(conn: &Connection) -> String {
        let cat = seed_category(conn, Mode::Tua, "CC", "Cincin 17K");
        let supplier = seed_customer(conn, "Toko Sinar", true);
        record_purchase(conn, Mode::Tua, &purchase(&cat.id, &supplier.id, 2, 2.0, 1_000_000.0)).unwrap();
        cat.id
    }

    fn sale(code: &str, price: f64) -> SaleInput {
        SaleInput {
            code: code.into(),
            price,
            customer_id: None,
        }
    }

    #[test]
    fn test_sell_item_decrements_stock() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat_id = stocked(&conn);
        let buyer = seed_customer(&conn, "Ani", false);

        let sold = sell_item(
            &conn,
            Mode::Tua,
            &SaleInput {
                code: "cctaa00001".into(),
                price: 2_600_000.0,
                customer_id: Some(buyer.id.clone()),
            },
        )
        .unwrap();
        assert_eq!(sold.kind, OutgoingKind::Sale);
        assert_eq!(sold.code, "CCTAA00001");
        assert_eq!(sold.customer_name.as_deref(), Some("Ani"));

        let cat = categories::get_category(&conn, Mode::Tua, &cat_id).unwrap();
        assert_eq!(cat.item_count, 1);
        assert_eq!(cat.total_weight, 2.0);
        assert!(categories::drift_report(&conn, Mode::Tua).unwrap().is_empty());

        let list = list_sales(&conn, Mode::Tua, None, None).unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.total_price, 2_600_000.0);

        let report = summary::daily_report(&conn, Mode::Tua, None, None).unwrap();
        assert_eq!(report.totals.finance.money_in, 2_600_000.0);
        assert_eq!(report.totals.inventory.totals.total_quantity, 1);
    }

    #[test]
    fn test_selling_twice_is_rejected() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        stocked(&conn);
        sell_item(&conn, Mode::Tua, &sale("CCTAA00001", 2_600_000.0)).unwrap();
        let err = sell_item(&conn, Mode::Tua, &sale("CCTAA00001", 2_600_000.0)).unwrap_err();
        assert_eq!(err.code(), Some("ITEM_SOLD"));
        assert_eq!(list_sales(&conn, Mode::Tua, None, None).unwrap().items.len(), 1);
    }

    #[test]
    fn test_unknown_code_is_not_found() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        stocked(&conn);
        let err = sell_item(&conn, Mode::Tua, &sale("CCTAA00099", 1.0)).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = sell_item(&conn, Mode::Muda, &sale("CCTAA00001", 1.0)).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_minimum_price_per_gram() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat_id = stocked(&conn);
        update_category(
            &conn,
            Mode::Tua,
            &cat_id,
            &CategoryUpdate {
                minimum_price: Some(1_000_000.0),
                ..CategoryUpdate::default()
            },
        )
        .unwrap();

        // 2 g at 1,900,000 is 950,000/g
        let err = sell_item(&conn, Mode::Tua, &sale("CCTAA00001", 1_900_000.0)).unwrap_err();
        assert_eq!(err.code(), Some("BELOW_MINIMUM_PRICE"));
        assert!(sell_item(&conn, Mode::Tua, &sale("CCTAA00001", 2_000_000.0)).is_ok());
    }
}
