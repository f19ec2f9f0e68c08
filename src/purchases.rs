//! Purchase recording and the incoming ledger.
//!
//! A purchase branches on the customer's supplier flag:
//!
//! - **Supplier**: every unit gets a freshly issued code, a grocery row and
//!   an incoming row; the category totals grow by the whole batch.
//! - **Customer**: a single piece. One incoming row (code optional, reused
//!   when the shop is buying back one of its own pieces) plus a washing stub.
//!   The goods only reach category stock when washing completes.
//!
//! The whole purchase is one IMMEDIATE transaction: code issuance, inserts
//! and the category update commit or roll back together.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::categories::{self, Category};
use crate::codegen;
use crate::customers;
use crate::data_helpers::{
    business_date_today, clean_text, like_pattern, now_rfc3339, parse_date, PageRequest, Paged,
    DATE_FORMAT,
};
use crate::db::with_immediate_tx;
use crate::error::{DbContext, ServiceError, ServiceResult};
use crate::groceries::{self, NewGrocery};
use crate::mode::Mode;

/// A code seen this many times in the incoming ledger cannot be bought again.
pub const MAX_PRIOR_PURCHASES: i64 = 2;
/// Upper bound on units per supplier purchase (one code is issued per unit).
pub const MAX_QUANTITY: i64 = 1_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingSource {
    Supplier,
    Customer,
    Washing,
}

impl IncomingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            IncomingSource::Supplier => "supplier",
            IncomingSource::Customer => "customer",
            IncomingSource::Washing => "washing",
        }
    }

    pub fn parse(value: &str) -> Option<IncomingSource> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supplier" => Some(IncomingSource::Supplier),
            "customer" => Some(IncomingSource::Customer),
            "washing" => Some(IncomingSource::Washing),
            _ => None,
        }
    }
}

impl ToSql for IncomingSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for IncomingSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        IncomingSource::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown source '{raw}'").into()))
    }
}

/// One row of the incoming ledger, with category and customer names joined
/// in for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingItem {
    pub id: String,
    pub mode: Mode,
    pub code: Option<String>,
    pub name: String,
    pub weight: f64,
    pub quantity: i64,
    pub price: f64,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
    pub tkr: Option<String>,
    pub paid_amount: f64,
    pub source: IncomingSource,
    pub category_id: String,
    pub category_code: String,
    pub category_name: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub grocery_id: Option<String>,
    pub business_date: String,
    pub created_at: String,
}

/// Columns read by `incoming_from_row`, always first in the select list.
pub(crate) const INCOMING_COLUMNS: &str = "i.id, i.mode, i.code, i.name, i.weight, i.quantity, i.price,
            i.buy_price, i.sell_price, i.tkr, i.paid_amount, i.source, i.category_id,
            c.code, c.name, i.customer_id, cu.name, i.grocery_id, i.business_date, i.created_at";

/// Joins that `INCOMING_COLUMNS` expects, with `incoming_items` aliased `i`.
pub(crate) const INCOMING_JOINS: &str = "JOIN categories c ON c.id = i.category_id
     LEFT JOIN customers cu ON cu.id = i.customer_id";

pub(crate) const INCOMING_COLUMN_COUNT: usize = 20;

pub(crate) fn incoming_from_row(row: &Row<'_>) -> rusqlite::Result<IncomingItem> {
    Ok(IncomingItem {
        id: row.get(0)?,
        mode: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        weight: row.get(4)?,
        quantity: row.get(5)?,
        price: row.get(6)?,
        buy_price: row.get(7)?,
        sell_price: row.get(8)?,
        tkr: row.get(9)?,
        paid_amount: row.get(10)?,
        source: row.get(11)?,
        category_id: row.get(12)?,
        category_code: row.get(13)?,
        category_name: row.get(14)?,
        customer_id: row.get(15)?,
        customer_name: row.get(16)?,
        grocery_id: row.get(17)?,
        business_date: row.get(18)?,
        created_at: row.get(19)?,
    })
}

pub(crate) fn get_incoming(conn: &Connection, id: &str) -> ServiceResult<IncomingItem> {
    conn.query_row(
        &format!("SELECT {INCOMING_COLUMNS} FROM incoming_items i {INCOMING_JOINS} WHERE i.id = ?1"),
        params![id],
        incoming_from_row,
    )
    .ctx("load incoming item")
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInput {
    #[serde(alias = "category_id")]
    pub category_id: String,
    #[serde(alias = "customer_id")]
    pub customer_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub weight: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default, alias = "buy_price")]
    pub buy_price: Option<f64>,
    #[serde(default, alias = "is_perhiasan_kita")]
    pub is_perhiasan_kita: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub tkr: Option<String>,
    #[serde(default, alias = "sell_price")]
    pub sell_price: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub source: IncomingSource,
    pub items: Vec<IncomingItem>,
    /// Washing stub created for a customer purchase.
    pub washing_item_id: Option<String>,
    pub total_paid: f64,
}

// ---------------------------------------------------------------------------
// Record purchase
// ---------------------------------------------------------------------------

fn validate(input: &PurchaseInput) -> ServiceResult<()> {
    if input.quantity < 1 || input.quantity > MAX_QUANTITY {
        return Err(ServiceError::Validation(format!(
            "quantity must be between 1 and {MAX_QUANTITY}"
        )));
    }
    if !input.weight.is_finite() || input.weight <= 0.0 {
        return Err(ServiceError::Validation("weight must be greater than 0".into()));
    }
    for (field, value) in [
        ("price", Some(input.price)),
        ("buyPrice", input.buy_price),
        ("sellPrice", input.sell_price),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(ServiceError::Validation(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }
    }
    Ok(())
}

/// How many incoming rows (in this mode) already carry `code`.
pub(crate) fn prior_purchases(conn: &Connection, mode: Mode, code: &str) -> ServiceResult<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM incoming_items WHERE mode = ?1 AND code = ?2",
        params![mode, code],
        |row| row.get(0),
    )
    .ctx("count prior purchases")
}

/// Record a purchase. See the module docs for the two branches.
pub fn record_purchase(
    conn: &Connection,
    mode: Mode,
    input: &PurchaseInput,
) -> ServiceResult<PurchaseReceipt> {
    validate(input)?;

    with_immediate_tx(conn, |conn| {
        let category = categories::require_category(conn, mode, &input.category_id)?;
        let customer = customers::require_customer(conn, &input.customer_id)?;

        let code = clean_text(input.code.as_deref()).map(|c| c.to_ascii_uppercase());
        if let Some(code) = &code {
            let prior = prior_purchases(conn, mode, code)?;
            if prior >= MAX_PRIOR_PURCHASES {
                return Err(ServiceError::rejected(
                    "ALREADY_PURCHASED",
                    format!("Item {code} has already been purchased"),
                ));
            }
        }

        let name = clean_text(input.name.as_deref()).unwrap_or_else(|| category.name.clone());
        let ctx = PurchaseContext {
            mode,
            input,
            category: &category,
            customer_id: &customer.id,
            name: &name,
            business_date: business_date_today(),
            now: now_rfc3339(),
        };

        let receipt = if customer.is_supplier {
            record_supplier_purchase(conn, &ctx)?
        } else {
            record_customer_purchase(conn, &ctx, code.as_deref())?
        };

        info!(
            mode = %mode,
            category = %category.code,
            customer_id = %customer.id,
            source = receipt.source.as_str(),
            rows = receipt.items.len(),
            total_paid = receipt.total_paid,
            "Purchase recorded"
        );
        Ok(receipt)
    })
}

struct PurchaseContext<'a> {
    mode: Mode,
    input: &'a PurchaseInput,
    category: &'a Category,
    customer_id: &'a str,
    name: &'a str,
    business_date: String,
    now: String,
}

fn insert_incoming(
    conn: &Connection,
    ctx: &PurchaseContext<'_>,
    code: Option<&str>,
    quantity: i64,
    paid_amount: f64,
    source: IncomingSource,
    grocery_id: Option<&str>,
) -> ServiceResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO incoming_items (
            id, mode, code, name, weight, quantity, price, buy_price, sell_price, tkr,
            paid_amount, source, category_id, customer_id, grocery_id, business_date, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            id,
            ctx.mode,
            code,
            ctx.name,
            ctx.input.weight,
            quantity,
            ctx.input.price,
            ctx.input.buy_price,
            ctx.input.sell_price,
            clean_text(ctx.input.tkr.as_deref()),
            paid_amount,
            source,
            ctx.category.id,
            ctx.customer_id,
            grocery_id,
            ctx.business_date,
            ctx.now,
        ],
    )
    .ctx("insert incoming item")?;
    Ok(id)
}

fn record_supplier_purchase(conn: &Connection, ctx: &PurchaseContext<'_>) -> ServiceResult<PurchaseReceipt> {
    let input = ctx.input;
    let tkr = clean_text(input.tkr.as_deref());
    let mut items = Vec::with_capacity(input.quantity as usize);

    for _ in 0..input.quantity {
        let code = codegen::issue_code(conn, ctx.mode, &ctx.category.code)?;
        let grocery = groceries::insert_grocery(
            conn,
            ctx.mode,
            &NewGrocery {
                code: &code,
                name: ctx.name,
                weight: input.weight,
                price: input.price,
                sell_price: input.sell_price,
                tkr: tkr.as_deref(),
                category_id: &ctx.category.id,
            },
        )?;
        let incoming_id = insert_incoming(
            conn,
            ctx,
            Some(&code),
            1,
            input.price,
            IncomingSource::Supplier,
            Some(&grocery.id),
        )?;
        debug!(code = %code, incoming_id = %incoming_id, "Supplier unit stocked");
        items.push(get_incoming(conn, &incoming_id)?);
    }

    categories::adjust_stock(
        conn,
        &ctx.category.id,
        input.quantity,
        input.weight * input.quantity as f64,
    )?;

    Ok(PurchaseReceipt {
        source: IncomingSource::Supplier,
        total_paid: input.price * input.quantity as f64,
        items,
        washing_item_id: None,
    })
}

fn record_customer_purchase(
    conn: &Connection,
    ctx: &PurchaseContext<'_>,
    code: Option<&str>,
) -> ServiceResult<PurchaseReceipt> {
    let input = ctx.input;
    // Each piece needs its own wash and code, so a stub covers exactly one.
    if input.quantity != 1 {
        return Err(ServiceError::Validation(
            "quantity must be 1 for a customer purchase; record each piece separately".into(),
        ));
    }
    // Buying back one of our own pieces pays the agreed buy price.
    let redemption = input.is_perhiasan_kita || code.is_some();
    let paid = match (redemption, input.buy_price) {
        (true, Some(buy_price)) => buy_price,
        _ => input.price,
    };

    let incoming_id = insert_incoming(
        conn,
        ctx,
        code,
        1,
        paid,
        IncomingSource::Customer,
        None,
    )?;

    let washing_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO washing_items (id, mode, incoming_item_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![washing_id, ctx.mode, incoming_id, ctx.now],
    )
    .ctx("insert washing item")?;

    Ok(PurchaseReceipt {
        source: IncomingSource::Customer,
        items: vec![get_incoming(conn, &incoming_id)?],
        washing_item_id: Some(washing_id),
        total_paid: paid,
    })
}

// ---------------------------------------------------------------------------
// List purchases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseQuery {
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(alias = "q")]
    pub search: Option<String>,
    #[serde(alias = "start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "end_date")]
    pub end_date: Option<String>,
    #[serde(alias = "min_weight")]
    pub min_weight: Option<f64>,
    #[serde(alias = "max_weight")]
    pub max_weight: Option<f64>,
    pub source: Option<String>,
}

fn sort_column(sort: Option<&str>) -> ServiceResult<&'static str> {
    match sort.map(str::trim).filter(|s| !s.is_empty()) {
        None | Some("createdAt") | Some("created_at") => Ok("i.created_at"),
        Some("weight") => Ok("i.weight"),
        Some("price") => Ok("i.price"),
        Some("code") => Ok("i.code"),
        Some("name") => Ok("i.name"),
        Some(other) => Err(ServiceError::Validation(format!("Unknown sort field '{other}'"))),
    }
}

fn sort_order(order: Option<&str>) -> ServiceResult<&'static str> {
    match order.map(|o| o.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("desc") => Ok("DESC"),
        Some("asc") => Ok("ASC"),
        Some(other) => Err(ServiceError::Validation(format!("Unknown sort order '{other}'"))),
    }
}

pub fn list_purchases(
    conn: &Connection,
    mode: Mode,
    query: &PurchaseQuery,
    default_limit: u32,
    max_limit: u32,
) -> ServiceResult<Paged<IncomingItem>> {
    let page = PageRequest::new(query.page, query.limit, default_limit, max_limit);
    let column = sort_column(query.sort.as_deref())?;
    let order = sort_order(query.order.as_deref())?;
    let start = parse_date("startDate", query.start_date.as_deref())?
        .map(|d| d.format(DATE_FORMAT).to_string());
    let end = parse_date("endDate", query.end_date.as_deref())?
        .map(|d| d.format(DATE_FORMAT).to_string());
    let source = match clean_text(query.source.as_deref()) {
        None => None,
        Some(raw) => Some(IncomingSource::parse(&raw).ok_or_else(|| {
            ServiceError::Validation(format!("Unknown source '{raw}'"))
        })?),
    };
    let pattern = clean_text(query.search.as_deref()).map(|s| like_pattern(&s));

    let filter = "i.mode = ?1
         AND (?2 IS NULL OR i.code LIKE ?2 ESCAPE '\\' OR i.name LIKE ?2 ESCAPE '\\'
              OR cu.name LIKE ?2 ESCAPE '\\')
         AND (?3 IS NULL OR i.business_date >= ?3)
         AND (?4 IS NULL OR i.business_date <= ?4)
         AND (?5 IS NULL OR i.weight >= ?5)
         AND (?6 IS NULL OR i.weight <= ?6)
         AND (?7 IS NULL OR i.source = ?7)";

    let total: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) FROM incoming_items i
                 LEFT JOIN customers cu ON cu.id = i.customer_id
                 WHERE {filter}"
            ),
            params![mode, pattern, start, end, query.min_weight, query.max_weight, source],
            |row| row.get(0),
        )
        .ctx("count purchases")?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {INCOMING_COLUMNS} FROM incoming_items i {INCOMING_JOINS}
             WHERE {filter}
             ORDER BY {column} {order}, i.id {order}
             LIMIT ?8 OFFSET ?9"
        ))
        .ctx("prepare purchase list")?;
    let items = stmt
        .query_map(
            params![
                mode,
                pattern,
                start,
                end,
                query.min_weight,
                query.max_weight,
                source,
                page.limit,
                page.offset(),
            ],
            incoming_from_row,
        )
        .ctx("query purchases")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read purchases")?;

    Ok(Paged::new(items, total, page))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::categories::tests::seed_category;
    use crate::customers::tests::seed_customer;
    use crate::db;
    use crate::summary;
    use std::collections::HashSet;

    pub(crate) fn purchase(category_id: &str, customer_id: &str, quantity: i64, weight: f64, price: f64) -> PurchaseInput {
        PurchaseInput {
            category_id: category_id.into(),
            customer_id: customer_id.into(),
            quantity,
            weight,
            price,
            buy_price: None,
            is_perhiasan_kita: false,
            code: None,
            tkr: None,
            sell_price: None,
            name: None,
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_supplier_purchase_creates_units_and_updates_totals() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let supplier = seed_customer(&conn, "Toko Sinar", true);

        let receipt =
            record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &supplier.id, 3, 2.5, 1_000_000.0)).unwrap();

        assert_eq!(receipt.source, IncomingSource::Supplier);
        assert_eq!(receipt.items.len(), 3);
        assert_eq!(receipt.total_paid, 3_000_000.0);
        assert!(receipt.washing_item_id.is_none());
        assert_eq!(count(&conn, "groceries"), 3);
        assert_eq!(count(&conn, "incoming_items"), 3);
        assert_eq!(count(&conn, "washing_items"), 0);

        let codes: HashSet<_> = receipt.items.iter().filter_map(|i| i.code.clone()).collect();
        assert_eq!(codes.len(), 3);
        assert!(codes.contains("CCTAA00001") && codes.contains("CCTAA00003"));
        assert!(receipt.items.iter().all(|i| i.grocery_id.is_some()));
        assert_eq!(receipt.items[0].category_name, "Cincin 17K");
        assert_eq!(receipt.items[0].customer_name.as_deref(), Some("Toko Sinar"));

        let cat = categories::get_category(&conn, Mode::Tua, &cat.id).unwrap();
        assert_eq!(cat.item_count, 3);
        assert_eq!(cat.total_weight, 7.5);

        let report = summary::daily_report(&conn, Mode::Tua, None, None).unwrap();
        assert_eq!(report.totals.finance.money_out, 3_000_000.0);
        assert_eq!(report.totals.inventory.totals.incoming_quantity, 3);
        assert_eq!(report.totals.inventory.totals.incoming_weight, 7.5);
    }

    #[test]
    fn test_customer_purchase_goes_to_washing() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let customer = seed_customer(&conn, "Ani", false);

        let receipt =
            record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &customer.id, 1, 3.0, 2_400_000.0)).unwrap();

        assert_eq!(receipt.source, IncomingSource::Customer);
        assert_eq!(receipt.items.len(), 1);
        assert!(receipt.items[0].code.is_none());
        assert!(receipt.washing_item_id.is_some());
        assert_eq!(count(&conn, "groceries"), 0);
        assert_eq!(count(&conn, "incoming_items"), 1);
        assert_eq!(count(&conn, "washing_items"), 1);

        let cat = categories::get_category(&conn, Mode::Tua, &cat.id).unwrap();
        assert_eq!(cat.item_count, 0, "stock grows only when washing completes");

        let report = summary::daily_report(&conn, Mode::Tua, None, None).unwrap();
        assert_eq!(report.totals.finance.money_out, 2_400_000.0);
    }

    #[test]
    fn test_customer_batch_is_rejected_without_writes() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let customer = seed_customer(&conn, "Ani", false);

        let err = record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &customer.id, 3, 3.0, 2_400_000.0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref m) if m.contains("record each piece separately")));
        assert_eq!(count(&conn, "incoming_items"), 0);
        assert_eq!(count(&conn, "washing_items"), 0);

        // the same batch from a supplier is fine
        let supplier = seed_customer(&conn, "Toko Sinar", true);
        let receipt =
            record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &supplier.id, 3, 3.0, 2_400_000.0)).unwrap();
        assert_eq!(receipt.items.len(), 3);
    }

    #[test]
    fn test_redemption_pays_buy_price() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let customer = seed_customer(&conn, "Ani", false);

        let mut input = purchase(&cat.id, &customer.id, 1, 3.0, 2_400_000.0);
        input.code = Some("cctaa00007".into());
        input.is_perhiasan_kita = true;
        input.buy_price = Some(2_100_000.0);
        let receipt = record_purchase(&conn, Mode::Tua, &input).unwrap();

        assert_eq!(receipt.total_paid, 2_100_000.0);
        assert_eq!(receipt.items[0].paid_amount, 2_100_000.0);
        assert_eq!(receipt.items[0].code.as_deref(), Some("CCTAA00007"));
    }

    #[test]
    fn test_code_purchased_twice_is_rejected_without_writes() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let customer = seed_customer(&conn, "Ani", false);

        let mut input = purchase(&cat.id, &customer.id, 1, 3.0, 2_400_000.0);
        input.code = Some("CCTAA00007".into());
        record_purchase(&conn, Mode::Tua, &input).unwrap();
        record_purchase(&conn, Mode::Tua, &input).unwrap();
        let before = (count(&conn, "incoming_items"), count(&conn, "washing_items"));

        let err = record_purchase(&conn, Mode::Tua, &input).unwrap_err();
        assert_eq!(err.code(), Some("ALREADY_PURCHASED"));
        assert_eq!(
            (count(&conn, "incoming_items"), count(&conn, "washing_items")),
            before
        );

        // the count is per mode
        let muda_cat = seed_category(&conn, Mode::Muda, "CC", "Cincin 8K");
        input.category_id = muda_cat.id;
        assert!(record_purchase(&conn, Mode::Muda, &input).is_ok());
    }

    #[test]
    fn test_missing_references_are_bad_requests() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let customer = seed_customer(&conn, "Ani", false);

        let err = record_purchase(&conn, Mode::Tua, &purchase("nope", &customer.id, 1, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, ServiceError::MissingReference(ref m) if m == "Category not found"));
        let err = record_purchase(&conn, Mode::Tua, &purchase(&cat.id, "nope", 1, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, ServiceError::MissingReference(ref m) if m == "Customer not found"));
        // category from the other mode
        let err = record_purchase(&conn, Mode::Muda, &purchase(&cat.id, &customer.id, 1, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, ServiceError::MissingReference(_)));
    }

    #[test]
    fn test_validation() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        assert!(matches!(
            record_purchase(&conn, Mode::Tua, &purchase("c", "u", 0, 1.0, 1.0)),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            record_purchase(&conn, Mode::Tua, &purchase("c", "u", 1, 0.0, 1.0)),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            record_purchase(&conn, Mode::Tua, &purchase("c", "u", 1, 1.0, -5.0)),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_supplier_rollback_leaves_counter_untouched() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let supplier = seed_customer(&conn, "Toko Sinar", true);
        // Fail the third unit after two have been written.
        conn.execute_batch(
            "CREATE TRIGGER fail_third BEFORE INSERT ON groceries
             WHEN NEW.code = 'CCTAA00003'
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();

        assert!(record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &supplier.id, 3, 1.0, 1.0)).is_err());
        assert_eq!(count(&conn, "groceries"), 0);
        assert_eq!(count(&conn, "incoming_items"), 0);
        assert_eq!(count(&conn, "code_counters"), 0);
        let cat = categories::get_category(&conn, Mode::Tua, &cat.id).unwrap();
        assert_eq!(cat.item_count, 0);
    }

    #[test]
    fn test_list_purchases_filters_sorts_and_pages() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        let supplier = seed_customer(&conn, "Toko Sinar", true);
        let customer = seed_customer(&conn, "Ani", false);

        record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &supplier.id, 3, 2.0, 1_000.0)).unwrap();
        record_purchase(&conn, Mode::Tua, &purchase(&cat.id, &customer.id, 1, 5.0, 4_000.0)).unwrap();

        let all = list_purchases(&conn, Mode::Tua, &PurchaseQuery::default(), 10, 100).unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.total_pages, 1);

        let heavy = list_purchases(
            &conn,
            Mode::Tua,
            &PurchaseQuery {
                min_weight: Some(3.0),
                ..PurchaseQuery::default()
            },
            10,
            100,
        )
        .unwrap();
        assert_eq!(heavy.total, 1);
        assert_eq!(heavy.items[0].source, IncomingSource::Customer);

        let by_code = list_purchases(
            &conn,
            Mode::Tua,
            &PurchaseQuery {
                sort: Some("code".into()),
                order: Some("asc".into()),
                source: Some("supplier".into()),
                limit: Some(2),
                page: Some(2),
                ..PurchaseQuery::default()
            },
            10,
            100,
        )
        .unwrap();
        assert_eq!(by_code.total, 3);
        assert_eq!(by_code.total_pages, 2);
        assert_eq!(by_code.items.len(), 1);
        assert_eq!(by_code.items[0].code.as_deref(), Some("CCTAA00003"));

        let by_customer = list_purchases(
            &conn,
            Mode::Tua,
            &PurchaseQuery {
                search: Some("ani".into()),
                ..PurchaseQuery::default()
            },
            10,
            100,
        )
        .unwrap();
        assert_eq!(by_customer.total, 1);

        let none = list_purchases(
            &conn,
            Mode::Tua,
            &PurchaseQuery {
                end_date: Some("2000-01-01".into()),
                ..PurchaseQuery::default()
            },
            10,
            100,
        )
        .unwrap();
        assert_eq!(none.total, 0);
        assert!(list_purchases(&conn, Mode::Muda, &PurchaseQuery::default(), 10, 100)
            .unwrap()
            .items
            .is_empty());

        let bad = list_purchases(
            &conn,
            Mode::Tua,
            &PurchaseQuery {
                sort: Some("karat".into()),
                ..PurchaseQuery::default()
            },
            10,
            100,
        );
        assert!(matches!(bad, Err(ServiceError::Validation(_))));
    }
}
