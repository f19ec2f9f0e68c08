//! Washing queue for goods bought from customers.
//!
//! A customer purchase leaves a washing stub. Completing the wash registers
//! the cleaned piece as a grocery under a (new or supplied) code, records a
//! `washing` row in the incoming ledger and moves the piece into category
//! stock.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::categories;
use crate::codegen;
use crate::data_helpers::{business_date_today, clean_text, now_rfc3339};
use crate::db::with_immediate_tx;
use crate::error::{DbContext, ServiceError, ServiceResult};
use crate::groceries::{self, NewGrocery};
use crate::mode::Mode;
use crate::purchases::{
    self, IncomingItem, IncomingSource, INCOMING_COLUMNS, INCOMING_COLUMN_COUNT, INCOMING_JOINS,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WashingItem {
    pub id: String,
    pub mode: Mode,
    pub incoming_item_id: String,
    pub is_washed: bool,
    pub washed_at: Option<String>,
    pub new_code: Option<String>,
    pub grocery_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// The customer purchase this stub belongs to.
    pub incoming: IncomingItem,
}

/// Incoming columns first, so `incoming_from_row` reads them at their usual
/// indices; the stub's own columns follow.
fn washing_select() -> String {
    format!(
        "SELECT {INCOMING_COLUMNS}, w.id, w.mode, w.incoming_item_id, w.is_washed, w.washed_at,
                w.new_code, w.grocery_id, w.created_at, w.updated_at
         FROM washing_items w
         JOIN incoming_items i ON i.id = w.incoming_item_id
         {INCOMING_JOINS}"
    )
}

fn washing_from_row(row: &Row<'_>) -> rusqlite::Result<WashingItem> {
    let at = INCOMING_COLUMN_COUNT;
    Ok(WashingItem {
        id: row.get(at)?,
        mode: row.get(at + 1)?,
        incoming_item_id: row.get(at + 2)?,
        is_washed: row.get(at + 3)?,
        washed_at: row.get(at + 4)?,
        new_code: row.get(at + 5)?,
        grocery_id: row.get(at + 6)?,
        created_at: row.get(at + 7)?,
        updated_at: row.get(at + 8)?,
        incoming: purchases::incoming_from_row(row)?,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroceryData {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(alias = "category_id")]
    pub category_id: String,
    pub weight: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub tkr: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "sell_price")]
    pub sell_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WashingStatus {
    #[default]
    Pending,
    Washed,
    All,
}

pub fn get_washing_item(conn: &Connection, mode: Mode, id: &str) -> ServiceResult<WashingItem> {
    conn.query_row(
        &format!("{} WHERE w.id = ?1 AND w.mode = ?2", washing_select()),
        params![id, mode],
        washing_from_row,
    )
    .optional()
    .ctx("load washing item")?
    .ok_or_else(|| ServiceError::NotFound("Washing item not found".into()))
}

pub fn list_washing(
    conn: &Connection,
    mode: Mode,
    status: WashingStatus,
) -> ServiceResult<Vec<WashingItem>> {
    let washed = match status {
        WashingStatus::Pending => Some(false),
        WashingStatus::Washed => Some(true),
        WashingStatus::All => None,
    };
    let mut stmt = conn
        .prepare(&format!(
            "{} WHERE w.mode = ?1 AND (?2 IS NULL OR w.is_washed = ?2)
             ORDER BY w.created_at ASC, w.id ASC",
            washing_select()
        ))
        .ctx("prepare washing list")?;
    let items = stmt
        .query_map(params![mode, washed], washing_from_row)
        .ctx("query washing items")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read washing items")?;
    Ok(items)
}

/// Finish washing: register the piece as stock and close the stub.
pub fn complete_washing(
    conn: &Connection,
    mode: Mode,
    id: &str,
    data: &GroceryData,
) -> ServiceResult<WashingItem> {
    if !data.weight.is_finite() || data.weight <= 0.0 {
        return Err(ServiceError::Validation("weight must be greater than 0".into()));
    }
    if !data.price.is_finite() || data.price < 0.0 {
        return Err(ServiceError::Validation("price must be a non-negative number".into()));
    }

    with_immediate_tx(conn, |conn| {
        let stub = get_washing_item(conn, mode, id)?;
        if stub.is_washed {
            return Err(ServiceError::rejected(
                "ALREADY_WASHED",
                "Item has already been washed",
            ));
        }
        let category = categories::require_category(conn, mode, &data.category_id)?;

        let code = match clean_text(data.code.as_deref()) {
            Some(code) => {
                let code = code.to_ascii_uppercase();
                if groceries::code_exists(conn, &code)? {
                    return Err(ServiceError::rejected(
                        "DUPLICATE_CODE",
                        format!("Code {code} is already in use"),
                    ));
                }
                code
            }
            None => codegen::issue_code(conn, mode, &category.code)?,
        };
        let name = clean_text(data.name.as_deref()).unwrap_or_else(|| stub.incoming.name.clone());
        let tkr = clean_text(data.tkr.as_deref());

        let grocery = groceries::insert_grocery(
            conn,
            mode,
            &NewGrocery {
                code: &code,
                name: &name,
                weight: data.weight,
                price: data.price,
                sell_price: data.sell_price,
                tkr: tkr.as_deref(),
                category_id: &category.id,
            },
        )?;

        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO incoming_items (
                id, mode, code, name, weight, quantity, price, sell_price, tkr, paid_amount,
                source, category_id, customer_id, grocery_id, business_date, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                Uuid::new_v4().to_string(),
                mode,
                code,
                name,
                data.weight,
                data.price,
                data.sell_price,
                tkr,
                IncomingSource::Washing,
                category.id,
                stub.incoming.customer_id,
                grocery.id,
                business_date_today(),
                now,
            ],
        )
        .ctx("insert washing ledger row")?;

        conn.execute(
            "UPDATE washing_items
             SET is_washed = 1, washed_at = ?1, new_code = ?2, grocery_id = ?3, updated_at = ?1
             WHERE id = ?4",
            params![now, code, grocery.id, stub.id],
        )
        .ctx("mark washing item washed")?;

        categories::adjust_stock(conn, &category.id, 1, data.weight)?;

        info!(
            mode = %mode,
            washing_id = %stub.id,
            code = %code,
            category = %category.code,
            "Washing completed"
        );
        get_washing_item(conn, mode, &stub.id)
    })
}

// ===========================================================================
// Tests
// ===========================================================================
