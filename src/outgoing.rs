//! Outgoing ledger: one row per grocery leaving stock, by sale or lebur.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DbContext, ServiceResult};
use crate::groceries::Grocery;
use crate::mode::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutgoingKind {
    Sale,
    Lebur,
}

impl OutgoingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutgoingKind::Sale => "sale",
            OutgoingKind::Lebur => "lebur",
        }
    }
}

impl ToSql for OutgoingKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OutgoingKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "sale" => Ok(OutgoingKind::Sale),
            "lebur" => Ok(OutgoingKind::Lebur),
            other => Err(FromSqlError::Other(
                format!("unknown outgoing kind '{other}'").into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingItem {
    pub id: String,
    pub mode: Mode,
    pub kind: OutgoingKind,
    pub grocery_id: String,
    pub code: String,
    pub name: String,
    pub category_id: String,
    pub category_code: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub weight: f64,
    pub price: f64,
    pub business_date: String,
    pub created_at: String,
}

const OUTGOING_SELECT: &str = "SELECT o.id, o.mode, o.kind, o.grocery_id, o.code, g.name,
            o.category_id, c.code, o.customer_id, cu.name, o.weight, o.price,
            o.business_date, o.created_at
     FROM outgoing_items o
     JOIN groceries g ON g.id = o.grocery_id
     JOIN categories c ON c.id = o.category_id
     LEFT JOIN customers cu ON cu.id = o.customer_id";

fn outgoing_from_row(row: &Row<'_>) -> rusqlite::Result<OutgoingItem> {
    Ok(OutgoingItem {
        id: row.get(0)?,
        mode: row.get(1)?,
        kind: row.get(2)?,
        grocery_id: row.get(3)?,
        code: row.get(4)?,
        name: row.get(5)?,
        category_id: row.get(6)?,
        category_code: row.get(7)?,
        customer_id: row.get(8)?,
        customer_name: row.get(9)?,
        weight: row.get(10)?,
        price: row.get(11)?,
        business_date: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Append one row for `grocery` and return its id.
pub(crate) fn record(
    conn: &Connection,
    kind: OutgoingKind,
    grocery: &Grocery,
    customer_id: Option<&str>,
    price: f64,
    business_date: &str,
    now: &str,
) -> ServiceResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO outgoing_items (
            id, mode, kind, grocery_id, code, category_id, customer_id, weight, price,
            business_date, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            grocery.mode,
            kind,
            grocery.id,
            grocery.code,
            grocery.category_id,
            customer_id,
            grocery.weight,
            price,
            business_date,
            now,
        ],
    )
    .ctx("insert outgoing item")?;
    Ok(id)
}

pub(crate) fn get(conn: &Connection, id: &str) -> ServiceResult<OutgoingItem> {
    conn.query_row(
        &format!("{OUTGOING_SELECT} WHERE o.id = ?1"),
        params![id],
        outgoing_from_row,
    )
    .ctx("load outgoing item")
}

/// Rows of `kind` in an inclusive business-date range, newest first.
pub(crate) fn list(
    conn: &Connection,
    mode: Mode,
    kind: OutgoingKind,
    start: &str,
    end: &str,
) -> ServiceResult<Vec<OutgoingItem>> {
    let mut stmt = conn
        .prepare(&format!(
            "{OUTGOING_SELECT}
             WHERE o.mode = ?1 AND o.kind = ?2 AND o.business_date BETWEEN ?3 AND ?4
             ORDER BY o.created_at DESC, o.id DESC"
        ))
        .ctx("prepare outgoing list")?;
    let rows = stmt
        .query_map(params![mode, kind, start, end], outgoing_from_row)
        .ctx("query outgoing items")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read outgoing items")
}
