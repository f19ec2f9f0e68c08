//! Sellable stock items. Each grocery carries a unique code and is live
//! until it is sold or melted.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::data_helpers::now_rfc3339;
use crate::error::{DbContext, ServiceError, ServiceResult};
use crate::mode::Mode;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grocery {
    pub id: String,
    pub mode: Mode,
    pub code: String,
    pub name: String,
    pub weight: f64,
    pub price: f64,
    pub sell_price: Option<f64>,
    pub tkr: Option<String>,
    pub category_id: String,
    pub is_sold: bool,
    pub is_melted: bool,
    pub sold_at: Option<String>,
    pub melted_at: Option<String>,
    pub created_at: String,
}

const GROCERY_COLUMNS: &str = "id, mode, code, name, weight, price, sell_price, tkr, category_id,
     is_sold, is_melted, sold_at, melted_at, created_at";

fn grocery_from_row(row: &Row<'_>) -> rusqlite::Result<Grocery> {
    Ok(Grocery {
        id: row.get(0)?,
        mode: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        weight: row.get(4)?,
        price: row.get(5)?,
        sell_price: row.get(6)?,
        tkr: row.get(7)?,
        category_id: row.get(8)?,
        is_sold: row.get(9)?,
        is_melted: row.get(10)?,
        sold_at: row.get(11)?,
        melted_at: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Values for a new grocery row.
#[derive(Debug, Clone)]
pub(crate) struct NewGrocery<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub weight: f64,
    pub price: f64,
    pub sell_price: Option<f64>,
    pub tkr: Option<&'a str>,
    pub category_id: &'a str,
}

pub(crate) fn insert_grocery(conn: &Connection, mode: Mode, new: &NewGrocery<'_>) -> ServiceResult<Grocery> {
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO groceries (id, mode, code, name, weight, price, sell_price, tkr, category_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            mode,
            new.code,
            new.name,
            new.weight,
            new.price,
            new.sell_price,
            new.tkr,
            new.category_id,
            now,
        ],
    )
    .ctx("insert grocery")?;

    Ok(Grocery {
        id,
        mode,
        code: new.code.to_string(),
        name: new.name.to_string(),
        weight: new.weight,
        price: new.price,
        sell_price: new.sell_price,
        tkr: new.tkr.map(str::to_string),
        category_id: new.category_id.to_string(),
        is_sold: false,
        is_melted: false,
        sold_at: None,
        melted_at: None,
        created_at: now,
    })
}

pub fn find_by_code(conn: &Connection, mode: Mode, code: &str) -> ServiceResult<Option<Grocery>> {
    conn.query_row(
        &format!("SELECT {GROCERY_COLUMNS} FROM groceries WHERE mode = ?1 AND code = ?2"),
        params![mode, code.trim()],
        grocery_from_row,
    )
    .optional()
    .ctx("load grocery")
}

pub(crate) fn code_exists(conn: &Connection, code: &str) -> ServiceResult<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM groceries WHERE code = ?1)",
        params![code],
        |row| row.get(0),
    )
    .ctx("check grocery code")
}

/// A grocery that can leave stock: exists in this mode, not sold, not melted.
pub(crate) fn require_live(conn: &Connection, mode: Mode, code: &str) -> ServiceResult<Grocery> {
    let grocery = find_by_code(conn, mode, code)?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", code.trim())))?;
    if grocery.is_sold {
        return Err(ServiceError::rejected(
            "ITEM_SOLD",
            format!("Item {} has already been sold", grocery.code),
        ));
    }
    if grocery.is_melted {
        return Err(ServiceError::rejected(
            "ITEM_MELTED",
            format!("Item {} has already been melted", grocery.code),
        ));
    }
    Ok(grocery)
}

pub(crate) fn mark_sold(conn: &Connection, id: &str, price: f64, at: &str) -> ServiceResult<()> {
    conn.execute(
        "UPDATE groceries SET is_sold = 1, sold_at = ?1, sell_price = ?2, updated_at = ?1
         WHERE id = ?3 AND is_sold = 0 AND is_melted = 0",
        params![at, price, id],
    )
    .ctx("mark grocery sold")
    .and_then(|changed| expect_one(changed, id))
}

pub(crate) fn mark_melted(conn: &Connection, id: &str, at: &str) -> ServiceResult<()> {
    conn.execute(
        "UPDATE groceries SET is_melted = 1, melted_at = ?1, updated_at = ?1
         WHERE id = ?2 AND is_sold = 0 AND is_melted = 0",
        params![at, id],
    )
    .ctx("mark grocery melted")
    .and_then(|changed| expect_one(changed, id))
}

fn expect_one(changed: usize, id: &str) -> ServiceResult<()> {
    if changed == 1 {
        Ok(())
    } else {
        Err(ServiceError::Internal(format!(
            "grocery {id} changed state concurrently"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::tests::seed_category;
    use crate::db;

    #[test]
    fn test_live_item_state_checks() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin");
        let new = |code| NewGrocery {
            code,
            name: "Cincin",
            weight: 2.0,
            price: 1_000_000.0,
            sell_price: None,
            tkr: None,
            category_id: &cat.id,
        };
        let sold = insert_grocery(&conn, Mode::Tua, &new("CCTAA00001")).unwrap();
        let melted = insert_grocery(&conn, Mode::Tua, &new("CCTAA00002")).unwrap();
        insert_grocery(&conn, Mode::Tua, &new("CCTAA00003")).unwrap();

        mark_sold(&conn, &sold.id, 1_200_000.0, "2024-05-01T10:00:00+07:00").unwrap();
        mark_melted(&conn, &melted.id, "2024-05-01T10:00:00+07:00").unwrap();

        let err = require_live(&conn, Mode::Tua, "CCTAA00001").unwrap_err();
        assert_eq!(err.code(), Some("ITEM_SOLD"));
        let err = require_live(&conn, Mode::Tua, "CCTAA00002").unwrap_err();
        assert_eq!(err.code(), Some("ITEM_MELTED"));
        assert!(require_live(&conn, Mode::Tua, " CCTAA00003 ").is_ok());
        assert!(matches!(
            require_live(&conn, Mode::Muda, "CCTAA00003"),
            Err(ServiceError::NotFound(_))
        ));

        // second transition on the same row is refused
        assert!(mark_sold(&conn, &sold.id, 1.0, "later").is_err());
    }
}
