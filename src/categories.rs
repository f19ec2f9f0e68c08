//! Category master data and running stock totals.
//!
//! A category is a product type plus purity grade ("Cincin 17K") scoped to
//! one mode. `item_count` / `total_weight` track live (unsold, unmelted)
//! groceries and are only changed through [`adjust_stock`]; the drift report
//! recomputes them from the groceries table.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::codegen;
use crate::data_helpers::{clean_text, like_pattern, now_rfc3339, require_text};
use crate::error::{DbContext, ServiceError, ServiceResult};
use crate::mode::Mode;
use crate::summary::{family_of, Family};

/// Weight differences below this are rounding noise.
const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub mode: Mode,
    pub code: String,
    pub name: String,
    pub family: Family,
    pub gold_content: f64,
    pub item_count: i64,
    pub total_weight: f64,
    pub minimum_price: f64,
    pub created_at: String,
    pub updated_at: String,
}

const CATEGORY_COLUMNS: &str = "id, mode, code, name, gold_content, item_count, total_weight,
     minimum_price, created_at, updated_at";

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    let name: String = row.get(3)?;
    Ok(Category {
        id: row.get(0)?,
        mode: row.get(1)?,
        code: row.get(2)?,
        family: family_of(&name),
        name,
        gold_content: row.get(4)?,
        item_count: row.get(5)?,
        total_weight: row.get(6)?,
        minimum_price: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub code: String,
    pub name: String,
    #[serde(default, alias = "gold_content")]
    pub gold_content: f64,
    #[serde(default, alias = "minimum_price")]
    pub minimum_price: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdate {
    pub name: Option<String>,
    #[serde(alias = "gold_content")]
    pub gold_content: Option<f64>,
    #[serde(alias = "minimum_price")]
    pub minimum_price: Option<f64>,
}

fn check_non_negative(field: &str, value: f64) -> ServiceResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ServiceError::Validation(format!(
            "{field} must be a non-negative number"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

pub fn create_category(conn: &Connection, mode: Mode, input: &NewCategory) -> ServiceResult<Category> {
    let code = codegen::normalize_category_code(&input.code)?;
    let name = require_text("name", Some(&input.name))?;
    check_non_negative("goldContent", input.gold_content)?;
    check_non_negative("minimumPrice", input.minimum_price)?;

    let exists: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM categories WHERE mode = ?1 AND code = ?2)",
            params![mode, code],
            |row| row.get(0),
        )
        .ctx("check category code")?;
    if exists {
        return Err(ServiceError::rejected(
            "DUPLICATE_CATEGORY",
            format!("Category code {code} already exists"),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO categories (id, mode, code, name, gold_content, minimum_price, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, mode, code, name, input.gold_content, input.minimum_price, now],
    )
    .ctx("insert category")?;

    info!(category_id = %id, mode = %mode, code = %code, "Category created");
    get_category(conn, mode, &id)
}

pub fn list_categories(conn: &Connection, mode: Mode, search: Option<&str>) -> ServiceResult<Vec<Category>> {
    let pattern = clean_text(search).map(|s| like_pattern(&s));
    let sql = format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories
         WHERE mode = ?1
           AND (?2 IS NULL OR name LIKE ?2 ESCAPE '\\' OR code LIKE ?2 ESCAPE '\\')
         ORDER BY code ASC"
    );
    let mut stmt = conn.prepare(&sql).ctx("prepare category list")?;
    let rows = stmt
        .query_map(params![mode, pattern], category_from_row)
        .ctx("query categories")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read categories")
}

fn find_category(conn: &Connection, mode: Mode, id: &str) -> ServiceResult<Option<Category>> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1 AND mode = ?2");
    conn.query_row(&sql, params![id, mode], category_from_row)
        .optional()
        .ctx("load category")
}

/// Addressed lookup: a missing category is a 404.
pub fn get_category(conn: &Connection, mode: Mode, id: &str) -> ServiceResult<Category> {
    find_category(conn, mode, id)?
        .ok_or_else(|| ServiceError::NotFound("Category not found".into()))
}

/// Lookup for a write that references the category: a missing one is a 400.
pub(crate) fn require_category(conn: &Connection, mode: Mode, id: &str) -> ServiceResult<Category> {
    find_category(conn, mode, id)?
        .ok_or_else(|| ServiceError::MissingReference("Category not found".into()))
}

pub fn update_category(
    conn: &Connection,
    mode: Mode,
    id: &str,
    update: &CategoryUpdate,
) -> ServiceResult<Category> {
    let current = get_category(conn, mode, id)?;

    let name = match update.name.as_deref() {
        Some(raw) => require_text("name", Some(raw))?,
        None => current.name,
    };
    let gold_content = update.gold_content.unwrap_or(current.gold_content);
    let minimum_price = update.minimum_price.unwrap_or(current.minimum_price);
    check_non_negative("goldContent", gold_content)?;
    check_non_negative("minimumPrice", minimum_price)?;

    conn.execute(
        "UPDATE categories SET name = ?1, gold_content = ?2, minimum_price = ?3, updated_at = ?4
         WHERE id = ?5 AND mode = ?6",
        params![name, gold_content, minimum_price, now_rfc3339(), id, mode],
    )
    .ctx("update category")?;

    info!(category_id = %id, mode = %mode, "Category updated");
    get_category(conn, mode, id)
}

pub fn delete_category(conn: &Connection, mode: Mode, id: &str) -> ServiceResult<()> {
    let category = get_category(conn, mode, id)?;
    if category.item_count > 0 || category.total_weight > WEIGHT_EPSILON {
        return Err(ServiceError::rejected(
            "CATEGORY_NOT_EMPTY",
            format!(
                "Category {} still holds {} items ({:.3} g)",
                category.code, category.item_count, category.total_weight
            ),
        ));
    }

    let referenced: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM groceries WHERE category_id = ?1)
                 OR EXISTS (SELECT 1 FROM incoming_items WHERE category_id = ?1)
                 OR EXISTS (SELECT 1 FROM outgoing_items WHERE category_id = ?1)",
            params![id],
            |row| row.get(0),
        )
        .ctx("check category references")?;
    if referenced {
        return Err(ServiceError::rejected(
            "CATEGORY_IN_USE",
            format!("Category {} has transaction history", category.code),
        ));
    }

    conn.execute("DELETE FROM categories WHERE id = ?1", params![id])
        .ctx("delete category")?;
    info!(category_id = %id, mode = %mode, code = %category.code, "Category deleted");
    Ok(())
}

/// The code the next purchase in this category would receive.
pub fn next_code_preview(conn: &Connection, mode: Mode, id: &str) -> ServiceResult<String> {
    let category = get_category(conn, mode, id)?;
    codegen::peek_code(conn, mode, &category.code)
}

// ---------------------------------------------------------------------------
// Stock totals
// ---------------------------------------------------------------------------

/// Apply a delta to a category's running totals.
pub(crate) fn adjust_stock(
    conn: &Connection,
    category_id: &str,
    item_delta: i64,
    weight_delta: f64,
) -> ServiceResult<()> {
    let changed = conn
        .execute(
            "UPDATE categories
             SET item_count = item_count + ?1,
                 total_weight = total_weight + ?2,
                 updated_at = ?3
             WHERE id = ?4",
            params![item_delta, weight_delta, now_rfc3339(), category_id],
        )
        .ctx("adjust category stock")?;
    if changed == 0 {
        return Err(ServiceError::MissingReference("Category not found".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDrift {
    pub category_id: String,
    pub code: String,
    pub name: String,
    pub recorded_count: i64,
    pub recorded_weight: f64,
    pub live_count: i64,
    pub live_weight: f64,
}

/// Categories whose running totals disagree with their live groceries.
pub fn drift_report(conn: &Connection, mode: Mode) -> ServiceResult<Vec<StockDrift>> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.code, c.name, c.item_count, c.total_weight,
                    COUNT(g.id), COALESCE(SUM(g.weight), 0.0)
             FROM categories c
             LEFT JOIN groceries g
               ON g.category_id = c.id AND g.is_sold = 0 AND g.is_melted = 0
             WHERE c.mode = ?1
             GROUP BY c.id
             ORDER BY c.code",
        )
        .ctx("prepare drift query")?;
    let rows = stmt
        .query_map(params![mode], |row| {
            Ok(StockDrift {
                category_id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                recorded_count: row.get(3)?,
                recorded_weight: row.get(4)?,
                live_count: row.get(5)?,
                live_weight: row.get(6)?,
            })
        })
        .ctx("query drift")?;

    let drifted: Vec<StockDrift> = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read drift rows")?
        .into_iter()
        .filter(|d| {
            d.recorded_count != d.live_count
                || (d.recorded_weight - d.live_weight).abs() > WEIGHT_EPSILON
        })
        .collect();

    if !drifted.is_empty() {
        warn!(mode = %mode, categories = drifted.len(), "Category stock drift detected");
    }
    Ok(drifted)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub(crate) fn seed_category(conn: &Connection, mode: Mode, code: &str, name: &str) -> Category {
        create_category(
            conn,
            mode,
            &NewCategory {
                code: code.into(),
                name: name.into(),
                gold_content: 75.0,
                minimum_price: 0.0,
            },
        )
        .expect("seed category")
    }

    #[test]
    fn test_create_and_get_category() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "cc", "Cincin 17K");
        assert_eq!(cat.code, "CC");
        assert_eq!(cat.family, Family::Ring);
        assert_eq!(cat.item_count, 0);
        assert_eq!(get_category(&conn, Mode::Tua, &cat.id).unwrap(), cat);
        assert!(matches!(
            get_category(&conn, Mode::Muda, &cat.id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_code_rejected_within_mode_only() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        seed_category(&conn, Mode::Muda, "CC", "Cincin 8K");
        let err = create_category(
            &conn,
            Mode::Tua,
            &NewCategory {
                code: "CC".into(),
                name: "Another".into(),
                gold_content: 0.0,
                minimum_price: 0.0,
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), Some("DUPLICATE_CATEGORY"));
    }

    #[test]
    fn test_create_validates_input() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let bad = |code: &str, name: &str, min: f64| {
            create_category(
                &conn,
                Mode::Tua,
                &NewCategory {
                    code: code.into(),
                    name: name.into(),
                    gold_content: 0.0,
                    minimum_price: min,
                },
            )
        };
        assert!(matches!(bad("C", "Cincin", 0.0), Err(ServiceError::Validation(_))));
        assert!(matches!(bad("CC", "  ", 0.0), Err(ServiceError::Validation(_))));
        assert!(matches!(bad("CC", "Cincin", -1.0), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_list_filters_by_mode_and_search() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        seed_category(&conn, Mode::Tua, "KL", "Kalung 17K");
        seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        seed_category(&conn, Mode::Muda, "GL", "Gelang 8K");

        let all = list_categories(&conn, Mode::Tua, None).unwrap();
        let codes: Vec<_> = all.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["CC", "KL"]);

        let found = list_categories(&conn, Mode::Tua, Some("kalung")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "KL");
        assert_eq!(list_categories(&conn, Mode::Muda, Some("GL")).unwrap().len(), 1);
    }

    #[test]
    fn test_update_keeps_totals() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        adjust_stock(&conn, &cat.id, 2, 5.0).unwrap();

        let updated = update_category(
            &conn,
            Mode::Tua,
            &cat.id,
            &CategoryUpdate {
                name: Some("Cincin 22K".into()),
                minimum_price: Some(950_000.0),
                ..CategoryUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(updated.name, "Cincin 22K");
        assert_eq!(updated.gold_content, 75.0);
        assert_eq!(updated.minimum_price, 950_000.0);
        assert_eq!(updated.item_count, 2);
        assert_eq!(updated.total_weight, 5.0);
    }

    #[test]
    fn test_delete_refused_while_stocked() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Tua, "CC", "Cincin 17K");
        adjust_stock(&conn, &cat.id, 1, 2.0).unwrap();
        let err = delete_category(&conn, Mode::Tua, &cat.id).unwrap_err();
        assert_eq!(err.code(), Some("CATEGORY_NOT_EMPTY"));

        adjust_stock(&conn, &cat.id, -1, -2.0).unwrap();
        delete_category(&conn, Mode::Tua, &cat.id).unwrap();
        assert!(matches!(
            get_category(&conn, Mode::Tua, &cat.id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_next_code_preview_and_drift() {
        let db = db::test_db_state();
        let conn = db.lock().unwrap();
        let cat = seed_category(&conn, Mode::Muda, "GL", "Gelang");
        assert_eq!(next_code_preview(&conn, Mode::Muda, &cat.id).unwrap(), "GLMAA00001");

        assert!(drift_report(&conn, Mode::Muda).unwrap().is_empty());
        adjust_stock(&conn, &cat.id, 1, 3.0).unwrap();
        let drift = drift_report(&conn, Mode::Muda).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].recorded_count, 1);
        assert_eq!(drift[0].live_count, 0);
    }
}
