//! Customers and suppliers, shared by both modes.
//!
//! Customers are created ad hoc at the counter, so creation is idempotent on
//! (trimmed, case-insensitive) name + address: an existing match is returned
//! instead of inserting a second row.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::data_helpers::{
    clean_text, like_pattern, normalize_phone, now_rfc3339, require_text, PageRequest, Paged,
};
use crate::error::{DbContext, ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub id_number: Option<String>,
    pub address: String,
    pub phone_number: Option<String>,
    pub is_supplier: bool,
    pub created_at: String,
    pub updated_at: String,
}

const CUSTOMER_COLUMNS: &str =
    "id, name, id_number, address, phone_number, is_supplier, created_at, updated_at";

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        id_number: row.get(2)?,
        address: row.get(3)?,
        phone_number: row.get(4)?,
        is_supplier: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    #[serde(default, alias = "id_number", alias = "nik")]
    pub id_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "phone_number", alias = "phone")]
    pub phone_number: Option<String>,
    #[serde(default, alias = "is_supplier")]
    pub is_supplier: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdate {
    pub name: Option<String>,
    #[serde(alias = "id_number", alias = "nik")]
    pub id_number: Option<String>,
    pub address: Option<String>,
    #[serde(alias = "phone_number", alias = "phone")]
    pub phone_number: Option<String>,
    #[serde(alias = "is_supplier")]
    pub is_supplier: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerQuery {
    #[serde(alias = "q")]
    pub search: Option<String>,
    #[serde(alias = "is_supplier")]
    pub is_supplier: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Returned by [`create_customer`]: `created` is false when an existing
/// customer matched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerCreated {
    pub customer: Customer,
    pub created: bool,
}

fn clean_phone(value: Option<&str>) -> Option<String> {
    clean_text(value)
        .map(|p| normalize_phone(&p))
        .filter(|p| !p.is_empty())
}

pub fn create_customer(conn: &Connection, input: &NewCustomer) -> ServiceResult<CustomerCreated> {
    let name = require_text("name", Some(&input.name))?;
    let address = clean_text(input.address.as_deref()).unwrap_or_default();

    let existing = conn
        .query_row(
            &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers
                 WHERE lower(trim(name)) = lower(?1) AND lower(trim(address)) = lower(?2)
                 ORDER BY created_at ASC
                 LIMIT 1"
            ),
            params![name, address],
            customer_from_row,
        )
        .optional()
        .ctx("find customer")?;
    if let Some(customer) = existing {
        debug!(customer_id = %customer.id, "Customer already exists, reusing");
        return Ok(CustomerCreated {
            customer,
            created: false,
        });
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO customers (id, name, id_number, address, phone_number, is_supplier, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id,
            name,
            clean_text(input.id_number.as_deref()),
            address,
            clean_phone(input.phone_number.as_deref()),
            input.is_supplier,
            now,
        ],
    )
    .ctx("insert customer")?;

    info!(customer_id = %id, is_supplier = input.is_supplier, "Customer created");
    Ok(CustomerCreated {
        customer: get_customer(conn, &id)?,
        created: true,
    })
}

fn find_customer(conn: &Connection, id: &str) -> ServiceResult<Option<Customer>> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
        params![id],
        customer_from_row,
    )
    .optional()
    .ctx("load customer")
}

pub fn get_customer(conn: &Connection, id: &str) -> ServiceResult<Customer> {
    find_customer(conn, id)?.ok_or_else(|| ServiceError::NotFound("Customer not found".into()))
}

/// Lookup for a write that references the customer: a missing one is a 400.
pub(crate) fn require_customer(conn: &Connection, id: &str) -> ServiceResult<Customer> {
    find_customer(conn, id)?
        .ok_or_else(|| ServiceError::MissingReference("Customer not found".into()))
}

pub fn list_customers(
    conn: &Connection,
    query: &CustomerQuery,
    default_limit: u32,
    max_limit: u32,
) -> ServiceResult<Paged<Customer>> {
    let page = PageRequest::new(query.page, query.limit, default_limit, max_limit);
    let pattern = clean_text(query.search.as_deref()).map(|s| like_pattern(&s));
    let filter = "(?1 IS NULL OR name LIKE ?1 ESCAPE '\\' OR address LIKE ?1 ESCAPE '\\'
                   OR phone_number LIKE ?1 ESCAPE '\\' OR id_number LIKE ?1 ESCAPE '\\')
              AND (?2 IS NULL OR is_supplier = ?2)";

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM customers WHERE {filter}"),
            params![pattern, query.is_supplier],
            |row| row.get(0),
        )
        .ctx("count customers")?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE {filter}
             ORDER BY name COLLATE NOCASE ASC, created_at ASC
             LIMIT ?3 OFFSET ?4"
        ))
        .ctx("prepare customer list")?;
    let items = stmt
        .query_map(
            params![pattern, query.is_supplier, page.limit, page.offset()],
            customer_from_row,
        )
        .ctx("query customers")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read customers")?;

    Ok(Paged::new(items, total, page))
}

pub fn update_customer(conn: &Connection, id: &str, update: &CustomerUpdate) -> ServiceResult<Customer> {
    let current = get_customer(conn, id)?;

    let name = match update.name.as_deref() {
        Some(raw) => require_text("name", Some(raw))?,
        None => current.name,
    };
    let address = match update.address.as_deref() {
        Some(raw) => raw.trim().to_string(),
        None => current.address,
    };
    let id_number = match update.id_number.as_deref() {
        Some(raw) => clean_text(Some(raw)),
        None => current.id_number,
    };
    let phone_number = match update.phone_number.as_deref() {
        Some(raw) => clean_phone(Some(raw)),
        None => current.phone_number,
    };
    let is_supplier = update.is_supplier.unwrap_or(current.is_supplier);

    conn.execute(
        "UPDATE customers
         SET name = ?1, id_number = ?2, address = ?3, phone_number = ?4, is_supplier = ?5, updated_at = ?6
         WHERE id = ?7",
        params![name, id_number, address, phone_number, is_supplier, now_rfc3339(), id],
    )
    .ctx("update customer")?;

    info!(customer_id = %id, "Customer updated");
    get_customer(conn, id)
}

pub fn delete_customer(conn: &Connection, id: &str) -> ServiceResult<()> {
    get_customer(conn, id)?;
    let in_use: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM incoming_items WHERE customer_id = ?1)
                 OR EXISTS (SELECT 1 FROM outgoing_items WHERE customer_id = ?1)",
            params![id],
            |row| row.get(0),
        )
        .ctx("check customer references")?;
    if in_use {
        return Err(ServiceError::rejected(
            "CUSTOMER_IN_USE",
            "Customer has recorded transactions",
        ));
    }
    conn.execute("DELETE FROM customers WHERE id = ?1", params![id])
        .ctx("delete customer")?;
    info!(customer_id = %id, "Customer deleted");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
