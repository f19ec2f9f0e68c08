//! Lebur: melting a batch of live items.
//!
//! The batch is all-or-nothing. Every code must resolve to a live grocery in
//! the requested mode before anything is written.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::categories;
use crate::data_helpers::{business_date_today, clean_text, date_range, now_rfc3339};
use crate::db::with_immediate_tx;
use crate::error::{ServiceError, ServiceResult};
use crate::groceries;
use crate::mode::Mode;
use crate::outgoing::{self, OutgoingItem, OutgoingKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeburInput {
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeburResult {
    pub count: usize,
    pub total_weight: f64,
    pub items: Vec<OutgoingItem>,
}

pub fn melt_items(conn: &Connection, mode: Mode, input: &LeburInput) -> ServiceResult<LeburResult> {
    let mut seen = HashSet::new();
    let mut codes = Vec::with_capacity(input.codes.len());
    for raw in &input.codes {
        let code = clean_text(Some(raw))
            .ok_or_else(|| ServiceError::Validation("codes must not contain blanks".into()))?
            .to_ascii_uppercase();
        if !seen.insert(code.clone()) {
            return Err(ServiceError::Validation(format!("Code {code} is listed twice")));
        }
        codes.push(code);
    }
    if codes.is_empty() {
        return Err(ServiceError::Validation("codes must not be empty".into()));
    }

    with_immediate_tx(conn, |conn| {
        let items = codes
            .iter()
            .map(|code| groceries::require_live(conn, mode, code))
            .collect::<ServiceResult<Vec<_>>>()?;

        let now = now_rfc3339();
        let business_date = business_date_today();
        let mut melted = Vec::with_capacity(items.len());
        for grocery in &items {
            groceries::mark_melted(conn, &grocery.id, &now)?;
            let id = outgoing::record(
                conn,
                OutgoingKind::Lebur,
                grocery,
                None,
                0.0,
                &business_date,
                &now,
            )?;
            categories::adjust_stock(conn, &grocery.category_id, -1, -grocery.weight)?;
            melted.push(outgoing::get(conn, &id)?);
        }

        let total_weight: f64 = items.iter().map(|g| g.weight).sum();
        info!(mode = %mode, count = items.len(), total_weight, "Lebur batch recorded");
        Ok(LeburResult {
            count: melted.len(),
            total_weight,
            items: melted,
        })
    })
}

pub fn list_lebur(
    conn: &Connection,
    mode: Mode,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> ServiceResult<Vec<OutgoingItem>> {
    let (start, end) = date_range(start_date, end_date)?;
    outgoing::list(conn, mode, OutgoingKind::Lebur, &start, &end)
}

// ===========================================================================
// Tests
// ===========================================================================
