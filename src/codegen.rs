//! Sequential item codes.
//!
//! Layout: `<category:2><mode:1><series:2><counter:5>`, e.g. `CCTAA00001`.
//! Within one category and mode, codes strictly increase: the counter runs
//! 00001..=99999, then the series advances (`AA` → `AB` → … → `AZ` → `BA`)
//! and the counter restarts at 1. `ZZ99999` is the last code of a prefix.
//!
//! Issuance goes through the `code_counters` row for (mode, category code),
//! read and written inside the caller's IMMEDIATE transaction, so two
//! concurrent writers can never observe the same "last code".

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{DbContext, ServiceError, ServiceResult};
use crate::mode::Mode;

pub const CATEGORY_CODE_LEN: usize = 2;
pub const SERIES_LEN: usize = 2;
pub const COUNTER_WIDTH: usize = 5;
pub const COUNTER_MAX: u32 = 99_999;
pub const CODE_LEN: usize = CATEGORY_CODE_LEN + 1 + SERIES_LEN + COUNTER_WIDTH;

/// Position of a code within its category+mode sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    series: [u8; SERIES_LEN],
    counter: u32,
}

impl Position {
    pub const FIRST: Position = Position {
        series: *b"AA",
        counter: 1,
    };

    pub fn from_parts(series: &str, counter: u32) -> Option<Position> {
        let bytes = series.as_bytes();
        if bytes.len() != SERIES_LEN || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return None;
        }
        if counter > COUNTER_MAX {
            return None;
        }
        Some(Position {
            series: [bytes[0], bytes[1]],
            counter,
        })
    }

    pub fn series(&self) -> String {
        String::from_utf8_lossy(&self.series).into_owned()
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The position after this one, or `None` past `ZZ99999`.
    pub fn next(self) -> Option<Position> {
        if self.counter < COUNTER_MAX {
            return Some(Position {
                series: self.series,
                counter: self.counter + 1,
            });
        }
        let [first, second] = self.series;
        let series = if second < b'Z' {
            [first, second + 1]
        } else if first < b'Z' {
            [first + 1, b'A']
        } else {
            return None;
        };
        Some(Position { series, counter: 1 })
    }

    pub fn render(&self, category_code: &str, mode: Mode) -> String {
        format!(
            "{category_code}{}{}{:0width$}",
            mode.code_prefix(),
            self.series(),
            self.counter,
            width = COUNTER_WIDTH
        )
    }
}

/// A code split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCode {
    pub category_code: String,
    pub mode_prefix: char,
    pub position: Position,
}

/// Validate and normalize a category code (two ASCII letters, uppercased).
pub fn normalize_category_code(raw: &str) -> ServiceResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != CATEGORY_CODE_LEN || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ServiceError::Validation(format!(
            "Category code must be {CATEGORY_CODE_LEN} letters, got '{}'",
            raw.trim()
        )));
    }
    Ok(code)
}

/// Parse a code in the unified layout. Legacy layouts return `None`.
pub fn parse_code(code: &str) -> Option<ParsedCode> {
    if code.len() != CODE_LEN || !code.is_ascii() {
        return None;
    }
    let (category_code, rest) = code.split_at(CATEGORY_CODE_LEN);
    let (prefix, rest) = rest.split_at(1);
    let (series, digits) = rest.split_at(SERIES_LEN);

    if !category_code.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let mode_prefix = prefix.chars().next()?;
    if !mode_prefix.is_ascii_uppercase() {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let counter: u32 = digits.parse().ok()?;
    let position = Position::from_parts(series, counter)?;

    Some(ParsedCode {
        category_code: category_code.to_string(),
        mode_prefix,
        position,
    })
}

/// Position that follows `previous` for the given category and mode.
///
/// Starts over at `AA00001` when there is no previous code, when it belongs
/// to another category or mode, or when it is not in the unified layout.
pub fn next_position(
    category_code: &str,
    mode: Mode,
    previous: Option<&str>,
) -> ServiceResult<Position> {
    let parsed = previous.and_then(parse_code).filter(|p| {
        p.category_code == category_code && p.mode_prefix == mode.code_prefix()
    });
    match parsed {
        Some(p) => p.position.next().ok_or_else(|| exhausted(category_code, mode)),
        None => Ok(Position::FIRST),
    }
}

/// The code that follows `previous` for the given category and mode.
pub fn next_code(category_code: &str, mode: Mode, previous: Option<&str>) -> ServiceResult<String> {
    let category_code = normalize_category_code(category_code)?;
    Ok(next_position(&category_code, mode, previous)?.render(&category_code, mode))
}

fn exhausted(category_code: &str, mode: Mode) -> ServiceError {
    ServiceError::CodeSpaceExhausted(format!("{category_code}{}", mode.code_prefix()))
}

// ---------------------------------------------------------------------------
// Issuance
// ---------------------------------------------------------------------------

/// Issue the next code for (mode, category code) and persist the counter.
///
/// Must be called inside `db::with_immediate_tx`. Codes already present in
/// `groceries` or `incoming_items` (e.g. entered by hand at wash completion)
/// are skipped.
pub fn issue_code(conn: &Connection, mode: Mode, category_code: &str) -> ServiceResult<String> {
    let category_code = normalize_category_code(category_code)?;
    let (position, code) = next_free(conn, mode, &category_code)?;

    conn.execute(
        "INSERT INTO code_counters (mode, category_code, series, counter, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(mode, category_code) DO UPDATE SET
            series = excluded.series,
            counter = excluded.counter,
            updated_at = excluded.updated_at",
        params![
            mode.as_str(),
            category_code,
            position.series(),
            position.counter(),
            Local::now().to_rfc3339(),
        ],
    )
    .ctx("update code counter")?;

    debug!(mode = %mode, code = %code, "Issued item code");
    Ok(code)
}

/// The code `issue_code` would return next, without consuming it.
pub fn peek_code(conn: &Connection, mode: Mode, category_code: &str) -> ServiceResult<String> {
    let category_code = normalize_category_code(category_code)?;
    next_free(conn, mode, &category_code).map(|(_, code)| code)
}

fn next_free(
    conn: &Connection,
    mode: Mode,
    category_code: &str,
) -> ServiceResult<(Position, String)> {
    let stored: Option<(String, u32)> = conn
        .query_row(
            "SELECT series, counter FROM code_counters WHERE mode = ?1 AND category_code = ?2",
            params![mode.as_str(), category_code],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .ctx("load code counter")?;

    let mut position = match stored {
        Some((series, counter)) => Position::from_parts(&series, counter)
            .ok_or_else(|| {
                ServiceError::Internal(format!(
                    "Corrupt code counter for {category_code}/{mode}: {series}{counter}"
                ))
            })?
            .next()
            .ok_or_else(|| exhausted(category_code, mode))?,
        None => {
            let latest = latest_stored_code(conn, mode, category_code)?;
            next_position(category_code, mode, latest.as_deref())?
        }
    };

    loop {
        let code = position.render(category_code, mode);
        if !code_in_use(conn, &code)? {
            return Ok((position, code));
        }
        position = position.next().ok_or_else(|| exhausted(category_code, mode))?;
    }
}

/// Most recent unified-layout code stored for this category and mode.
fn latest_stored_code(
    conn: &Connection,
    mode: Mode,
    category_code: &str,
) -> ServiceResult<Option<String>> {
    let prefix = format!("{category_code}{}", mode.code_prefix());
    conn.query_row(
        "SELECT code FROM (
            SELECT code FROM groceries WHERE code LIKE ?1 || '%'
            UNION ALL
            SELECT code FROM incoming_items WHERE code LIKE ?1 || '%'
         )
         WHERE length(code) = ?2
         ORDER BY code DESC
         LIMIT 1",
        params![prefix, CODE_LEN as i64],
        |row| row.get(0),
    )
    .optional()
    .ctx("latest stored code")
}

pub(crate) fn code_in_use(conn: &Connection, code: &str) -> ServiceResult<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM groceries WHERE code = ?1)
             OR EXISTS (SELECT 1 FROM incoming_items WHERE code = ?1)",
        params![code],
        |row| row.get(0),
    )
    .ctx("check code in use")
}

// ===========================================================================
// Tests
// ===========================================================================
