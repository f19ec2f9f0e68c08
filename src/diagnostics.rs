//! Diagnostics for the back office.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Health**: schema version, database size, per-mode row counts
//! - **Log rotation helpers**: used by `lib.rs` to keep the log directory bounded

use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::warn;

use crate::db::{self, DbState};
use crate::error::{DbContext, ServiceResult};
use crate::mode::Mode;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the daily rolling log (`emas.2024-05-01`).
pub const LOG_FILE_PREFIX: &str = "emas";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Collects database health for `/api/health`.
pub fn get_health(db: &DbState) -> ServiceResult<Value> {
    let conn = db.lock()?;

    let schema_version = db::schema_version(&conn);
    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    let mut modes = serde_json::Map::new();
    for mode in Mode::ALL {
        modes.insert(mode.as_str().to_string(), mode_counts(&conn, mode)?);
    }
    let customers: i64 = conn
        .query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))
        .ctx("count customers")?;

    let started = crate::APP_START_EPOCH.load(Ordering::Relaxed);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let uptime = if started == 0 { 0 } else { now.saturating_sub(started) };

    Ok(json!({
        "status": "ok",
        "schemaVersion": schema_version,
        "schemaCurrent": schema_version == db::CURRENT_SCHEMA_VERSION,
        "dbSizeBytes": db_size,
        "uptimeSecs": uptime,
        "customers": customers,
        "modes": modes,
    }))
}

fn mode_counts(conn: &Connection, mode: Mode) -> ServiceResult<Value> {
    let count = |sql: &str| -> ServiceResult<i64> {
        conn.query_row(sql, params![mode], |row| row.get(0))
            .ctx("health count")
    };
    Ok(json!({
        "categories": count("SELECT COUNT(*) FROM categories WHERE mode = ?1")?,
        "liveItems": count(
            "SELECT COUNT(*) FROM groceries WHERE mode = ?1 AND is_sold = 0 AND is_melted = 0"
        )?,
        "incomingItems": count("SELECT COUNT(*) FROM incoming_items WHERE mode = ?1")?,
        "pendingWashing": count(
            "SELECT COUNT(*) FROM washing_items WHERE mode = ?1 AND is_washed = 0"
        )?,
        "outgoingItems": count("SELECT COUNT(*) FROM outgoing_items WHERE mode = ?1")?,
    }))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the log directory, creating it if needed.
pub fn get_log_dir(configured: &Path) -> PathBuf {
    if let Err(e) = fs::create_dir_all(configured) {
        warn!("Failed to create log dir {}: {e}", configured.display());
    }
    configured.to_path_buf()
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
