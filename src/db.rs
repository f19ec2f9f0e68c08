//! Local SQLite database layer for the Emas back office.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the write
//! transaction helper, and the shared state handed to request handlers.
//! Both operating modes share every table; mode-scoped rows carry a `mode`
//! column.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{DbContext, ServiceError, ServiceResult};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection for the duration of one unit of work.
    pub fn lock(&self) -> ServiceResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ServiceError::Internal(format!("database lock poisoned: {e}")))
    }
}

/// Current schema version. Bump when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Initialize the database at `db_path`.
///
/// Creates the parent directory if needed, opens the connection, sets
/// pragmas, and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(db_path: &Path, busy_timeout: Duration) -> ServiceResult<DbState> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ServiceError::Internal(format!("Failed to create data dir: {e}")))?;
    }

    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(db_path, busy_timeout) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(db_path);
                // Also remove WAL/SHM files if present
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(db_path, busy_timeout)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: db_path.to_path_buf(),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path, busy_timeout: Duration) -> ServiceResult<Connection> {
    let conn = Connection::open(path).ctx("sqlite open")?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )
    .ctx("pragma setup")?;
    conn.busy_timeout(busy_timeout).ctx("busy timeout")?;

    // A corrupt file opens fine but fails on first read.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .ctx("sqlite probe")?;

    Ok(conn)
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction.
///
/// IMMEDIATE takes the database write lock up front, so two writers never
/// read the same counter row before either commits. Any error rolls the
/// whole unit back.
pub fn with_immediate_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> ServiceResult<T>,
) -> ServiceResult<T> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .ctx("begin transaction")?;

    match f(conn) {
        Ok(value) => match conn.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(ServiceError::Database {
                    context: "commit",
                    source: e,
                })
            }
        },
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Highest applied migration.
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .ctx("create schema_version")?;

    let current = schema_version(conn);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

fn migration_failed(version: &'static str, source: rusqlite::Error) -> ServiceError {
    error!("{version} failed: {source}");
    ServiceError::Database {
        context: version,
        source,
    }
}

/// Migration v1: master data (categories, customers).
fn migrate_v1(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        "
        -- categories (product type + purity grade, one set per mode)
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL CHECK (mode IN ('tua', 'muda')),
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            gold_content REAL NOT NULL DEFAULT 0,
            item_count INTEGER NOT NULL DEFAULT 0,
            total_weight REAL NOT NULL DEFAULT 0,
            minimum_price REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(mode, code)
        );

        -- customers (people and suppliers, shared by both modes)
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            id_number TEXT,
            address TEXT NOT NULL DEFAULT '',
            phone_number TEXT,
            is_supplier INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_categories_mode ON categories(mode);
        CREATE INDEX IF NOT EXISTS idx_customers_identity
            ON customers(lower(trim(name)), lower(trim(address)));
        CREATE INDEX IF NOT EXISTS idx_customers_supplier ON customers(is_supplier);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| migration_failed("migration v1", e))?;

    info!("Applied migration v1 (master data)");
    Ok(())
}

/// Migration v2: stock intake (groceries, incoming ledger, washing queue).
fn migrate_v2(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        "
        -- groceries (sellable priced items with a unique code)
        CREATE TABLE IF NOT EXISTS groceries (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL CHECK (mode IN ('tua', 'muda')),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            sell_price REAL,
            tkr TEXT,
            category_id TEXT NOT NULL,
            is_sold INTEGER NOT NULL DEFAULT 0,
            is_melted INTEGER NOT NULL DEFAULT 0,
            sold_at TEXT,
            melted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(category_id) REFERENCES categories(id)
        );

        -- incoming_items (append-only ledger of units entering stock)
        CREATE TABLE IF NOT EXISTS incoming_items (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL CHECK (mode IN ('tua', 'muda')),
            code TEXT,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 1),
            price REAL NOT NULL DEFAULT 0,
            buy_price REAL,
            sell_price REAL,
            tkr TEXT,
            paid_amount REAL NOT NULL DEFAULT 0,
            source TEXT NOT NULL CHECK (source IN ('supplier', 'customer', 'washing')),
            category_id TEXT NOT NULL,
            customer_id TEXT,
            grocery_id TEXT,
            business_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(category_id) REFERENCES categories(id),
            FOREIGN KEY(customer_id) REFERENCES customers(id),
            FOREIGN KEY(grocery_id) REFERENCES groceries(id)
        );

        -- washing_items (relabeling queue for customer purchases)
        CREATE TABLE IF NOT EXISTS washing_items (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL CHECK (mode IN ('tua', 'muda')),
            incoming_item_id TEXT NOT NULL UNIQUE,
            is_washed INTEGER NOT NULL DEFAULT 0,
            washed_at TEXT,
            new_code TEXT,
            grocery_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(incoming_item_id) REFERENCES incoming_items(id) ON DELETE CASCADE,
            FOREIGN KEY(grocery_id) REFERENCES groceries(id)
        );

        CREATE INDEX IF NOT EXISTS idx_groceries_mode_category ON groceries(mode, category_id);
        CREATE INDEX IF NOT EXISTS idx_incoming_mode_code ON incoming_items(mode, code);
        CREATE INDEX IF NOT EXISTS idx_incoming_mode_date ON incoming_items(mode, business_date);
        CREATE INDEX IF NOT EXISTS idx_incoming_customer ON incoming_items(customer_id);
        CREATE INDEX IF NOT EXISTS idx_washing_mode_status ON washing_items(mode, is_washed);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| migration_failed("migration v2", e))?;

    info!("Applied migration v2 (stock intake tables)");
    Ok(())
}

/// Migration v3: outgoing ledger (sales and lebur).
fn migrate_v3(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outgoing_items (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL CHECK (mode IN ('tua', 'muda')),
            kind TEXT NOT NULL CHECK (kind IN ('sale', 'lebur')),
            grocery_id TEXT NOT NULL,
            code TEXT NOT NULL,
            category_id TEXT NOT NULL,
            customer_id TEXT,
            weight REAL NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            business_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(grocery_id) REFERENCES groceries(id),
            FOREIGN KEY(category_id) REFERENCES categories(id),
            FOREIGN KEY(customer_id) REFERENCES customers(id)
        );

        CREATE INDEX IF NOT EXISTS idx_outgoing_mode_date ON outgoing_items(mode, business_date);
        CREATE INDEX IF NOT EXISTS idx_outgoing_customer ON outgoing_items(customer_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| migration_failed("migration v3", e))?;

    info!("Applied migration v3 (outgoing_items table)");
    Ok(())
}

/// Migration v4: per category+mode code counters.
fn migrate_v4(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS code_counters (
            mode TEXT NOT NULL CHECK (mode IN ('tua', 'muda')),
            category_code TEXT NOT NULL,
            series TEXT NOT NULL,
            counter INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (mode, category_code)
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(|e| migration_failed("migration v4", e))?;

    info!("Applied migration v4 (code_counters table)");
    Ok(())
}

/// In-memory database with all migrations applied (test helper).
#[cfg(test)]
pub fn test_db_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        conn
    }

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    fn insert_category(conn: &Connection, id: &str, mode: &str, code: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO categories (id, mode, code, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'Cincin 17K', datetime('now'), datetime('now'))",
            params![id, mode, code],
        )
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("run_migrations should succeed");

        let tables = table_names(&conn);
        for expected in [
            "categories",
            "customers",
            "groceries",
            "incoming_items",
            "washing_items",
            "outgoing_items",
            "code_counters",
            "schema_version",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing {expected}"
            );
        }
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run");

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_category_code_unique_per_mode() {
        let conn = test_db();
        run_migrations(&conn).unwrap();

        insert_category(&conn, "c1", "tua", "CC").unwrap();
        insert_category(&conn, "c2", "muda", "CC").expect("same code in other mode is fine");
        assert!(
            insert_category(&conn, "c3", "tua", "CC").is_err(),
            "duplicate code within a mode must fail"
        );
        assert!(
            insert_category(&conn, "c4", "perak", "PP").is_err(),
            "unknown mode must fail the CHECK"
        );
    }

    #[test]
    fn test_grocery_code_unique() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        insert_category(&conn, "c1", "tua", "CC").unwrap();

        let insert = |id: &str| {
            conn.execute(
                "INSERT INTO groceries (id, mode, code, name, weight, category_id, created_at, updated_at)
                 VALUES (?1, 'tua', 'CCTAA00001', 'Cincin', 2.0, 'c1', datetime('now'), datetime('now'))",
                params![id],
            )
        };
        insert("g1").unwrap();
        assert!(insert("g2").is_err(), "duplicate grocery code must fail");
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        let res = conn.execute(
            "INSERT INTO groceries (id, mode, code, name, weight, category_id, created_at, updated_at)
             VALUES ('g1', 'tua', 'XXTAA00001', 'Orphan', 1.0, 'missing', datetime('now'), datetime('now'))",
            [],
        );
        assert!(res.is_err(), "grocery without category must fail");
    }

    #[test]
    fn test_immediate_tx_rolls_back_on_error() {
        let conn = test_db();
        run_migrations(&conn).unwrap();

        let result: ServiceResult<()> = with_immediate_tx(&conn, |conn| {
            insert_category(conn, "c1", "tua", "CC").ctx("insert category")?;
            Err(ServiceError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0, "insert must be rolled back");

        with_immediate_tx(&conn, |conn| {
            insert_category(conn, "c1", "tua", "CC").ctx("insert category")?;
            Ok(())
        })
        .expect("commit");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        let dir = std::env::temp_dir().join(format!("emas-db-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("emas.db");
        let state = init(&path, Duration::from_millis(500)).expect("init file db");
        {
            let conn = state.lock().unwrap();
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap();
            assert_eq!(mode.to_lowercase(), "wal");
        }
        drop(state);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_init_recovers_from_corrupt_file() {
        let dir = std::env::temp_dir().join(format!("emas-db-corrupt-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("emas.db");
        fs::write(&path, vec![b'x'; 4096]).unwrap();

        let state = init(&path, Duration::from_millis(500)).expect("init should recover");
        let conn = state.lock().unwrap();
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
        drop(conn);
        drop(state);
        let _ = fs::remove_dir_all(&dir);
    }
}
