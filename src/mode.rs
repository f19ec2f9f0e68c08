//! Operating mode: emas tua (old gold) and emas muda (young gold).
//!
//! Both product lines share one schema. The mode is stored as a column on
//! every mode-scoped row and passed explicitly to every operation.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Tua,
    Muda,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Tua, Mode::Muda];

    /// Value stored in the `mode` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Tua => "tua",
            Mode::Muda => "muda",
        }
    }

    /// Third character of every item code issued under this mode.
    pub fn code_prefix(self) -> char {
        match self {
            Mode::Tua => 'T',
            Mode::Muda => 'M',
        }
    }

    /// Route segment prefix: tua lives at `/api/purchases`, muda at
    /// `/api/muda-purchases`.
    pub fn route_prefix(self) -> &'static str {
        match self {
            Mode::Tua => "",
            Mode::Muda => "muda-",
        }
    }

    pub fn parse(value: &str) -> Option<Mode> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tua" | "t" => Some(Mode::Tua),
            "muda" | "m" => Some(Mode::Muda),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Mode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Mode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Mode::parse(raw).ok_or_else(|| FromSqlError::Other(format!("unknown mode '{raw}'").into()))
    }
}
