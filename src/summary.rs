//! Daily inventory and finance summaries.
//!
//! Summaries are folded at read time from the `incoming_items` and
//! `outgoing_items` ledgers, so there is no stored running total that a
//! write path could forget to update. Folding is commutative: rows may be
//! applied in any order. Weights accumulate as integer milligrams and money
//! as integer hundredths, so float rounding never depends on row order.
//!
//! Which ledger rows count:
//! - incoming `supplier` / `customer` rows: stock in, money out (`paid_amount`)
//! - incoming `washing` rows: ignored (a relabel of a customer purchase
//!   already counted when it was bought)
//! - outgoing `sale` rows: stock out, money in (`price`)
//! - outgoing `lebur` rows: non-sale stock out

use rusqlite::{params, Connection};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{AddAssign, Sub};

use crate::data_helpers::date_range;
use crate::error::{DbContext, ServiceResult};
use crate::mode::Mode;

// ---------------------------------------------------------------------------
// Fixed-point amounts
// ---------------------------------------------------------------------------

/// `value × SCALE` held as an integer. Serializes back to a plain number.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed<const SCALE: i64>(i64);

/// Grams, exact to the milligram.
pub type Grams = Fixed<1_000>;
/// Rupiah, exact to the hundredth.
pub type Money = Fixed<100>;

impl<const SCALE: i64> Fixed<SCALE> {
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * SCALE as f64).round() as i64)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

impl<const SCALE: i64> AddAssign for Fixed<SCALE> {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl<const SCALE: i64> Sub for Fixed<SCALE> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Fixed(self.0 - rhs.0)
    }
}

impl<const SCALE: i64> PartialEq<f64> for Fixed<SCALE> {
    fn eq(&self, other: &f64) -> bool {
        *self == Self::from_f64(*other)
    }
}

impl<const SCALE: i64> fmt::Debug for Fixed<SCALE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

impl<const SCALE: i64> Serialize for Fixed<SCALE> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

// ---------------------------------------------------------------------------
// Category families
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Family {
    Ring,
    Earring,
    Necklace,
    Bracelet,
    Pendant,
    StudEarring,
    Other,
}

/// Keyword table, checked in order. `giwang`/`stud` and `anting`/`earring`
/// come before `cincin`/`ring` because "earring" contains "ring".
const FAMILY_KEYWORDS: &[(&str, Family)] = &[
    ("giwang", Family::StudEarring),
    ("stud", Family::StudEarring),
    ("anting", Family::Earring),
    ("earring", Family::Earring),
    ("cincin", Family::Ring),
    ("ring", Family::Ring),
    ("kalung", Family::Necklace),
    ("necklace", Family::Necklace),
    ("gelang", Family::Bracelet),
    ("bracelet", Family::Bracelet),
    ("liontin", Family::Pendant),
    ("pendant", Family::Pendant),
];

/// Map a free-form category name ("Cincin 17K", "Gold Earring") to a family.
pub fn family_of(category_name: &str) -> Family {
    let name = category_name.to_lowercase();
    FAMILY_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, family)| *family)
        .unwrap_or(Family::Other)
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAction {
    /// Units entering stock.
    Increase,
    /// Units sold.
    Decrease,
    /// Units leaving stock without a sale (lebur).
    NonSale,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockFigures {
    pub incoming_quantity: i64,
    pub incoming_weight: Grams,
    pub outgoing_quantity: i64,
    pub outgoing_weight: Grams,
    pub non_sale_quantity: i64,
    pub non_sale_weight: Grams,
    pub total_quantity: i64,
    pub total_weight: Grams,
}

impl StockFigures {
    fn apply(&mut self, action: StockAction, weight: Grams, quantity: i64) {
        match action {
            StockAction::Increase => {
                self.incoming_quantity += quantity;
                self.incoming_weight += weight;
            }
            StockAction::Decrease => {
                self.outgoing_quantity += quantity;
                self.outgoing_weight += weight;
            }
            StockAction::NonSale => {
                self.non_sale_quantity += quantity;
                self.non_sale_weight += weight;
            }
        }
        self.total_quantity = self.incoming_quantity - self.outgoing_quantity - self.non_sale_quantity;
        self.total_weight = self.incoming_weight - self.outgoing_weight - self.non_sale_weight;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyInventory {
    pub families: BTreeMap<Family, StockFigures>,
    pub totals: StockFigures,
}

impl DailyInventory {
    /// Add one ledger movement. `weight` is the total grams moved.
    pub fn apply(&mut self, family: Family, action: StockAction, weight: f64, quantity: i64) {
        let weight = Grams::from_f64(weight);
        self.families
            .entry(family)
            .or_default()
            .apply(action, weight, quantity);
        self.totals.apply(action, weight, quantity);
    }
}

// ---------------------------------------------------------------------------
// Finance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CashFlow {
    /// Money paid out for goods bought.
    Purchase { paid: f64, weight: f64 },
    /// Money received for goods sold.
    Sale { received: f64, weight: f64 },
    /// Goods melted; no money moves.
    Melt { weight: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyFinance {
    pub money_in: Money,
    pub money_out: Money,
    pub net: Money,
    pub incoming_weight: Grams,
    pub outgoing_weight: Grams,
}

impl DailyFinance {
    pub fn apply(&mut self, flow: CashFlow) {
        match flow {
            CashFlow::Purchase { paid, weight } => {
                self.money_out += Money::from_f64(paid);
                self.incoming_weight += Grams::from_f64(weight);
            }
            CashFlow::Sale { received, weight } => {
                self.money_in += Money::from_f64(received);
                self.outgoing_weight += Grams::from_f64(weight);
            }
            CashFlow::Melt { weight } => {
                self.outgoing_weight += Grams::from_f64(weight);
            }
        }
        self.net = self.money_in - self.money_out;
    }
}

// ---------------------------------------------------------------------------
// Ledger folding
// ---------------------------------------------------------------------------

/// One ledger row reduced to what the summaries need.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub business_date: String,
    pub family: Family,
    pub kind: EntryKind,
    pub quantity: i64,
    /// Total grams for the row.
    pub weight: f64,
    /// `paid_amount` for purchases, `price` for sales, 0 for melts.
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Purchase,
    Sale,
    Melt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub business_date: String,
    pub inventory: DailyInventory,
    pub finance: DailyFinance,
}

impl DailySummary {
    pub fn apply(&mut self, entry: &LedgerEntry) {
        let (action, flow) = match entry.kind {
            EntryKind::Purchase => (
                StockAction::Increase,
                CashFlow::Purchase {
                    paid: entry.amount,
                    weight: entry.weight,
                },
            ),
            EntryKind::Sale => (
                StockAction::Decrease,
                CashFlow::Sale {
                    received: entry.amount,
                    weight: entry.weight,
                },
            ),
            EntryKind::Melt => (
                StockAction::NonSale,
                CashFlow::Melt {
                    weight: entry.weight,
                },
            ),
        };
        self.inventory
            .apply(entry.family, action, entry.weight, entry.quantity);
        self.finance.apply(flow);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub mode: Mode,
    pub start_date: String,
    pub end_date: String,
    pub days: Vec<DailySummary>,
    pub totals: DailySummary,
}

/// Fold entries into one summary per business date plus a range total.
pub fn fold_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> (Vec<DailySummary>, DailySummary) {
    let mut days: BTreeMap<String, DailySummary> = BTreeMap::new();
    let mut totals = DailySummary::default();
    for entry in entries {
        days.entry(entry.business_date.clone())
            .or_insert_with(|| DailySummary {
                business_date: entry.business_date.clone(),
                ..DailySummary::default()
            })
            .apply(entry);
        totals.apply(entry);
    }
    (days.into_values().collect(), totals)
}

/// Daily summaries for `mode` over an inclusive business-date range.
/// Both bounds default to today.
pub fn daily_report(
    conn: &Connection,
    mode: Mode,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> ServiceResult<DailyReport> {
    let (start, end) = date_range(start_date, end_date)?;
    let entries = load_entries(conn, mode, &start, &end)?;
    let (days, mut totals) = fold_entries(&entries);
    totals.business_date = format!("{start}..{end}");

    Ok(DailyReport {
        mode,
        start_date: start,
        end_date: end,
        days,
        totals,
    })
}

fn load_entries(
    conn: &Connection,
    mode: Mode,
    start: &str,
    end: &str,
) -> ServiceResult<Vec<LedgerEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT i.business_date, c.name, 'purchase', i.quantity,
                    i.weight * i.quantity, i.paid_amount
             FROM incoming_items i
             JOIN categories c ON c.id = i.category_id
             WHERE i.mode = ?1 AND i.source IN ('supplier', 'customer')
               AND i.business_date BETWEEN ?2 AND ?3
             UNION ALL
             SELECT o.business_date, c.name, o.kind, 1, o.weight, o.price
             FROM outgoing_items o
             JOIN categories c ON c.id = o.category_id
             WHERE o.mode = ?1 AND o.business_date BETWEEN ?2 AND ?3",
        )
        .ctx("prepare ledger query")?;

    let rows = stmt
        .query_map(params![mode.as_str(), start, end], |row| {
            let kind: String = row.get(2)?;
            let category_name: String = row.get(1)?;
            Ok(LedgerEntry {
                business_date: row.get(0)?,
                family: family_of(&category_name),
                kind: match kind.as_str() {
                    "sale" => EntryKind::Sale,
                    "lebur" => EntryKind::Melt,
                    _ => EntryKind::Purchase,
                },
                quantity: row.get(3)?,
                weight: row.get(4)?,
                amount: row.get(5)?,
            })
        })
        .ctx("query ledger")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .ctx("read ledger rows")
}

// ===========================================================================
// Tests
// ===========================================================================
