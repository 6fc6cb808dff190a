//! Aggregates over the records sheet.
//!
//! The sheet keeps a single synthetic `TOTAL` row after the last record. Every
//! append clears that row, writes the new record in its place and writes a
//! fresh `TOTAL` row below it. Rows are 1-based and row 1 is the header, so
//! data always starts at row 2.

use serde::Serialize;

use crate::a1::{col_to_letter, row_range};
use crate::record::{Field, ProductRecord, Schema, normalize, pad_row};
use crate::store::RawRow;

/// Marker in the first cell of the totals row.
pub const TOTAL_MARKER: &str = "TOTAL";

/// First row holding a record.
pub const FIRST_DATA_ROW: u32 = 2;

pub fn is_totals_row(row: &[String]) -> bool {
    row.first().is_some_and(|cell| cell.trim() == TOTAL_MARKER)
}

/// Writes needed to add one record while keeping the totals row last.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendPlan {
    /// Row of a stale totals row to clear first, if any
    pub stale_totals_row: Option<u32>,
    pub data_row_index: u32,
    pub data_row: RawRow,
    pub totals_row_index: u32,
    pub totals_row: RawRow,
}

impl AppendPlan {
    pub fn data_range(&self, schema: Schema) -> String {
        row_range(self.data_row_index, schema.width() as u32)
    }

    pub fn totals_range(&self, schema: Schema) -> String {
        row_range(self.totals_row_index, schema.width() as u32)
    }

    pub fn stale_range(&self, schema: Schema) -> Option<String> {
        self.stale_totals_row
            .map(|row| row_range(row, schema.width() as u32))
    }
}

/// Plan the append of `new_row` below `existing`, which is the sheet as read
/// back from row 1 (header included).
///
/// # Arguments
/// * `existing` - Current sheet rows, header first
/// * `new_row` - Record row to add
/// * `schema` - Column layout of the sheet
///
/// # Returns
/// * `AppendPlan` - Stale totals row to clear, then the data and totals writes
pub fn append_with_totals(existing: &[RawRow], new_row: RawRow, schema: Schema) -> AppendPlan {
    let mut occupied = existing.len() as u32;
    let mut stale_totals_row = None;

    if existing.last().is_some_and(|row| is_totals_row(row)) {
        stale_totals_row = Some(occupied);
        occupied -= 1;
    }

    let data_row_index = (occupied + 1).max(FIRST_DATA_ROW);
    let totals_row_index = data_row_index + 1;

    AppendPlan {
        stale_totals_row,
        data_row_index,
        data_row: pad_row(&new_row, schema.width()),
        totals_row_index,
        totals_row: totals_row(schema, data_row_index),
    }
}

/// Totals row whose aggregates span rows 2 through `last_data_row`.
///
/// Quantity, revenue and profit are `SUM`s of their columns. The cost column
/// holds `SUMPRODUCT(cost, quantity)`, the total cost of goods sold, not a
/// sum of unit costs.
///
/// # Arguments
/// * `schema` - Column layout of the records sheet
/// * `last_data_row` - 1-based row of the last record
///
/// # Returns
/// * `RawRow` - `TOTAL` marker in the first cell and the formulas in place
pub fn totals_row(schema: Schema, last_data_row: u32) -> RawRow {
    let span = |field: Field| {
        let col = col_to_letter(schema.column(field));
        format!("{col}{FIRST_DATA_ROW}:{col}{last_data_row}")
    };

    let mut row = vec![String::new(); schema.width()];
    let mut set = |field: Field, value: String| {
        row[schema.column(field) as usize - 1] = value;
    };

    set(
        Field::CostPrice,
        format!(
            "=SUMPRODUCT({},{})",
            span(Field::CostPrice),
            span(Field::Quantity)
        ),
    );
    set(Field::Quantity, format!("=SUM({})", span(Field::Quantity)));
    set(Field::Revenue, format!("=SUM({})", span(Field::Revenue)));
    set(Field::Profit, format!("=SUM({})", span(Field::Profit)));

    row[0] = TOTAL_MARKER.to_string();
    row
}

/// Totals over a set of records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Totals {
    pub count: usize,
    pub quantity: i64,
    pub revenue: f64,
    pub profit: f64,
}

/// Sum the records shown in the "Records" view.
///
/// The quantity sum saturates at `i64::MAX`.
///
/// # Arguments
/// * `records` - Normalized records, totals row already excluded
///
/// # Returns
/// * `Totals` - Record count and the quantity, revenue and profit sums
pub fn summarize(records: &[ProductRecord]) -> Totals {
    records.iter().fold(Totals::default(), |acc, rec| Totals {
        count: acc.count + 1,
        quantity: acc.quantity.saturating_add(rec.quantity),
        revenue: acc.revenue + rec.revenue,
        profit: acc.profit + rec.profit,
    })
}

/// Normalize the data rows of a sheet read back from row 1, skipping the
/// header and any totals row.
pub fn records_from_sheet(rows: &[RawRow], schema: Schema) -> Vec<ProductRecord> {
    rows.iter()
        .skip(1)
        .filter(|row| !is_totals_row(row))
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| normalize(row, schema))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_row_for_standard_schema() {
        let row = totals_row(Schema::Standard, 4);
        assert_eq!(row.len(), 9);
        assert_eq!(row[0], "TOTAL");
        assert_eq!(row[3], "=SUMPRODUCT(D2:D4,E2:E4)");
        assert_eq!(row[4], "=SUM(E2:E4)");
        assert_eq!(row[5], "=SUM(F2:F4)");
        assert_eq!(row[6], "=SUM(G2:G4)");
        assert_eq!(row[8], "");
    }

    #[test]
    fn totals_row_marker_stays_first_with_customer() {
        let row = totals_row(Schema::WithCustomer, 2);
        assert_eq!(row.len(), 10);
        assert_eq!(row[0], "TOTAL");
        assert_eq!(row[6], "=SUM(G2:G2)");
        assert_eq!(row[7], "=SUM(H2:H2)");
    }

    #[test]
    fn header_only_sheet_starts_at_row_two() {
        let existing = vec![Schema::Standard.header()];
        let plan = append_with_totals(&existing, vec!["x".into()], Schema::Standard);
        assert_eq!(plan.stale_totals_row, None);
        assert_eq!(plan.data_row_index, 2);
        assert_eq!(plan.totals_row_index, 3);
        assert_eq!(plan.data_row.len(), 9);
        assert_eq!(plan.totals_range(Schema::Standard), "A3:I3");
    }

    #[test]
    fn empty_sheet_still_reserves_header() {
        let plan = append_with_totals(&[], vec!["x".into()], Schema::Standard);
        assert_eq!(plan.data_row_index, 2);
    }

    #[test]
    fn stale_totals_slot_is_reused() {
        let existing = vec![
            Schema::Standard.header(),
            vec!["d".into()],
            totals_row(Schema::Standard, 2),
        ];
        let plan = append_with_totals(&existing, vec!["e".into()], Schema::Standard);
        assert_eq!(plan.stale_totals_row, Some(3));
        assert_eq!(plan.stale_range(Schema::Standard).as_deref(), Some("A3:I3"));
        assert_eq!(plan.data_row_index, 3);
        assert_eq!(plan.totals_row[5], "=SUM(F2:F3)");
    }
}
