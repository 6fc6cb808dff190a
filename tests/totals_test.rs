use recorder::record::{ProductRecord, RecordDraft, Schema, normalize};
use recorder::totals::{AppendPlan, append_with_totals, is_totals_row, records_from_sheet, summarize, totals_row};

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
}

fn record_row(name: &str, revenue: f64) -> Vec<String> {
    let draft = RecordDraft {
        customer_name: None,
        product_name: name.to_string(),
        selling_price: revenue,
        cost_price: 0.0,
        quantity: 1,
    };
    ProductRecord::create(&draft, "2026-10-19 10:00".into(), "u").to_row(Schema::Standard)
}

// Apply a plan to an in-memory copy of the sheet (row 1 at index 0).
fn apply(sheet: &mut Vec<Vec<String>>, plan: &AppendPlan) {
    if let Some(stale) = plan.stale_totals_row {
        sheet[stale as usize - 1] = vec![String::new(); 9];
    }
    for (index, cells) in [
        (plan.data_row_index, &plan.data_row),
        (plan.totals_row_index, &plan.totals_row),
    ] {
        let i = index as usize - 1;
        if sheet.len() <= i {
            sheet.resize(i + 1, Vec::new());
        }
        sheet[i] = cells.clone();
    }
}

#[test]
fn test_totals_churn_leaves_single_trailing_total() {
    let mut sheet = vec![Schema::Standard.header()];

    for n in 1..=6u32 {
        let plan = append_with_totals(&sheet, record_row(&format!("p{n}"), 10.0), Schema::Standard);
        apply(&mut sheet, &plan);

        let totals: Vec<usize> = sheet
            .iter()
            .enumerate()
            .filter(|(_, r)| is_totals_row(r))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(totals, vec![sheet.len() - 1], "after {n} appends");
        assert_eq!(sheet.len() as u32, n + 2);

        let last = sheet.last().unwrap();
        assert_eq!(last[5], format!("=SUM(F2:F{})", n + 1));
        assert_eq!(last[6], format!("=SUM(G2:G{})", n + 1));
    }
    println!("✓ six appends leave one TOTAL row covering rows 2..7");
}

#[test]
fn test_missing_totals_row_is_healed() {
    // a save that crashed before writing totals
    let mut sheet = vec![
        Schema::Standard.header(),
        record_row("a", 1.0),
        record_row("b", 2.0),
    ];
    let plan = append_with_totals(&sheet, record_row("c", 3.0), Schema::Standard);
    assert_eq!(plan.stale_totals_row, None);
    assert_eq!(plan.data_row_index, 4);
    apply(&mut sheet, &plan);
    assert!(is_totals_row(sheet.last().unwrap()));
    assert_eq!(sheet.last().unwrap()[5], "=SUM(F2:F4)");
}

#[test]
fn test_aggregation_sums_revenue() {
    let records: Vec<ProductRecord> = [10.0, 20.0, 30.0]
        .iter()
        .map(|r| normalize(&record_row("x", *r), Schema::Standard))
        .collect();
    let totals = summarize(&records);
    assert_eq!(totals.revenue, 60.0);
    assert_eq!(totals.profit, 60.0);
    assert_eq!(totals.count, 3);
    assert_eq!(totals.quantity, 3);
}

#[test]
fn test_empty_aggregation_is_zero() {
    let totals = summarize(&[]);
    assert_eq!(totals.revenue, 0.0);
    assert_eq!(totals.count, 0);
}

#[test]
fn test_huge_quantities_saturate() {
    let big = row(&["d", "p", "1", "1", "5000000000000000000", "1", "1", "", ""]);
    let sheet = vec![Schema::Standard.header(), big.clone(), big];
    let records = records_from_sheet(&sheet, Schema::Standard);
    assert_eq!(records.len(), 2);

    let totals = summarize(&records);
    assert_eq!(totals.quantity, i64::MAX);
    assert_eq!(totals.revenue, 2.0);
    println!("✓ quantity total saturates instead of wrapping");
}

#[test]
fn test_sheet_read_back_skips_header_and_total() {
    let sheet = vec![
        Schema::Standard.header(),
        record_row("a", 10.0),
        row(&[]),
        record_row("b", 20.0),
        totals_row(Schema::Standard, 4),
    ];
    let records = records_from_sheet(&sheet, Schema::Standard);
    assert_eq!(records.len(), 2);
    assert_eq!(summarize(&records).revenue, 30.0);
}

#[test]
fn test_totals_marker_detection() {
    assert!(is_totals_row(&row(&["TOTAL", "", ""])));
    assert!(is_totals_row(&row(&[" TOTAL "])));
    assert!(!is_totals_row(&row(&["Total"])));
    assert!(!is_totals_row(&row(&[])));
}
