use std::error::Error;

use crate::controller::RecordsView;
use crate::record::Schema;

/// Export the records view to CSV.
///
/// The header row comes first, then one line per record in sheet column
/// order. Image cells keep their formulas.
///
/// # Arguments
/// * `view` - Records read back from the sheet
/// * `schema` - Column layout the records were read with
///
/// # Returns
/// * `Result<String, Box<dyn Error>>` - CSV content or an error
pub fn to_csv(view: &RecordsView, schema: Schema) -> Result<String, Box<dyn Error>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(&view.header)?;
    for record in &view.records {
        writer.write_record(record.to_row(schema))?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Export the records view to XLSX, with a totals line at the bottom.
///
/// Numeric columns are written as numbers so the workbook can be summed
/// directly. Image formulas are not carried over; the link column holds the
/// plain URL instead.
#[cfg(feature = "web")]
pub fn to_xlsx(view: &RecordsView, schema: Schema) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    let offset: u16 = match schema {
        Schema::Standard => 0,
        Schema::WithCustomer => 1,
    };

    for (c, title) in view.header.iter().enumerate() {
        worksheet.write_string(0, c as u16, title)?;
    }

    for (i, rec) in view.records.iter().enumerate() {
        let r = (i + 1) as u32;
        if let Some(customer) = &rec.customer_name {
            worksheet.write_string(r, 0, customer)?;
        }
        worksheet.write_string(r, offset, &rec.timestamp)?;
        worksheet.write_string(r, offset + 1, &rec.product_name)?;
        worksheet.write_number(r, offset + 2, rec.selling_price)?;
        worksheet.write_number(r, offset + 3, rec.cost_price)?;
        worksheet.write_number(r, offset + 4, rec.quantity as f64)?;
        worksheet.write_number(r, offset + 5, rec.revenue)?;
        worksheet.write_number(r, offset + 6, rec.profit)?;
        if let Some(url) = formula_url(&rec.image_link_formula) {
            worksheet.write_string(r, offset + 8, url)?;
        }
    }

    let total_row = (view.records.len() + 1) as u32;
    worksheet.write_string(total_row, 0, crate::totals::TOTAL_MARKER)?;
    worksheet.write_number(total_row, offset + 4, view.totals.quantity as f64)?;
    worksheet.write_number(total_row, offset + 5, view.totals.revenue)?;
    worksheet.write_number(total_row, offset + 6, view.totals.profit)?;

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// First quoted argument of an `=IMAGE("..")` or `=HYPERLINK("..", ..)` formula.
pub fn formula_url(formula: &str) -> Option<&str> {
    let start = formula.find('"')? + 1;
    let len = formula[start..].find('"')?;
    Some(&formula[start..start + len])
}
