use serde::{Deserialize, Serialize};

use crate::a1::columns_range;

/// Label used for the hyperlink cell of every record.
pub const LINK_LABEL: &str = "View Image";

/// Column layout of the records sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    #[default]
    Standard,
    /// Standard layout prefixed with a customer name column
    WithCustomer,
}

const STANDARD_HEADER: [&str; 9] = [
    "Date",
    "Product",
    "Selling price",
    "Cost price",
    "Quantity",
    "Revenue",
    "Profit",
    "Image Preview",
    "Image Link",
];

impl Schema {
    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = STANDARD_HEADER.iter().map(|s| s.to_string()).collect();
        if *self == Schema::WithCustomer {
            header.insert(0, "Customer Name".to_string());
        }
        header
    }

    pub fn width(&self) -> usize {
        STANDARD_HEADER.len() + self.offset()
    }

    /// Whole-table range, e.g. `A:I`.
    pub fn data_range(&self) -> String {
        columns_range(self.width() as u32)
    }

    fn offset(&self) -> usize {
        match self {
            Schema::Standard => 0,
            Schema::WithCustomer => 1,
        }
    }

    /// 1-based column of a standard field after applying the prefix.
    pub(crate) fn column(&self, field: Field) -> u32 {
        (field as usize + self.offset() + 1) as u32
    }
}

/// Fields of the standard layout, in column order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Field {
    Date = 0,
    Product,
    SellingPrice,
    CostPrice,
    Quantity,
    Revenue,
    Profit,
    ImagePreview,
    ImageLink,
}

/// Values captured by the "Add Record" form.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RecordDraft {
    #[serde(default)]
    pub customer_name: Option<String>,
    pub product_name: String,
    pub selling_price: f64,
    pub cost_price: f64,
    pub quantity: i64,
}

/// A product sale as stored in the records sheet.
///
/// `revenue` and `profit` are fixed when the record is created and read back
/// verbatim afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductRecord {
    pub timestamp: String,
    pub customer_name: Option<String>,
    pub product_name: String,
    pub selling_price: f64,
    pub cost_price: f64,
    pub quantity: i64,
    pub revenue: f64,
    pub profit: f64,
    pub image_preview_formula: String,
    pub image_link_formula: String,
}

/// Revenue and profit for the given prices and quantity.
pub fn derive(selling_price: f64, cost_price: f64, quantity: i64) -> (f64, f64) {
    let qty = quantity as f64;
    (selling_price * qty, (selling_price - cost_price) * qty)
}

pub fn image_formula(url: &str) -> String {
    format!("=IMAGE(\"{}\")", escape_formula_string(url))
}

pub fn link_formula(url: &str) -> String {
    format!(
        "=HYPERLINK(\"{}\",\"{}\")",
        escape_formula_string(url),
        LINK_LABEL
    )
}

fn escape_formula_string(s: &str) -> String {
    s.replace('"', "\"\"")
}

impl ProductRecord {
    /// Build a new record from form input and the public URL of its photo.
    pub fn create(draft: &RecordDraft, timestamp: String, image_url: &str) -> Self {
        let (revenue, profit) = derive(draft.selling_price, draft.cost_price, draft.quantity);
        ProductRecord {
            timestamp,
            customer_name: draft.customer_name.clone(),
            product_name: draft.product_name.clone(),
            selling_price: draft.selling_price,
            cost_price: draft.cost_price,
            quantity: draft.quantity,
            revenue,
            profit,
            image_preview_formula: image_formula(image_url),
            image_link_formula: link_formula(image_url),
        }
    }

    /// Render the record as a sheet row in `schema` column order.
    pub fn to_row(&self, schema: Schema) -> Vec<String> {
        let mut row = Vec::with_capacity(schema.width());
        if schema == Schema::WithCustomer {
            row.push(self.customer_name.clone().unwrap_or_default());
        }
        row.push(self.timestamp.clone());
        row.push(self.product_name.clone());
        row.push(format_number(self.selling_price));
        row.push(format_number(self.cost_price));
        row.push(self.quantity.to_string());
        row.push(format_number(self.revenue));
        row.push(format_number(self.profit));
        row.push(self.image_preview_formula.clone());
        row.push(self.image_link_formula.clone());
        row
    }
}

/// Pad `row` with empty strings, or truncate it, to exactly `width` fields.
pub fn pad_row(row: &[String], width: usize) -> Vec<String> {
    let mut fields: Vec<String> = row.iter().take(width).cloned().collect();
    fields.resize(width, String::new());
    fields
}

/// Lenient numeric read: anything that is not a finite number is zero.
pub fn coerce_number(s: &str) -> f64 {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

fn coerce_quantity(s: &str) -> i64 {
    let v = coerce_number(s);
    if v.abs() < i64::MAX as f64 { v.trunc() as i64 } else { 0 }
}

/// Turn a raw sheet row into a fully populated record.
///
/// Missing trailing cells become empty strings and unreadable numbers become
/// zero; this is for display and never fails.
pub fn normalize(raw: &[String], schema: Schema) -> ProductRecord {
    let fields = pad_row(raw, schema.width());
    let get = |field: Field| fields[schema.column(field) as usize - 1].as_str();

    ProductRecord {
        timestamp: get(Field::Date).to_string(),
        customer_name: match schema {
            Schema::WithCustomer => Some(fields[0].clone()),
            Schema::Standard => None,
        },
        product_name: get(Field::Product).to_string(),
        selling_price: coerce_number(get(Field::SellingPrice)),
        cost_price: coerce_number(get(Field::CostPrice)),
        quantity: coerce_quantity(get(Field::Quantity)),
        revenue: coerce_number(get(Field::Revenue)),
        profit: coerce_number(get(Field::Profit)),
        image_preview_formula: get(Field::ImagePreview).to_string(),
        image_link_formula: get(Field::ImageLink).to_string(),
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}
