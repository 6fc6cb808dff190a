use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CELL_REGEX: Regex = Regex::new(r"^([A-Za-z]*)([0-9]*)$").unwrap();
}

/// One endpoint of an A1 range. Either part may be missing (`A`, `5`, `A5`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRef {
    pub col: Option<u32>,
    pub row: Option<u32>,
}

/// A parsed A1 range such as `A2:D`, `A:I` or `B7`.
///
/// Rows and columns are 1-based. An open end means "to the end of the data".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct A1Range {
    pub start: CellRef,
    pub end: Option<CellRef>,
}

impl A1Range {
    /// Parse a range, ignoring an optional `Sheet!` prefix.
    pub fn parse(range: &str) -> Option<Self> {
        let range = match range.rsplit_once('!') {
            Some((_, r)) => r,
            None => range,
        };
        let (start, end) = match range.split_once(':') {
            Some((s, e)) => (parse_cell_ref(s)?, Some(parse_cell_ref(e)?)),
            None => (parse_cell_ref(range)?, None),
        };
        Some(A1Range { start, end })
    }

    pub fn first_row(&self) -> u32 {
        self.start.row.unwrap_or(1)
    }

    pub fn first_col(&self) -> u32 {
        self.start.col.unwrap_or(1)
    }

    /// Last row covered, or `None` when the range is open downwards.
    pub fn last_row(&self) -> Option<u32> {
        match self.end {
            Some(end) => end.row,
            None => self.start.row,
        }
    }

    /// Last column covered, or `None` when the range is open to the right.
    pub fn last_col(&self) -> Option<u32> {
        match self.end {
            Some(end) => end.col,
            None => self.start.col,
        }
    }
}

fn parse_cell_ref(s: &str) -> Option<CellRef> {
    let caps = CELL_REGEX.captures(s.trim())?;
    let letters = caps.get(1).map_or("", |m| m.as_str());
    let digits = caps.get(2).map_or("", |m| m.as_str());

    if letters.is_empty() && digits.is_empty() {
        return None;
    }

    let col = if letters.is_empty() {
        None
    } else {
        Some(letter_to_col(letters))
    };
    let row = if digits.is_empty() {
        None
    } else {
        match digits.parse::<u32>().ok()? {
            0 => return None,
            r => Some(r),
        }
    };

    Some(CellRef { col, row })
}

pub fn col_to_letter(col: u32) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

pub fn letter_to_col(letters: &str) -> u32 {
    letters
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .fold(0, |acc, c| acc * 26 + (c as u32 - 'A' as u32 + 1))
}

pub fn cell_name(row: u32, col: u32) -> String {
    format!("{}{}", col_to_letter(col), row)
}

/// Range covering `width` columns of a single row, e.g. `A5:I5`.
pub fn row_range(row: u32, width: u32) -> String {
    format!("{}:{}", cell_name(row, 1), cell_name(row, width))
}

/// Whole-column range covering `width` columns, e.g. `A:I`.
pub fn columns_range(width: u32) -> String {
    format!("A:{}", col_to_letter(width))
}
