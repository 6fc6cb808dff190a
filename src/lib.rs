/*!
# Product Recorder

A small business tool for recording product sales into a spreadsheet that
serves as the database.

## Overview

A seller photographs a product, enters selling price, cost price and
quantity, and the record is appended to a records sheet together with a
public link to the uploaded photo. Access is gated by a license key checked
against a separate license sheet (key, email, status, expiry). The
"Records" view reads the sheet back and shows aggregate totals.

## Architecture

### Core
- **license**: license rows and the authorization decision
- **record**: sheet schema, record creation and lenient row normalization
- **totals**: totals over records and the trailing `TOTAL` row bookkeeping

### Storage
- **store**: the `DocumentStore` trait (row read/append/update/clear, sheet
  and folder lookup, file upload and sharing)
- **memory**: in-process store with optional gzip + bincode snapshots
  (**saving**)
- **google**: Google Sheets and Drive over HTTPS with a service account

### Application
- **session**: request-scoped session context and the session registry
- **controller**: login, get-or-create sheet, save and records view
- **downloader**: CSV and XLSX export
- **app**: axum routes and HTML pages
- **config**: TOML file plus `RECORDER_*` environment overrides

## Records sheet

Row 1 holds the header, records start at row 2, and a single `TOTAL` row
with aggregate formulas is kept after the last record:

| Date | Product | Selling price | Cost price | Quantity | Revenue | Profit | Image Preview | Image Link |
|------|---------|---------------|------------|----------|---------|--------|---------------|------------|

The `with_customer` schema prefixes the table with a `Customer Name` column.

Two sessions saving at the same moment can interleave the clear/write/total
sequence and lose an update; the store offers no locking.

## REST API Endpoints

- `POST /login`, `POST /logout` - License gate
- `GET /api/preview` - Revenue and profit for the form values
- `GET /api/records`, `POST /api/records` - Read back or save a record
- `GET /api/export/csv`, `GET /api/export/xlsx` - Download records
- `GET /files/{id}` - Photos held by the in-process store
*/

pub mod a1;
#[cfg(feature = "web")]
pub mod app;
pub mod config;
pub mod controller;
pub mod downloader;
pub mod error;
pub mod google;
pub mod license;
pub mod memory;
pub mod record;
pub mod saving;
pub mod session;
pub mod store;
pub mod totals;

pub use config::AppConfig;
pub use controller::{Recorder, RecordsView, SaveOutcome, SaveRequest, SaveState};
pub use error::{AppError, AppResult};
pub use license::{DenyReason, EmailBinding, LicenseDecision, LicenseRecord};
pub use memory::MemoryStore;
pub use record::{ProductRecord, RecordDraft, Schema};
pub use session::{SessionContext, SessionRegistry};
pub use store::{DocumentStore, RawRow, StoreError, StoreResult};
pub use totals::{AppendPlan, Totals};
