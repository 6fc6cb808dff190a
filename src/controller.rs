//! Drives the license gate, the "Add Record" form and the "Records" view.
//!
//! Every call takes the caller's [`SessionContext`] explicitly and returns the
//! resulting UI state; nothing is cached outside the context.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::license::{self, LicenseDecision};
use crate::record::{ProductRecord, RecordDraft, Schema};
use crate::session::SessionContext;
use crate::store::DocumentStore;
use crate::totals::{self, Totals};

/// Steps of a save action. Every save ends back in `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    CapturingInput,
    Validating,
    Uploading,
    Appending,
    RecomputingTotals,
}

/// What the "Add Record" form submitted.
#[derive(Clone, Debug, Default)]
pub struct SaveRequest {
    pub photo: Option<Vec<u8>>,
    pub draft: RecordDraft,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Inline status message shown under the form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// UI state after a save action.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Record written; the form resets
    Saved {
        row: Option<u32>,
        record: ProductRecord,
    },
    /// Nothing was written; the form keeps its values
    Warning(AppError),
    /// The action aborted
    Failed(AppError),
}

impl SaveOutcome {
    pub fn notice(&self) -> Notice {
        match self {
            SaveOutcome::Saved { .. } => Notice {
                level: NoticeLevel::Success,
                message: "Saved".to_string(),
            },
            SaveOutcome::Warning(e) => Notice {
                level: NoticeLevel::Warning,
                message: e.to_string(),
            },
            SaveOutcome::Failed(e) => Notice {
                level: NoticeLevel::Error,
                message: e.to_string(),
            },
        }
    }

    pub fn reset_form(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

/// Contents of the "Records" view.
#[derive(Clone, Debug, Serialize)]
pub struct RecordsView {
    pub header: Vec<String>,
    pub records: Vec<ProductRecord>,
    pub totals: Totals,
}

impl RecordsView {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn notice(&self) -> Notice {
        if self.is_empty() {
            Notice {
                level: NoticeLevel::Info,
                message: "No records yet".to_string(),
            }
        } else {
            Notice {
                level: NoticeLevel::Success,
                message: format!(
                    "Total Revenue: {} / Total Profit: {}",
                    self.totals.revenue, self.totals.profit
                ),
            }
        }
    }
}

pub struct Recorder {
    store: Arc<dyn DocumentStore>,
    config: AppConfig,
}

impl Recorder {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig) -> Self {
        Recorder { store, config }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn schema(&self) -> Schema {
        self.config.schema
    }

    /// Record the email the user claims; required before any license check.
    pub fn identify(&self, ctx: &mut SessionContext, email: &str) -> AppResult<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::InvalidInput("Enter your email".to_string()));
        }
        if ctx.user_email.as_deref() != Some(email) {
            *ctx = SessionContext::for_email(email);
        }
        Ok(())
    }

    /// Check `key` against the license sheet for the identified email.
    ///
    /// # Arguments
    /// * `ctx` - Session of the caller; `authorized` is updated in place
    /// * `key` - License key typed on the gate
    ///
    /// # Returns
    /// * `LicenseDecision` - Authorized, or the reason for the denial
    pub async fn login(&self, ctx: &mut SessionContext, key: &str) -> LicenseDecision {
        self.login_on(ctx, key, Local::now().date_naive()).await
    }

    /// License check against an explicit date.
    pub async fn login_on(
        &self,
        ctx: &mut SessionContext,
        key: &str,
        today: NaiveDate,
    ) -> LicenseDecision {
        let Some(email) = ctx.user_email.clone() else {
            return LicenseDecision::Denied(license::DenyReason::EmailMissing);
        };

        let decision = license::check_license(
            self.store.as_ref(),
            &self.config.license_sheet_id,
            key,
            &email,
            self.config.email_binding,
            today,
        )
        .await;

        ctx.authorized = decision.is_authorized();
        decision
    }

    async fn resolve_folder(&self, ctx: &mut SessionContext) -> AppResult<Option<String>> {
        if let Some(id) = &ctx.folder_id {
            return Ok(Some(id.clone()));
        }

        let parent = self.config.parent_folder_id.as_deref();
        if !self.config.per_user_folder {
            return Ok(parent.map(str::to_string));
        }

        let email = ctx.user_email.clone().ok_or(AppError::Unauthorised)?;
        let id = match self.store.find_folder(&email, parent).await? {
            Some(id) => id,
            None => {
                log::info!("creating folder for {}", email);
                self.store.create_folder(&email, parent).await?
            }
        };
        ctx.folder_id = Some(id.clone());
        Ok(Some(id))
    }

    /// Find the records sheet or create it with its header row.
    pub async fn ensure_sheet(&self, ctx: &mut SessionContext) -> AppResult<String> {
        if let Some(id) = &ctx.sheet_id {
            return Ok(id.clone());
        }

        let folder = self.resolve_folder(ctx).await?;
        let name = &self.config.app_sheet_name;

        let sheet_id = match self.store.find_sheet(name, folder.as_deref()).await? {
            Some(id) => id,
            None => {
                let id = self.store.create_sheet(name, folder.as_deref()).await?;
                self.store
                    .update_range(&id, "A1", vec![self.schema().header()])
                    .await?;
                log::info!("created records sheet {} ({})", name, id);
                id
            }
        };

        ctx.sheet_id = Some(sheet_id.clone());
        Ok(sheet_id)
    }

    /// Save one record from the "Add Record" form.
    ///
    /// Input is checked before the store is touched. The photo is uploaded and
    /// shared, then the row is appended, and the `TOTAL` row rewritten when
    /// enabled. Any failure ends the attempt; nothing is retried.
    ///
    /// # Arguments
    /// * `ctx` - Session of the caller; the resolved sheet and folder are cached in it
    /// * `request` - Photo bytes and form values
    ///
    /// # Returns
    /// * `SaveOutcome` - The saved record and its row, or the warning/error to show
    pub async fn save(&self, ctx: &mut SessionContext, request: SaveRequest) -> SaveOutcome {
        let mut state = SaveState::Idle;
        let result = self.run_save(ctx, request, &mut state).await;
        advance(&mut state, SaveState::Idle);

        match result {
            Ok((row, record)) => SaveOutcome::Saved { row, record },
            Err(e) if e.is_warning() => {
                log::warn!("save rejected: {}", e);
                SaveOutcome::Warning(e)
            }
            Err(e) => {
                log::error!("save failed: {}", e);
                SaveOutcome::Failed(e)
            }
        }
    }

    async fn run_save(
        &self,
        ctx: &mut SessionContext,
        request: SaveRequest,
        state: &mut SaveState,
    ) -> AppResult<(Option<u32>, ProductRecord)> {
        advance(state, SaveState::CapturingInput);
        let SaveRequest { photo, draft } = request;

        advance(state, SaveState::Validating);
        if !ctx.authorized {
            return Err(AppError::Unauthorised);
        }
        let photo = match photo {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Err(AppError::InputIncomplete),
        };
        if draft.product_name.trim().is_empty() {
            return Err(AppError::InputIncomplete);
        }
        validate_draft(&draft)?;
        let extension = photo_extension(&photo)?;

        let sheet_id = self.ensure_sheet(ctx).await?;

        advance(state, SaveState::Uploading);
        let url = self.upload_photo(ctx, &photo, extension).await?;

        advance(state, SaveState::Appending);
        let timestamp = Local::now().format("%Y-%m-%d %H:%M").to_string();
        let record = ProductRecord::create(&draft, timestamp, &url);
        let row = record.to_row(self.schema());
        let row_index = self.append_row(&sheet_id, row, state).await?;

        log::info!(
            "saved {} for {:?} at row {:?}",
            record.product_name,
            ctx.user_email,
            row_index
        );
        Ok((row_index, record))
    }

    /// Upload the photo through a temporary file and publish it.
    ///
    /// The temporary file is removed when this returns, whatever the outcome.
    async fn upload_photo(
        &self,
        ctx: &mut SessionContext,
        photo: &[u8],
        extension: &str,
    ) -> AppResult<String> {
        let folder = self.resolve_folder(ctx).await?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{}-", Local::now().timestamp()))
            .suffix(&format!(".{}", extension))
            .tempfile()?;
        tmp.write_all(photo)?;
        tmp.flush()?;

        let file_id = self.store.upload_file(tmp.path(), folder.as_deref()).await?;
        let url = self.store.grant_public_read(&file_id).await?;
        Ok(url)
    }

    async fn append_row(
        &self,
        sheet_id: &str,
        row: Vec<String>,
        state: &mut SaveState,
    ) -> AppResult<Option<u32>> {
        let schema = self.schema();

        if !self.config.totals_row {
            self.store
                .append_rows(sheet_id, &schema.data_range(), vec![row])
                .await?;
            return Ok(None);
        }

        let existing = self.store.read_range(sheet_id, &schema.data_range()).await?;
        let plan = totals::append_with_totals(&existing, row, schema);

        if let Some(stale) = plan.stale_range(schema) {
            self.store.clear_range(sheet_id, &stale).await?;
        }
        self.store
            .update_range(sheet_id, &plan.data_range(schema), vec![plan.data_row.clone()])
            .await?;

        advance(state, SaveState::RecomputingTotals);
        self.store
            .update_range(
                sheet_id,
                &plan.totals_range(schema),
                vec![plan.totals_row.clone()],
            )
            .await?;

        Ok(Some(plan.data_row_index))
    }

    /// Read the records sheet back and total it.
    ///
    /// # Arguments
    /// * `ctx` - Session of the caller; must be authorized
    ///
    /// # Returns
    /// * `AppResult<RecordsView>` - Records and totals, or the store failure
    pub async fn records(&self, ctx: &mut SessionContext) -> AppResult<RecordsView> {
        if !ctx.authorized {
            return Err(AppError::Unauthorised);
        }

        let schema = self.schema();
        let sheet_id = self.ensure_sheet(ctx).await?;
        let rows = self.store.read_range(&sheet_id, &schema.data_range()).await?;

        let records = totals::records_from_sheet(&rows, schema);
        let totals = totals::summarize(&records);

        Ok(RecordsView {
            header: schema.header(),
            records,
            totals,
        })
    }
}

fn advance(state: &mut SaveState, next: SaveState) {
    log::debug!("save: {:?} -> {:?}", state, next);
    *state = next;
}

fn validate_draft(draft: &RecordDraft) -> AppResult<()> {
    if !draft.selling_price.is_finite() || draft.selling_price < 0.0 {
        return Err(AppError::InvalidInput(
            "Selling price must be 0 or more".to_string(),
        ));
    }
    if !draft.cost_price.is_finite() || draft.cost_price < 0.0 {
        return Err(AppError::InvalidInput(
            "Cost price must be 0 or more".to_string(),
        ));
    }
    if draft.quantity < 1 {
        return Err(AppError::InvalidInput(
            "Quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn photo_extension(photo: &[u8]) -> AppResult<&'static str> {
    let format = image::guess_format(photo)
        .map_err(|_| AppError::InvalidInput("Photo is not a supported image".to_string()))?;
    Ok(format.extensions_str().first().copied().unwrap_or("png"))
}
