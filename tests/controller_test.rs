use chrono::NaiveDate;
use recorder::controller::NoticeLevel;
use recorder::totals::is_totals_row;
use recorder::{
    AppConfig, AppError, DenyReason, DocumentStore, LicenseDecision, MemoryStore, RecordDraft,
    Recorder, SaveOutcome, SaveRequest, Schema, SessionContext,
};
use std::sync::Arc;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRfake-image-bytes";

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn setup(config: AppConfig) -> (Arc<MemoryStore>, Recorder) {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_sheet(
            &config.license_sheet_id,
            "Licenses",
            vec![
                row(&["License", "Email", "Status", "Expiry"]),
                row(&["ABC123", "a@x.com", "ACTIVE", "2099-01-01"]),
                row(&["B-KEY", "b@x.com", "ACTIVE", "2099-01-01"]),
            ],
        )
        .unwrap();
    let recorder = Recorder::new(store.clone(), config);
    (store, recorder)
}

async fn logged_in(recorder: &Recorder, email: &str, key: &str) -> SessionContext {
    let mut ctx = SessionContext::default();
    recorder.identify(&mut ctx, email).unwrap();
    let decision = recorder.login_on(&mut ctx, key, today()).await;
    assert_eq!(decision, LicenseDecision::Authorized);
    ctx
}

fn request(name: &str, price: f64, cost: f64, qty: i64) -> SaveRequest {
    SaveRequest {
        photo: Some(PNG.to_vec()),
        draft: RecordDraft {
            customer_name: None,
            product_name: name.to_string(),
            selling_price: price,
            cost_price: cost,
            quantity: qty,
        },
    }
}

#[tokio::test]
async fn test_login_sets_authorized_flag() {
    let (_, recorder) = setup(AppConfig::default());
    let mut ctx = SessionContext::default();
    recorder.identify(&mut ctx, " b@x.com ").unwrap();
    assert_eq!(ctx.user_email.as_deref(), Some("b@x.com"));

    let decision = recorder.login_on(&mut ctx, "ABC123", today()).await;
    assert_eq!(decision, LicenseDecision::Denied(DenyReason::WrongEmail));
    assert!(!ctx.authorized);

    let decision = recorder.login_on(&mut ctx, "B-KEY", today()).await;
    assert!(decision.is_authorized());
    assert!(ctx.authorized);

    // switching identity drops the authorization
    recorder.identify(&mut ctx, "a@x.com").unwrap();
    assert!(!ctx.authorized);
    assert!(matches!(
        recorder.identify(&mut ctx, "  "),
        Err(AppError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_login_without_email_asks_for_it() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = SessionContext::default();

    let decision = recorder.login_on(&mut ctx, "ABC123", today()).await;
    assert_eq!(decision, LicenseDecision::Denied(DenyReason::EmailMissing));
    assert_eq!(DenyReason::EmailMissing.to_string(), "Enter your email");
    assert!(!ctx.authorized);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_save_without_photo_makes_no_store_calls() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;
    let calls_before = store.calls();

    let mut req = request("Mug", 10.0, 5.0, 1);
    req.photo = None;
    let outcome = recorder.save(&mut ctx, req).await;

    assert!(matches!(outcome, SaveOutcome::Warning(AppError::InputIncomplete)));
    assert_eq!(outcome.notice().level, NoticeLevel::Warning);
    assert_eq!(outcome.notice().message, "Add image and name");
    assert!(!outcome.reset_form());
    assert_eq!(store.calls(), calls_before);
    println!("✓ save with hasImage=false made no store calls");
}

#[tokio::test]
async fn test_save_without_name_makes_no_store_calls() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;
    let calls_before = store.calls();

    let outcome = recorder.save(&mut ctx, request("   ", 10.0, 5.0, 1)).await;
    assert!(matches!(outcome, SaveOutcome::Warning(AppError::InputIncomplete)));
    assert_eq!(store.calls(), calls_before);
}

#[tokio::test]
async fn test_save_requires_license() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = SessionContext::for_email("a@x.com");
    let outcome = recorder.save(&mut ctx, request("Mug", 1.0, 1.0, 1)).await;
    assert!(matches!(outcome, SaveOutcome::Failed(AppError::Unauthorised)));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_invalid_values_are_warnings() {
    let (_, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    let outcome = recorder.save(&mut ctx, request("Mug", -1.0, 0.0, 1)).await;
    assert!(matches!(outcome, SaveOutcome::Warning(AppError::InvalidInput(_))));

    let outcome = recorder.save(&mut ctx, request("Mug", 1.0, 0.0, 0)).await;
    assert!(matches!(outcome, SaveOutcome::Warning(AppError::InvalidInput(_))));

    let mut req = request("Mug", 1.0, 0.0, 1);
    req.photo = Some(b"not an image".to_vec());
    let outcome = recorder.save(&mut ctx, req).await;
    assert!(matches!(outcome, SaveOutcome::Warning(AppError::InvalidInput(_))));
}

#[tokio::test]
async fn test_sheet_created_once_with_header() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    let id = recorder.ensure_sheet(&mut ctx).await.unwrap();
    assert_eq!(ctx.sheet_id.as_deref(), Some(id.as_str()));

    // a fresh session finds the same sheet
    let mut other = logged_in(&recorder, "a@x.com", "ABC123").await;
    assert_eq!(recorder.ensure_sheet(&mut other).await.unwrap(), id);

    let rows = store.read_range(&id, "A:I").await.unwrap();
    assert_eq!(rows, vec![Schema::Standard.header()]);
}

#[tokio::test]
async fn test_save_appends_record_and_totals() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    let outcome = recorder.save(&mut ctx, request("Mug", 100.0, 60.0, 3)).await;
    let SaveOutcome::Saved { row, record } = &outcome else {
        panic!("expected save, got {:?}", outcome);
    };
    assert_eq!(*row, Some(2));
    assert_eq!(record.revenue, 300.0);
    assert_eq!(record.profit, 120.0);
    assert!(outcome.reset_form());
    assert_eq!(outcome.notice().message, "Saved");

    let sheet_id = ctx.sheet_id.clone().unwrap();
    let rows = store.read_range(&sheet_id, "A:I").await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1][1], "Mug");
    assert_eq!(rows[1][5], "300");
    assert_eq!(rows[1][6], "120");
    assert!(rows[1][7].starts_with("=IMAGE(\"/files/"));
    assert!(rows[1][8].ends_with(",\"View Image\")"));
    assert!(is_totals_row(&rows[2]));
    assert_eq!(rows[2][5], "=SUM(F2:F2)");
}

#[tokio::test]
async fn test_repeated_saves_keep_one_total_row() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    for i in 1..=5 {
        let outcome = recorder.save(&mut ctx, request(&format!("p{i}"), 10.0 * i as f64, 1.0, 1)).await;
        assert!(matches!(outcome, SaveOutcome::Saved { .. }), "{:?}", outcome);
    }

    let sheet_id = ctx.sheet_id.clone().unwrap();
    let rows = store.read_range(&sheet_id, "A:I").await.unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows.iter().filter(|r| is_totals_row(r)).count(), 1);
    assert!(is_totals_row(&rows[6]));
    assert_eq!(rows[6][5], "=SUM(F2:F6)");

    let view = recorder.records(&mut ctx).await.unwrap();
    assert_eq!(view.records.len(), 5);
    assert_eq!(view.totals.revenue, 150.0);
    assert_eq!(view.totals.profit, 145.0);
    println!("✓ five saves, one TOTAL row over F2:F6");
}

#[tokio::test]
async fn test_plain_append_without_totals_row() {
    let config = AppConfig {
        totals_row: false,
        ..AppConfig::default()
    };
    let (store, recorder) = setup(config);
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    for name in ["a", "b"] {
        let outcome = recorder.save(&mut ctx, request(name, 1.0, 0.5, 2)).await;
        assert!(matches!(outcome, SaveOutcome::Saved { row: None, .. }));
    }

    let rows = store
        .read_range(ctx.sheet_id.as_deref().unwrap(), "A:I")
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(!rows.iter().any(|r| is_totals_row(r)));
}

#[tokio::test]
async fn test_upload_quota_failure_writes_no_row() {
    let store = Arc::new(MemoryStore::new().with_quota(8));
    store
        .insert_sheet(
            "licenses",
            "Licenses",
            vec![
                row(&["License", "Email", "Status", "Expiry"]),
                row(&["ABC123", "a@x.com", "ACTIVE", "2099-01-01"]),
            ],
        )
        .unwrap();
    let recorder = Recorder::new(store.clone(), AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    let outcome = recorder.save(&mut ctx, request("Mug", 1.0, 1.0, 1)).await;
    assert!(matches!(outcome, SaveOutcome::Failed(AppError::QuotaExceeded)));
    assert_eq!(outcome.notice().level, NoticeLevel::Error);

    let rows = store
        .read_range(ctx.sheet_id.as_deref().unwrap(), "A:I")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "only the header");
}

#[tokio::test]
async fn test_store_outage_is_upstream_error() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;
    store.set_available(false);

    let outcome = recorder.save(&mut ctx, request("Mug", 1.0, 1.0, 1)).await;
    assert!(matches!(
        outcome,
        SaveOutcome::Failed(AppError::UpstreamUnavailable(_))
    ));
    assert!(matches!(
        recorder.records(&mut ctx).await,
        Err(AppError::UpstreamUnavailable(_))
    ));
}

#[tokio::test]
async fn test_empty_records_view() {
    let (_, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;

    let view = recorder.records(&mut ctx).await.unwrap();
    assert!(view.is_empty());
    assert_eq!(view.notice().message, "No records yet");
    assert_eq!(view.notice().level, NoticeLevel::Info);
}

#[tokio::test]
async fn test_per_user_folder_and_customer_schema() {
    let config = AppConfig {
        per_user_folder: true,
        parent_folder_id: Some("root-folder".to_string()),
        schema: Schema::WithCustomer,
        ..AppConfig::default()
    };
    let (store, recorder) = setup(config);
    let mut a = logged_in(&recorder, "a@x.com", "ABC123").await;
    let mut b = logged_in(&recorder, "b@x.com", "B-KEY").await;

    let mut req = request("Mug", 4.0, 1.0, 2);
    req.draft.customer_name = Some("Ana".to_string());
    assert!(matches!(recorder.save(&mut a, req).await, SaveOutcome::Saved { .. }));

    let sheet_a = recorder.ensure_sheet(&mut a).await.unwrap();
    let sheet_b = recorder.ensure_sheet(&mut b).await.unwrap();
    assert_ne!(sheet_a, sheet_b);
    assert_ne!(a.folder_id, b.folder_id);

    let rows = store.read_range(&sheet_a, "A:J").await.unwrap();
    assert_eq!(rows[0][0], "Customer Name");
    assert_eq!(rows[1][0], "Ana");
    assert_eq!(rows[2][0], "TOTAL");
    assert_eq!(rows[2][6], "=SUM(G2:G2)");

    let view = recorder.records(&mut a).await.unwrap();
    assert_eq!(view.records[0].customer_name.as_deref(), Some("Ana"));
    assert_eq!(view.totals.revenue, 8.0);
    assert!(recorder.records(&mut b).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_uploaded_photo_is_served_back() {
    let (store, recorder) = setup(AppConfig::default());
    let mut ctx = logged_in(&recorder, "a@x.com", "ABC123").await;
    let outcome = recorder.save(&mut ctx, request("Mug", 1.0, 1.0, 1)).await;
    let SaveOutcome::Saved { record, .. } = outcome else {
        panic!("save failed");
    };

    let url = recorder::downloader::formula_url(&record.image_link_formula).unwrap();
    let id = url.trim_start_matches("/files/");
    assert_eq!(store.download_file(id).await.unwrap(), PNG.to_vec());
}
