#![cfg(not(tarpaulin_include))]

use axum::{
    Extension, Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{AppConfig, Backend};
use crate::controller::{Recorder, SaveOutcome, SaveRequest};
use crate::downloader;
use crate::error::AppError;
use crate::google::GoogleStore;
use crate::license::LicenseDecision;
use crate::memory::MemoryStore;
use crate::record::{self, RecordDraft, Schema};
use crate::session::{SessionContext, SessionRegistry};
use crate::store::DocumentStore;

const SESSION_COOKIE: &str = "session";

pub struct AppState {
    pub recorder: Recorder,
    pub sessions: SessionRegistry,
}

/// Session id of an authorized request, set by [`require_auth`].
#[derive(Clone)]
struct SessionId(String);

#[derive(Deserialize)]
struct GateQuery {
    error: Option<String>,
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    key: String,
}

#[derive(Deserialize)]
struct PreviewQuery {
    #[serde(default)]
    price: f64,
    #[serde(default)]
    cost: f64,
    #[serde(default = "default_quantity")]
    quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Build the configured document store, seeding licenses for the memory backend.
pub fn build_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>, Box<dyn std::error::Error>> {
    match &config.backend {
        Backend::Memory { snapshot_path } => {
            let store = match snapshot_path {
                Some(path) => MemoryStore::open(path)?,
                None => MemoryStore::new(),
            };

            if !config.licenses.is_empty() && !store.has_sheet(&config.license_sheet_id) {
                let mut rows = vec![vec![
                    "License".to_string(),
                    "Email".to_string(),
                    "Status".to_string(),
                    "Expiry".to_string(),
                ]];
                rows.extend(config.licenses.iter().map(|l| l.to_row()));
                store.insert_sheet(&config.license_sheet_id, "Licenses", rows)?;
                log::info!("seeded {} license(s)", config.licenses.len());
            }

            Ok(Arc::new(store))
        }
        Backend::Google { credentials_path } => {
            Ok(Arc::new(GoogleStore::from_key_file(credentials_path)?))
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let max_upload = state.recorder.config().max_upload_bytes;

    let protected = Router::new()
        .route("/recorder", get(serve_recorder))
        .route("/api/preview", get(preview))
        .route("/api/records", get(list_records).post(save_record))
        .route("/api/export/csv", get(export_csv))
        .route("/api/export/xlsx", get(export_xlsx))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(serve_gate))
        .route("/login", post(handle_login))
        .route("/logout", post(handle_logout))
        .route("/files/:id", get(serve_file))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(&config)?;
    let bind_addr = config.bind_addr.clone();

    let state = Arc::new(AppState {
        recorder: Recorder::new(store, config),
        sessions: SessionRegistry::new(),
    });

    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("Listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn session_context(state: &AppState, jar: &CookieJar) -> Option<(String, SessionContext)> {
    let id = jar.get(SESSION_COOKIE)?.value().to_string();
    let ctx = state.sessions.get(&id)?;
    Some((id, ctx))
}

fn gate_redirect(message: &str) -> Response {
    Redirect::to(&format!("/?error={}", urlencoding::encode(message))).into_response()
}

async fn serve_gate(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<GateQuery>,
) -> Response {
    if let Some((_, ctx)) = session_context(&state, &jar) {
        if ctx.authorized {
            return Redirect::to("/recorder").into_response();
        }
    }

    let notice = query
        .error
        .map(|e| format!("<p class=\"notice error\">{}</p>", escape_html(&e)))
        .unwrap_or_default();
    let page = include_str!("./static/gate.html").replace("<!--NOTICE-->", &notice);
    Html(page).into_response()
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let (existing, mut ctx) = match session_context(&state, &jar) {
        Some((id, ctx)) => (Some(id), ctx),
        None => (None, SessionContext::default()),
    };

    if let Err(e) = state.recorder.identify(&mut ctx, &form.email) {
        return gate_redirect(&e.to_string());
    }

    match state.recorder.login(&mut ctx, &form.key).await {
        LicenseDecision::Authorized => {
            let id = match existing {
                Some(id) => {
                    state.sessions.update(&id, ctx);
                    id
                }
                None => state.sessions.create(ctx),
            };
            let cookie = Cookie::build((SESSION_COOKIE, id))
                .path("/")
                .http_only(true);
            (jar.add(cookie), Redirect::to("/recorder")).into_response()
        }
        LicenseDecision::Denied(reason) => {
            if let Some(id) = existing {
                state.sessions.update(&id, ctx);
            }
            gate_redirect(&AppError::ValidationDenied { reason }.to_string())
        }
    }
}

async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }
    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/");
    (jar.remove(cookie), Redirect::to("/"))
}

/// Lets the request through only for sessions that passed the license gate.
async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some((id, ctx)) = session_context(&state, &jar) {
        if ctx.authorized {
            request.extensions_mut().insert(SessionId(id));
            return next.run(request).await;
        }
    }

    if request.uri().path().starts_with("/api/") {
        AppError::Unauthorised.into_response()
    } else {
        Redirect::to("/").into_response()
    }
}

async fn serve_recorder(State(state): State<Arc<AppState>>) -> Html<String> {
    let schema = match state.recorder.schema() {
        Schema::Standard => "standard",
        Schema::WithCustomer => "with_customer",
    };
    let page = include_str!("./static/recorder.html").replace(
        "</head>",
        &format!("    <script>const SCHEMA = \"{}\";</script>\n</head>", schema),
    );
    Html(page)
}

async fn preview(Query(q): Query<PreviewQuery>) -> Json<serde_json::Value> {
    let (revenue, profit) = record::derive(q.price, q.cost, q.quantity);
    Json(json!({ "revenue": revenue, "profit": profit }))
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("{} must be a number", name)))
}

async fn read_save_form(mut multipart: Multipart) -> Result<SaveRequest, AppError> {
    let mut request = SaveRequest {
        photo: None,
        draft: RecordDraft {
            quantity: 1,
            ..Default::default()
        },
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "photo" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidInput(e.to_string()))?;
            request.photo = Some(bytes.to_vec());
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        match name.as_str() {
            "product_name" => request.draft.product_name = value,
            "customer_name" => {
                request.draft.customer_name = Some(value.trim().to_string());
            }
            "selling_price" => request.draft.selling_price = parse_field("Selling price", &value)?,
            "cost_price" => request.draft.cost_price = parse_field("Cost price", &value)?,
            "quantity" => request.draft.quantity = parse_field("Quantity", &value)?,
            other => log::debug!("ignoring form field {}", other),
        }
    }

    Ok(request)
}

async fn save_record(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    multipart: Multipart,
) -> Response {
    let request = match read_save_form(multipart).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let Some(mut ctx) = state.sessions.get(&id) else {
        return AppError::Unauthorised.into_response();
    };
    let outcome = state.recorder.save(&mut ctx, request).await;
    state.sessions.update(&id, ctx);

    let notice = outcome.notice();
    let reset = outcome.reset_form();
    match outcome {
        SaveOutcome::Saved { row, record } => Json(json!({
            "status": notice.level,
            "message": notice.message,
            "reset": reset,
            "row": row,
            "record": record,
        }))
        .into_response(),
        SaveOutcome::Warning(e) | SaveOutcome::Failed(e) => e.into_response(),
    }
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Response {
    let Some(mut ctx) = state.sessions.get(&id) else {
        return AppError::Unauthorised.into_response();
    };
    let result = state.recorder.records(&mut ctx).await;
    state.sessions.update(&id, ctx);

    match result {
        Ok(view) => {
            let notice = view.notice();
            Json(json!({
                "status": notice.level,
                "message": notice.message,
                "header": view.header,
                "records": view.records,
                "totals": view.totals,
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Response {
    let Some(mut ctx) = state.sessions.get(&id) else {
        return AppError::Unauthorised.into_response();
    };
    let result = state.recorder.records(&mut ctx).await;
    state.sessions.update(&id, ctx);

    let view = match result {
        Ok(view) => view,
        Err(e) => return e.into_response(),
    };

    match downloader::to_csv(&view, state.recorder.schema()) {
        Ok(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"records.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn export_xlsx(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Response {
    let Some(mut ctx) = state.sessions.get(&id) else {
        return AppError::Unauthorised.into_response();
    };
    let result = state.recorder.records(&mut ctx).await;
    state.sessions.update(&id, ctx);

    let view = match result {
        Ok(view) => view,
        Err(e) => return e.into_response(),
    };

    match downloader::to_xlsx(&view, state.recorder.schema()) {
        Ok(bytes) => (
            [
                (
                    header::CONTENT_TYPE,
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"records.xlsx\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn serve_file(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.recorder.store().download_file(&id).await {
        Ok(bytes) => {
            let mime = match image::guess_format(&bytes) {
                Ok(image::ImageFormat::Png) => "image/png",
                Ok(image::ImageFormat::Jpeg) => "image/jpeg",
                Ok(image::ImageFormat::WebP) => "image/webp",
                _ => "application/octet-stream",
            };
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
