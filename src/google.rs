#![cfg(feature = "web")]
//! Google Sheets v4 / Drive v3 backend, authenticated as a service account.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{DocumentStore, RawRow, StoreError, StoreResult};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3/files";
const SCOPES: &str =
    "https://www.googleapis.com/auth/drive https://www.googleapis.com/auth/spreadsheets";
const SHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const TOKEN_LIFETIME: i64 = 3600;

/// Fields of a service account key file that the token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

pub struct GoogleStore {
    http: Client,
    key: ServiceAccountKey,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleStore {
    pub fn new(key: ServiceAccountKey) -> Self {
        GoogleStore {
            http: Client::new(),
            key,
            token: Mutex::new(None),
        }
    }

    pub fn from_key_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let key: ServiceAccountKey = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(GoogleStore::new(key))
    }

    /// Bearer token for the API, refreshed a minute before it expires.
    async fn access_token(&self) -> StoreResult<String> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - 60 > now {
                return Ok(token.value.clone());
            }
        }

        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| rejected(401, e.to_string()))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| rejected(401, e.to_string()))?;

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(rejected(status.as_u16(), body));
        }

        let token: TokenResponse = resp.json().await.map_err(unavailable)?;
        log::debug!("obtained access token for {}", self.key.client_email);

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in.unwrap_or(TOKEN_LIFETIME),
        });
        Ok(value)
    }

    async fn call(&self, request: RequestBuilder) -> StoreResult<Value> {
        let token = self.access_token().await?;
        let resp = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(unavailable)?;
        classify_response(status, &body)
    }

    fn values_url(sheet_id: &str, range: &str, suffix: &str) -> String {
        format!(
            "{}/{}/values/{}{}",
            SHEETS_API,
            sheet_id,
            urlencoding::encode(range),
            suffix
        )
    }

    async fn find_by_name(
        &self,
        name: &str,
        mime: &str,
        parent: Option<&str>,
    ) -> StoreResult<Option<String>> {
        let mut q = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query(name),
            mime
        );
        if let Some(parent) = parent {
            q.push_str(&format!(" and '{}' in parents", escape_query(parent)));
        }

        let resp = self
            .call(
                self.http
                    .get(DRIVE_API)
                    .query(&[("q", q.as_str()), ("fields", "files(id)")]),
            )
            .await?;

        Ok(resp["files"]
            .as_array()
            .and_then(|files| files.first())
            .and_then(|f| f["id"].as_str())
            .map(str::to_string))
    }

    async fn create_with_mime(
        &self,
        name: &str,
        mime: &str,
        parent: Option<&str>,
    ) -> StoreResult<String> {
        let mut body = json!({ "name": name, "mimeType": mime });
        if let Some(parent) = parent {
            body["parents"] = json!([parent]);
        }

        let resp = self
            .call(
                self.http
                    .post(DRIVE_API)
                    .query(&[("fields", "id")])
                    .json(&body),
            )
            .await?;
        id_of(&resp)
    }
}

fn unavailable(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn rejected(status: u16, message: String) -> StoreError {
    StoreError::Rejected { status, message }
}

fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn id_of(resp: &Value) -> StoreResult<String> {
    resp["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| rejected(502, "response carried no id".to_string()))
}

/// Map an API answer to a JSON value or a store error.
///
/// Drive reports a full quota as an error whose body mentions
/// `storageQuotaExceeded`, whatever the status code.
fn classify_response(status: u16, body: &str) -> StoreResult<Value> {
    if (200..300).contains(&status) {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(body).map_err(|e| rejected(status, e.to_string()));
    }

    if body.contains("storageQuotaExceeded") {
        return Err(StoreError::QuotaExceeded);
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    if status == 404 {
        return Err(StoreError::NotFound(message));
    }
    Err(rejected(status, message))
}

fn cell_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl DocumentStore for GoogleStore {
    async fn read_range(&self, sheet_id: &str, range: &str) -> StoreResult<Vec<RawRow>> {
        let resp = self
            .call(self.http.get(Self::values_url(sheet_id, range, "")).query(&[
                ("valueRenderOption", "FORMULA"),
                ("dateTimeRenderOption", "FORMATTED_STRING"),
            ]))
            .await?;

        Ok(resp["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(cell_to_string).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_rows(
        &self,
        sheet_id: &str,
        range: &str,
        rows: Vec<RawRow>,
    ) -> StoreResult<()> {
        self.call(
            self.http
                .post(Self::values_url(sheet_id, range, ":append"))
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&json!({ "values": rows })),
        )
        .await?;
        Ok(())
    }

    async fn update_range(
        &self,
        sheet_id: &str,
        range: &str,
        rows: Vec<RawRow>,
    ) -> StoreResult<()> {
        self.call(
            self.http
                .put(Self::values_url(sheet_id, range, ""))
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&json!({ "values": rows })),
        )
        .await?;
        Ok(())
    }

    async fn clear_range(&self, sheet_id: &str, range: &str) -> StoreResult<()> {
        self.call(
            self.http
                .post(Self::values_url(sheet_id, range, ":clear"))
                .json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn find_sheet(&self, name: &str, parent: Option<&str>) -> StoreResult<Option<String>> {
        self.find_by_name(name, SHEET_MIME, parent).await
    }

    async fn create_sheet(&self, name: &str, parent: Option<&str>) -> StoreResult<String> {
        self.create_with_mime(name, SHEET_MIME, parent).await
    }

    async fn find_folder(&self, name: &str, parent: Option<&str>) -> StoreResult<Option<String>> {
        self.find_by_name(name, FOLDER_MIME, parent).await
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StoreResult<String> {
        self.create_with_mime(name, FOLDER_MIME, parent).await
    }

    async fn upload_file(&self, local_path: &Path, parent: Option<&str>) -> StoreResult<String> {
        let bytes = tokio::fs::read(local_path).await?;
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut metadata = json!({ "name": name });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }

        let boundary = format!("recorder-{}", Uuid::new_v4().simple());
        let mut body = Vec::with_capacity(bytes.len() + 512);
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
                b = boundary,
                m = metadata,
                t = mime_for(local_path)
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let resp = self
            .call(
                self.http
                    .post(DRIVE_UPLOAD_API)
                    .query(&[("uploadType", "multipart"), ("fields", "id")])
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/related; boundary={}", boundary),
                    )
                    .body(body),
            )
            .await?;
        id_of(&resp)
    }

    async fn grant_public_read(&self, file_id: &str) -> StoreResult<String> {
        self.call(
            self.http
                .post(format!("{}/{}/permissions", DRIVE_API, file_id))
                .json(&json!({ "role": "reader", "type": "anyone" })),
        )
        .await?;
        Ok(format!("https://drive.google.com/uc?id={}", file_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_render_as_strings() {
        let row = json!(["TOTAL", 300, 2.5, null, true]);
        let cells: Vec<String> = row.as_array().unwrap().iter().map(cell_to_string).collect();
        assert_eq!(cells, vec!["TOTAL", "300", "2.5", "", "true"]);
    }

    #[test]
    fn ranges_are_encoded_in_urls() {
        let url = GoogleStore::values_url("abc", "A:I", ":append");
        assert_eq!(
            url,
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/A%3AI:append"
        );
    }

    #[test]
    fn responses_are_classified() {
        assert_eq!(
            classify_response(200, r#"{"id":"f1"}"#).unwrap()["id"],
            "f1"
        );
        assert_eq!(classify_response(204, "").unwrap(), Value::Null);

        let quota = r#"{"error":{"errors":[{"reason":"storageQuotaExceeded"}],"message":"The user's Drive storage quota has been exceeded."}}"#;
        assert!(matches!(
            classify_response(403, quota),
            Err(StoreError::QuotaExceeded)
        ));

        let missing = r#"{"error":{"code":404,"message":"Requested entity was not found."}}"#;
        match classify_response(404, missing) {
            Err(StoreError::NotFound(msg)) => assert_eq!(msg, "Requested entity was not found."),
            other => panic!("expected NotFound, got {:?}", other),
        }

        match classify_response(500, "backend error") {
            Err(StoreError::Rejected { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "backend error");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }

        assert!(matches!(
            classify_response(200, "not json"),
            Err(StoreError::Rejected { status: 200, .. })
        ));
    }

    #[test]
    fn query_quotes_are_escaped() {
        assert_eq!(escape_query("Bob's"), "Bob\\'s");
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for(Path::new("1700000000-x.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a")), "application/octet-stream");
    }
}
