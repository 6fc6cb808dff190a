use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::license::EmailBinding;
use crate::record::Schema;

/// Where records, licenses and photos are kept.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// In-process store, optionally persisted to a snapshot file
    Memory {
        #[serde(default)]
        snapshot_path: Option<PathBuf>,
    },
    /// Google Sheets and Drive through a service account key file
    Google { credentials_path: PathBuf },
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Memory {
            snapshot_path: None,
        }
    }
}

/// A license row used to seed the memory backend.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LicenseSeed {
    pub key: String,
    pub email: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub expiry: String,
}

impl LicenseSeed {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.key.clone(),
            self.email.clone(),
            self.status.clone(),
            self.expiry.clone(),
        ]
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub license_sheet_id: String,
    pub app_sheet_name: String,
    pub parent_folder_id: Option<String>,
    /// Give every user their own folder (named after their email)
    pub per_user_folder: bool,
    pub email_binding: EmailBinding,
    pub schema: Schema,
    /// Keep a `TOTAL` row after the last record
    pub totals_row: bool,
    pub max_upload_bytes: usize,
    pub backend: Backend,
    pub licenses: Vec<LicenseSeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: "127.0.0.1:3000".to_string(),
            license_sheet_id: "licenses".to_string(),
            app_sheet_name: "Product Records".to_string(),
            parent_folder_id: None,
            per_user_folder: false,
            email_binding: EmailBinding::Enforced,
            schema: Schema::Standard,
            totals_row: true,
            max_upload_bytes: 10 * 1024 * 1024,
            backend: Backend::default(),
            licenses: Vec::new(),
        }
    }
}

fn default_status() -> String {
    "ACTIVE".to_string()
}

const ENV_PREFIX: &str = "RECORDER_";

impl AppConfig {
    /// Load from an optional TOML file, then apply `RECORDER_*` overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_toml(&text)?
            }
            None => AppConfig::default(),
        };
        config.apply_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> AppResult<Self> {
        toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Apply overrides from a variable lookup (names without the prefix).
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> AppResult<()> {
        if let Some(v) = var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("LICENSE_SHEET_ID") {
            self.license_sheet_id = v;
        }
        if let Some(v) = var("APP_SHEET_NAME") {
            self.app_sheet_name = v;
        }
        if let Some(v) = var("PARENT_FOLDER_ID") {
            self.parent_folder_id = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = var("PER_USER_FOLDER") {
            self.per_user_folder = parse_bool("PER_USER_FOLDER", &v)?;
        }
        if let Some(v) = var("TOTALS_ROW") {
            self.totals_row = parse_bool("TOTALS_ROW", &v)?;
        }
        if let Some(v) = var("EMAIL_BINDING") {
            self.email_binding = match v.as_str() {
                "enforced" => EmailBinding::Enforced,
                "disabled" => EmailBinding::Disabled,
                other => return Err(invalid("EMAIL_BINDING", other)),
            };
        }
        if let Some(v) = var("SCHEMA") {
            self.schema = match v.as_str() {
                "standard" => Schema::Standard,
                "with_customer" => Schema::WithCustomer,
                other => return Err(invalid("SCHEMA", other)),
            };
        }
        if let Some(v) = var("GOOGLE_CREDENTIALS") {
            self.backend = Backend::Google {
                credentials_path: PathBuf::from(v),
            };
        } else if let Some(v) = var("SNAPSHOT_PATH") {
            self.backend = Backend::Memory {
                snapshot_path: Some(PathBuf::from(v)),
            };
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> AppResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(name, other)),
    }
}

fn invalid(name: &str, value: &str) -> AppError {
    AppError::Config(format!("{ENV_PREFIX}{name}: unsupported value '{value}'"))
}
