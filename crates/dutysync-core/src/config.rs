use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::classify::ErrorVocabulary;
use crate::error::{CoreError, Result};
use crate::gateway::RetryPolicy;
use crate::schedule::SchedulePolicy;

/// Connection settings for the remote directory service.
///
/// Fields stay optional here; the HTTP client reports which ones are missing
/// when it is constructed.
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub server_url: Option<String>,
    pub org_code: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: String,
    pub request_timeout: Duration,
}

/// Immutable inputs for one polling cycle.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub csv_directory: PathBuf,
    pub processed_directory: PathBuf,
    pub failed_files_directory: PathBuf,
    pub move_processed_files: bool,
    pub duty_status_field: String,
    pub identifier_field: String,
    pub user_attributes: Vec<String>,
    pub sync_mappings: bool,
    pub batch_size: usize,
    pub auto_cleanup_hours: u32,
    pub schedule: SchedulePolicy,
    pub max_retry_attempts: u32,
    pub expected_errors: ErrorVocabulary,
    pub transport_retry: RetryPolicy,
    pub remote: RemoteSettings,
}

impl Config {
    /// Reads the process environment. Callers load `.env` beforehand.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let identifier_field = get("COLLAR_ID_FIELD").unwrap_or_else(|| "COLLAR_ID".to_string());
        let mut user_attributes: Vec<String> = get("USER_ATTRIBUTES")
            .unwrap_or_else(|| "COLLAR_ID,FIRSTNAME,LASTNAME".to_string())
            .split(',')
            .map(|attr| attr.trim().to_string())
            .filter(|attr| !attr.is_empty())
            .collect();
        if !user_attributes.contains(&identifier_field) {
            user_attributes.insert(0, identifier_field.clone());
        }

        let batch_size: usize = parse_or(&get, "BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(CoreError::Config("BATCH_SIZE must be at least 1".into()));
        }

        let sync_hour: u32 = parse_or(&get, "SYNC_HOUR", 20)?;
        if sync_hour > 23 {
            return Err(CoreError::Config(format!(
                "SYNC_HOUR must be between 0 and 23, got {sync_hour}"
            )));
        }

        let expected_errors = match get("EXPECTED_ERROR_PATTERNS") {
            Some(raw) => ErrorVocabulary::parse(&raw)
                .map_err(|e| CoreError::Config(format!("EXPECTED_ERROR_PATTERNS: {e}")))?,
            None => ErrorVocabulary::default(),
        };

        let transport_attempts: u32 = parse_or(&get, "TRANSPORT_RETRY_ATTEMPTS", 3)?;
        let request_timeout = Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 30)?);

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://dutysync.db".to_string()),
            csv_directory: get("CSV_DIRECTORY").unwrap_or_else(|| "./incoming".into()).into(),
            processed_directory: get("PROCESSED_DIRECTORY")
                .unwrap_or_else(|| "./processed".into())
                .into(),
            failed_files_directory: get("FAILED_FILES_DIRECTORY")
                .unwrap_or_else(|| "./failed".into())
                .into(),
            move_processed_files: parse_bool_or(&get, "MOVE_PROCESSED_FILES", true)?,
            duty_status_field: get("DUTY_STATUS_FIELD").unwrap_or_else(|| "On-Duty-DTG".to_string()),
            identifier_field,
            user_attributes,
            sync_mappings: parse_bool_or(&get, "SYNC_MAPPINGS", true)?,
            batch_size,
            auto_cleanup_hours: parse_or(&get, "AUTO_CLEANUP_HOURS", 24)?,
            schedule: SchedulePolicy {
                sync_hour,
                sync_retry_days: parse_or(&get, "SYNC_RETRY_DAYS", 2)?,
            },
            max_retry_attempts: parse_or(&get, "MAX_RETRY_ATTEMPTS", 5)?,
            expected_errors,
            transport_retry: RetryPolicy {
                max_attempts: transport_attempts.max(1),
                ..RetryPolicy::default()
            },
            remote: RemoteSettings {
                server_url: get("ATHOC_SERVER_URL").map(|url| url.trim_end_matches('/').to_string()),
                org_code: get("ORG_CODE"),
                client_id: get("CLIENT_ID"),
                client_secret: get("CLIENT_SECRET"),
                username: get("USERNAME"),
                password: get("PASSWORD"),
                scope: get("SCOPE").unwrap_or_default(),
                request_timeout,
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| CoreError::Config(format!("{key}='{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => Err(CoreError::Config(format!("{key}='{v}' is not a boolean"))),
    }
}
