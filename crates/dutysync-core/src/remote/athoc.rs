//! HTTP client for the AtHoc directory API.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Local};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{DirectoryEntry, DirectoryService, RemoteError};
use crate::config::RemoteSettings;
use crate::gateway::RetryPolicy;
use crate::model::{BatchOutcome, ReconciledUpdate, DUTY_STATUS_FORMAT};

const PAGE_SIZE: usize = 500;
const LOGIN_FIELD: &str = "LOGIN_ID";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(rename = "Users", default)]
    users: Vec<Map<String, Value>>,
    #[serde(rename = "TotalCount", default)]
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SyncResult {
    #[serde(rename = "LOGIN_ID", default)]
    login_id: String,
    #[serde(rename = "SyncStatus", default)]
    sync_status: String,
    #[serde(rename = "SyncDetails", default)]
    sync_details: Option<String>,
    #[serde(rename = "ID", default)]
    id: Option<Value>,
}

pub struct AtHocClient {
    http: reqwest::Client,
    base_url: String,
    org_code: String,
    token: String,
}

impl AtHocClient {
    /// Builds the HTTP client and obtains an access token. Transient token
    /// failures are retried with the default backoff.
    pub async fn connect(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let base_url = required(&settings.server_url, "ATHOC_SERVER_URL")?;
        let org_code = required(&settings.org_code, "ORG_CODE")?;

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        let retry = RetryPolicy::default();
        let mut attempt = 0;
        let token = loop {
            attempt += 1;
            match request_token(&http, settings, &base_url, &org_code).await {
                Ok(token) => break token,
                Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                    let delay = (retry.base_delay * 2u32.pow(attempt - 1)).min(retry.max_delay);
                    warn!(attempt, error = %err, ?delay, "Token request failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        info!(server = %base_url, org = %org_code, "Connected to AtHoc");
        Ok(Self {
            http,
            base_url,
            org_code,
            token,
        })
    }

    fn users_url(&self) -> String {
        format!("{}/api/v2/orgs/{}/users", self.base_url, self.org_code)
    }

    /// Walks every page of the basic user search.
    async fn search(
        &self,
        fields: &[String],
        criteria: Option<&str>,
    ) -> Result<Vec<Map<String, Value>>, RemoteError> {
        let url = format!("{}/search/basic", self.users_url());
        let mut users = Vec::new();
        let mut page_number = 1usize;

        loop {
            let mut query: Vec<(&str, String)> = fields
                .iter()
                .map(|field| ("Fields", field.clone()))
                .collect();
            query.push(("PageNumber", page_number.to_string()));
            query.push(("PageSize", PAGE_SIZE.to_string()));
            if let Some(criteria) = criteria {
                query.push(("Criteria", criteria.to_string()));
            }

            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(&query)
                .send()
                .await
                .map_err(transport)?;
            let page: SearchPage = check_response(resp).await?.json().await.map_err(transport)?;

            let received = page.users.len();
            users.extend(page.users);
            debug!(page = page_number, received, total = ?page.total_count, "Fetched user page");

            let exhausted = match page.total_count {
                Some(total) => users.len() >= total,
                None => received < PAGE_SIZE,
            };
            if exhausted || received == 0 {
                return Ok(users);
            }
            page_number += 1;
        }
    }
}

#[async_trait]
impl DirectoryService for AtHocClient {
    async fn fetch_directory(
        &self,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>, RemoteError> {
        let users = self.search(attributes, None).await?;
        let entries: Vec<DirectoryEntry> = users.into_iter().filter_map(directory_entry).collect();
        info!(users = entries.len(), "Fetched directory listing");
        Ok(entries)
    }

    async fn submit_updates(
        &self,
        field: &str,
        updates: &[ReconciledUpdate],
    ) -> Result<Vec<BatchOutcome>, RemoteError> {
        let body: Vec<Value> = updates
            .iter()
            .map(|update| json!({ LOGIN_FIELD: update.username, field: update.value }))
            .collect();

        let resp = self
            .http
            .post(self.users_url())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let results: Vec<SyncResult> = check_response(resp).await?.json().await.map_err(transport)?;

        Ok(results.into_iter().map(batch_outcome).collect())
    }

    async fn query_stale(
        &self,
        field: &str,
        older_than_hours: u32,
    ) -> Result<Vec<String>, RemoteError> {
        let cutoff = Local::now().naive_local() - Duration::hours(i64::from(older_than_hours));
        let criteria = format!("{field} lt '{}'", cutoff.format(DUTY_STATUS_FORMAT));
        let users = self.search(&[field.to_string()], Some(&criteria)).await?;

        Ok(users
            .iter()
            .filter_map(|user| string_value(user.get(LOGIN_FIELD)))
            .collect())
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String, RemoteError> {
    value
        .clone()
        .ok_or_else(|| RemoteError::Config(format!("{key} is not set")))
}

async fn request_token(
    http: &reqwest::Client,
    settings: &RemoteSettings,
    base_url: &str,
    org_code: &str,
) -> Result<String, RemoteError> {
    let form = [
        ("grant_type", "password".to_string()),
        ("scope", settings.scope.clone()),
        ("client_id", required(&settings.client_id, "CLIENT_ID")?),
        ("client_secret", required(&settings.client_secret, "CLIENT_SECRET")?),
        ("username", required(&settings.username, "USERNAME")?),
        ("password", required(&settings.password, "PASSWORD")?),
        ("acr_values", format!("tenant:{org_code}")),
    ];

    let resp = http
        .post(format!("{base_url}/AuthServices/Auth/connect/token"))
        .form(&form)
        .send()
        .await
        .map_err(transport)?;

    let status = resp.status();
    if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
        let body = resp.text().await.unwrap_or_default();
        return Err(RemoteError::Auth(format!("HTTP {}: {body}", status.as_u16())));
    }

    let token: TokenResponse = check_response(resp).await?.json().await.map_err(transport)?;
    Ok(token.access_token)
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(RemoteError::Auth(format!("HTTP {}: {body}", status.as_u16())));
    }
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

fn transport(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Transport(err.to_string())
    }
}

fn string_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn directory_entry(user: Map<String, Value>) -> Option<DirectoryEntry> {
    let username = string_value(user.get(LOGIN_FIELD))?;
    let attributes: HashMap<String, String> = user
        .iter()
        .filter(|(key, _)| key.as_str() != LOGIN_FIELD)
        .filter_map(|(key, value)| string_value(Some(value)).map(|v| (key.clone(), v)))
        .collect();
    Some(DirectoryEntry {
        username,
        attributes,
    })
}

fn batch_outcome(result: SyncResult) -> BatchOutcome {
    let detail = result.sync_details.unwrap_or_default();
    let mut outcome = if result.sync_status.eq_ignore_ascii_case("OK") {
        BatchOutcome::ok(result.login_id)
    } else {
        BatchOutcome::error(result.login_id, detail)
    };
    outcome.remote_id = string_value(result.id.as_ref());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_results_map_to_outcomes() {
        let results: Vec<SyncResult> = serde_json::from_value(json!([
            { "LOGIN_ID": "a", "SyncStatus": "OK", "SyncDetails": null, "ID": 42 },
            { "LOGIN_ID": "b", "SyncStatus": "Error", "SyncDetails": "User: b does not exists in the Organization" }
        ]))
        .unwrap();

        let outcomes: Vec<BatchOutcome> = results.into_iter().map(batch_outcome).collect();
        assert_eq!(outcomes[0].remote_id.as_deref(), Some("42"));
        assert_eq!(outcomes[0].detail, "");
        assert_eq!(
            outcomes[1],
            BatchOutcome::error("b", "User: b does not exists in the Organization")
        );
    }

    #[test]
    fn directory_entries_need_a_login() {
        let with_login = json!({ "LOGIN_ID": "jdoe", "COLLAR_ID": " 00100 ", "FIRSTNAME": "" });
        let without = json!({ "COLLAR_ID": "00200" });

        let entry = directory_entry(with_login.as_object().unwrap().clone()).unwrap();
        assert_eq!(entry.username, "jdoe");
        assert_eq!(entry.attribute("COLLAR_ID"), Some("00100"));
        assert_eq!(entry.attribute("FIRSTNAME"), None);

        assert!(directory_entry(without.as_object().unwrap().clone()).is_none());
    }
}
