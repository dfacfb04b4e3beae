use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::retry::{is_retryable_status, with_retry, RetryConfig};

const REST_PREFIX: &str = "rest/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Row already exists: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether asking again could plausibly give a different answer
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::ServerError { .. } | ApiError::RateLimitExceeded => true,
            ApiError::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// A single `column=op.value` filter in the backend's query-string dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self {
            column: column.into(),
            value: format!("eq.{}", value),
        }
    }

    fn as_pair(&self) -> (&str, &str) {
        (&self.column, &self.value)
    }
}

/// Row-oriented client for a hosted Postgres REST endpoint
///
/// Only the narrow calls the client core needs: select, insert, delete.
/// Auth sessions are issued elsewhere; we just carry the access token.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    retry_config: RetryConfig,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("wedhub/0.1.0"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
            retry_config: RetryConfig::default(),
        })
    }

    /// Attach the signed-in user's access token
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PREFIX, table)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", bearer))
    }

    /// `GET /rest/v1/{table}?select=..&filters..&order=..`
    pub async fn select_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: &[Filter],
        order: Option<&str>,
    ) -> Result<Vec<T>> {
        let url = self.table_url(table);

        with_retry(&self.retry_config, ApiError::is_transient, || async {
            let mut query: Vec<(&str, &str)> = vec![("select", columns)];
            query.extend(filters.iter().map(Filter::as_pair));
            if let Some(order) = order {
                query.push(("order", order));
            }

            let request = self.authorize(self.client.get(&url).query(&query));
            let response = check_status(request.send().await?, table).await?;
            let rows: Vec<T> = serde_json::from_str(&response.text().await?)?;
            debug!("Selected {} rows from {}", rows.len(), table);
            Ok(rows)
        })
        .await
    }

    /// `POST /rest/v1/{table}` with `Prefer: return=minimal`
    pub async fn insert_row<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<()> {
        let url = self.table_url(table);
        let body = serde_json::to_string(row)?;

        with_retry(&self.retry_config, ApiError::is_transient, || async {
            let request = self
                .authorize(self.client.post(&url))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header("Prefer", "return=minimal")
                .body(body.clone());

            check_status(request.send().await?, table).await?;
            Ok(())
        })
        .await
    }

    /// `DELETE /rest/v1/{table}?filters..`
    ///
    /// Deleting zero rows is still a success - the backend answers 204 either way.
    pub async fn delete_rows(&self, table: &str, filters: &[Filter]) -> Result<()> {
        if filters.is_empty() {
            // An unfiltered DELETE would wipe the table
            return Err(ApiError::RequestFailed(format!(
                "refusing unfiltered delete on {}",
                table
            )));
        }

        let url = self.table_url(table);

        with_retry(&self.retry_config, ApiError::is_transient, || async {
            let query: Vec<(&str, &str)> = filters.iter().map(Filter::as_pair).collect();
            let request = self.authorize(self.client.delete(&url).query(&query));

            match check_status(request.send().await?, table).await {
                Ok(_) | Err(ApiError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }
}

/// Map backend status codes onto our error type
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 | 403 => Err(ApiError::AuthRequired),
        404 => Err(ApiError::NotFound(what.to_string())),
        409 => Err(ApiError::Conflict(body)),
        429 => Err(ApiError::RateLimitExceeded),
        _ if is_retryable_status(status) => Err(ApiError::ServerError {
            status: status.as_u16(),
            body,
        }),
        _ => Err(ApiError::RequestFailed(format!("Status {}: {}", status, body))),
    }
}
