pub mod limiter;
pub mod middleware;
pub mod quota;

pub use limiter::{ConcurrencyGate, TokenBucket};
pub use middleware::{classify_request, ApiProtocol, GatedResponse, RateLimitedClient, Transport};
pub use quota::{QuotaSnapshot, QuotaTracker, RateBudget};

use crate::config::Config;
use crate::error::ApiError;
use base64::Engine; // for URL_SAFE_NO_PAD.encode/decode
use reqwest::header::{HeaderMap, HeaderValue, LINK, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: String,
    pub retriable: bool,
}

/// REST rate-limit headers as sent by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestRateHeaders {
    pub limit: i64,
    pub remaining: i64,
    pub reset_epoch: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RestResponse<T> {
    pub value: T,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl<T> RestResponse<T> {
    pub fn next_page(&self) -> Option<u32> {
        next_page_from_link(&self.headers)
    }
}

/// Client for API calls. Redirects are not followed so the job-log endpoint's
/// `Location` can be handed to the download client.
pub fn build_client(cfg: &Config) -> Result<Client, ApiError> {
    Client::builder()
        .default_headers(user_agent_headers(cfg)?)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .use_rustls_tls()
        .build()
        .map_err(ApiError::from)
}

/// Client for plain file downloads (log blobs). Carries no credential.
pub fn build_download_client(cfg: &Config) -> Result<Client, ApiError> {
    Client::builder()
        .default_headers(user_agent_headers(cfg)?)
        .connect_timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()
        .map_err(ApiError::from)
}

fn user_agent_headers(cfg: &Config) -> Result<HeaderMap, ApiError> {
    let mut default_headers = HeaderMap::new();
    let ua = HeaderValue::from_str(&cfg.user_agent)
        .map_err(|_| ApiError::InvalidRequest("invalid GITHUB_USER_AGENT".into()))?;
    default_headers.insert(USER_AGENT, ua);
    Ok(default_headers)
}

pub(crate) fn auth_header(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidRequest("token contains invalid characters".into()))?;
    value.set_sensitive(true);
    Ok(value)
}

pub fn map_status_to_error(status: StatusCode, message: String) -> ErrorInfo {
    let (code, retriable) = match status {
        StatusCode::BAD_REQUEST => ("bad_request", false),
        StatusCode::UNAUTHORIZED => ("unauthorized", false),
        StatusCode::FORBIDDEN => ("forbidden", false),
        StatusCode::NOT_FOUND => ("not_found", false),
        StatusCode::CONFLICT => ("conflict", false),
        StatusCode::TOO_MANY_REQUESTS => ("rate_limited", true),
        s if s.is_server_error() => ("upstream_error", true),
        _ => ("server_error", false),
    };
    ErrorInfo {
        code,
        message,
        retriable,
    }
}

/// Turn a non-success response into an error. GitHub bodies look like
/// `{"message": "...", "documentation_url": "..."}`; fall back to the raw text.
pub fn status_error(status: StatusCode, body: &str) -> ApiError {
    #[derive(Deserialize)]
    struct GitHubMessage {
        message: String,
    }
    let message = serde_json::from_str::<GitHubMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.trim().to_string());
    if status == StatusCode::NOT_FOUND {
        return ApiError::NotFound { message };
    }
    let info = map_status_to_error(status, message);
    ApiError::Status {
        status,
        code: info.code,
        message: info.message,
        retriable: info.retriable,
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
}

/// Limit and remaining are required; reset is recorded when present.
pub fn extract_rate_from_rest(headers: &HeaderMap) -> Option<RestRateHeaders> {
    Some(RestRateHeaders {
        limit: header_i64(headers, "x-ratelimit-limit")?,
        remaining: header_i64(headers, "x-ratelimit-remaining")?,
        reset_epoch: header_i64(headers, "x-ratelimit-reset"),
    })
}

/// Page number of the `rel="next"` entry in a `Link` header.
pub fn next_page_from_link(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == "rel=\"next\"") {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let url = url::Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse::<u32>().ok())
    })
}

pub fn encode_path_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

pub async fn rest_get_json<T: DeserializeOwned>(
    client: &RateLimitedClient,
    path: &str,
    query: &[(&str, String)],
    cancel: &CancellationToken,
) -> Result<RestResponse<T>, ApiError> {
    let request = client.rest_request(Method::GET, path, query)?;
    let res = client.execute(request, cancel).await?;
    let status = res.status();
    let headers = res.headers().clone();
    let text = res.text(cancel).await?;
    if !status.is_success() {
        return Err(status_error(status, &text));
    }
    let value = serde_json::from_str::<T>(&text)?;
    Ok(RestResponse {
        value,
        status,
        headers,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQlError>>, // standard GraphQL errors
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    /// GitHub's error class, e.g. `NOT_FOUND` or `FORBIDDEN`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

pub async fn graphql_post<T: DeserializeOwned>(
    client: &RateLimitedClient,
    query: &str,
    variables: &serde_json::Value,
    cancel: &CancellationToken,
) -> Result<T, ApiError> {
    let body = serde_json::json!({ "query": query, "variables": variables });
    let request = client.graphql_request(&body)?;
    let res = client.execute(request, cancel).await?;
    let status = res.status();
    let text = res.text(cancel).await?;
    if !status.is_success() {
        return Err(status_error(status, &text));
    }
    let parsed: GraphQlResponse<T> = serde_json::from_str(&text)?;
    if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
        let msg = errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if errors.iter().all(|e| e.kind.as_deref() == Some("NOT_FOUND")) {
            return Err(ApiError::NotFound { message: msg });
        }
        return Err(ApiError::GraphQl(msg));
    }
    parsed
        .data
        .ok_or_else(|| ApiError::GraphQl("response contained no data".into()))
}

// REST opaque cursor codec: base64(JSON { page, per_page })
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestCursor {
    pub page: u32,
    pub per_page: u32,
}

pub fn encode_rest_cursor(c: RestCursor) -> String {
    // Serializing two integers cannot fail.
    let json = serde_json::to_vec(&c).unwrap_or_default();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
}

pub fn decode_rest_cursor(s: &str) -> Option<RestCursor> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
