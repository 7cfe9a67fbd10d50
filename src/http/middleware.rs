use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, Response, StatusCode};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::limiter::{
    ConcurrencyGate, TokenBucket, DEFAULT_BURST, GRAPHQL_POINTS_PER_HOUR, REST_REQUESTS_PER_HOUR,
};
use super::quota::QuotaTracker;
use super::{auth_header, build_client, extract_rate_from_rest};
use crate::config::Config;
use crate::error::ApiError;

/// Which of GitHub's separately billed APIs a call is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiProtocol {
    Rest,
    GraphQl,
}

/// A call is GraphQL iff it POSTs to the GraphQL endpoint; everything else is REST.
pub fn classify_request(method: &Method, path: &str, graphql_path: &str) -> ApiProtocol {
    if *method == Method::POST && path == graphql_path {
        ApiProtocol::GraphQl
    } else {
        ApiProtocol::Rest
    }
}

/// The network step underneath the middleware.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        reqwest::Client::execute(self, request).await
    }
}

/// A response that still holds its call's gate permit.
///
/// The call counts as in flight until the body has been read or the response is
/// dropped, so slow bodies can't push the number of open connections past the gate.
#[derive(Debug)]
pub struct GatedResponse {
    response: Response,
    permit: OwnedSemaphorePermit,
}

impl GatedResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn url(&self) -> &Url {
        self.response.url()
    }

    /// Read the whole body, then release the permit.
    pub async fn text(self, cancel: &CancellationToken) -> Result<String, ApiError> {
        let GatedResponse { response, permit } = self;
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            text = response.text() => text.map_err(ApiError::from),
        };
        drop(permit);
        text
    }

    /// For callers that stream the body themselves; keep the permit alive until done.
    pub fn into_parts(self) -> (Response, OwnedSemaphorePermit) {
        (self.response, self.permit)
    }
}

/// Every API call goes through here: concurrency gate, then the protocol's token
/// bucket, then the transport, then the quota update.
pub struct RateLimitedClient {
    cfg: Config,
    transport: Arc<dyn Transport>,
    graphql_url: Url,
    gate: ConcurrencyGate,
    rest_limiter: TokenBucket,
    graphql_limiter: TokenBucket,
    quota: QuotaTracker,
}

impl RateLimitedClient {
    pub fn new(cfg: Config) -> Result<Self, ApiError> {
        let transport = Arc::new(build_client(&cfg)?);
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: Config, transport: Arc<dyn Transport>) -> Result<Self, ApiError> {
        let graphql_url = Url::parse(&cfg.graphql_url)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid GraphQL URL: {}", e)))?;
        Ok(Self {
            cfg,
            transport,
            graphql_url,
            gate: ConcurrencyGate::default(),
            rest_limiter: TokenBucket::per_hour(REST_REQUESTS_PER_HOUR, DEFAULT_BURST),
            graphql_limiter: TokenBucket::per_hour(GRAPHQL_POINTS_PER_HOUR, DEFAULT_BURST),
            quota: QuotaTracker::new(),
        })
    }

    pub fn with_gate(mut self, gate: ConcurrencyGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_limiters(mut self, rest: TokenBucket, graphql: TokenBucket) -> Self {
        self.rest_limiter = rest;
        self.graphql_limiter = graphql;
        self
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn classify(&self, request: &Request) -> ApiProtocol {
        classify_request(request.method(), request.url().path(), self.graphql_url.path())
    }

    /// Run one call. Cancellation is honoured while waiting on the gate, the token
    /// bucket and the response. On success the permit moves into the returned
    /// [`GatedResponse`]; on every other exit path it is dropped here.
    pub async fn execute(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<GatedResponse, ApiError> {
        let protocol = self.classify(&request);
        debug!(
            "{:?} {} {}",
            protocol,
            request.method(),
            request.url().path()
        );

        let permit = self.gate.acquire(cancel).await?;
        match protocol {
            ApiProtocol::Rest => self.rest_limiter.acquire(cancel).await?,
            ApiProtocol::GraphQl => self.graphql_limiter.acquire(cancel).await?,
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            res = self.transport.execute(request) => res?,
        };
        self.observe(protocol, response.headers());
        Ok(GatedResponse { response, permit })
    }

    // GraphQL responses don't carry the REST headers; reading them there would
    // clobber the REST budget.
    fn observe(&self, protocol: ApiProtocol, headers: &HeaderMap) {
        if protocol != ApiProtocol::Rest {
            return;
        }
        if let Some(rate) = extract_rate_from_rest(headers) {
            debug!(
                "rest quota: {}/{} (reset {:?})",
                rate.remaining, rate.limit, rate.reset_epoch
            );
            self.quota
                .record_rest(rate.limit, rate.remaining, rate.reset_epoch);
        }
    }

    /// Build an authenticated REST request for `path` (which must start with `/`).
    pub fn rest_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Request, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.cfg.api_url, path))
            .map_err(|e| ApiError::InvalidRequest(format!("invalid URL for {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        let mut request = Request::new(method, url);
        self.apply_headers(
            request.headers_mut(),
            HeaderValue::from_static("application/vnd.github+json"),
        )?;
        Ok(request)
    }

    pub fn graphql_request(&self, body: &serde_json::Value) -> Result<Request, ApiError> {
        let mut request = Request::new(Method::POST, self.graphql_url.clone());
        self.apply_headers(
            request.headers_mut(),
            HeaderValue::from_static("application/json"),
        )?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(serde_json::to_vec(body)?.into());
        Ok(request)
    }

    fn apply_headers(&self, headers: &mut HeaderMap, accept: HeaderValue) -> Result<(), ApiError> {
        headers.insert(AUTHORIZATION, auth_header(&self.cfg.token)?);
        headers.insert(ACCEPT, accept);
        let version = HeaderValue::from_str(&self.cfg.api_version)
            .map_err(|_| ApiError::InvalidRequest("invalid GITHUB_API_VERSION".into()))?;
        headers.insert("X-GitHub-Api-Version", version);
        Ok(())
    }
}
