//! Startup check that the token can see what the client needs.
//!
//! Classic personal access tokens report their scopes in `X-OAuth-Scopes`;
//! fine-grained tokens don't, so for those we can only warn.

use log::warn;
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::http::RateLimitedClient;

pub const SCOPES_HEADER: &str = "x-oauth-scopes";

const REPO_SCOPE: &str = "repo";
/// Any one of these grants project access.
const PROJECT_SCOPES: [&str; 3] = ["project", "read:org", "admin:org"];

pub const MISSING_REPO: &str = "repo";
pub const MISSING_PROJECT: &str = "project or read:org";

const FINE_GRAINED_WARNING: &str = "fine-grained token detected; scope validation skipped. \
If you encounter permission errors, verify the token has repository, Actions and project read permissions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Scopes are listed in the `X-OAuth-Scopes` response header.
    Classic,
    /// Permissions can't be introspected through response headers.
    FineGrained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScopes {
    /// Only populated for classic tokens.
    pub raw_scopes: Vec<String>,
    pub has_repo_access: bool,
    pub has_project_access: bool,
    pub kind: TokenKind,
}

impl CredentialScopes {
    /// Classify from the scopes header of the `/user` response.
    pub fn from_header(header: Option<&str>) -> Self {
        match header.map(str::trim).filter(|h| !h.is_empty()) {
            Some(h) => {
                let raw_scopes = parse_scopes(h);
                let has = |target: &str| raw_scopes.iter().any(|s| s == target);
                let has_repo_access = has(REPO_SCOPE);
                let has_project_access = PROJECT_SCOPES.iter().any(|s| has(*s));
                Self {
                    raw_scopes,
                    has_repo_access,
                    has_project_access,
                    kind: TokenKind::Classic,
                }
            }
            None => Self {
                raw_scopes: Vec::new(),
                has_repo_access: false,
                has_project_access: false,
                kind: TokenKind::FineGrained,
            },
        }
    }

    pub fn is_classic(&self) -> bool {
        self.kind == TokenKind::Classic
    }

    pub fn is_fine_grained(&self) -> bool {
        self.kind == TokenKind::FineGrained
    }

    /// Required capabilities the token lacks. Always empty for fine-grained tokens.
    pub fn missing_scopes(&self) -> Vec<&'static str> {
        if self.is_fine_grained() {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if !self.has_repo_access {
            missing.push(MISSING_REPO);
        }
        if !self.has_project_access {
            missing.push(MISSING_PROJECT);
        }
        missing
    }

    pub fn warning(&self) -> Option<&'static str> {
        self.is_fine_grained().then_some(FINE_GRAINED_WARNING)
    }

    /// Fail on a classic token that is missing scopes; warn once for fine-grained.
    pub fn validate(&self) -> Result<(), ApiError> {
        let missing = self.missing_scopes();
        if !missing.is_empty() {
            return Err(ApiError::MissingScopes { missing });
        }
        if let Some(w) = self.warning() {
            warn!("{}", w);
        }
        Ok(())
    }
}

fn parse_scopes(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ask `/user` who the token belongs to and classify its scopes.
///
/// Any non-success status means the token itself is unusable and is reported as
/// [`ApiError::InvalidToken`], separate from a valid token with too few scopes.
pub async fn introspect(
    client: &RateLimitedClient,
    cancel: &CancellationToken,
) -> Result<CredentialScopes, ApiError> {
    let request = client.rest_request(Method::GET, "/user", &[])?;
    let res = client.execute(request, cancel).await?;
    let status = res.status();
    if status != StatusCode::OK {
        return Err(ApiError::InvalidToken { status });
    }
    let header = res
        .headers()
        .get(SCOPES_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(CredentialScopes::from_header(header))
}

/// Introspect and validate in one step.
pub async fn validate_credential(
    client: &RateLimitedClient,
    cancel: &CancellationToken,
) -> Result<CredentialScopes, ApiError> {
    let scopes = introspect(client, cancel).await?;
    scopes.validate()?;
    Ok(scopes)
}
