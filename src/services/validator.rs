//! Live URL validation for quality fallback
//!
//! Checks that a candidate stream URL answers before a job is built for it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("insecure scheme '{0}' is not allowed")]
    InsecureScheme(String),

    #[error("domain '{0}' is not in the allow list")]
    DomainNotAllowed(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

/// URL validation seam
#[async_trait]
pub trait UrlValidator: Send + Sync {
    /// `Ok(false)` for URLs that are definitely gone, `Err` for anything unexpected.
    async fn validate(&self, url: &str) -> Result<bool, ValidationError>;
}

/// Security policy applied before any request is made
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    pub allow_http: bool,
    /// Empty means any host
    pub allowed_domains: Vec<String>,
}

impl UrlPolicy {
    pub fn check(&self, raw: &str) -> Result<Url, ValidationError> {
        let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            other => return Err(ValidationError::InsecureScheme(other.to_string())),
        }

        if !self.allowed_domains.is_empty() {
            let host = url
                .host_str()
                .ok_or_else(|| ValidationError::InvalidUrl(raw.to_string()))?
                .to_lowercase();
            let allowed = self.allowed_domains.iter().any(|domain| {
                let domain = domain.trim().trim_start_matches('.').to_lowercase();
                host == domain || host.ends_with(&format!(".{}", domain))
            });
            if !allowed {
                return Err(ValidationError::DomainNotAllowed(host));
            }
        }

        Ok(url)
    }
}

/// HEAD-based validator with a ranged GET fallback
pub struct HttpUrlValidator {
    client: Client,
    policy: UrlPolicy,
}

impl HttpUrlValidator {
    pub fn new(policy: UrlPolicy) -> Result<Self, ValidationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, policy })
    }
}

#[async_trait]
impl UrlValidator for HttpUrlValidator {
    async fn validate(&self, url: &str) -> Result<bool, ValidationError> {
        let url = self.policy.check(url)?;

        let mut status = self.client.head(url.clone()).send().await?.status();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            status = self
                .client
                .get(url.clone())
                .header(header::RANGE, "bytes=0-0")
                .send()
                .await?
                .status();
        }

        debug!(url = %url, status = status.as_u16(), "Validated stream URL");
        classify_status(status)
    }
}

fn classify_status(status: StatusCode) -> Result<bool, ValidationError> {
    if status.is_success() || status.is_redirection() {
        Ok(true)
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Ok(false)
    } else {
        Err(ValidationError::UnexpectedStatus(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_https_only_by_default() {
        let policy = UrlPolicy::default();
        assert!(policy.check("https://cdn.example.org/a.mp4").is_ok());
        assert_matches!(
            policy.check("http://cdn.example.org/a.mp4"),
            Err(ValidationError::InsecureScheme(_))
        );
        assert_matches!(policy.check("ftp://x/a"), Err(ValidationError::InsecureScheme(_)));
        assert_matches!(policy.check("not a url"), Err(ValidationError::InvalidUrl(_)));
    }

    #[test]
    fn test_http_allowed_when_configured() {
        let policy = UrlPolicy {
            allow_http: true,
            ..Default::default()
        };
        assert!(policy.check("http://cdn.example.org/a.mp4").is_ok());
    }

    #[test]
    fn test_domain_allow_list() {
        let policy = UrlPolicy {
            allow_http: false,
            allowed_domains: vec!["ard.de".to_string(), ".zdf.de".to_string()],
        };
        assert!(policy.check("https://ard.de/a.mp4").is_ok());
        assert!(policy.check("https://media.ard.de/a.mp4").is_ok());
        assert!(policy.check("https://nrodl.zdf.de/a.mp4").is_ok());
        assert_matches!(
            policy.check("https://evilard.de/a.mp4"),
            Err(ValidationError::DomainNotAllowed(_))
        );
    }

    #[test]
    fn test_status_classification() {
        assert_matches!(classify_status(StatusCode::OK), Ok(true));
        assert_matches!(classify_status(StatusCode::PARTIAL_CONTENT), Ok(true));
        assert_matches!(classify_status(StatusCode::FOUND), Ok(true));
        assert_matches!(classify_status(StatusCode::NOT_FOUND), Ok(false));
        assert_matches!(classify_status(StatusCode::GONE), Ok(false));
        assert_matches!(
            classify_status(StatusCode::FORBIDDEN),
            Err(ValidationError::UnexpectedStatus(403))
        );
    }
}
