//! Client seam for the paragraph-enhancement service.
//!
//! The service is a black box: authored list fragments go in, finished prose
//! comes out, or the call fails. Callers treat every failure as "keep the
//! original text"; nothing here is fatal.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("enhancement service is not configured")]
    NotConfigured,
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("service returned no enhanced text")]
    EmptyResult,
}

pub trait Enhancer: Send + Sync {
    /// Whether the service is reachable in principle. The mapper skips the
    /// call entirely when this is false.
    fn is_configured(&self) -> bool;

    fn enhance(
        &self,
        text: &str,
        field: &str,
        context: &str,
    ) -> impl Future<Output = Result<String, EnhanceError>> + Send;
}

/// An unconfigured optional client short-circuits to "not configured", so
/// deployments without an enhancement endpoint need no separate type.
impl<E: Enhancer> Enhancer for Option<E> {
    fn is_configured(&self) -> bool {
        self.as_ref().is_some_and(Enhancer::is_configured)
    }

    async fn enhance(&self, text: &str, field: &str, context: &str) -> Result<String, EnhanceError> {
        match self {
            Some(enhancer) => enhancer.enhance(text, field, context).await,
            None => Err(EnhanceError::NotConfigured),
        }
    }
}

/// Stand-in when no enhancement endpoint is configured.
pub struct Disabled;

impl Enhancer for Disabled {
    fn is_configured(&self) -> bool {
        false
    }

    async fn enhance(
        &self,
        _text: &str,
        _field: &str,
        _context: &str,
    ) -> Result<String, EnhanceError> {
        Err(EnhanceError::NotConfigured)
    }
}

#[derive(Serialize)]
struct Request<'a> {
    text: &'a str,
    field: &'a str,
    context: &'a str,
}

#[derive(Deserialize)]
struct Response {
    enhanced: Option<String>,
    model: Option<String>,
}

pub struct Client {
    endpoint: Url,
    token: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl Client {
    pub fn new(endpoint: Url, token: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Enhancer for Client {
    fn is_configured(&self) -> bool {
        true
    }

    async fn enhance(
        &self,
        text: &str,
        field: &str,
        context: &str,
    ) -> Result<String, EnhanceError> {
        let request = async {
            let mut builder = self.client.post(self.endpoint.clone()).json(&Request {
                text,
                field,
                context,
            });
            if let Some(token) = &self.token {
                builder = builder.bearer_auth(token);
            }
            let response = builder.send().await.map_err(EnhanceError::Transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(EnhanceError::Status(status));
            }
            response
                .json::<Response>()
                .await
                .map_err(EnhanceError::Transport)
        };
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| EnhanceError::Timeout(self.timeout))??;
        debug!(field, model = response.model.as_deref(), "enhancement succeeded");
        response.enhanced.ok_or(EnhanceError::EmptyResult)
    }
}
