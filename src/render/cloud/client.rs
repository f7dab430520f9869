//! HTTP client for the cloud document service.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use valuable::Valuable;

use super::{BatchAck, DocumentService, EditOp};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(url::ParseError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("service rejected request. status: {code}, errors: {errors:?}, messages: {messages:?}")]
    Rejected {
        code: reqwest::StatusCode,
        errors: Vec<ResponseInfo>,
        messages: Vec<ResponseInfo>,
    },
    #[error("missing result. status: {code}, messages: {messages:?}")]
    MissingResult {
        code: reqwest::StatusCode,
        messages: Vec<ResponseInfo>,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Valuable)]
pub struct ResponseInfo {
    pub code: u16,
    pub message: String,
}

#[derive(Deserialize)]
struct Envelope<R> {
    #[serde(default)]
    errors: Vec<ResponseInfo>,
    #[serde(default)]
    messages: Vec<ResponseInfo>,
    #[serde(default)]
    success: bool,
    result: Option<R>,
}

#[derive(Deserialize, Valuable)]
struct CreateResult {
    document_id: String,
}

#[derive(Deserialize, Valuable, Default)]
struct BatchResult {
    applied: usize,
    duration_ms: Option<f64>,
    revision: Option<u64>,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    operations: &'a [EditOp],
}

pub struct Client {
    endpoint: Url,
    token: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl Client {
    pub fn new(endpoint: Url, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            token: token.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn post<Req, R>(&self, path: &str, body: &Req) -> Result<R, Error>
    where
        Req: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = self.endpoint.join(path).map_err(Error::Endpoint)?;
        let request = async {
            let response = self
                .client
                .post(url)
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await
                .map_err(Error::Transport)?;
            let code = response.status();
            let envelope = response
                .json::<Envelope<R>>()
                .await
                .map_err(Error::Transport)?;
            if !envelope.errors.is_empty() || !envelope.success {
                return Err(Error::Rejected {
                    code,
                    errors: envelope.errors,
                    messages: envelope.messages,
                });
            }
            envelope.result.ok_or(Error::MissingResult {
                code,
                messages: envelope.messages,
            })
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}

impl DocumentService for Client {
    type Error = Error;

    async fn create_document(&self, title: &str) -> Result<String, Error> {
        let result: CreateResult = self.post("documents", &CreateRequest { title }).await?;
        debug!(result = result.as_value(), "created remote document");
        Ok(result.document_id)
    }

    async fn apply_batch(&self, document_id: &str, ops: &[EditOp]) -> Result<BatchAck, Error> {
        let result: BatchResult = self
            .post(
                &format!("documents/{document_id}/batch"),
                &BatchRequest { operations: ops },
            )
            .await?;
        debug!(document_id, result = result.as_value(), "batch applied");
        Ok(BatchAck {
            applied: result.applied,
        })
    }
}
