//! Weather-conditions lookup for the dynamic placeholder.
//!
//! External collaborator, consumed best-effort: any transport problem,
//! non-success status or timeout yields `None` and the mapper substitutes
//! the documented default instead.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use url::Url;

pub trait ConditionsProvider: Send + Sync {
    fn conditions(
        &self,
        address: Option<&str>,
        date: Option<&str>,
    ) -> impl Future<Output = Option<String>> + Send;
}

impl<C: ConditionsProvider> ConditionsProvider for Option<C> {
    async fn conditions(&self, address: Option<&str>, date: Option<&str>) -> Option<String> {
        match self {
            Some(provider) => provider.conditions(address, date).await,
            None => None,
        }
    }
}

/// Stand-in when no weather endpoint is configured.
pub struct Unavailable;

impl ConditionsProvider for Unavailable {
    async fn conditions(&self, _address: Option<&str>, _date: Option<&str>) -> Option<String> {
        None
    }
}

#[derive(Deserialize)]
struct Response {
    summary: Option<String>,
}

pub struct Client {
    endpoint: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl Client {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl ConditionsProvider for Client {
    async fn conditions(&self, address: Option<&str>, date: Option<&str>) -> Option<String> {
        let request = async {
            self.client
                .get(self.endpoint.clone())
                .query(&[("address", address.unwrap_or_default()), ("date", date.unwrap_or_default())])
                .send()
                .await?
                .error_for_status()?
                .json::<Response>()
                .await
        };
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response.summary.filter(|s| !s.trim().is_empty()),
            Ok(Err(error)) => {
                warn!(%error, "weather lookup failed, using default");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "weather lookup timed out, using default");
                None
            }
        }
    }
}
