//! HTTP transport for the backend API.
//!
//! Serializes wire shapes into JSON request bodies and posts them to the
//! versioned intake endpoints, authenticating with an api key header. There
//! is deliberately no retry machinery here: delivery is best-effort and the
//! engine records failures rather than resubmitting them.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::{ApiClient, Error, Event, Series, ServiceCheck};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.datadoghq.com";

const API_KEY_HEADER: &str = "DD-API-KEY";
const SERIES_PATH: &str = "/api/v1/series";
const CHECK_RUN_PATH: &str = "/api/v1/check_run";
const EVENTS_PATH: &str = "/api/v1/events";

/// HTTP implementation of [`ApiClient`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpClient {
    /// Create a new [`HttpClient`] against [`DEFAULT_ENDPOINT`].
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT)
    }

    /// Create a new [`HttpClient`] against the given endpoint, given without
    /// a trailing slash.
    #[must_use]
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    async fn post<T>(&self, path: &str, body: &T) -> Result<(), Error>
    where
        T: Serialize + Sync + ?Sized,
    {
        let url = format!("{endpoint}{path}", endpoint = self.endpoint);
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!(%url, status = status.as_u16(), "backend responded");
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Api {
                status: status.as_u16(),
            })
        }
    }
}

/// Request body of the series intake: the backend expects the batch wrapped
/// in a `series` field.
#[derive(Debug, Serialize)]
struct SeriesPayload<'a> {
    series: &'a [Series],
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn send_series(&self, series: &[Series]) -> Result<(), Error> {
        self.post(SERIES_PATH, &SeriesPayload { series }).await
    }

    async fn send_service_check(&self, check: &ServiceCheck) -> Result<(), Error> {
        self.post(CHECK_RUN_PATH, check).await
    }

    async fn send_event(&self, event: &Event) -> Result<(), Error> {
        self.post(EVENTS_PATH, event).await
    }
}
