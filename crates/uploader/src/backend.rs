//! Backend API connection trait and its HTTP implementation.
//!
//! `UploadBackend` keeps the orchestrator independent of transport so the
//! protocol sequencing can be tested with mocks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use partload_protocol::{
    CompleteRequest, PartUrlRequest, PartUrlResponse, StartRequest, StartResponse, backend_error,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::UploadError;

/// Path of the presigned part URL endpoint, relative to the API origin.
pub const PART_URL_PATH: &str = "/api/data/upload/multipart/getPartUrl";

/// Path of the completion endpoint, relative to the API origin.
pub const COMPLETE_PATH: &str = "/api/data/upload/complete";

/// Boxed future returned by backend and transfer calls.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// The three backend calls of the multipart protocol.
///
/// Implementations report a backend `error` field as
/// [`UploadError::Backend`].
pub trait UploadBackend: Send + Sync {
    /// Opens the upload session (START).
    fn start(&self, request: StartRequest) -> BackendFuture<'_, StartResponse>;

    /// Returns a presigned PUT URL for one part.
    fn part_url(&self, request: PartUrlRequest) -> BackendFuture<'_, String>;

    /// Finalizes the upload and returns the backend's response verbatim.
    fn complete(&self, request: CompleteRequest) -> BackendFuture<'_, Value>;
}

/// [`UploadBackend`] over authenticated JSON POSTs.
pub struct HttpBackend {
    http: reqwest::Client,
    start_url: String,
    part_url: String,
    complete_url: String,
}

impl HttpBackend {
    /// Creates a client for `api_endpoint`. The part URL and completion
    /// endpoints live on the same origin.
    pub fn new(
        api_endpoint: &str,
        auth_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, UploadError> {
        let endpoint = reqwest::Url::parse(api_endpoint)
            .map_err(|e| UploadError::Validation(format!("invalid api endpoint: {e}")))?;
        let origin = endpoint.origin();
        if !origin.is_tuple() {
            return Err(UploadError::Validation(format!(
                "api endpoint has no origin: {api_endpoint}"
            )));
        }
        let origin = origin.ascii_serialization();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {auth_token}"))
                .map_err(|_| UploadError::Validation("invalid auth token".into()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            start_url: endpoint.to_string(),
            part_url: format!("{origin}{PART_URL_PATH}"),
            complete_url: format!("{origin}{COMPLETE_PATH}"),
        })
    }

    /// Performs an authenticated POST and returns the JSON body.
    async fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<Value, UploadError> {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(url = %url, status = status.as_u16(), "backend response");

        if status.is_server_error() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed = serde_json::from_str::<Value>(&text);
        if let Some(message) = parsed.as_ref().ok().and_then(backend_error) {
            return Err(UploadError::Backend(message));
        }
        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(parsed?)
    }
}

impl UploadBackend for HttpBackend {
    fn start(&self, request: StartRequest) -> BackendFuture<'_, StartResponse> {
        Box::pin(async move {
            let body = self.post(&self.start_url, &request).await?;
            Ok(serde_json::from_value(body)?)
        })
    }

    fn part_url(&self, request: PartUrlRequest) -> BackendFuture<'_, String> {
        Box::pin(async move {
            let body = self.post(&self.part_url, &request).await?;
            let resp: PartUrlResponse = serde_json::from_value(body)?;
            resp.presigned_url
                .filter(|url| !url.is_empty())
                .ok_or(UploadError::MissingPresignedUrl)
        })
    }

    fn complete(&self, request: CompleteRequest) -> BackendFuture<'_, Value> {
        Box::pin(async move { self.post(&self.complete_url, &request).await })
    }
}
