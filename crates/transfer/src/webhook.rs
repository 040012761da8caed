//! HTTP webhook sink.
//!
//! Posts each chunk as a `multipart/form-data` message with a single
//! `file` part and reads the created attachment back from the response.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chunkdrop_protocol::{AttachmentDescriptor, Endpoint};
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::TransferError;
use crate::progress::ProgressReporter;
use crate::types::Chunk;
use crate::unit::{ChunkSink, SinkFuture};

/// Size of the slices the request body is streamed in.
const STREAM_SLICE: usize = 64 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body of a webhook message creation.
#[derive(Debug, Deserialize)]
struct WebhookMessage {
    #[serde(default)]
    attachments: Vec<AttachmentDescriptor>,
}

/// [`ChunkSink`] that uploads to webhook URLs over HTTP.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: reqwest::Client,
    append_wait: bool,
}

impl WebhookSink {
    /// Creates a sink with its own HTTP client.
    pub fn new() -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chunkdrop/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransferError::Network(e.to_string()))?;
        Ok(Self::with_client(http))
    }

    /// Creates a sink on top of an existing client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            append_wait: true,
        }
    }

    /// Controls whether `wait=true` is appended to endpoint URLs.
    ///
    /// Without it, webhook endpoints answer `204 No Content` and no
    /// attachment descriptor can be read back.
    pub fn append_wait(mut self, enabled: bool) -> Self {
        self.append_wait = enabled;
        self
    }

    fn target_url(&self, endpoint: &Endpoint) -> Result<Url, TransferError> {
        let mut url = Url::parse(&endpoint.url).map_err(|e| {
            TransferError::InvalidEndpoint(format!("endpoint {}: {e}", endpoint.id))
        })?;
        if self.append_wait && !url.query_pairs().any(|(k, _)| k == "wait") {
            url.query_pairs_mut().append_pair("wait", "true");
        }
        Ok(url)
    }

    async fn post_chunk(
        &self,
        endpoint: &Endpoint,
        chunk: &Chunk,
        progress: Arc<ProgressReporter>,
    ) -> Result<AttachmentDescriptor, TransferError> {
        let url = self.target_url(endpoint)?;
        let total = chunk.data.len() as u64;

        let body = reqwest::Body::wrap_stream(body_stream(chunk.data.clone(), progress));
        let part = Part::stream_with_length(body, total)
            .file_name(uuid::Uuid::new_v4().to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| TransferError::Request(e.to_string()))?;
        let form = Form::new().part("file", part);

        let resp = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransferError::EndpointRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;
        parse_attachment(&body)
    }
}

impl ChunkSink for WebhookSink {
    fn send_chunk<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        chunk: &'a Chunk,
        progress: Arc<ProgressReporter>,
    ) -> SinkFuture<'a> {
        Box::pin(self.post_chunk(endpoint, chunk, progress))
    }
}

/// Streams `data` in fixed slices, reporting each slice as it is handed out.
fn body_stream(
    data: Bytes,
    progress: Arc<ProgressReporter>,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let len = data.len();
    futures_util::stream::iter((0..len).step_by(STREAM_SLICE).map(move |start| {
        let end = (start + STREAM_SLICE).min(len);
        progress.report(end as u64);
        Ok(data.slice(start..end))
    }))
}

/// Extracts the first attachment of a webhook message response.
fn parse_attachment(body: &[u8]) -> Result<AttachmentDescriptor, TransferError> {
    let message: WebhookMessage = serde_json::from_slice(body)
        .map_err(|e| TransferError::ResponseParse(e.to_string()))?;
    message
        .attachments
        .into_iter()
        .next()
        .ok_or_else(|| TransferError::ResponseParse("response has no attachments".into()))
}
