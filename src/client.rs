//! Core client and error types.

use futures::Future;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::StreamHandler;
use crate::http::{build_http_client, open_stream};
use crate::model::{AgentRequest, QueryRequest};
use crate::options::{HttpTransport, StreamOptions, TransportOptions, DEFAULT_AGENT_DEADLINE};
use crate::session::{SessionHandle, StreamSession};
use crate::stream::{FrameSource, SSEResponseExt};

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Stream timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// The message forwarded to `on_error`.
    ///
    /// Status errors carry the server's own detail, without the status prefix.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::StreamCancelled)
    }
}

/// A request body that is served by a streaming endpoint.
pub trait StreamingRequest: Serialize + Send + Sync + 'static {
    /// Endpoint path, relative to the base URL.
    const PATH: &'static str;

    /// Session options used when the caller does not supply any.
    fn default_options() -> StreamOptions {
        StreamOptions::default()
    }
}

impl StreamingRequest for QueryRequest {
    const PATH: &'static str = "/query-stream";
}

impl StreamingRequest for AgentRequest {
    const PATH: &'static str = "/agent/stream";

    fn default_options() -> StreamOptions {
        StreamOptions::default().with_deadline(DEFAULT_AGENT_DEADLINE)
    }
}

/// Client for the streaming query and agent endpoints.
///
/// # Example
/// ```no_run
/// use ragstream::client::RagClient;
/// use ragstream::dispatch::Callbacks;
/// use ragstream::model::QueryRequest;
/// use ragstream::options::TransportOptions;
///
/// # async fn run() -> Result<(), ragstream::ClientError> {
/// let client = RagClient::new(TransportOptions::default())?;
/// let handle = client.query_stream(
///     QueryRequest::new("docs", "What is in the handbook?"),
///     Callbacks::new()
///         .on_answer_chunk(|chunk| print!("{chunk}"))
///         .on_done(|| println!()),
/// );
/// handle.wait().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RagClient {
    http: reqwest::Client,
    transport_options: TransportOptions<HttpTransport>,
}

impl RagClient {
    pub fn new(transport_options: TransportOptions<HttpTransport>) -> Result<Self, ClientError> {
        let http = build_http_client(&transport_options)?;
        Ok(Self {
            http,
            transport_options,
        })
    }

    pub fn transport_options(&self) -> &TransportOptions<HttpTransport> {
        &self.transport_options
    }

    /// Absolute URL of an endpoint path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.transport_options.provider.base_url(), path)
    }

    /// Future that sends `request` and resolves to a frame source once the
    /// response headers are accepted.
    pub fn connector<R: StreamingRequest>(
        &self,
        request: R,
    ) -> impl Future<Output = Result<Box<dyn FrameSource>, ClientError>> + Send + 'static {
        let http = self.http.clone();
        let transport = self.transport_options.provider.clone();
        let url = self.url_for(R::PATH);

        async move {
            let response = open_stream(&http, &url, &request, &transport).await?;
            response.into_frame_source(transport.incremental).await
        }
    }

    /// Start a streaming session for any endpoint.
    ///
    /// Returns immediately; callbacks run on a spawned task. Must be called
    /// from within a tokio runtime.
    pub fn start_stream<R, H>(&self, request: R, handler: H, options: StreamOptions) -> SessionHandle
    where
        R: StreamingRequest,
        H: StreamHandler + 'static,
    {
        StreamSession::new(handler, options).spawn(self.connector(request))
    }

    /// Stream an answer from `POST /query-stream`.
    pub fn query_stream<H: StreamHandler + 'static>(
        &self,
        request: QueryRequest,
        handler: H,
    ) -> SessionHandle {
        self.start_stream(request, handler, QueryRequest::default_options())
    }

    /// Stream an agent execution from `POST /agent/stream`.
    pub fn agent_stream<H: StreamHandler + 'static>(
        &self,
        request: AgentRequest,
        handler: H,
    ) -> SessionHandle {
        self.start_stream(request, handler, AgentRequest::default_options())
    }
}
