//! HTTP client utilities for opening streaming requests.
//!
//! This module provides reusable HTTP client construction, request building
//! and error-body extraction shared by both streaming endpoints.

use itertools::Itertools;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::client::ClientError;
use crate::options::{HttpTransport, TransportOptions};

/// Accept type announcing that the caller reads an event stream.
pub const EVENT_STREAM: &str = "text/event-stream";

/// Build a configured HTTP client from transport options.
///
/// The timeout bounds connecting and each idle read, not the whole body.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&transport_options)?;
/// ```
pub fn build_http_client(
    transport_options: &TransportOptions<HttpTransport>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.connect_timeout(timeout).read_timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.provider.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder.build()
}

/// Add extra headers to a request if specified in transport options.
///
/// # Example
/// ```ignore
/// let mut req = client.post(url);
/// req = add_extra_headers(req, &transport_options.provider.extra_headers);
/// ```
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Send a streaming POST and return the accepted response.
///
/// A non-success status is turned into [`ClientError::Status`] after a
/// best-effort read of the error body.
pub async fn open_stream<B: Serialize + ?Sized>(
    http_client: &Client,
    url: &str,
    body: &B,
    transport: &HttpTransport,
) -> Result<reqwest::Response, ClientError> {
    let mut req = http_client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, EVENT_STREAM);

    if let Some(api_key) = &transport.api_key {
        req = req.header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()));
    }
    req = add_extra_headers(req, &transport.extra_headers);

    debug!(url, "opening event stream");
    let response = req.json(body).send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            detail: error_detail(status, &body),
        });
    }

    Ok(response)
}

/// Extract a human-readable message from an error response body.
///
/// Prefers a JSON `detail` field, then the whole JSON document, then the
/// status' canonical reason.
pub fn error_detail(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => match json.get("detail") {
            Some(Value::String(detail)) if !detail.is_empty() => detail.clone(),
            Some(Value::Array(items))
                if !items.is_empty() && items.iter().all(|i| i.get("msg").is_some()) =>
            {
                // Validation failures: one entry per rejected field.
                items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .join("; ")
            }
            Some(detail) if !detail.is_null() => detail.to_string(),
            _ => json.to_string(),
        },
        Err(_) => status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::Frame;
    use crate::stream::{FrameSource, SSEResponseExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Lowercased text of one request, body included.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_lowercase();
            if n == 0 {
                return text;
            }
            if let Some(head_end) = text.find("\r\n\r\n") {
                let body_len = text[..head_end]
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|len| len.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + body_len {
                    return text;
                }
            }
        }
    }

    /// Answer the next `connections` requests with `response`.
    async fn serve(response: String, connections: usize) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut requests = Vec::new();
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            requests
        });
        (format!("http://{address}"), server)
    }

    #[test]
    fn test_build_http_client() {
        let transport_options =
            TransportOptions::new(HttpTransport::default()).with_timeout(Duration::from_secs(30));

        let client = build_http_client(&transport_options);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        let transport_options = TransportOptions::new(
            HttpTransport::default().with_proxy("http://proxy.example.com:8080".to_string()),
        );

        let client = build_http_client(&transport_options);
        assert!(client.is_ok());
    }

    #[test]
    fn test_error_detail_prefers_detail_field() {
        assert_eq!(
            error_detail(StatusCode::NOT_FOUND, r#"{"detail":"RAG 'x' not found"}"#),
            "RAG 'x' not found"
        );
        assert_eq!(
            error_detail(StatusCode::UNPROCESSABLE_ENTITY, r#"{"detail":[{"loc":"prompt"}]}"#),
            r#"[{"loc":"prompt"}]"#
        );
        assert_eq!(
            error_detail(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"detail":[{"loc":["body","prompt"],"msg":"field required"},{"msg":"bad model"}]}"#
            ),
            "field required; bad model"
        );
        assert_eq!(
            error_detail(StatusCode::BAD_REQUEST, r#"{"error":"bad"}"#),
            r#"{"error":"bad"}"#
        );
    }

    #[test]
    fn test_error_detail_falls_back_to_status_text() {
        assert_eq!(
            error_detail(StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>"),
            "Internal Server Error"
        );
        let odd = StatusCode::from_u16(599).unwrap();
        assert_eq!(error_detail(odd, ""), "Request failed with status 599");
    }

    #[tokio::test]
    async fn test_open_stream_requests_event_stream() {
        let (base, server) = serve(http_response("200 OK", EVENT_STREAM, "data: {}\n\n"), 1).await;
        let transport =
            HttpTransport::new("secret-key").with_header("X-Trace".to_string(), "abc".to_string());

        let response = open_stream(
            &Client::new(),
            &format!("{base}/query-stream"),
            &json!({"prompt": "hi"}),
            &transport,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = server.await.unwrap().remove(0);
        assert!(request.starts_with("post /query-stream "));
        assert!(request.contains("accept: text/event-stream"));
        assert!(request.contains("content-type: application/json"));
        assert!(request.contains("authorization: bearer secret-key"));
        assert!(request.contains("x-trace: abc"));
        assert!(request.ends_with(r#"{"prompt":"hi"}"#));
    }

    #[tokio::test]
    async fn test_open_stream_rejects_error_status() {
        let body = r#"{"detail":"RAG not found"}"#;
        let (base, _server) = serve(http_response("404 Not Found", "application/json", body), 1).await;

        let err = open_stream(
            &Client::new(),
            &format!("{base}/query-stream"),
            &json!({"prompt": "hi"}),
            &HttpTransport::default(),
        )
        .await
        .unwrap_err();
        match err {
            ClientError::Status { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "RAG not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_incremental_and_buffered_sources_agree() {
        let body = "data: a\n\ndata: b\r\n\r\ndata: c";
        let (base, _server) = serve(http_response("200 OK", EVENT_STREAM, body), 2).await;
        let client = Client::new();
        let url = format!("{base}/agent/stream");

        let mut results = Vec::new();
        for incremental in [true, false] {
            let response = open_stream(&client, &url, &json!({}), &HttpTransport::default())
                .await
                .unwrap();
            let mut source = response.into_frame_source(incremental).await.unwrap();
            let mut batches = 0;
            let mut frames = Vec::new();
            while let Some(batch) = source.next_batch().await {
                batches += 1;
                frames.extend(batch.unwrap());
            }
            results.push((batches, frames));
        }

        let expected = vec![Frame::new("data: a"), Frame::new("data: b"), Frame::new("data: c")];
        assert_eq!(results[0].1, expected);
        assert_eq!(results[1], (1, expected));
    }
}
