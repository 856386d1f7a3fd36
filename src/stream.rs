//! Frame sources.
//!
//! A [`FrameSource`] yields batches of complete frames. Two implementations
//! share the same parser underneath:
//!
//! - [`IncrementalSource`] reads the body chunk by chunk and yields the
//!   frames completed by each chunk.
//! - [`BufferedSource`] is the fallback for transports that cannot read a
//!   body incrementally: the whole text is fetched first and parsed as if it
//!   had arrived as one chunk.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::client::ClientError;
use crate::sse::{Frame, FrameParser, Utf8Decoder};

/// Boxed transport byte stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Something that yields frames until its transport completes.
#[async_trait]
pub trait FrameSource: Send {
    /// Await the next read and return the frames it completed.
    ///
    /// Returns `None` once the transport has completed. A batch may be empty
    /// when a read did not finish any frame.
    async fn next_batch(&mut self) -> Option<Result<Vec<Frame>, ClientError>>;
}

/// Frame source over an incrementally read byte stream.
pub struct IncrementalSource {
    bytes: ByteStream,
    decoder: Utf8Decoder,
    parser: FrameParser,
    exhausted: bool,
}

impl IncrementalSource {
    /// Wrap any byte stream.
    ///
    /// # Example
    /// ```ignore
    /// let source = IncrementalSource::new(futures::stream::iter(chunks));
    /// ```
    pub fn new<S, E>(bytes: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<ClientError>,
    {
        Self {
            bytes: Box::pin(bytes.map(|item| item.map_err(Into::into))),
            decoder: Utf8Decoder::new(),
            parser: FrameParser::new(),
            exhausted: false,
        }
    }

    /// Read the body of an accepted HTTP response incrementally.
    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream())
    }
}

#[async_trait]
impl FrameSource for IncrementalSource {
    async fn next_batch(&mut self) -> Option<Result<Vec<Frame>, ClientError>> {
        if self.exhausted {
            return None;
        }

        match self.bytes.next().await {
            Some(Ok(chunk)) => {
                let text = self.decoder.decode(&chunk);
                Some(Ok(self.parser.feed(&text)))
            }
            Some(Err(err)) => {
                self.exhausted = true;
                Some(Err(err))
            }
            None => {
                // Transport complete: flush carried bytes and any unterminated frame.
                self.exhausted = true;
                let tail = std::mem::take(&mut self.decoder).finish();
                let mut frames = self.parser.feed(&tail);
                frames.extend(std::mem::take(&mut self.parser).finish());
                if frames.is_empty() {
                    None
                } else {
                    Some(Ok(frames))
                }
            }
        }
    }
}

/// Frame source over a body that was read in full up front.
pub struct BufferedSource {
    text: Option<String>,
}

impl BufferedSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// Fetch the whole body of an accepted HTTP response.
    pub async fn from_response(response: reqwest::Response) -> Result<Self, ClientError> {
        Ok(Self::new(response.text().await?))
    }
}

#[async_trait]
impl FrameSource for BufferedSource {
    async fn next_batch(&mut self) -> Option<Result<Vec<Frame>, ClientError>> {
        let text = self.text.take()?;
        let mut parser = FrameParser::new();
        let mut frames = parser.feed(&text);
        frames.extend(parser.finish());
        Some(Ok(frames))
    }
}

/// Extension trait for `reqwest::Response` to turn a body into frames.
///
/// # Example
/// ```ignore
/// use ragstream::stream::SSEResponseExt;
///
/// let response = client.post(url).send().await?;
/// let mut source = response.into_frame_source(true).await?;
/// while let Some(batch) = source.next_batch().await {
///     for frame in batch? {
///         println!("frame: {}", frame.as_str());
///     }
/// }
/// ```
#[async_trait]
pub trait SSEResponseExt {
    /// Select the incremental reader or the full-body fallback.
    async fn into_frame_source(
        self,
        incremental: bool,
    ) -> Result<Box<dyn FrameSource>, ClientError>;
}

#[async_trait]
impl SSEResponseExt for reqwest::Response {
    async fn into_frame_source(
        self,
        incremental: bool,
    ) -> Result<Box<dyn FrameSource>, ClientError> {
        if incremental {
            Ok(Box::new(IncrementalSource::from_response(self)))
        } else {
            Ok(Box::new(BufferedSource::from_response(self).await?))
        }
    }
}
