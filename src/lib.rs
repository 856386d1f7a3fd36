//! # ragstream - Streaming client for RAG query and agent endpoints
//!
//! Consumes the Server-Sent Events streams of a RAG backend and turns them
//! into callbacks and display-ready state.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental SSE framing tolerant of `\r\n\r\n` and `\n\n` delimiters
//! - Typed events: progress, answer chunks, task updates, errors
//! - Cancellable sessions, one active session per consumer
//! - Heuristic step classification and a de-duplicated step timeline
//!
//! ## Architecture
//!
//! Bytes flow one way through the crate:
//!
//! 1. **[`sse`]** splits the byte stream into frames
//! 2. **[`decode`]** turns each `data:` line into a [`StreamEvent`]
//! 3. **[`dispatch`]** routes events to a [`StreamHandler`]
//! 4. **[`session`]** owns the request, cancellation and the terminal `on_done`
//!
//! On top of that, [`query::QueryConsumer`] keeps a conversation and
//! [`agent::AgentConsumer`] keeps a step timeline built by [`classifier`]
//! and [`timeline`].
//!
//! ## Example
//! ```no_run
//! use ragstream::dispatch::Callbacks;
//! use ragstream::model::AgentRequest;
//! use ragstream::options::{HttpTransport, TransportOptions};
//! use ragstream::RagClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RagClient::new(TransportOptions::new(HttpTransport::from_env()))?;
//!
//!     let handle = client.agent_stream(
//!         AgentRequest::new("Summarize the onboarding handbook"),
//!         Callbacks::new()
//!             .on_progress(|text| println!("… {text}"))
//!             .on_answer_chunk(|chunk| print!("{chunk}"))
//!             .on_error(|err| eprintln!("error: {err}"))
//!             .on_done(|| println!("\ndone")),
//!     );
//!
//!     handle.wait().await;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod answer;
pub mod classifier;
pub mod client;
pub mod decode;
pub mod dispatch;
pub mod http;
pub mod model;
pub mod options;
pub mod query;
pub mod session;
pub mod sse;
pub mod stream;
pub mod timeline;

// Re-exports for convenience
pub use agent::{AgentConsumer, AgentState};
pub use client::{ClientError, RagClient, StreamingRequest};
pub use dispatch::{Callbacks, StreamHandler};
pub use model::{AgentRequest, QueryRequest, StreamEvent, TaskUpdate};
pub use query::{QueryConsumer, QueryState};
pub use session::{Canceller, SessionHandle, SessionSlot, StreamSession};
