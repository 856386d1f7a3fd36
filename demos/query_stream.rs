//! Stream an answer from a RAG.
//!
//! Run with:
//! ```bash
//! export RAGSTREAM_BASE_URL="http://localhost:5001"
//! cargo run --example query_stream -- my-rag "What does the handbook say about onboarding?"
//! ```

use ragstream::dispatch::Callbacks;
use ragstream::model::QueryRequest;
use ragstream::options::{HttpTransport, TransportOptions};
use ragstream::{QueryConsumer, RagClient};
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragstream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut args = std::env::args().skip(1);
    let rag_name = args.next().unwrap_or_else(|| "docs".to_string());
    let question = args
        .next()
        .unwrap_or_else(|| "What is this collection about?".to_string());

    let transport_options = TransportOptions::new(HttpTransport::from_env())
        .with_timeout(Duration::from_secs(60));
    let client = RagClient::new(transport_options)?;

    // Raw callbacks: print chunks as they arrive.
    let handle = client.query_stream(
        QueryRequest::new(&rag_name, &question),
        Callbacks::new()
            .on_progress(|text| eprintln!("[progress] {text}"))
            .on_answer_chunk(|chunk| {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            })
            .on_error(|err| eprintln!("\n[error] {err}"))
            .on_done(|| println!()),
    );
    handle.wait().await;

    // The same question through the conversation consumer.
    let mut consumer = QueryConsumer::new();
    consumer.submit(&client, QueryRequest::new(rag_name, question));
    consumer.wait().await;

    for message in consumer.snapshot().messages {
        let marker = if message.is_error { "!" } else { ">" };
        println!("{marker} {:?}: {}", message.role, message.content);
    }

    Ok(())
}
