//! Run an agent and print its step timeline.
//!
//! Run with:
//! ```bash
//! export RAGSTREAM_BASE_URL="http://localhost:5001"
//! cargo run --example agent_stream -- "Compare the two onboarding guides"
//! ```

use ragstream::model::AgentRequest;
use ragstream::options::{AgentOptions, HttpTransport, TransportOptions};
use ragstream::{AgentConsumer, RagClient};
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

    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Summarize the latest release notes".to_string());

    let client = RagClient::new(
        TransportOptions::new(HttpTransport::from_env()).with_timeout(Duration::from_secs(120)),
    )?;

    let mut consumer = AgentConsumer::new(AgentOptions::default());
    consumer.submit(&client, AgentRequest::new(query).with_web_search(false));

    // Poll the state while the run is in flight.
    let mut printed = 0;
    while consumer.is_executing() {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let state = consumer.snapshot();
        for step in &state.timeline.steps()[printed..] {
            println!("{} [{}]", step.message, step.step_type);
        }
        printed = state.timeline.len();
    }
    consumer.wait().await;

    let state = consumer.snapshot();
    for step in &state.timeline.steps()[printed.min(state.timeline.len())..] {
        println!("{} [{}]", step.message, step.step_type);
    }
    for task in &state.tasks {
        println!("task {} {:?}: {}", task.task_id, task.status, task.description);
    }
    match state.error {
        Some(err) => eprintln!("error: {err}"),
        None => println!("\n{}", state.answer),
    }

    Ok(())
}
