//! Question answering over a RAG.
//!
//! [`QueryConsumer`] keeps the conversation a display layer renders: each
//! submitted question adds a user message and an assistant message that
//! fills in as answer chunks arrive.

use futures::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::answer::{strip_hidden_thoughts, AnswerAccumulator};
use crate::client::{ClientError, RagClient, StreamingRequest};
use crate::dispatch::StreamHandler;
use crate::model::{ChatMessage, QueryRequest, Role};
use crate::options::StreamOptions;
use crate::session::{SessionHandle, SessionSlot, StreamSession};
use crate::stream::FrameSource;

/// Observable state of a [`QueryConsumer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub messages: Vec<ChatMessage>,
    /// Progress lines of the running question
    pub progress: Vec<String>,
    pub loading: bool,
    /// Set when the caller cancelled the running question
    pub cancelled: bool,
}

impl QueryState {
    fn message_mut(&mut self, key: u64) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.key == key)
    }
}

type SharedState = Arc<Mutex<QueryState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, QueryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct QueryHandler {
    state: SharedState,
    key: u64,
    answer: AnswerAccumulator,
}

impl StreamHandler for QueryHandler {
    fn on_progress(&mut self, content: String) {
        lock(&self.state).progress.push(content);
    }

    fn on_answer_chunk(&mut self, chunk: String) {
        self.answer.push(&chunk);
        let visible = self.answer.visible();
        if visible.is_empty() {
            return;
        }
        if let Some(message) = lock(&self.state).message_mut(self.key) {
            message.content = visible;
        }
    }

    fn on_error(&mut self, message: String) {
        let mut state = lock(&self.state);
        state.loading = false;
        state.progress.clear();
        if let Some(reply) = state.message_mut(self.key) {
            reply.content = format!("Error: {message}");
            reply.is_error = true;
        }
    }

    fn on_done(&mut self) {
        let mut state = lock(&self.state);
        state.loading = false;
        state.progress.clear();
        let state_cancelled = state.cancelled;
        if let Some(reply) = state.message_mut(self.key) {
            if reply.is_error {
                return;
            }
            if state_cancelled {
                // Keep what streamed so far; a cancel is not a missing answer.
                reply.content = strip_hidden_thoughts(self.answer.raw());
                return;
            }
            let answer = self.answer.finish();
            reply.content = answer.text;
            reply.is_error = answer.is_error;
        }
        debug!(key = self.key, "answer complete");
    }
}

/// Conversation with one RAG, one question streaming at a time.
///
/// Submitting while a question is still streaming abandons the earlier
/// session, so its late callbacks cannot touch the new state.
#[derive(Default)]
pub struct QueryConsumer {
    state: SharedState,
    slot: SessionSlot,
    next_key: u64,
}

impl QueryConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> QueryState {
        lock(&self.state).clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.slot.is_active()
    }

    /// Ask a question through `client`.
    pub fn submit(&mut self, client: &RagClient, request: QueryRequest) -> &SessionHandle {
        let question = request.prompt.clone();
        let connect = client.connector(request);
        self.submit_with(&question, QueryRequest::default_options(), connect)
    }

    /// Ask a question answered by the stream `connect` resolves to.
    pub fn submit_with<C>(&mut self, question: &str, options: StreamOptions, connect: C) -> &SessionHandle
    where
        C: Future<Output = Result<Box<dyn FrameSource>, ClientError>> + Send + 'static,
    {
        self.slot.abandon();

        let key = self.next_key;
        self.next_key += 2;
        {
            let mut state = lock(&self.state);
            state.messages.push(ChatMessage {
                role: Role::User,
                content: question.to_string(),
                is_error: false,
                key,
            });
            state.messages.push(ChatMessage {
                role: Role::Assistant,
                content: String::new(),
                is_error: false,
                key: key + 1,
            });
            state.progress.clear();
            state.loading = true;
            state.cancelled = false;
        }

        let handler = QueryHandler {
            state: self.state.clone(),
            key: key + 1,
            answer: AnswerAccumulator::new(),
        };
        self.slot
            .start(|| StreamSession::new(handler, options).spawn(connect))
    }

    /// Abort the running question; what has streamed so far is kept.
    pub fn cancel(&mut self) {
        if self.slot.current().is_some() {
            lock(&self.state).cancelled = true;
        }
        self.slot.cancel();
    }

    /// Abandon any running question and empty the conversation.
    pub fn clear(&mut self) {
        self.slot.abandon();
        *lock(&self.state) = QueryState::default();
    }

    /// Wait for the running question, if any, to finish.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.slot.take() {
            handle.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::NO_RESPONSE_MESSAGE;
    use crate::stream::BufferedSource;

    fn frames(text: &'static str) -> impl Future<Output = Result<Box<dyn FrameSource>, ClientError>> {
        async move { Ok(Box::new(BufferedSource::new(text)) as Box<dyn FrameSource>) }
    }

    #[tokio::test]
    async fn test_answer_is_cleaned_on_done() {
        let mut consumer = QueryConsumer::new();
        consumer.submit_with(
            "capital?",
            StreamOptions::default(),
            frames(concat!(
                "data: {\"type\":\"progress\",\"content\":\"Searching docs\"}\n\n",
                "data: {\"type\":\"answer_chunk\",\"content\":\"<think>hmm</think>\"}\n\n",
                "data: {\"type\":\"answer_chunk\",\"content\":\" Paris \"}\n\n",
                "data: {\"type\":\"done\"}\n\n",
            )),
        );
        consumer.wait().await;

        let state = consumer.snapshot();
        assert!(!state.loading);
        assert!(state.progress.is_empty());
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content, "capital?");
        assert_eq!(state.messages[1].content, "Paris");
        assert!(!state.messages[1].is_error);
    }

    #[tokio::test]
    async fn test_empty_answer_is_no_response_error() {
        let mut consumer = QueryConsumer::new();
        consumer.submit_with(
            "anything?",
            StreamOptions::default(),
            frames("data: {\"type\":\"answer_chunk\",\"content\":\"<think>nothing</think>  \"}\n\n"),
        );
        consumer.wait().await;

        let reply = &consumer.snapshot().messages[1];
        assert_eq!(reply.content, NO_RESPONSE_MESSAGE);
        assert!(reply.is_error);
    }

    #[tokio::test]
    async fn test_error_event_marks_reply() {
        let mut consumer = QueryConsumer::new();
        consumer.submit_with(
            "q",
            StreamOptions::default(),
            frames("data: {\"type\":\"error\",\"content\":\"model not loaded\"}\n\n"),
        );
        consumer.wait().await;

        let reply = &consumer.snapshot().messages[1];
        assert_eq!(reply.content, "Error: model not loaded");
        assert!(reply.is_error);
    }

    #[tokio::test]
    async fn test_cancel_is_not_a_missing_answer() {
        let mut consumer = QueryConsumer::new();
        consumer.submit_with("q", StreamOptions::default(), futures::future::pending());

        consumer.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while consumer.snapshot().loading {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let state = consumer.snapshot();
        assert!(state.cancelled);
        assert_eq!(state.messages[1].content, "");
        assert!(!state.messages[1].is_error);
    }

    #[tokio::test]
    async fn test_clear_empties_conversation() {
        let mut consumer = QueryConsumer::new();
        consumer.submit_with("q", StreamOptions::default(), futures::future::pending());
        assert!(consumer.snapshot().loading);

        consumer.clear();
        assert_eq!(consumer.snapshot(), QueryState::default());
        assert!(!consumer.is_streaming());
    }
}
