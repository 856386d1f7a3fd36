//! Streaming session lifecycle and cancellation.
//!
//! A [`StreamSession`] owns one in-flight request. It moves through
//! `Idle → Requesting → Streaming → Finished`; reading suspends only at the
//! transport read, and every frame completed by one read is decoded and
//! dispatched before the next read is awaited.
//!
//! Cancellation is cooperative. [`Canceller::cancel`] marks the session
//! cancelled under the same lock that guards dispatch, so once it returns no
//! further progress, chunk, task or error callback runs. The aborted read
//! then ends the loop quietly and `on_done` fires once.

use futures::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ClientError;
use crate::decode::decode_frame;
use crate::dispatch::{EventDispatcher, StreamHandler};
use crate::options::StreamOptions;
use crate::stream::FrameSource;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Finished,
}

struct Gate {
    dispatcher: EventDispatcher<Box<dyn StreamHandler>>,
    state: SessionState,
    cancelled: bool,
    abandoned: bool,
    done_fired: bool,
}

impl Gate {
    fn is_open(&self) -> bool {
        !self.cancelled && !self.abandoned
    }

    fn fail(&mut self, message: String) {
        if self.is_open() {
            self.dispatcher.handler_mut().on_error(message);
        }
    }

    fn finish(&mut self) {
        self.state = SessionState::Finished;
        if self.abandoned || self.done_fired {
            return;
        }
        self.done_fired = true;
        self.dispatcher.handler_mut().on_done();
    }
}

type SharedGate = Arc<Mutex<Gate>>;

fn lock(gate: &SharedGate) -> MutexGuard<'_, Gate> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable cancellation callback of one session.
///
/// Must not be invoked from inside that same session's callbacks, which run
/// while the dispatch lock is held.
#[derive(Clone)]
pub struct Canceller {
    id: u64,
    token: CancellationToken,
    gate: SharedGate,
}

impl Canceller {
    /// Abort the session. A quiet `on_done` still fires once.
    ///
    /// Idempotent, and harmless after the session finished.
    pub fn cancel(&self) {
        {
            let mut gate = lock(&self.gate);
            if gate.state != SessionState::Finished && !gate.cancelled {
                info!(session = self.id, "cancelling stream");
            }
            gate.cancelled = true;
        }
        self.token.cancel();
    }

    /// Abort the session and silence it entirely, `on_done` included.
    ///
    /// Used when a consumer replaces its session with a new one.
    pub fn abandon(&self) {
        {
            let mut gate = lock(&self.gate);
            debug!(session = self.id, "abandoning stream");
            gate.cancelled = true;
            gate.abandoned = true;
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Caller-side handle of a spawned session.
///
/// Dropping the handle does not cancel the session.
pub struct SessionHandle {
    canceller: Canceller,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.canceller.id
    }

    pub fn state(&self) -> SessionState {
        lock(&self.canceller.gate).state
    }

    pub fn is_finished(&self) -> bool {
        self.state() == SessionState::Finished
    }

    /// The cancel callback, detached from the handle.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn abandon(&self) {
        self.canceller.abandon();
    }

    /// Wait until the session has run its final callback.
    pub async fn wait(mut self) {
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(session = self.canceller.id, error = %err, "session task failed");
            }
        }
    }
}

/// One cancellable request/response streaming cycle.
pub struct StreamSession {
    id: u64,
    token: CancellationToken,
    gate: SharedGate,
    options: StreamOptions,
}

impl StreamSession {
    pub fn new<H: StreamHandler + 'static>(handler: H, options: StreamOptions) -> Self {
        let handler: Box<dyn StreamHandler> = Box::new(handler);
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            gate: Arc::new(Mutex::new(Gate {
                dispatcher: EventDispatcher::new(handler),
                state: SessionState::Idle,
                cancelled: false,
                abandoned: false,
                done_fired: false,
            })),
            options,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            id: self.id,
            token: self.token.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Run the session on a new tokio task.
    pub fn spawn<C>(self, connect: C) -> SessionHandle
    where
        C: Future<Output = Result<Box<dyn FrameSource>, ClientError>> + Send + 'static,
    {
        let canceller = self.canceller();
        let join = tokio::spawn(self.run(connect));
        SessionHandle {
            canceller,
            join: Some(join),
        }
    }

    /// Drive the session to completion on the current task.
    ///
    /// `connect` resolves once the response headers are accepted. `on_done`
    /// is always the last callback, whatever the outcome.
    pub async fn run<C>(self, connect: C)
    where
        C: Future<Output = Result<Box<dyn FrameSource>, ClientError>> + Send,
    {
        let outcome = match self.options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.drive(connect))
                .await
                .unwrap_or(Err(ClientError::Timeout(deadline))),
            None => self.drive(connect).await,
        };

        let mut gate = lock(&self.gate);
        match outcome {
            Ok(()) => debug!(
                session = self.id,
                done_marker = gate.dispatcher.done_seen(),
                "stream complete"
            ),
            Err(_) if gate.cancelled => info!(session = self.id, "stream aborted by caller"),
            Err(err) => {
                error!(session = self.id, error = %err, "stream failed");
                gate.fail(err.user_message());
            }
        }
        gate.finish();
    }

    async fn drive<C>(&self, connect: C) -> Result<(), ClientError>
    where
        C: Future<Output = Result<Box<dyn FrameSource>, ClientError>> + Send,
    {
        self.set_state(SessionState::Requesting);
        debug!(session = self.id, "requesting stream");

        let mut source = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(ClientError::StreamCancelled),
            source = connect => source?,
        };

        self.set_state(SessionState::Streaming);
        debug!(session = self.id, "stream accepted");

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(ClientError::StreamCancelled),
                batch = source.next_batch() => batch,
            };
            let Some(batch) = batch else {
                return Ok(());
            };
            let frames = batch?;

            let mut gate = lock(&self.gate);
            for frame in &frames {
                for event in decode_frame(frame) {
                    if !gate.is_open() {
                        return Err(ClientError::StreamCancelled);
                    }
                    gate.dispatcher.dispatch(event);
                }
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        lock(&self.gate).state = state;
    }
}

/// The single active session of one logical consumer.
///
/// Starting a new session abandons the previous one first, so callbacks
/// that arrive late from it are inert.
#[derive(Default)]
pub struct SessionSlot {
    current: Option<SessionHandle>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon any previous session, then install the one built by `start`.
    pub fn start(&mut self, start: impl FnOnce() -> SessionHandle) -> &SessionHandle {
        if let Some(previous) = self.current.take() {
            previous.abandon();
        }
        self.current.insert(start())
    }

    /// Cancel the current session, letting its quiet `on_done` fire.
    pub fn cancel(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel();
        }
    }

    /// Abandon the current session without any further callback.
    pub fn abandon(&mut self) {
        if let Some(current) = self.current.take() {
            current.abandon();
        }
    }

    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }

    /// True while a session is installed and has not finished.
    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn take(&mut self) -> Option<SessionHandle> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferedSource;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StreamHandler for Log {
        fn on_progress(&mut self, content: String) {
            self.0.lock().unwrap().push(format!("progress:{content}"));
        }

        fn on_error(&mut self, message: String) {
            self.0.lock().unwrap().push(format!("error:{message}"));
        }

        fn on_done(&mut self) {
            self.0.lock().unwrap().push("done".into());
        }
    }

    fn buffered(text: &'static str) -> Result<Box<dyn FrameSource>, ClientError> {
        Ok(Box::new(BufferedSource::new(text)))
    }

    #[tokio::test]
    async fn test_run_dispatches_then_finishes() {
        let log = Log::default();
        let session = StreamSession::new(log.clone(), StreamOptions::default());
        let canceller = session.canceller();

        session
            .run(async { buffered("data: {\"type\":\"progress\",\"content\":\"one\"}\n\n") })
            .await;

        assert_eq!(log.entries(), vec!["progress:one", "done"]);
        canceller.cancel();
        canceller.cancel();
        assert_eq!(log.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_error_then_done() {
        let log = Log::default();
        StreamSession::new(log.clone(), StreamOptions::default())
            .run(async {
                Err(ClientError::Status {
                    status: 404,
                    detail: "RAG not found".into(),
                })
            })
            .await;

        assert_eq!(log.entries(), vec!["error:RAG not found", "done"]);
    }

    #[tokio::test]
    async fn test_cancel_before_connect_is_silent() {
        let log = Log::default();
        let session = StreamSession::new(log.clone(), StreamOptions::default());
        session.canceller().cancel();

        session.run(futures::future::pending()).await;

        assert_eq!(log.entries(), vec!["done"]);
    }

    #[tokio::test]
    async fn test_abandon_suppresses_done() {
        let log = Log::default();
        let session = StreamSession::new(log.clone(), StreamOptions::default());
        session.canceller().abandon();

        session.run(futures::future::pending()).await;

        assert!(log.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_surfaces_timeout() {
        let log = Log::default();
        let options = StreamOptions::default().with_deadline(std::time::Duration::from_secs(5));

        StreamSession::new(log.clone(), options)
            .run(futures::future::pending())
            .await;

        assert_eq!(log.entries(), vec!["error:Stream timed out after 5s", "done"]);
    }

    #[tokio::test]
    async fn test_slot_replacement_abandons_previous() {
        let first = Log::default();
        let second = Log::default();
        let mut slot = SessionSlot::new();

        let first_id = slot
            .start(|| {
                StreamSession::new(first.clone(), StreamOptions::default()).spawn(
                    futures::future::pending::<Result<Box<dyn FrameSource>, ClientError>>(),
                )
            })
            .id();
        let first_canceller = slot.current().unwrap().canceller();

        slot.start(|| {
            StreamSession::new(second.clone(), StreamOptions::default())
                .spawn(async { buffered("data: {\"type\":\"progress\",\"content\":\"b\"}\n\n") })
        });
        assert_ne!(slot.current().unwrap().id(), first_id);
        assert!(first_canceller.is_cancelled());

        slot.take().unwrap().wait().await;
        assert!(first.entries().is_empty());
        assert_eq!(second.entries(), vec!["progress:b", "done"]);
    }
}
