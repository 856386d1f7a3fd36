//! Event dispatch to caller callbacks.

use tracing::debug;

use crate::model::{StreamEvent, TaskUpdate};

/// Callback set of one stream consumer.
///
/// Every method has a no-op default so consumers only implement the
/// channels they care about. `on_done` is the terminal signal and fires
/// exactly once per session, after any `on_error`.
pub trait StreamHandler: Send {
    fn on_progress(&mut self, _content: String) {}

    fn on_answer_chunk(&mut self, _chunk: String) {}

    fn on_task_update(&mut self, _update: TaskUpdate) {}

    fn on_error(&mut self, _message: String) {}

    fn on_done(&mut self) {}
}

impl<H: StreamHandler + ?Sized> StreamHandler for Box<H> {
    fn on_progress(&mut self, content: String) {
        (**self).on_progress(content)
    }

    fn on_answer_chunk(&mut self, chunk: String) {
        (**self).on_answer_chunk(chunk)
    }

    fn on_task_update(&mut self, update: TaskUpdate) {
        (**self).on_task_update(update)
    }

    fn on_error(&mut self, message: String) {
        (**self).on_error(message)
    }

    fn on_done(&mut self) {
        (**self).on_done()
    }
}

type Callback<T> = Box<dyn FnMut(T) + Send>;

/// Closure-based [`StreamHandler`].
///
/// # Example
/// ```
/// use ragstream::dispatch::{Callbacks, EventDispatcher};
/// use ragstream::model::StreamEvent;
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let mut dispatcher = EventDispatcher::new(
///     Callbacks::new().on_progress(move |text| sink.lock().unwrap().push(text)),
/// );
///
/// dispatcher.dispatch(StreamEvent::Progress("Searching docs".into()));
/// assert_eq!(*seen.lock().unwrap(), vec!["Searching docs".to_string()]);
/// ```
#[derive(Default)]
pub struct Callbacks {
    progress: Option<Callback<String>>,
    answer_chunk: Option<Callback<String>>,
    task_update: Option<Callback<TaskUpdate>>,
    error: Option<Callback<String>>,
    done: Option<Box<dyn FnMut() + Send>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn on_answer_chunk(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.answer_chunk = Some(Box::new(f));
        self
    }

    pub fn on_task_update(mut self, f: impl FnMut(TaskUpdate) + Send + 'static) -> Self {
        self.task_update = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_done(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.done = Some(Box::new(f));
        self
    }
}

impl StreamHandler for Callbacks {
    fn on_progress(&mut self, content: String) {
        if let Some(f) = self.progress.as_mut() {
            f(content);
        }
    }

    fn on_answer_chunk(&mut self, chunk: String) {
        if let Some(f) = self.answer_chunk.as_mut() {
            f(chunk);
        }
    }

    fn on_task_update(&mut self, update: TaskUpdate) {
        if let Some(f) = self.task_update.as_mut() {
            f(update);
        }
    }

    fn on_error(&mut self, message: String) {
        if let Some(f) = self.error.as_mut() {
            f(message);
        }
    }

    fn on_done(&mut self) {
        if let Some(f) = self.done.as_mut() {
            f();
        }
    }
}

/// Routes decoded events to exactly one callback each.
pub struct EventDispatcher<H> {
    handler: H,
    done_seen: bool,
}

impl<H: StreamHandler> EventDispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            done_seen: false,
        }
    }

    /// Invoke the callback matching the event's kind.
    ///
    /// `done` only records that the terminal marker was seen; unknown kinds
    /// are ignored.
    pub fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Progress(content) => self.handler.on_progress(content),
            StreamEvent::AnswerChunk(chunk) => self.handler.on_answer_chunk(chunk),
            StreamEvent::TaskUpdate(update) => self.handler.on_task_update(update),
            StreamEvent::Error(message) => self.handler.on_error(message),
            StreamEvent::Done => {
                debug!("received done marker");
                self.done_seen = true;
            }
            StreamEvent::Unknown(kind) => debug!(kind, "ignoring unknown event kind"),
        }
    }

    /// Whether the server's terminal marker has been seen.
    pub fn done_seen(&self) -> bool {
        self.done_seen
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}
