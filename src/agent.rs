//! Agent execution consumer.
//!
//! An agent run streams free-text progress, task updates and answer chunks.
//! [`AgentConsumer`] turns them into the state a display layer renders:
//! a step timeline, a short ring of detailed actions, a task board and the
//! visible answer.
//!
//! Agent runs also announce steps inside answer chunks, prefixed with an
//! emoji. Such chunks never reach the answer; with
//! [`AgentOptions::reroute_emoji_chunks`] set they are classified onto the
//! timeline like progress text.

use chrono::{DateTime, Utc};
use futures::Future;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::answer::{has_step_emoji, is_agent_answer_text, join_agent_chunk};
use crate::classifier::{classify_cleaned, clean_text, Classification, StepDetail, StepType};
use crate::client::{ClientError, RagClient};
use crate::dispatch::StreamHandler;
use crate::model::{AgentRequest, TaskStatus, TaskUpdate};
use crate::options::AgentOptions;
use crate::session::{SessionHandle, SessionSlot, StreamSession};
use crate::stream::FrameSource;
use crate::timeline::StepTimeline;

/// Unclassified progress must exceed this many characters to be shown.
const FALLBACK_MIN_CHARS: usize = 5;

/// Characters quoted by a fallback step.
const FALLBACK_QUOTE_CHARS: usize = 80;

/// A fine-grained action (file read, thinking, command execution).
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedAction {
    pub message: String,
    pub emoji: &'static str,
    pub detail: StepDetail,
    pub timestamp: DateTime<Utc>,
}

/// Observable state of an [`AgentConsumer`].
#[derive(Debug, Clone)]
pub struct AgentState {
    pub timeline: StepTimeline,
    /// Most recent detailed actions, oldest first
    pub detailed_actions: VecDeque<DetailedAction>,
    /// Tasks in first-seen order
    pub tasks: Vec<TaskUpdate>,
    pub current_step: Option<String>,
    pub current_step_type: Option<StepType>,
    pub completed_tasks: u32,
    pub answer: String,
    pub error: Option<String>,
    pub executing: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl AgentState {
    fn new(options: &AgentOptions) -> Self {
        Self {
            timeline: StepTimeline::new(options.timeline.clone()),
            detailed_actions: VecDeque::new(),
            tasks: Vec::new(),
            current_step: None,
            current_step_type: None,
            completed_tasks: 0,
            answer: String::new(),
            error: None,
            executing: false,
            started_at: None,
        }
    }

    /// Task by id.
    pub fn task(&self, task_id: &str) -> Option<&TaskUpdate> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Heading for the running step, e.g. `Executing Tasks`.
    pub fn current_title(&self) -> Option<&'static str> {
        self.current_step_type.map(|step_type| step_type.title())
    }

    fn set_current(&mut self, classification: &Classification) {
        self.current_step = Some(classification.message.clone());
        self.current_step_type = Some(classification.step_type);
    }

    fn count_tasks(&mut self, classification: &Classification) {
        match classification.step_type {
            StepType::TaskExecution => {
                if let Some(number) = classification.task_number() {
                    self.completed_tasks = self.completed_tasks.max(number);
                }
            }
            StepType::TasksCompleted => {
                self.completed_tasks = classification
                    .count()
                    .unwrap_or(self.completed_tasks + 1);
            }
            _ => {}
        }
    }

    fn record_action(&mut self, classification: Classification, now: DateTime<Utc>, limit: usize) {
        self.detailed_actions.push_back(DetailedAction {
            message: classification.message,
            emoji: classification.emoji,
            detail: classification.detail,
            timestamp: now,
        });
        while self.detailed_actions.len() > limit {
            self.detailed_actions.pop_front();
        }
    }

    /// Upsert by id, first carrying a terminal status over to running
    /// tasks whose description overlaps.
    fn apply_task_update(&mut self, update: TaskUpdate) {
        if update.status.is_terminal() && !update.description.is_empty() {
            for task in self.tasks.iter_mut().filter(|t| {
                t.status == TaskStatus::Running
                    && t.task_id != update.task_id
                    && !t.description.is_empty()
                    && (t.description.contains(&update.description)
                        || update.description.contains(&t.description))
            }) {
                task.status = update.status;
                task.result = update.result.clone();
                task.tool = update.tool.clone();
                task.error = update.error.clone();
            }
        }

        match self.tasks.iter_mut().find(|t| t.task_id == update.task_id) {
            Some(task) => task.merge(update),
            None => self.tasks.push(update),
        }
    }
}

type SharedState = Arc<Mutex<AgentState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AgentHandler {
    state: SharedState,
    options: AgentOptions,
}

impl AgentHandler {
    fn route(&self, state: &mut AgentState, classification: Classification, now: DateTime<Utc>) {
        state.set_current(&classification);
        state.count_tasks(&classification);
        if classification.step_type == StepType::DetailedAction {
            state.record_action(classification, now, self.options.timeline.detailed_action_limit);
        } else {
            state.timeline.append_at(classification, now);
        }
    }
}

impl StreamHandler for AgentHandler {
    fn on_progress(&mut self, content: String) {
        let now = Utc::now();
        let cleaned = clean_text(&content);
        let mut state = lock(&self.state);

        match classify_cleaned(&cleaned) {
            Some(classification) => self.route(&mut state, classification, now),
            None if cleaned.chars().count() > FALLBACK_MIN_CHARS => {
                let fallback = Classification::generic(&cleaned, FALLBACK_QUOTE_CHARS);
                state.set_current(&fallback);
                state.timeline.append_fallback_at(fallback, now);
            }
            None => trace!(content = %content, "ignoring short progress"),
        }
    }

    fn on_answer_chunk(&mut self, chunk: String) {
        let cleaned = clean_text(&chunk);
        let mut state = lock(&self.state);

        if has_step_emoji(&chunk) {
            if !self.options.reroute_emoji_chunks {
                return;
            }
            if let Some(classification) = classify_cleaned(&cleaned) {
                debug!(step = %classification.step_type, "answer chunk carries a step");
                state.set_current(&classification);
                state.count_tasks(&classification);
                let window = self.options.timeline.chunk_dedup_window;
                state.timeline.append_within(classification, Utc::now(), window);
            }
            return;
        }

        if is_agent_answer_text(&cleaned) {
            join_agent_chunk(&mut state.answer, &cleaned);
        }
    }

    fn on_task_update(&mut self, update: TaskUpdate) {
        lock(&self.state).apply_task_update(update);
    }

    fn on_error(&mut self, message: String) {
        let mut state = lock(&self.state);
        state.error = Some(message);
        state.executing = false;
        state.current_step = None;
        state.current_step_type = None;
    }

    fn on_done(&mut self) {
        let now = Utc::now();
        let mut state = lock(&self.state);
        state.executing = false;
        let started_at = state.started_at.unwrap_or(now);
        if let Some(step) = state.timeline.finish_at(now, started_at) {
            let message = step.message.clone();
            state.current_step = Some(message);
            state.current_step_type = Some(StepType::Completion);
        }
    }
}

/// Runs one agent execution at a time.
pub struct AgentConsumer {
    state: SharedState,
    slot: SessionSlot,
    options: AgentOptions,
}

impl Default for AgentConsumer {
    fn default() -> Self {
        Self::new(AgentOptions::default())
    }
}

impl AgentConsumer {
    pub fn new(options: AgentOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(AgentState::new(&options))),
            slot: SessionSlot::new(),
            options,
        }
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> AgentState {
        lock(&self.state).clone()
    }

    pub fn is_executing(&self) -> bool {
        self.slot.is_active()
    }

    /// Start an agent run through `client`.
    pub fn submit(&mut self, client: &RagClient, request: AgentRequest) -> &SessionHandle {
        let connect = client.connector(request);
        self.submit_with(connect)
    }

    /// Start an agent run over the stream `connect` resolves to.
    ///
    /// Abandons any run still in flight and resets the state.
    pub fn submit_with<C>(&mut self, connect: C) -> &SessionHandle
    where
        C: Future<Output = Result<Box<dyn FrameSource>, ClientError>> + Send + 'static,
    {
        self.slot.abandon();
        {
            let mut state = lock(&self.state);
            *state = AgentState::new(&self.options);
            state.executing = true;
            state.started_at = Some(Utc::now());
        }

        let handler = AgentHandler {
            state: self.state.clone(),
            options: self.options.clone(),
        };
        let stream_options = self.options.stream.clone();
        self.slot
            .start(|| StreamSession::new(handler, stream_options).spawn(connect))
    }

    /// Abort the running execution. The timeline is still closed out.
    pub fn cancel(&mut self) {
        self.slot.cancel();
    }

    /// Abandon any running execution and reset the state.
    pub fn clear(&mut self) {
        self.slot.abandon();
        *lock(&self.state) = AgentState::new(&self.options);
    }

    /// Wait for the running execution, if any, to finish.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.slot.take() {
            handle.wait().await;
        }
    }
}
