//! Ordered log of classified steps.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::trace;

use crate::classifier::{Classification, StepDetail, StepPhase, StepType};
use crate::options::TimelineOptions;

/// Status of a timeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Running,
    Completed,
}

/// A classified step as stored in the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedStep {
    /// Monotonic within one timeline
    pub id: u64,
    pub step_type: StepType,
    pub phase: StepPhase,
    pub message: String,
    pub emoji: &'static str,
    pub detail: StepDetail,
    pub timestamp: DateTime<Utc>,
    pub status: StepStatus,
    /// Set once the step is completed
    pub duration: Option<Duration>,
}

impl ClassifiedStep {
    pub fn is_running(&self) -> bool {
        self.status == StepStatus::Running
    }

    fn complete(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Completed;
        self.duration = Some(elapsed(self.timestamp, now));
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

/// Ordered, de-duplicated log of classified steps.
///
/// Appending a step closes any running step of the same type, so at most
/// one step per type is running at a time. A step whose message equals one
/// appended within the de-dup window is dropped; two distinct events with
/// the same text close together are therefore merged.
#[derive(Debug, Clone)]
pub struct StepTimeline {
    steps: Vec<ClassifiedStep>,
    next_id: u64,
    finished: bool,
    options: TimelineOptions,
}

impl Default for StepTimeline {
    fn default() -> Self {
        Self::new(TimelineOptions::default())
    }
}

impl StepTimeline {
    pub fn new(options: TimelineOptions) -> Self {
        Self {
            steps: Vec::new(),
            next_id: 1,
            finished: false,
            options,
        }
    }

    pub fn steps(&self) -> &[ClassifiedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Most recently appended step that is still running.
    pub fn current(&self) -> Option<&ClassifiedStep> {
        self.steps.iter().rev().find(|step| step.is_running())
    }

    /// Whether the completion step has been appended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn append(&mut self, classification: Classification) -> Option<&ClassifiedStep> {
        self.append_at(classification, Utc::now())
    }

    pub fn append_at(
        &mut self,
        classification: Classification,
        now: DateTime<Utc>,
    ) -> Option<&ClassifiedStep> {
        let window = self.options.dedup_window;
        self.append_within(classification, now, window)
    }

    /// Append with an explicit de-dup window.
    pub fn append_within(
        &mut self,
        classification: Classification,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Option<&ClassifiedStep> {
        if self.is_recent_duplicate(&classification.message, now, window) {
            trace!(message = %classification.message, "dropping duplicate step");
            return None;
        }

        for step in self
            .steps
            .iter_mut()
            .filter(|step| step.is_running() && step.step_type == classification.step_type)
        {
            step.complete(now);
        }

        let born_completed = classification.step_type == StepType::TasksCompleted;
        let step = ClassifiedStep {
            id: self.next_id,
            step_type: classification.step_type,
            phase: classification.phase,
            message: classification.message,
            emoji: classification.emoji,
            detail: classification.detail,
            timestamp: now,
            status: if born_completed {
                StepStatus::Completed
            } else {
                StepStatus::Running
            },
            duration: born_completed.then_some(Duration::ZERO),
        };
        self.next_id += 1;
        self.steps.push(step);
        self.steps.last()
    }

    /// Append a generic fallback step unless `fallback_limit` `processing`
    /// steps already landed within `fallback_window`.
    ///
    /// Every `processing` step counts, whichever path produced it.
    pub fn append_fallback_at(
        &mut self,
        classification: Classification,
        now: DateTime<Utc>,
    ) -> Option<&ClassifiedStep> {
        let window = self.options.fallback_window;
        let recent = self
            .steps
            .iter()
            .filter(|step| {
                step.step_type == StepType::Processing && elapsed(step.timestamp, now) < window
            })
            .count();
        if recent >= self.options.fallback_limit {
            trace!(recent, "fallback step rate limited");
            return None;
        }

        self.append_at(classification, now)
    }

    /// Close all running steps and append the completion step once.
    pub fn finish_at(
        &mut self,
        now: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Option<&ClassifiedStep> {
        if self.finished {
            return None;
        }
        self.finished = true;

        for step in self.steps.iter_mut().filter(|step| step.is_running()) {
            step.complete(now);
        }

        let total = elapsed(started_at, now);
        self.steps.push(ClassifiedStep {
            id: self.next_id,
            step_type: StepType::Completion,
            phase: StepPhase::Done,
            message: format!("◉ All tasks completed in {}s", total.as_secs()),
            emoji: "◉",
            detail: StepDetail::None,
            timestamp: now,
            status: StepStatus::Completed,
            duration: Some(total),
        });
        self.next_id += 1;
        self.steps.last()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.finished = false;
    }

    fn is_recent_duplicate(&self, message: &str, now: DateTime<Utc>, window: Duration) -> bool {
        self.steps
            .iter()
            .rev()
            .take_while(|step| elapsed(step.timestamp, now) < window)
            .any(|step| step.message == message)
    }
}
