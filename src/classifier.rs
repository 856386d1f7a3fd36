//! Progress text classification.
//!
//! Agent runs report progress as free text ("Decomposed into 3 tasks",
//! "Task 2 completed", "Thought for 4 seconds", ...). [`classify`] maps such
//! a string onto a small, stable step taxonomy by evaluating an ordered rule
//! table: the first rule whose predicate holds builds the result, so a text
//! matching several rules is classified by the earliest one.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Texts at or below this many characters produce no generic step.
pub const FALLBACK_MIN_CHARS: usize = 10;

/// Characters of the cleaned text kept in a generic step message.
pub const FALLBACK_MESSAGE_CHARS: usize = 50;

static CONTROL_CODES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]|\[(?:[0-9]+[A-Z]|K)\]").unwrap());
static ELAPSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([0-9.]+s\)").unwrap());
static DATA_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^data:\s*").unwrap());
static EVENT_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^event:\s*\w+\s*").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());
static SECONDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*seconds?").unwrap());

/// Kind of a timeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    Starting,
    Progress,
    Decomposing,
    TasksCompleted,
    TaskExecution,
    Search,
    Orchestration,
    Compilation,
    Synthesis,
    DetailedAction,
    Processing,
    Completion,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Starting => "starting",
            StepType::Progress => "progress",
            StepType::Decomposing => "decomposing",
            StepType::TasksCompleted => "tasks_completed",
            StepType::TaskExecution => "task_execution",
            StepType::Search => "search",
            StepType::Orchestration => "orchestration",
            StepType::Compilation => "compilation",
            StepType::Synthesis => "synthesis",
            StepType::DetailedAction => "detailed_action",
            StepType::Processing => "processing",
            StepType::Completion => "completion",
        }
    }

    /// Title shown for the step currently in progress.
    pub fn title(&self) -> &'static str {
        match self {
            StepType::Starting => "Starting",
            StepType::Progress | StepType::Processing => "Processing",
            StepType::Decomposing => "Decomposing Tasks",
            StepType::TasksCompleted => "Tasks Completed",
            StepType::TaskExecution => "Executing Tasks",
            StepType::Search => "Searching",
            StepType::Orchestration => "Orchestrating",
            StepType::Compilation => "Compiling Results",
            StepType::Synthesis => "Synthesizing Response",
            StepType::DetailedAction => "Working",
            StepType::Completion => "Completed",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic phase a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepPhase {
    Init,
    Processing,
    Decomposition,
    Execution,
    Completion,
    Search,
    Coordination,
    Compilation,
    Synthesis,
    FileOperation,
    Reasoning,
    Active,
    Done,
}

/// Flavor of a detailed action step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Read,
    Thinking,
    Execution,
}

/// Values extracted from the text while classifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepDetail {
    #[default]
    None,
    /// Number of tasks reported completed
    TaskCount(u32),
    /// Number of the task being executed
    TaskNumber(u32),
    Action {
        kind: ActionKind,
        elapsed_secs: Option<u32>,
    },
}

/// Result of classifying one progress string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub step_type: StepType,
    pub phase: StepPhase,
    pub message: String,
    pub emoji: &'static str,
    pub detail: StepDetail,
}

impl Classification {
    fn new(step_type: StepType, phase: StepPhase, emoji: &'static str, message: String) -> Self {
        Self {
            step_type,
            phase,
            message,
            emoji,
            detail: StepDetail::None,
        }
    }

    fn with_detail(mut self, detail: StepDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Generic `processing` step quoting up to `max_chars` of `cleaned`.
    pub fn generic(cleaned: &str, max_chars: usize) -> Self {
        Self::new(
            StepType::Processing,
            StepPhase::Active,
            "∘",
            format!("∘ {}", truncate_chars(cleaned, max_chars)),
        )
    }

    /// Count of completed tasks, for `tasks_completed` steps that carry one.
    pub fn count(&self) -> Option<u32> {
        match self.detail {
            StepDetail::TaskCount(count) => Some(count),
            _ => None,
        }
    }

    pub fn task_number(&self) -> Option<u32> {
        match self.detail {
            StepDetail::TaskNumber(number) => Some(number),
            _ => None,
        }
    }
}

/// Strip framing artifacts and normalize whitespace.
///
/// Removes terminal control codes (`[2A]`, `[K]`, ANSI escapes), elapsed
/// time parentheticals like `(0.8s)`, and a leading `data:` or `event:`
/// field prefix.
///
/// # Example
/// ```
/// use ragstream::classifier::clean_text;
///
/// assert_eq!(clean_text("data: [2K]Searching   docs (0.8s)\n"), "Searching docs");
/// ```
pub fn clean_text(text: &str) -> String {
    let cleaned = CONTROL_CODES.replace_all(text, "");
    let cleaned = ELAPSED.replace_all(&cleaned, "");
    let cleaned = cleaned.trim_start();
    let cleaned = DATA_FIELD.replace(cleaned, "");
    let cleaned = EVENT_FIELD.replace(&cleaned, "");
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

/// Classify a raw progress string. Pure and deterministic.
///
/// # Example
/// ```
/// use ragstream::classifier::{classify, StepType};
///
/// let step = classify("Task 3 completed successfully").unwrap();
/// assert_eq!(step.step_type, StepType::TasksCompleted);
/// assert_eq!(step.count(), Some(3));
/// ```
pub fn classify(raw: &str) -> Option<Classification> {
    let cleaned = clean_text(raw);
    classify_cleaned(&cleaned)
}

/// Classify text that already went through [`clean_text`].
pub fn classify_cleaned(cleaned: &str) -> Option<Classification> {
    let text = Text {
        cleaned,
        lower: cleaned.to_lowercase(),
    };
    RULES
        .iter()
        .find(|rule| (rule.matches)(&text))
        .map(|rule| (rule.build)(&text))
}

/// Names of the rules in evaluation order.
pub fn rule_names() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|rule| rule.name)
}

struct Text<'a> {
    cleaned: &'a str,
    lower: String,
}

impl Text<'_> {
    fn has_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.lower.contains(needle))
    }

    fn first_number(&self) -> Option<u32> {
        NUMBER
            .captures(self.cleaned)
            .and_then(|caps| caps[1].parse().ok())
    }
}

struct Rule {
    name: &'static str,
    matches: fn(&Text) -> bool,
    build: fn(&Text) -> Classification,
}

const COMPLETION_WORDS: &[&str] = &["complet", "finish", "done", "terminé"];
const FILE_EXTENSIONS: &[&str] = &[".go", ".py", ".js", ".md"];
const FRAMING_WORDS: &[&str] = &["sse", "chunk", "data:"];

static RULES: &[Rule] = &[
    Rule {
        name: "starting",
        matches: is_starting,
        build: starting,
    },
    Rule {
        name: "progress",
        matches: is_progress,
        build: progress,
    },
    Rule {
        name: "decomposing",
        matches: is_decomposing,
        build: decomposing,
    },
    Rule {
        name: "task",
        matches: is_task,
        build: task,
    },
    Rule {
        name: "search",
        matches: is_search,
        build: search,
    },
    Rule {
        name: "orchestration",
        matches: is_orchestration,
        build: orchestration,
    },
    Rule {
        name: "compilation",
        matches: is_compilation,
        build: compilation,
    },
    Rule {
        name: "synthesis",
        matches: is_synthesis,
        build: synthesis,
    },
    Rule {
        name: "completion",
        matches: is_completion,
        build: completion,
    },
    Rule {
        name: "file_read",
        matches: is_file_read,
        build: file_read,
    },
    Rule {
        name: "thinking",
        matches: is_thinking,
        build: thinking,
    },
    Rule {
        name: "execution",
        matches: is_execution,
        build: execution,
    },
    Rule {
        name: "generic",
        matches: is_generic,
        build: generic,
    },
];

fn is_starting(t: &Text) -> bool {
    t.has_any(&["starting", "agent", "stream started"])
}

fn starting(_: &Text) -> Classification {
    Classification::new(StepType::Starting, StepPhase::Init, "◦", "◦ Starting agent system".into())
}

fn is_progress(t: &Text) -> bool {
    t.has_any(&["progress", "processing", "working"])
}

fn progress(_: &Text) -> Classification {
    Classification::new(StepType::Progress, StepPhase::Processing, "∘", "∘ Processing request".into())
}

fn is_decomposing(t: &Text) -> bool {
    t.has_any(&["analyz", "decompos", "break", "complex"])
}

fn decomposing(_: &Text) -> Classification {
    Classification::new(
        StepType::Decomposing,
        StepPhase::Decomposition,
        "◈",
        "◈ Analyzing and decomposing query".into(),
    )
}

fn is_task(t: &Text) -> bool {
    t.has_any(&["task", "step"])
}

fn task(t: &Text) -> Classification {
    match t.first_number() {
        Some(count) if t.has_any(COMPLETION_WORDS) => Classification::new(
            StepType::TasksCompleted,
            StepPhase::Completion,
            "◉",
            format!("◉ {count} tasks completed"),
        )
        .with_detail(StepDetail::TaskCount(count)),
        Some(number) => Classification::new(
            StepType::TaskExecution,
            StepPhase::Execution,
            "◦",
            format!("◦ Task {number}: In progress"),
        )
        .with_detail(StepDetail::TaskNumber(number)),
        None => Classification::new(
            StepType::TaskExecution,
            StepPhase::Execution,
            "⚡",
            "⚡ Processing tasks".into(),
        ),
    }
}

fn is_search(t: &Text) -> bool {
    t.has_any(&["search", "query", "find", "look"])
}

fn search(_: &Text) -> Classification {
    Classification::new(StepType::Search, StepPhase::Search, "◎", "◎ Searching for information".into())
}

fn is_orchestration(t: &Text) -> bool {
    t.has_any(&["orchestr", "coordinat", "manag", "organiz"])
}

fn orchestration(_: &Text) -> Classification {
    Classification::new(
        StepType::Orchestration,
        StepPhase::Coordination,
        "◈",
        "◈ Orchestrating execution".into(),
    )
}

fn is_compilation(t: &Text) -> bool {
    t.has_any(&["compil", "collect", "gather", "assembl"])
}

fn compilation(_: &Text) -> Classification {
    Classification::new(StepType::Compilation, StepPhase::Compilation, "◈", "◈ Compiling results".into())
}

fn is_synthesis(t: &Text) -> bool {
    t.has_any(&["synthes", "generat", "final", "response", "answer"])
}

fn synthesis(_: &Text) -> Classification {
    Classification::new(StepType::Synthesis, StepPhase::Synthesis, "◌", "◌ Synthesizing response".into())
}

fn is_completion(t: &Text) -> bool {
    t.has_any(COMPLETION_WORDS) || t.has_any(&["success"])
}

fn completion(_: &Text) -> Classification {
    Classification::new(StepType::TasksCompleted, StepPhase::Completion, "◉", "◉ Tasks completed".into())
}

fn is_file_read(t: &Text) -> bool {
    t.lower.contains("read") && FILE_EXTENSIONS.iter().any(|ext| t.cleaned.contains(ext))
}

fn file_read(t: &Text) -> Classification {
    Classification::new(
        StepType::DetailedAction,
        StepPhase::FileOperation,
        "◎",
        format!("◎ {}", t.cleaned),
    )
    .with_detail(StepDetail::Action {
        kind: ActionKind::Read,
        elapsed_secs: None,
    })
}

fn is_thinking(t: &Text) -> bool {
    t.has_any(&["thought", "thinking"])
}

fn thinking(t: &Text) -> Classification {
    let elapsed_secs = SECONDS
        .captures(t.cleaned)
        .and_then(|caps| caps[1].parse().ok());
    let message = match elapsed_secs {
        Some(secs) => format!("◌ Thought for {secs} seconds"),
        None => "◌ Thinking".to_string(),
    };
    Classification::new(StepType::DetailedAction, StepPhase::Reasoning, "◌", message).with_detail(
        StepDetail::Action {
            kind: ActionKind::Thinking,
            elapsed_secs,
        },
    )
}

fn is_execution(t: &Text) -> bool {
    t.has_any(&["executing", "running"])
}

fn execution(t: &Text) -> Classification {
    Classification::new(
        StepType::DetailedAction,
        StepPhase::Execution,
        "⚡",
        format!("⚡ {}", t.cleaned),
    )
    .with_detail(StepDetail::Action {
        kind: ActionKind::Execution,
        elapsed_secs: None,
    })
}

fn is_generic(t: &Text) -> bool {
    t.cleaned.chars().count() > FALLBACK_MIN_CHARS && !t.has_any(FRAMING_WORDS)
}

fn generic(t: &Text) -> Classification {
    Classification::generic(t.cleaned, FALLBACK_MESSAGE_CHARS)
}

/// Keep at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> Option<StepType> {
        classify(text).map(|c| c.step_type)
    }

    #[test]
    fn test_tasks_completed_extracts_count() {
        let step = classify("Task 3 completed successfully").unwrap();
        assert_eq!(step.step_type, StepType::TasksCompleted);
        assert_eq!(step.phase, StepPhase::Completion);
        assert_eq!(step.count(), Some(3));
        assert_eq!(step.message, "◉ 3 tasks completed");
    }

    #[test]
    fn test_task_execution_variants() {
        let step = classify("Executing step 2 of the plan").unwrap();
        assert_eq!(step.step_type, StepType::TaskExecution);
        assert_eq!(step.task_number(), Some(2));
        assert_eq!(step.message, "◦ Task 2: In progress");

        let step = classify("Dispatching tasks").unwrap();
        assert_eq!(step.step_type, StepType::TaskExecution);
        assert_eq!(step.detail, StepDetail::None);
        assert_eq!(step.message, "⚡ Processing tasks");
    }

    #[test]
    fn test_earlier_rule_wins() {
        // "search" and "task" both match; the task rule is declared first.
        assert_eq!(kind("Search for tasks"), Some(StepType::TaskExecution));
        // "agent" outranks everything else.
        assert_eq!(kind("Agent is searching the docs"), Some(StepType::Starting));
        // "processing" outranks "answer".
        assert_eq!(kind("Processing the answer"), Some(StepType::Progress));
    }

    #[test]
    fn test_each_rule_is_reachable() {
        assert_eq!(kind("Stream started"), Some(StepType::Starting));
        assert_eq!(kind("Work in progress"), Some(StepType::Progress));
        assert_eq!(kind("Analyzing complex query"), Some(StepType::Decomposing));
        assert_eq!(kind("Looking up sources"), Some(StepType::Search));
        assert_eq!(kind("Coordinating workers"), Some(StepType::Orchestration));
        assert_eq!(kind("Gathering results"), Some(StepType::Compilation));
        assert_eq!(kind("Synthesizing"), Some(StepType::Synthesis));
        assert_eq!(kind("All done!"), Some(StepType::TasksCompleted));
        assert_eq!(kind("Read progress.go"), Some(StepType::Progress));
        assert_eq!(kind("Read main.py"), Some(StepType::DetailedAction));
        assert_eq!(kind("Thought for 4 seconds"), Some(StepType::DetailedAction));
        assert_eq!(kind("Running cargo"), Some(StepType::DetailedAction));
        assert_eq!(kind("Hmm, interesting idea here"), Some(StepType::Processing));
        assert_eq!(rule_names().count(), 13);
    }

    #[test]
    fn test_detailed_actions() {
        let read = classify("Read main.py").unwrap();
        assert_eq!(read.message, "◎ Read main.py");
        assert_eq!(
            read.detail,
            StepDetail::Action {
                kind: ActionKind::Read,
                elapsed_secs: None
            }
        );

        let thought = classify("Thought for 12 seconds").unwrap();
        assert_eq!(thought.message, "◌ Thought for 12 seconds");
        assert_eq!(
            thought.detail,
            StepDetail::Action {
                kind: ActionKind::Thinking,
                elapsed_secs: Some(12)
            }
        );

        assert_eq!(classify("thinking...").unwrap().message, "◌ Thinking");
    }

    #[test]
    fn test_short_or_framing_text_yields_nothing() {
        assert_eq!(classify("ok"), None);
        assert_eq!(classify("1234567890"), None);
        assert_eq!(classify("  "), None);
        assert_eq!(classify("received sse bytes ok"), None);
        assert_eq!(classify("partial chunk arrived"), None);
    }

    #[test]
    fn test_generic_fallback_truncates() {
        let long = "x".repeat(80);
        let step = classify(&long).unwrap();
        assert_eq!(step.step_type, StepType::Processing);
        assert_eq!(step.message, format!("∘ {}...", "x".repeat(50)));
    }

    #[test]
    fn test_clean_text_strips_artifacts() {
        assert_eq!(clean_text("[2A][K]Compiling (1.25s)"), "Compiling");
        assert_eq!(clean_text("\x1b[2KLoading\x1b[0m index"), "Loading index");
        assert_eq!(clean_text("event: progress data"), "data");
        assert_eq!(clean_text("a\n\n  b\tc"), "a b c");
    }

    #[test]
    fn test_classification_is_deterministic() {
        for text in ["Task 3 completed", "Searching", "Thought for 2 seconds", "zz"] {
            assert_eq!(classify(text), classify(text));
        }
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("ééé", 2), "éé...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
