//! Answer text accumulation and filtering.

use once_cell::sync::Lazy;
use regex::Regex;

/// Shown instead of an empty final answer.
pub const NO_RESPONSE_MESSAGE: &str = "No response received or empty response. \
     Check that the RAG contains documents relevant to your question.";

/// Characters an agent chunk must exceed to count as answer text.
pub const MIN_AGENT_CHUNK_CHARS: usize = 30;

/// Prefix length used to detect a chunk that was already appended.
const DUPLICATE_PREFIX_CHARS: usize = 50;

/// Emojis agent runs use to announce steps inside answer chunks.
pub const STEP_EMOJIS: &[&str] = &["🚀", "📋", "⚡", "🔍", "🎯", "📊", "🔄", "✅"];

/// Phrases that mark an agent chunk as a status line.
const STATUS_PHRASES: &[&str] = &[
    "Auto-detected",
    "Starting agent",
    "Analyzing complex",
    "Decomposed into",
    "Task ",
    "Orchestration",
    "Search for",
    "Compile and present",
    "Synthesizing",
    "terminées",
    "RAG system",
    "model ",
    "Loading",
];

const THOUGHT_OPEN: &str = "<think>";

static HIDDEN_THOUGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Remove closed `<think>...</think>` spans and trim.
///
/// An opening marker without its closing pair is left as is.
///
/// # Example
/// ```
/// use ragstream::answer::strip_hidden_thoughts;
///
/// assert_eq!(strip_hidden_thoughts("<think>plan</think> Paris."), "Paris.");
/// assert_eq!(strip_hidden_thoughts("Use a <think> tag."), "Use a <think> tag.");
/// ```
pub fn strip_hidden_thoughts(text: &str) -> String {
    HIDDEN_THOUGHT.replace_all(text, "").trim().to_string()
}

/// Like [`strip_hidden_thoughts`], but also hides an unterminated span that
/// may still be streaming.
pub fn strip_open_thoughts(text: &str) -> String {
    let closed = HIDDEN_THOUGHT.replace_all(text, "");
    let shown = match closed.find(THOUGHT_OPEN) {
        Some(open) => &closed[..open],
        None => &closed[..],
    };
    shown.trim().to_string()
}

pub fn has_step_emoji(text: &str) -> bool {
    STEP_EMOJIS.iter().any(|emoji| text.contains(emoji))
}

/// Final state of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalAnswer {
    pub text: String,
    /// Set when `text` is the no-response marker
    pub is_error: bool,
}

/// Raw answer text of one session.
///
/// Hidden-thought spans may straddle chunk boundaries, so they are stripped
/// from the whole accumulation rather than per chunk.
#[derive(Debug, Clone, Default)]
pub struct AnswerAccumulator {
    raw: String,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.raw.push_str(chunk);
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Text as it should be displayed while the answer is still streaming.
    pub fn visible(&self) -> String {
        strip_open_thoughts(&self.raw)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Final text. Only closed thought spans are removed.
    pub fn finish(&self) -> FinalAnswer {
        let text = strip_hidden_thoughts(&self.raw);
        if text.is_empty() {
            FinalAnswer {
                text: NO_RESPONSE_MESSAGE.to_string(),
                is_error: true,
            }
        } else {
            FinalAnswer {
                text,
                is_error: false,
            }
        }
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }
}

/// Decide whether a cleaned agent chunk belongs to the visible answer.
pub fn is_agent_answer_text(cleaned: &str) -> bool {
    cleaned.chars().count() > MIN_AGENT_CHUNK_CHARS
        && !has_step_emoji(cleaned)
        && !STATUS_PHRASES.iter().any(|phrase| cleaned.contains(phrase))
}

/// Append `chunk` to `answer` unless its opening is already present.
///
/// Returns whether anything was appended. A single space is inserted when
/// neither side already provides whitespace.
pub fn join_agent_chunk(answer: &mut String, chunk: &str) -> bool {
    let prefix_end = chunk
        .char_indices()
        .nth(DUPLICATE_PREFIX_CHARS)
        .map_or(chunk.len(), |(at, _)| at);
    if answer.contains(&chunk[..prefix_end]) {
        return false;
    }

    let needs_space = !answer.is_empty()
        && !answer.ends_with(' ')
        && !answer.ends_with('\n')
        && !chunk.starts_with(' ');
    if needs_space {
        answer.push(' ');
    }
    answer.push_str(chunk);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hidden_thoughts() {
        assert_eq!(strip_hidden_thoughts("<think>a\nb</think>\nAnswer"), "Answer");
        assert_eq!(strip_hidden_thoughts("A <think>x</think>B<think>y</think>"), "A B");
        assert_eq!(strip_hidden_thoughts("  plain  "), "plain");
        assert_eq!(strip_open_thoughts("Paris. <think>still going"), "Paris.");
        assert_eq!(strip_open_thoughts("<think>a</think>B <think>c"), "B");
    }

    #[test]
    fn test_unterminated_marker_survives_finish() {
        let mut answer = AnswerAccumulator::new();
        answer.push("Use the <think> tag to wrap reasoning in prompts.");
        assert_eq!(answer.visible(), "Use the");

        let done = answer.finish();
        assert_eq!(done.text, "Use the <think> tag to wrap reasoning in prompts.");
        assert!(!done.is_error);

        answer.clear();
        answer.push("<think>truncated reasoning");
        assert_eq!(answer.finish().text, "<think>truncated reasoning");
    }

    #[test]
    fn test_thought_split_across_chunks() {
        let mut answer = AnswerAccumulator::new();
        answer.push("<thi");
        answer.push("nk>reasoning");
        assert_eq!(answer.visible(), "");
        answer.push("</think>The answer");
        assert_eq!(answer.visible(), "The answer");
    }

    #[test]
    fn test_empty_answer_becomes_no_response_error() {
        let mut answer = AnswerAccumulator::new();
        answer.push("<think>only thoughts</think>   ");
        assert_eq!(
            answer.finish(),
            FinalAnswer {
                text: NO_RESPONSE_MESSAGE.to_string(),
                is_error: true
            }
        );

        answer.clear();
        answer.push(" 42 ");
        assert_eq!(answer.finish().text, "42");
        assert!(!answer.finish().is_error);
    }

    #[test]
    fn test_agent_answer_filter() {
        assert!(is_agent_answer_text(
            "The handbook describes three onboarding phases in detail."
        ));
        assert!(!is_agent_answer_text("Too short to matter."));
        assert!(!is_agent_answer_text(
            "Task 2 finished gathering all relevant handbook pages"
        ));
        assert!(!is_agent_answer_text(
            "✅ The handbook describes three onboarding phases"
        ));
    }

    #[test]
    fn test_join_agent_chunk_spacing_and_duplicates() {
        let mut answer = String::new();
        assert!(join_agent_chunk(&mut answer, "First sentence of the answer."));
        assert!(join_agent_chunk(&mut answer, "Second sentence follows here."));
        assert_eq!(answer, "First sentence of the answer. Second sentence follows here.");

        assert!(!join_agent_chunk(&mut answer, "Second sentence follows here."));
        assert!(join_agent_chunk(&mut answer, "\nThird."));
        assert!(answer.ends_with("here. \nThird."));
    }
}
