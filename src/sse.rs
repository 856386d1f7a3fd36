//! Server-Sent Events (SSE) frame splitting.
//!
//! The transport delivers bytes in arbitrarily sized pieces. This module
//! turns them back into complete frames, where a frame is everything up to
//! a blank line:
//!
//! ```text
//! data: {"type": "progress", "content": "Searching docs"}
//!
//! data: {"type": "answer_chunk", "content": "Hello"}\r\n\r\n
//! ```
//!
//! Both `\r\n\r\n` and `\n\n` terminate a frame.

/// The standard SSE frame delimiter.
pub const STANDARD_DELIMITER: &str = "\r\n\r\n";

/// The bare-newline delimiter some servers emit instead.
pub const ALT_DELIMITER: &str = "\n\n";

/// Field prefix for lines carrying a payload.
pub const DATA_PREFIX: &str = "data: ";

/// One delimiter-bounded unit of the wire stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    text: String,
}

impl Frame {
    /// Wrap raw frame text (without its delimiter).
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The raw text of the frame.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the frame has no content at all.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Lines of the frame, accepting `\n` or `\r\n` endings.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
    }

    /// Payloads of every `data: ` line, in order.
    ///
    /// # Example
    /// ```
    /// use ragstream::sse::Frame;
    ///
    /// let frame = Frame::new("event: x\r\ndata: one\ndata: two");
    /// assert_eq!(frame.data_lines().collect::<Vec<_>>(), vec!["one", "two"]);
    /// ```
    pub fn data_lines(&self) -> impl Iterator<Item = &str> {
        self.lines().filter_map(parse_sse_line)
    }
}

/// Stateful splitter that accumulates text and emits complete frames.
///
/// The buffer only grows by appended chunks and only shrinks by removing one
/// parsed frame plus its delimiter at a time.
///
/// # Example
/// ```
/// use ragstream::sse::FrameParser;
///
/// let mut parser = FrameParser::new();
/// assert!(parser.feed("data: {\"type\":\"progress\",\"content\":\"Sear").is_empty());
///
/// let frames = parser.feed("ching docs\"}\n\n");
/// assert_eq!(frames.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every frame completed by it, in byte order.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some((end, delimiter_len)) = find_delimiter(&self.buffer) {
            frames.push(Frame::new(&self.buffer[..end]));
            self.buffer.drain(..end + delimiter_len);
        }
        frames
    }

    /// Text received but not yet terminated by a delimiter.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Consume the parser, returning leftover text as a final frame.
    ///
    /// Whitespace-only leftovers are dropped.
    pub fn finish(self) -> Option<Frame> {
        if self.buffer.trim().is_empty() {
            None
        } else {
            Some(Frame::new(self.buffer))
        }
    }
}

/// Locate the earliest frame delimiter, returning its index and length.
///
/// Whichever delimiter starts first wins; on a tie the standard one is used.
pub fn find_delimiter(buffer: &str) -> Option<(usize, usize)> {
    let standard = buffer.find(STANDARD_DELIMITER);
    let alt = buffer.find(ALT_DELIMITER);

    match (standard, alt) {
        (Some(s), Some(a)) if a < s => Some((a, ALT_DELIMITER.len())),
        (Some(s), _) => Some((s, STANDARD_DELIMITER.len())),
        (None, Some(a)) => Some((a, ALT_DELIMITER.len())),
        (None, None) => None,
    }
}

/// Parse an SSE line to extract the data portion.
///
/// Unlike a generic SSE reader, the remainder is returned untrimmed except
/// for a trailing carriage return.
///
/// # Example
/// ```
/// use ragstream::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"key\": \"value\"}"), Some("{\"key\": \"value\"}"));
/// assert_eq!(parse_sse_line("event: progress"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
        .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two transport reads is held back
/// until its remaining bytes arrive. Genuinely invalid sequences are
/// replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` (plus any carried bytes) as possible.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let carried = rest.to_vec();
        self.pending = carried;
        out
    }

    /// Flush carried bytes at end of stream.
    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}
