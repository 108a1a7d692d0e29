/// How many bytes of recently-scanned input are retained for error context
/// snippets. Old bytes slide out in streaming mode.
const CONTEXT_WINDOW: usize = 256;

/// How many bytes around an offset go into a context snippet.
const CONTEXT_SPAN: usize = 24;

/// The position document: the sorted newline-offset index of one logical
/// document, plus a bounded window of recently-seen bytes used to produce
/// context snippets without retaining the whole input.
///
/// The scanner owns the doc and records every byte it consumes; downstream
/// stages borrow it to resolve raw offsets into [`Position`]s.
#[derive(Clone, Debug, Default)]
pub struct PositionDoc {
    /// Offsets of line breaks, ascending. A break's offset is that of its
    /// final byte (`\n` for `\r\n`).
    newlines: Vec<usize>,
    /// Total bytes recorded so far.
    len: usize,
    /// Absolute offset of `window[0]`.
    window_start: usize,
    window: Vec<u8>,
}

impl PositionDoc {
    pub fn new() -> PositionDoc {
        PositionDoc::default()
    }

    /// Total number of bytes recorded.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record one consumed input byte. `is_break` marks the byte as ending a
    /// line (the `\n` of `\n`/`\r\n`, or a lone `\r`).
    pub(crate) fn record(&mut self, byte: u8, is_break: bool) {
        if is_break {
            self.newlines.push(self.len);
        }
        self.window.push(byte);
        self.len += 1;
        if self.window.len() > CONTEXT_WINDOW {
            let excess = self.window.len() - CONTEXT_WINDOW;
            self.window.drain(..excess);
            self.window_start += excess;
        }
    }

    /// Resolve an absolute byte offset to a 1-based (line, column) pair by
    /// binary search over the newline index.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = self.newlines.partition_point(|&nl| nl < offset);
        let line_start = if line == 0 { 0 } else { self.newlines[line - 1] + 1 };
        (line + 1, offset - line_start + 1)
    }

    /// A short lossy snippet of the bytes around `offset`, or the empty
    /// string when the offset has slid out of the streaming window.
    pub fn context(&self, offset: usize) -> String {
        if offset < self.window_start {
            return String::new();
        }
        let rel = offset - self.window_start;
        let start = rel.saturating_sub(CONTEXT_SPAN / 2);
        let end = usize::min(rel + CONTEXT_SPAN / 2, self.window.len());
        if start >= end {
            return String::new();
        }
        String::from_utf8_lossy(&self.window[start..end])
            .replace(&['\n', '\r'][..], "\\n")
    }

    /// Resolve an offset into an owned [`Position`].
    pub fn position(&self, offset: usize) -> Position {
        let (line, column) = self.line_col(offset);
        Position {
            offset,
            line,
            column,
            context: self.context(offset),
        }
    }
}

/// A resolved position in the input: absolute byte offset, 1-based line and
/// column, and a short context snippet for error messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Position {
    /// The absolute byte offset.
    pub offset: usize,
    /// The 1-based line number.
    pub line: usize,
    /// The 1-based column number.
    pub column: usize,
    /// A short snippet of the surrounding bytes; may be empty in streaming
    /// mode when the bytes have slid out of the context window.
    pub context: String,
}

impl Position {
    /// A position with no document behind it (offset only).
    pub fn at(offset: usize) -> Position {
        Position {
            offset,
            line: 1,
            column: offset + 1,
            context: String::new(),
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.context.is_empty() {
            write!(
                f,
                "at offset {} (line={}, col={})",
                self.offset, self.line, self.column
            )
        } else {
            write!(
                f,
                "at `...{}...` at offset {} (line={}, col={})",
                self.context, self.offset, self.line, self.column
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_of(input: &[u8]) -> PositionDoc {
        let mut doc = PositionDoc::new();
        for &b in input {
            doc.record(b, b == b'\n');
        }
        doc
    }

    #[test]
    fn line_col_agrees_with_newline_index() {
        let doc = doc_of(b"ab\ncd\n\nxyz");
        assert_eq!(doc.line_col(0), (1, 1));
        assert_eq!(doc.line_col(1), (1, 2));
        assert_eq!(doc.line_col(2), (1, 3)); // the break itself
        assert_eq!(doc.line_col(3), (2, 1));
        assert_eq!(doc.line_col(6), (3, 1));
        assert_eq!(doc.line_col(7), (4, 1));
        assert_eq!(doc.line_col(9), (4, 3));
    }

    #[test]
    fn offsets_stay_in_range() {
        let input = b"a: 1\nb: 2\n";
        let doc = doc_of(input);
        for offset in 0..=input.len() {
            let pos = doc.position(offset);
            assert!(pos.offset <= input.len());
            assert!(pos.line >= 1 && pos.column >= 1);
        }
    }

    #[test]
    fn context_slides_in_streaming_mode() {
        let mut doc = PositionDoc::new();
        for i in 0..10_000usize {
            doc.record(b'a' + (i % 26) as u8, false);
        }
        assert_eq!(doc.context(0), "");
        assert!(!doc.context(9_990).is_empty());
    }

    #[test]
    fn display_form() {
        let doc = doc_of(b"key: oops");
        let pos = doc.position(5);
        let text = pos.to_string();
        assert!(text.contains("offset 5"), "{text}");
        assert!(text.contains("line=1"), "{text}");
        assert!(text.contains("col=6"), "{text}");
        assert!(text.contains("oops"), "{text}");
    }
}
