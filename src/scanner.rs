use std::collections::VecDeque;

use crate::error::TokenizeError;
use crate::macros::{is_blank, is_break, is_structural, is_word};
use crate::position::{Position, PositionDoc};
use crate::token::{Chomp, Token, TokenData};
use crate::Format;

/// The streaming tokenizer.
///
/// Bytes go in through [`Scanner::feed`]; complete tokens come out of
/// [`Scanner::read`]. When the buffered input is not enough to classify the
/// next token (an unterminated string, an open block literal), `read`
/// reports [`ScanStatus::NeedMore`] — a back-pressure signal, not an error —
/// and the caller feeds another chunk and retries. Nothing partial is ever
/// consumed, so trailing whitespace and half-finished lines carry across
/// chunk boundaries unharmed.
#[derive(Debug)]
pub struct Scanner {
    format: Format,
    buf: VecDeque<u8>,
    /// Absolute offset of `buf[0]`.
    offset: usize,
    eof: bool,
    doc: PositionDoc,

    /// Offset of the current line's first column.
    line_start: usize,
    /// Leading spaces of the current line.
    line_indent: usize,
    /// Has a key/value `:` been seen on this line?
    colon_seen: bool,
    /// Has a value token been emitted on this line?
    value_seen: bool,
    /// Pending initial/after-break indent scan.
    at_line_start: bool,

    curly: usize,
    square: usize,
}

/// What a [`Scanner::read`] call produced.
#[derive(Debug)]
#[non_exhaustive]
pub struct ScanBatch {
    /// Complete tokens, in source order.
    pub tokens: Vec<Token>,
    /// Whether the scanner wants more input.
    pub status: ScanStatus,
}

/// The scanner's resumption state after a read.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScanStatus {
    /// The buffer ran dry mid-token; feed more bytes and call `read` again.
    NeedMore,
    /// All input is tokenized.
    Done,
}

enum Progress {
    Made,
    NeedMore,
    Finished,
}

/// Tokenize a whole in-memory document.
pub fn tokenize(
    input: &[u8],
    format: Format,
) -> Result<(Vec<Token>, PositionDoc), TokenizeError> {
    let mut scanner = Scanner::new(format);
    scanner.feed(input);
    scanner.finish();
    let batch = scanner.read()?;
    assert!(
        matches!(batch.status, ScanStatus::Done),
        "finished scanner cannot need more input"
    );
    Ok((batch.tokens, scanner.into_position_doc()))
}

impl Scanner {
    pub fn new(format: Format) -> Scanner {
        Scanner {
            format,
            buf: VecDeque::with_capacity(1024),
            offset: 0,
            eof: false,
            doc: PositionDoc::new(),
            line_start: 0,
            line_indent: 0,
            colon_seen: false,
            value_seen: false,
            at_line_start: true,
            curly: 0,
            square: 0,
        }
    }

    /// Append a chunk of input.
    pub fn feed(&mut self, chunk: &[u8]) {
        assert!(!self.eof, "feed after finish");
        self.buf.extend(chunk.iter().copied());
    }

    /// Declare that no more input will arrive.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// The position document accumulated so far.
    pub fn position_doc(&self) -> &PositionDoc {
        &self.doc
    }

    pub fn into_position_doc(self) -> PositionDoc {
        self.doc
    }

    /// Drain as many complete tokens as the buffer allows.
    pub fn read(&mut self) -> Result<ScanBatch, TokenizeError> {
        let mut tokens = Vec::new();
        let status = loop {
            match self.step(&mut tokens)? {
                Progress::Made => {}
                Progress::NeedMore => break ScanStatus::NeedMore,
                Progress::Finished => break ScanStatus::Done,
            }
        };
        Ok(ScanBatch { tokens, status })
    }

    fn peek(&self, i: usize) -> Option<u8> {
        self.buf.get(i).copied()
    }

    /// `true` when lookahead at `i` ran past the buffer mid-stream.
    fn starved(&self, i: usize) -> bool {
        self.peek(i).is_none() && !self.eof
    }

    /// Consume `n` bytes, recording them (and any line breaks) in the
    /// position doc.
    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            let b = self.buf.pop_front().expect("advance past end of buffer");
            let ends_line = b == b'\n' || (b == b'\r' && self.buf.front() != Some(&b'\n'));
            self.doc.record(b, ends_line);
            self.offset += 1;
        }
    }

    fn bytes(&self, start: usize, end: usize) -> Vec<u8> {
        self.buf.iter().skip(start).take(end - start).copied().collect()
    }

    /// Resolve an error position for the (possibly unconsumed) byte at
    /// relative index `rel`, with a context snippet from the buffer.
    fn err_pos(&self, rel: usize) -> Position {
        let (mut line, mut column) = self.doc.line_col(self.offset);
        for j in 0..rel.min(self.buf.len()) {
            if self.buf[j] == b'\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        let start = rel.saturating_sub(12);
        let end = usize::min(rel + 12, self.buf.len());
        let context = if start < end {
            String::from_utf8_lossy(&self.bytes(start, end)).replace(&['\n', '\r'][..], "\\n")
        } else {
            String::new()
        };
        Position {
            offset: self.offset + rel,
            line,
            column,
            context,
        }
    }

    fn emit(&mut self, out: &mut Vec<Token>, data: TokenData, len: usize) {
        let token = Token::new(data, self.bytes(0, len), self.offset);
        match &token.data {
            TokenData::Indent
            | TokenData::DocSeparator
            | TokenData::Dash
            | TokenData::HeadComment { .. }
            | TokenData::LineComment { .. } => {}
            TokenData::Colon => self.colon_seen = true,
            _ => self.value_seen = true,
        }
        self.advance(len);
        out.push(token);
    }

    fn step(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        if self.at_line_start {
            let mut i = 0;
            while CHECK_AT!(self.buf, b' ', i) {
                i += 1;
            }
            if self.starved(i) {
                return Ok(Progress::NeedMore);
            }
            self.line_start = self.offset;
            self.line_indent = i;
            self.colon_seen = false;
            self.value_seen = false;
            self.at_line_start = false;
            self.emit(out, TokenData::Indent, i);
            return Ok(Progress::Made);
        }

        let Some(b) = self.peek(0) else {
            return Ok(if self.eof {
                Progress::Finished
            } else {
                Progress::NeedMore
            });
        };

        match b {
            b'\n' | b'\r' => {
                let width = if b == b'\r' {
                    if self.starved(1) {
                        return Ok(Progress::NeedMore);
                    }
                    if self.peek(1) == Some(b'\n') {
                        2
                    } else {
                        1
                    }
                } else {
                    1
                };
                self.advance(width);
                self.at_line_start = true;
                Ok(Progress::Made)
            }
            b' ' | b'\t' => self.scan_blanks_or_comment(out),
            b'#' => {
                if self.format == Format::Json {
                    return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                }
                self.scan_comment(out, 0)
            }
            b'{' => {
                self.curly += 1;
                self.emit(out, TokenData::CurlyOpen, 1);
                Ok(Progress::Made)
            }
            b'[' => {
                self.square += 1;
                self.emit(out, TokenData::SquareOpen, 1);
                Ok(Progress::Made)
            }
            b'}' => {
                if self.curly == 0 {
                    return Err(TokenizeError::StrayClose(self.err_pos(0)));
                }
                self.curly -= 1;
                self.emit(out, TokenData::CurlyClose, 1);
                Ok(Progress::Made)
            }
            b']' => {
                if self.square == 0 {
                    return Err(TokenizeError::StrayClose(self.err_pos(0)));
                }
                self.square -= 1;
                self.emit(out, TokenData::SquareClose, 1);
                Ok(Progress::Made)
            }
            b',' => {
                self.emit(out, TokenData::Comma, 1);
                Ok(Progress::Made)
            }
            b':' => {
                self.emit(out, TokenData::Colon, 1);
                Ok(Progress::Made)
            }
            b'-' => self.scan_dash(out),
            b'"' | b'\'' => self.scan_flow_scalar(out, b),
            b'|' => {
                if self.format == Format::Json || self.curly + self.square > 0 {
                    return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                }
                self.scan_block_literal(out)
            }
            b'!' => {
                if self.format == Format::Json {
                    return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                }
                self.scan_tag(out)
            }
            b'<' if self.format != Format::Json => {
                if self.starved(1) {
                    return Ok(Progress::NeedMore);
                }
                if self.peek(1) == Some(b'<') {
                    self.emit(out, TokenData::MergeKey, 2);
                    Ok(Progress::Made)
                } else {
                    self.scan_plain(out)
                }
            }
            b'0'..=b'9' => self.scan_number(out),
            b'n' | b't' | b'f' => self.scan_keyword(out),
            _ => {
                if self.format == Format::Json {
                    return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                }
                if self.format == Format::Yaml {
                    // Reserved starts in the YAML subset: directives in
                    // column 0, explicit keys, anchors/aliases, `@`/"`".
                    if b == b'%' && self.offset == self.line_start {
                        return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                    }
                    if matches!(b, b'@' | b'`' | b'*' | b'&') {
                        return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                    }
                    if b == b'?' {
                        if self.starved(1) {
                            return Ok(Progress::NeedMore);
                        }
                        if IS_BLANKZ_AT!(self.buf, 1) {
                            return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
                        }
                    }
                }
                self.scan_plain(out)
            }
        }
    }

    /// A blank run, which either vanishes or prefixes a comment token.
    fn scan_blanks_or_comment(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        let mut i = 0;
        while IS_BLANK_AT!(self.buf, i) {
            i += 1;
        }
        if self.starved(i) {
            return Ok(Progress::NeedMore);
        }
        if self.peek(i) == Some(b'#') && self.format != Format::Json {
            return self.scan_comment(out, i);
        }
        self.advance(i);
        Ok(Progress::Made)
    }

    /// A comment running to end of line. `hash` is the relative index of
    /// `#`; bytes before it are the preserved whitespace gap.
    fn scan_comment(&mut self, out: &mut Vec<Token>, hash: usize) -> Result<Progress, TokenizeError> {
        let mut end = hash + 1;
        while let Some(c) = self.peek(end) {
            if is_break(c) {
                break;
            }
            end += 1;
        }
        if self.starved(end) {
            return Ok(Progress::NeedMore);
        }
        let mut text_bytes = self.bytes(hash + 1, end);
        if text_bytes.first() == Some(&b' ') {
            text_bytes.remove(0);
        }
        let text = String::from_utf8_lossy(&text_bytes).into_owned();
        let data = if self.colon_seen || self.value_seen {
            TokenData::LineComment { text }
        } else {
            TokenData::HeadComment { text }
        };
        self.emit(out, data, end);
        Ok(Progress::Made)
    }

    fn scan_dash(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        // A `---` line in column 0 separates documents.
        if self.offset == self.line_start
            && CHECK_AT!(self.buf, b'-', 1)
            && CHECK_AT!(self.buf, b'-', 2)
        {
            if self.starved(3) {
                return Ok(Progress::NeedMore);
            }
            if IS_BLANKZ_AT!(self.buf, 3) {
                self.emit(out, TokenData::DocSeparator, 3);
                return Ok(Progress::Made);
            }
        }
        if self.starved(1) {
            return Ok(Progress::NeedMore);
        }
        if self.format == Format::Json {
            return self.scan_number(out);
        }
        if IS_BLANKZ_AT!(self.buf, 1) {
            self.emit(out, TokenData::Dash, 1);
            return Ok(Progress::Made);
        }
        if IS_DIGIT_AT!(self.buf, 1) {
            return self.scan_number(out);
        }
        self.scan_plain(out)
    }

    fn scan_keyword(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        // "false" plus one boundary byte is the longest lookahead needed.
        if self.buf.len() < 6 && !self.eof {
            return Ok(Progress::NeedMore);
        }
        for (word, data) in [
            ("null", TokenData::Null),
            ("true", TokenData::True),
            ("false", TokenData::False),
        ] {
            let len = word.len();
            let matches = word
                .bytes()
                .enumerate()
                .all(|(i, w)| self.peek(i) == Some(w));
            if matches && !is_word(self.peek(len)) {
                self.emit(out, data, len);
                return Ok(Progress::Made);
            }
        }
        if self.format == Format::Json {
            return Err(TokenizeError::UnexpectedCharacter(self.err_pos(0)));
        }
        self.scan_plain(out)
    }

    fn scan_number(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        let mut i = 0;
        if CHECK!(self.buf, b'-') {
            i += 1;
        }
        let digits = i;
        while IS_DIGIT_AT!(self.buf, i) {
            i += 1;
        }
        if self.starved(i) {
            return Ok(Progress::NeedMore);
        }
        if i == digits {
            // A bare `-` reached only in JSON mode.
            return Err(TokenizeError::MalformedNumber(self.err_pos(0)));
        }
        // Only rejected once the token is confirmed to be a number; a
        // plain scalar like `00x` is fine.
        let leading_zero = self.peek(digits) == Some(b'0') && i > digits + 1;
        let mut float = false;
        if self.peek(i) == Some(b'.') {
            if self.starved(i + 1) {
                return Ok(Progress::NeedMore);
            }
            if IS_DIGIT_AT!(self.buf, i + 1) {
                float = true;
                i += 2;
                while IS_DIGIT_AT!(self.buf, i) {
                    i += 1;
                }
                if self.starved(i) {
                    return Ok(Progress::NeedMore);
                }
            } else {
                return self.number_fallback(out);
            }
        }
        if matches!(self.peek(i), Some(b'e' | b'E')) {
            let mut j = i + 1;
            if matches!(self.peek(j), Some(b'+' | b'-')) {
                j += 1;
            }
            let exp_digits = j;
            while IS_DIGIT_AT!(self.buf, j) {
                j += 1;
            }
            if self.starved(j) {
                return Ok(Progress::NeedMore);
            }
            if j == exp_digits {
                return self.number_fallback(out);
            }
            float = true;
            i = j;
        }
        // The number must end at a boundary, else it was a plain scalar
        // all along ("1.2.3", "12:30", "1px").
        let bounded = match self.peek(i) {
            None => true,
            Some(c) if is_blank(c) || is_break(c) => true,
            Some(b',' | b']' | b'}') => true,
            Some(b':') => {
                if self.starved(i + 1) {
                    return Ok(Progress::NeedMore);
                }
                self.format == Format::Json || IS_BLANKZ_AT!(self.buf, i + 1)
            }
            _ => false,
        };
        if !bounded {
            return self.number_fallback(out);
        }
        if leading_zero {
            return Err(TokenizeError::LeadingZero(self.err_pos(digits)));
        }
        let data = if float {
            TokenData::Float
        } else {
            TokenData::Integer
        };
        self.emit(out, data, i);
        Ok(Progress::Made)
    }

    fn number_fallback(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        if self.format == Format::Json {
            return Err(TokenizeError::MalformedNumber(self.err_pos(0)));
        }
        self.scan_plain(out)
    }

    /// A plain (unquoted) scalar, Tony/YAML only.
    fn scan_plain(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        let mut i = 0;
        loop {
            match self.peek(i) {
                None => {
                    if !self.eof {
                        return Ok(Progress::NeedMore);
                    }
                    break;
                }
                Some(c) if is_break(c) => break,
                Some(b'#') if i > 0 && is_blank(self.buf[i - 1]) => break,
                Some(b':') => {
                    if self.starved(i + 1) {
                        return Ok(Progress::NeedMore);
                    }
                    if IS_BLANKZ_AT!(self.buf, i + 1) {
                        break;
                    }
                    i += 1;
                }
                Some(c) if is_structural(c) && self.curly + self.square > 0 => break,
                Some(c) if c < 0x20 && c != b'\t' => {
                    return Err(TokenizeError::ControlCharacter(self.err_pos(i)));
                }
                Some(c) if c >= 0x80 => match self.utf8_at(i)? {
                    Some((_, width)) => i += width,
                    None => return Ok(Progress::NeedMore),
                },
                Some(_) => i += 1,
            }
        }
        let mut len = i;
        while len > 0 && is_blank(self.buf[len - 1]) {
            len -= 1;
        }
        assert!(len > 0, "plain scalar cannot be empty");
        self.emit(out, TokenData::Literal, len);
        Ok(Progress::Made)
    }

    /// A quoted string, with Tony multi-line folding when the quote opens
    /// its line outside brackets.
    fn scan_flow_scalar(&mut self, out: &mut Vec<Token>, quote: u8) -> Result<Progress, TokenizeError> {
        if quote == b'\'' && self.format == Format::Json {
            return Err(TokenizeError::SingleQuote(self.err_pos(0)));
        }
        let Some((value, end)) = self.quoted_at(0, quote)? else {
            return Ok(Progress::NeedMore);
        };
        let foldable = self.format == Format::Tony
            && self.curly + self.square == 0
            && self.offset == self.line_start + self.line_indent;
        if !foldable {
            self.emit(out, TokenData::Quoted { value }, end);
            return Ok(Progress::Made);
        }
        self.fold_multistring(out, value, end)
    }

    /// Fold further same-indent quoted lines onto the first one. Comments
    /// on the content lines come out as an aligned block of line-comment
    /// tokens after the string token.
    fn fold_multistring(
        &mut self,
        out: &mut Vec<Token>,
        first: String,
        first_end: usize,
    ) -> Result<Progress, TokenizeError> {
        let mut lines = vec![first];
        // (ws_start, hash, end) of each collected comment, in order.
        let mut comments: Vec<(usize, usize, usize)> = Vec::new();
        let mut committed = first_end;
        let mut cursor = first_end;
        let mut last_line_rel = 0usize;
        loop {
            // Rest of the current content line: blanks, then an optional
            // comment, then the break.
            let mut i = cursor;
            while IS_BLANK_AT!(self.buf, i) {
                i += 1;
            }
            if self.starved(i) {
                return Ok(Progress::NeedMore);
            }
            if self.peek(i) == Some(b'#') {
                let ws = cursor;
                let hash = i;
                let mut e = hash + 1;
                while let Some(c) = self.peek(e) {
                    if is_break(c) {
                        break;
                    }
                    e += 1;
                }
                if self.starved(e) {
                    return Ok(Progress::NeedMore);
                }
                comments.push((ws, hash, e));
                committed = e;
                i = e;
            }
            let width = match self.peek(i) {
                None => break, // eof
                Some(b'\r') => {
                    if self.starved(i + 1) {
                        return Ok(Progress::NeedMore);
                    }
                    if self.peek(i + 1) == Some(b'\n') {
                        2
                    } else {
                        1
                    }
                }
                Some(b'\n') => 1,
                Some(_) => break, // junk after the string ends the fold
            };
            let mut j = i + width;
            let mut spaces = 0;
            while self.peek(j) == Some(b' ') {
                j += 1;
                spaces += 1;
            }
            if self.starved(j) {
                return Ok(Progress::NeedMore);
            }
            match self.peek(j) {
                Some(q @ (b'"' | b'\'')) if spaces == self.line_indent => {
                    let Some((value, line_end)) = self.quoted_at(j, q)? else {
                        return Ok(Progress::NeedMore);
                    };
                    lines.push(value);
                    last_line_rel = i + width;
                    committed = line_end;
                    cursor = line_end;
                }
                _ => break,
            }
        }
        if lines.len() == 1 {
            // Not a fold after all; trailing comments rescan normally.
            let value = lines.pop().expect("single folded line");
            self.emit(out, TokenData::Quoted { value }, first_end);
            return Ok(Progress::Made);
        }
        let token = Token::new(
            TokenData::MultiString { lines },
            self.bytes(0, committed),
            self.offset,
        );
        let comment_tokens: Vec<Token> = comments
            .iter()
            .map(|&(ws, hash, end)| {
                let mut text_bytes = self.bytes(hash + 1, end);
                if text_bytes.first() == Some(&b' ') {
                    text_bytes.remove(0);
                }
                Token::new(
                    TokenData::LineComment {
                        text: String::from_utf8_lossy(&text_bytes).into_owned(),
                    },
                    self.bytes(ws, end),
                    self.offset + ws,
                )
            })
            .collect();
        let new_line_start = self.offset + last_line_rel;
        self.advance(committed);
        self.line_start = new_line_start;
        self.value_seen = true;
        out.push(token);
        out.extend(comment_tokens);
        Ok(Progress::Made)
    }

    /// Scan one quoted string starting at relative index `start` without
    /// consuming. Returns the decoded value and the index past the closing
    /// quote, or `None` when more input is needed.
    fn quoted_at(
        &self,
        start: usize,
        quote: u8,
    ) -> Result<Option<(String, usize)>, TokenizeError> {
        let single = quote == b'\'';
        let kind = if single { "single-quoted" } else { "double-quoted" };
        let mut value = String::new();
        let mut i = start + 1;
        loop {
            let Some(b) = self.peek(i) else {
                if self.eof {
                    return Err(TokenizeError::UnterminatedString(self.err_pos(start), kind));
                }
                return Ok(None);
            };
            if b == quote {
                if single {
                    if self.starved(i + 1) {
                        return Ok(None);
                    }
                    if self.peek(i + 1) == Some(b'\'') {
                        value.push('\'');
                        i += 2;
                        continue;
                    }
                }
                return Ok(Some((value, i + 1)));
            }
            if is_break(b) {
                return Err(TokenizeError::UnterminatedString(self.err_pos(start), kind));
            }
            if b == b'\\' && !single {
                match self.escape_at(i)? {
                    Some((ch, width)) => {
                        value.push(ch);
                        i += width;
                    }
                    None => return Ok(None),
                }
                continue;
            }
            if b < 0x20 {
                return Err(TokenizeError::ControlCharacter(self.err_pos(i)));
            }
            if b < 0x80 {
                value.push(b as char);
                i += 1;
                continue;
            }
            match self.utf8_at(i)? {
                Some((ch, width)) => {
                    value.push(ch);
                    i += width;
                }
                None => return Ok(None),
            }
        }
    }

    /// Decode the escape sequence whose `\` sits at relative index `i`.
    fn escape_at(&self, i: usize) -> Result<Option<(char, usize)>, TokenizeError> {
        let Some(c) = self.peek(i + 1) else {
            if self.eof {
                return Err(TokenizeError::InvalidEscape(self.err_pos(i)));
            }
            return Ok(None);
        };
        let simple = match c {
            b'"' => Some('"'),
            b'\\' => Some('\\'),
            b'/' => Some('/'),
            b'b' => Some('\u{08}'),
            b'f' => Some('\u{0c}'),
            b'n' => Some('\n'),
            b'r' => Some('\r'),
            b't' => Some('\t'),
            _ => None,
        };
        if let Some(ch) = simple {
            return Ok(Some((ch, 2)));
        }
        match c {
            b'x' => {
                let Some(hi) = self.hex_at(i + 2, 2)? else {
                    return Ok(None);
                };
                match char::from_u32(hi) {
                    Some(ch) => Ok(Some((ch, 4))),
                    None => Err(TokenizeError::InvalidEscape(self.err_pos(i))),
                }
            }
            b'u' => {
                let Some(unit) = self.hex_at(i + 2, 4)? else {
                    return Ok(None);
                };
                if (0xD800..0xDC00).contains(&unit) {
                    // High surrogate: a paired \uXXXX low surrogate must
                    // follow.
                    if self.starved(i + 7) {
                        return Ok(None);
                    }
                    if self.peek(i + 6) != Some(b'\\') || self.peek(i + 7) != Some(b'u') {
                        return Err(TokenizeError::InvalidEscape(self.err_pos(i)));
                    }
                    let Some(low) = self.hex_at(i + 8, 4)? else {
                        return Ok(None);
                    };
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(TokenizeError::InvalidEscape(self.err_pos(i)));
                    }
                    let cp = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                    match char::from_u32(cp) {
                        Some(ch) => Ok(Some((ch, 12))),
                        None => Err(TokenizeError::InvalidEscape(self.err_pos(i))),
                    }
                } else if (0xDC00..0xE000).contains(&unit) {
                    Err(TokenizeError::InvalidEscape(self.err_pos(i)))
                } else {
                    match char::from_u32(unit) {
                        Some(ch) => Ok(Some((ch, 6))),
                        None => Err(TokenizeError::InvalidEscape(self.err_pos(i))),
                    }
                }
            }
            _ => Err(TokenizeError::InvalidEscape(self.err_pos(i))),
        }
    }

    /// `count` hex digits starting at relative index `at`.
    fn hex_at(&self, at: usize, count: usize) -> Result<Option<u32>, TokenizeError> {
        let mut value = 0u32;
        for k in 0..count {
            let Some(b) = self.peek(at + k) else {
                if self.eof {
                    return Err(TokenizeError::InvalidEscape(self.err_pos(at)));
                }
                return Ok(None);
            };
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| TokenizeError::InvalidEscape(self.err_pos(at + k)))?;
            value = value * 16 + digit;
        }
        Ok(Some(value))
    }

    /// Validate and decode the UTF-8 sequence starting at relative index
    /// `i`. Returns `None` when the sequence runs past the buffer
    /// mid-stream.
    fn utf8_at(&self, i: usize) -> Result<Option<(char, usize)>, TokenizeError> {
        let first = self.buf[i] as u32;
        let (width, mut value) = if first & 0xE0 == 0xC0 {
            (2, first & 0x1F)
        } else if first & 0xF0 == 0xE0 {
            (3, first & 0x0F)
        } else if first & 0xF8 == 0xF0 {
            (4, first & 0x07)
        } else {
            return Err(TokenizeError::InvalidUtf8(self.err_pos(i)));
        };
        for k in 1..width {
            let Some(b) = self.peek(i + k) else {
                if self.eof {
                    return Err(TokenizeError::InvalidUtf8(self.err_pos(i)));
                }
                return Ok(None);
            };
            if b & 0xC0 != 0x80 {
                return Err(TokenizeError::InvalidUtf8(self.err_pos(i + k)));
            }
            value = (value << 6) | (b as u32 & 0x3F);
        }
        let overlong = match width {
            2 => value < 0x80,
            3 => value < 0x800,
            _ => value < 0x10000,
        };
        if overlong {
            return Err(TokenizeError::InvalidUtf8(self.err_pos(i)));
        }
        match char::from_u32(value) {
            Some(ch) => Ok(Some((ch, width))),
            None => Err(TokenizeError::InvalidUtf8(self.err_pos(i))),
        }
    }

    /// A `|` block literal. Content lines are indented at least the `|`
    /// line's indent + 2 and come out dedented by exactly that.
    fn scan_block_literal(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        let mut i = 1;
        let chomp = match self.peek(1) {
            Some(b'-') => {
                i = 2;
                Chomp::Strip
            }
            Some(b'+') => {
                i = 2;
                Chomp::Keep
            }
            None if !self.eof => return Ok(Progress::NeedMore),
            _ => Chomp::Clip,
        };
        while IS_BLANK_AT!(self.buf, i) {
            i += 1;
        }
        if self.starved(i) {
            return Ok(Progress::NeedMore);
        }
        match self.peek(i) {
            None => {
                self.emit(out, TokenData::BlockLiteral { lines: Vec::new(), chomp }, i);
                return Ok(Progress::Made);
            }
            Some(c) if is_break(c) => {}
            Some(_) => return Err(TokenizeError::UnexpectedCharacter(self.err_pos(i))),
        }
        let base = self.line_indent + 2;
        let mut lines: Vec<String> = Vec::new();
        let mut pending_blanks: Vec<usize> = Vec::new(); // rel end of each blank line
        let mut committed = i;
        let mut cursor = i;
        let mut last_line = (self.line_start, self.line_indent);
        loop {
            let width = match self.peek(cursor) {
                None => {
                    if !self.eof {
                        return Ok(Progress::NeedMore);
                    }
                    break;
                }
                Some(b'\r') => {
                    if self.starved(cursor + 1) {
                        return Ok(Progress::NeedMore);
                    }
                    if self.peek(cursor + 1) == Some(b'\n') {
                        2
                    } else {
                        1
                    }
                }
                Some(b'\n') => 1,
                Some(_) => break,
            };
            let line_rel = cursor + width;
            let mut j = line_rel;
            let mut spaces = 0;
            while self.peek(j) == Some(b' ') {
                j += 1;
                spaces += 1;
            }
            if self.starved(j) {
                return Ok(Progress::NeedMore);
            }
            match self.peek(j) {
                None => {
                    // A trailing line of spaces at eof counts as blank.
                    pending_blanks.push(j);
                    break;
                }
                Some(c) if is_break(c) => {
                    pending_blanks.push(j);
                    cursor = j;
                }
                Some(_) if spaces >= base => {
                    let mut e = j;
                    loop {
                        match self.peek(e) {
                            None => {
                                if !self.eof {
                                    return Ok(Progress::NeedMore);
                                }
                                break;
                            }
                            Some(c) if is_break(c) => break,
                            _ => e += 1,
                        }
                    }
                    for _ in pending_blanks.drain(..) {
                        lines.push(String::new());
                    }
                    let content = self.bytes(line_rel + base, e);
                    let line = std::str::from_utf8(&content)
                        .map_err(|_| TokenizeError::InvalidUtf8(self.err_pos(line_rel + base)))?
                        .to_string();
                    lines.push(line);
                    last_line = (self.offset + line_rel, spaces);
                    committed = e;
                    cursor = e;
                }
                Some(_) => break,
            }
        }
        if chomp == Chomp::Keep {
            if let Some(&end) = pending_blanks.last() {
                for _ in &pending_blanks {
                    lines.push(String::new());
                }
                committed = end;
            }
        }
        let token = Token::new(
            TokenData::BlockLiteral { lines, chomp },
            self.bytes(0, committed),
            self.offset,
        );
        self.advance(committed);
        self.line_start = last_line.0;
        self.line_indent = last_line.1;
        self.value_seen = true;
        out.push(token);
        Ok(Progress::Made)
    }

    /// A tag: `!` followed by runes that are neither whitespace nor
    /// control, composing with `.` and optionally carrying parenthesized
    /// arguments whose text is taken verbatim.
    fn scan_tag(&mut self, out: &mut Vec<Token>) -> Result<Progress, TokenizeError> {
        let mut i = 1;
        let mut depth = 0usize;
        loop {
            match self.peek(i) {
                None => {
                    if !self.eof {
                        return Ok(Progress::NeedMore);
                    }
                    if depth > 0 {
                        return Err(TokenizeError::InvalidTag(self.err_pos(i)));
                    }
                    break;
                }
                Some(b'(') => {
                    depth += 1;
                    i += 1;
                }
                Some(b')') => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    i += 1;
                }
                Some(c) if is_break(c) => {
                    if depth > 0 {
                        return Err(TokenizeError::InvalidTag(self.err_pos(i)));
                    }
                    break;
                }
                Some(c) if depth > 0 => {
                    if c < 0x20 {
                        return Err(TokenizeError::InvalidTag(self.err_pos(i)));
                    }
                    i += 1;
                }
                Some(c) if is_blank(c) || is_structural(c) => break,
                Some(c) if c < 0x20 || c == 0x7F => {
                    return Err(TokenizeError::InvalidTag(self.err_pos(i)));
                }
                Some(c) if c >= 0x80 => match self.utf8_at(i)? {
                    Some((ch, width)) => {
                        if ch.is_control() || ch == '\u{FEFF}' {
                            return Err(TokenizeError::InvalidTag(self.err_pos(i)));
                        }
                        i += width;
                    }
                    None => return Ok(Progress::NeedMore),
                },
                Some(_) => i += 1,
            }
        }
        if i == 1 {
            return Err(TokenizeError::InvalidTag(self.err_pos(0)));
        }
        let name = String::from_utf8_lossy(&self.bytes(0, i)).into_owned();
        self.emit(out, TokenData::Tag { name }, i);
        Ok(Progress::Made)
    }
}
