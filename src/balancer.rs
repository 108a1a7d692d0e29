use crate::error::BalanceError;
use crate::position::{Position, PositionDoc};
use crate::token::{Token, TokenData};
use crate::Format;

/// Re-express a raw token stream so that every object and array is
/// delimited by explicit curly/square tokens, with no dependence left on
/// indentation or `- ` markers.
///
/// The output contains no `Indent` tokens; comments pass through in source
/// order, except that a head comment indented less than the block it
/// follows closes that block first. Synthetic brackets carry empty bytes.
pub fn balance(
    tokens: &[Token],
    format: Format,
    doc: &PositionDoc,
) -> Result<Vec<Token>, BalanceError> {
    let mut balancer = Balancer {
        toks: tokens,
        i: 0,
        format,
        doc,
        out: Vec::with_capacity(tokens.len() + 8),
        cur_indent: 0,
    };
    balancer.run()?;
    Ok(balancer.out)
}

struct Balancer<'a> {
    toks: &'a [Token],
    i: usize,
    format: Format,
    doc: &'a PositionDoc,
    out: Vec<Token>,
    /// Indent of the line the cursor is on, tracked from `Indent` tokens.
    cur_indent: usize,
}

impl Balancer<'_> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.i)
    }

    fn pos_at(&self, offset: usize) -> Position {
        self.doc.position(offset)
    }

    fn pos(&self) -> Position {
        match self.peek() {
            Some(tok) => self.pos_at(tok.offset),
            None => self.pos_at(self.doc.len()),
        }
    }

    /// Copy the current token to the output.
    fn bump(&mut self) {
        self.out.push(self.toks[self.i].clone());
        self.i += 1;
    }

    /// Offset just past the last consumed token.
    fn last_end(&self) -> usize {
        if self.i == 0 {
            return 0;
        }
        let tok = &self.toks[self.i - 1];
        tok.offset + tok.bytes.len()
    }

    /// The 0-based column of a token.
    fn column(&self, tok: &Token) -> usize {
        self.doc.line_col(tok.offset).1 - 1
    }

    /// Advance to the next significant token. Indents update the running
    /// line indent and vanish; comments are copied through, except that a
    /// head comment indented less than `floor` stops the drift (it belongs
    /// to an outer block). Returns `false` when stopped early.
    fn drift(&mut self, floor: usize) -> bool {
        while let Some(tok) = self.peek() {
            match &tok.data {
                TokenData::Indent => {
                    self.cur_indent = tok.bytes.len();
                    self.i += 1;
                }
                TokenData::LineComment { .. } => self.bump(),
                TokenData::HeadComment { .. } => {
                    if self.cur_indent < floor {
                        return false;
                    }
                    self.bump();
                }
                _ => return true,
            }
        }
        true
    }

    fn run(&mut self) -> Result<(), BalanceError> {
        self.drift(0);
        if self.peek().is_some() {
            let d = self.cur_indent;
            self.balance_one(d)?;
        }
        while let Some(tok) = self.peek() {
            match &tok.data {
                TokenData::Indent => {
                    self.cur_indent = tok.bytes.len();
                    self.i += 1;
                }
                TokenData::HeadComment { .. } | TokenData::LineComment { .. } => self.bump(),
                _ => return Err(BalanceError::UnexpectedToken(self.pos())),
            }
        }
        Ok(())
    }

    /// Balance exactly one value whose own column is `d`.
    fn balance_one(&mut self, d: usize) -> Result<(), BalanceError> {
        if let Some(TokenData::Tag { .. }) = self.peek().map(|t| &t.data) {
            self.bump();
            // The tagged value may sit on the same line or open on the
            // next one at the same column.
            self.drift(d);
        }
        let Some(tok) = self.peek() else {
            self.out
                .push(Token::synthetic(TokenData::Null, self.last_end()));
            return Ok(());
        };
        match &tok.data {
            TokenData::CurlyOpen => self.balance_br_obj(),
            TokenData::SquareOpen => self.balance_br_arr(),
            TokenData::Dash => self.balance_arr(d),
            data if data.is_value() => {
                if matches!(
                    self.toks.get(self.i + 1).map(|t| &t.data),
                    Some(TokenData::Colon)
                ) {
                    self.balance_obj(d)
                } else {
                    self.bump();
                    Ok(())
                }
            }
            _ => Err(BalanceError::UnexpectedToken(self.pos())),
        }
    }

    /// An indentation-based object whose keys sit in column `d`.
    fn balance_obj(&mut self, d: usize) -> Result<(), BalanceError> {
        let open_offset = self.toks[self.i].offset;
        self.out
            .push(Token::synthetic(TokenData::CurlyOpen, open_offset));
        loop {
            // Cursor is at a key token.
            let key_offset = self.toks[self.i].offset;
            self.bump();
            match self.peek().map(|t| &t.data) {
                Some(TokenData::Colon) => self.bump(),
                _ => return Err(BalanceError::KeyWithoutColon(self.pos_at(key_offset))),
            }
            self.balance_child(d, false)?;

            if !self.drift(d) {
                break;
            }
            let Some(tok) = self.peek() else { break };
            match &tok.data {
                TokenData::DocSeparator => break,
                _ if self.cur_indent < d => break,
                _ if self.cur_indent > d => {
                    return Err(BalanceError::MisalignedIndent {
                        expected: d,
                        found: self.cur_indent,
                        position: self.pos(),
                    });
                }
                data if data.is_value() && !matches!(data, TokenData::CurlyOpen | TokenData::SquareOpen) => {}
                _ => return Err(BalanceError::UnexpectedToken(self.pos())),
            }
        }
        self.out
            .push(Token::synthetic(TokenData::CurlyClose, self.last_end()));
        Ok(())
    }

    /// An indentation-based array whose `- ` markers sit in column `d`.
    fn balance_arr(&mut self, d: usize) -> Result<(), BalanceError> {
        let open_offset = self.toks[self.i].offset;
        self.out
            .push(Token::synthetic(TokenData::SquareOpen, open_offset));
        loop {
            // Cursor is at a dash; the marker itself is dropped.
            self.i += 1;
            self.balance_child(d, true)?;

            if !self.drift(d) {
                break;
            }
            let Some(tok) = self.peek() else { break };
            match &tok.data {
                TokenData::Dash if self.cur_indent == d => {}
                TokenData::DocSeparator => break,
                _ if self.cur_indent < d => break,
                _ if self.cur_indent > d => {
                    return Err(BalanceError::MisalignedIndent {
                        expected: d,
                        found: self.cur_indent,
                        position: self.pos(),
                    });
                }
                // A non-dash sibling at the same indent ends the array and
                // is the enclosing block's business.
                _ => break,
            }
        }
        self.out
            .push(Token::synthetic(TokenData::SquareClose, self.last_end()));
        Ok(())
    }

    /// The value after a `key:` or a `- `: inline on the same line, block
    /// on the following lines, or implicitly null. `d` is the column of
    /// the key or dash.
    fn balance_child(&mut self, d: usize, after_dash: bool) -> Result<(), BalanceError> {
        let anchor = self.last_end();
        let mut buffered: Vec<Token> = Vec::new();
        let mut crossed = false;
        loop {
            let Some(tok) = self.peek() else { break };
            match &tok.data {
                TokenData::Indent => {
                    self.cur_indent = tok.bytes.len();
                    crossed = true;
                    self.i += 1;
                }
                TokenData::LineComment { .. } if !crossed => self.bump(),
                TokenData::Tag { .. } if !crossed => self.bump(),
                TokenData::HeadComment { .. } | TokenData::LineComment { .. } => {
                    if self.cur_indent < d || (self.cur_indent == d && !after_dash) {
                        // Belongs after this (null) value, or to an outer
                        // block; either way the value scan is over.
                        break;
                    }
                    buffered.push(tok.clone());
                    self.i += 1;
                }
                _ => break,
            }
        }
        if !crossed {
            if let Some(tok) = self.peek() {
                if !matches!(tok.data, TokenData::DocSeparator) {
                    let col = self.column(tok);
                    self.out.append(&mut buffered);
                    return self.balance_inline(col, after_dash);
                }
            }
            self.out
                .push(Token::synthetic(TokenData::Null, anchor));
            self.out.append(&mut buffered);
            return Ok(());
        }
        let block = match self.peek() {
            Some(tok)
                if !matches!(tok.data, TokenData::DocSeparator) && self.cur_indent > d =>
            {
                Some(tok)
            }
            _ => None,
        };
        if block.is_none() {
            self.out
                .push(Token::synthetic(TokenData::Null, anchor));
            self.out.append(&mut buffered);
            return Ok(());
        }
        if self.format != Format::Yaml && self.cur_indent != d + 2 {
            return Err(BalanceError::MisalignedIndent {
                expected: d + 2,
                found: self.cur_indent,
                position: self.pos(),
            });
        }
        self.out.append(&mut buffered);
        let child = self.cur_indent;
        self.balance_one(child)
    }

    /// A value on the same line as its `key:` or `- `. After a dash the
    /// value may itself open an object or a nested array; after a colon it
    /// must not. Tags were already passed through by the caller.
    fn balance_inline(&mut self, col: usize, after_dash: bool) -> Result<(), BalanceError> {
        if after_dash {
            return self.balance_one(col);
        }
        let Some(tok) = self.peek() else {
            self.out
                .push(Token::synthetic(TokenData::Null, self.last_end()));
            return Ok(());
        };
        match &tok.data {
            TokenData::CurlyOpen => self.balance_br_obj(),
            TokenData::SquareOpen => self.balance_br_arr(),
            data if data.is_value() => {
                self.bump();
                if matches!(self.peek().map(|t| &t.data), Some(TokenData::Colon)) {
                    return Err(BalanceError::UnexpectedToken(self.pos()));
                }
                Ok(())
            }
            _ => Err(BalanceError::UnexpectedToken(self.pos())),
        }
    }

    /// Skip indents and copy comments inside brackets, where indentation
    /// carries no structure.
    fn drift_flow(&mut self) {
        while let Some(tok) = self.peek() {
            match &tok.data {
                TokenData::Indent => {
                    self.cur_indent = tok.bytes.len();
                    self.i += 1;
                }
                TokenData::HeadComment { .. } | TokenData::LineComment { .. } => self.bump(),
                _ => return,
            }
        }
    }

    /// An already-bracketed object. Accepts `key` without `:` as an
    /// implicit null binding, and optional trailing commas.
    fn balance_br_obj(&mut self) -> Result<(), BalanceError> {
        let open_offset = self.toks[self.i].offset;
        self.bump();
        loop {
            self.drift_flow();
            let Some(tok) = self.peek() else {
                return Err(BalanceError::UnterminatedBracket(self.pos_at(open_offset)));
            };
            match &tok.data {
                TokenData::CurlyClose => {
                    self.bump();
                    return Ok(());
                }
                TokenData::Tag { .. } => {
                    // Passed through for the builder to reject in key
                    // position.
                    self.bump();
                    continue;
                }
                data if data.is_value()
                    && !matches!(data, TokenData::CurlyOpen | TokenData::SquareOpen) =>
                {
                    self.bump();
                }
                _ => return Err(BalanceError::UnexpectedToken(self.pos())),
            }
            self.drift_flow();
            match self.peek().map(|t| &t.data) {
                Some(TokenData::Colon) => {
                    self.bump();
                    self.drift_flow();
                    self.balance_flow_value(open_offset)?;
                    self.drift_flow();
                }
                Some(TokenData::Comma | TokenData::CurlyClose) => {
                    self.out
                        .push(Token::synthetic(TokenData::Null, self.last_end()));
                }
                None => {
                    return Err(BalanceError::UnterminatedBracket(self.pos_at(open_offset)))
                }
                _ => return Err(BalanceError::KeyWithoutColon(self.pos())),
            }
            match self.peek().map(|t| &t.data) {
                Some(TokenData::Comma) => self.i += 1,
                Some(TokenData::CurlyClose) => {}
                None => {
                    return Err(BalanceError::UnterminatedBracket(self.pos_at(open_offset)))
                }
                _ => return Err(BalanceError::UnexpectedToken(self.pos())),
            }
        }
    }

    /// An already-bracketed array with optional trailing comma.
    fn balance_br_arr(&mut self) -> Result<(), BalanceError> {
        let open_offset = self.toks[self.i].offset;
        self.bump();
        loop {
            self.drift_flow();
            let Some(tok) = self.peek() else {
                return Err(BalanceError::UnterminatedBracket(self.pos_at(open_offset)));
            };
            if matches!(tok.data, TokenData::SquareClose) {
                self.bump();
                return Ok(());
            }
            self.balance_flow_value(open_offset)?;
            self.drift_flow();
            match self.peek().map(|t| &t.data) {
                Some(TokenData::Comma) => self.i += 1,
                Some(TokenData::SquareClose) => {}
                None => {
                    return Err(BalanceError::UnterminatedBracket(self.pos_at(open_offset)))
                }
                _ => return Err(BalanceError::UnexpectedToken(self.pos())),
            }
        }
    }

    /// One value inside brackets.
    fn balance_flow_value(&mut self, open_offset: usize) -> Result<(), BalanceError> {
        if let Some(TokenData::Tag { .. }) = self.peek().map(|t| &t.data) {
            self.bump();
            self.drift_flow();
        }
        let Some(tok) = self.peek() else {
            return Err(BalanceError::UnterminatedBracket(self.pos_at(open_offset)));
        };
        match &tok.data {
            TokenData::CurlyOpen => self.balance_br_obj(),
            TokenData::SquareOpen => self.balance_br_arr(),
            TokenData::Comma | TokenData::CurlyClose | TokenData::SquareClose => {
                self.out
                    .push(Token::synthetic(TokenData::Null, self.last_end()));
                Ok(())
            }
            data if data.is_value() => {
                self.bump();
                Ok(())
            }
            _ => Err(BalanceError::UnexpectedToken(self.pos())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tokenize;
    use pretty_assertions::assert_eq;

    fn balanced(input: &str) -> Vec<TokenData> {
        let (tokens, doc) = tokenize(input.as_bytes(), Format::Tony).unwrap();
        balance(&tokens, Format::Tony, &doc)
            .unwrap()
            .into_iter()
            .map(|t| t.data)
            .collect()
    }

    fn balance_err(input: &str) -> BalanceError {
        let (tokens, doc) = tokenize(input.as_bytes(), Format::Tony).unwrap();
        balance(&tokens, Format::Tony, &doc).unwrap_err()
    }

    #[test]
    fn dash_list_wraps_in_squares() {
        assert_eq!(
            balanced("- 1\n- 2\n- 3\n"),
            vec![
                TokenData::SquareOpen,
                TokenData::Integer,
                TokenData::Integer,
                TokenData::Integer,
                TokenData::SquareClose,
            ]
        );
    }

    #[test]
    fn nested_block_objects() {
        assert_eq!(
            balanced("a: 1\nb:\n  c: 2\n  d: 3\n"),
            vec![
                TokenData::CurlyOpen,
                TokenData::Literal, // a
                TokenData::Colon,
                TokenData::Integer,
                TokenData::Literal, // b
                TokenData::Colon,
                TokenData::CurlyOpen,
                TokenData::Literal, // c
                TokenData::Colon,
                TokenData::Integer,
                TokenData::Literal, // d
                TokenData::Colon,
                TokenData::Integer,
                TokenData::CurlyClose,
                TokenData::CurlyClose,
            ]
        );
    }

    #[test]
    fn object_under_dash() {
        assert_eq!(
            balanced("- name: 1\n  extra: 2\n- name: 2\n"),
            vec![
                TokenData::SquareOpen,
                TokenData::CurlyOpen,
                TokenData::Literal,
                TokenData::Colon,
                TokenData::Integer,
                TokenData::Literal,
                TokenData::Colon,
                TokenData::Integer,
                TokenData::CurlyClose,
                TokenData::CurlyOpen,
                TokenData::Literal,
                TokenData::Colon,
                TokenData::Integer,
                TokenData::CurlyClose,
                TokenData::SquareClose,
            ]
        );
    }

    #[test]
    fn empty_value_becomes_null() {
        assert_eq!(
            balanced("a:\nb: 2\n"),
            vec![
                TokenData::CurlyOpen,
                TokenData::Literal,
                TokenData::Colon,
                TokenData::Null,
                TokenData::Literal,
                TokenData::Colon,
                TokenData::Integer,
                TokenData::CurlyClose,
            ]
        );
    }

    #[test]
    fn bracketed_key_without_colon_is_null() {
        assert_eq!(
            balanced("{a, b: 1,}\n"),
            vec![
                TokenData::CurlyOpen,
                TokenData::Literal,
                TokenData::Null,
                TokenData::Literal,
                TokenData::Colon,
                TokenData::Integer,
                TokenData::CurlyClose,
            ]
        );
    }

    #[test]
    fn synthetic_brackets_have_empty_bytes() {
        let (tokens, doc) = tokenize(b"a: 1\n", Format::Tony).unwrap();
        let out = balance(&tokens, Format::Tony, &doc).unwrap();
        assert!(out[0].bytes.is_empty() && matches!(out[0].data, TokenData::CurlyOpen));
        let (tokens, doc) = tokenize(b"{a: 1}\n", Format::Tony).unwrap();
        let out = balance(&tokens, Format::Tony, &doc).unwrap();
        assert_eq!(out[0].bytes, b"{");
    }

    #[test]
    fn no_indents_and_brackets_balance_in_every_prefix() {
        let inputs = [
            "a: 1\nb:\n  c: 2\n  d:\n    - 1\n    - {x: [1, 2]}\n",
            "- 1\n- - 2\n  - 3\n",
            "# doc comment\na: 1 # line\n# trailing\n",
        ];
        for input in inputs {
            let (tokens, doc) = tokenize(input.as_bytes(), Format::Tony).unwrap();
            let out = balance(&tokens, Format::Tony, &doc).unwrap();
            let mut curly = 0i64;
            let mut square = 0i64;
            for tok in &out {
                match tok.data {
                    TokenData::Indent => panic!("indent survived balancing"),
                    TokenData::CurlyOpen => curly += 1,
                    TokenData::CurlyClose => curly -= 1,
                    TokenData::SquareOpen => square += 1,
                    TokenData::SquareClose => square -= 1,
                    _ => {}
                }
                assert!(curly >= 0 && square >= 0, "close before open in {input}");
            }
            assert_eq!((curly, square), (0, 0), "unbalanced output for {input}");
        }
    }

    #[test]
    fn comment_indent_decides_its_block() {
        // Indented with the inner block: stays inside the inner braces.
        let out = balanced("a:\n  b: 1\n  # inner\nc: 2\n");
        let close_at = out
            .iter()
            .position(|d| matches!(d, TokenData::CurlyClose))
            .unwrap();
        let comment_at = out
            .iter()
            .position(|d| matches!(d, TokenData::HeadComment { .. }))
            .unwrap();
        assert!(comment_at < close_at);

        // Dedented: lands after the inner close.
        let out = balanced("a:\n  b: 1\n# outer\nc: 2\n");
        let close_at = out
            .iter()
            .position(|d| matches!(d, TokenData::CurlyClose))
            .unwrap();
        let comment_at = out
            .iter()
            .position(|d| matches!(d, TokenData::HeadComment { .. }))
            .unwrap();
        assert!(comment_at > close_at);
    }

    #[test]
    fn tony_requires_two_space_children() {
        assert!(matches!(
            balance_err("a:\n   b: 1\n"),
            BalanceError::MisalignedIndent { expected: 2, found: 3, .. }
        ));
        assert!(matches!(
            balance_err("a: 1\n  b: 2\n"),
            BalanceError::MisalignedIndent { .. }
        ));
    }

    #[test]
    fn yaml_allows_any_deeper_indent() {
        let (tokens, doc) = tokenize(b"a:\n   b: 1\n", Format::Yaml).unwrap();
        assert!(balance(&tokens, Format::Yaml, &doc).is_ok());
        let (tokens, doc) = tokenize(b"a:\n b: 1\n", Format::Yaml).unwrap();
        assert!(balance(&tokens, Format::Yaml, &doc).is_ok());
    }

    #[test]
    fn structural_errors() {
        assert!(matches!(
            balance_err("{a: 1\n"),
            BalanceError::UnterminatedBracket(_)
        ));
        assert!(matches!(
            balance_err("a: 1\nb: 2\njunk\n"),
            BalanceError::KeyWithoutColon(_)
        ));
        assert!(matches!(
            balance_err("a: b: 1\n"),
            BalanceError::UnexpectedToken(_)
        ));
    }

    #[test]
    fn merge_key_passes_through() {
        let out = balanced("<<: base\na: 1\n");
        assert!(out.contains(&TokenData::MergeKey));
    }
}
