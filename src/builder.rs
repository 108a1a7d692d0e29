use std::collections::HashMap;

use crate::error::{KeyError, ParseError};
use crate::node::{Key, NodeData, NodeId, Number, ParentLink, Tree};
use crate::position::{Position, PositionDoc};
use crate::tag;
use crate::token::{Token, TokenData};
use crate::{BRACKET_TAG, SPARSE_ARRAY_TAG};
use crate::node::MultiStyle;

/// Starting positions of built nodes, for tooling that needs to map IR back
/// to source (diagnostics, the language server).
pub type PositionMap = HashMap<NodeId, Position>;

/// Assembles the IR from a balanced token stream.
///
/// Comment attachment here is deliberately naive: comments *following* a
/// value are appended to that value's comment node, and comments at a
/// position where a value is expected become the value's head wrapper. The
/// [`associate`](crate::associate) post-pass migrates what actually belongs
/// to the next sibling.
pub struct Builder<'a> {
    toks: &'a [Token],
    i: usize,
    doc: &'a PositionDoc,
    tree: Tree,
    positions: Option<&'a mut PositionMap>,
}

impl<'a> Builder<'a> {
    pub fn new(
        tokens: &'a [Token],
        doc: &'a PositionDoc,
        positions: Option<&'a mut PositionMap>,
    ) -> Builder<'a> {
        Builder {
            toks: tokens,
            i: 0,
            doc,
            tree: Tree::new(),
            positions,
        }
    }

    /// Build one document's tree.
    pub fn build(mut self) -> Result<Tree, ParseError> {
        if self.toks.is_empty() {
            return Ok(Tree::null());
        }
        let root = self.build_value_at(Vec::new(), true)?;
        self.collect_trailing(root);
        while let Some(tok) = self.peek() {
            match &tok.data {
                TokenData::HeadComment { text } | TokenData::LineComment { text } => {
                    let text = text.clone();
                    self.i += 1;
                    self.append_comment(root, text, false, 1);
                }
                _ => return Err(ParseError::UnexpectedToken(self.pos(tok))),
            }
        }
        self.tree.root = Some(root);
        Ok(self.tree)
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.i)
    }

    fn pos(&self, tok: &Token) -> Position {
        self.doc.position(tok.offset)
    }

    fn end_pos(&self) -> Position {
        self.doc.position(self.doc.len())
    }

    fn record(&mut self, id: NodeId, offset: usize) {
        if let Some(map) = self.positions.as_deref_mut() {
            map.insert(id, self.doc.position(offset));
        }
    }

    /// Build one value, consuming any head comments, pre-value line
    /// comments, and a tag in front of it. `pre_head` carries head-comment
    /// lines a container collected before this value's key; those wrap the
    /// value. Head comments found here (between the `:` or `-` and the
    /// value itself) instead lead the value's first entry when the value
    /// is a container, which is where a re-encoding puts them back.
    fn build_value(&mut self, pre_head: Vec<String>) -> Result<NodeId, ParseError> {
        self.build_value_at(pre_head, false)
    }

    fn build_value_at(
        &mut self,
        pre_head: Vec<String>,
        as_root: bool,
    ) -> Result<NodeId, ParseError> {
        let mut head = pre_head;
        let mut own: Vec<String> = Vec::new();
        let mut inline_pre: Vec<(String, usize)> = Vec::new();
        let mut user_tag: Option<String> = None;
        loop {
            let Some(tok) = self.peek() else { break };
            match &tok.data {
                TokenData::HeadComment { text } => {
                    own.push(text.clone());
                    self.i += 1;
                }
                TokenData::LineComment { text } => {
                    inline_pre.push((text.clone(), comment_pad(tok)));
                    self.i += 1;
                }
                TokenData::Tag { name } => {
                    user_tag = Some(match user_tag {
                        None => name.clone(),
                        Some(prev) => tag::compose(name, None, Some(&prev)),
                    });
                    self.i += 1;
                }
                _ => break,
            }
        }

        let Some(tok) = self.peek() else {
            head.append(&mut own);
            if !head.is_empty() {
                // A document that is nothing but commentary.
                let id = self.tree.add(NodeData::Comment {
                    lines: head,
                    inline: 0,
                    trailing: 0,
                    pad: 1,
                    values: Vec::new(),
                });
                return Ok(id);
            }
            return Err(ParseError::UnexpectedEnd(self.end_pos()));
        };
        let offset = tok.offset;
        let node = match &tok.data {
            TokenData::Null => {
                self.i += 1;
                self.tree.add(NodeData::Null)
            }
            TokenData::True => {
                self.i += 1;
                self.tree.add(NodeData::Bool(true))
            }
            TokenData::False => {
                self.i += 1;
                self.tree.add(NodeData::Bool(false))
            }
            TokenData::Integer => {
                let number = Number::integer(&tok.text());
                self.i += 1;
                self.tree.add(NodeData::Number(number))
            }
            TokenData::Float => {
                let number = Number::float(&tok.text());
                self.i += 1;
                self.tree.add(NodeData::Number(number))
            }
            TokenData::Literal => {
                let text = tok.text().into_owned();
                self.i += 1;
                self.tree.add(NodeData::Str(text))
            }
            TokenData::Quoted { value } => {
                let value = value.clone();
                self.i += 1;
                self.tree.add(NodeData::Str(value))
            }
            TokenData::MultiString { lines } => {
                let lines = lines.clone();
                self.i += 1;
                self.tree.add(NodeData::MultiStr {
                    lines,
                    style: MultiStyle::Folded,
                })
            }
            TokenData::BlockLiteral { lines, chomp } => {
                let lines = lines.clone();
                let chomp = *chomp;
                self.i += 1;
                self.tree.add(NodeData::MultiStr {
                    lines,
                    style: MultiStyle::Literal(chomp),
                })
            }
            TokenData::MergeKey => {
                self.i += 1;
                self.tree.add(NodeData::Str("<<".to_string()))
            }
            TokenData::CurlyOpen => self.build_obj()?,
            TokenData::SquareOpen => self.build_arr()?,
            _ => return Err(ParseError::UnexpectedToken(self.pos(tok))),
        };
        self.record(node, offset);

        if let Some(user) = user_tag {
            let status = self.tree.get(node).tag.clone();
            self.tree.get_mut(node).tag = Some(match status {
                None => user,
                Some(status) => tag::compose(&status, None, Some(&user)),
            });
        }
        for (text, pad) in inline_pre {
            self.append_comment(node, text, true, pad);
        }
        if !own.is_empty() {
            let is_container = matches!(
                self.tree.get(node).data,
                NodeData::Object { .. } | NodeData::Array { .. }
            );
            if is_container && !as_root {
                self.lead_first_element(node, own);
            } else {
                head.append(&mut own);
            }
        }
        if head.is_empty() {
            return Ok(node);
        }
        let wrapper = self.tree.add(NodeData::Comment {
            lines: head,
            inline: 0,
            trailing: 0,
            pad: 1,
            values: Vec::new(),
        });
        self.tree.push_item(wrapper, node);
        Ok(wrapper)
    }

    fn build_obj(&mut self) -> Result<NodeId, ParseError> {
        let open = &self.toks[self.i];
        let bracketed = !open.bytes.is_empty();
        let open_offset = open.offset;
        self.i += 1;
        let obj = self.tree.add(NodeData::Object {
            keys: Vec::new(),
            values: Vec::new(),
        });
        self.record(obj, open_offset);
        let mut int_keys: Option<bool> = None;
        loop {
            // Comments at key position: line comments annotate the object
            // itself; head comments lead the next entry's value.
            let mut pending_head: Vec<String> = Vec::new();
            loop {
                let Some(tok) = self.peek() else { break };
                match &tok.data {
                    TokenData::LineComment { text } if pending_head.is_empty() => {
                        let text = text.clone();
                        let pad = comment_pad(tok);
                        self.i += 1;
                        self.append_comment(obj, text, true, pad);
                    }
                    TokenData::HeadComment { text } | TokenData::LineComment { text } => {
                        pending_head.push(text.clone());
                        self.i += 1;
                    }
                    _ => break,
                }
            }
            let Some(tok) = self.peek() else {
                return Err(ParseError::UnexpectedEnd(self.end_pos()));
            };
            match &tok.data {
                TokenData::CurlyClose => {
                    self.i += 1;
                    // Leftover commentary binds to the last entry (or the
                    // object itself when empty); the associator sorts it
                    // out.
                    if !pending_head.is_empty() {
                        let last = match &self.tree.get(obj).data {
                            NodeData::Object { values, .. } => values.last().copied(),
                            _ => unreachable!("object under construction"),
                        };
                        match last {
                            Some(target) => {
                                for text in pending_head {
                                    self.append_comment(target, text, false, 1);
                                }
                            }
                            // Commentary inside empty braces is the
                            // container's own trailing block.
                            None => {
                                for text in pending_head {
                                    self.append_trailing(obj, text);
                                }
                            }
                        }
                    }
                    break;
                }
                TokenData::Tag { .. } => {
                    return Err(KeyError::TagOnKey(self.pos(tok)).into());
                }
                _ => {}
            }
            let key = self.build_key(&mut int_keys)?;
            // A bare key was bound to an adjacent synthetic null by the
            // balancer, so the colon is optional here.
            if matches!(self.peek().map(|t| &t.data), Some(TokenData::Colon)) {
                self.i += 1;
            }
            let value = self.build_value(pending_head)?;
            self.tree.push_pair(obj, key.clone(), value);
            self.collect_trailing(value);
        }
        if int_keys == Some(true) {
            let prev = self.tree.get(obj).tag.clone();
            self.tree.get_mut(obj).tag = Some(tag::compose(SPARSE_ARRAY_TAG, None, prev.as_deref()));
        }
        if bracketed {
            let prev = self.tree.get(obj).tag.clone();
            self.tree.get_mut(obj).tag = Some(tag::compose(BRACKET_TAG, None, prev.as_deref()));
        }
        Ok(obj)
    }

    /// The key of an object entry. The first real key fixes the key type;
    /// mixing string and integer keys is rejected.
    fn build_key(&mut self, int_keys: &mut Option<bool>) -> Result<Key, ParseError> {
        let Some(tok) = self.peek() else {
            return Err(ParseError::UnexpectedEnd(self.end_pos()));
        };
        let position = self.pos(tok);
        let key = match &tok.data {
            TokenData::Integer => {
                let text = tok.text();
                match text.parse::<i64>() {
                    Ok(v) => Key::Int(v),
                    Err(_) => return Err(KeyError::IntegerOverflow(position).into()),
                }
            }
            TokenData::Literal | TokenData::Null | TokenData::True | TokenData::False => {
                Key::Str(tok.text().into_owned())
            }
            TokenData::Quoted { value } => Key::Str(value.clone()),
            TokenData::MergeKey => Key::Merge,
            _ => return Err(KeyError::BadKeyToken(position).into()),
        };
        let is_int = matches!(key, Key::Int(_));
        match *int_keys {
            None => *int_keys = Some(is_int),
            Some(prev) if prev != is_int => {
                return Err(KeyError::MixedKeyTypes(position).into());
            }
            Some(_) => {}
        }
        self.i += 1;
        Ok(key)
    }

    fn build_arr(&mut self) -> Result<NodeId, ParseError> {
        let open = &self.toks[self.i];
        let bracketed = !open.bytes.is_empty();
        let open_offset = open.offset;
        self.i += 1;
        let arr = self.tree.add(NodeData::Array { items: Vec::new() });
        self.record(arr, open_offset);
        let mut first = true;
        loop {
            if first {
                // A line comment straight after `[` annotates the array.
                while let Some(tok) = self.peek() {
                    let TokenData::LineComment { text } = &tok.data else {
                        break;
                    };
                    let text = text.clone();
                    let pad = comment_pad(tok);
                    self.i += 1;
                    self.append_comment(arr, text, true, pad);
                }
            }
            let mut pending_head: Vec<String> = Vec::new();
            while let Some(tok) = self.peek() {
                match &tok.data {
                    TokenData::HeadComment { text } | TokenData::LineComment { text } => {
                        pending_head.push(text.clone());
                        self.i += 1;
                    }
                    _ => break,
                }
            }
            let Some(tok) = self.peek() else {
                return Err(ParseError::UnexpectedEnd(self.end_pos()));
            };
            if matches!(tok.data, TokenData::SquareClose) {
                self.i += 1;
                if !pending_head.is_empty() {
                    let last = match &self.tree.get(arr).data {
                        NodeData::Array { items } => items.last().copied(),
                        _ => unreachable!("array under construction"),
                    };
                    match last {
                        Some(target) => {
                            for text in pending_head {
                                self.append_comment(target, text, false, 1);
                            }
                        }
                        None => {
                            for text in pending_head {
                                self.append_trailing(arr, text);
                            }
                        }
                    }
                }
                break;
            }
            let value = self.build_value(pending_head)?;
            self.tree.push_item(arr, value);
            self.collect_trailing(value);
            first = false;
        }
        if bracketed {
            let prev = self.tree.get(arr).tag.clone();
            self.tree.get_mut(arr).tag = Some(tag::compose(BRACKET_TAG, None, prev.as_deref()));
        }
        Ok(arr)
    }

    /// Naive trailing attachment: line comments directly after a value
    /// extend its inline comment; nothing else is consumed here (head
    /// comments at sibling position are the container loop's business).
    fn collect_trailing(&mut self, node: NodeId) {
        while let Some(tok) = self.peek() {
            let TokenData::LineComment { text } = &tok.data else {
                break;
            };
            let text = text.clone();
            let pad = comment_pad(tok);
            self.i += 1;
            self.append_comment(node, text, true, pad);
        }
    }

    /// Make `lines` the head comment of a container's first element (the
    /// shape a re-encoding of comments under a `key:` line parses back
    /// to). An empty container keeps them as its trailing block.
    fn lead_first_element(&mut self, container: NodeId, lines: Vec<String>) {
        let first = match &self.tree.get(container).data {
            NodeData::Object { values, .. } => values.first().copied(),
            NodeData::Array { items } => items.first().copied(),
            _ => unreachable!("lead_first_element on a scalar"),
        };
        let Some(first) = first else {
            for text in lines {
                self.append_trailing(container, text);
            }
            return;
        };
        if let NodeData::Comment { lines: existing, .. } = &mut self.tree.get_mut(first).data {
            let mut merged = lines;
            merged.append(existing);
            *existing = merged;
            return;
        }
        let wrapper = self.tree.add(NodeData::Comment {
            lines,
            inline: 0,
            trailing: 0,
            pad: 1,
            values: Vec::new(),
        });
        rewrap(&mut self.tree, container, 0, wrapper);
    }

    /// Append one line to a container's trailing comment block.
    fn append_trailing(&mut self, node: NodeId, text: String) {
        self.append_comment(node, text, false, 1);
        let comment = self.tree.get(node).comment.expect("comment just appended");
        if let NodeData::Comment { trailing, .. } = &mut self.tree.get_mut(comment).data {
            *trailing += 1;
        }
    }

    /// Append one comment line to a node's comment slot, creating the
    /// comment node on first use. `inline` marks a same-line comment; the
    /// inline block only grows while it is contiguous from the start.
    fn append_comment(&mut self, node: NodeId, text: String, inline: bool, pad: usize) {
        let comment = match self.tree.get(node).comment {
            Some(c) => c,
            None => {
                let c = self.tree.add(NodeData::Comment {
                    lines: Vec::new(),
                    inline: 0,
                    trailing: 0,
                    pad,
                    values: Vec::new(),
                });
                self.tree.get_mut(c).parent = Some(node);
                self.tree.get_mut(node).comment = Some(c);
                c
            }
        };
        match &mut self.tree.get_mut(comment).data {
            NodeData::Comment {
                lines,
                inline: inline_count,
                ..
            } => {
                if inline && *inline_count == lines.len() {
                    *inline_count += 1;
                }
                lines.push(text);
            }
            _ => unreachable!("comment slot holds a comment node"),
        }
    }
}

/// The recorded whitespace gap before `#` in a comment token.
fn comment_pad(tok: &Token) -> usize {
    tok.bytes.iter().take_while(|&&b| b != b'#').count()
}

impl Number {
    /// Decode an integer-shaped token; 64-bit overflow keeps the raw text.
    pub fn integer(text: &str) -> Number {
        match text.parse::<i64>() {
            Ok(v) => Number::Int(v),
            Err(_) => Number::Decimal(text.to_string()),
        }
    }

    /// Decode a float-shaped token; kept as raw text unless the shortest
    /// display round-trips it.
    pub fn float(text: &str) -> Number {
        match text.parse::<f64>() {
            Ok(v) if format!("{v}") == text => Number::Float(v),
            _ => Number::Decimal(text.to_string()),
        }
    }
}

/// Convenience: run the full front half of the pipeline on one document.
pub(crate) fn build_document(
    tokens: &[Token],
    format: crate::Format,
    doc: &PositionDoc,
    positions: Option<&mut PositionMap>,
) -> Result<Tree, ParseError> {
    let balanced = crate::balancer::balance(tokens, format, doc)?;
    let mut tree = Builder::new(&balanced, doc, positions).build()?;
    crate::comment::associate(&mut tree);
    Ok(tree)
}

/// Parent-link fixup after head-comment wrapping: the wrapper takes the
/// child's place, the child moves under the wrapper.
pub(crate) fn rewrap(tree: &mut Tree, container: NodeId, slot: usize, wrapper: NodeId) {
    let old = match &mut tree.get_mut(container).data {
        NodeData::Object { values, .. } => std::mem::replace(&mut values[slot], wrapper),
        NodeData::Array { items } => std::mem::replace(&mut items[slot], wrapper),
        _ => panic!("rewrap on a scalar container"),
    };
    let old_link = tree.get(old).parent_link.clone();
    {
        let w = tree.get_mut(wrapper);
        w.parent = Some(container);
        w.parent_link = old_link;
    }
    match &mut tree.get_mut(wrapper).data {
        NodeData::Comment { values, .. } => values.push(old),
        _ => panic!("rewrap with a non-comment wrapper"),
    }
    let o = tree.get_mut(old);
    o.parent = Some(wrapper);
    o.parent_link = Some(ParentLink::Index(0));
}
