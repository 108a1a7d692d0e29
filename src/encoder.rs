use crate::api::EncodeOptions;
use crate::error::EncodeError;
use crate::node::{Key, MultiStyle, NodeData, NodeId, Number, Tree};
use crate::tag;
use crate::token::Chomp;
use crate::{Format, BRACKET_TAG, SPARSE_ARRAY_TAG};

/// The color attribute reported for each emitted run, for terminal
/// highlighters and the semantic-token generator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ColorAttr {
    Tag,
    Field,
    Value,
    Comment,
    Separator,
    MergeOp,
    LiteralSingle,
    LiteralMulti,
}

/// One attributed run of the encoded text.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Span {
    pub attr: ColorAttr,
    /// Byte offset into the encoded text.
    pub start: usize,
    pub len: usize,
}

/// Renders a tree into one of the three surface flavors.
pub struct Encoder {
    flavor: Format,
    width: usize,
    comments: bool,
    prefer_brackets: bool,
    record: bool,
    out: String,
    spans: Vec<Span>,
}

/// Comment material gathered around one element: head lines above it,
/// same-line comments with their gaps, stray middle lines, and a
/// container's trailing block.
#[derive(Default)]
struct Parts {
    head: Vec<String>,
    inline: Vec<(String, usize)>,
    own: Vec<String>,
    trailing: Vec<String>,
}

impl Encoder {
    pub fn new(opts: &EncodeOptions) -> Encoder {
        Encoder {
            flavor: opts.flavor,
            width: opts.indent_width.max(1),
            comments: opts.comments && opts.flavor != Format::Json,
            prefer_brackets: opts.prefer_brackets || opts.flavor == Format::Json,
            record: opts.record_spans,
            out: String::with_capacity(1024),
            spans: Vec::new(),
        }
    }

    /// Encode a whole tree; returns the text and the recorded spans.
    pub fn encode(mut self, tree: &Tree) -> Result<(String, Vec<Span>), EncodeError> {
        let Some(root) = tree.root else {
            return Ok((self.out, self.spans));
        };
        if self.flavor == Format::Json {
            self.emit_json(tree, root)?;
            return Ok((self.out, self.spans));
        }
        let (parts, inner) = self.parts_of(tree, root);
        match &tree.get(inner).data {
            NodeData::Comment { lines, values, .. } if values.is_empty() => {
                // A document that is nothing but commentary.
                for line in lines.clone() {
                    self.put_comment_line(&line, 0);
                }
                return Ok((self.out, self.spans));
            }
            _ => {}
        }
        for line in &parts.head {
            self.put_comment_line(line, 0);
        }
        self.emit_block_root(tree, inner, &parts)?;
        Ok((self.out, self.spans))
    }

    fn put(&mut self, attr: ColorAttr, text: &str) {
        if self.record && !text.is_empty() {
            self.spans.push(Span {
                attr,
                start: self.out.len(),
                len: text.len(),
            });
        }
        self.out.push_str(text);
    }

    fn put_plain(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.out.push('\n');
    }

    fn put_indent(&mut self, indent: usize) {
        for _ in 0..indent {
            self.out.push(' ');
        }
    }

    fn put_comment_line(&mut self, line: &str, indent: usize) {
        self.put_indent(indent);
        if line.is_empty() {
            self.put(ColorAttr::Comment, "#");
        } else {
            self.put(ColorAttr::Comment, &format!("# {line}"));
        }
        self.newline();
    }

    fn put_inline_comments(&mut self, parts: &Parts) {
        if let Some((text, pad)) = parts.inline.first() {
            self.put_indent(*pad);
            if text.is_empty() {
                self.put(ColorAttr::Comment, "#");
            } else {
                self.put(ColorAttr::Comment, &format!("# {text}"));
            }
        }
    }

    /// Stray and trailing comment lines after a value.
    fn put_after_lines(&mut self, parts: &Parts, own_indent: usize, trailing_indent: usize) {
        for line in &parts.own {
            self.put_comment_line(line, own_indent);
        }
        for line in &parts.trailing {
            self.put_comment_line(line, trailing_indent);
        }
    }

    /// Gather the comment material of an element and resolve its inner
    /// value through a head wrapper.
    fn parts_of(&self, tree: &Tree, element: NodeId) -> (Parts, NodeId) {
        let mut parts = Parts::default();
        if !self.comments {
            return (parts, tree.unwrap_comment(element));
        }
        let mut inner = element;
        if let NodeData::Comment { lines, values, .. } = &tree.get(element).data {
            if let Some(&wrapped) = values.first() {
                parts.head.extend(lines.iter().cloned());
                inner = wrapped;
            }
        }
        for id in [Some(inner), if inner == element { None } else { Some(element) }]
            .into_iter()
            .flatten()
        {
            let Some(comment) = tree.get(id).comment else {
                continue;
            };
            let NodeData::Comment {
                lines,
                inline,
                trailing,
                pad,
                ..
            } = &tree.get(comment).data
            else {
                continue;
            };
            let keep_end = lines.len() - trailing;
            for line in &lines[..*inline.min(&keep_end)] {
                parts.inline.push((line.clone(), *pad));
            }
            for line in &lines[(*inline).min(keep_end)..keep_end] {
                parts.own.push(line.clone());
            }
            for line in &lines[keep_end..] {
                parts.trailing.push(line.clone());
            }
        }
        (parts, inner)
    }

    /// Should this container be emitted in bracketed form?
    fn bracketed(&self, tree: &Tree, id: NodeId) -> bool {
        if self.prefer_brackets {
            return true;
        }
        let node = tree.get(id);
        if let Some(t) = &node.tag {
            if tag::has(t, BRACKET_TAG) {
                return true;
            }
        }
        match &node.data {
            NodeData::Object { keys, .. } => keys.is_empty(),
            NodeData::Array { items } => items.is_empty(),
            _ => false,
        }
    }

    /// A tag with the style components consumed; what remains is printed.
    fn visible_tag(tree: &Tree, id: NodeId) -> Option<String> {
        let t = tree.get(id).tag.as_deref()?;
        let mut kept: Vec<&str> = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        let bytes = t.as_bytes();
        for i in 0..=bytes.len() {
            let split = i == bytes.len()
                || (bytes[i] == b'.' && depth == 0);
            if i < bytes.len() {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
            if split {
                let comp = &t[start..i];
                let name = comp
                    .strip_prefix('!')
                    .unwrap_or(comp)
                    .split('(')
                    .next()
                    .unwrap_or("");
                if !comp.is_empty()
                    && name != BRACKET_TAG.trim_start_matches('!')
                    && name != SPARSE_ARRAY_TAG.trim_start_matches('!')
                {
                    kept.push(comp);
                }
                start = i + 1;
            }
        }
        if kept.is_empty() {
            None
        } else {
            Some(kept.join("."))
        }
    }

    fn emit_tag(&mut self, tree: &Tree, id: NodeId) {
        if let Some(t) = Self::visible_tag(tree, id) {
            self.put(ColorAttr::Tag, &t);
            self.put_plain(" ");
        }
    }

    fn emit_block_root(&mut self, tree: &Tree, inner: NodeId, parts: &Parts) -> Result<(), EncodeError> {
        match &tree.get(inner).data {
            NodeData::Object { keys, .. } if !self.bracketed(tree, inner) && !keys.is_empty() => {
                if let Some(t) = Self::visible_tag(tree, inner) {
                    self.put(ColorAttr::Tag, &t);
                    self.newline();
                }
                self.emit_obj_entries(tree, inner, 0, false)?;
                self.put_after_lines(parts, 0, 0);
            }
            NodeData::Array { items } if !self.bracketed(tree, inner) && !items.is_empty() => {
                if let Some(t) = Self::visible_tag(tree, inner) {
                    self.put(ColorAttr::Tag, &t);
                    self.newline();
                }
                self.emit_arr_items(tree, inner, 0, false)?;
                self.put_after_lines(parts, 0, 0);
            }
            NodeData::MultiStr { lines, style } => {
                let lines = lines.clone();
                let style = *style;
                self.emit_multistr_block_at(&lines, style, parts, 0, 0, true)?;
                self.put_after_lines(parts, 0, 0);
            }
            _ => {
                self.emit_tag(tree, inner);
                self.emit_scalar(tree, inner, false)?;
                self.put_inline_comments(parts);
                self.newline();
                self.put_after_lines(parts, 0, 0);
            }
        }
        Ok(())
    }

    fn emit_obj_entries(
        &mut self,
        tree: &Tree,
        obj: NodeId,
        indent: usize,
        first_inline: bool,
    ) -> Result<(), EncodeError> {
        let (keys, values) = match &tree.get(obj).data {
            NodeData::Object { keys, values } => (keys.clone(), values.clone()),
            _ => unreachable!("emit_obj_entries on a non-object"),
        };
        for (idx, (key, element)) in keys.iter().zip(values).enumerate() {
            let (parts, inner) = self.parts_of(tree, element);
            let inline_here = first_inline && idx == 0;
            if !inline_here {
                for line in &parts.head {
                    self.put_comment_line(line, indent);
                }
                self.put_indent(indent);
            } else if !parts.head.is_empty() {
                // Head comments cannot sit mid-line; fall back to a block
                // entry under the marker.
                self.newline();
                for line in &parts.head {
                    self.put_comment_line(line, indent);
                }
                self.put_indent(indent);
            }
            self.put_key(key);
            self.put(ColorAttr::Separator, ":");
            let line_indent = if inline_here { indent.saturating_sub(self.width) } else { indent };
            self.emit_entry_value(tree, inner, &parts, indent, line_indent)?;
        }
        Ok(())
    }

    /// Everything after `key:` on an entry line.
    fn emit_entry_value(
        &mut self,
        tree: &Tree,
        inner: NodeId,
        parts: &Parts,
        indent: usize,
        line_indent: usize,
    ) -> Result<(), EncodeError> {
        match &tree.get(inner).data {
            NodeData::Object { keys, .. } if !self.bracketed(tree, inner) && !keys.is_empty() => {
                if let Some(t) = Self::visible_tag(tree, inner) {
                    self.put_plain(" ");
                    self.put(ColorAttr::Tag, &t);
                }
                self.put_inline_comments(parts);
                self.newline();
                self.emit_obj_entries(tree, inner, indent + self.width, false)?;
                self.put_after_lines(parts, indent, indent + self.width);
            }
            NodeData::Array { items } if !self.bracketed(tree, inner) && !items.is_empty() => {
                if let Some(t) = Self::visible_tag(tree, inner) {
                    self.put_plain(" ");
                    self.put(ColorAttr::Tag, &t);
                }
                self.put_inline_comments(parts);
                self.newline();
                self.emit_arr_items(tree, inner, indent + self.width, false)?;
                self.put_after_lines(parts, indent, indent + self.width);
            }
            NodeData::MultiStr { lines, style } => {
                let lines = lines.clone();
                let style = *style;
                self.emit_multistr_block(&lines, style, parts, indent + self.width, line_indent)?;
                self.put_after_lines(parts, indent, indent);
            }
            _ => {
                self.put_plain(" ");
                self.emit_tag(tree, inner);
                self.emit_scalar(tree, inner, false)?;
                self.put_inline_comments(parts);
                self.newline();
                self.put_after_lines(parts, indent, indent);
            }
        }
        Ok(())
    }

    fn emit_arr_items(
        &mut self,
        tree: &Tree,
        arr: NodeId,
        indent: usize,
        first_inline: bool,
    ) -> Result<(), EncodeError> {
        let items = match &tree.get(arr).data {
            NodeData::Array { items } => items.clone(),
            _ => unreachable!("emit_arr_items on a non-array"),
        };
        for (idx, element) in items.into_iter().enumerate() {
            let (parts, inner) = self.parts_of(tree, element);
            let inline_here = first_inline && idx == 0;
            if !inline_here {
                for line in &parts.head {
                    self.put_comment_line(line, indent);
                }
                self.put_indent(indent);
            } else if !parts.head.is_empty() {
                self.newline();
                for line in &parts.head {
                    self.put_comment_line(line, indent);
                }
                self.put_indent(indent);
            }
            self.put(ColorAttr::Separator, "-");
            match &tree.get(inner).data {
                NodeData::Object { keys, .. }
                    if !self.bracketed(tree, inner) && !keys.is_empty() =>
                {
                    self.put_plain(" ");
                    if let Some(t) = Self::visible_tag(tree, inner) {
                        self.put(ColorAttr::Tag, &t);
                        self.newline();
                        self.emit_obj_entries(tree, inner, indent + self.width, false)?;
                    } else {
                        self.emit_obj_entries(tree, inner, indent + self.width, true)?;
                    }
                    self.put_after_lines(&parts, indent, indent + self.width);
                }
                NodeData::Array { items: nested }
                    if !self.bracketed(tree, inner) && !nested.is_empty() =>
                {
                    self.put_plain(" ");
                    if let Some(t) = Self::visible_tag(tree, inner) {
                        self.put(ColorAttr::Tag, &t);
                        self.newline();
                        self.emit_arr_items(tree, inner, indent + self.width, false)?;
                    } else {
                        self.emit_arr_items(tree, inner, indent + self.width, true)?;
                    }
                    self.put_after_lines(&parts, indent, indent + self.width);
                }
                NodeData::MultiStr { lines, style } => {
                    let lines = lines.clone();
                    let style = *style;
                    self.emit_multistr_block(&lines, style, &parts, indent + self.width, indent)?;
                    self.put_after_lines(&parts, indent, indent);
                }
                _ => {
                    self.put_plain(" ");
                    self.emit_tag(tree, inner);
                    self.emit_scalar(tree, inner, false)?;
                    self.put_inline_comments(&parts);
                    self.newline();
                    self.put_after_lines(&parts, indent, indent);
                }
            }
        }
        Ok(())
    }

    /// A multi-line string in block position. Folded strings refold as
    /// quoted lines (at `content_indent`); literals re-emit `|` with their
    /// chomping indicator, content two columns in from `line_indent`.
    fn emit_multistr_block(
        &mut self,
        lines: &[String],
        style: MultiStyle,
        parts: &Parts,
        content_indent: usize,
        line_indent: usize,
    ) -> Result<(), EncodeError> {
        self.emit_multistr_block_at(lines, style, parts, content_indent, line_indent, false)
    }

    /// As [`emit_multistr_block`], with `at_line_start` set when the cursor
    /// already sits at column 0 of a fresh line (the document root).
    fn emit_multistr_block_at(
        &mut self,
        lines: &[String],
        style: MultiStyle,
        parts: &Parts,
        content_indent: usize,
        line_indent: usize,
        at_line_start: bool,
    ) -> Result<(), EncodeError> {
        match style {
            MultiStyle::Folded => {
                if self.flavor == Format::Yaml {
                    // The folded form is Tony-only surface; YAML gets an
                    // escaped string.
                    if !at_line_start {
                        self.put_plain(" ");
                    }
                    let joined = lines.join("\n");
                    self.put(ColorAttr::Value, &double_quoted(&joined));
                    self.put_inline_comments(parts);
                    self.newline();
                    return Ok(());
                }
                if !at_line_start {
                    self.newline();
                }
                let quoted: Vec<String> =
                    lines.iter().map(|l| double_quoted(l)).collect();
                let align = quoted.first().map_or(0, |q| q.len())
                    + parts.inline.first().map_or(1, |(_, pad)| *pad);
                for (i, q) in quoted.iter().enumerate() {
                    self.put_indent(content_indent);
                    self.put(ColorAttr::LiteralMulti, q);
                    if let Some((text, _)) = parts.inline.get(i) {
                        let gap = align.saturating_sub(q.len()).max(1);
                        self.put_indent(gap);
                        if text.is_empty() {
                            self.put(ColorAttr::Comment, "#");
                        } else {
                            self.put(ColorAttr::Comment, &format!("# {text}"));
                        }
                    }
                    self.newline();
                }
            }
            MultiStyle::Literal(chomp) => {
                if !at_line_start {
                    self.put_plain(" ");
                }
                let indicator = match chomp {
                    Chomp::Clip => "|",
                    Chomp::Strip => "|-",
                    Chomp::Keep => "|+",
                };
                self.put(ColorAttr::Separator, indicator);
                self.newline();
                let base = line_indent + 2;
                for line in lines {
                    if line.is_empty() {
                        self.newline();
                    } else {
                        self.put_indent(base);
                        self.put(ColorAttr::LiteralMulti, line);
                        self.newline();
                    }
                }
            }
        }
        Ok(())
    }

    fn put_key(&mut self, key: &Key) {
        match key {
            Key::Int(i) => self.put(ColorAttr::Field, &i.to_string()),
            Key::Merge => self.put(ColorAttr::MergeOp, "<<"),
            // A literal string key `<<` is data, not the operator; it is
            // never plain-safe, so it always comes out quoted.
            Key::Str(s) => {
                if plain_safe(s, false) {
                    self.put(ColorAttr::Field, s);
                } else {
                    let (text, single) = quoted_string(s);
                    let attr = if single {
                        ColorAttr::LiteralSingle
                    } else {
                        ColorAttr::Field
                    };
                    self.put(attr, &text);
                }
            }
        }
    }

    fn emit_scalar(&mut self, tree: &Tree, id: NodeId, flow: bool) -> Result<(), EncodeError> {
        match &tree.get(id).data {
            NodeData::Null => self.put(ColorAttr::Value, "null"),
            NodeData::Bool(true) => self.put(ColorAttr::Value, "true"),
            NodeData::Bool(false) => self.put(ColorAttr::Value, "false"),
            NodeData::Number(n) => {
                let text = match n {
                    Number::Int(v) => v.to_string(),
                    Number::Float(v) => format!("{v}"),
                    Number::Decimal(raw) => raw.clone(),
                };
                self.put(ColorAttr::Value, &text);
            }
            NodeData::Str(s) => {
                if s == "<<" {
                    self.put(ColorAttr::MergeOp, "<<");
                } else if plain_safe(s, flow) {
                    self.put(ColorAttr::Value, s);
                } else {
                    let (text, single) = quoted_string(s);
                    let attr = if single {
                        ColorAttr::LiteralSingle
                    } else {
                        ColorAttr::Value
                    };
                    self.put(attr, &text);
                }
            }
            NodeData::MultiStr { lines, style } => {
                // Flow position flattens a multi-line string.
                let text = multistr_text(lines, *style);
                self.put(ColorAttr::Value, &double_quoted(&text));
            }
            NodeData::Object { .. } | NodeData::Array { .. } => {
                self.emit_flow(tree, id)?;
            }
            NodeData::Comment { .. } => {
                panic!("comment node in scalar position")
            }
        }
        Ok(())
    }

    /// Bracketed (single-line) form.
    fn emit_flow(&mut self, tree: &Tree, id: NodeId) -> Result<(), EncodeError> {
        let inner = tree.unwrap_comment(id);
        if inner != id {
            return self.emit_flow(tree, inner);
        }
        match &tree.get(id).data {
            NodeData::Object { keys, values } => {
                self.put(ColorAttr::Separator, "{");
                for (i, (key, &value)) in keys.iter().zip(values).enumerate() {
                    if i > 0 {
                        self.put(ColorAttr::Separator, ",");
                        self.put_plain(" ");
                    }
                    self.put_key(key);
                    self.put(ColorAttr::Separator, ":");
                    self.put_plain(" ");
                    let value = tree.unwrap_comment(value);
                    self.emit_tag(tree, value);
                    self.emit_scalar(tree, value, true)?;
                }
                self.put(ColorAttr::Separator, "}");
            }
            NodeData::Array { items } => {
                self.put(ColorAttr::Separator, "[");
                for (i, &item) in items.iter().enumerate() {
                    if i > 0 {
                        self.put(ColorAttr::Separator, ",");
                        self.put_plain(" ");
                    }
                    let item = tree.unwrap_comment(item);
                    self.emit_tag(tree, item);
                    self.emit_scalar(tree, item, true)?;
                }
                self.put(ColorAttr::Separator, "]");
            }
            _ => self.emit_scalar(tree, id, true)?,
        }
        Ok(())
    }

    /// The JSON flavor: explicit brackets, double quotes only, no tags,
    /// comments, or block forms.
    fn emit_json(&mut self, tree: &Tree, id: NodeId) -> Result<(), EncodeError> {
        let inner = tree.unwrap_comment(id);
        if inner != id {
            return self.emit_json(tree, inner);
        }
        if Self::visible_tag(tree, id).is_some() {
            return Err(EncodeError::JsonIncompatible("tag"));
        }
        match &tree.get(id).data {
            NodeData::Null => self.put(ColorAttr::Value, "null"),
            NodeData::Bool(true) => self.put(ColorAttr::Value, "true"),
            NodeData::Bool(false) => self.put(ColorAttr::Value, "false"),
            NodeData::Number(n) => {
                let text = match n {
                    Number::Int(v) => v.to_string(),
                    Number::Float(v) => format!("{v}"),
                    Number::Decimal(raw) => raw.clone(),
                };
                self.put(ColorAttr::Value, &text);
            }
            NodeData::Str(s) => self.put(ColorAttr::Value, &json_quoted(s)),
            NodeData::MultiStr { lines, style } => {
                let text = multistr_text(lines, *style);
                self.put(ColorAttr::Value, &json_quoted(&text));
            }
            NodeData::Object { keys, values } => {
                self.put(ColorAttr::Separator, "{");
                for (i, (key, &value)) in keys.iter().zip(values).enumerate() {
                    if i > 0 {
                        self.put(ColorAttr::Separator, ",");
                    }
                    let key_text = match key {
                        Key::Str(s) => json_quoted(s),
                        Key::Int(v) => json_quoted(&v.to_string()),
                        Key::Merge => {
                            return Err(EncodeError::JsonIncompatible("merge key"));
                        }
                    };
                    self.put(ColorAttr::Field, &key_text);
                    self.put(ColorAttr::Separator, ":");
                    self.emit_json(tree, value)?;
                }
                self.put(ColorAttr::Separator, "}");
            }
            NodeData::Array { items } => {
                self.put(ColorAttr::Separator, "[");
                for (i, &item) in items.iter().enumerate() {
                    if i > 0 {
                        self.put(ColorAttr::Separator, ",");
                    }
                    self.emit_json(tree, item)?;
                }
                self.put(ColorAttr::Separator, "]");
            }
            NodeData::Comment { .. } => {
                return Err(EncodeError::JsonIncompatible("comment"));
            }
        }
        Ok(())
    }
}

/// The materialized text of a multi-line string.
pub fn multistr_text(lines: &[String], style: MultiStyle) -> String {
    let joined = lines.join("\n");
    match style {
        MultiStyle::Folded => joined,
        MultiStyle::Literal(Chomp::Strip) => joined,
        MultiStyle::Literal(_) => {
            if lines.is_empty() {
                joined
            } else {
                joined + "\n"
            }
        }
    }
}

/// Can this string be emitted without quotes?
fn plain_safe(text: &str, flow: bool) -> bool {
    if text.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    let first = bytes[0];
    if matches!(
        first,
        b'-' | b'?'
            | b':'
            | b','
            | b'['
            | b']'
            | b'{'
            | b'}'
            | b'#'
            | b'&'
            | b'*'
            | b'!'
            | b'|'
            | b'>'
            | b'\''
            | b'"'
            | b'%'
            | b'@'
            | b'`'
            | b' '
            | b'\t'
    ) {
        return false;
    }
    if matches!(bytes[bytes.len() - 1], b' ' | b'\t' | b':') {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        if b < 0x20 {
            return false;
        }
        if b == b':' && matches!(bytes.get(i + 1), Some(b' ' | b'\t')) {
            return false;
        }
        if b == b'#' && i > 0 && matches!(bytes[i - 1], b' ' | b'\t') {
            return false;
        }
        if flow && matches!(b, b',' | b'[' | b']' | b'{' | b'}' | b':') {
            return false;
        }
    }
    // Anything that would re-tokenize as a number or keyword needs quotes.
    if matches!(text, "null" | "true" | "false") {
        return false;
    }
    if text.parse::<f64>().is_ok() {
        return false;
    }
    if text.starts_with("<<") {
        return false;
    }
    true
}

/// Quote a string, single-quoted when that saves escapes.
fn quoted_string(text: &str) -> (String, bool) {
    let has_control = text.bytes().any(|b| b < 0x20);
    if !has_control {
        let single_escapes = text.bytes().filter(|&b| b == b'\'').count();
        let double_escapes = text.bytes().filter(|&b| b == b'"' || b == b'\\').count();
        if single_escapes < double_escapes || (single_escapes == 0 && double_escapes > 0) {
            return (format!("'{}'", text.replace('\'', "''")), true);
        }
    }
    (double_quoted(text), false)
}

fn double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn json_quoted(text: &str) -> String {
    // JSON escapes are a subset of the double-quoted form.
    double_quoted(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{encode, parse, parse_format, EncodeOptions};
    use pretty_assertions::assert_eq;

    fn roundtrip_tony(input: &str) -> String {
        let tree = parse(input.as_bytes()).unwrap();
        encode(&tree, &EncodeOptions::default()).unwrap()
    }

    #[test]
    fn nested_object_reproduces_bytes() {
        let input = "a: 1\nb:\n  c: 2\n  d: 3\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn dash_array_reproduces_bytes() {
        let input = "- 1\n- 2\n- 3\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn object_under_dash_reproduces_bytes() {
        let input = "- name: 1\n  extra: 2\n- name: 2\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn comments_survive() {
        let input = "# head\na: 1 # line\nb: 2\n# tail\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn bracket_tag_restores_flow_form() {
        let input = "a: {x: 1, y: 2}\nb: [1, 2]\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn block_literal_reproduces() {
        let input = "log: |\n  first\n  second\ndone: true\n";
        assert_eq!(roundtrip_tony(input), input);
        let input = "log: |-\n  no newline\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn multiline_string_refolds() {
        let input = "\"one\"\n\"two\"\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn sparse_array_emits_integer_keys() {
        let input = "0: a\n2: b\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn tags_survive() {
        let input = "!key(name)\n- name: 1\n- name: 2\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn json_flavor() {
        let tree = parse_format(br#"{"null": null, "a": [1, 2.5]}"#, Format::Json).unwrap();
        let out = encode(&tree, &EncodeOptions::json()).unwrap();
        assert_eq!(out, r#"{"null":null,"a":[1,2.5]}"#);
    }

    #[test]
    fn json_refuses_tags() {
        let tree = parse(b"!conf\na: 1\n").unwrap();
        let err = encode(&tree, &EncodeOptions::json()).unwrap_err();
        assert!(matches!(err, EncodeError::JsonIncompatible("tag")));
    }

    #[test]
    fn json_refuses_merge_keys() {
        let tree = parse(b"<<: base\na: 1\n").unwrap();
        let err = encode(&tree, &EncodeOptions::json()).unwrap_err();
        assert!(matches!(err, EncodeError::JsonIncompatible("merge key")));
    }

    #[test]
    fn literal_double_angle_key_is_data_not_a_merge() {
        // A quoted `"<<"` key is an ordinary string: JSON keeps it, and
        // Tony re-encodes it quoted so it cannot collapse into the
        // operator.
        let tree = parse_format(br#"{"<<": 1}"#, Format::Json).unwrap();
        let out = encode(&tree, &EncodeOptions::json()).unwrap();
        assert_eq!(out, r#"{"<<":1}"#);
        let tony = encode(&tree, &EncodeOptions::default()).unwrap();
        assert_eq!(tony, "{\"<<\": 1}\n");
        let back = parse(tony.as_bytes()).unwrap();
        assert!(tree.node_eq(tree.root.unwrap(), &back, back.root.unwrap()));
    }

    #[test]
    fn json_drops_comments_and_flattens_multistrings() {
        let tree = parse(b"a: 1 # note\n").unwrap();
        let out = encode(&tree, &EncodeOptions::json()).unwrap();
        assert_eq!(out, r#"{"a":1}"#);
        let tree = parse(b"m:\n  \"x\"\n  \"y\"\n").unwrap();
        let out = encode(&tree, &EncodeOptions::json()).unwrap();
        assert_eq!(out, r#"{"m":"x\ny"}"#);
    }

    #[test]
    fn prefer_brackets_overrides_block_form() {
        let tree = parse(b"a:\n  b: 1\n").unwrap();
        let opts = EncodeOptions {
            prefer_brackets: true,
            ..EncodeOptions::default()
        };
        let out = encode(&tree, &opts).unwrap();
        assert_eq!(out, "{a: {b: 1}}\n");
    }

    #[test]
    fn unsafe_strings_are_quoted() {
        let tree = crate::Tree::from_map([
            ("n", crate::Tree::from_str("null")),
            ("c", crate::Tree::from_str("a: b")),
            ("q", crate::Tree::from_str("it's")),
            ("num", crate::Tree::from_str("12")),
        ]);
        let out = encode(&tree, &EncodeOptions::default()).unwrap();
        assert_eq!(out, "n: \"null\"\nc: \"a: b\"\nq: \"it's\"\nnum: \"12\"\n");
    }

    #[test]
    fn spans_cover_attributed_runs() {
        let tree = parse(b"a: 1 # c\n").unwrap();
        let opts = EncodeOptions {
            record_spans: true,
            ..EncodeOptions::default()
        };
        let encoder = Encoder::new(&opts);
        let (text, spans) = encoder.encode(&tree).unwrap();
        assert_eq!(text, "a: 1 # c\n");
        let field = spans.iter().find(|s| s.attr == ColorAttr::Field).unwrap();
        assert_eq!(&text[field.start..field.start + field.len], "a");
        let comment = spans.iter().find(|s| s.attr == ColorAttr::Comment).unwrap();
        assert_eq!(&text[comment.start..comment.start + comment.len], "# c");
        assert!(spans.iter().any(|s| s.attr == ColorAttr::Separator));
        assert!(spans.iter().any(|s| s.attr == ColorAttr::Value));
    }

    #[test]
    fn merge_key_round_trips() {
        let input = "<<: base\na: 1\n";
        assert_eq!(roundtrip_tony(input), input);
    }

    #[test]
    fn empty_containers_are_flow() {
        let tree = crate::Tree::from_map([("a", crate::Tree::from_slice([]))]);
        let out = encode(&tree, &EncodeOptions::default()).unwrap();
        assert_eq!(out, "a: []\n");
    }
}
