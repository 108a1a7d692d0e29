use crate::builder::{build_document, PositionMap};
use crate::encoder::{Encoder, Span};
use crate::error::{EncodeError, ParseError};
use crate::node::Tree;
use crate::scanner::tokenize;
use crate::token::{Token, TokenData};
use crate::Format;

/// The encoder's option set.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct EncodeOptions {
    /// The surface flavor to produce.
    pub flavor: Format,
    /// Indentation width for block forms.
    pub indent_width: usize,
    /// Whether comments are emitted at all.
    pub comments: bool,
    /// Emit every container bracketed, regardless of its `!bracket` tag.
    pub prefer_brackets: bool,
    /// Record a color-attributed span for each emitted run.
    pub record_spans: bool,
}

impl Default for EncodeOptions {
    fn default() -> EncodeOptions {
        EncodeOptions {
            flavor: Format::Tony,
            indent_width: 2,
            comments: true,
            prefer_brackets: false,
            record_spans: false,
        }
    }
}

impl EncodeOptions {
    /// The JSON flavor preset.
    pub fn json() -> EncodeOptions {
        EncodeOptions {
            flavor: Format::Json,
            comments: false,
            prefer_brackets: true,
            ..EncodeOptions::default()
        }
    }

    /// The YAML flavor preset.
    pub fn yaml() -> EncodeOptions {
        EncodeOptions {
            flavor: Format::Yaml,
            ..EncodeOptions::default()
        }
    }
}

/// Parse one Tony document.
pub fn parse(input: &[u8]) -> Result<Tree, ParseError> {
    parse_format(input, Format::Tony)
}

/// Parse one document in the given surface format.
pub fn parse_format(input: &[u8], format: Format) -> Result<Tree, ParseError> {
    let (tokens, doc) = tokenize(input, format)?;
    build_document(&tokens, format, &doc, None)
}

/// Parse one document, registering each node's starting position.
pub fn parse_with_positions(
    input: &[u8],
    format: Format,
    positions: &mut PositionMap,
) -> Result<Tree, ParseError> {
    let (tokens, doc) = tokenize(input, format)?;
    build_document(&tokens, format, &doc, Some(positions))
}

/// Parse a multi-document input (`---` separators) into one tree per
/// document. Failures name the document index and its byte range.
pub fn parse_multi(input: &[u8], format: Format) -> Result<Vec<Tree>, ParseError> {
    let (tokens, doc) = tokenize(input, format)?;
    let mut segments: Vec<(usize, usize, Vec<Token>)> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut start = 0usize;
    let mut separators = 0usize;
    for token in tokens {
        if matches!(token.data, TokenData::DocSeparator) {
            segments.push((start, token.offset, std::mem::take(&mut current)));
            start = token.offset + token.bytes.len();
            separators += 1;
        } else {
            current.push(token);
        }
    }
    segments.push((start, doc.len(), current));

    let significant = |tokens: &[Token]| {
        tokens
            .iter()
            .any(|t| !matches!(t.data, TokenData::Indent))
    };
    // A leading or trailing separator does not make an extra empty
    // document.
    if separators > 0 {
        if segments.first().is_some_and(|(_, _, t)| !significant(t)) {
            segments.remove(0);
        }
        if segments.len() > 1 && segments.last().is_some_and(|(_, _, t)| !significant(t)) {
            segments.pop();
        }
    }

    let mut trees = Vec::with_capacity(segments.len());
    for (index, (start, end, segment)) in segments.into_iter().enumerate() {
        let tree = build_document(&segment, format, &doc, None).map_err(|source| {
            ParseError::InDocument {
                index,
                start,
                end,
                source: Box::new(source),
            }
        })?;
        trees.push(tree);
    }
    Ok(trees)
}

/// Render a tree.
pub fn encode(tree: &Tree, opts: &EncodeOptions) -> Result<String, EncodeError> {
    let (text, _) = Encoder::new(opts).encode(tree)?;
    Ok(text)
}

/// Render a tree along with the color-attributed spans of the output.
pub fn encode_with_spans(
    tree: &Tree,
    opts: &EncodeOptions,
) -> Result<(String, Vec<Span>), EncodeError> {
    let mut opts = opts.clone();
    opts.record_spans = true;
    Encoder::new(&opts).encode(tree)
}

/// Render a document sequence joined by `---` separator lines.
pub fn encode_multi(trees: &[Tree], opts: &EncodeOptions) -> Result<String, EncodeError> {
    let mut out = String::new();
    for (i, tree) in trees.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        let text = encode(tree, opts)?;
        out.push_str(&text);
        if !text.ends_with('\n') && !text.is_empty() {
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Key, NodeData};
    use pretty_assertions::assert_eq;

    #[test]
    fn multi_doc_parses_each_document() {
        let trees = parse_multi(b"doc1: true\n---\ndoc2: false\n", Format::Tony).unwrap();
        assert_eq!(trees.len(), 2);
        let first = trees[0].object_keys(trees[0].root.unwrap()).unwrap();
        assert_eq!(first, &[Key::Str("doc1".into())]);
        let second = trees[1].object_keys(trees[1].root.unwrap()).unwrap();
        assert_eq!(second, &[Key::Str("doc2".into())]);
    }

    #[test]
    fn leading_separator_makes_no_empty_document() {
        let trees = parse_multi(b"---\na: 1\n", Format::Tony).unwrap();
        assert_eq!(trees.len(), 1);
    }

    #[test]
    fn multi_doc_errors_name_the_document() {
        let err = parse_multi(b"a: 1\n---\n  bad: {\n", Format::Tony).unwrap_err();
        match err {
            ParseError::InDocument { index, start, .. } => {
                assert_eq!(index, 1);
                assert_eq!(start, 8);
            }
            other => panic!("expected InDocument, got {other}"),
        }
        let text = parse_multi(b"a: 1\n---\nb: {\n", Format::Tony)
            .unwrap_err()
            .to_string();
        assert!(text.contains("document 1"), "{text}");
    }

    #[test]
    fn multi_doc_round_trip() {
        let input = b"a: 1\n---\nb: 2\n";
        let trees = parse_multi(input, Format::Tony).unwrap();
        let out = encode_multi(&trees, &EncodeOptions::default()).unwrap();
        assert_eq!(out, String::from_utf8_lossy(input));
    }

    #[test]
    fn single_doc_rejects_separators() {
        assert!(parse(b"a: 1\n---\nb: 2\n").is_err());
    }

    #[test]
    fn position_map_round_trip() {
        let mut map = PositionMap::new();
        let tree = parse_with_positions(b"a: 7\n", Format::Tony, &mut map).unwrap();
        let root = tree.root.unwrap();
        let NodeData::Object { values, .. } = &tree.get(root).data else {
            panic!()
        };
        let pos = &map[&values[0]];
        assert_eq!((pos.offset, pos.line, pos.column), (3, 1, 4));
    }
}
