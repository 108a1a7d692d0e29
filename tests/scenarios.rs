//! End-to-end scenarios over the whole pipeline.

use std::cell::Cell;

use pretty_assertions::assert_eq;
use tony::snapshot::{ReadAt, Snapshot, SnapshotWriter};
use tony::{
    balance, encode, parse, parse_format, parse_multi, tokenize, EncodeOptions, Format, Key,
    NodeData, Number, Tree,
};

#[test]
fn s1_json_null_key() {
    let tree = parse_format(br#"{"null": null}"#, Format::Json).unwrap();
    let root = tree.root.unwrap();
    let NodeData::Object { keys, values } = &tree.get(root).data else {
        panic!("expected object root");
    };
    assert_eq!(keys, &[Key::Str("null".into())]);
    assert_eq!(tree.get(values[0]).data, NodeData::Null);
    let out = encode(&tree, &EncodeOptions::json()).unwrap();
    assert_eq!(out, r#"{"null":null}"#);
}

#[test]
fn s2_dash_array() {
    let input = b"- 1\n- 2\n- 3\n";
    let tree = parse(input).unwrap();
    let root = tree.root.unwrap();
    let NodeData::Array { items } = &tree.get(root).data else {
        panic!("expected array root");
    };
    let numbers: Vec<i64> = items
        .iter()
        .map(|&i| match &tree.get(i).data {
            NodeData::Number(Number::Int(v)) => *v,
            other => panic!("expected int, got {other:?}"),
        })
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    // The balancer wraps the elements in explicit squares.
    let (tokens, doc) = tokenize(input, Format::Tony).unwrap();
    let balanced = balance(&tokens, Format::Tony, &doc).unwrap();
    use tony::TokenData;
    let kinds: Vec<&TokenData> = balanced.iter().map(|t| &t.data).collect();
    assert!(matches!(kinds.first(), Some(TokenData::SquareOpen)));
    assert!(matches!(kinds.last(), Some(TokenData::SquareClose)));
    assert_eq!(
        balanced
            .iter()
            .filter(|t| matches!(t.data, TokenData::Integer))
            .count(),
        3
    );
}

#[test]
fn s3_nested_object_byte_round_trip() {
    let input = "a: 1\nb:\n  c: 2\n  d: 3\n";
    let tree = parse(input.as_bytes()).unwrap();
    let root = tree.root.unwrap();
    let NodeData::Object { keys, values } = &tree.get(root).data else {
        panic!("expected object root");
    };
    assert_eq!(keys, &[Key::Str("a".into()), Key::Str("b".into())]);
    let NodeData::Object { keys: inner, .. } = &tree.get(values[1]).data else {
        panic!("expected nested object");
    };
    assert_eq!(inner, &[Key::Str("c".into()), Key::Str("d".into())]);
    assert_eq!(encode(&tree, &EncodeOptions::default()).unwrap(), input);
}

#[test]
fn s4_multi_document() {
    let trees = parse_multi(b"doc1: true\n---\ndoc2: false\n", Format::Tony).unwrap();
    assert_eq!(trees.len(), 2);
    for (tree, expected) in trees.iter().zip(["doc1", "doc2"]) {
        let keys = tree.object_keys(tree.root.unwrap()).unwrap();
        assert_eq!(keys, &[Key::Str(expected.into())]);
    }
}

#[test]
fn s5_keyed_array_tag() {
    let tree = parse(b"!key(name)\n- name: 1\n- name: 2\n").unwrap();
    let root = tree.root.unwrap();
    let node = tree.get(root);
    let NodeData::Array { items } = &node.data else {
        panic!("expected array root");
    };
    assert_eq!(items.len(), 2);
    for &item in items {
        let keys = tree.object_keys(item).unwrap();
        assert_eq!(keys, &[Key::Str("name".into())]);
    }
    let tag = node.tag.as_deref().unwrap();
    let (name, args, rest) = tony::tag::args(tag);
    assert_eq!(name, "!key");
    assert_eq!(args, vec!["name"]);
    assert_eq!(rest, "");
}

struct CountingReader<'a> {
    inner: &'a [u8],
    reads: Cell<usize>,
}

impl ReadAt for CountingReader<'_> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read_at(buf, offset)
    }
}

#[test]
fn s6_snapshot_single_read_element_load() {
    let payload = |i: usize| {
        let digits = i.to_string();
        let mut s = digits.clone();
        s.push('.');
        while s.len() < 800 {
            s.push((b'a' + ((i + s.len()) % 26) as u8) as char);
        }
        s
    };
    let items: Vec<Tree> = (0..10_000).map(|i| Tree::from_str(&payload(i))).collect();
    let tree = Tree::from_slice(items);
    let bytes = SnapshotWriter::with_threshold(4096).write(&tree).unwrap();

    let reader = CountingReader {
        inner: &bytes,
        reads: Cell::new(0),
    };
    let snapshot = Snapshot::open(&reader).unwrap();
    let before = reader.reads.get();
    let element = snapshot.load_element(7_042).unwrap();
    assert_eq!(
        reader.reads.get() - before,
        1,
        "element load must perform exactly one read_at"
    );
    match &element.get(element.root.unwrap()).data {
        NodeData::Str(s) => assert_eq!(s, &payload(7_042)),
        other => panic!("expected string element, got {other:?}"),
    }
}

#[test]
fn boundary_empty_and_comment_documents() {
    let tree = parse(b"").unwrap();
    assert!(matches!(tree.get(tree.root.unwrap()).data, NodeData::Null));

    let tree = parse(b"# only a comment\n").unwrap();
    match &tree.get(tree.root.unwrap()).data {
        NodeData::Comment { lines, values, .. } => {
            assert_eq!(lines, &["only a comment"]);
            assert!(values.is_empty());
        }
        other => panic!("expected comment document, got {other:?}"),
    }
}

#[test]
fn boundary_scalar_comment_binding() {
    // Same line: attached. Next line: the document's trailing block.
    let tree = parse(b"42 # same line\n").unwrap();
    let root = tree.root.unwrap();
    assert!(tree.get(root).comment.is_some());

    let tree = parse(b"42\n# next line\n").unwrap();
    let root = tree.root.unwrap();
    let comment = tree.get(root).comment.unwrap();
    match &tree.get(comment).data {
        NodeData::Comment { inline, trailing, .. } => {
            assert_eq!(*inline, 0);
            assert_eq!(*trailing, 1);
        }
        _ => panic!(),
    }
}

#[test]
fn boundary_nullable_is_a_literal() {
    let tree = parse(b"nullable\n").unwrap();
    assert_eq!(
        tree.get(tree.root.unwrap()).data,
        NodeData::Str("nullable".into())
    );
}
