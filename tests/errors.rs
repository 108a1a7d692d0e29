//! The error taxonomy and the user-visible message form.

use tony::{parse, parse_format, parse_multi, BalanceError, Format, KeyError, ParseError, TokenizeError};

#[test]
fn tokenize_errors_surface_through_parse() {
    let cases: [(&[u8], fn(&TokenizeError) -> bool); 5] = [
        (b"a: 01\n", |e| matches!(e, TokenizeError::LeadingZero(_))),
        (b"a: \"oops\n", |e| {
            matches!(e, TokenizeError::UnterminatedString(..))
        }),
        (b"a: \"\\q\"\n", |e| matches!(e, TokenizeError::InvalidEscape(_))),
        (b"]\n", |e| matches!(e, TokenizeError::StrayClose(_))),
        (b"a: \"\xc3\x28\"\n", |e| matches!(e, TokenizeError::InvalidUtf8(_))),
    ];
    for (input, check) in cases {
        match parse(input) {
            Err(ParseError::Tokenize(e)) => assert!(check(&e), "wrong kind for {input:?}: {e}"),
            other => panic!("expected tokenize error for {input:?}, got {other:?}"),
        }
    }
}

#[test]
fn balance_errors() {
    assert!(matches!(
        parse(b"a:\n   b: 1\n"),
        Err(ParseError::Balance(BalanceError::MisalignedIndent { .. }))
    ));
    assert!(matches!(
        parse(b"{a: 1\n"),
        Err(ParseError::Balance(BalanceError::UnterminatedBracket(_)))
    ));
    assert!(matches!(
        parse(b"a: 1\njunk\n"),
        Err(ParseError::Balance(BalanceError::KeyWithoutColon(_)))
    ));
}

#[test]
fn key_errors() {
    assert!(matches!(
        parse(b"a: 1\n2: b\n"),
        Err(ParseError::Key(KeyError::MixedKeyTypes(_)))
    ));
    assert!(matches!(
        parse(b"99999999999999999999: x\n"),
        Err(ParseError::Key(KeyError::IntegerOverflow(_)))
    ));
    assert!(matches!(
        parse(b"{!t k: 1}\n"),
        Err(ParseError::Key(KeyError::TagOnKey(_)))
    ));
}

#[test]
fn message_form_has_context_offset_line_col() {
    let err = parse(b"key: 0123\n").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("tokenize:"), "{text}");
    assert!(text.contains('`'), "{text}");
    assert!(text.contains("offset 5"), "{text}");
    assert!(text.contains("(line=1, col=6)"), "{text}");
}

#[test]
fn multi_document_errors_carry_index_and_range() {
    let err = parse_multi(b"fine: 1\n---\nbroken: {\n", Format::Tony).unwrap_err();
    let ParseError::InDocument { index, start, end, source } = &err else {
        panic!("expected InDocument, got {err}");
    };
    assert_eq!(*index, 1);
    assert!(*start > 0 && end > start);
    assert!(matches!(
        **source,
        ParseError::Balance(BalanceError::UnterminatedBracket(_))
    ));
    let text = err.to_string();
    assert!(text.contains("document 1"), "{text}");
}

#[test]
fn json_is_strict() {
    assert!(parse_format(b"a: 1\n", Format::Json).is_err());
    assert!(parse_format(b"{'a': 1}", Format::Json).is_err());
    assert!(parse_format(b"{\"a\": 1} # no comments", Format::Json).is_err());
    assert!(parse_format(b"[1, 2", Format::Json).is_err());
    assert!(parse_format(br#"{"a": nul}"#, Format::Json).is_err());
}

#[test]
fn positions_point_at_the_problem() {
    let err = parse(b"ok: 1\nbad: \"unterminated\n").unwrap_err();
    let ParseError::Tokenize(TokenizeError::UnterminatedString(pos, kind)) = err else {
        panic!("wrong error: {err}");
    };
    assert_eq!(kind, "double-quoted");
    assert_eq!(pos.offset, 11);
    assert_eq!((pos.line, pos.column), (2, 6));
    assert!(pos.context.contains("untermina"), "{}", pos.context);
}
