use crate::position::Position;

/// Lexical errors raised by the scanner.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TokenizeError {
    #[error("tokenize: unterminated {what} string {0}", what = .1)]
    UnterminatedString(Position, &'static str),
    #[error("tokenize: invalid UTF-8 sequence {0}")]
    InvalidUtf8(Position),
    #[error("tokenize: control character in string {0}")]
    ControlCharacter(Position),
    #[error("tokenize: invalid escape sequence {0}")]
    InvalidEscape(Position),
    #[error("tokenize: integer with leading zero {0}")]
    LeadingZero(Position),
    #[error("tokenize: malformed number {0}")]
    MalformedNumber(Position),
    #[error("tokenize: unexpected closing bracket {0}")]
    StrayClose(Position),
    #[error("tokenize: single-quoted strings are not valid JSON {0}")]
    SingleQuote(Position),
    #[error("tokenize: invalid character in tag {0}")]
    InvalidTag(Position),
    #[error("tokenize: character cannot start a token {0}")]
    UnexpectedCharacter(Position),
}

/// Structural indent/bracket errors raised by the balancer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BalanceError {
    #[error("balance: unterminated bracket {0}")]
    UnterminatedBracket(Position),
    #[error("balance: closing bracket was never opened {0}")]
    UnopenedBracket(Position),
    #[error("balance: expected indent of {expected}, found {found} {position}")]
    MisalignedIndent {
        expected: usize,
        found: usize,
        position: Position,
    },
    #[error("balance: object key is not followed by ':' {0}")]
    KeyWithoutColon(Position),
    #[error("balance: unexpected token {0}")]
    UnexpectedToken(Position),
}

/// Key-shape errors raised by the tree builder.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    #[error("key: object mixes string and integer keys {0}")]
    MixedKeyTypes(Position),
    #[error("key: integer key does not fit in 64 bits {0}")]
    IntegerOverflow(Position),
    #[error("key: tag is not allowed in key position {0}")]
    TagOnKey(Position),
    #[error("key: token cannot be used as an object key {0}")]
    BadKeyToken(Position),
}

/// Any failure while turning source text into a tree.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("parse: unexpected end of document {0}")]
    UnexpectedEnd(Position),
    #[error("parse: unexpected token {0}")]
    UnexpectedToken(Position),
    #[error("parse: document {index} (bytes {start}..{end}): {source}")]
    InDocument {
        /// Zero-based index of the failing document in a `---` stream.
        index: usize,
        /// Byte range of the failing document.
        start: usize,
        end: usize,
        source: Box<ParseError>,
    },
}

/// Failures while rendering a tree back to text.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EncodeError {
    #[error("encode: {0} cannot be represented in JSON")]
    JsonIncompatible(&'static str),
    #[error("encode: string contains a control character")]
    ControlCharacter,
}

/// Failures in the snapshot codec.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("snapshot: index length {len} exceeds file size {file}")]
    InvalidIndexLength { len: u64, file: u64 },
    #[error("snapshot: file too short for index header")]
    TruncatedHeader,
    #[error("snapshot: corrupt tag arguments on `{tag}`")]
    CorruptTagArguments { tag: String },
    #[error("snapshot: location is not a two-element [offset, size] array")]
    CorruptLocation,
    #[error("snapshot: chunk at offset {offset} is shorter than {size} bytes")]
    ShortChunk { offset: u64, size: u64 },
    #[error("snapshot: index shape is corrupt")]
    CorruptIndex,
    #[error("snapshot: element {0} is outside the snapshot root")]
    NoSuchElement(usize),
    #[error("snapshot: field `{0}` is outside the snapshot root")]
    NoSuchField(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
