/// One lexical token.
///
/// `bytes` is an owned copy of the contiguous source range the token covers
/// (owned rather than borrowed because in streaming mode the source is not
/// retained). Synthetic tokens injected by the balancer carry empty `bytes`.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Token {
    /// The token kind and decoded payload.
    pub data: TokenData,
    /// The raw source bytes of the token.
    pub bytes: Vec<u8>,
    /// Absolute byte offset of the first byte.
    pub offset: usize,
}

impl Token {
    pub(crate) fn new(data: TokenData, bytes: Vec<u8>, offset: usize) -> Token {
        Token {
            data,
            bytes,
            offset,
        }
    }

    /// A balancer-made token with no source bytes behind it.
    pub(crate) fn synthetic(data: TokenData, offset: usize) -> Token {
        Token {
            data,
            bytes: Vec::new(),
            offset,
        }
    }

    /// The token's raw text, lossily decoded.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Token kinds.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum TokenData {
    /// The run of spaces that opens a line. Bytes are the spaces.
    Indent,
    /// A `---` document separator on its own line.
    DocSeparator,
    /// An array-element marker (`- `).
    Dash,
    /// A key/value separator.
    Colon,
    /// An element separator inside brackets.
    Comma,
    /// `{`
    CurlyOpen,
    /// `}`
    CurlyClose,
    /// `[`
    SquareOpen,
    /// `]`
    SquareClose,
    /// A plain (unquoted) scalar. Bytes are the text.
    Literal,
    /// A quoted string on a single line.
    Quoted {
        /// The decoded value (escapes resolved).
        value: String,
    },
    /// A Tony multi-line string folded from consecutive quoted lines.
    MultiString {
        /// Decoded content lines, one per source line.
        lines: Vec<String>,
    },
    /// A block literal introduced by `|`.
    BlockLiteral {
        /// Dedented content lines.
        lines: Vec<String>,
        /// The chomping indicator.
        chomp: Chomp,
    },
    /// An integer-shaped number. Decoding happens in the builder from
    /// `bytes`, so 64-bit overflow degrades to raw-decimal text.
    Integer,
    /// A float-shaped number (fraction and/or exponent present).
    Float,
    /// The keyword `true`.
    True,
    /// The keyword `false`.
    False,
    /// The keyword `null`.
    Null,
    /// A tag, starting with `!`.
    Tag {
        /// The full tag text including `!` and any arguments.
        name: String,
    },
    /// The merge key `<<`.
    MergeKey,
    /// A comment on its own line (no value seen yet on the line).
    HeadComment {
        /// The comment text without `#`.
        text: String,
    },
    /// A comment on the same line as a value or key/value separator. Bytes
    /// include the whitespace gap before `#` so alignment survives.
    LineComment {
        /// The comment text without `#`.
        text: String,
    },
}

impl TokenData {
    /// Does this token stand for (or open) a value?
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            TokenData::Literal
                | TokenData::Quoted { .. }
                | TokenData::MultiString { .. }
                | TokenData::BlockLiteral { .. }
                | TokenData::Integer
                | TokenData::Float
                | TokenData::True
                | TokenData::False
                | TokenData::Null
                | TokenData::MergeKey
                | TokenData::CurlyOpen
                | TokenData::SquareOpen
        )
    }

    /// Is this a head or line comment?
    pub fn is_comment(&self) -> bool {
        matches!(
            self,
            TokenData::HeadComment { .. } | TokenData::LineComment { .. }
        )
    }
}

/// The chomping indicator of a block literal.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum Chomp {
    /// No indicator: exactly one trailing newline.
    #[default]
    Clip = 0,
    /// `-`: strip all trailing newlines.
    Strip = 1,
    /// `+`: keep trailing blank lines.
    Keep = 2,
}
