macro_rules! CHECK_AT {
    ($buffer:expr, $octet:expr, $offset:expr) => {
        $buffer.get($offset).copied() == Some($octet)
    };
}

macro_rules! CHECK {
    ($buffer:expr, $octet:expr) => {
        CHECK_AT!($buffer, $octet, 0)
    };
}

macro_rules! IS_BLANK_AT {
    ($buffer:expr, $offset:expr) => {
        $crate::macros::is_blank($buffer.get($offset).copied())
    };
}

macro_rules! IS_BLANKZ_AT {
    ($buffer:expr, $offset:expr) => {
        $crate::macros::is_blankz($buffer.get($offset).copied())
    };
}

macro_rules! IS_DIGIT_AT {
    ($buffer:expr, $offset:expr) => {
        $buffer
            .get($offset)
            .copied()
            .map(|b| b.is_ascii_digit())
            .unwrap_or(false)
    };
}

pub(crate) fn is_space(b: impl Into<Option<u8>>) -> bool {
    b.into() == Some(b' ')
}

pub(crate) fn is_tab(b: impl Into<Option<u8>>) -> bool {
    b.into() == Some(b'\t')
}

pub(crate) fn is_blank(b: impl Into<Option<u8>>) -> bool {
    let b = b.into();
    is_space(b) || is_tab(b)
}

pub(crate) fn is_break(b: impl Into<Option<u8>>) -> bool {
    matches!(b.into(), Some(b'\r' | b'\n'))
}

pub(crate) fn is_breakz(b: impl Into<Option<u8>>) -> bool {
    let b = b.into();
    b.is_none() || is_break(b)
}

pub(crate) fn is_blankz(b: impl Into<Option<u8>>) -> bool {
    let b = b.into();
    is_blank(b) || is_breakz(b)
}

/// A byte that may continue an identifier-like word. Keywords (`null`,
/// `true`, `false`) are only keywords when the following byte is not one of
/// these.
pub(crate) fn is_word(b: impl Into<Option<u8>>) -> bool {
    let Some(b) = b.into() else {
        return false;
    };
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Structural bytes that terminate unbracketed lexemes.
pub(crate) fn is_structural(b: impl Into<Option<u8>>) -> bool {
    matches!(b.into(), Some(b'{' | b'}' | b'[' | b']' | b',' | b':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers() {
        assert!(is_blank(b' '));
        assert!(is_blank(b'\t'));
        assert!(!is_blank(b'x'));
        assert!(is_break(b'\n'));
        assert!(is_breakz(None));
        assert!(is_blankz(Some(b'\r')));
        assert!(is_word(b'z') && is_word(b'-') && !is_word(b' '));
        assert!(is_structural(b':') && !is_structural(b'#'));
    }
}
