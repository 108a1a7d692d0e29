//! The tag grammar.
//!
//! A tag is a non-empty string starting with `!`. Simple tags compose with
//! `.` in outermost-last order and may carry a parenthesized argument list:
//! `!key(name)`, `!snap-range(3,7)`, `!sparsearray.!bracket`. Argument
//! parsing is purely syntactic.

/// Compose `outer` (with optional `args`) onto an existing tag.
///
/// The result is `inner "." outer(args)` — outermost last:
///
/// ```
/// assert_eq!(tony::tag::compose("!bracket", None, Some("!sparsearray")),
///            "!sparsearray.!bracket");
/// assert_eq!(tony::tag::compose("!snap-range", Some(&["3", "7"]), None),
///            "!snap-range(3,7)");
/// ```
pub fn compose(outer: &str, args: Option<&[&str]>, inner: Option<&str>) -> String {
    let mut tag = String::new();
    if let Some(inner) = inner {
        if !inner.is_empty() {
            tag.push_str(inner);
            tag.push('.');
        }
    }
    tag.push_str(outer);
    if let Some(args) = args {
        tag.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                tag.push(',');
            }
            tag.push_str(arg);
        }
        tag.push(')');
    }
    tag
}

/// Does any simple component of `tag` equal `needle`?
///
/// Component names are compared with their argument list stripped and the
/// leading `!` normalized, so `has("!a.!key(name)", "!key")` holds.
pub fn has(tag: &str, needle: &str) -> bool {
    let needle = needle.strip_prefix('!').unwrap_or(needle);
    components(tag).any(|c| name_of(c) == needle)
}

/// Split the outermost (last) component off a composed tag.
///
/// Returns `(outer_name, args, rest)` where `outer_name` keeps its leading
/// `!` if it had one, `args` are the raw argument texts, and `rest` is the
/// remaining inner composition (empty for a simple tag).
pub fn args(tag: &str) -> (String, Vec<String>, String) {
    let (rest, outer) = match split_last(tag) {
        Some((rest, outer)) => (rest, outer),
        None => ("", tag),
    };
    let (name, arglist) = match outer.find('(') {
        Some(open) if outer.ends_with(')') => {
            let inner = &outer[open + 1..outer.len() - 1];
            let arglist = if inner.is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|a| a.trim().to_string()).collect()
            };
            (&outer[..open], arglist)
        }
        _ => (outer, Vec::new()),
    };
    (name.to_string(), arglist, rest.to_string())
}

/// Iterate the simple components of a composed tag, splitting on `.` that
/// sit outside parentheses.
fn components(tag: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, b) in tag.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'.' if depth == 0 => {
                parts.push(&tag[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tag[start..]);
    parts.into_iter().filter(|p| !p.is_empty())
}

/// `(rest, last_component)` for a composed tag, or `None` if simple.
fn split_last(tag: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut split = None;
    for (i, b) in tag.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'.' if depth == 0 => split = Some(i),
            _ => {}
        }
    }
    split.map(|i| (&tag[..i], &tag[i + 1..]))
}

/// The component's name: args stripped, leading `!` stripped.
fn name_of(component: &str) -> &str {
    let name = match component.find('(') {
        Some(open) => &component[..open],
        None => component,
    };
    name.strip_prefix('!').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_is_outermost_last() {
        assert_eq!(compose("!bracket", None, None), "!bracket");
        assert_eq!(
            compose("!bracket", None, Some("!sparsearray")),
            "!sparsearray.!bracket"
        );
        assert_eq!(
            compose("!snap-chunks", None, Some("!sparsearray.!bracket")),
            "!sparsearray.!bracket.!snap-chunks"
        );
    }

    #[test]
    fn compose_with_args() {
        assert_eq!(compose("!snap-range", Some(&["3", "7"]), None), "!snap-range(3,7)");
        assert_eq!(compose("!key", Some(&["name"]), Some("!a")), "!a.!key(name)");
    }

    #[test]
    fn has_matches_any_component() {
        assert!(has("!sparsearray.!bracket", "!bracket"));
        assert!(has("!sparsearray.!bracket", "!sparsearray"));
        assert!(!has("!sparsearray.!bracket", "!snap-loc"));
        assert!(has("!a.!key(name)", "!key"));
        assert!(has("!key(name)", "key"));
    }

    #[test]
    fn args_splits_the_outermost_component() {
        let (name, list, rest) = args("!snap-range(3,7)");
        assert_eq!(name, "!snap-range");
        assert_eq!(list, vec!["3", "7"]);
        assert_eq!(rest, "");

        let (name, list, rest) = args("!sparsearray.!snap-chunks(map)");
        assert_eq!(name, "!snap-chunks");
        assert_eq!(list, vec!["map"]);
        assert_eq!(rest, "!sparsearray");

        let (name, list, rest) = args("!key(a,b).!bracket");
        assert_eq!(name, "!bracket");
        assert!(list.is_empty());
        assert_eq!(rest, "!key(a,b)");
    }

    #[test]
    fn dots_inside_args_do_not_split() {
        assert!(has("!key(a.b)", "!key"));
        let (name, list, rest) = args("!key(a.b)");
        assert_eq!(name, "!key");
        assert_eq!(list, vec!["a.b"]);
        assert_eq!(rest, "");
    }
}
