use crate::builder::rewrap;
use crate::node::{NodeData, NodeId, Tree};

/// The comment associator: a post-pass over every container fixing up the
/// builder's naive trailing attachment.
///
/// A comment that appears between sibling A and sibling B belongs as a head
/// comment to B; a comment block after the last element belongs to the
/// container itself. The builder left both appended to the previous
/// element's comment node; this pass walks each container left to right and
/// migrates every line beyond the element's inline quota. Running the pass
/// twice is equivalent to running it once.
pub fn associate(tree: &mut Tree) {
    let Some(root) = tree.root else { return };
    fix(tree, root);
    // The document acts as the root value's container: leftover lines on
    // the root become its trailing block.
    let surplus = take_surplus(tree, root);
    if !surplus.is_empty() {
        append_trailing(tree, root, surplus);
    }
}

fn fix(tree: &mut Tree, id: NodeId) {
    let children: Vec<NodeId> = match &tree.get(id).data {
        NodeData::Object { values, .. } => values.clone(),
        NodeData::Array { items } => items.clone(),
        NodeData::Comment { values, .. } => {
            for &v in &values.clone() {
                fix(tree, v);
            }
            return;
        }
        _ => return,
    };
    for i in 1..children.len() {
        let surplus = take_surplus(tree, children[i - 1]);
        if !surplus.is_empty() {
            head_wrap(tree, id, i, surplus);
        }
    }
    if let Some(&last) = children.last() {
        let surplus = take_surplus(tree, last);
        if !surplus.is_empty() {
            append_trailing(tree, id, surplus);
        }
    }
    // Children may have been re-wrapped; walk the current state.
    let children: Vec<NodeId> = match &tree.get(id).data {
        NodeData::Object { values, .. } => values.clone(),
        NodeData::Array { items } => items.clone(),
        _ => unreachable!("container shape cannot change"),
    };
    for child in children {
        fix(tree, child);
    }
}

/// Detach the migratable lines of an element's comment: everything past
/// the inline quota, short of any trailing block. Clears the slot when
/// nothing is left.
fn take_surplus(tree: &mut Tree, element: NodeId) -> Vec<String> {
    let Some(comment) = tree.get(element).comment else {
        return Vec::new();
    };
    let (surplus, now_empty) = {
        let NodeData::Comment {
            lines,
            inline,
            trailing,
            ..
        } = &mut tree.get_mut(comment).data
        else {
            unreachable!("comment slot holds a comment node")
        };
        let keep_end = lines.len() - *trailing;
        let quota = (*inline).min(keep_end);
        let surplus: Vec<String> = lines.drain(quota..keep_end).collect();
        (surplus, lines.is_empty())
    };
    if now_empty {
        tree.get_mut(element).comment = None;
    }
    surplus
}

/// Wrap the container's element at `slot` in a head comment carrying
/// `lines` (or prepend to an existing wrapper).
fn head_wrap(tree: &mut Tree, container: NodeId, slot: usize, lines: Vec<String>) {
    let element = match &tree.get(container).data {
        NodeData::Object { values, .. } => values[slot],
        NodeData::Array { items } => items[slot],
        _ => unreachable!("head_wrap on a scalar"),
    };
    if let NodeData::Comment { lines: existing, .. } = &mut tree.get_mut(element).data {
        let mut merged = lines;
        merged.append(existing);
        *existing = merged;
        return;
    }
    let wrapper = tree.add(NodeData::Comment {
        lines,
        inline: 0,
        trailing: 0,
        pad: 1,
        values: Vec::new(),
    });
    rewrap(tree, container, slot, wrapper);
}

/// Append lines to a node's trailing comment block.
fn append_trailing(tree: &mut Tree, node: NodeId, extra: Vec<String>) {
    let comment = match tree.get(node).comment {
        Some(c) => c,
        None => {
            let c = tree.add(NodeData::Comment {
                lines: Vec::new(),
                inline: 0,
                trailing: 0,
                pad: 1,
                values: Vec::new(),
            });
            tree.get_mut(c).parent = Some(node);
            tree.get_mut(node).comment = Some(c);
            c
        }
    };
    let NodeData::Comment { lines, trailing, .. } = &mut tree.get_mut(comment).data else {
        unreachable!("comment slot holds a comment node")
    };
    *trailing += extra.len();
    lines.extend(extra);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Key;
    use crate::{parse, NodeData};
    use pretty_assertions::assert_eq;

    fn comment_of(tree: &Tree, id: NodeId) -> Option<(Vec<String>, usize, usize)> {
        let comment = tree.get(id).comment?;
        match &tree.get(comment).data {
            NodeData::Comment {
                lines,
                inline,
                trailing,
                ..
            } => Some((lines.clone(), *inline, *trailing)),
            _ => None,
        }
    }

    #[test]
    fn between_siblings_binds_to_the_next() {
        let tree = parse(b"a: 1\n# commentary\nnext: 2\n").unwrap();
        let root = tree.root.unwrap();
        let NodeData::Object { keys, values } = &tree.get(root).data else {
            panic!()
        };
        assert_eq!(keys[1], Key::Str("next".into()));
        // `a`'s value keeps no comment.
        assert_eq!(comment_of(&tree, values[0]), None);
        // `next`'s value is wrapped by the head comment.
        match &tree.get(values[1]).data {
            NodeData::Comment { lines, values: wrapped, .. } => {
                assert_eq!(lines, &["commentary"]);
                assert_eq!(wrapped.len(), 1);
            }
            other => panic!("expected head wrapper, got {other:?}"),
        }
    }

    #[test]
    fn same_line_comment_stays_put() {
        let tree = parse(b"a: 1 # mine\nb: 2\n").unwrap();
        let root = tree.root.unwrap();
        let NodeData::Object { values, .. } = &tree.get(root).data else {
            panic!()
        };
        assert_eq!(
            comment_of(&tree, values[0]),
            Some((vec!["mine".into()], 1, 0))
        );
        assert_eq!(comment_of(&tree, values[1]), None);
    }

    #[test]
    fn surplus_after_inline_migrates() {
        let tree = parse(b"a: 1 # mine\n# theirs\nb: 2\n").unwrap();
        let root = tree.root.unwrap();
        let NodeData::Object { values, .. } = &tree.get(root).data else {
            panic!()
        };
        assert_eq!(
            comment_of(&tree, values[0]),
            Some((vec!["mine".into()], 1, 0))
        );
        match &tree.get(values[1]).data {
            NodeData::Comment { lines, .. } => assert_eq!(lines, &["theirs"]),
            other => panic!("expected head wrapper, got {other:?}"),
        }
    }

    #[test]
    fn trailing_block_attaches_to_container() {
        let tree = parse(b"a: 1\n# end one\n# end two\n").unwrap();
        let root = tree.root.unwrap();
        let (lines, inline, trailing) = comment_of(&tree, root).unwrap();
        assert_eq!(lines, vec!["end one".to_string(), "end two".to_string()]);
        assert_eq!(inline, 0);
        assert_eq!(trailing, 2);
        let NodeData::Object { values, .. } = &tree.get(root).data else {
            panic!()
        };
        assert_eq!(comment_of(&tree, values[0]), None);
    }

    #[test]
    fn indented_trailing_block_stays_with_its_container() {
        let tree = parse(b"a:\n  b: 1\n  # inner note\nc: 2\n").unwrap();
        let root = tree.root.unwrap();
        let NodeData::Object { values, .. } = &tree.get(root).data else {
            panic!()
        };
        let (lines, _, trailing) = comment_of(&tree, values[0]).unwrap();
        assert_eq!(lines, vec!["inner note".to_string()]);
        assert_eq!(trailing, 1);
        // `c` got nothing.
        assert_eq!(comment_of(&tree, values[1]), None);
        assert!(!matches!(tree.get(values[1]).data, NodeData::Comment { .. }));
    }

    #[test]
    fn multiline_string_keeps_its_aligned_block() {
        let tree = parse(b"\"one\"  # c1\n\"two\"  # c2\n").unwrap();
        let root = tree.root.unwrap();
        let (lines, inline, _) = comment_of(&tree, root).unwrap();
        assert_eq!(lines, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(inline, 2);
    }

    #[test]
    fn idempotent() {
        let inputs: [&[u8]; 4] = [
            b"a: 1 # mine\n# theirs\nb: 2\n",
            b"a: 1\n# end\n",
            b"a:\n  b: 1\n  # inner\nc: 2\n",
            b"# head\na: 1\n",
        ];
        for input in inputs {
            let once = parse(input).unwrap();
            let mut twice = once.clone();
            associate(&mut twice);
            assert!(
                once.node_eq(once.root.unwrap(), &twice, twice.root.unwrap()),
                "associate not idempotent for {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }
}
