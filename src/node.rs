use crate::token::Chomp;

/// Index of a node inside its [`Tree`] arena.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub usize);

/// The universal tree: an arena of nodes plus the root index.
///
/// Parent back-pointers are arena indices, never owning references, so the
/// structure is acyclic by construction; dropping the tree drops everything.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Tree {
    /// The node arena. Ids index into this vector.
    pub nodes: Vec<Node>,
    /// The root node, or `None` for a tree under construction.
    pub root: Option<NodeId>,
}

/// One IR node.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Node {
    /// The node type and payload.
    pub data: NodeData,
    /// A possibly composed tag (`!a.!b(x)`), if any.
    pub tag: Option<String>,
    /// The node's line/trailing comment, if any.
    pub comment: Option<NodeId>,
    /// The owning container, if any.
    pub parent: Option<NodeId>,
    /// How the parent refers to this node.
    pub parent_link: Option<ParentLink>,
}

/// The position of a node within its parent.
#[derive(Clone, PartialEq, Debug)]
pub enum ParentLink {
    /// An array element.
    Index(usize),
    /// A string-keyed object field.
    Field(String),
    /// An integer-keyed (sparse array) field.
    Sparse(i64),
}

/// Node types and payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NodeData {
    /// The null value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number; exactly one representation is authoritative.
    Number(Number),
    /// A single-line string.
    Str(String),
    /// A multi-line string, kept as decoded lines so the encoder can refold.
    MultiStr {
        /// The content lines.
        lines: Vec<String>,
        /// How the string was written.
        style: MultiStyle,
    },
    /// An object: two parallel ordered sequences of equal length. Keys are
    /// homogeneous: all strings, or all integers (a sparse array).
    Object {
        keys: Vec<Key>,
        values: Vec<NodeId>,
    },
    /// An array of values.
    Array { items: Vec<NodeId> },
    /// A comment. A head-comment wrapper holds the wrapped node in
    /// `values[0]`; a line/trailing comment has no values and lives in
    /// another node's `comment` slot.
    Comment {
        /// The comment text lines, without `#`.
        lines: Vec<String>,
        /// How many leading lines sat on the same line as the value they
        /// annotate (the associator's line-comment quota).
        inline: usize,
        /// How many final lines are a container's trailing block, exempt
        /// from sibling migration.
        trailing: usize,
        /// Recorded whitespace gap before `#`, for alignment.
        pad: usize,
        values: Vec<NodeId>,
    },
}

/// The coarse node type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NodeType {
    Null,
    Number,
    String,
    Bool,
    Object,
    Array,
    Comment,
}

/// A number payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Number {
    /// A 64-bit integer.
    Int(i64),
    /// A float whose shortest display round-trips its source text.
    Float(f64),
    /// Raw decimal text, kept verbatim (64-bit overflow, `1.0`, ...).
    Decimal(String),
}

/// The surface style of a multi-line string.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MultiStyle {
    /// Folded from consecutive quoted lines.
    Folded,
    /// A `|` block literal with its chomping indicator.
    Literal(Chomp),
}

/// An object key.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Key {
    Str(String),
    Int(i64),
    /// The reserved merge key `<<`. Kept apart from an ordinary string key
    /// `"<<"` so consumers (and the JSON flavor's refusal) can tell the
    /// operator from plain data.
    Merge,
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{i}"),
            Key::Merge => f.write_str("<<"),
        }
    }
}

impl NodeData {
    /// The coarse type of this payload.
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Null => NodeType::Null,
            NodeData::Bool(_) => NodeType::Bool,
            NodeData::Number(_) => NodeType::Number,
            NodeData::Str(_) | NodeData::MultiStr { .. } => NodeType::String,
            NodeData::Object { .. } => NodeType::Object,
            NodeData::Array { .. } => NodeType::Array,
            NodeData::Comment { .. } => NodeType::Comment,
        }
    }
}

impl Tree {
    pub fn new() -> Tree {
        Tree::default()
    }

    /// A tree holding a single null node.
    pub fn null() -> Tree {
        let mut tree = Tree::new();
        let root = tree.add(NodeData::Null);
        tree.root = Some(root);
        tree
    }

    /// A tree holding a single integer.
    pub fn from_int(value: i64) -> Tree {
        let mut tree = Tree::new();
        let root = tree.add(NodeData::Number(Number::Int(value)));
        tree.root = Some(root);
        tree
    }

    /// A tree holding a single string.
    pub fn from_str(value: &str) -> Tree {
        let mut tree = Tree::new();
        let root = tree.add(NodeData::Str(value.to_string()));
        tree.root = Some(root);
        tree
    }

    /// An array tree built from subtrees, in order.
    pub fn from_slice(items: impl IntoIterator<Item = Tree>) -> Tree {
        let mut tree = Tree::new();
        let root = tree.add(NodeData::Array { items: Vec::new() });
        tree.root = Some(root);
        for item in items {
            let Some(item_root) = item.root else { continue };
            let grafted = tree.graft(&item, item_root);
            tree.push_item(root, grafted);
        }
        tree
    }

    /// A string-keyed object tree built from `(key, subtree)` pairs, in
    /// order.
    pub fn from_map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Tree)>) -> Tree {
        let mut tree = Tree::new();
        let root = tree.add(NodeData::Object {
            keys: Vec::new(),
            values: Vec::new(),
        });
        tree.root = Some(root);
        for (key, value) in pairs {
            let Some(value_root) = value.root else { continue };
            let grafted = tree.graft(&value, value_root);
            tree.push_pair(root, Key::Str(key.into()), grafted);
        }
        tree
    }

    /// Append a detached node to the arena.
    pub fn add(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            ..Node::default()
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Append `item` to an array node, threading back-pointers.
    pub fn push_item(&mut self, array: NodeId, item: NodeId) {
        let index = match &mut self.nodes[array.0].data {
            NodeData::Array { items } => {
                items.push(item);
                items.len() - 1
            }
            NodeData::Comment { values, .. } => {
                values.push(item);
                values.len() - 1
            }
            other => panic!("push_item on non-array node {other:?}"),
        };
        let child = &mut self.nodes[item.0];
        child.parent = Some(array);
        child.parent_link = Some(ParentLink::Index(index));
    }

    /// Append a key/value pair to an object node, threading back-pointers.
    pub fn push_pair(&mut self, object: NodeId, key: Key, value: NodeId) {
        let link = match &key {
            Key::Str(s) => ParentLink::Field(s.clone()),
            Key::Int(i) => ParentLink::Sparse(*i),
            Key::Merge => ParentLink::Field("<<".to_string()),
        };
        match &mut self.nodes[object.0].data {
            NodeData::Object { keys, values } => {
                keys.push(key);
                values.push(value);
            }
            other => panic!("push_pair on non-object node {other:?}"),
        }
        let child = &mut self.nodes[value.0];
        child.parent = Some(object);
        child.parent_link = Some(link);
    }

    /// The keys of an object node, or `None` for any other type.
    pub fn object_keys(&self, id: NodeId) -> Option<&[Key]> {
        match &self.get(id).data {
            NodeData::Object { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// The value of a string-keyed object field, looking through head
    /// comment wrappers on both ends. The merge key answers to `"<<"`.
    pub fn get_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        match &self.get(self.unwrap_comment(id)).data {
            NodeData::Object { keys, values } => keys
                .iter()
                .position(|k| match k {
                    Key::Str(s) => s == field,
                    Key::Merge => field == "<<",
                    Key::Int(_) => false,
                })
                .map(|i| self.unwrap_comment(values[i])),
            _ => None,
        }
    }

    /// The element of an array (or the value of a sparse-array index),
    /// looking through head comment wrappers on both ends.
    pub fn get_index(&self, id: NodeId, index: i64) -> Option<NodeId> {
        match &self.get(self.unwrap_comment(id)).data {
            NodeData::Array { items } => usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).copied())
                .map(|v| self.unwrap_comment(v)),
            NodeData::Object { keys, values } => keys
                .iter()
                .position(|k| matches!(k, Key::Int(v) if *v == index))
                .map(|i| self.unwrap_comment(values[i])),
            _ => None,
        }
    }

    /// The text of a string node; multi-line strings materialize their
    /// lines with the recorded folding or chomping applied.
    pub fn string_value(&self, id: NodeId) -> Option<String> {
        match &self.get(self.unwrap_comment(id)).data {
            NodeData::Str(s) => Some(s.clone()),
            NodeData::MultiStr { lines, style } => {
                Some(crate::encoder::multistr_text(lines, *style))
            }
            _ => None,
        }
    }

    /// The node wrapped by a head-comment node, transparently; any other
    /// node resolves to itself.
    pub fn unwrap_comment(&self, id: NodeId) -> NodeId {
        match &self.get(id).data {
            NodeData::Comment { values, .. } if !values.is_empty() => values[0],
            _ => id,
        }
    }

    /// Preorder walk of the subtree under `id`.
    pub fn walk(&self, id: NodeId, visit: &mut impl FnMut(NodeId, &Node)) {
        let node = self.get(id);
        visit(id, node);
        match &node.data {
            NodeData::Object { values, .. } => {
                for &v in values {
                    self.walk(v, visit);
                }
            }
            NodeData::Array { items } => {
                for &v in items {
                    self.walk(v, visit);
                }
            }
            NodeData::Comment { values, .. } => {
                for &v in values {
                    self.walk(v, visit);
                }
            }
            _ => {}
        }
        if let Some(comment) = node.comment {
            self.walk(comment, visit);
        }
    }

    /// The JSON-Path-like address of a node, walking parent pointers to the
    /// root: `$`, then `.field` (quoted when the field contains any of
    /// `' . * $ [ ]`) or `[index]` segments. Sparse-array fields address
    /// like ordinary indices here; the snapshot layer's kinded `{index}`
    /// form is [`Snapshot::index_path`](crate::snapshot::Snapshot::index_path).
    pub fn path_of(&self, id: NodeId) -> String {
        self.render_path(id, false)
    }

    pub(crate) fn render_path(&self, id: NodeId, sparse_braces: bool) -> String {
        let mut segments = Vec::new();
        let mut cursor = id;
        loop {
            let node = self.get(cursor);
            let Some(parent) = node.parent else { break };
            // Head-comment wrappers are transparent in addresses, and a
            // node living in a comment slot contributes no segment.
            if !matches!(self.get(parent).data, NodeData::Comment { .. }) {
                match node.parent_link.as_ref() {
                    Some(ParentLink::Index(i)) => segments.push(format!("[{i}]")),
                    Some(ParentLink::Sparse(i)) => {
                        if sparse_braces {
                            segments.push(format!("{{{i}}}"));
                        } else {
                            segments.push(format!("[{i}]"));
                        }
                    }
                    Some(ParentLink::Field(name)) => {
                        if name.contains(&['\'', '.', '*', '$', '[', ']'][..]) {
                            segments.push(format!(".'{}'", name.replace('\'', "''")));
                        } else {
                            segments.push(format!(".{name}"));
                        }
                    }
                    None => {}
                }
            }
            cursor = parent;
        }
        let mut path = String::from("$");
        for seg in segments.iter().rev() {
            path.push_str(seg);
        }
        path
    }

    /// Deep structural equality of two subtrees: type, payload, tag,
    /// children, and comments all match.
    pub fn node_eq(&self, a: NodeId, other: &Tree, b: NodeId) -> bool {
        let na = self.get(a);
        let nb = other.get(b);
        if na.tag != nb.tag {
            return false;
        }
        match (&na.comment, &nb.comment) {
            (None, None) => {}
            (Some(ca), Some(cb)) => {
                if !self.node_eq(*ca, other, *cb) {
                    return false;
                }
            }
            _ => return false,
        }
        match (&na.data, &nb.data) {
            (NodeData::Null, NodeData::Null) => true,
            (NodeData::Bool(x), NodeData::Bool(y)) => x == y,
            (NodeData::Number(x), NodeData::Number(y)) => x == y,
            (NodeData::Str(x), NodeData::Str(y)) => x == y,
            (
                NodeData::MultiStr { lines: la, style: sa },
                NodeData::MultiStr { lines: lb, style: sb },
            ) => la == lb && sa == sb,
            (
                NodeData::Object { keys: ka, values: va },
                NodeData::Object { keys: kb, values: vb },
            ) => {
                ka == kb
                    && va.len() == vb.len()
                    && va
                        .iter()
                        .zip(vb)
                        .all(|(&x, &y)| self.node_eq(x, other, y))
            }
            (NodeData::Array { items: ia }, NodeData::Array { items: ib }) => {
                ia.len() == ib.len()
                    && ia
                        .iter()
                        .zip(ib)
                        .all(|(&x, &y)| self.node_eq(x, other, y))
            }
            (
                NodeData::Comment { lines: la, inline: xa, values: va, .. },
                NodeData::Comment { lines: lb, inline: xb, values: vb, .. },
            ) => {
                la == lb
                    && xa == xb
                    && va.len() == vb.len()
                    && va
                        .iter()
                        .zip(vb)
                        .all(|(&x, &y)| self.node_eq(x, other, y))
            }
            _ => false,
        }
    }

    /// Copy the subtree rooted at `id` in `source` into this arena,
    /// returning the copied root. Back-pointers are rebuilt inside the
    /// copy; the copied root is left detached.
    pub fn graft(&mut self, source: &Tree, id: NodeId) -> NodeId {
        let src = source.get(id);
        let copy = self.add(NodeData::Null);
        self.nodes[copy.0].tag = src.tag.clone();
        let data = match &src.data {
            NodeData::Object { keys, values } => {
                let mut new_values = Vec::with_capacity(values.len());
                for (key, &value) in keys.iter().zip(values) {
                    let child = self.graft(source, value);
                    new_values.push(child);
                    let link = match key {
                        Key::Str(s) => ParentLink::Field(s.clone()),
                        Key::Int(i) => ParentLink::Sparse(*i),
                        Key::Merge => ParentLink::Field("<<".to_string()),
                    };
                    let node = &mut self.nodes[child.0];
                    node.parent = Some(copy);
                    node.parent_link = Some(link);
                }
                NodeData::Object {
                    keys: keys.clone(),
                    values: new_values,
                }
            }
            NodeData::Array { items } => {
                let mut new_items = Vec::with_capacity(items.len());
                for (index, &item) in items.iter().enumerate() {
                    let child = self.graft(source, item);
                    new_items.push(child);
                    let node = &mut self.nodes[child.0];
                    node.parent = Some(copy);
                    node.parent_link = Some(ParentLink::Index(index));
                }
                NodeData::Array { items: new_items }
            }
            NodeData::Comment { lines, inline, trailing, pad, values } => {
                let mut new_values = Vec::with_capacity(values.len());
                for (index, &value) in values.iter().enumerate() {
                    let child = self.graft(source, value);
                    new_values.push(child);
                    let node = &mut self.nodes[child.0];
                    node.parent = Some(copy);
                    node.parent_link = Some(ParentLink::Index(index));
                }
                NodeData::Comment {
                    lines: lines.clone(),
                    inline: *inline,
                    trailing: *trailing,
                    pad: *pad,
                    values: new_values,
                }
            }
            scalar => scalar.clone(),
        };
        self.nodes[copy.0].data = data;
        if let Some(comment) = src.comment {
            let comment_copy = self.graft(source, comment);
            self.nodes[copy.0].comment = Some(comment_copy);
        }
        copy
    }

    /// Extract the subtree rooted at `id` into its own tree.
    pub fn subtree(&self, id: NodeId) -> Tree {
        let mut tree = Tree::new();
        let root = tree.graft(self, id);
        tree.root = Some(root);
        tree
    }
}
