//! The snapshot archive codec.
//!
//! A snapshot is `[4 bytes: big-endian u32 index_length] [index_bytes]
//! [data chunks...]`. The index bytes are the Tony encoding of an *index
//! tree* that mirrors the top of the stored tree: subtrees whose encoding
//! is below the writer's threshold are embedded verbatim; a large scalar
//! becomes a `!snap-loc [offset, size]` leaf; a large container becomes an
//! array of parts tagged `!snap-chunks(...)`, where runs of consecutive
//! small children collapse into `!snap-range(from,to) [offset, size]`
//! chunks. Offsets are relative to the start of the data section, and the
//! threshold is recorded nowhere: readers must not assume it.

use std::io::Write;

use crate::api::{encode, EncodeOptions};
use crate::error::SnapshotError;
use crate::node::{Key, NodeData, NodeId, Number, Tree};
use crate::tag;
use crate::{BRACKET_TAG, SNAP_CHUNKS_TAG, SNAP_LOC_TAG, SNAP_RANGE_TAG, SPARSE_ARRAY_TAG};

/// The default chunking threshold, in bytes.
pub const DEFAULT_THRESHOLD: usize = 4096;

/// A source of positional reads. The snapshot reader never seeks, so one
/// handle may serve concurrent readers.
pub trait ReadAt {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;
}

#[cfg(unix)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        if offset >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - offset);
        buf[..n].copy_from_slice(&self[offset..offset + n]);
        Ok(n)
    }
}

impl ReadAt for &[u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<R: ReadAt> ReadAt for &R {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Fill `buf` completely from `offset`, or report how much was available.
fn read_full_at<R: ReadAt + ?Sized>(
    reader: &R,
    buf: &mut [u8],
    mut offset: u64,
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read_at(&mut buf[filled..], offset)?;
        if n == 0 {
            break;
        }
        filled += n;
        offset += n as u64;
    }
    Ok(filled)
}

/// Writes snapshots with a configurable chunking threshold.
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    threshold: usize,
}

impl Default for SnapshotWriter {
    fn default() -> SnapshotWriter {
        SnapshotWriter::new()
    }
}

impl SnapshotWriter {
    pub fn new() -> SnapshotWriter {
        SnapshotWriter::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> SnapshotWriter {
        SnapshotWriter {
            threshold: threshold.max(1),
        }
    }

    /// Serialize a tree into snapshot bytes.
    pub fn write(&self, tree: &Tree) -> Result<Vec<u8>, SnapshotError> {
        let mut index = Tree::new();
        let mut data: Vec<u8> = Vec::new();
        if let Some(root) = tree.root {
            let index_root = self.index_node(tree, root, &mut index, &mut data)?;
            index.root = Some(index_root);
        }
        let index_bytes = encode(&index, &EncodeOptions::default())?;
        let mut out = Vec::with_capacity(4 + index_bytes.len() + data.len());
        out.extend_from_slice(&(index_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(index_bytes.as_bytes());
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Serialize a tree into a writer.
    pub fn write_to<W: Write>(&self, tree: &Tree, writer: &mut W) -> Result<(), SnapshotError> {
        let bytes = self.write(tree)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Build the index representation of one subtree, spilling large
    /// payloads into the data section.
    fn index_node(
        &self,
        src: &Tree,
        id: NodeId,
        index: &mut Tree,
        data: &mut Vec<u8>,
    ) -> Result<NodeId, SnapshotError> {
        let encoded = encode_subtree(src, id)?;
        if encoded.len() < self.threshold {
            return Ok(index.graft(src, id));
        }
        match &src.get(id).data {
            NodeData::Object { .. } | NodeData::Array { .. } => {
                self.index_container(src, id, index, data)
            }
            _ => Ok(loc_leaf(index, data, encoded.as_bytes())),
        }
    }

    fn index_container(
        &self,
        src: &Tree,
        id: NodeId,
        index: &mut Tree,
        data: &mut Vec<u8>,
    ) -> Result<NodeId, SnapshotError> {
        let node = src.get(id);
        let (children, keys): (Vec<NodeId>, Option<Vec<Key>>) = match &node.data {
            NodeData::Object { keys, values } => (values.clone(), Some(keys.clone())),
            NodeData::Array { items } => (items.clone(), None),
            _ => unreachable!("index_container on a scalar"),
        };
        let is_map = keys.is_some();
        let src_tag = node.tag.as_deref();
        let is_sparse = src_tag.is_some_and(|t| tag::has(t, SPARSE_ARRAY_TAG));
        let is_bracket = src_tag.is_some_and(|t| tag::has(t, BRACKET_TAG));

        let mut args: Vec<&str> = vec![if is_map { "map" } else { "seq" }];
        if is_sparse {
            args.push("sparse");
        }
        if is_bracket {
            args.push("bracket");
        }
        let parts = index.add(NodeData::Array { items: Vec::new() });
        index.get_mut(parts).tag = Some(tag::compose(SNAP_CHUNKS_TAG, Some(&args), src_tag));
        if let Some(comment) = node.comment {
            let grafted = index.graft(src, comment);
            index.get_mut(parts).comment = Some(grafted);
        }

        // A run of consecutive small children accumulates into a range;
        // large children finalize the run and stand on their own.
        let mut run: Vec<usize> = Vec::new();
        let mut run_size = 0usize;
        for (child_index, &child) in children.iter().enumerate() {
            let encoded = match &keys {
                Some(keys) => encode_pair(src, &keys[child_index], child)?,
                None => encode_subtree(src, child)?,
            };
            if encoded.len() >= self.threshold {
                self.finalize_run(src, id, &mut run, &mut run_size, index, parts, data)?;
                let inner = src.unwrap_comment(child);
                let part = match &src.get(inner).data {
                    NodeData::Object { .. } | NodeData::Array { .. } if inner == child => {
                        self.index_container(src, child, index, data)?
                    }
                    _ => {
                        let value = encode_subtree(src, child)?;
                        loc_leaf(index, data, value.as_bytes())
                    }
                };
                let part = match &keys {
                    Some(keys) => {
                        let pair = index.add(NodeData::Object {
                            keys: Vec::new(),
                            values: Vec::new(),
                        });
                        index.push_pair(pair, keys[child_index].clone(), part);
                        pair
                    }
                    None => part,
                };
                index.push_item(parts, part);
                continue;
            }
            if run_size + encoded.len() > self.threshold {
                self.finalize_run(src, id, &mut run, &mut run_size, index, parts, data)?;
            }
            run.push(child_index);
            run_size += encoded.len();
        }
        self.finalize_run(src, id, &mut run, &mut run_size, index, parts, data)?;
        Ok(parts)
    }

    /// Write the pending run of small children as one contiguous chunk and
    /// record a `!snap-range(from,to)` part for it.
    fn finalize_run(
        &self,
        src: &Tree,
        container: NodeId,
        run: &mut Vec<usize>,
        run_size: &mut usize,
        index: &mut Tree,
        parts: NodeId,
        data: &mut Vec<u8>,
    ) -> Result<(), SnapshotError> {
        if run.is_empty() {
            return Ok(());
        }
        let from = run[0];
        let to = *run.last().expect("non-empty run");
        let mut slice = Tree::new();
        match &src.get(container).data {
            NodeData::Object { keys, values } => {
                let obj = slice.add(NodeData::Object {
                    keys: Vec::new(),
                    values: Vec::new(),
                });
                slice.root = Some(obj);
                for &i in run.iter() {
                    let value = slice.graft(src, values[i]);
                    slice.push_pair(obj, keys[i].clone(), value);
                }
            }
            NodeData::Array { items } => {
                let arr = slice.add(NodeData::Array { items: Vec::new() });
                slice.root = Some(arr);
                for &i in run.iter() {
                    let value = slice.graft(src, items[i]);
                    slice.push_item(arr, value);
                }
            }
            _ => unreachable!("runs only exist under containers"),
        }
        let chunk = encode(&slice, &EncodeOptions::default())?;
        let offset = data.len();
        data.extend_from_slice(chunk.as_bytes());

        let from_text = from.to_string();
        let to_text = to.to_string();
        let part = location_array(index, offset as i64, chunk.len() as i64);
        index.get_mut(part).tag = Some(tag::compose(
            SNAP_RANGE_TAG,
            Some(&[from_text.as_str(), to_text.as_str()]),
            Some(BRACKET_TAG),
        ));
        index.push_item(parts, part);
        run.clear();
        *run_size = 0;
        Ok(())
    }
}

/// Append a scalar chunk and return its `!snap-loc` leaf.
fn loc_leaf(index: &mut Tree, data: &mut Vec<u8>, chunk: &[u8]) -> NodeId {
    let offset = data.len();
    data.extend_from_slice(chunk);
    let leaf = location_array(index, offset as i64, chunk.len() as i64);
    index.get_mut(leaf).tag = Some(tag::compose(SNAP_LOC_TAG, None, Some(BRACKET_TAG)));
    leaf
}

/// A two-element `[offset, size]` array node.
fn location_array(index: &mut Tree, offset: i64, size: i64) -> NodeId {
    let arr = index.add(NodeData::Array { items: Vec::new() });
    let off = index.add(NodeData::Number(Number::Int(offset)));
    let len = index.add(NodeData::Number(Number::Int(size)));
    index.push_item(arr, off);
    index.push_item(arr, len);
    arr
}

fn encode_subtree(src: &Tree, id: NodeId) -> Result<String, SnapshotError> {
    let sub = src.subtree(id);
    Ok(encode(&sub, &EncodeOptions::default())?)
}

fn encode_pair(src: &Tree, key: &Key, value: NodeId) -> Result<String, SnapshotError> {
    let mut pair = Tree::new();
    let obj = pair.add(NodeData::Object {
        keys: Vec::new(),
        values: Vec::new(),
    });
    pair.root = Some(obj);
    let v = pair.graft(src, value);
    pair.push_pair(obj, key.clone(), v);
    Ok(encode(&pair, &EncodeOptions::default())?)
}

/// An open snapshot: the parsed index plus the random-access source for
/// chunk loads.
pub struct Snapshot<R> {
    reader: R,
    index: Tree,
    data_start: u64,
}

impl<R: ReadAt> Snapshot<R> {
    /// Read and parse the index; data stays on the reader until asked for.
    pub fn open(reader: R) -> Result<Snapshot<R>, SnapshotError> {
        let mut header = [0u8; 4];
        let got = read_full_at(&reader, &mut header, 0)?;
        if got < 4 {
            return Err(SnapshotError::TruncatedHeader);
        }
        let len = u32::from_be_bytes(header) as usize;
        let mut index_bytes = vec![0u8; len];
        let got = read_full_at(&reader, &mut index_bytes, 4)?;
        if got < len {
            return Err(SnapshotError::InvalidIndexLength {
                len: len as u64,
                file: 4 + got as u64,
            });
        }
        let index = crate::parse(&index_bytes)?;
        Ok(Snapshot {
            reader,
            index,
            data_start: 4 + len as u64,
        })
    }

    /// The parsed index tree.
    pub fn index(&self) -> &Tree {
        &self.index
    }

    /// The snapshot-layer address of an index node. Reads like
    /// [`Tree::path_of`], except that sparse-array fields use the kinded
    /// `{index}` segment form, so `$[3]` is the fourth element of a dense
    /// array while `${3}` is the entry keyed `3` in a sparse one.
    pub fn index_path(&self, id: NodeId) -> String {
        self.index.render_path(id, true)
    }

    fn read_chunk(&self, offset: i64, size: i64) -> Result<Vec<u8>, SnapshotError> {
        if offset < 0 || size < 0 {
            return Err(SnapshotError::CorruptLocation);
        }
        let mut buf = vec![0u8; size as usize];
        let at = self.data_start + offset as u64;
        let got = read_full_at(&self.reader, &mut buf, at)?;
        if got < buf.len() {
            return Err(SnapshotError::ShortChunk {
                offset: at,
                size: size as u64,
            });
        }
        Ok(buf)
    }

    /// Recursively load every `!snap-loc` and `!snap-range` reference and
    /// return the fully materialized tree.
    pub fn materialize(&self) -> Result<Tree, SnapshotError> {
        let mut out = Tree::new();
        let Some(root) = self.index.root else {
            return Ok(Tree::null());
        };
        let new_root = self.resolve(&mut out, root)?;
        out.root = Some(new_root);
        Ok(out)
    }

    /// Resolve one index node into `out`.
    fn resolve(&self, out: &mut Tree, id: NodeId) -> Result<NodeId, SnapshotError> {
        if let Some(t) = self.index.get(id).tag.as_deref() {
            if tag::has(t, SNAP_LOC_TAG) {
                let (offset, size) = self.location_of(id)?;
                let bytes = self.read_chunk(offset, size)?;
                let chunk = crate::parse(&bytes)?;
                let root = chunk.root.ok_or(SnapshotError::CorruptIndex)?;
                return Ok(out.graft(&chunk, root));
            }
            if tag::has(t, SNAP_CHUNKS_TAG) {
                return self.resolve_chunked(out, id);
            }
        }
        Ok(out.graft(&self.index, id))
    }

    /// Rebuild a chunked container from its parts.
    fn resolve_chunked(&self, out: &mut Tree, id: NodeId) -> Result<NodeId, SnapshotError> {
        let node = self.index.get(id);
        let t = node.tag.as_deref().expect("chunked node is tagged");
        let (name, args, rest) = tag::args(t);
        if name != SNAP_CHUNKS_TAG || args.is_empty() {
            return Err(SnapshotError::CorruptTagArguments { tag: t.to_string() });
        }
        let is_map = match args[0].as_str() {
            "map" => true,
            "seq" => false,
            _ => return Err(SnapshotError::CorruptTagArguments { tag: t.to_string() }),
        };
        let mut rebuilt_tag = if rest.is_empty() { None } else { Some(rest) };
        if args.iter().any(|a| a == "sparse") {
            rebuilt_tag = Some(tag::compose(SPARSE_ARRAY_TAG, None, rebuilt_tag.as_deref()));
        }
        if args.iter().any(|a| a == "bracket") {
            rebuilt_tag = Some(tag::compose(BRACKET_TAG, None, rebuilt_tag.as_deref()));
        }
        let parts: Vec<NodeId> = match &node.data {
            NodeData::Array { items } => items.clone(),
            _ => return Err(SnapshotError::CorruptIndex),
        };
        let container = if is_map {
            out.add(NodeData::Object {
                keys: Vec::new(),
                values: Vec::new(),
            })
        } else {
            out.add(NodeData::Array { items: Vec::new() })
        };
        out.get_mut(container).tag = rebuilt_tag;
        if let Some(comment) = node.comment {
            let grafted = out.graft(&self.index, comment);
            out.get_mut(container).comment = Some(grafted);
        }
        for part in parts {
            let part_tag = self.index.get(part).tag.as_deref();
            if part_tag.is_some_and(|t| tag::has(t, SNAP_RANGE_TAG)) {
                let (offset, size) = self.location_of(part)?;
                let bytes = self.read_chunk(offset, size)?;
                let chunk = crate::parse(&bytes)?;
                let chunk_root = chunk.root.ok_or(SnapshotError::CorruptIndex)?;
                match (&chunk.get(chunk_root).data, is_map) {
                    (NodeData::Object { keys, values }, true) => {
                        for (key, &value) in keys.iter().zip(values) {
                            let v = out.graft(&chunk, value);
                            out.push_pair(container, key.clone(), v);
                        }
                    }
                    (NodeData::Array { items }, false) => {
                        for &item in items {
                            let v = out.graft(&chunk, item);
                            out.push_item(container, v);
                        }
                    }
                    _ => return Err(SnapshotError::CorruptIndex),
                }
                continue;
            }
            if is_map {
                let (key, value) = single_pair(&self.index, part)?;
                let v = self.resolve(out, value)?;
                out.push_pair(container, key, v);
            } else {
                let v = self.resolve(out, part)?;
                out.push_item(container, v);
            }
        }
        Ok(container)
    }

    /// Load a single element of the snapshot's root array, reading at most
    /// one chunk.
    pub fn load_element(&self, target: usize) -> Result<Tree, SnapshotError> {
        let Some(root) = self.index.root else {
            return Err(SnapshotError::NoSuchElement(target));
        };
        let root_tag = self.index.get(root).tag.as_deref();
        if !root_tag.is_some_and(|t| tag::has(t, SNAP_CHUNKS_TAG)) {
            // The whole tree is embedded in the index.
            let inner = self.index.unwrap_comment(root);
            return match &self.index.get(inner).data {
                NodeData::Array { items } => match items.get(target) {
                    Some(&item) => Ok(self.index.subtree(item)),
                    None => Err(SnapshotError::NoSuchElement(target)),
                },
                _ => Err(SnapshotError::NoSuchElement(target)),
            };
        }
        let (name, args, _) = tag::args(root_tag.expect("tag checked above"));
        if name != SNAP_CHUNKS_TAG || args.first().map(String::as_str) != Some("seq") {
            return Err(SnapshotError::NoSuchElement(target));
        }
        let parts: Vec<NodeId> = match &self.index.get(root).data {
            NodeData::Array { items } => items.clone(),
            _ => return Err(SnapshotError::CorruptIndex),
        };
        let mut next = 0usize;
        for part in parts {
            let part_tag = self.index.get(part).tag.as_deref();
            if part_tag.is_some_and(|t| tag::has(t, SNAP_RANGE_TAG)) {
                let (from, to) = self.range_of(part)?;
                if target >= from && target <= to {
                    let (offset, size) = self.location_of(part)?;
                    let bytes = self.read_chunk(offset, size)?;
                    let chunk = crate::parse(&bytes)?;
                    let chunk_root = chunk.root.ok_or(SnapshotError::CorruptIndex)?;
                    let NodeData::Array { items } = &chunk.get(chunk_root).data else {
                        return Err(SnapshotError::CorruptIndex);
                    };
                    let item = items
                        .get(target - from)
                        .copied()
                        .ok_or(SnapshotError::CorruptIndex)?;
                    return Ok(chunk.subtree(item));
                }
                next = to + 1;
                continue;
            }
            if next == target {
                let mut out = Tree::new();
                let v = self.resolve(&mut out, part)?;
                out.root = Some(v);
                return Ok(out);
            }
            next += 1;
        }
        Err(SnapshotError::NoSuchElement(target))
    }

    /// Load the value of one field of the snapshot's root object.
    pub fn load_field(&self, field: &str) -> Result<Tree, SnapshotError> {
        let Some(root) = self.index.root else {
            return Err(SnapshotError::NoSuchField(field.to_string()));
        };
        let root_tag = self.index.get(root).tag.as_deref();
        if !root_tag.is_some_and(|t| tag::has(t, SNAP_CHUNKS_TAG)) {
            let inner = self.index.unwrap_comment(root);
            return match &self.index.get(inner).data {
                NodeData::Object { keys, values } => {
                    for (key, &value) in keys.iter().zip(values) {
                        if key.to_string() == field {
                            return Ok(self.index.subtree(value));
                        }
                    }
                    Err(SnapshotError::NoSuchField(field.to_string()))
                }
                _ => Err(SnapshotError::NoSuchField(field.to_string())),
            };
        }
        let parts: Vec<NodeId> = match &self.index.get(root).data {
            NodeData::Array { items } => items.clone(),
            _ => return Err(SnapshotError::CorruptIndex),
        };
        for part in parts {
            let part_tag = self.index.get(part).tag.as_deref();
            if part_tag.is_some_and(|t| tag::has(t, SNAP_RANGE_TAG)) {
                let (offset, size) = self.location_of(part)?;
                let bytes = self.read_chunk(offset, size)?;
                let chunk = crate::parse(&bytes)?;
                let chunk_root = chunk.root.ok_or(SnapshotError::CorruptIndex)?;
                if let NodeData::Object { keys, values } = &chunk.get(chunk_root).data {
                    for (key, &value) in keys.iter().zip(values) {
                        if key.to_string() == field {
                            return Ok(chunk.subtree(value));
                        }
                    }
                }
                continue;
            }
            if let Ok((key, value)) = single_pair(&self.index, part) {
                if key.to_string() == field {
                    let mut out = Tree::new();
                    let v = self.resolve(&mut out, value)?;
                    out.root = Some(v);
                    return Ok(out);
                }
            }
        }
        Err(SnapshotError::NoSuchField(field.to_string()))
    }

    /// The `[offset, size]` payload of a loc or range node.
    fn location_of(&self, id: NodeId) -> Result<(i64, i64), SnapshotError> {
        let NodeData::Array { items } = &self.index.get(id).data else {
            return Err(SnapshotError::CorruptLocation);
        };
        if items.len() != 2 {
            return Err(SnapshotError::CorruptLocation);
        }
        let mut values = [0i64; 2];
        for (slot, &item) in values.iter_mut().zip(items.iter()) {
            match &self.index.get(item).data {
                NodeData::Number(Number::Int(v)) => *slot = *v,
                _ => return Err(SnapshotError::CorruptLocation),
            }
        }
        Ok((values[0], values[1]))
    }

    /// The `(from, to)` arguments of a `!snap-range` tag.
    fn range_of(&self, id: NodeId) -> Result<(usize, usize), SnapshotError> {
        let t = self
            .index
            .get(id)
            .tag
            .as_deref()
            .expect("range node is tagged");
        let (_, args, _) = tag::args(t);
        if args.len() != 2 {
            return Err(SnapshotError::CorruptTagArguments { tag: t.to_string() });
        }
        let from = args[0]
            .parse::<usize>()
            .map_err(|_| SnapshotError::CorruptTagArguments { tag: t.to_string() })?;
        let to = args[1]
            .parse::<usize>()
            .map_err(|_| SnapshotError::CorruptTagArguments { tag: t.to_string() })?;
        Ok((from, to))
    }
}

/// The single key/value pair of a map part.
fn single_pair(tree: &Tree, id: NodeId) -> Result<(Key, NodeId), SnapshotError> {
    match &tree.get(id).data {
        NodeData::Object { keys, values } if keys.len() == 1 => {
            Ok((keys[0].clone(), values[0]))
        }
        _ => Err(SnapshotError::CorruptIndex),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

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

    fn tree_eq(a: &Tree, b: &Tree) -> bool {
        match (a.root, b.root) {
            (Some(ra), Some(rb)) => a.node_eq(ra, b, rb),
            (None, None) => true,
            _ => false,
        }
    }

    #[test]
    fn small_tree_is_fully_embedded() {
        let tree = parse(b"a: 1\nb:\n  c: 2\n").unwrap();
        let bytes = SnapshotWriter::new().write(&tree).unwrap();
        let snapshot = Snapshot::open(bytes.as_slice()).unwrap();
        // Nothing in the data section.
        assert_eq!(bytes.len() as u64, snapshot.data_start);
        let back = snapshot.materialize().unwrap();
        assert!(tree_eq(&tree, &back));
    }

    #[test]
    fn large_scalar_becomes_a_loc_leaf() {
        let big = "x".repeat(200);
        let tree = Tree::from_map([("big", Tree::from_str(&big)), ("n", Tree::from_int(1))]);
        let bytes = SnapshotWriter::with_threshold(64).write(&tree).unwrap();
        let snapshot = Snapshot::open(bytes.as_slice()).unwrap();
        assert!(bytes.len() as u64 > snapshot.data_start);
        let back = snapshot.materialize().unwrap();
        assert!(tree_eq(&tree, &back));
    }

    #[test]
    fn chunked_array_round_trips() {
        let items: Vec<Tree> = (0..100)
            .map(|i| Tree::from_str(&format!("value number {i} {}", "pad".repeat(8))))
            .collect();
        let tree = Tree::from_slice(items);
        let bytes = SnapshotWriter::with_threshold(256).write(&tree).unwrap();
        let snapshot = Snapshot::open(bytes.as_slice()).unwrap();
        let back = snapshot.materialize().unwrap();
        assert!(tree_eq(&tree, &back));
    }

    #[test]
    fn chunked_object_round_trips() {
        let pairs: Vec<(String, Tree)> = (0..80)
            .map(|i| (format!("key{i}"), Tree::from_str(&format!("v{}", "y".repeat(40)))))
            .collect();
        let tree = Tree::from_map(pairs);
        let bytes = SnapshotWriter::with_threshold(200).write(&tree).unwrap();
        let snapshot = Snapshot::open(bytes.as_slice()).unwrap();
        let back = snapshot.materialize().unwrap();
        assert!(tree_eq(&tree, &back));
        let field = snapshot.load_field("key42").unwrap();
        assert!(tree_eq(&field, &Tree::from_str(&format!("v{}", "y".repeat(40)))));
    }

    #[test]
    fn sparse_and_bracket_tags_survive_chunking() {
        let input = format!("0: {}\n5: {}\n9: {}\n", "a".repeat(100), "b".repeat(100), "c".repeat(100));
        let tree = parse(input.as_bytes()).unwrap();
        let bytes = SnapshotWriter::with_threshold(64).write(&tree).unwrap();
        let back = Snapshot::open(bytes.as_slice()).unwrap().materialize().unwrap();
        assert!(tree_eq(&tree, &back));
        let tag = back.get(back.root.unwrap()).tag.clone().unwrap();
        assert!(tag::has(&tag, SPARSE_ARRAY_TAG));
    }

    #[test]
    fn nested_large_containers_chunk_recursively() {
        let inner: Vec<Tree> = (0..50).map(|i| Tree::from_str(&format!("inner {i} {}", "z".repeat(20)))).collect();
        let tree = Tree::from_map([
            ("small", Tree::from_int(1)),
            ("big", Tree::from_slice(inner)),
        ]);
        let bytes = SnapshotWriter::with_threshold(128).write(&tree).unwrap();
        let back = Snapshot::open(bytes.as_slice()).unwrap().materialize().unwrap();
        assert!(tree_eq(&tree, &back));
    }

    #[test]
    fn element_load_reads_exactly_one_chunk() {
        // Scenario S6, scaled to test size: the interesting property is a
        // single read_at per element load.
        let items: Vec<Tree> = (0..10_000)
            .map(|i| Tree::from_str(&format!("{i}:{}", "e".repeat(792))))
            .collect();
        let tree = Tree::from_slice(items);
        let bytes = SnapshotWriter::with_threshold(4096).write(&tree).unwrap();
        let reader = CountingReader {
            inner: &bytes,
            reads: Cell::new(0),
        };
        let snapshot = Snapshot::open(&reader).unwrap();
        let before = reader.reads.get();
        let element = snapshot.load_element(7042).unwrap();
        let reads = reader.reads.get() - before;
        assert_eq!(reads, 1, "load_element must read exactly one chunk");
        let expected = format!("7042:{}", "e".repeat(792));
        match &element.get(element.root.unwrap()).data {
            NodeData::Str(s) => assert_eq!(s, &expected),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_snapshots_are_rejected() {
        assert!(matches!(
            Snapshot::open(&b"\x00\x01"[..]),
            Err(SnapshotError::TruncatedHeader)
        ));
        let bytes = [0x00, 0x00, 0x10, 0x00, b'a'];
        assert!(matches!(
            Snapshot::open(&bytes[..]),
            Err(SnapshotError::InvalidIndexLength { .. })
        ));
    }

    #[test]
    fn index_paths_use_kinded_sparse_segments() {
        let tree = parse(b"0: a\n5: b\n").unwrap();
        let bytes = SnapshotWriter::new().write(&tree).unwrap();
        let snapshot = Snapshot::open(bytes.as_slice()).unwrap();
        let root = snapshot.index().root.unwrap();
        let entry = snapshot.index().get_index(root, 5).unwrap();
        assert_eq!(snapshot.index_path(entry), "${5}");
        // The general tree API stays on plain index segments.
        let root = tree.root.unwrap();
        let entry = tree.get_index(root, 5).unwrap();
        assert_eq!(tree.path_of(entry), "$[5]");
    }

    #[test]
    fn threshold_is_not_recorded() {
        let tree = parse(b"a: 1\n").unwrap();
        let small = SnapshotWriter::with_threshold(16).write(&tree).unwrap();
        let large = SnapshotWriter::with_threshold(1 << 20).write(&tree).unwrap();
        // Readers work on either without knowing the threshold.
        let a = Snapshot::open(small.as_slice()).unwrap().materialize().unwrap();
        let b = Snapshot::open(large.as_slice()).unwrap().materialize().unwrap();
        assert!(tree_eq(&a, &b));
    }
}
