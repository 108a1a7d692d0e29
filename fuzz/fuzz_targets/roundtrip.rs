#![no_main]

use libfuzzer_sys::fuzz_target;
use tony::{encode, parse, EncodeOptions};

fuzz_target!(|data: &[u8]| fuzz(data));

fn fuzz(data: &[u8]) {
    let Ok(tree) = parse(data) else { return };
    let text = encode(&tree, &EncodeOptions::default()).expect("parsed trees encode");
    let again = parse(text.as_bytes()).expect("encoded trees reparse");
    let (Some(a), Some(b)) = (tree.root, again.root) else {
        return;
    };
    assert!(tree.node_eq(a, &again, b), "round trip changed the tree");
}
