#![no_main]

use libfuzzer_sys::fuzz_target;
use tony::{Format, Scanner};

fuzz_target!(|data: &[u8]| fuzz(data));

fn fuzz(data: &[u8]) {
    for format in [Format::Tony, Format::Yaml, Format::Json] {
        let mut scanner = Scanner::new(format);
        scanner.feed(data);
        scanner.finish();
        let _ = scanner.read();
    }
}
