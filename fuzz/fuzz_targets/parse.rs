#![no_main]

use libfuzzer_sys::fuzz_target;
use tony::Format;

fuzz_target!(|data: &[u8]| fuzz(data));

fn fuzz(data: &[u8]) {
    for format in [Format::Tony, Format::Yaml, Format::Json] {
        let _ = tony::parse_format(data, format);
        let _ = tony::parse_multi(data, format);
    }
}
