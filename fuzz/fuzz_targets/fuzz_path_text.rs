#![no_main]

use libfuzzer_sys::fuzz_target;
use livemodel::path::{expand_paths, parse_steps};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(paths) = expand_paths(text) {
        for path in paths {
            assert!(!path.is_empty());
            let _ = parse_steps(&path);
        }
    }
});
