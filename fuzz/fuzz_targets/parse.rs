#![no_main]

use libfuzzer_sys::fuzz_target;
use autotest::ControlFile;
use autotest::harness::StatusRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ControlFile::parse(s);
        if let Ok(status) = s.parse::<StatusRecord>() {
            // A parsed status line renders back to something that parses the same way.
            let again: StatusRecord = status.to_string().parse().expect("rendered status must parse");
            assert_eq!(again.code, status.code);
        }
    }
});
