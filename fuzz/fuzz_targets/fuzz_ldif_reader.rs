#![no_main]

use embedldap::ldif::{parse_ldif, write_entries, LdifRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(records) = parse_ldif(text) {
            let entries: Vec<_> = records
                .into_iter()
                .filter_map(|record| match record {
                    LdifRecord::Add(entry) => Some(entry),
                    _ => None,
                })
                .collect();
            let _ = write_entries(&entries);
        }
    }
});
