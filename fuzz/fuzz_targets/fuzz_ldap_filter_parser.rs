#![no_main]

use embedldap::ldap::parse_ldap_filter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(filter) = parse_ldap_filter(text) {
            // Whatever parses must print back to something that parses
            let printed = filter.to_string();
            assert!(parse_ldap_filter(&printed).is_ok(), "{:?} printed as {:?}", text, printed);
        }
    }
});
