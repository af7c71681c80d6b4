//! Fuzz test for route pattern compilation and matching
//!
//! Splits the input into a pattern and a key. Registering any pattern must
//! either succeed or fail with an error; resolving any valid key against a
//! registered pattern must never panic, and every capture it reports must be
//! a non-empty part of the key.
//!
//! Run with: cargo +nightly fuzz run route_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use primer_core::CacheKey;
use primer_storage::RouteSet;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let (pattern, key) = input.split_once('\n').unwrap_or((input, input));

    let Ok(routes) = RouteSet::<String>::new().get(pattern, |_| async { Ok(None) }) else {
        return;
    };
    let Ok(key) = CacheKey::parse(key) else {
        return;
    };

    if let Some((matched, params)) = routes.resolve(&key) {
        assert_eq!(matched, pattern);
        assert_eq!(params.key, key);
        for value in params.captures.values() {
            assert!(!value.is_empty());
            assert!(key.as_str().contains(value.as_str()));
        }
    }
});
