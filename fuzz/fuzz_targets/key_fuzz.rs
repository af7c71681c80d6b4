//! Fuzz test for cache key validation
//!
//! Feeds arbitrary strings to the key grammar and checks that parsing never
//! panics and agrees with `CacheKey::is_valid`.
//!
//! Run with: cargo +nightly fuzz run key_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use primer_core::{CacheKey, MAX_KEY_LEN};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let valid = CacheKey::is_valid(input);
    match CacheKey::parse(input) {
        Ok(key) => {
            assert!(valid, "parse accepted a key is_valid rejects: {input:?}");
            assert_eq!(key.as_str(), input);
            assert!(key.segments().all(|segment| !segment.is_empty()));
            assert!(!input.ends_with('/'));
            assert!(input.len() <= MAX_KEY_LEN);
        }
        Err(err) => {
            assert!(!valid, "parse rejected a key is_valid accepts: {input:?}");
            assert!(!err.to_string().is_empty());
        }
    }
});
