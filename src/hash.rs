//! Registry key hashing for the notification hub.
//!
//! Sessions and watchdogs are keyed by `MD5(corpusId ‖ cacheKey)` hex so the
//! hub can look either up from either side without storing the pair twice.

/// Lowercase hex MD5 of `corpus_id` concatenated directly with `cache_key`.
pub fn registry_key(corpus_id: &str, cache_key: &str) -> String {
    let mut buf = String::with_capacity(corpus_id.len() + cache_key.len());
    buf.push_str(corpus_id);
    buf.push_str(cache_key);
    format!("{:x}", md5::compute(buf.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hash() {
        assert_eq!(
            registry_key("foo", "abcdef"),
            "332b91ee74f70e2999c68cb513102a2b"
        );
    }
}
