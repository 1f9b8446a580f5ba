//! A thread-local cache of the current IMF-fixdate, refreshed at most once
//! per second. Grounded on the teacher's `src/proto/h1/date.rs`: the same
//! cache-and-recheck shape, rewritten against the `httpdate` crate instead of
//! a hand-rolled `time`-crate formatter.

use std::cell::RefCell;
use std::time::SystemTime;

/// `"Sun, 06 Nov 1994 08:49:37 GMT".len()`
pub(crate) const DATE_VALUE_LENGTH: usize = 29;

struct CachedDate {
    bytes: [u8; DATE_VALUE_LENGTH],
    next_update: SystemTime,
}

thread_local!(static CACHED: RefCell<CachedDate> = RefCell::new(CachedDate::new()));

impl CachedDate {
    fn new() -> Self {
        let mut cache = CachedDate {
            bytes: [0; DATE_VALUE_LENGTH],
            next_update: SystemTime::UNIX_EPOCH,
        };
        cache.update(SystemTime::now());
        cache
    }

    fn check(&mut self) {
        let now = SystemTime::now();
        if now > self.next_update {
            self.update(now);
        }
    }

    fn update(&mut self, now: SystemTime) {
        let formatted = httpdate::fmt_http_date(now);
        debug_assert_eq!(formatted.len(), DATE_VALUE_LENGTH);
        self.bytes.copy_from_slice(formatted.as_bytes());
        self.next_update = now + std::time::Duration::from_secs(1);
    }
}

/// Append the current date, in IMF-fixdate form, to `dst`.
pub(crate) fn extend(dst: &mut Vec<u8>) {
    CACHED.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.check();
        dst.extend_from_slice(&cache.bytes);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_len() {
        let mut buf = Vec::new();
        extend(&mut buf);
        assert_eq!(buf.len(), DATE_VALUE_LENGTH);
    }

    #[test]
    fn date_ends_with_gmt() {
        let mut buf = Vec::new();
        extend(&mut buf);
        assert!(buf.ends_with(b"GMT"));
    }
}
