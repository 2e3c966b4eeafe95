//! Object key derivation for new uploads.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Issues `{millis}-{sanitized name}` keys.
///
/// The millisecond prefix is strictly increasing for the lifetime of the
/// generator, so two uploads of the same name never share a key even when
/// they start in the same millisecond.
#[derive(Debug, Default)]
pub struct ObjectKeyGenerator {
    last: AtomicI64,
}

impl ObjectKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&self, file_name: &str) -> String {
        let prefix = self.next_prefix(Utc::now().timestamp_millis());
        format!("{}-{}", prefix, sanitize_file_name(file_name))
    }

    fn next_prefix(&self, now: i64) -> i64 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Reduce a client-supplied name to something safe to embed in a key.
///
/// Keeps the final path component only and maps anything outside
/// `[A-Za-z0-9._-]` to `_`. Leading dots are stripped so the result can
/// never be `.` or `..`.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
