use std::env;
use std::sync::OnceLock;

static TENSORPAGE_FSYNC: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Whether block writes should be followed by a `sync_all` before returning.
pub(crate) fn fsync_enabled() -> bool {
    *TENSORPAGE_FSYNC.get_or_init(|| match env::var("TENSORPAGE_FSYNC") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
