// Request ID generation: REQ_yyyyMMdd_XXXXXXXX

use chrono::{DateTime, Utc};
use uuid::Uuid;

const PREFIX: &str = "REQ";

/// Generate a request ID for today (UTC)
pub fn generate() -> String {
    generate_at(Utc::now())
}

/// Generate a request ID for the given instant
pub fn generate_at(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{PREFIX}_{}_{}",
        now.format("%Y%m%d"),
        random[..8].to_ascii_uppercase()
    )
}

/// Use the caller's ID when it has one, otherwise generate
pub fn resolve(supplied: Option<String>) -> String {
    supplied
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate)
}
