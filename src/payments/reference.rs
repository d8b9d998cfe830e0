use chrono::Utc;
use uuid::Uuid;

const REFERENCE_PREFIX: &str = "TRX";
const RANDOM_LEN: usize = 12;

/// Generate a transaction reference such as `TRX-3F9A1C0B7E2D-1760745600`.
///
/// The random segment comes from a v4 UUID, the trailing segment is the unix
/// timestamp in seconds so references sort roughly by creation time.
pub fn generate_tx_ref() -> String {
    let random = Uuid::new_v4().simple().to_string().to_uppercase();
    format!(
        "{}-{}-{}",
        REFERENCE_PREFIX,
        &random[..RANDOM_LEN],
        Utc::now().timestamp()
    )
}

/// Cheap shape check used before touching the store with caller input.
pub fn is_well_formed(tx_ref: &str) -> bool {
    let trimmed = tx_ref.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 100
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
