//! Random identifiers and timestamps stamped onto outgoing messages.

use chrono::{SecondsFormat, Utc};
use rand::{distr::Alphanumeric, Rng};

/// Length of a generated transaction id.
pub const TRANSACTION_ID_LEN: usize = 12;

/// Length of a generated Message-ID header value.
pub const MESSAGE_ID_LEN: usize = 6;

/// Returns a random alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Returns a fresh transaction id.
pub fn transaction_id() -> String {
    random_string(TRANSACTION_ID_LEN)
}

/// Returns a fresh value for the Message-ID header.
pub fn message_id() -> String {
    random_string(MESSAGE_ID_LEN)
}

/// Returns a fresh `imdn.Message-ID`, grouped 8-4-4-4-10.
pub fn imdn_message_id() -> String {
    format!(
        "{}-{}-{}-{}-{}",
        random_string(8),
        random_string(4),
        random_string(4),
        random_string(4),
        random_string(10)
    )
}

/// Returns the current UTC time in RFC 3339 form with millisecond precision, e.g.
/// `2024-05-01T09:30:00.123Z`.
pub fn datetime() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_alphanumeric() {
        let tid = transaction_id();
        assert_eq!(tid.len(), TRANSACTION_ID_LEN);
        assert!(tid.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(tid, transaction_id());
    }

    #[test]
    fn imdn_message_id_groups() {
        let id = imdn_message_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, [8, 4, 4, 4, 10]);
    }

    #[test]
    fn datetime_has_millis_and_zulu_suffix() {
        let now = datetime();
        assert_eq!(now.len(), "2024-05-01T09:30:00.123Z".len());
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
