//! LDAP filter construction helpers.

use chrono::{DateTime, TimeZone};

use crate::timestamp::encode_generalized_time;

/// Escape special characters in LDAP filter values (RFC 4515).
///
/// Characters that must be escaped: * ( ) \ NUL
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Filter selecting entries whose change timestamp is at or after `since`.
///
/// The comparison is inclusive: entries changed in the watermark second
/// itself are returned again on the next poll.
pub fn changed_since_filter<Tz: TimeZone>(timestamp_attribute: &str, since: &DateTime<Tz>) -> String {
    format!(
        "({}>={})",
        timestamp_attribute,
        escape_filter_value(&encode_generalized_time(since))
    )
}
