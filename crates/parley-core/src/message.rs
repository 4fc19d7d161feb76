//! Formatting of user-facing chat lines.
//!
//! Every line the relay produces is built here:
//!
//! - group: `[HH:MM] <sender>: <body>`
//! - private: `[HH:MM] [Private] <sender>: <body>`
//! - system: `[System]: <text>`

use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;

/// Timestamp format used in chat lines (minute resolution).
pub const TIME_FORMAT: &str = "%H:%M";

/// Whether a body carries anything worth delivering.
#[must_use]
pub fn is_blank(body: &str) -> bool {
    body.trim().is_empty()
}

/// Format a group message.
#[must_use]
pub fn group_line<Tz>(at: &DateTime<Tz>, sender: &str, body: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("[{}] {}: {}", at.format(TIME_FORMAT), sender, body)
}

/// Format a private message as seen by its recipient.
#[must_use]
pub fn private_line<Tz>(at: &DateTime<Tz>, sender: &str, body: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("[{}] [Private] {}: {}", at.format(TIME_FORMAT), sender, body)
}

/// Format a relay-originated notice.
#[must_use]
pub fn system_line(text: &str) -> String {
    format!("[System]: {text}")
}

/// Notice sent back to a sender whose private recipient is offline.
#[must_use]
pub fn recipient_offline(recipient: &str) -> String {
    system_line(&format!("User '{recipient}' is not online."))
}

/// Current wall-clock time in the relay's local zone.
#[must_use]
pub fn now() -> DateTime<Local> {
    Local::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 59).unwrap()
    }

    #[test]
    fn test_group_line() {
        assert_eq!(group_line(&noon(), "alice", "hi all"), "[12:05] alice: hi all");
    }

    #[test]
    fn test_private_line() {
        assert_eq!(
            private_line(&noon(), "alice", "hi"),
            "[12:05] [Private] alice: hi"
        );
    }

    #[test]
    fn test_time_is_zero_padded_in_local_offset() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let at = offset.with_ymd_and_hms(2024, 3, 1, 7, 3, 0).unwrap();
        assert_eq!(group_line(&at, "bob", "yo"), "[07:03] bob: yo");
    }

    #[test]
    fn test_system_lines() {
        assert_eq!(system_line("restarting"), "[System]: restarting");
        assert_eq!(
            recipient_offline("carol"),
            "[System]: User 'carol' is not online."
        );
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank("  \t\n"));
        assert!(!is_blank(" x "));
    }
}
