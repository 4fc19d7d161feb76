//! What the terminal shows.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// The locally displayed online-user list.
#[derive(Debug, Default)]
pub struct RosterView {
    revision: Option<u64>,
    names: Vec<String>,
}

impl RosterView {
    /// Replace the list unless `revision` is older than the one shown.
    ///
    /// Returns whether the list changed.
    pub fn apply(&mut self, revision: u64, names: Vec<String>) -> bool {
        if self.revision.is_some_and(|shown| revision < shown) {
            return false;
        }
        self.revision = Some(revision);
        self.names = names;
        true
    }

    /// Names currently shown.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// One-line rendering, marking the local user.
    #[must_use]
    pub fn render(&self, own_name: &str) -> String {
        let names: Vec<String> = self
            .names
            .iter()
            .map(|name| {
                if name == own_name {
                    format!("{name} (you)")
                } else {
                    name.clone()
                }
            })
            .collect();
        format!("Online ({}): {}", names.len(), names.join(", "))
    }
}

/// Local echo of a private message the user just sent.
#[must_use]
pub fn private_echo<Tz>(at: &DateTime<Tz>, recipient: &str, body: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("[{}] [You -> {}]: {}", at.format("%H:%M"), recipient, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_roster_ignores_stale_revisions() {
        let mut view = RosterView::default();

        assert!(view.apply(2, vec!["alice".into(), "bob".into()]));
        assert!(!view.apply(1, vec!["alice".into()]));
        assert_eq!(view.names(), ["alice", "bob"]);

        assert!(view.apply(3, vec!["bob".into()]));
        assert_eq!(view.names(), ["bob"]);
    }

    #[test]
    fn test_render_marks_self() {
        let mut view = RosterView::default();
        view.apply(1, vec!["alice".into(), "bob".into()]);

        assert_eq!(view.render("bob"), "Online (2): alice, bob (you)");
    }

    #[test]
    fn test_private_echo() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();
        assert_eq!(private_echo(&at, "bob", "hi"), "[09:30] [You -> bob]: hi");
    }
}
