//! Message router for Parley.
//!
//! The router implements the four client requests (connect, disconnect,
//! group send, private send) on top of the [`Registry`]. Recipients are
//! resolved under the registry lock; delivery happens after the lock is
//! released, concurrently per recipient and bounded by a timeout.

use crate::message;
use crate::registry::{Registry, RegistryError, Session};
use crate::sink::{Delivery, DeliveryError, Sink};
use futures_util::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default maximum display name length in bytes.
pub const MAX_NAME_LENGTH: usize = 64;

/// Validate a display name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_name(name: &str, max_length: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Name cannot be empty");
    }
    if name.len() > max_length {
        return Err("Name too long");
    }
    if name.trim() != name {
        return Err("Name cannot start or end with whitespace");
    }
    if name.chars().any(char::is_control) {
        return Err("Name contains invalid characters");
    }
    Ok(())
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
    /// Maximum display name length in bytes.
    pub max_name_length: usize,
    /// Upper bound on a single delivery to one client.
    pub delivery_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            max_name_length: MAX_NAME_LENGTH,
            delivery_timeout: Duration::from_secs(2),
        }
    }
}

/// Why a connect was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Another live session holds the name.
    DuplicateName,
    /// The name failed validation.
    InvalidName(&'static str),
    /// The relay is full.
    CapacityReached,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DuplicateName => f.write_str("Name already taken"),
            RejectReason::InvalidName(why) => f.write_str(why),
            RejectReason::CapacityReached => f.write_str("Relay is full"),
        }
    }
}

impl From<RegistryError> for RejectReason {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateName(_) => RejectReason::DuplicateName,
            RegistryError::CapacityReached(_) => RejectReason::CapacityReached,
        }
    }
}

/// Outcome of [`Router::connect`].
#[derive(Debug, Clone)]
pub enum ConnectResult {
    /// The name is registered; the handle identifies this registration.
    Accepted(Session),
    /// Nothing changed.
    Rejected(RejectReason),
}

impl ConnectResult {
    /// Whether the connect succeeded.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConnectResult::Accepted(_))
    }

    /// The registered session, if accepted.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            ConnectResult::Accepted(session) => Some(session),
            ConnectResult::Rejected(_) => None,
        }
    }
}

/// Outcome of [`Router::send_private`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateOutcome {
    /// The recipient received the message.
    Delivered,
    /// The recipient is offline; the sender was told so.
    RecipientOffline,
    /// The recipient is online but could not be reached.
    Failed,
    /// Nothing was delivered (blank body, or neither party online).
    Dropped,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

/// The central message router.
pub struct Router {
    registry: Registry,
    config: RouterConfig,
    counters: Counters,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            registry: Registry::with_max_sessions(config.max_sessions),
            config,
            counters: Counters::default(),
        }
    }

    /// The underlying session registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let roster = self.registry.snapshot();
        RouterStats {
            sessions: roster.names.len(),
            roster_revision: roster.revision,
            messages_delivered: self.counters.delivered.load(Ordering::Relaxed),
            deliveries_failed: self.counters.failed.load(Ordering::Relaxed),
            sessions_evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Register `name` and push the new roster to everyone, the newcomer
    /// included.
    pub async fn connect(&self, name: &str, sink: Arc<dyn Sink>) -> ConnectResult {
        if let Err(why) = validate_name(name, self.config.max_name_length) {
            debug!(name = %name, reason = why, "Connect rejected");
            return ConnectResult::Rejected(RejectReason::InvalidName(why));
        }

        match self.registry.register(name, sink) {
            Ok(session) => {
                info!(session = %session.id(), name = %name, "Connected");
                self.broadcast_roster().await;
                ConnectResult::Accepted(session)
            }
            Err(err) => {
                debug!(name = %name, error = %err, "Connect rejected");
                ConnectResult::Rejected(err.into())
            }
        }
    }

    /// Unregister whichever session holds `name`.
    ///
    /// Returns `false`, and broadcasts nothing, if the name was not live.
    pub async fn disconnect(&self, name: &str) -> bool {
        let Some(session) = self.registry.unregister(name) else {
            trace!(name = %name, "Disconnect for unknown name");
            return false;
        };

        info!(session = %session.id(), name = %name, "Disconnected");
        self.broadcast_roster().await;
        true
    }

    /// Unregister `session` if it still holds its name.
    ///
    /// Used for transport-detected loss, where a late signal must not
    /// remove a newer session that reused the name.
    pub async fn disconnect_session(&self, session: &Session) -> bool {
        if !self.registry.unregister_session(session) {
            trace!(session = %session.id(), "Disconnect for stale session");
            return false;
        }

        info!(session = %session.id(), name = %session.name(), "Disconnected");
        self.broadcast_roster().await;
        true
    }

    /// Deliver a group message to every registered session, the sender
    /// included.
    ///
    /// Returns the number of clients that received it. Blank bodies are
    /// dropped without delivery.
    pub async fn send_to_group(&self, sender: &str, body: &str) -> usize {
        if message::is_blank(body) {
            trace!(sender = %sender, "Dropped blank group message");
            return 0;
        }

        let line = message::group_line(&message::now(), sender, body);
        let targets = self.registry.sessions();
        let (delivered, failed) = self
            .deliver_each(targets, &Delivery::Message(line.into()))
            .await;
        self.evict(failed).await;

        trace!(sender = %sender, recipients = delivered, "Group message");
        delivered
    }

    /// Deliver a private message to `recipient` only.
    ///
    /// If the recipient is offline the sender, when online, receives a
    /// system notice instead.
    pub async fn send_private(&self, sender: &str, recipient: &str, body: &str) -> PrivateOutcome {
        if message::is_blank(body) {
            trace!(sender = %sender, "Dropped blank private message");
            return PrivateOutcome::Dropped;
        }

        if let Some(target) = self.registry.lookup(recipient) {
            let line = message::private_line(&message::now(), sender, body);
            let (delivered, failed) = self
                .deliver_each(vec![target], &Delivery::Message(line.into()))
                .await;
            self.evict(failed).await;

            trace!(sender = %sender, recipient = %recipient, "Private message");
            return if delivered == 1 {
                PrivateOutcome::Delivered
            } else {
                PrivateOutcome::Failed
            };
        }

        let Some(origin) = self.registry.lookup(sender) else {
            debug!(sender = %sender, recipient = %recipient, "Neither party online");
            return PrivateOutcome::Dropped;
        };

        debug!(sender = %sender, recipient = %recipient, "Recipient offline");
        let notice = message::recipient_offline(recipient);
        let (_, failed) = self
            .deliver_each(vec![origin], &Delivery::Message(notice.into()))
            .await;
        self.evict(failed).await;

        PrivateOutcome::RecipientOffline
    }

    /// Push the current roster to exactly `recipients`.
    pub async fn update_roster(&self, recipients: Vec<Session>) {
        let roster = self.registry.snapshot();
        let (_, failed) = self
            .deliver_each(recipients, &Delivery::Roster(Arc::new(roster)))
            .await;
        self.evict(failed).await;
    }

    /// Push the current roster to every registered session.
    async fn broadcast_roster(&self) {
        let (roster, sessions) = self.registry.roster_with_sessions();
        debug!(revision = roster.revision, sessions = sessions.len(), "Broadcasting roster");

        let (_, failed) = self
            .deliver_each(sessions, &Delivery::Roster(Arc::new(roster)))
            .await;
        self.evict(failed).await;
    }

    /// Deliver to each target concurrently.
    ///
    /// Returns the number of successful deliveries and the sessions that
    /// could not be reached.
    async fn deliver_each(
        &self,
        targets: Vec<Session>,
        delivery: &Delivery,
    ) -> (usize, Vec<Session>) {
        let timeout = self.config.delivery_timeout;
        let attempts = targets.into_iter().map(|session| {
            let delivery = delivery.clone();
            async move {
                let result = tokio::time::timeout(timeout, session.deliver(delivery))
                    .await
                    .unwrap_or(Err(DeliveryError::Timeout));
                (session, result)
            }
        });

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (session, result) in join_all(attempts).await {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        session = %session.id(),
                        name = %session.name(),
                        error = %err,
                        "Delivery failed"
                    );
                    failed.push(session);
                }
            }
        }

        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(failed.len() as u64, Ordering::Relaxed);

        (delivered, failed)
    }

    /// Remove unreachable sessions and tell the rest.
    ///
    /// The roster broadcast can itself fail for more sessions, so this
    /// repeats until a round evicts nobody.
    async fn evict(&self, mut failed: Vec<Session>) {
        while !failed.is_empty() {
            let removed = failed
                .iter()
                .filter(|session| self.registry.unregister_session(session))
                .inspect(|session| {
                    warn!(session = %session.id(), name = %session.name(), "Evicted unreachable session");
                })
                .count();

            if removed == 0 {
                return;
            }
            self.counters
                .evicted
                .fetch_add(removed as u64, Ordering::Relaxed);

            let (roster, sessions) = self.registry.roster_with_sessions();
            let (_, next) = self
                .deliver_each(sessions, &Delivery::Roster(Arc::new(roster)))
                .await;
            failed = next;
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of registered sessions.
    pub sessions: usize,
    /// Current roster revision.
    pub roster_revision: u64,
    /// Successful deliveries since start.
    pub messages_delivered: u64,
    /// Failed deliveries since start.
    pub deliveries_failed: u64,
    /// Sessions removed after a failed delivery.
    pub sessions_evicted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    /// Strip and check the `[HH:MM] ` prefix of a timestamped line.
    fn untimed(line: &str) -> &str {
        let bytes = line.as_bytes();
        assert!(line.len() > 8, "line too short: {line}");
        assert_eq!(bytes[0], b'[', "{line}");
        assert!(bytes[1..3].iter().all(u8::is_ascii_digit), "{line}");
        assert_eq!(bytes[3], b':', "{line}");
        assert!(bytes[4..6].iter().all(u8::is_ascii_digit), "{line}");
        assert_eq!(&line[6..8], "] ", "{line}");
        &line[8..]
    }

    async fn connect(router: &Router, name: &str) -> Arc<MemorySink> {
        let sink = MemorySink::new();
        assert!(router.connect(name, sink.clone()).await.is_accepted());
        sink
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("alice", MAX_NAME_LENGTH).is_ok());
        assert!(validate_name("Mary Ann", MAX_NAME_LENGTH).is_ok());
        assert!(validate_name("", MAX_NAME_LENGTH).is_err());
        assert!(validate_name(" alice", MAX_NAME_LENGTH).is_err());
        assert!(validate_name("alice\n", MAX_NAME_LENGTH).is_err());
        assert!(validate_name("al\u{7}ice", MAX_NAME_LENGTH).is_err());

        let long_name = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(validate_name(&long_name, MAX_NAME_LENGTH).is_err());
    }

    #[tokio::test]
    async fn test_chat_session_scenario() {
        let router = Router::new();

        let alice = connect(&router, "alice").await;
        assert_eq!(alice.last_roster(), Some(vec!["alice".to_string()]));

        let bob = connect(&router, "bob").await;
        let both = Some(vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(alice.last_roster(), both);
        assert_eq!(bob.last_roster(), both);

        // Second alice is refused and nobody hears about it.
        let rosters_before = alice.rosters().len();
        let intruder = MemorySink::new();
        let result = router.connect("alice", intruder.clone()).await;
        assert!(matches!(
            result,
            ConnectResult::Rejected(RejectReason::DuplicateName)
        ));
        assert_eq!(alice.rosters().len(), rosters_before);
        assert!(intruder.deliveries().is_empty());
        assert_eq!(router.registry().snapshot().names, vec!["alice", "bob"]);

        // Private message reaches bob only.
        assert_eq!(
            router.send_private("alice", "bob", "hi").await,
            PrivateOutcome::Delivered
        );
        let bob_lines = bob.messages();
        assert_eq!(bob_lines.len(), 1);
        assert_eq!(untimed(&bob_lines[0]), "[Private] alice: hi");
        assert!(alice.messages().is_empty());

        // Offline recipient: alice gets a notice.
        assert_eq!(
            router.send_private("alice", "carol", "hi").await,
            PrivateOutcome::RecipientOffline
        );
        assert_eq!(
            alice.messages(),
            vec!["[System]: User 'carol' is not online.".to_string()]
        );
        assert_eq!(bob.messages().len(), 1);

        // Bob leaves; alice sees the shrunken roster.
        assert!(router.disconnect("bob").await);
        assert_eq!(alice.last_roster(), Some(vec!["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_group_message_reaches_everyone() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;
        let bob = connect(&router, "bob").await;
        let carol = connect(&router, "carol").await;

        assert_eq!(router.send_to_group("bob", "hello all").await, 3);

        for sink in [&alice, &bob, &carol] {
            let lines = sink.messages();
            assert_eq!(lines.len(), 1);
            assert_eq!(untimed(&lines[0]), "bob: hello all");
        }
    }

    #[tokio::test]
    async fn test_blank_bodies_are_dropped() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;
        let bob = connect(&router, "bob").await;

        assert_eq!(router.send_to_group("alice", "   ").await, 0);
        assert_eq!(router.send_to_group("alice", "").await, 0);
        assert_eq!(
            router.send_private("alice", "bob", "\t").await,
            PrivateOutcome::Dropped
        );

        assert!(alice.messages().is_empty());
        assert!(bob.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_sender_is_relayed() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;

        assert_eq!(router.send_to_group("ghost", "boo").await, 1);
        assert_eq!(untimed(&alice.messages()[0]), "ghost: boo");

        // Neither side online: nothing to deliver.
        assert_eq!(
            router.send_private("ghost", "nobody", "boo").await,
            PrivateOutcome::Dropped
        );
        assert_eq!(alice.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_is_noop() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;
        let rosters = alice.rosters().len();

        assert!(!router.disconnect("bob").await);
        assert!(router.disconnect("alice").await);
        assert!(!router.disconnect("alice").await);

        assert_eq!(alice.rosters().len(), rosters);
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_disconnect() {
        let router = Router::new();
        let first = router.connect("alice", MemorySink::new()).await;
        let first = first.session().cloned().unwrap();
        assert!(router.disconnect("alice").await);

        let second = connect(&router, "alice").await;
        let rosters = second.rosters().len();

        assert!(!router.disconnect_session(&first).await);
        assert!(router.registry().contains("alice"));
        assert_eq!(second.rosters().len(), rosters);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let router = Router::new();
        let sink = MemorySink::new();

        let result = router.connect("", sink.clone()).await;
        assert!(matches!(
            result,
            ConnectResult::Rejected(RejectReason::InvalidName(_))
        ));
        assert!(sink.deliveries().is_empty());
        assert_eq!(router.registry().revision(), 0);
    }

    #[tokio::test]
    async fn test_capacity_rejection() {
        let router = Router::with_config(RouterConfig {
            max_sessions: 1,
            ..Default::default()
        });
        let _alice = connect(&router, "alice").await;

        let result = router.connect("bob", MemorySink::new()).await;
        assert!(matches!(
            result,
            ConnectResult::Rejected(RejectReason::CapacityReached)
        ));
        assert_eq!(RejectReason::CapacityReached.to_string(), "Relay is full");
    }

    #[tokio::test]
    async fn test_failed_delivery_evicts_and_spares_others() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;
        let bob = connect(&router, "bob").await;
        let carol = connect(&router, "carol").await;

        bob.close();
        assert_eq!(router.send_to_group("alice", "anyone there?").await, 2);

        assert_eq!(alice.messages().len(), 1);
        assert_eq!(carol.messages().len(), 1);
        assert!(!router.registry().contains("bob"));

        let remaining = Some(vec!["alice".to_string(), "carol".to_string()]);
        assert_eq!(alice.last_roster(), remaining);
        assert_eq!(carol.last_roster(), remaining);

        let stats = router.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.sessions_evicted, 1);
        assert!(stats.deliveries_failed >= 1);
    }

    #[tokio::test]
    async fn test_unreachable_newcomer_is_evicted_on_connect() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;

        let result = router.connect("bob", MemorySink::closed()).await;
        let bob = result.session().cloned().unwrap();

        assert!(!router.registry().holds(&bob));
        assert_eq!(alice.last_roster(), Some(vec!["alice".to_string()]));
        assert_eq!(router.stats().sessions_evicted, 1);
    }

    #[tokio::test]
    async fn test_private_to_unreachable_recipient() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;
        let bob = connect(&router, "bob").await;
        bob.close();

        assert_eq!(
            router.send_private("alice", "bob", "hi").await,
            PrivateOutcome::Failed
        );
        assert!(!router.registry().contains("bob"));
        assert_eq!(alice.last_roster(), Some(vec!["alice".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_times_out() {
        let router = Router::with_config(RouterConfig {
            delivery_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let alice = connect(&router, "alice").await;

        // The newcomer never reads, so its first roster times out.
        let result = router.connect("bob", MemorySink::stalled()).await;
        assert!(result.is_accepted());
        assert!(!router.registry().contains("bob"));
        assert_eq!(alice.last_roster(), Some(vec!["alice".to_string()]));

        assert_eq!(router.send_to_group("alice", "still here").await, 1);
        assert_eq!(router.stats().sessions_evicted, 1);
    }

    #[tokio::test]
    async fn test_update_roster_targets_only_given_sessions() {
        let router = Router::new();
        let alice = connect(&router, "alice").await;
        let bob = connect(&router, "bob").await;
        alice.clear();
        bob.clear();

        let target = router.registry().lookup("bob").unwrap();
        router.update_roster(vec![target]).await;

        assert!(alice.rosters().is_empty());
        assert_eq!(
            bob.last_roster(),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_with_same_name() {
        let router = Arc::new(Router::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    router
                        .connect("alice", MemorySink::new())
                        .await
                        .is_accepted()
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(router.registry().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_converges_on_latest_roster() {
        let router = Arc::new(Router::new());

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    let name = format!("user-{i}");
                    let sink = MemorySink::new();
                    assert!(router.connect(&name, sink.clone()).await.is_accepted());
                    if i % 3 == 0 {
                        assert!(router.disconnect(&name).await);
                        None
                    } else {
                        router.send_to_group(&name, "hi").await;
                        Some(sink)
                    }
                })
            })
            .collect();

        let mut survivors = Vec::new();
        for handle in handles {
            if let Some(sink) = handle.await.unwrap() {
                survivors.push(sink);
            }
        }

        let final_roster = router.registry().snapshot();
        assert_eq!(final_roster.names.len(), 16);

        for sink in &survivors {
            let newest = sink
                .rosters()
                .into_iter()
                .max_by_key(|r| r.revision)
                .unwrap();
            assert_eq!(newest.revision, final_roster.revision);
            assert_eq!(newest.names, final_roster.names);
        }
    }
}
