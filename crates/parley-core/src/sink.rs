//! Delivery sinks.
//!
//! A sink is the relay's only handle on a connected client: it can push a
//! chat line or a roster snapshot to exactly one client. The transport owns
//! the other end.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// A point-in-time list of online display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    /// Registry revision this snapshot was taken at.
    pub revision: u64,
    /// Names in registration order.
    pub names: Vec<String>,
}

/// A payload pushed to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// One formatted chat line (shared across a fan-out).
    Message(Arc<str>),
    /// Replacement of the client's online-user list.
    Roster(Arc<Roster>),
}

/// Why a delivery did not reach its client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The client's connection is gone.
    #[error("Sink closed")]
    Closed,

    /// The client did not accept the payload in time.
    #[error("Delivery timed out")]
    Timeout,
}

/// Outbound capability for one client.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Push a payload to the client.
    async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError>;
}

/// A sink backed by a bounded queue that the transport drains.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    /// Create a sink and the receiving end the transport should drain.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        // Waits while the queue is full; the router bounds the wait.
        self.tx
            .send(delivery)
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Behaviour of a [`MemorySink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Open,
    Closed,
    Stalled,
}

/// An in-memory sink that records what it receives.
///
/// Can also play a client whose connection dropped ([`MemorySink::closed`])
/// or one that never reads ([`MemorySink::stalled`]).
#[derive(Debug)]
pub struct MemorySink {
    received: Mutex<Vec<Delivery>>,
    mode: Mutex<Mode>,
}

impl MemorySink {
    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            mode: Mutex::new(mode),
        })
    }

    /// A sink that accepts everything.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_mode(Mode::Open)
    }

    /// A sink whose deliveries fail with [`DeliveryError::Closed`].
    #[must_use]
    pub fn closed() -> Arc<Self> {
        Self::with_mode(Mode::Closed)
    }

    /// A sink whose deliveries never complete.
    #[must_use]
    pub fn stalled() -> Arc<Self> {
        Self::with_mode(Mode::Stalled)
    }

    /// Make every later delivery fail.
    pub fn close(&self) {
        *self.mode.lock() = Mode::Closed;
    }

    /// Everything delivered so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.received.lock().clone()
    }

    /// Chat lines delivered so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Message(text) => Some(text.to_string()),
                Delivery::Roster(_) => None,
            })
            .collect()
    }

    /// Rosters delivered so far.
    #[must_use]
    pub fn rosters(&self) -> Vec<Arc<Roster>> {
        self.received
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Roster(roster) => Some(Arc::clone(roster)),
                Delivery::Message(_) => None,
            })
            .collect()
    }

    /// Names of the most recently delivered roster.
    #[must_use]
    pub fn last_roster(&self) -> Option<Vec<String>> {
        self.rosters().last().map(|r| r.names.clone())
    }

    /// Forget everything delivered so far.
    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        let mode = *self.mode.lock();
        match mode {
            Mode::Open => {
                trace!(?delivery, "Memory sink received");
                self.received.lock().push(delivery);
                Ok(())
            }
            Mode::Closed => Err(DeliveryError::Closed),
            Mode::Stalled => std::future::pending().await,
        }
    }
}
