//! # parley-core
//!
//! Session registry and message routing for the Parley chat relay.
//!
//! - **Registry** - Unique display names mapped to delivery sinks
//! - **Router** - Connect, disconnect, group and private sends
//! - **Sink** - Push capability for one connected client
//! - **Message** - Formatting of chat lines
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//!        │            ┌─────────────┐
//!        └────────────│    Sinks    │
//!                     └─────────────┘
//! ```

pub mod message;
pub mod registry;
pub mod router;
pub mod sink;

pub use registry::{Registry, RegistryError, Session, SessionId};
pub use router::{
    validate_name, ConnectResult, PrivateOutcome, RejectReason, Router, RouterConfig, RouterStats,
};
pub use sink::{ChannelSink, Delivery, DeliveryError, MemorySink, Roster, Sink};
