//! # parley-protocol
//!
//! Wire protocol for the Parley chat relay.
//!
//! Clients and the relay exchange [`Frame`]s, each serialized with
//! MessagePack behind a 4-byte length prefix.
//!
//! ## Frame Types
//!
//! - `Connect` / `ConnectResult` - Register a display name
//! - `Disconnect` - Leave the relay
//! - `SendGroup` / `SendPrivate` - Outbound chat requests
//! - `Message` / `Roster` - Pushes from the relay
//! - `Error`, `Ping` / `Pong` - Control
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Frame};
//!
//! let frame = Frame::send_group("hello, everyone");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
