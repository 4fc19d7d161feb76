//! Frame types for the Parley protocol.
//!
//! Frames are the unit of communication between a client and the relay.
//! Requests flow client to relay; pushes and replies flow the other way.

use serde::{Deserialize, Serialize};

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// A chat request arrived before a successful `connect`.
    pub const NOT_CONNECTED: u16 = 1001;
    /// A second `connect` on a connection that already holds a name.
    pub const ALREADY_CONNECTED: u16 = 1002;
    /// The client speaks an incompatible protocol version.
    pub const INCOMPATIBLE_VERSION: u16 = 1003;
    /// The frame exceeds the relay's message size limit.
    pub const FRAME_TOO_LARGE: u16 = 1004;
    /// The frame is valid but not expected from this side.
    pub const UNEXPECTED_FRAME: u16 = 1005;
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1006;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    ConnectResult = 0x02,
    Disconnect = 0x03,
    SendGroup = 0x04,
    SendPrivate = 0x05,
    Message = 0x06,
    Roster = 0x07,
    Error = 0x08,
    Ping = 0x09,
    Pong = 0x0A,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::ConnectResult),
            0x03 => Ok(FrameType::Disconnect),
            0x04 => Ok(FrameType::SendGroup),
            0x05 => Ok(FrameType::SendPrivate),
            0x06 => Ok(FrameType::Message),
            0x07 => Ok(FrameType::Roster),
            0x08 => Ok(FrameType::Error),
            0x09 => Ok(FrameType::Ping),
            0x0A => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Register under a display name.
    #[serde(rename = "connect")]
    Connect {
        /// Request ID echoed in the result.
        id: u64,
        /// Client protocol major version.
        version: u8,
        /// Requested display name.
        name: String,
    },

    /// Outcome of a `Connect`.
    #[serde(rename = "connect_result")]
    ConnectResult {
        /// ID of the connect request.
        id: u64,
        /// Whether the name was registered.
        accepted: bool,
        /// Why the name was rejected.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Leave the relay. Fire-and-forget.
    #[serde(rename = "disconnect")]
    Disconnect,

    /// Broadcast a line to everyone online.
    #[serde(rename = "send_group")]
    SendGroup {
        /// Message body.
        body: String,
    },

    /// Send a line to a single user.
    #[serde(rename = "send_private")]
    SendPrivate {
        /// Display name of the recipient.
        recipient: String,
        /// Message body.
        body: String,
    },

    /// One formatted chat line pushed by the relay.
    #[serde(rename = "message")]
    Message {
        /// The line, ready for display.
        text: String,
    },

    /// Full replacement of the online-user list.
    #[serde(rename = "roster")]
    Roster {
        /// Increases with every membership change.
        revision: u64,
        /// Online display names.
        names: Vec<String>,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::ConnectResult { .. } => FrameType::ConnectResult,
            Frame::Disconnect => FrameType::Disconnect,
            Frame::SendGroup { .. } => FrameType::SendGroup,
            Frame::SendPrivate { .. } => FrameType::SendPrivate,
            Frame::Message { .. } => FrameType::Message,
            Frame::Roster { .. } => FrameType::Roster,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(id: u64, version: u8, name: impl Into<String>) -> Self {
        Frame::Connect {
            id,
            version,
            name: name.into(),
        }
    }

    /// Create an accepting ConnectResult frame.
    #[must_use]
    pub fn accepted(id: u64, heartbeat: u32) -> Self {
        Frame::ConnectResult {
            id,
            accepted: true,
            reason: None,
            heartbeat,
        }
    }

    /// Create a rejecting ConnectResult frame.
    #[must_use]
    pub fn rejected(id: u64, reason: impl Into<String>, heartbeat: u32) -> Self {
        Frame::ConnectResult {
            id,
            accepted: false,
            reason: Some(reason.into()),
            heartbeat,
        }
    }

    /// Create a new SendGroup frame.
    #[must_use]
    pub fn send_group(body: impl Into<String>) -> Self {
        Frame::SendGroup { body: body.into() }
    }

    /// Create a new SendPrivate frame.
    #[must_use]
    pub fn send_private(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::SendPrivate {
            recipient: recipient.into(),
            body: body.into(),
        }
    }

    /// Create a new Message frame.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Frame::Message { text: text.into() }
    }

    /// Create a new Roster frame.
    #[must_use]
    pub fn roster(revision: u64, names: Vec<String>) -> Self {
        Frame::Roster { revision, names }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
