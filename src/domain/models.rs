use std::fmt;

/// Lifecycle state of the link to the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// A complete application-level message rebuilt from notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Every chunk of an image transfer arrived
    Image { bytes: Vec<u8> },
    /// The peripheral ended the transfer early; bytes are cut to the truncated length
    TruncatedImage { bytes: Vec<u8> },
    /// Single-digit result of the peripheral's own inference
    Status { detected: bool },
    /// Anything the protocol does not recognise, passed through untouched
    Unknown { raw: Vec<u8> },
}

impl Frame {
    /// Image payload, if this frame carries one
    pub fn image_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Image { bytes } | Self::TruncatedImage { bytes } => Some(bytes),
            _ => None,
        }
    }

    /// Lossy text view of an unknown payload
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Unknown { raw } => Some(String::from_utf8_lossy(raw).into_owned()),
            _ => None,
        }
    }
}

/// Callback traffic from the link, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(Vec<u8>),
    Disconnected,
}
