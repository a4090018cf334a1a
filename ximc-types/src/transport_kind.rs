//! Transport kinds

use std::fmt;

/// Physical transport behind an open device
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// USB-CDC or RS-232 serial port
    Serial,

    /// Encrypted network tunnel to a remote controller
    NetworkTunnel,

    /// File-backed emulated controller
    Virtual,

    /// Raw UDP datagrams
    Udp,

    /// Raw TCP stream
    Tcp,

    /// Record allocated but not yet bound to a transport
    #[default]
    Unknown,
}

impl TransportKind {
    /// Column value used by the diagnostic file log
    pub fn log_tag(self) -> &'static str {
        match self {
            Self::Serial => "com",
            Self::Virtual => "emu",
            Self::NetworkTunnel => "net",
            Self::Udp => "udp",
            Self::Tcp | Self::Unknown => "---",
        }
    }

    /// URI scheme that selects this transport
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            Self::Serial => Some("xi-com"),
            Self::NetworkTunnel => Some("xi-net"),
            Self::Virtual => Some("xi-emu"),
            Self::Udp => Some("xi-udp"),
            Self::Tcp => Some("xi-tcp"),
            Self::Unknown => None,
        }
    }

    /// Whether a zero-byte read means "not yet available" rather than a stall
    pub fn polls_on_empty_read(self) -> bool {
        matches!(self, Self::NetworkTunnel)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Serial => "serial",
            Self::NetworkTunnel => "network-tunnel",
            Self::Virtual => "virtual",
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
