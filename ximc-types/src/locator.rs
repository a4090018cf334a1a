//! Device locators
//!
//! A locator names a controller and the transport that reaches it:
//!
//! ```text
//! xi-com:/dev/ttyACM0              xi-com:///dev/ttyACM0
//! xi-com:COM3                      xi-com:///COM3
//! xi-net://192.168.0.20/000017A2
//! xi-emu:///var/lib/ximc/virtual56.dat?serial=56
//! xi-udp://192.168.0.21:1820
//! xi-tcp://controller.local
//! ```
//!
//! The scheme is case-insensitive. Anything else is rejected.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::transport_kind::TransportKind;

/// Parsed device locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `xi-com:` serial port
    Serial { path: String },

    /// `xi-net://host/serial` network tunnel
    NetworkTunnel { host: String, serial: u32 },

    /// `xi-emu:///path` file-backed virtual controller
    Virtual { path: PathBuf, serial: Option<u32> },

    /// `xi-udp://host[:port]`
    Udp { host: String, port: Option<u16> },

    /// `xi-tcp://host[:port]`
    Tcp { host: String, port: Option<u16> },
}

impl Locator {
    /// Transport selected by this locator
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Serial { .. } => TransportKind::Serial,
            Self::NetworkTunnel { .. } => TransportKind::NetworkTunnel,
            Self::Virtual { .. } => TransportKind::Virtual,
            Self::Udp { .. } => TransportKind::Udp,
            Self::Tcp { .. } => TransportKind::Tcp,
        }
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLocator {
            locator: s.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| invalid("missing scheme"))?;
        let parts = UriParts::split(rest);

        match scheme.to_ascii_lowercase().as_str() {
            "xi-com" => {
                if !parts.host.is_empty() {
                    return Err(invalid("only a path may be given"));
                }
                let path = native_path(&percent_decode(parts.path));
                if path.is_empty() {
                    return Err(invalid("empty port path"));
                }
                Ok(Self::Serial { path })
            }
            "xi-net" => {
                if parts.host.is_empty() {
                    return Err(invalid("missing host"));
                }
                let serial = parts.path.trim_start_matches('/');
                let serial = parse_hex_serial(serial)
                    .ok_or_else(|| invalid("serial must be up to 8 hex digits"))?;
                Ok(Self::NetworkTunnel {
                    host: parts.host.to_string(),
                    serial,
                })
            }
            "xi-emu" => {
                if !parts.host.is_empty() {
                    return Err(invalid("only a path may be given"));
                }
                let path = native_path(&percent_decode(parts.path));
                if path.is_empty() {
                    return Err(invalid("empty file path"));
                }
                let serial = match parts.query {
                    Some(("serial", value)) if !value.is_empty() => Some(
                        value
                            .parse::<u32>()
                            .map_err(|e| Error::Parse(format!("serial '{}': {}", value, e)))?,
                    ),
                    _ => None,
                };
                Ok(Self::Virtual {
                    path: PathBuf::from(path),
                    serial,
                })
            }
            "xi-udp" => {
                let (host, port) = parse_authority(parts.host).ok_or_else(|| invalid("bad host"))?;
                Ok(Self::Udp { host, port })
            }
            "xi-tcp" => {
                let (host, port) = parse_authority(parts.host).ok_or_else(|| invalid("bad host"))?;
                Ok(Self::Tcp { host, port })
            }
            other => Err(Error::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path } => write!(f, "xi-com:{}", path),
            Self::NetworkTunnel { host, serial } => write!(f, "xi-net://{}/{:08X}", host, serial),
            Self::Virtual { path, serial } => {
                write!(f, "xi-emu:///{}", path.display().to_string().trim_start_matches('/'))?;
                if let Some(serial) = serial {
                    write!(f, "?serial={}", serial)?;
                }
                Ok(())
            }
            Self::Udp { host, port } => fmt_host_port(f, "xi-udp", host, *port),
            Self::Tcp { host, port } => fmt_host_port(f, "xi-tcp", host, *port),
        }
    }
}

fn fmt_host_port(f: &mut fmt::Formatter<'_>, scheme: &str, host: &str, port: Option<u16>) -> fmt::Result {
    match port {
        Some(port) if host.contains(':') => write!(f, "{}://[{}]:{}", scheme, host, port),
        Some(port) => write!(f, "{}://{}:{}", scheme, host, port),
        None => write!(f, "{}://{}", scheme, host),
    }
}

struct UriParts<'a> {
    host: &'a str,
    path: &'a str,
    query: Option<(&'a str, &'a str)>,
}

impl<'a> UriParts<'a> {
    fn split(rest: &'a str) -> Self {
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query.split_once('=').unwrap_or((query, "")))),
            None => (rest, None),
        };

        match rest.strip_prefix("//") {
            Some(authority_and_path) => {
                let split = authority_and_path.find('/').unwrap_or(authority_and_path.len());
                let (host, path) = authority_and_path.split_at(split);
                Self { host, path, query }
            }
            None => Self {
                host: "",
                path: rest,
                query,
            },
        }
    }
}

/// `/COM3`, `/c:/x.dat` and `/\\.\COM12` name Windows objects; drop the
/// slash the URI form puts in front of them.
fn native_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix('/') {
        let bytes = stripped.as_bytes();
        let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
        let com = stripped.get(..3).is_some_and(|s| s.eq_ignore_ascii_case("com"));
        if drive || com || stripped.starts_with('\\') {
            return stripped.to_string();
        }
    }
    path.to_string()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_hex_serial(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

fn parse_authority(authority: &str) -> Option<(String, Option<u16>)> {
    if authority.is_empty() {
        return None;
    }

    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']')?;
        let port = match rest.strip_prefix(':') {
            Some(port) => Some(port.parse().ok()?),
            None if rest.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            if host.is_empty() {
                return None;
            }
            Some((host.to_string(), Some(port.parse().ok()?)))
        }
        _ => Some((authority.to_string(), None)),
    }
}
