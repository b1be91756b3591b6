//! Core types used throughout the library.

use std::fmt;
use std::str::FromStr;

/// A circuit identifier.
///
/// Circuit ids are short alphanumeric tokens assigned by Tor; they are not
/// guaranteed to be numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CircuitId(pub String);

impl CircuitId {
    /// Create a circuit id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        CircuitId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stream identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub String);

impl StreamId {
    /// Create a stream id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        StreamId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key/value entry used both as a command argument (SETCONF) and as a
/// parsed GETCONF/GETINFO result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyVal {
    /// The key, case-preserved.
    pub key: String,
    /// The value; may be empty.
    pub val: String,
    /// True when an explicit `=` with an empty value was present, so the
    /// empty value is considered set rather than absent.
    pub val_set_and_empty: bool,
}

impl KeyVal {
    /// Create a key/value entry.
    pub fn new(key: impl Into<String>, val: impl Into<String>) -> Self {
        KeyVal {
            key: key.into(),
            val: val.into(),
            val_set_and_empty: false,
        }
    }

    /// True when the value is present: non-empty, or explicitly set empty.
    pub fn val_set(&self) -> bool {
        !self.val.is_empty() || self.val_set_and_empty
    }

    /// Case-insensitive key comparison.
    pub fn key_matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

/// Build a list of entries from alternating keys and values.
///
/// # Panics
///
/// Panics when given an odd number of strings.
pub fn key_vals(keys_and_vals: &[&str]) -> Vec<KeyVal> {
    assert!(
        keys_and_vals.len() % 2 == 0,
        "expected an even number of strings"
    );
    keys_and_vals
        .chunks(2)
        .map(|pair| KeyVal::new(pair[0], pair[1]))
        .collect()
}

/// A Tor signal that can be sent via the SIGNAL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload: reload config items.
    Reload,
    /// Controlled shutdown.
    Shutdown,
    /// Dump stats.
    Dump,
    /// Switch all open logs to loglevel debug.
    Debug,
    /// Immediate shutdown.
    Halt,
    /// Switch to clean circuits.
    NewNym,
    /// Forget client-side cached IPs.
    ClearDnsCache,
    /// Make Tor dump an unscheduled Heartbeat message.
    Heartbeat,
    /// Tell Tor to become "dormant".
    Dormant,
    /// Tell Tor to stop being "dormant".
    Active,
}

impl Signal {
    /// Get the signal name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Reload => "RELOAD",
            Signal::Shutdown => "SHUTDOWN",
            Signal::Dump => "DUMP",
            Signal::Debug => "DEBUG",
            Signal::Halt => "HALT",
            Signal::NewNym => "NEWNYM",
            Signal::ClearDnsCache => "CLEARDNSCACHE",
            Signal::Heartbeat => "HEARTBEAT",
            Signal::Dormant => "DORMANT",
            Signal::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Information about the Tor version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorVersion {
    /// The full version string.
    pub version_string: String,
    /// Major version number.
    pub major: u32,
    /// Minor version number.
    pub minor: u32,
    /// Micro version number.
    pub micro: u32,
    /// Patch version number.
    pub patch: u32,
}

impl FromStr for TorVersion {
    type Err = crate::error::TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version_string = s.to_string();

        // Parse version like "0.4.8.10" or "Tor 0.4.8.10"
        let version_part = s
            .strip_prefix("Tor ")
            .unwrap_or(s)
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()
            .unwrap_or("");

        let parts: Vec<&str> = version_part.split('.').collect();
        let parse_num = |s: &&str| -> u32 { s.parse().unwrap_or(0) };

        Ok(TorVersion {
            version_string,
            major: parts.first().map(parse_num).unwrap_or(0),
            minor: parts.get(1).map(parse_num).unwrap_or(0),
            micro: parts.get(2).map(parse_num).unwrap_or(0),
            patch: parts.get(3).map(parse_num).unwrap_or(0),
        })
    }
}

impl fmt::Display for TorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version_string)
    }
}

/// Onion service address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress {
    /// The address without the .onion suffix.
    address: String,
}

impl OnionAddress {
    /// Create a new onion address from a string, with or without the
    /// `.onion` suffix.
    pub fn new(address: impl Into<String>) -> Self {
        let mut addr = address.into();
        if addr.ends_with(".onion") {
            addr.truncate(addr.len() - 6);
        }
        OnionAddress { address: addr }
    }

    /// Get the service ID (the address without .onion suffix).
    pub fn service_id(&self) -> &str {
        &self.address
    }

    /// Get the full address with .onion suffix.
    pub fn full_address(&self) -> String {
        format!("{}.onion", self.address)
    }

    /// Check if this is a v3 onion address (56 characters).
    pub fn is_v3(&self) -> bool {
        self.address.len() == 56
    }

    /// Check if this is a v2 onion address (16 characters, deprecated).
    pub fn is_v2(&self) -> bool {
        self.address.len() == 16
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl FromStr for OnionAddress {
    type Err = crate::error::TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OnionAddress::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_id_display() {
        let id = CircuitId::new("12345");
        assert_eq!(format!("{}", id), "12345");
    }

    #[test]
    fn test_key_val_set() {
        assert!(KeyVal::new("k", "v").val_set());
        assert!(!KeyVal::new("k", "").val_set());
        let explicit = KeyVal {
            key: "k".to_string(),
            val: String::new(),
            val_set_and_empty: true,
        };
        assert!(explicit.val_set());
    }

    #[test]
    fn test_key_val_matches_case_insensitive() {
        let kv = KeyVal::new("SocksPort", "9050");
        assert!(kv.key_matches("sockSPORT"));
        assert!(!kv.key_matches("ControlPort"));
    }

    #[test]
    fn test_key_vals_builder() {
        let entries = key_vals(&["a", "1", "b", "2"]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], KeyVal::new("b", "2"));
    }

    #[test]
    #[should_panic(expected = "even number")]
    fn test_key_vals_odd_panics() {
        key_vals(&["a", "1", "b"]);
    }

    #[test]
    fn test_signal_as_str() {
        assert_eq!(Signal::Halt.as_str(), "HALT");
        assert_eq!(Signal::NewNym.as_str(), "NEWNYM");
        assert_eq!(Signal::ClearDnsCache.as_str(), "CLEARDNSCACHE");
    }

    #[test]
    fn test_tor_version_parsing() {
        let v = TorVersion::from_str("0.4.8.10").unwrap();
        assert_eq!((v.major, v.minor, v.micro, v.patch), (0, 4, 8, 10));

        let prefixed = TorVersion::from_str("Tor 0.4.7.10").unwrap();
        assert_eq!(prefixed.minor, 4);

        let suffixed = TorVersion::from_str("0.4.8.10-dev").unwrap();
        assert_eq!(suffixed.patch, 10);
    }

    #[test]
    fn test_onion_address() {
        let addr = OnionAddress::new("abc123.onion");
        assert_eq!(addr.service_id(), "abc123");
        assert_eq!(addr.full_address(), "abc123.onion");

        let v2 = OnionAddress::new("exampleonion1234");
        assert!(v2.is_v2());
        assert!(!v2.is_v3());
    }
}
