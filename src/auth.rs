//! Authentication for the control protocol.
//!
//! Implements parsing of PROTOCOLINFO and the building blocks for the four
//! authentication methods: NULL, HASHEDPASSWORD, COOKIE, and SAFECOOKIE
//! (including the mutual HMAC challenge).

use crate::error::{Result, TorControlError};
use crate::protocol::{partition, unescape_quoted, Reply};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// HMAC key for the hash Tor sends us during SAFECOOKIE.
const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
/// HMAC key for the hash we send back.
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

/// Authentication methods advertised by Tor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required.
    Null,
    /// Password authentication.
    HashedPassword,
    /// Cookie file authentication (legacy).
    Cookie,
    /// Safe cookie authentication (HMAC challenge).
    SafeCookie,
}

impl AuthMethod {
    /// Parse an auth method name; unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NULL" => Some(AuthMethod::Null),
            "HASHEDPASSWORD" => Some(AuthMethod::HashedPassword),
            "COOKIE" => Some(AuthMethod::Cookie),
            "SAFECOOKIE" => Some(AuthMethod::SafeCookie),
            _ => None,
        }
    }

    /// The method name as advertised in PROTOCOLINFO.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Null => "NULL",
            AuthMethod::HashedPassword => "HASHEDPASSWORD",
            AuthMethod::Cookie => "COOKIE",
            AuthMethod::SafeCookie => "SAFECOOKIE",
        }
    }
}

/// Information retrieved from the PROTOCOLINFO command.
#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    /// Supported authentication method names, as advertised.
    pub auth_methods: Vec<String>,
    /// Path to the cookie file, when cookie methods are available.
    pub cookie_file: Option<String>,
    /// Tor version string.
    pub tor_version: String,
    /// The raw reply the info was parsed from.
    pub raw: Reply,
}

impl ProtocolInfo {
    /// Parse a PROTOCOLINFO reply.
    ///
    /// Data lines look like:
    ///
    /// ```text
    /// PROTOCOLINFO 1
    /// AUTH METHODS=NULL,SAFECOOKIE COOKIEFILE="/run/tor/control.authcookie"
    /// VERSION Tor="0.4.7.10"
    /// ```
    pub fn parse(reply: Reply) -> Result<Self> {
        let mut ret = ProtocolInfo {
            auth_methods: Vec::new(),
            cookie_file: None,
            tor_version: String::new(),
            raw: reply,
        };
        for piece in &ret.raw.data {
            let (key, val, ok) = partition(piece, ' ');
            if !ok {
                continue;
            }
            match key {
                "PROTOCOLINFO" => {
                    if val != "1" {
                        return Err(TorControlError::ProtocolError(format!(
                            "Invalid PIVERSION: {}",
                            val
                        )));
                    }
                }
                "AUTH" => {
                    let (methods, cookie_file, _) = partition(val, ' ');
                    let Some(methods) = methods.strip_prefix("METHODS=") else {
                        continue;
                    };
                    if !cookie_file.is_empty() {
                        let Some(quoted) = cookie_file.strip_prefix("COOKIEFILE=") else {
                            continue;
                        };
                        match unescape_quoted(quoted) {
                            Ok(path) => ret.cookie_file = Some(path),
                            Err(_) => continue,
                        }
                    }
                    ret.auth_methods = methods.split(',').map(String::from).collect();
                }
                "VERSION" => {
                    let (tor_version, _, _) = partition(val, ' ');
                    if let Some(quoted) = tor_version.strip_prefix("Tor=") {
                        ret.tor_version = unescape_quoted(quoted)?;
                    }
                }
                _ => {}
            }
        }
        Ok(ret)
    }

    /// Whether the given method was advertised.
    pub fn has_auth_method(&self, method: AuthMethod) -> bool {
        self.auth_methods.iter().any(|m| m == method.as_str())
    }
}

/// Read the 32-byte authentication cookie from a file.
pub fn read_cookie_file(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| {
        TorControlError::AuthenticationFailed(format!(
            "Failed to read cookie file '{}': {}",
            path.display(),
            e
        ))
    })?;
    if data.len() != 32 {
        return Err(TorControlError::AuthenticationFailed(format!(
            "Cookie file has invalid length {} (expected 32)",
            data.len()
        )));
    }
    Ok(data)
}

/// Generate a random client nonce for SAFECOOKIE authentication.
pub fn generate_client_nonce() -> [u8; 32] {
    use rand::Rng;
    let mut nonce = [0u8; 32];
    rand::rng().fill(&mut nonce);
    nonce
}

/// Compute the hash Tor must present for SAFECOOKIE.
pub fn compute_server_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    hmac_challenge(SERVER_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// Compute the hash we present to Tor for SAFECOOKIE.
pub fn compute_client_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    hmac_challenge(CLIENT_HASH_KEY, cookie, client_nonce, server_nonce)
}

fn hmac_challenge(key: &[u8], cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&mac.finalize().into_bytes());
    hash
}

/// Verify the server's SAFECOOKIE hash in constant time.
pub fn verify_server_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    expected_hash: &[u8],
) -> bool {
    let computed = compute_server_hash(cookie, client_nonce, server_nonce);
    constant_time_compare(&computed, expected_hash)
}

/// Parse the `SERVERHASH=... SERVERNONCE=...` portion of an AUTHCHALLENGE
/// reply. Both values must decode to 32 bytes.
pub fn parse_authchallenge_reply(text: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut server_hash = None;
    let mut server_nonce = None;
    for part in text.split_whitespace() {
        if let Some(hash) = part.strip_prefix("SERVERHASH=") {
            server_hash = Some(decode_hex_32(hash, "SERVERHASH")?);
        } else if let Some(nonce) = part.strip_prefix("SERVERNONCE=") {
            server_nonce = Some(decode_hex_32(nonce, "SERVERNONCE")?);
        }
    }
    let server_hash = server_hash
        .ok_or_else(|| TorControlError::ProtocolError("Missing SERVERHASH".to_string()))?;
    let server_nonce = server_nonce
        .ok_or_else(|| TorControlError::ProtocolError("Missing SERVERNONCE".to_string()))?;
    Ok((server_hash, server_nonce))
}

fn decode_hex_32(s: &str, what: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(s)
        .map_err(|e| TorControlError::ProtocolError(format!("Invalid {} hex: {}", what, e)))?;
    if bytes.len() != 32 {
        return Err(TorControlError::ProtocolError(format!(
            "Invalid {} length: {}",
            what,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
