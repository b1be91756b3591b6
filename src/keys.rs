//! Key material for onion services and service-id derivation.
//!
//! ADDONION accepts a small closed set of key kinds: a request for Tor to
//! generate one, an RSA-1024 private key (v2 services), or an ed25519
//! expanded private key (v3 services). Service ids are derived from the
//! corresponding public keys.

use crate::error::{Result, TorControlError};
use crate::protocol::partition;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use data_encoding::BASE32_NOPAD;
use sha1::{Digest as _, Sha1};
use sha3::Sha3_256;

/// The wire key-type tag sent and received in `KeyType:Blob` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Ask Tor to generate a key (`NEW`).
    New,
    /// RSA-1024 private key, v2 services.
    Rsa1024,
    /// Ed25519 expanded private key, v3 services.
    Ed25519V3,
}

impl KeyType {
    /// The tag as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::New => "NEW",
            KeyType::Rsa1024 => "RSA1024",
            KeyType::Ed25519V3 => "ED25519-V3",
        }
    }
}

/// The algorithm requested when asking Tor to generate a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgo {
    /// Let Tor pick its preferred algorithm.
    Best,
    /// RSA-1024 (v2, deprecated).
    Rsa1024,
    /// Ed25519 (v3).
    Ed25519V3,
}

impl KeyAlgo {
    /// The algorithm name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgo::Best => "BEST",
            KeyAlgo::Rsa1024 => "RSA1024",
            KeyAlgo::Ed25519V3 => "ED25519-V3",
        }
    }
}

/// A key usable with ADDONION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnionKey {
    /// Sentinel asking Tor to generate a key of the given algorithm.
    Generate(KeyAlgo),
    /// An RSA-1024 private key as DER-encoded PKCS#1.
    Rsa1024(Vec<u8>),
    /// An ed25519 expanded private key (64 bytes).
    Ed25519(Vec<u8>),
}

impl OnionKey {
    /// The wire key type for this key.
    pub fn key_type(&self) -> KeyType {
        match self {
            OnionKey::Generate(_) => KeyType::New,
            OnionKey::Rsa1024(_) => KeyType::Rsa1024,
            OnionKey::Ed25519(_) => KeyType::Ed25519V3,
        }
    }

    /// The wire blob: the algorithm name for generation requests, base64 of
    /// the key bytes otherwise.
    pub fn blob(&self) -> String {
        match self {
            OnionKey::Generate(algo) => algo.as_str().to_string(),
            OnionKey::Rsa1024(der) => BASE64.encode(der),
            OnionKey::Ed25519(bytes) => BASE64.encode(bytes),
        }
    }

    /// Parse a `KeyType:Blob` pair as returned in an ADDONION `PrivateKey=`
    /// line.
    pub fn from_spec_string(s: &str) -> Result<OnionKey> {
        let (typ, blob, _) = partition(s, ':');
        match typ {
            "NEW" => match blob {
                "BEST" => Ok(OnionKey::Generate(KeyAlgo::Best)),
                "RSA1024" => Ok(OnionKey::Generate(KeyAlgo::Rsa1024)),
                "ED25519-V3" => Ok(OnionKey::Generate(KeyAlgo::Ed25519V3)),
                other => Err(TorControlError::KeyFormat(format!(
                    "Unrecognized key algorithm: {}",
                    other
                ))),
            },
            "RSA1024" => Ok(OnionKey::Rsa1024(decode_blob(blob)?)),
            "ED25519-V3" => {
                let bytes = decode_blob(blob)?;
                if bytes.len() != 64 {
                    return Err(TorControlError::KeyFormat(format!(
                        "Expected 64-byte ed25519 expanded key, got {}",
                        bytes.len()
                    )));
                }
                Ok(OnionKey::Ed25519(bytes))
            }
            other => Err(TorControlError::KeyFormat(format!(
                "Unrecognized key type: {}",
                other
            ))),
        }
    }
}

fn decode_blob(blob: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(blob)
        .map_err(|e| TorControlError::KeyFormat(format!("Invalid key blob: {}", e)))
}

/// Derive a v2 onion service id from a DER-encoded PKCS#1 RSA public key:
/// the lowercase base32 of the first 10 bytes of its SHA-1.
pub fn onion_service_id_from_v2_public_key(public_key_der: &[u8]) -> String {
    let digest = Sha1::digest(public_key_der);
    BASE32_NOPAD.encode(&digest[..10]).to_lowercase()
}

/// Derive a v3 onion service id from a 32-byte ed25519 public key:
/// lowercase base32 of `pubkey || checksum[..2] || 0x03` where the checksum
/// is SHA3-256 over `".onion checksum" || pubkey || 0x03`.
pub fn onion_service_id_from_v3_public_key(public_key: &[u8; 32]) -> String {
    let checksum = v3_checksum(public_key);
    let mut bytes = [0u8; 35];
    bytes[..32].copy_from_slice(public_key);
    bytes[32] = checksum[0];
    bytes[33] = checksum[1];
    bytes[34] = 0x03;
    BASE32_NOPAD.encode(&bytes).to_lowercase()
}

/// Recover and verify the ed25519 public key inside a v3 onion service id.
pub fn public_key_from_v3_onion_service_id(id: &str) -> Result<[u8; 32]> {
    let bytes = BASE32_NOPAD
        .decode(id.to_uppercase().as_bytes())
        .map_err(|_| TorControlError::KeyFormat("Invalid id encoding".to_string()))?;
    if bytes.len() != 35 {
        return Err(TorControlError::KeyFormat("Invalid id length".to_string()));
    }
    if bytes[34] != 0x03 {
        return Err(TorControlError::KeyFormat("Invalid version".to_string()));
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&bytes[..32]);
    let checksum = v3_checksum(&public_key);
    if bytes[32] != checksum[0] || bytes[33] != checksum[1] {
        return Err(TorControlError::KeyFormat("Invalid checksum".to_string()));
    }
    Ok(public_key)
}

fn v3_checksum(public_key: &[u8; 32]) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(b".onion checksum");
    hasher.update(public_key);
    hasher.update([0x03]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}
