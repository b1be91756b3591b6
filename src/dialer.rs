//! Dialing out through Tor's SOCKS proxy.
//!
//! The dialer discovers the SOCKS listener via the control port and opens
//! SOCKS5 connections through it. Supplying proxy credentials makes Tor
//! isolate the resulting streams onto their own circuit; identical
//! credentials share a circuit.

use crate::error::{Result, TorControlError};
use crate::tor::Tor;
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

/// SOCKS credentials used for circuit isolation.
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    /// SOCKS username.
    pub username: String,
    /// SOCKS password.
    pub password: String,
}

impl ProxyAuth {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        ProxyAuth {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Configuration for [`Tor::dialer`].
#[derive(Debug, Clone, Default)]
pub struct DialConf {
    /// SOCKS proxy address; when absent it is resolved via
    /// `GETINFO net/listeners/socks`.
    pub proxy_address: Option<String>,
    /// Optional credentials for SOCKS-auth circuit isolation.
    pub proxy_auth: Option<ProxyAuth>,
}

/// An outbound connector through Tor's SOCKS proxy.
#[derive(Debug, Clone)]
pub struct Dialer {
    proxy_address: String,
    proxy_auth: Option<ProxyAuth>,
}

impl Dialer {
    /// The SOCKS proxy address this dialer connects through.
    pub fn proxy_address(&self) -> &str {
        &self.proxy_address
    }

    /// Open a connection to `target` (`host:port`, `.onion` hosts included)
    /// through the SOCKS proxy.
    pub async fn dial(&self, target: &str) -> Result<Socks5Stream<TcpStream>> {
        debug!(target, proxy = %self.proxy_address, "dialing through socks");
        let stream = match &self.proxy_auth {
            Some(auth) => {
                Socks5Stream::connect_with_password(
                    self.proxy_address.as_str(),
                    target,
                    &auth.username,
                    &auth.password,
                )
                .await?
            }
            None => Socks5Stream::connect(self.proxy_address.as_str(), target).await?,
        };
        Ok(stream)
    }
}

impl Tor {
    /// Build a dialer for Tor's SOCKS proxy, resolving the proxy address via
    /// the control port unless one is supplied.
    pub async fn dialer(&self, conf: Option<DialConf>) -> Result<Dialer> {
        let conf = conf.unwrap_or_default();
        let proxy_address = match conf.proxy_address {
            Some(addr) => addr,
            None => {
                let info = self.control()?.get_info(&["net/listeners/socks"]).await?;
                let entry = info.first().ok_or_else(|| {
                    TorControlError::ParseError("No SOCKS listener info".to_string())
                })?;
                // The value is a space-separated list; take the first.
                let addr = entry
                    .val
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if addr.is_empty() {
                    return Err(TorControlError::NotSupported(
                        "Tor has no SOCKS listener".to_string(),
                    ));
                }
                if addr.starts_with("unix:") {
                    return Err(TorControlError::NotSupported(
                        "Unix socket SOCKS listeners are not supported".to_string(),
                    ));
                }
                addr
            }
        };
        Ok(Dialer {
            proxy_address,
            proxy_auth: conf.proxy_auth,
        })
    }
}
