//! Onion services as local network listeners.
//!
//! [`Tor::listen`] publishes an ephemeral onion service backed by a local
//! listener and, unless told otherwise, waits for the descriptor to be
//! uploaded before returning. [`Tor::forward`] publishes a service that
//! forwards to existing local addresses without an accept side.

use crate::commands::{AddOnionRequest, OnionPort};
use crate::error::{Result, TorControlError};
use crate::events::{Event, EventType};
use crate::keys::{KeyAlgo, OnionKey};
use crate::tor::Tor;
use crate::types::OnionAddress;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The local listener backing an onion service.
#[derive(Debug)]
pub enum LocalListener {
    /// A TCP listener.
    Tcp(TcpListener),
    /// A Unix socket listener.
    #[cfg(unix)]
    Unix(UnixListener),
}

impl LocalListener {
    /// The target string for an ADDONION `Port=` mapping.
    fn local_target(&self) -> Result<String> {
        match self {
            LocalListener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(unix)]
            LocalListener::Unix(listener) => {
                let addr = listener.local_addr()?;
                let path = addr.as_pathname().ok_or_else(|| {
                    TorControlError::InvalidArgument(
                        "Unix listener has no path".to_string(),
                    )
                })?;
                Ok(format!("unix:{}", path.display()))
            }
        }
    }

    /// The TCP port, when this is a TCP listener.
    fn tcp_port(&self) -> Option<u16> {
        match self {
            LocalListener::Tcp(listener) => listener.local_addr().ok().map(|a| a.port()),
            #[cfg(unix)]
            LocalListener::Unix(_) => None,
        }
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<OnionStream> {
        match self {
            LocalListener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(OnionStream::Tcp(stream))
            }
            #[cfg(unix)]
            LocalListener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(OnionStream::Unix(stream))
            }
        }
    }
}

/// A connection accepted from the local side of an onion service.
#[derive(Debug)]
pub enum OnionStream {
    /// A TCP connection.
    Tcp(TcpStream),
    /// A Unix socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for OnionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OnionStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            OnionStream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for OnionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            OnionStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            OnionStream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OnionStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            OnionStream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OnionStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            OnionStream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Configuration for [`Tor::listen`].
#[derive(Debug, Default)]
pub struct ListenConf {
    /// Local TCP port to listen on; 0 picks one automatically. Ignored when
    /// `local_listener` is set.
    pub local_port: u16,
    /// An existing listener to adopt instead of creating one. Adopted
    /// listeners are not closed when the service closes.
    pub local_listener: Option<LocalListener>,
    /// Ports the onion service is reachable on. When empty, the local TCP
    /// port is used (an error for non-TCP listeners).
    pub remote_ports: Vec<u16>,
    /// The service key; when absent an ed25519 key is generated.
    pub key: Option<OnionKey>,
    /// Client authorization credentials (name to blob).
    pub client_auths: HashMap<String, String>,
    /// Maximum stream count; 0 means unlimited.
    pub max_streams: u32,
    /// Ask Tor not to return a generated private key.
    pub discard_key: bool,
    /// Keep the service alive after this control connection closes.
    pub detach: bool,
    /// Must match Tor's HiddenServiceSingleHopMode/NonAnonymousMode options.
    pub non_anonymous: bool,
    /// Close the circuit when `max_streams` is exceeded.
    pub max_streams_close_circuit: bool,
    /// Return as soon as the service is created, without enabling the
    /// network or waiting for descriptor publication.
    pub no_wait: bool,
}

/// Configuration for [`Tor::forward`].
#[derive(Debug, Default)]
pub struct ForwardConf {
    /// Local target address (`host:port` or `unix:<path>`) to the remote
    /// ports forwarded to it.
    pub port_forwards: HashMap<String, Vec<u16>>,
    /// The service key; when absent an ed25519 key is generated.
    pub key: Option<OnionKey>,
    /// Client authorization credentials (name to blob).
    pub client_auths: HashMap<String, String>,
    /// Maximum stream count; 0 means unlimited.
    pub max_streams: u32,
    /// Ask Tor not to return a generated private key.
    pub discard_key: bool,
    /// Keep the service alive after this control connection closes.
    pub detach: bool,
    /// Must match Tor's HiddenServiceSingleHopMode/NonAnonymousMode options.
    pub non_anonymous: bool,
    /// Close the circuit when `max_streams` is exceeded.
    pub max_streams_close_circuit: bool,
    /// Return as soon as the service is created.
    pub no_wait: bool,
}

struct OnionOpts {
    key: Option<OnionKey>,
    client_auths: HashMap<String, String>,
    max_streams: u32,
    discard_key: bool,
    detach: bool,
    non_anonymous: bool,
    max_streams_close_circuit: bool,
}

fn onion_request(opts: OnionOpts, ports: Vec<OnionPort>) -> AddOnionRequest {
    let mut flags = Vec::new();
    if opts.discard_key {
        flags.push("DiscardPK".to_string());
    }
    if opts.detach {
        flags.push("Detach".to_string());
    }
    if !opts.client_auths.is_empty() {
        flags.push("V3Auth".to_string());
    }
    if opts.non_anonymous {
        flags.push("NonAnonymous".to_string());
    }
    if opts.max_streams_close_circuit {
        flags.push("MaxStreamsCloseCircuit".to_string());
    }
    AddOnionRequest {
        key: opts
            .key
            .unwrap_or(OnionKey::Generate(KeyAlgo::Ed25519V3)),
        flags,
        max_streams: opts.max_streams,
        ports,
        client_auths: opts.client_auths,
    }
}

/// An onion service bound to a local listener.
///
/// Closing the service withdraws it with DELONION and, when the listener was
/// created by [`Tor::listen`], closes the listener too.
pub struct OnionService {
    /// The service id (the `.onion` address without its suffix).
    pub id: String,
    /// The service's private key: caller-provided, generated by Tor, or
    /// `None` when discarded.
    pub key: Option<OnionKey>,
    /// Remote ports the service is reachable on; never empty.
    pub remote_ports: Vec<u16>,
    local_listener: Option<LocalListener>,
    close_local_listener_on_close: bool,
    client: std::sync::Arc<crate::connection::TorClient>,
}

impl std::fmt::Debug for OnionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnionService")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("remote_ports", &self.remote_ports)
            .finish_non_exhaustive()
    }
}

impl OnionService {
    /// Accept a connection from the local listener.
    pub async fn accept(&self) -> Result<OnionStream> {
        match &self.local_listener {
            Some(listener) => listener.accept().await,
            None => Err(TorControlError::ConnectionClosed),
        }
    }

    /// The address of this service, sans port.
    pub fn onion_address(&self) -> OnionAddress {
        OnionAddress::new(self.id.as_str())
    }

    /// The public address of this service: `<id>.onion:<first remote port>`.
    pub fn onion_addr(&self) -> String {
        format!(
            "{}:{}",
            self.onion_address().full_address(),
            self.remote_ports.first().copied().unwrap_or(0)
        )
    }

    /// Withdraw the service and close the local listener when owned.
    pub async fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        if !self.id.is_empty() {
            debug!(id = %self.id, "closing onion service");
            result = self.client.del_onion(&self.id).await;
            self.id.clear();
        }
        if self.close_local_listener_on_close {
            self.local_listener = None;
        }
        result
    }
}

/// An accept-less onion service forwarding to local addresses.
pub struct OnionForward {
    /// The service id (the `.onion` address without its suffix).
    pub id: String,
    /// The service's private key, unless discarded.
    pub key: Option<OnionKey>,
    /// The forwarded targets and their remote ports.
    pub port_forwards: HashMap<String, Vec<u16>>,
    client: std::sync::Arc<crate::connection::TorClient>,
}

impl OnionForward {
    /// The public address of this service, sans port.
    pub fn onion_addr(&self) -> String {
        OnionAddress::new(self.id.as_str()).full_address()
    }

    /// Withdraw the service.
    pub async fn close(&mut self) -> Result<()> {
        if self.id.is_empty() {
            return Ok(());
        }
        debug!(id = %self.id, "closing onion forward");
        let result = self.client.del_onion(&self.id).await;
        self.id.clear();
        result
    }
}

impl Tor {
    /// Publish an onion service backed by a local listener.
    ///
    /// Unless `no_wait` is set this enables the network and blocks until the
    /// descriptor is uploaded; if every upload fails the error carries the
    /// per-directory reasons. On error any service state created here is
    /// torn down (an adopted listener stays open).
    pub async fn listen(
        &self,
        cancel: &CancellationToken,
        conf: ListenConf,
    ) -> Result<OnionService> {
        let ListenConf {
            local_port,
            local_listener,
            remote_ports,
            key,
            client_auths,
            max_streams,
            discard_key,
            detach,
            non_anonymous,
            max_streams_close_circuit,
            no_wait,
        } = conf;
        let client = self.control()?.clone();
        let close_local = local_listener.is_none();
        let local_listener = match local_listener {
            Some(listener) => listener,
            None => {
                LocalListener::Tcp(TcpListener::bind(("127.0.0.1", local_port)).await?)
            }
        };

        let mut svc = OnionService {
            id: String::new(),
            key: key.clone(),
            remote_ports: Vec::new(),
            local_listener: Some(local_listener),
            close_local_listener_on_close: close_local,
            client,
        };

        let result = async {
            let (tcp_port, target) = {
                let listener = svc
                    .local_listener
                    .as_ref()
                    .ok_or(TorControlError::ConnectionClosed)?;
                (listener.tcp_port(), listener.local_target()?)
            };
            svc.remote_ports = if remote_ports.is_empty() {
                let port = tcp_port.ok_or_else(|| {
                    TorControlError::InvalidArgument(
                        "Unable to derive local TCP port".to_string(),
                    )
                })?;
                vec![port]
            } else {
                remote_ports
            };
            let ports = svc
                .remote_ports
                .iter()
                .map(|&remote| OnionPort::new(remote, Some(target.clone())))
                .collect();

            let req = onion_request(
                OnionOpts {
                    key,
                    client_auths,
                    max_streams,
                    discard_key,
                    detach,
                    non_anonymous,
                    max_streams_close_circuit,
                },
                ports,
            );
            let resp = svc.client.add_onion(&req).await?;
            svc.id = resp.service_id;
            if let Some(key) = resp.key {
                svc.key = Some(key);
            }

            if !no_wait {
                self.await_publication(cancel, &svc.id).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(svc),
            Err(e) => {
                if let Err(close_err) = svc.close().await {
                    debug!(error = %close_err, "teardown after failed listen also failed");
                }
                Err(e)
            }
        }
    }

    /// Publish an onion service forwarding to existing local addresses.
    pub async fn forward(
        &self,
        cancel: &CancellationToken,
        conf: ForwardConf,
    ) -> Result<OnionForward> {
        let ForwardConf {
            port_forwards,
            key,
            client_auths,
            max_streams,
            discard_key,
            detach,
            non_anonymous,
            max_streams_close_circuit,
            no_wait,
        } = conf;
        let client = self.control()?.clone();
        let mut fwd = OnionForward {
            id: String::new(),
            key: key.clone(),
            port_forwards,
            client,
        };

        let result = async {
            let mut targets: Vec<&String> = fwd.port_forwards.keys().collect();
            targets.sort_unstable();
            let mut ports = Vec::new();
            for target in targets {
                for &remote in &fwd.port_forwards[target] {
                    ports.push(OnionPort::new(remote, Some(target.clone())));
                }
            }
            if ports.is_empty() {
                return Err(TorControlError::InvalidArgument(
                    "No port forwards given".to_string(),
                ));
            }

            let req = onion_request(
                OnionOpts {
                    key,
                    client_auths,
                    max_streams,
                    discard_key,
                    detach,
                    non_anonymous,
                    max_streams_close_circuit,
                },
                ports,
            );
            let resp = fwd.client.add_onion(&req).await?;
            fwd.id = resp.service_id;
            if let Some(key) = resp.key {
                fwd.key = Some(key);
            }

            if !no_wait {
                self.await_publication(cancel, &fwd.id).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(fwd),
            Err(e) => {
                if let Err(close_err) = fwd.close().await {
                    debug!(error = %close_err, "teardown after failed forward also failed");
                }
                Err(e)
            }
        }
    }

    /// Enable the network and wait until an HSDesc UPLOADED arrives for
    /// `service_id`, failing once every attempted upload has FAILED.
    async fn await_publication(
        &self,
        cancel: &CancellationToken,
        service_id: &str,
    ) -> Result<()> {
        debug!("enabling network before waiting for publication");
        self.enable_network(cancel, true).await?;
        debug!(service_id, "waiting for publication");
        let mut uploads_attempted = 0usize;
        let mut failures: Vec<String> = Vec::new();
        self.control()?
            .event_wait(&[EventType::HsDesc], cancel, move |event| {
                let Event::HsDesc(hs) = event else {
                    return Ok(false);
                };
                if hs.address != service_id {
                    return Ok(false);
                }
                match hs.action.as_str() {
                    "UPLOAD" => {
                        uploads_attempted += 1;
                        Ok(false)
                    }
                    "FAILED" => {
                        failures.push(format!(
                            "Failed uploading to dir {} - reason: {}",
                            hs.hs_dir, hs.reason
                        ));
                        if failures.len() >= uploads_attempted {
                            Err(TorControlError::PublicationFailed(failures.clone()))
                        } else {
                            Ok(false)
                        }
                    }
                    "UPLOADED" => Ok(true),
                    _ => Ok(false),
                }
            })
            .await?;
        Ok(())
    }
}
