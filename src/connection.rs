//! The control-port connection engine.
//!
//! [`TorClient`] owns the TCP control stream and multiplexes synchronous
//! command/response exchanges with unsolicited asynchronous event frames on
//! the single connection. It is designed to be shared: wrap it in an [`Arc`]
//! and call it from as many tasks as needed.
//!
//! Concurrency contract: whole command exchanges are serialised by an
//! internal command lock, and a read-side lock ensures exactly one reader is
//! inside the response reader at a time. The event pump peeks the three
//! status bytes before committing to a read, so it can yield the stream to a
//! command caller cheaply when the next frame is not an event.

use crate::auth::{
    compute_client_hash, generate_client_nonce, parse_authchallenge_reply, read_cookie_file,
    verify_server_hash, AuthMethod, ProtocolInfo,
};
use crate::error::{Result, TorControlError};
use crate::events::{parse_event, Event, EventType};
use crate::protocol::{escape_quoted, format_command, partition, Reply, ReplyLine};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Channel capacity used by [`TorClient::event_wait`] for its internal
/// subscription.
const EVENT_WAIT_BUFFER: usize = 10;

/// A buffered reader over the control stream that can peek the status digits
/// of the next frame without consuming them.
///
/// Consumed-but-incomplete lines stay in the internal buffer, so dropping a
/// pending read mid-line loses nothing.
struct LineReader {
    inner: OwnedReadHalf,
    buf: Vec<u8>,
}

impl LineReader {
    fn new(inner: OwnedReadHalf) -> Self {
        LineReader {
            inner,
            buf: Vec::with_capacity(4096),
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(TorControlError::ConnectionClosed);
        }
        Ok(())
    }

    /// Peek the three status digits of the next frame without consuming.
    async fn peek_status(&mut self) -> Result<u16> {
        while self.buf.len() < 3 {
            self.fill().await?;
        }
        let digits = &self.buf[..3];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(TorControlError::ProtocolError(format!(
                "Invalid status bytes: {:?}",
                digits
            )));
        }
        Ok(digits
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
    }

    /// Read one line, stripping the trailing CRLF.
    async fn read_line(&mut self) -> Result<String> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buf[searched..].iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=searched + pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line).map_err(|_| {
                    TorControlError::ProtocolError("Reply line is not valid UTF-8".to_string())
                });
            }
            searched = self.buf.len();
            self.fill().await?;
        }
    }
}

/// Read one complete reply: `NNN-` intermediate lines, `NNN+` data blocks
/// terminated by a lone `.`, and the final `NNN<sp>` line.
async fn read_reply(reader: &mut LineReader) -> Result<Reply> {
    let mut data = Vec::new();
    loop {
        let line = reader.read_line().await?;
        trace!(line = %line, "read");
        let parsed = ReplyLine::parse(&line)?;
        match parsed.separator {
            '-' => data.push(parsed.text),
            '+' => {
                let mut block = parsed.text;
                loop {
                    let body_line = reader.read_line().await?;
                    if body_line == "." {
                        break;
                    }
                    block.push_str("\r\n");
                    block.push_str(body_line.strip_prefix('.').unwrap_or(&body_line));
                }
                data.push(block);
            }
            _ => {
                return Ok(Reply {
                    status: parsed.status,
                    reply: parsed.text,
                    data,
                });
            }
        }
    }
}

fn is_async_status(status: u16) -> bool {
    status / 100 == 6
}

/// A client for a Tor control port.
///
/// All methods take `&self`; share the client with `Arc<TorClient>`.
pub struct TorClient {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    /// Serialises whole command exchanges (write through reply).
    cmd_lock: Mutex<()>,
    /// Read-side lock: at most one reader inside `read_reply` at a time.
    reader: Mutex<LineReader>,
    /// Raw async-reply subscribers. The vector is replaced wholesale on
    /// change and never mutated in place, so readers can traverse a snapshot
    /// without holding the lock.
    async_senders: RwLock<Arc<Vec<mpsc::Sender<Reply>>>>,
    /// Typed event subscribers, copy-on-write per event code.
    event_senders: RwLock<HashMap<EventType, Arc<Vec<mpsc::Sender<Event>>>>>,
    protocol_info: std::sync::Mutex<Option<ProtocolInfo>>,
    authenticated: AtomicBool,
}

impl TorClient {
    /// Connect to a Tor control port.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TorControlError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        Ok(Self::from_stream(stream))
    }

    /// Connect to the default Tor control port (127.0.0.1:9051).
    pub async fn connect_default() -> Result<Self> {
        Self::connect("127.0.0.1:9051").await
    }

    /// Wrap an already-connected control stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        TorClient {
            writer: Mutex::new(BufWriter::new(write_half)),
            cmd_lock: Mutex::new(()),
            reader: Mutex::new(LineReader::new(read_half)),
            async_senders: RwLock::new(Arc::new(Vec::new())),
            event_senders: RwLock::new(HashMap::new()),
            protocol_info: std::sync::Mutex::new(None),
            authenticated: AtomicBool::new(false),
        }
    }

    /// Whether an AUTHENTICATE has completed successfully.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Send a formatted command (CRLF-terminated) and return the first
    /// non-async reply.
    ///
    /// Async frames read while waiting are dispatched to event listeners and
    /// async channels before this returns. A non-ok final status surfaces as
    /// [`TorControlError::CommandRejected`].
    pub async fn send_request(&self, command: &str) -> Result<Reply> {
        let _cmd = self.cmd_lock.lock().await;
        trace!(command = %command.trim_end(), "write");
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(command.as_bytes()).await?;
            writer.flush().await?;
        }
        loop {
            let reply = {
                let mut reader = self.reader.lock().await;
                read_reply(&mut reader).await?
            };
            if reply.is_async() {
                self.on_async_reply(reply).await;
                continue;
            }
            return reply.into_result();
        }
    }

    /// Best-effort QUIT.
    pub async fn quit(&self) -> Result<()> {
        self.send_request(&format_command("QUIT", &[])).await?;
        Ok(())
    }

    /// Close the connection: drop all raw async channels (unblocking their
    /// consumers), send a best-effort QUIT, and shut the stream down.
    ///
    /// Event-listener channels are left open; their senders are simply never
    /// used again.
    pub async fn close(&self) -> Result<()> {
        {
            let mut senders = self.async_senders.write().expect("async sender lock");
            *senders = Arc::new(Vec::new());
        }
        if let Err(e) = self.quit().await {
            debug!(error = %e, "quit on close failed");
        }
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    // ==================== Raw async channels ====================

    /// Register a channel that receives every raw async reply, after typed
    /// event dispatch. Delivery blocks the reader when the channel is full.
    pub fn add_async_chan(&self, sender: mpsc::Sender<Reply>) {
        let mut senders = self.async_senders.write().expect("async sender lock");
        let mut next = Vec::with_capacity(senders.len() + 1);
        next.extend(senders.iter().cloned());
        next.push(sender);
        *senders = Arc::new(next);
    }

    /// Remove a previously-registered async channel. Returns whether it was
    /// present. The channel itself is not closed.
    pub fn remove_async_chan(&self, sender: &mpsc::Sender<Reply>) -> bool {
        let mut senders = self.async_senders.write().expect("async sender lock");
        let mut next: Vec<_> = senders.iter().cloned().collect();
        let Some(index) = next.iter().position(|s| s.same_channel(sender)) else {
            return false;
        };
        next.remove(index);
        *senders = Arc::new(next);
        true
    }

    async fn on_async_reply(&self, reply: Reply) {
        self.relay_async_events(&reply).await;
        let senders = self.async_senders.read().expect("async sender lock").clone();
        for sender in senders.iter() {
            // Blocking delivery; a slow consumer stalls the reader.
            let _ = sender.send(reply.clone()).await;
        }
    }

    async fn relay_async_events(&self, reply: &Reply) {
        let code;
        let mut data = String::new();
        let mut data_array: &[String] = &[];
        if reply.data.len() == 1 {
            // A single data chunk: the code is the first token of the first
            // line; the rest of the chunk (line remainder plus any block
            // body) is the payload.
            let chunk = &reply.data[0];
            let (first_line, body, has_body) = match chunk.find("\r\n") {
                Some(i) => (&chunk[..i], &chunk[i + 2..], true),
                None => (chunk.as_str(), "", false),
            };
            let (c, first_rest, _) = partition(first_line, ' ');
            code = c.to_string();
            data = if !has_body {
                first_rest.to_string()
            } else if first_rest.is_empty() {
                body.to_string()
            } else {
                format!("{}\r\n{}", first_rest, body)
            };
        } else if !reply.data.is_empty() {
            // Multiple chunks: the whole first chunk is the code.
            code = reply.data[0].clone();
            data_array = &reply.data[1..];
        } else {
            // No chunks: the reply line carries the payload.
            let (c, d, _) = partition(&reply.reply, ' ');
            code = c.to_string();
            data = d.to_string();
        }
        let Ok(event_type) = EventType::from_str(&code) else {
            return;
        };
        let senders = {
            let listeners = self.event_senders.read().expect("event sender lock");
            match listeners.get(&event_type) {
                Some(senders) => senders.clone(),
                None => return,
            }
        };
        if senders.is_empty() {
            return;
        }
        let event = parse_event(event_type, &data, data_array);
        for sender in senders.iter() {
            // Blocking delivery, in Tor's emission order per subscriber.
            let _ = sender.send(event.clone()).await;
        }
    }

    // ==================== Event subscription ====================

    /// Subscribe `sender` to the given event codes, then reconcile the
    /// server-side event set with SETEVENTS.
    pub async fn add_event_listener(
        &self,
        sender: mpsc::Sender<Event>,
        events: &[EventType],
    ) -> Result<()> {
        {
            let mut listeners = self.event_senders.write().expect("event sender lock");
            for event in events {
                let prev = listeners.get(event);
                let mut next = Vec::with_capacity(prev.map_or(0, |p| p.len()) + 1);
                if let Some(prev) = prev {
                    next.extend(prev.iter().cloned());
                }
                next.push(sender.clone());
                listeners.insert(*event, Arc::new(next));
            }
        }
        self.send_set_events().await
    }

    /// Unsubscribe `sender` from the given event codes (first matching entry
    /// per code), then reconcile with SETEVENTS.
    pub async fn remove_event_listener(
        &self,
        sender: &mpsc::Sender<Event>,
        events: &[EventType],
    ) -> Result<()> {
        {
            let mut listeners = self.event_senders.write().expect("event sender lock");
            for event in events {
                let Some(prev) = listeners.get(event) else {
                    continue;
                };
                let Some(index) = prev.iter().position(|s| s.same_channel(sender)) else {
                    continue;
                };
                if prev.len() == 1 {
                    listeners.remove(event);
                } else {
                    let mut next: Vec<_> = prev.iter().cloned().collect();
                    next.remove(index);
                    listeners.insert(*event, Arc::new(next));
                }
            }
        }
        self.send_set_events().await
    }

    /// Send SETEVENTS listing every code that currently has a subscriber.
    async fn send_set_events(&self) -> Result<()> {
        let mut codes: Vec<&'static str> = {
            let listeners = self.event_senders.read().expect("event sender lock");
            listeners.keys().map(|e| e.as_str()).collect()
        };
        codes.sort_unstable();
        self.send_request(&format_command("SETEVENTS", &codes))
            .await?;
        Ok(())
    }

    /// Pump async events until cancellation or a read failure.
    ///
    /// Events are dispatched even while synchronous requests are in flight;
    /// frames that are not events are left for the command reader. Returns
    /// `Ok(())` on cancellation, otherwise the read error that stopped the
    /// pump.
    pub async fn handle_events(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            let mut reader = self.reader.lock().await;
            let status = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                status = reader.peek_status() => status?,
            };
            if !is_async_status(status) {
                // A command reader is owed this frame.
                drop(reader);
                tokio::task::yield_now().await;
                continue;
            }
            let reply = read_reply(&mut reader).await?;
            drop(reader);
            self.on_async_reply(reply).await;
        }
    }

    /// Subscribe to `events`, pump until `predicate` accepts one, and return
    /// that event.
    ///
    /// The predicate is called for each delivered event; `Ok(true)` accepts,
    /// `Ok(false)` keeps waiting, and an error aborts the wait. The listener
    /// is removed on every exit path.
    pub async fn event_wait<F>(
        self: &Arc<Self>,
        events: &[EventType],
        cancel: &CancellationToken,
        mut predicate: F,
    ) -> Result<Event>
    where
        F: FnMut(&Event) -> Result<bool>,
    {
        let (tx, mut rx) = mpsc::channel(EVENT_WAIT_BUFFER);
        self.add_event_listener(tx.clone(), events).await?;
        let pump_cancel = cancel.child_token();
        let _pump_guard = pump_cancel.clone().drop_guard();
        let mut pump = tokio::spawn({
            let client = Arc::clone(self);
            let cancel = pump_cancel.clone();
            async move { client.handle_events(cancel).await }
        });
        let result = loop {
            tokio::select! {
                pumped = &mut pump => {
                    break match pumped {
                        Ok(Ok(())) => Err(TorControlError::Cancelled),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(TorControlError::ConnectionFailed(format!(
                            "event pump failed: {}",
                            e
                        ))),
                    };
                }
                event = rx.recv() => match event {
                    None => break Err(TorControlError::ConnectionClosed),
                    Some(event) => match predicate(&event) {
                        Ok(true) => break Ok(event),
                        Ok(false) => {}
                        Err(e) => break Err(e),
                    },
                },
            }
        };
        pump_cancel.cancel();
        if let Err(e) = self.remove_event_listener(&tx, events).await {
            debug!(error = %e, "failed to remove event-wait listener");
        }
        result
    }

    // ==================== Authentication ====================

    /// Fetch (and cache) PROTOCOLINFO.
    pub async fn protocol_info(&self) -> Result<ProtocolInfo> {
        if let Some(info) = self.protocol_info.lock().expect("protocol info lock").clone() {
            return Ok(info);
        }
        let reply = self
            .send_request(&format_command("PROTOCOLINFO", &["1"]))
            .await?;
        let info = ProtocolInfo::parse(reply)?;
        *self.protocol_info.lock().expect("protocol info lock") = Some(info.clone());
        Ok(info)
    }

    /// Authenticate with Tor, picking the method from PROTOCOLINFO.
    ///
    /// A non-empty password selects HASHEDPASSWORD; otherwise SAFECOOKIE is
    /// preferred, then legacy COOKIE, then NULL.
    pub async fn authenticate(&self, password: &str) -> Result<()> {
        let info = self.protocol_info().await?;
        if !password.is_empty() {
            debug!("authenticating with password");
            self.send_request(&format_command(
                "AUTHENTICATE",
                &[&escape_quoted(password)],
            ))
            .await?;
        } else if info.has_auth_method(AuthMethod::SafeCookie) {
            debug!("authenticating with SAFECOOKIE");
            self.authenticate_safe_cookie(&info).await?;
        } else if info.has_auth_method(AuthMethod::Cookie) {
            debug!("authenticating with legacy cookie");
            let cookie = read_cookie_file(Path::new(self.cookie_path(&info)?))?;
            self.send_request(&format_command("AUTHENTICATE", &[&hex::encode(cookie)]))
                .await?;
        } else {
            debug!("authenticating with NULL method");
            self.send_request(&format_command("AUTHENTICATE", &[]))
                .await?;
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cookie_path<'a>(&self, info: &'a ProtocolInfo) -> Result<&'a str> {
        info.cookie_file.as_deref().ok_or_else(|| {
            TorControlError::AuthenticationFailed(
                "Cookie auth advertised but no cookie file given".to_string(),
            )
        })
    }

    async fn authenticate_safe_cookie(&self, info: &ProtocolInfo) -> Result<()> {
        let cookie = read_cookie_file(Path::new(self.cookie_path(info)?))?;
        let client_nonce = generate_client_nonce();
        let reply = self
            .send_request(&format_command(
                "AUTHCHALLENGE",
                &["SAFECOOKIE", &hex::encode(client_nonce)],
            ))
            .await?;
        let (server_hash, server_nonce) = parse_authchallenge_reply(&reply.reply)?;
        if !verify_server_hash(&cookie, &client_nonce, &server_nonce, &server_hash) {
            return Err(TorControlError::AuthServerHashMismatch);
        }
        let client_hash = compute_client_hash(&cookie, &client_nonce, &server_nonce);
        self.send_request(&format_command("AUTHENTICATE", &[&hex::encode(client_hash)]))
            .await?;
        Ok(())
    }

    /// Snapshot of the currently-subscribed event codes, for tests and
    /// diagnostics.
    pub fn subscribed_events(&self) -> Vec<EventType> {
        let listeners = self.event_senders.read().expect("event sender lock");
        let mut codes: Vec<EventType> = listeners.keys().copied().collect();
        codes.sort_unstable_by_key(|c| c.as_str());
        codes
    }
}
