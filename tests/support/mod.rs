//! An in-process mock Tor control server for integration tests.
//!
//! Speaks just enough of the control protocol to exercise the client end to
//! end: PROTOCOLINFO, all four authentication methods (including the
//! SAFECOOKIE challenge), a small configuration store with defaults,
//! SETEVENTS-triggered event emission, and onion-service commands.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tor_conductor::auth::{compute_client_hash, compute_server_hash};

/// The service id the mock hands out for ADDONION.
pub const MOCK_SERVICE_ID: &str = "exampleoniont2pqglbny66wpovyvao3ylc23eileodtevc4b75ikpad";

/// Tunable mock behavior, fixed at server start.
#[derive(Clone)]
pub struct MockTorOptions {
    /// METHODS= value advertised in PROTOCOLINFO.
    pub auth_methods: String,
    /// Tor version advertised in PROTOCOLINFO.
    pub version: String,
    /// Cookie file advertised in PROTOCOLINFO; the file is expected to hold
    /// `cookie`.
    pub cookie_file: Option<PathBuf>,
    /// The cookie value used to verify SAFECOOKIE and COOKIE authentication.
    pub cookie: Vec<u8>,
    /// Required password for HASHEDPASSWORD authentication; `None` accepts
    /// any AUTHENTICATE.
    pub password: Option<String>,
    /// Send a garbage SERVERHASH in the AUTHCHALLENGE reply.
    pub corrupt_server_hash: bool,
    /// Emit FAILED instead of UPLOADED for hidden-service descriptor
    /// uploads.
    pub fail_hs_uploads: bool,
}

impl Default for MockTorOptions {
    fn default() -> Self {
        MockTorOptions {
            auth_methods: "NULL".to_string(),
            version: "0.4.7.10".to_string(),
            cookie_file: None,
            cookie: Vec::new(),
            password: None,
            corrupt_server_hash: false,
            fail_hs_uploads: false,
        }
    }
}

/// The running mock server.
pub struct MockTorServer {
    /// Address to connect the client to.
    pub addr: SocketAddr,
    /// Every command line received, in order.
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl MockTorServer {
    /// Start a mock server with default options.
    pub async fn start() -> Self {
        Self::start_with(MockTorOptions::default()).await
    }

    /// Start a mock server.
    pub async fn start_with(options: MockTorOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands: Arc<Mutex<Vec<String>>> = Arc::default();
        let log = commands.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let mut conn = Connection::new(socket, options.clone(), log.clone());
                conn.run().await;
            }
        });
        MockTorServer { addr, commands }
    }

    /// The last SETEVENTS line received, if any.
    pub fn last_set_events(&self) -> Option<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.starts_with("SETEVENTS"))
            .cloned()
    }

    /// Whether a command starting with `prefix` was received.
    pub fn saw_command(&self, prefix: &str) -> bool {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.starts_with(prefix))
    }
}

struct Connection {
    socket: TcpStream,
    options: MockTorOptions,
    log: Arc<Mutex<Vec<String>>>,
    buf: Vec<u8>,
    defaults: HashMap<&'static str, &'static str>,
    overrides: HashMap<String, String>,
    expected_auth: Option<String>,
    last_onion_id: Option<String>,
    events_on: Vec<String>,
}

impl Connection {
    fn new(socket: TcpStream, options: MockTorOptions, log: Arc<Mutex<Vec<String>>>) -> Self {
        let mut defaults = HashMap::new();
        defaults.insert("LogMessageDomains", "0");
        defaults.insert("ProtocolWarnings", "0");
        defaults.insert("DisableNetwork", "1");
        defaults.insert("MaxCircuitDirtiness", "600");
        defaults.insert("ContactInfo", "");
        defaults.insert("SocksPort", "9050");
        Connection {
            socket,
            options,
            log,
            buf: Vec::new(),
            defaults,
            overrides: HashMap::new(),
            expected_auth: None,
            last_onion_id: None,
            events_on: Vec::new(),
        }
    }

    async fn run(&mut self) {
        loop {
            let Some(line) = self.read_line().await else {
                return;
            };
            self.log.lock().unwrap().push(line.clone());
            if self.handle(&line).await.is_err() {
                return;
            }
        }
    }

    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8(line).ok()?);
            }
            let mut chunk = [0u8; 1024];
            match self.socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    async fn write(&mut self, text: &str) -> std::io::Result<()> {
        self.socket.write_all(text.as_bytes()).await
    }

    async fn handle(&mut self, line: &str) -> std::io::Result<()> {
        let (keyword, rest) = match line.split_once(' ') {
            Some((k, r)) => (k, r),
            None => (line, ""),
        };
        match keyword {
            "PROTOCOLINFO" => self.protocolinfo().await,
            "AUTHCHALLENGE" => self.authchallenge(rest).await,
            "AUTHENTICATE" => self.authenticate(rest).await,
            "GETCONF" => self.getconf(rest).await,
            "SETCONF" => self.setconf(rest).await,
            "RESETCONF" => self.resetconf(rest).await,
            "SETEVENTS" => self.setevents(rest).await,
            "GETINFO" => self.getinfo(rest).await,
            "ADDONION" => self.add_onion(rest).await,
            "DELONION" => {
                self.last_onion_id = None;
                self.write("250 OK\r\n").await
            }
            "MAPADDRESS" => self.mapaddress(rest).await,
            "QUIT" => self.write("250 closing connection\r\n").await,
            "+LOADCONF" | "+POSTDESCRIPTOR" => {
                // Swallow the data block.
                loop {
                    match self.read_line().await {
                        Some(body_line) if body_line == "." => break,
                        Some(_) => {}
                        None => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                    }
                }
                self.write("250 OK\r\n").await
            }
            // SIGNAL, HSFETCH, TAKEOWNERSHIP, and friends just succeed.
            _ => self.write("250 OK\r\n").await,
        }
    }

    async fn protocolinfo(&mut self) -> std::io::Result<()> {
        let mut auth = format!("AUTH METHODS={}", self.options.auth_methods);
        if let Some(cookie_file) = &self.options.cookie_file {
            auth.push_str(&format!(" COOKIEFILE=\"{}\"", cookie_file.display()));
        }
        let response = format!(
            "250-PROTOCOLINFO 1\r\n250-{}\r\n250-VERSION Tor=\"{}\"\r\n250 OK\r\n",
            auth, self.options.version
        );
        self.write(&response).await
    }

    async fn authchallenge(&mut self, rest: &str) -> std::io::Result<()> {
        let client_nonce_hex = rest.split_whitespace().nth(1).unwrap_or("");
        let Ok(client_nonce) = hex::decode(client_nonce_hex) else {
            return self.write("512 Invalid nonce\r\n").await;
        };
        let server_nonce = [0x42u8; 32];
        let mut server_hash =
            compute_server_hash(&self.options.cookie, &client_nonce, &server_nonce);
        if self.options.corrupt_server_hash {
            server_hash[0] ^= 0xff;
        }
        let client_hash = compute_client_hash(&self.options.cookie, &client_nonce, &server_nonce);
        self.expected_auth = Some(hex::encode_upper(client_hash));
        let response = format!(
            "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
            hex::encode_upper(server_hash),
            hex::encode_upper(server_nonce)
        );
        self.write(&response).await
    }

    async fn authenticate(&mut self, rest: &str) -> std::io::Result<()> {
        if let Some(expected) = self.expected_auth.take() {
            if rest.eq_ignore_ascii_case(&expected) {
                return self.write("250 OK\r\n").await;
            }
            return self.write("515 Bad authentication\r\n").await;
        }
        if let Some(password) = &self.options.password {
            if rest == format!("\"{}\"", password) {
                return self.write("250 OK\r\n").await;
            }
            return self.write("515 Bad authentication\r\n").await;
        }
        self.write("250 OK\r\n").await
    }

    fn conf_value(&self, key: &str) -> Option<String> {
        if let Some(val) = self.overrides.get(key) {
            return Some(val.clone());
        }
        self.defaults.get(key).map(|v| v.to_string())
    }

    async fn getconf(&mut self, rest: &str) -> std::io::Result<()> {
        let mut entries = Vec::new();
        for key in rest.split_whitespace() {
            match self.conf_value(key) {
                Some(val) => entries.push(format!("{}={}", key, val)),
                None => {
                    let response =
                        format!("552 Unrecognized configuration key \"{}\"\r\n", key);
                    return self.write(&response).await;
                }
            }
        }
        let mut response = String::new();
        for (i, entry) in entries.iter().enumerate() {
            if i + 1 == entries.len() {
                response.push_str(&format!("250 {}\r\n", entry));
            } else {
                response.push_str(&format!("250-{}\r\n", entry));
            }
        }
        if entries.is_empty() {
            response.push_str("250 OK\r\n");
        }
        self.write(&response).await
    }

    async fn setconf(&mut self, rest: &str) -> std::io::Result<()> {
        for token in rest.split_whitespace() {
            match token.split_once('=') {
                Some((key, val)) => {
                    self.overrides
                        .insert(key.to_string(), val.trim_matches('"').to_string());
                }
                None => {
                    self.overrides.remove(token);
                }
            }
        }
        self.write("250 OK\r\n").await
    }

    async fn resetconf(&mut self, rest: &str) -> std::io::Result<()> {
        for token in rest.split_whitespace() {
            let key = token.split_once('=').map_or(token, |(k, _)| k);
            self.overrides.remove(key);
        }
        self.write("250 OK\r\n").await
    }

    async fn setevents(&mut self, rest: &str) -> std::io::Result<()> {
        let previous = std::mem::take(&mut self.events_on);
        self.events_on = rest.split_whitespace().map(String::from).collect();
        // Newly-enabled codes fire their canned events right away.
        let newly = |code: &str| {
            self.events_on.iter().any(|c| c == code) && !previous.iter().any(|c| c == code)
        };
        let (new_bw, new_status, new_hs) = (newly("BW"), newly("STATUS_CLIENT"), newly("HS_DESC"));
        self.write("250 OK\r\n").await?;
        if new_bw {
            self.write("650 BW 1024 2048\r\n").await?;
        }
        if new_status {
            self.write(
                "650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY=\"Done\"\r\n",
            )
            .await?;
        }
        if new_hs {
            if let Some(id) = self.last_onion_id.clone() {
                self.write(&format!(
                    "650 HS_DESC UPLOAD {} UNKNOWN $dir1~one descid1\r\n",
                    id
                ))
                .await?;
                self.write(&format!(
                    "650 HS_DESC UPLOAD {} UNKNOWN $dir2~two descid2\r\n",
                    id
                ))
                .await?;
                if self.options.fail_hs_uploads {
                    self.write(&format!(
                        "650 HS_DESC FAILED {} UNKNOWN $dir1~one REASON=UPLOAD_REJECTED\r\n",
                        id
                    ))
                    .await?;
                    self.write(&format!(
                        "650 HS_DESC FAILED {} UNKNOWN $dir2~two REASON=UPLOAD_REJECTED\r\n",
                        id
                    ))
                    .await?;
                } else {
                    self.write(&format!("650 HS_DESC UPLOADED {} UNKNOWN $dir1~one\r\n", id))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn getinfo(&mut self, rest: &str) -> std::io::Result<()> {
        let mut response = String::new();
        for key in rest.split_whitespace() {
            let val = match key {
                "version" => self.options.version.clone(),
                "net/listeners/socks" => "\"127.0.0.1:9050\"".to_string(),
                _ => {
                    let response = format!("552 Unrecognized key \"{}\"\r\n", key);
                    return self.write(&response).await;
                }
            };
            response.push_str(&format!("250-{}={}\r\n", key, val));
        }
        response.push_str("250 OK\r\n");
        self.write(&response).await
    }

    async fn add_onion(&mut self, rest: &str) -> std::io::Result<()> {
        let discard_key = rest
            .split_whitespace()
            .any(|t| t.starts_with("Flags=") && t.contains("DiscardPK"));
        let generated = rest.starts_with("NEW:");
        self.last_onion_id = Some(MOCK_SERVICE_ID.to_string());
        let mut response = format!("250-ServiceID={}\r\n", MOCK_SERVICE_ID);
        if generated && !discard_key {
            response.push_str(&format!(
                "250-PrivateKey=ED25519-V3:{}==\r\n",
                "A".repeat(86)
            ));
        }
        response.push_str("250 OK\r\n");
        self.write(&response).await
    }

    async fn mapaddress(&mut self, rest: &str) -> std::io::Result<()> {
        let entries: Vec<&str> = rest.split_whitespace().collect();
        let mut response = String::new();
        for (i, entry) in entries.iter().enumerate() {
            if i + 1 == entries.len() {
                response.push_str(&format!("250 {}\r\n", entry));
            } else {
                response.push_str(&format!("250-{}\r\n", entry));
            }
        }
        if entries.is_empty() {
            response.push_str("250 OK\r\n");
        }
        self.write(&response).await
    }
}
