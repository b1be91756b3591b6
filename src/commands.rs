//! Typed command wrappers.
//!
//! Thin encoders over [`TorClient::send_request`] returning domain values:
//! configuration, information queries, signals, address mappings, onion
//! services, circuits, streams, and descriptor operations.

use crate::connection::TorClient;
use crate::error::{Result, TorControlError};
use crate::keys::OnionKey;
use crate::protocol::{
    escape_quoted_if_needed, format_command, format_command_with_data, partition,
    partition_from_end, unescape_quoted_if_needed,
};
use crate::types::{CircuitId, KeyVal, Signal, StreamId, TorVersion};
use std::collections::HashMap;
use std::str::FromStr;

/// A virtual-port to local-target mapping for ADDONION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionPort {
    /// The port exposed on the onion service.
    pub virt_port: u16,
    /// The local target (`addr:port` or `unix:<path>`); when absent, Tor
    /// targets the same port on localhost.
    pub target: Option<String>,
}

impl OnionPort {
    /// Create a port mapping.
    pub fn new(virt_port: u16, target: Option<impl Into<String>>) -> Self {
        OnionPort {
            virt_port,
            target: target.map(Into::into),
        }
    }
}

/// Request payload for ADDONION.
#[derive(Debug, Clone)]
pub struct AddOnionRequest {
    /// The onion key, or a request to generate one.
    pub key: OnionKey,
    /// ADDONION flags (DiscardPK, Detach, V3Auth, NonAnonymous,
    /// MaxStreamsCloseCircuit).
    pub flags: Vec<String>,
    /// Maximum stream count; 0 means unlimited.
    pub max_streams: u32,
    /// Virtual-port mappings; at least one is required by Tor.
    pub ports: Vec<OnionPort>,
    /// Client authorization credentials, name to blob (blob may be empty to
    /// let Tor generate one).
    pub client_auths: HashMap<String, String>,
}

impl AddOnionRequest {
    /// A request with the given key and ports and nothing else set.
    pub fn new(key: OnionKey, ports: Vec<OnionPort>) -> Self {
        AddOnionRequest {
            key,
            flags: Vec::new(),
            max_streams: 0,
            ports,
            client_auths: HashMap::new(),
        }
    }
}

/// Parsed ADDONION response.
#[derive(Debug, Clone)]
pub struct AddOnionResponse {
    /// The service id (the `.onion` address without its suffix).
    pub service_id: String,
    /// The private key, unless discarded or caller-provided.
    pub key: Option<OnionKey>,
    /// Client authorization credentials generated or echoed by Tor.
    pub client_auths: HashMap<String, String>,
    /// The raw reply.
    pub raw: crate::protocol::Reply,
}

fn set_conf_command(keyword: &str, entries: &[KeyVal]) -> String {
    let mut cmd = keyword.to_string();
    for entry in entries {
        cmd.push(' ');
        cmd.push_str(&entry.key);
        if entry.val_set() {
            cmd.push('=');
            cmd.push_str(&escape_quoted_if_needed(&entry.val));
        }
    }
    cmd.push_str("\r\n");
    cmd
}

fn parse_conf_entries(entries: &[String]) -> Result<Vec<KeyVal>> {
    let mut ret = Vec::with_capacity(entries.len());
    for entry in entries {
        let (key, val, has_val) = partition(entry, '=');
        let mut kv = KeyVal::new(key, "");
        if has_val {
            kv.val = unescape_quoted_if_needed(val)?;
            if kv.val.is_empty() {
                kv.val_set_and_empty = true;
            }
        }
        ret.push(kv);
    }
    Ok(ret)
}

fn add_onion_command(req: &AddOnionRequest) -> String {
    let mut cmd = format!("ADDONION {}:{}", req.key.key_type().as_str(), req.key.blob());
    if !req.flags.is_empty() {
        cmd.push_str(" Flags=");
        cmd.push_str(&req.flags.join(","));
    }
    if req.max_streams > 0 {
        cmd.push_str(&format!(" MaxStreams={}", req.max_streams));
    }
    for port in &req.ports {
        cmd.push_str(&format!(" Port={}", port.virt_port));
        if let Some(target) = &port.target {
            cmd.push(',');
            cmd.push_str(target);
        }
    }
    let mut names: Vec<&String> = req.client_auths.keys().collect();
    names.sort_unstable();
    for name in names {
        cmd.push_str(&format!(" ClientAuth={}", name));
        let blob = &req.client_auths[name];
        if !blob.is_empty() {
            cmd.push(':');
            cmd.push_str(blob);
        }
    }
    cmd.push_str("\r\n");
    cmd
}

impl TorClient {
    // ==================== Configuration ====================

    /// SETCONF: set configuration values. Entries without a set value reset
    /// the key to its default.
    pub async fn set_conf(&self, entries: &[KeyVal]) -> Result<()> {
        self.send_request(&set_conf_command("SETCONF", entries))
            .await?;
        Ok(())
    }

    /// RESETCONF: reset configuration values to their defaults (or set them,
    /// when a value is present).
    pub async fn reset_conf(&self, entries: &[KeyVal]) -> Result<()> {
        self.send_request(&set_conf_command("RESETCONF", entries))
            .await?;
        Ok(())
    }

    /// GETCONF: fetch configuration values. One entry per returned line; an
    /// explicit `key=` with nothing after it yields an entry with
    /// `val_set_and_empty`.
    pub async fn get_conf(&self, keys: &[&str]) -> Result<Vec<KeyVal>> {
        let reply = self.send_request(&format_command("GETCONF", keys)).await?;
        parse_conf_entries(&reply.data_with_reply())
    }

    /// SAVECONF: persist the current configuration to the torrc.
    pub async fn save_conf(&self, force: bool) -> Result<()> {
        let args: &[&str] = if force { &["FORCE"] } else { &[] };
        self.send_request(&format_command("SAVECONF", args)).await?;
        Ok(())
    }

    /// LOADCONF: replace the configuration from the given torrc text.
    pub async fn load_conf(&self, conf: &str) -> Result<()> {
        self.send_request(&format_command_with_data("LOADCONF", &[], conf))
            .await?;
        Ok(())
    }

    // ==================== Information ====================

    /// GETINFO: fetch informational values as key/value entries.
    pub async fn get_info(&self, keys: &[&str]) -> Result<Vec<KeyVal>> {
        let reply = self.send_request(&format_command("GETINFO", keys)).await?;
        let mut ret = Vec::with_capacity(reply.data.len());
        for entry in &reply.data {
            let (key, val, _) = partition(entry, '=');
            ret.push(KeyVal::new(key, unescape_quoted_if_needed(val)?));
        }
        Ok(ret)
    }

    /// The running Tor's version, via `GETINFO version`.
    pub async fn get_version(&self) -> Result<TorVersion> {
        let info = self.get_info(&["version"]).await?;
        let entry = info
            .iter()
            .find(|kv| kv.key_matches("version"))
            .ok_or_else(|| {
                TorControlError::ParseError("Version not found in response".to_string())
            })?;
        TorVersion::from_str(&entry.val)
    }

    // ==================== Signals ====================

    /// SIGNAL: deliver a signal to Tor.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.send_request(&format_command("SIGNAL", &[signal.as_str()]))
            .await?;
        Ok(())
    }

    /// Request a new identity (clean circuits).
    pub async fn new_identity(&self) -> Result<()> {
        self.signal(Signal::NewNym).await
    }

    // ==================== Address mappings ====================

    /// MAPADDRESS: request address mappings; returns the mappings Tor chose
    /// (which may include generated addresses for `.` wildcards).
    pub async fn map_addresses(&self, addresses: &[KeyVal]) -> Result<Vec<KeyVal>> {
        let args: Vec<String> = addresses
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.val))
            .collect();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let reply = self
            .send_request(&format_command("MAPADDRESS", &arg_refs))
            .await?;
        Ok(reply
            .data_with_reply()
            .iter()
            .map(|entry| {
                let (old, new, _) = partition(entry, '=');
                KeyVal::new(old, new)
            })
            .collect())
    }

    /// RESOLVE: launch a background hostname resolution; the answer arrives
    /// as an ADDRMAP event.
    pub async fn resolve(&self, address: &str, reverse: bool) -> Result<()> {
        let args: &[&str] = if reverse {
            &["mode=reverse", address]
        } else {
            &[address]
        };
        self.send_request(&format_command("RESOLVE", args)).await?;
        Ok(())
    }

    // ==================== Onion services ====================

    /// ADDONION: create an ephemeral onion service bound to this control
    /// connection (unless detached).
    pub async fn add_onion(&self, req: &AddOnionRequest) -> Result<AddOnionResponse> {
        let reply = self.send_request(&add_onion_command(req)).await?;
        let mut ret = AddOnionResponse {
            service_id: String::new(),
            key: None,
            client_auths: HashMap::new(),
            raw: reply,
        };
        for entry in &ret.raw.data {
            let (key, val, _) = partition(entry, '=');
            match key {
                "ServiceID" => ret.service_id = val.to_string(),
                "PrivateKey" => ret.key = Some(OnionKey::from_spec_string(val)?),
                "ClientAuth" => {
                    let (name, pass, _) = partition(val, ':');
                    ret.client_auths.insert(name.to_string(), pass.to_string());
                }
                _ => {}
            }
        }
        Ok(ret)
    }

    /// DELONION: delete an onion service created on this connection (or any,
    /// for detached services).
    pub async fn del_onion(&self, service_id: &str) -> Result<()> {
        self.send_request(&format_command("DELONION", &[service_id]))
            .await?;
        Ok(())
    }

    /// HSFETCH: ask Tor to fetch a hidden-service descriptor; results arrive
    /// as HS_DESC / HS_DESC_CONTENT events.
    pub async fn hs_fetch(&self, address: &str, servers: &[&str]) -> Result<()> {
        let mut args = vec![address.to_string()];
        args.extend(servers.iter().map(|s| format!("SERVER={}", s)));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.send_request(&format_command("HSFETCH", &arg_refs))
            .await?;
        Ok(())
    }

    /// POSTDESCRIPTOR: upload a router descriptor.
    pub async fn post_descriptor(&self, descriptor: &str, purpose: Option<&str>) -> Result<()> {
        let purpose_arg = purpose.map(|p| format!("purpose={}", p));
        let args: Vec<&str> = purpose_arg.as_deref().into_iter().collect();
        self.send_request(&format_command_with_data("POSTDESCRIPTOR", &args, descriptor))
            .await?;
        Ok(())
    }

    // ==================== Circuits ====================

    /// EXTENDCIRCUIT: extend or create a circuit; `None` asks Tor to select
    /// a new circuit. Returns the circuit id from the reply.
    pub async fn extend_circuit(
        &self,
        circuit_id: Option<&CircuitId>,
        path: &[&str],
        purpose: &str,
    ) -> Result<CircuitId> {
        let mut cmd = format!(
            "EXTENDCIRCUIT {}",
            circuit_id.map_or("0", |c| c.as_str())
        );
        if !path.is_empty() {
            cmd.push(' ');
            cmd.push_str(&path.join(","));
        }
        if !purpose.is_empty() {
            cmd.push_str(&format!(" purpose={}", purpose));
        }
        cmd.push_str("\r\n");
        let reply = self.send_request(&cmd).await?;
        let (_, id, found) = partition_from_end(&reply.reply, ' ');
        Ok(CircuitId::new(if found { id } else { &reply.reply }))
    }

    /// SETCIRCUITPURPOSE: change a circuit's purpose.
    pub async fn set_circuit_purpose(&self, circuit_id: &CircuitId, purpose: &str) -> Result<()> {
        let arg = format!("purpose={}", purpose);
        self.send_request(&format_command(
            "SETCIRCUITPURPOSE",
            &[circuit_id.as_str(), &arg],
        ))
        .await?;
        Ok(())
    }

    /// CLOSECIRCUIT: close a circuit, with optional flags such as IfUnused.
    pub async fn close_circuit(&self, circuit_id: &CircuitId, flags: &[&str]) -> Result<()> {
        let mut args = vec![circuit_id.as_str()];
        args.extend_from_slice(flags);
        self.send_request(&format_command("CLOSECIRCUIT", &args))
            .await?;
        Ok(())
    }

    // ==================== Streams ====================

    /// ATTACHSTREAM: attach a stream to a circuit (`None` lets Tor pick),
    /// optionally at a given hop.
    pub async fn attach_stream(
        &self,
        stream_id: &StreamId,
        circuit_id: Option<&CircuitId>,
        hop: Option<u32>,
    ) -> Result<()> {
        let mut cmd = format!(
            "ATTACHSTREAM {} {}",
            stream_id,
            circuit_id.map_or("0", |c| c.as_str())
        );
        if let Some(hop) = hop {
            cmd.push_str(&format!(" HOP={}", hop));
        }
        cmd.push_str("\r\n");
        self.send_request(&cmd).await?;
        Ok(())
    }

    /// REDIRECTSTREAM: change the destination of an unattached stream.
    pub async fn redirect_stream(
        &self,
        stream_id: &StreamId,
        address: &str,
        port: Option<u16>,
    ) -> Result<()> {
        let mut cmd = format!("REDIRECTSTREAM {} {}", stream_id, address);
        if let Some(port) = port {
            cmd.push_str(&format!(" {}", port));
        }
        cmd.push_str("\r\n");
        self.send_request(&cmd).await?;
        Ok(())
    }

    /// CLOSESTREAM: close a stream with the given RELAY_END reason.
    pub async fn close_stream(&self, stream_id: &StreamId, reason: &str) -> Result<()> {
        self.send_request(&format_command("CLOSESTREAM", &[stream_id.as_str(), reason]))
            .await?;
        Ok(())
    }

    // ==================== Ownership and misc ====================

    /// TAKEOWNERSHIP: make Tor exit when this control connection closes.
    pub async fn take_ownership(&self) -> Result<()> {
        self.send_request(&format_command("TAKEOWNERSHIP", &[]))
            .await?;
        Ok(())
    }

    /// DROPOWNERSHIP: undo TAKEOWNERSHIP.
    pub async fn drop_ownership(&self) -> Result<()> {
        self.send_request(&format_command("DROPOWNERSHIP", &[]))
            .await?;
        Ok(())
    }

    /// DROPGUARDS: forget all entry guards.
    pub async fn drop_guards(&self) -> Result<()> {
        self.send_request(&format_command("DROPGUARDS", &[])).await?;
        Ok(())
    }

    /// USEFEATURE: enable protocol features by name.
    pub async fn use_feature(&self, features: &[&str]) -> Result<()> {
        self.send_request(&format_command("USEFEATURE", features))
            .await?;
        Ok(())
    }
}
