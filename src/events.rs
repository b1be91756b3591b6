//! Asynchronous events from Tor.
//!
//! This module defines the event codes usable with SETEVENTS, the typed
//! event payloads, and the parsers that turn raw 650 payloads into them.
//! Every payload keeps the raw text it was parsed from; unknown attributes
//! are only observable there. Parsers never fail: malformed fields fall back
//! to empty/zero values so a new Tor release cannot break event delivery.

use crate::protocol::{partition, partition_from_end, unescape_quoted, unescape_quoted_if_needed};
use crate::types::{CircuitId, StreamId};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

/// Event codes that can be subscribed to with SETEVENTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// New address mapping.
    AddrMap,
    /// Bandwidth used in the last second.
    Bandwidth,
    /// Circuit build timeout recomputed.
    BuildTimeoutSet,
    /// Per-circuit cell statistics.
    CellStats,
    /// Circuit status changed.
    Circuit,
    /// Per-circuit bandwidth.
    CircuitBandwidth,
    /// Minor circuit status change.
    CircuitMinor,
    /// Clients seen (bridge only).
    ClientsSeen,
    /// Configuration changed.
    ConfChanged,
    /// Per-connection bandwidth.
    ConnBandwidth,
    /// Our descriptor changed.
    DescChanged,
    /// Guard node set changed.
    Guard,
    /// Hidden service descriptor event.
    HsDesc,
    /// Hidden service descriptor content.
    HsDescContent,
    /// Debug log message.
    LogDebug,
    /// Error log message.
    LogErr,
    /// Info log message.
    LogInfo,
    /// Notice log message.
    LogNotice,
    /// Warning log message.
    LogWarn,
    /// Network liveness changed.
    NetworkLiveness,
    /// Network status changed.
    NetworkStatus,
    /// New consensus arrived.
    NewConsensus,
    /// New descriptors available.
    NewDesc,
    /// OR connection status changed.
    OrConn,
    /// Signal received.
    Signal,
    /// Client status event.
    StatusClient,
    /// General status event.
    StatusGeneral,
    /// Server status event.
    StatusServer,
    /// Stream status changed.
    Stream,
    /// Per-stream bandwidth.
    StreamBandwidth,
    /// Token bucket empty.
    TokenBucketEmpty,
    /// Pluggable transport launched.
    TransportLaunched,
}

impl EventType {
    /// The event code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AddrMap => "ADDRMAP",
            EventType::Bandwidth => "BW",
            EventType::BuildTimeoutSet => "BUILDTIMEOUT_SET",
            EventType::CellStats => "CELL_STATS",
            EventType::Circuit => "CIRC",
            EventType::CircuitBandwidth => "CIRC_BW",
            EventType::CircuitMinor => "CIRC_MINOR",
            EventType::ClientsSeen => "CLIENTS_SEEN",
            EventType::ConfChanged => "CONF_CHANGED",
            EventType::ConnBandwidth => "CONN_BW",
            EventType::DescChanged => "DESCCHANGED",
            EventType::Guard => "GUARD",
            EventType::HsDesc => "HS_DESC",
            EventType::HsDescContent => "HS_DESC_CONTENT",
            EventType::LogDebug => "DEBUG",
            EventType::LogErr => "ERR",
            EventType::LogInfo => "INFO",
            EventType::LogNotice => "NOTICE",
            EventType::LogWarn => "WARN",
            EventType::NetworkLiveness => "NETWORK_LIVENESS",
            EventType::NetworkStatus => "NS",
            EventType::NewConsensus => "NEWCONSENSUS",
            EventType::NewDesc => "NEWDESC",
            EventType::OrConn => "ORCONN",
            EventType::Signal => "SIGNAL",
            EventType::StatusClient => "STATUS_CLIENT",
            EventType::StatusGeneral => "STATUS_GENERAL",
            EventType::StatusServer => "STATUS_SERVER",
            EventType::Stream => "STREAM",
            EventType::StreamBandwidth => "STREAM_BW",
            EventType::TokenBucketEmpty => "TB_EMPTY",
            EventType::TransportLaunched => "TRANSPORT_LAUNCHED",
        }
    }

    /// Every known event code.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::AddrMap,
            EventType::Bandwidth,
            EventType::BuildTimeoutSet,
            EventType::CellStats,
            EventType::Circuit,
            EventType::CircuitBandwidth,
            EventType::CircuitMinor,
            EventType::ClientsSeen,
            EventType::ConfChanged,
            EventType::ConnBandwidth,
            EventType::DescChanged,
            EventType::Guard,
            EventType::HsDesc,
            EventType::HsDescContent,
            EventType::LogDebug,
            EventType::LogErr,
            EventType::LogInfo,
            EventType::LogNotice,
            EventType::LogWarn,
            EventType::NetworkLiveness,
            EventType::NetworkStatus,
            EventType::NewConsensus,
            EventType::NewDesc,
            EventType::OrConn,
            EventType::Signal,
            EventType::StatusClient,
            EventType::StatusGeneral,
            EventType::StatusServer,
            EventType::Stream,
            EventType::StreamBandwidth,
            EventType::TokenBucketEmpty,
            EventType::TransportLaunched,
        ]
    }
}

impl FromStr for EventType {
    type Err = crate::error::TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::all()
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| {
                crate::error::TorControlError::ParseError(format!("Unknown event code: {}", s))
            })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const ISO_TIME: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const ISO_TIME_T: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Parse `YYYY-MM-DD HH:MM:SS`; `None` on failure.
pub(crate) fn parse_iso_time(s: &str) -> Option<PrimitiveDateTime> {
    PrimitiveDateTime::parse(s, ISO_TIME).ok()
}

/// Parse `YYYY-MM-DDTHH:MM:SS[.fractional]`; `None` on failure.
pub(crate) fn parse_iso_time_frac(s: &str) -> Option<PrimitiveDateTime> {
    let (base, frac, has_frac) = partition(s, '.');
    let dt = PrimitiveDateTime::parse(base, ISO_TIME_T).ok()?;
    if !has_frac {
        return Some(dt);
    }
    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut nanos: i64 = frac.parse().ok()?;
    for _ in frac.len()..9 {
        nanos *= 10;
    }
    Some(dt + time::Duration::nanoseconds(nanos))
}

/// Split off the next space-separated token, keeping double-quoted sections
/// (including their escapes) intact so quoted values containing spaces stay
/// whole. Returns `(token, rest, more)` like [`partition`].
fn next_token(raw: &str) -> (&str, &str, bool) {
    let mut in_quotes = false;
    let mut escaping = false;
    for (i, b) in raw.bytes().enumerate() {
        if escaping {
            escaping = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaping = true,
            b'"' => in_quotes = !in_quotes,
            b' ' if !in_quotes => return (&raw[..i], &raw[i + 1..], true),
            _ => {}
        }
    }
    (raw, "", false)
}

fn parse_u64(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}

fn parse_f32(s: &str) -> f32 {
    s.parse().unwrap_or(0.0)
}

fn parse_millis(s: &str) -> Duration {
    Duration::from_millis(parse_u64(s))
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').map(String::from).collect()
}

/// Parse `k=v,k=v` into an integer map.
fn parse_int_map(s: &str) -> HashMap<String, u64> {
    s.split(',')
        .map(|kv| {
            let (key, val, _) = partition(kv, '=');
            (key.to_string(), parse_u64(val))
        })
        .collect()
}

/// Parse `k:v,k:v` into an integer map.
fn parse_colon_int_map(s: &str) -> HashMap<String, u64> {
    s.split(',')
        .map(|kv| {
            let (key, val, _) = partition(kv, ':');
            (key.to_string(), parse_u64(val))
        })
        .collect()
}

/// A parsed asynchronous event.
#[derive(Debug, Clone)]
pub enum Event {
    /// ADDRMAP
    AddrMap(AddrMapEvent),
    /// BW
    Bandwidth(BandwidthEvent),
    /// BUILDTIMEOUT_SET
    BuildTimeoutSet(BuildTimeoutSetEvent),
    /// CELL_STATS
    CellStats(CellStatsEvent),
    /// CIRC
    Circuit(CircuitEvent),
    /// CIRC_BW
    CircuitBandwidth(CircuitBandwidthEvent),
    /// CIRC_MINOR
    CircuitMinor(CircuitMinorEvent),
    /// CLIENTS_SEEN
    ClientsSeen(ClientsSeenEvent),
    /// CONF_CHANGED
    ConfChanged(ConfChangedEvent),
    /// CONN_BW
    ConnBandwidth(ConnBandwidthEvent),
    /// DESCCHANGED
    DescChanged(DescChangedEvent),
    /// GUARD
    Guard(GuardEvent),
    /// HS_DESC
    HsDesc(HsDescEvent),
    /// HS_DESC_CONTENT
    HsDescContent(HsDescContentEvent),
    /// DEBUG/INFO/NOTICE/WARN/ERR
    Log(LogEvent),
    /// NETWORK_LIVENESS
    NetworkLiveness(NetworkLivenessEvent),
    /// NS
    NetworkStatus(NetworkStatusEvent),
    /// NEWCONSENSUS
    NewConsensus(NewConsensusEvent),
    /// NEWDESC
    NewDesc(NewDescEvent),
    /// ORCONN
    OrConn(OrConnEvent),
    /// SIGNAL
    Signal(SignalEvent),
    /// STATUS_CLIENT / STATUS_GENERAL / STATUS_SERVER
    Status(StatusEvent),
    /// STREAM
    Stream(StreamEvent),
    /// STREAM_BW
    StreamBandwidth(StreamBandwidthEvent),
    /// TB_EMPTY
    TokenBucketEmpty(TokenBucketEmptyEvent),
    /// TRANSPORT_LAUNCHED
    TransportLaunched(TransportLaunchedEvent),
}

impl Event {
    /// The event code this event was parsed from.
    pub fn code(&self) -> EventType {
        match self {
            Event::AddrMap(_) => EventType::AddrMap,
            Event::Bandwidth(_) => EventType::Bandwidth,
            Event::BuildTimeoutSet(_) => EventType::BuildTimeoutSet,
            Event::CellStats(_) => EventType::CellStats,
            Event::Circuit(_) => EventType::Circuit,
            Event::CircuitBandwidth(_) => EventType::CircuitBandwidth,
            Event::CircuitMinor(_) => EventType::CircuitMinor,
            Event::ClientsSeen(_) => EventType::ClientsSeen,
            Event::ConfChanged(_) => EventType::ConfChanged,
            Event::ConnBandwidth(_) => EventType::ConnBandwidth,
            Event::DescChanged(_) => EventType::DescChanged,
            Event::Guard(_) => EventType::Guard,
            Event::HsDesc(_) => EventType::HsDesc,
            Event::HsDescContent(_) => EventType::HsDescContent,
            Event::Log(e) => e.severity,
            Event::NetworkLiveness(_) => EventType::NetworkLiveness,
            Event::NetworkStatus(_) => EventType::NetworkStatus,
            Event::NewConsensus(_) => EventType::NewConsensus,
            Event::NewDesc(_) => EventType::NewDesc,
            Event::OrConn(_) => EventType::OrConn,
            Event::Signal(_) => EventType::Signal,
            Event::Status(e) => e.status_type,
            Event::Stream(_) => EventType::Stream,
            Event::StreamBandwidth(_) => EventType::StreamBandwidth,
            Event::TokenBucketEmpty(_) => EventType::TokenBucketEmpty,
            Event::TransportLaunched(_) => EventType::TransportLaunched,
        }
    }
}

/// Circuit status event.
#[derive(Debug, Clone, Default)]
pub struct CircuitEvent {
    /// Raw payload.
    pub raw: String,
    /// Circuit id.
    pub circuit_id: CircuitId,
    /// Status keyword (LAUNCHED, BUILT, EXTENDED, FAILED, CLOSED, ...).
    pub status: String,
    /// Relay path.
    pub path: Vec<String>,
    /// Build flags.
    pub build_flags: Vec<String>,
    /// Circuit purpose.
    pub purpose: String,
    /// Hidden service state.
    pub hs_state: String,
    /// Rendezvous query address.
    pub rend_query: String,
    /// Creation time.
    pub time_created: Option<PrimitiveDateTime>,
    /// Local close/failure reason.
    pub reason: String,
    /// Remote close/failure reason.
    pub remote_reason: String,
    /// SOCKS isolation username.
    pub socks_username: String,
    /// SOCKS isolation password.
    pub socks_password: String,
}

fn parse_circuit_event(raw: &str) -> CircuitEvent {
    let mut event = CircuitEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (id, rest, _) = next_token(raw);
    event.circuit_id = CircuitId::new(id);
    let (status, mut rest, mut more) = next_token(rest);
    event.status = status.to_string();
    let mut first = true;
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, has_val) = partition(attr, '=');
        match key {
            "BUILD_FLAGS" => event.build_flags = split_csv(val),
            "PURPOSE" => event.purpose = val.to_string(),
            "HS_STATE" => event.hs_state = val.to_string(),
            "REND_QUERY" => event.rend_query = val.to_string(),
            "TIME_CREATED" => event.time_created = parse_iso_time_frac(val),
            "REASON" => event.reason = val.to_string(),
            "REMOTE_REASON" => event.remote_reason = val.to_string(),
            "SOCKS_USERNAME" => event.socks_username = val.to_string(),
            "SOCKS_PASSWORD" => event.socks_password = val.to_string(),
            _ => {
                if first && !has_val {
                    event.path = split_csv(attr);
                }
            }
        }
        first = false;
    }
    event
}

/// Minor circuit change event.
#[derive(Debug, Clone, Default)]
pub struct CircuitMinorEvent {
    /// Raw payload.
    pub raw: String,
    /// Circuit id.
    pub circuit_id: CircuitId,
    /// The minor event keyword (PURPOSE_CHANGED or CANNIBALIZED).
    pub event: String,
    /// Relay path.
    pub path: Vec<String>,
    /// Build flags.
    pub build_flags: Vec<String>,
    /// Circuit purpose.
    pub purpose: String,
    /// Hidden service state.
    pub hs_state: String,
    /// Rendezvous query address.
    pub rend_query: String,
    /// Creation time.
    pub time_created: Option<PrimitiveDateTime>,
    /// Previous purpose.
    pub old_purpose: String,
    /// Previous hidden service state.
    pub old_hs_state: String,
}

fn parse_circuit_minor_event(raw: &str) -> CircuitMinorEvent {
    let mut event = CircuitMinorEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (id, rest, _) = next_token(raw);
    event.circuit_id = CircuitId::new(id);
    let (kind, mut rest, mut more) = next_token(rest);
    event.event = kind.to_string();
    let mut first = true;
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, has_val) = partition(attr, '=');
        match key {
            "BUILD_FLAGS" => event.build_flags = split_csv(val),
            "PURPOSE" => event.purpose = val.to_string(),
            "HS_STATE" => event.hs_state = val.to_string(),
            "REND_QUERY" => event.rend_query = val.to_string(),
            "TIME_CREATED" => event.time_created = parse_iso_time_frac(val),
            "OLD_PURPOSE" => event.old_purpose = val.to_string(),
            "OLD_HS_STATE" => event.old_hs_state = val.to_string(),
            _ => {
                if first && !has_val {
                    event.path = split_csv(attr);
                }
            }
        }
        first = false;
    }
    event
}

/// Stream status event.
#[derive(Debug, Clone, Default)]
pub struct StreamEvent {
    /// Raw payload.
    pub raw: String,
    /// Stream id.
    pub stream_id: StreamId,
    /// Status keyword.
    pub status: String,
    /// Circuit id ("0" when unattached).
    pub circuit_id: CircuitId,
    /// Target address, without the port.
    pub target_address: String,
    /// Target port.
    pub target_port: u16,
    /// Local reason.
    pub reason: String,
    /// Remote reason.
    pub remote_reason: String,
    /// Source keyword.
    pub source: String,
    /// Source address, without the port.
    pub source_address: String,
    /// Source port.
    pub source_port: u16,
    /// Stream purpose.
    pub purpose: String,
}

fn parse_stream_event(raw: &str) -> StreamEvent {
    let mut event = StreamEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (id, rest, _) = next_token(raw);
    event.stream_id = StreamId::new(id);
    let (status, rest, _) = next_token(rest);
    event.status = status.to_string();
    let (circ, rest, _) = next_token(rest);
    event.circuit_id = CircuitId::new(circ);
    let (target, mut rest, mut more) = next_token(rest);
    event.target_address = target.to_string();
    if let (addr, port, true) = partition_from_end(target, ':') {
        event.target_address = addr.to_string();
        event.target_port = port.parse().unwrap_or(0);
    }
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "REASON" => event.reason = val.to_string(),
            "REMOTE_REASON" => event.remote_reason = val.to_string(),
            "SOURCE" => event.source = val.to_string(),
            "SOURCE_ADDR" => {
                event.source_address = val.to_string();
                if let (addr, port, true) = partition_from_end(val, ':') {
                    event.source_address = addr.to_string();
                    event.source_port = port.parse().unwrap_or(0);
                }
            }
            "PURPOSE" => event.purpose = val.to_string(),
            _ => {}
        }
    }
    event
}

/// OR connection status event.
#[derive(Debug, Clone, Default)]
pub struct OrConnEvent {
    /// Raw payload.
    pub raw: String,
    /// Target (LongName or address:port).
    pub target: String,
    /// Status keyword.
    pub status: String,
    /// Failure/closure reason.
    pub reason: String,
    /// Number of established circuits.
    pub num_circuits: u64,
    /// Connection id.
    pub conn_id: String,
}

fn parse_orconn_event(raw: &str) -> OrConnEvent {
    let mut event = OrConnEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (target, rest, _) = next_token(raw);
    event.target = target.to_string();
    let (status, mut rest, mut more) = next_token(rest);
    event.status = status.to_string();
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "REASON" => event.reason = val.to_string(),
            "NCIRCS" => event.num_circuits = parse_u64(val),
            "ID" => event.conn_id = val.to_string(),
            _ => {}
        }
    }
    event
}

/// Bandwidth used in the last second.
#[derive(Debug, Clone, Default)]
pub struct BandwidthEvent {
    /// Raw payload.
    pub raw: String,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
}

fn parse_bandwidth_event(raw: &str) -> BandwidthEvent {
    let (read, rest, _) = next_token(raw);
    let (written, _, _) = next_token(rest);
    BandwidthEvent {
        raw: raw.to_string(),
        bytes_read: parse_u64(read),
        bytes_written: parse_u64(written),
    }
}

/// Log message event (DEBUG/INFO/NOTICE/WARN/ERR).
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// The severity, i.e. which log code fired.
    pub severity: EventType,
    /// The log message.
    pub raw: String,
}

/// New descriptors available.
#[derive(Debug, Clone, Default)]
pub struct NewDescEvent {
    /// Raw payload.
    pub raw: String,
    /// Descriptor ids.
    pub descs: Vec<String>,
}

/// Address mapping event.
#[derive(Debug, Clone, Default)]
pub struct AddrMapEvent {
    /// Raw payload.
    pub raw: String,
    /// Original address.
    pub address: String,
    /// Replacement address.
    pub new_address: String,
    /// Error code, when mapping failed.
    pub error_code: String,
    /// UTC expiry; `None` when the mapping never expires.
    pub expires: Option<PrimitiveDateTime>,
    /// Cached flag value, sans quotes.
    pub cached: String,
}

fn parse_addr_map_event(raw: &str) -> AddrMapEvent {
    let mut event = AddrMapEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (address, rest, _) = next_token(raw);
    event.address = address.to_string();
    let (new_address, rest, _) = next_token(rest);
    event.new_address = new_address.to_string();
    // Skip the local-time expiry; the EXPIRES attribute carries UTC.
    let (_, mut rest, mut more) = next_token(rest);
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "error" => event.error_code = val.to_string(),
            "EXPIRES" => {
                if let Ok(val) = unescape_quoted(val) {
                    event.expires = parse_iso_time(&val);
                }
            }
            "CACHED" => {
                event.cached = unescape_quoted_if_needed(val).unwrap_or_default();
            }
            _ => {}
        }
    }
    event
}

/// Our descriptor changed.
#[derive(Debug, Clone, Default)]
pub struct DescChangedEvent {
    /// Raw payload.
    pub raw: String,
}

/// Status event (STATUS_CLIENT / STATUS_GENERAL / STATUS_SERVER).
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// Which status code fired.
    pub status_type: EventType,
    /// Raw payload.
    pub raw: String,
    /// Severity keyword (NOTICE, WARN, ERR).
    pub severity: String,
    /// Action keyword (e.g. BOOTSTRAP).
    pub action: String,
    /// Remaining attributes, unquoted when quoted.
    pub arguments: HashMap<String, String>,
}

fn parse_status_event(status_type: EventType, raw: &str) -> StatusEvent {
    let mut event = StatusEvent {
        status_type,
        raw: raw.to_string(),
        severity: String::new(),
        action: String::new(),
        arguments: HashMap::new(),
    };
    let (severity, rest, _) = next_token(raw);
    event.severity = severity.to_string();
    let (action, mut rest, mut more) = next_token(rest);
    event.action = action.to_string();
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        event.arguments.insert(
            key.to_string(),
            unescape_quoted_if_needed(val).unwrap_or_default(),
        );
    }
    event
}

/// Guard node event.
#[derive(Debug, Clone, Default)]
pub struct GuardEvent {
    /// Raw payload.
    pub raw: String,
    /// Guard type (currently always ENTRY).
    pub guard_type: String,
    /// Guard name.
    pub name: String,
    /// Guard status.
    pub status: String,
}

fn parse_guard_event(raw: &str) -> GuardEvent {
    let (guard_type, rest, _) = next_token(raw);
    let (name, rest, _) = next_token(rest);
    let (status, _, _) = next_token(rest);
    GuardEvent {
        raw: raw.to_string(),
        guard_type: guard_type.to_string(),
        name: name.to_string(),
        status: status.to_string(),
    }
}

/// Network status changed.
#[derive(Debug, Clone, Default)]
pub struct NetworkStatusEvent {
    /// Raw payload.
    pub raw: String,
}

/// Per-stream bandwidth.
#[derive(Debug, Clone, Default)]
pub struct StreamBandwidthEvent {
    /// Raw payload.
    pub raw: String,
    /// Stream id.
    pub stream_id: StreamId,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Measurement time.
    pub time: Option<PrimitiveDateTime>,
}

fn parse_stream_bandwidth_event(raw: &str) -> StreamBandwidthEvent {
    let mut event = StreamBandwidthEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (id, rest, _) = next_token(raw);
    event.stream_id = StreamId::new(id);
    let (read, rest, _) = next_token(rest);
    event.bytes_read = parse_u64(read);
    let (written, rest, _) = next_token(rest);
    event.bytes_written = parse_u64(written);
    let (time, _, _) = next_token(rest);
    if let Ok(time) = unescape_quoted(time) {
        event.time = parse_iso_time_frac(&time);
    }
    event
}

/// Clients seen on a bridge.
#[derive(Debug, Clone, Default)]
pub struct ClientsSeenEvent {
    /// Raw payload.
    pub raw: String,
    /// Start of the measurement interval.
    pub time_started: Option<PrimitiveDateTime>,
    /// Country code to client count.
    pub country_summary: HashMap<String, u64>,
    /// IP version to client count.
    pub ip_versions: HashMap<String, u64>,
}

fn parse_clients_seen_event(raw: &str) -> ClientsSeenEvent {
    let mut event = ClientsSeenEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (started, mut rest, mut more) = next_token(raw);
    if let Ok(started) = unescape_quoted(started) {
        event.time_started = parse_iso_time(&started);
    }
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "CountrySummary" => event.country_summary = parse_int_map(val),
            "IPVersions" => event.ip_versions = parse_int_map(val),
            _ => {}
        }
    }
    event
}

/// New consensus arrived.
#[derive(Debug, Clone, Default)]
pub struct NewConsensusEvent {
    /// Raw payload.
    pub raw: String,
}

/// Circuit build timeout recomputed.
#[derive(Debug, Clone, Default)]
pub struct BuildTimeoutSetEvent {
    /// Raw payload.
    pub raw: String,
    /// Event type (COMPUTED, RESET, SUSPENDED, DISCARD, RESUME).
    pub set_type: String,
    /// Number of timeouts in the history.
    pub total_times: u64,
    /// Current timeout.
    pub timeout: Duration,
    /// Pareto Xm parameter.
    pub xm: u64,
    /// Pareto alpha parameter.
    pub alpha: f32,
    /// Cutoff quantile.
    pub quantile: f32,
    /// Timeout rate.
    pub timeout_rate: f32,
    /// Close timeout.
    pub close_timeout: Duration,
    /// Close rate.
    pub close_rate: f32,
}

fn parse_build_timeout_set_event(raw: &str) -> BuildTimeoutSetEvent {
    let mut event = BuildTimeoutSetEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (set_type, mut rest, mut more) = next_token(raw);
    event.set_type = set_type.to_string();
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "TOTAL_TIMES" => event.total_times = parse_u64(val),
            "TIMEOUT_MS" => event.timeout = parse_millis(val),
            "XM" => event.xm = parse_u64(val),
            "ALPHA" => event.alpha = parse_f32(val),
            "CUTOFF_QUANTILE" => event.quantile = parse_f32(val),
            "TIMEOUT_RATE" => event.timeout_rate = parse_f32(val),
            "CLOSE_MS" => event.close_timeout = parse_millis(val),
            "CLOSE_RATE" => event.close_rate = parse_f32(val),
            _ => {}
        }
    }
    event
}

/// Signal received by Tor.
#[derive(Debug, Clone, Default)]
pub struct SignalEvent {
    /// Raw payload (the signal name).
    pub raw: String,
}

/// Configuration values changed at runtime.
#[derive(Debug, Clone, Default)]
pub struct ConfChangedEvent {
    /// Raw `key[=value]` lines.
    pub raw: Vec<String>,
}

/// Pluggable transport launched.
#[derive(Debug, Clone, Default)]
pub struct TransportLaunchedEvent {
    /// Raw payload.
    pub raw: String,
    /// Transport type (client or server).
    pub transport_type: String,
    /// Transport name.
    pub name: String,
    /// Listener address.
    pub address: String,
    /// Listener port.
    pub port: u16,
}

fn parse_transport_launched_event(raw: &str) -> TransportLaunchedEvent {
    let (transport_type, rest, _) = next_token(raw);
    let (name, rest, _) = next_token(rest);
    let (address, rest, _) = next_token(rest);
    let (port, _, _) = next_token(rest);
    TransportLaunchedEvent {
        raw: raw.to_string(),
        transport_type: transport_type.to_string(),
        name: name.to_string(),
        address: address.to_string(),
        port: port.parse().unwrap_or(0),
    }
}

/// Per-connection bandwidth.
#[derive(Debug, Clone, Default)]
pub struct ConnBandwidthEvent {
    /// Raw payload.
    pub raw: String,
    /// Connection id.
    pub conn_id: String,
    /// Connection type.
    pub conn_type: String,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
}

fn parse_conn_bandwidth_event(raw: &str) -> ConnBandwidthEvent {
    let mut event = ConnBandwidthEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let mut rest = raw;
    let mut more = true;
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "ID" => event.conn_id = val.to_string(),
            "TYPE" => event.conn_type = val.to_string(),
            "READ" => event.bytes_read = parse_u64(val),
            "WRITTEN" => event.bytes_written = parse_u64(val),
            _ => {}
        }
    }
    event
}

/// Per-circuit bandwidth.
#[derive(Debug, Clone, Default)]
pub struct CircuitBandwidthEvent {
    /// Raw payload.
    pub raw: String,
    /// Circuit id.
    pub circuit_id: CircuitId,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Measurement time.
    pub time: Option<PrimitiveDateTime>,
}

fn parse_circuit_bandwidth_event(raw: &str) -> CircuitBandwidthEvent {
    let mut event = CircuitBandwidthEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let mut rest = raw;
    let mut more = true;
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "ID" => event.circuit_id = CircuitId::new(val),
            "READ" => event.bytes_read = parse_u64(val),
            "WRITTEN" => event.bytes_written = parse_u64(val),
            "TIME" => event.time = parse_iso_time_frac(val),
            _ => {}
        }
    }
    event
}

/// Per-circuit cell statistics.
#[derive(Debug, Clone, Default)]
pub struct CellStatsEvent {
    /// Raw payload.
    pub raw: String,
    /// Circuit id.
    pub circuit_id: CircuitId,
    /// Inbound queue id.
    pub inbound_queue_id: String,
    /// Inbound connection id.
    pub inbound_conn_id: String,
    /// Cells added to the inbound queue, by cell type.
    pub inbound_added: HashMap<String, u64>,
    /// Cells removed from the inbound queue, by cell type.
    pub inbound_removed: HashMap<String, u64>,
    /// Total queueing time of inbound cells, by cell type.
    pub inbound_time: HashMap<String, u64>,
    /// Outbound queue id.
    pub outbound_queue_id: String,
    /// Outbound connection id.
    pub outbound_conn_id: String,
    /// Cells added to the outbound queue, by cell type.
    pub outbound_added: HashMap<String, u64>,
    /// Cells removed from the outbound queue, by cell type.
    pub outbound_removed: HashMap<String, u64>,
    /// Total queueing time of outbound cells, by cell type.
    pub outbound_time: HashMap<String, u64>,
}

fn parse_cell_stats_event(raw: &str) -> CellStatsEvent {
    let mut event = CellStatsEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let mut rest = raw;
    let mut more = true;
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "ID" => event.circuit_id = CircuitId::new(val),
            "InboundQueue" => event.inbound_queue_id = val.to_string(),
            "InboundConn" => event.inbound_conn_id = val.to_string(),
            "InboundAdded" => event.inbound_added = parse_colon_int_map(val),
            "InboundRemoved" => event.inbound_removed = parse_colon_int_map(val),
            "InboundTime" => event.inbound_time = parse_colon_int_map(val),
            "OutboundQueue" => event.outbound_queue_id = val.to_string(),
            "OutboundConn" => event.outbound_conn_id = val.to_string(),
            "OutboundAdded" => event.outbound_added = parse_colon_int_map(val),
            "OutboundRemoved" => event.outbound_removed = parse_colon_int_map(val),
            "OutboundTime" => event.outbound_time = parse_colon_int_map(val),
            _ => {}
        }
    }
    event
}

/// Token bucket ran empty.
#[derive(Debug, Clone, Default)]
pub struct TokenBucketEmptyEvent {
    /// Raw payload.
    pub raw: String,
    /// Bucket name (GLOBAL, RELAY, or ORCONN).
    pub bucket_name: String,
    /// Connection id, for ORCONN buckets.
    pub conn_id: String,
    /// How long the read bucket was empty.
    pub read_bucket_empty: Duration,
    /// How long the write bucket was empty.
    pub write_bucket_empty: Duration,
    /// Time since the last refill.
    pub last_refill: Duration,
}

fn parse_token_bucket_empty_event(raw: &str) -> TokenBucketEmptyEvent {
    let mut event = TokenBucketEmptyEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (bucket_name, mut rest, mut more) = next_token(raw);
    event.bucket_name = bucket_name.to_string();
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, _) = partition(attr, '=');
        match key {
            "ID" => event.conn_id = val.to_string(),
            "READ" => event.read_bucket_empty = parse_millis(val),
            "WRITTEN" => event.write_bucket_empty = parse_millis(val),
            "LAST" => event.last_refill = parse_millis(val),
            _ => {}
        }
    }
    event
}

/// Hidden service descriptor event.
#[derive(Debug, Clone, Default)]
pub struct HsDescEvent {
    /// Raw payload.
    pub raw: String,
    /// Action keyword (REQUESTED, UPLOAD, RECEIVED, UPLOADED, IGNORE,
    /// FAILED, CREATED).
    pub action: String,
    /// Onion address, sans `.onion`.
    pub address: String,
    /// Auth type.
    pub auth_type: String,
    /// Directory the descriptor went to or came from.
    pub hs_dir: String,
    /// Descriptor id.
    pub desc_id: String,
    /// Failure reason.
    pub reason: String,
    /// Replica number.
    pub replica: u64,
    /// Directory index.
    pub hs_dir_index: String,
}

fn parse_hs_desc_event(raw: &str) -> HsDescEvent {
    let mut event = HsDescEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (action, rest, _) = next_token(raw);
    event.action = action.to_string();
    let (address, rest, _) = next_token(rest);
    event.address = address.to_string();
    let (auth_type, rest, _) = next_token(rest);
    event.auth_type = auth_type.to_string();
    let (hs_dir, mut rest, mut more) = next_token(rest);
    event.hs_dir = hs_dir.to_string();
    let mut first = true;
    while more {
        let (attr, attr_rest, attr_more) = next_token(rest);
        rest = attr_rest;
        more = attr_more;
        let (key, val, has_val) = partition(attr, '=');
        match key {
            "REASON" => event.reason = val.to_string(),
            "REPLICA" => event.replica = parse_u64(val),
            "HSDIR_INDEX" => event.hs_dir_index = val.to_string(),
            _ => {
                if first && !has_val {
                    event.desc_id = attr.to_string();
                }
            }
        }
        first = false;
    }
    event
}

/// Hidden service descriptor content.
#[derive(Debug, Clone, Default)]
pub struct HsDescContentEvent {
    /// Raw payload.
    pub raw: String,
    /// Onion address, sans `.onion`.
    pub address: String,
    /// Descriptor id.
    pub desc_id: String,
    /// Directory the descriptor was fetched from.
    pub hs_dir: String,
    /// The descriptor itself.
    pub descriptor: String,
}

fn parse_hs_desc_content_event(raw: &str) -> HsDescContentEvent {
    let mut event = HsDescContentEvent {
        raw: raw.to_string(),
        ..Default::default()
    };
    let (address, rest, _) = next_token(raw);
    event.address = address.to_string();
    let (desc_id, rest, _) = next_token(rest);
    event.desc_id = desc_id.to_string();
    // The final HSDir token ends at the first CRLF; everything after is the
    // descriptor blob.
    if let Some(i) = rest.find("\r\n") {
        event.hs_dir = rest[..i].to_string();
        event.descriptor = rest[i + 2..].to_string();
    }
    event
}

/// Network liveness changed.
#[derive(Debug, Clone, Default)]
pub struct NetworkLivenessEvent {
    /// Raw payload: UP or DOWN.
    pub raw: String,
}

impl NetworkLivenessEvent {
    /// Whether the network is considered up.
    pub fn is_up(&self) -> bool {
        self.raw.trim() == "UP"
    }
}

/// Parse an event payload into its typed form.
///
/// `raw` carries the single-chunk payload; `data_array` carries the
/// remaining chunks when the event arrived as multiple data entries
/// (currently only CONF_CHANGED).
pub fn parse_event(code: EventType, raw: &str, data_array: &[String]) -> Event {
    match code {
        EventType::AddrMap => Event::AddrMap(parse_addr_map_event(raw)),
        EventType::Bandwidth => Event::Bandwidth(parse_bandwidth_event(raw)),
        EventType::BuildTimeoutSet => Event::BuildTimeoutSet(parse_build_timeout_set_event(raw)),
        EventType::CellStats => Event::CellStats(parse_cell_stats_event(raw)),
        EventType::Circuit => Event::Circuit(parse_circuit_event(raw)),
        EventType::CircuitBandwidth => {
            Event::CircuitBandwidth(parse_circuit_bandwidth_event(raw))
        }
        EventType::CircuitMinor => Event::CircuitMinor(parse_circuit_minor_event(raw)),
        EventType::ClientsSeen => Event::ClientsSeen(parse_clients_seen_event(raw)),
        EventType::ConfChanged => Event::ConfChanged(ConfChangedEvent {
            raw: data_array.to_vec(),
        }),
        EventType::ConnBandwidth => Event::ConnBandwidth(parse_conn_bandwidth_event(raw)),
        EventType::DescChanged => Event::DescChanged(DescChangedEvent {
            raw: raw.to_string(),
        }),
        EventType::Guard => Event::Guard(parse_guard_event(raw)),
        EventType::HsDesc => Event::HsDesc(parse_hs_desc_event(raw)),
        EventType::HsDescContent => Event::HsDescContent(parse_hs_desc_content_event(raw)),
        EventType::LogDebug
        | EventType::LogErr
        | EventType::LogInfo
        | EventType::LogNotice
        | EventType::LogWarn => Event::Log(LogEvent {
            severity: code,
            raw: raw.to_string(),
        }),
        EventType::NetworkLiveness => Event::NetworkLiveness(NetworkLivenessEvent {
            raw: raw.to_string(),
        }),
        EventType::NetworkStatus => Event::NetworkStatus(NetworkStatusEvent {
            raw: raw.to_string(),
        }),
        EventType::NewConsensus => Event::NewConsensus(NewConsensusEvent {
            raw: raw.to_string(),
        }),
        EventType::NewDesc => Event::NewDesc(NewDescEvent {
            raw: raw.to_string(),
            descs: raw.split(' ').map(String::from).collect(),
        }),
        EventType::OrConn => Event::OrConn(parse_orconn_event(raw)),
        EventType::Signal => Event::Signal(SignalEvent {
            raw: raw.to_string(),
        }),
        EventType::StatusClient | EventType::StatusGeneral | EventType::StatusServer => {
            Event::Status(parse_status_event(code, raw))
        }
        EventType::Stream => Event::Stream(parse_stream_event(raw)),
        EventType::StreamBandwidth => {
            Event::StreamBandwidth(parse_stream_bandwidth_event(raw))
        }
        EventType::TokenBucketEmpty => {
            Event::TokenBucketEmpty(parse_token_bucket_empty_event(raw))
        }
        EventType::TransportLaunched => {
            Event::TransportLaunched(parse_transport_launched_event(raw))
        }
    }
}
