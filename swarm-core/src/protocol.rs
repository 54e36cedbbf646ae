//! Swarm wire protocol: message types and their text encodings.
//!
//! Payloads are plain UTF-8. Records are `,`-joined fields, registry snapshots are `;`-joined
//! records. There is no escaping: hosts and file names may not contain `,` or `;`, and the
//! encoders reject values that would collide with a delimiter.

use std::fmt;

pub const PING: &[u8] = b"PING";
pub const PONG: &[u8] = b"PONG";
pub const CLOSE: &[u8] = b"CLOSE";
pub const SORRY: &[u8] = b"SORRY";

const FETCH_PREFIX: &str = "GET ";
const FIELD_SEP: char = ',';
const RECORD_SEP: char = ';';

/// Listening address a peer advertises at join time. Identity of a peer in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ProtocolError> {
        let host = host.into();
        validate_host(&host)?;
        Ok(Self { host, port })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One registry entry: advertised address plus the file count reported at join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub addr: PeerAddr,
    pub file_count: u64,
}

impl PeerRecord {
    pub fn new(addr: PeerAddr, file_count: u64) -> Self {
        Self { addr, file_count }
    }
}

/// Liveness and leave messages exchanged on the tracker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Ping,
    Pong,
    Close,
}

impl Control {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Control::Ping => PING,
            Control::Pong => PONG,
            Control::Close => CLOSE,
        }
    }

    /// Exact match only; anything else is not control traffic.
    pub fn parse(payload: &[u8]) -> Option<Control> {
        match payload {
            PING => Some(Control::Ping),
            PONG => Some(Control::Pong),
            CLOSE => Some(Control::Close),
            _ => None,
        }
    }
}

/// Join payload: `host,port,fileCount`.
pub fn encode_join(record: &PeerRecord) -> Vec<u8> {
    encode_record(record).into_bytes()
}

/// Parse a join payload. Accepts `host,port` (file count 0) and `host,port,fileCount`.
pub fn decode_join(payload: &[u8]) -> Result<PeerRecord, ProtocolError> {
    let text = as_text(payload)?;
    let fields: Vec<&str> = text.trim().split(FIELD_SEP).collect();
    match fields.as_slice() {
        [host, port] => Ok(PeerRecord::new(parse_addr(host, port)?, 0)),
        [host, port, count] => Ok(PeerRecord::new(
            parse_addr(host, port)?,
            parse_count(count)?,
        )),
        _ => Err(ProtocolError::MalformedRecord(text.to_string())),
    }
}

/// Broadcast payload: `host,port,fileCount;host,port,fileCount;...` in registry order.
pub fn encode_broadcast(records: &[PeerRecord]) -> Vec<u8> {
    records
        .iter()
        .map(encode_record)
        .collect::<Vec<_>>()
        .join(";")
        .into_bytes()
}

/// Parse a broadcast payload. An empty payload is an empty registry.
pub fn decode_broadcast(payload: &[u8]) -> Result<Vec<PeerRecord>, ProtocolError> {
    let text = as_text(payload)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(RECORD_SEP)
        .map(|record| {
            let fields: Vec<&str> = record.split(FIELD_SEP).collect();
            match fields.as_slice() {
                [host, port, count] => Ok(PeerRecord::new(
                    parse_addr(host, port)?,
                    parse_count(count)?,
                )),
                _ => Err(ProtocolError::MalformedRecord(record.to_string())),
            }
        })
        .collect()
}

/// Peer-to-peer request: availability query (bare file name) or chunk fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    Query { name: String },
    Fetch { name: String, index: u64 },
}

impl PeerRequest {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            PeerRequest::Query { name } => {
                validate_file_name(name)?;
                Ok(name.as_bytes().to_vec())
            }
            PeerRequest::Fetch { name, index } => {
                validate_file_name(name)?;
                Ok(format!("{FETCH_PREFIX}{name} {index}").into_bytes())
            }
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = as_text(payload)?;
        if let Some(rest) = text.strip_prefix(FETCH_PREFIX) {
            let (name, index) = rest
                .rsplit_once(' ')
                .ok_or_else(|| ProtocolError::MalformedRequest(text.to_string()))?;
            let index = index
                .parse::<u64>()
                .map_err(|_| ProtocolError::MalformedRequest(text.to_string()))?;
            validate_file_name(name)?;
            return Ok(PeerRequest::Fetch {
                name: name.to_string(),
                index,
            });
        }
        validate_file_name(text)?;
        Ok(PeerRequest::Query {
            name: text.to_string(),
        })
    }
}

/// Reply to an availability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryReply {
    Sorry,
    Length(u64),
}

impl QueryReply {
    pub fn encode(self) -> Vec<u8> {
        match self {
            QueryReply::Sorry => SORRY.to_vec(),
            QueryReply::Length(len) => len.to_string().into_bytes(),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload == SORRY {
            return Ok(QueryReply::Sorry);
        }
        let text = as_text(payload)?;
        text.trim()
            .parse::<u64>()
            .map(QueryReply::Length)
            .map_err(|_| ProtocolError::MalformedReply(text.to_string()))
    }
}

/// File names travel unescaped in queries, fetches and folder paths.
pub fn validate_file_name(name: &str) -> Result<(), ProtocolError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with(FETCH_PREFIX)
        || name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0' | FIELD_SEP | RECORD_SEP));
    if bad {
        return Err(ProtocolError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

fn validate_host(host: &str) -> Result<(), ProtocolError> {
    if host.is_empty()
        || host
            .chars()
            .any(|c| c.is_whitespace() || c == FIELD_SEP || c == RECORD_SEP)
    {
        return Err(ProtocolError::InvalidHost(host.to_string()));
    }
    Ok(())
}

fn encode_record(record: &PeerRecord) -> String {
    format!(
        "{}{FIELD_SEP}{}{FIELD_SEP}{}",
        record.addr.host, record.addr.port, record.file_count
    )
}

fn parse_addr(host: &str, port: &str) -> Result<PeerAddr, ProtocolError> {
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| ProtocolError::InvalidPort(port.to_string()))?;
    PeerAddr::new(host.trim(), port)
}

fn parse_count(count: &str) -> Result<u64, ProtocolError> {
    count
        .trim()
        .parse::<u64>()
        .map_err(|_| ProtocolError::MalformedRecord(count.to_string()))
}

fn as_text(payload: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed peer record: {0:?}")]
    MalformedRecord(String),
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
    #[error("invalid host: {0:?}")]
    InvalidHost(String),
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
    #[error("malformed request: {0:?}")]
    MalformedRequest(String),
    #[error("malformed reply: {0:?}")]
    MalformedReply(String),
}
