//! # Rserve QAP1 Client
//!
//! Blocking client for the Rserve binary protocol over a plain TCP stream.
//!
//! ## Framing
//!
//! ```text
//! request:  | cmd u32 | len u32 | offset u32 | len_hi u32 | params... |
//! response: | rep u32 | len u32 | offset u32 | len_hi u32 | payload... |
//! param:    | type u8 | len u24 | data (padded to 4) |    (type | 0x40 => len u56)
//! ```
//!
//! All integers are little-endian. The command status of an error response is
//! carried in bits 24..31 of `rep`.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use tracing::debug;

use super::value::EngineValue;
use super::{EngineConnection, EngineConnector, EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::constants::image::READ_CHUNK_BYTES;

const ID_STRING_LEN: usize = 32;

const CMD_LOGIN: u32 = 0x001;
const CMD_VOID_EVAL: u32 = 0x002;
const CMD_EVAL: u32 = 0x003;
const CMD_OPEN_FILE: u32 = 0x010;
const CMD_CLOSE_FILE: u32 = 0x012;
const CMD_READ_FILE: u32 = 0x013;
const CMD_REMOVE_FILE: u32 = 0x015;

const RESP_OK: u32 = 0x10001;
const RESP_ERR: u32 = 0x10002;

const DT_INT: u8 = 1;
const DT_STRING: u8 = 4;
const DT_SEXP: u8 = 10;
const DT_LARGE: u8 = 0x40;

const XT_NULL: u8 = 0;
const XT_INT: u8 = 1;
const XT_DOUBLE: u8 = 2;
const XT_STR: u8 = 3;
const XT_BOOL: u8 = 6;
const XT_VECTOR: u8 = 16;
const XT_LIST: u8 = 17;
const XT_SYMNAME: u8 = 19;
const XT_LIST_NOTAG: u8 = 20;
const XT_LIST_TAG: u8 = 21;
const XT_LANG_NOTAG: u8 = 22;
const XT_LANG_TAG: u8 = 23;
const XT_VECTOR_EXP: u8 = 26;
const XT_ARRAY_INT: u8 = 32;
const XT_ARRAY_DOUBLE: u8 = 33;
const XT_ARRAY_STR: u8 = 34;
const XT_ARRAY_BOOL: u8 = 36;
const XT_RAW: u8 = 37;
const XT_LARGE: u8 = 0x40;
const XT_HAS_ATTR: u8 = 0x80;

const NA_STRING: u8 = 0xff;

/// Authentication the server announced in its handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    None,
    PlainText,
    /// Only unix-crypt authentication offered; not supported by this client
    Crypt,
}

pub struct RserveConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl RserveConnector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl EngineConnector for RserveConnector {
    fn connect(&self) -> EngineResult<Box<dyn EngineConnection>> {
        let connection = RserveConnection::connect(&self.host, self.port, self.connect_timeout)?;
        Ok(Box::new(connection))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct RserveConnection {
    stream: TcpStream,
    auth: AuthRequirement,
    closed: bool,
}

impl RserveConnection {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> EngineResult<Self> {
        let endpoint = format!("{host}:{port}");
        let addresses = std::net::ToSocketAddrs::to_socket_addrs(&(host, port))
            .map_err(|e| EngineError::connection(&endpoint, e.to_string()))?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => return Self::handshake(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(EngineError::connection(
            endpoint,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string()),
        ))
    }

    /// Complete the QAP1 greeting on an already-connected stream
    pub fn handshake(mut stream: TcpStream) -> EngineResult<Self> {
        stream.set_nodelay(true)?;
        let mut id = [0u8; ID_STRING_LEN];
        stream.read_exact(&mut id)?;
        let auth = parse_id_string(&id)?;
        debug!(auth = ?auth, "🧮 RSERVE: Handshake complete");
        Ok(Self {
            stream,
            auth,
            closed: false,
        })
    }

    fn request(&mut self, command: u32, params: &[u8]) -> EngineResult<Vec<u8>> {
        if self.closed {
            return Err(EngineError::Closed);
        }

        let len = params.len() as u64;
        let mut header = Vec::with_capacity(16 + params.len());
        header.extend_from_slice(&command.to_le_bytes());
        header.extend_from_slice(&((len & 0xffff_ffff) as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&((len >> 32) as u32).to_le_bytes());
        header.extend_from_slice(params);
        self.stream.write_all(&header)?;

        let mut response = [0u8; 16];
        self.stream.read_exact(&mut response)?;
        let rep = read_u32(&response, 0)?;
        let len = u64::from(read_u32(&response, 4)?) | (u64::from(read_u32(&response, 12)?) << 32);
        let len = usize::try_from(len).map_err(|_| EngineError::protocol("response too large"))?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;

        match rep & 0x00ff_ffff {
            RESP_OK => Ok(payload),
            RESP_ERR => Err(EngineError::Command {
                status: (rep >> 24) & 0x7f,
            }),
            other => Err(EngineError::protocol(format!("unexpected response code {other:#x}"))),
        }
    }
}

impl EngineConnection for RserveConnection {
    fn needs_login(&self) -> bool {
        self.auth != AuthRequirement::None
    }

    fn login(&mut self, username: &str, password: &str) -> EngineResult<()> {
        if self.auth == AuthRequirement::Crypt {
            return Err(EngineError::Authentication {
                message: "server only offers crypt authentication".to_string(),
            });
        }
        self.request(CMD_LOGIN, &encode_string(&format!("{username}\n{password}")))
            .map(|_| ())
            .map_err(|e| match e {
                EngineError::Command { status } => EngineError::Authentication {
                    message: format!("login rejected with status {status}"),
                },
                other => other,
            })
    }

    fn eval_void(&mut self, command: &str) -> EngineResult<()> {
        self.request(CMD_VOID_EVAL, &encode_string(command)).map(|_| ())
    }

    fn eval(&mut self, command: &str) -> EngineResult<EngineValue> {
        let payload = self.request(CMD_EVAL, &encode_string(command))?;
        decode_sexp_param(&payload)
    }

    fn read_file(&mut self, name: &str) -> EngineResult<Vec<u8>> {
        self.request(CMD_OPEN_FILE, &encode_string(name))
            .map_err(|e| EngineError::file("open", name, e.to_string()))?;

        let mut contents = Vec::new();
        let read_result = loop {
            match self.request(CMD_READ_FILE, &encode_int(READ_CHUNK_BYTES as i32)) {
                Ok(chunk) if chunk.is_empty() => break Ok(()),
                Ok(chunk) => contents.extend_from_slice(&chunk),
                Err(e) => break Err(EngineError::file("read", name, e.to_string())),
            }
        };

        let close_result = self
            .request(CMD_CLOSE_FILE, &[])
            .map_err(|e| EngineError::file("close", name, e.to_string()));
        read_result?;
        close_result?;
        Ok(contents)
    }

    fn remove_file(&mut self, name: &str) -> EngineResult<()> {
        self.request(CMD_REMOVE_FILE, &encode_string(name))
            .map(|_| ())
            .map_err(|e| EngineError::file("remove", name, e.to_string()))
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.shutdown(Shutdown::Both).map_err(EngineError::from)
    }
}

fn parse_id_string(id: &[u8; ID_STRING_LEN]) -> EngineResult<AuthRequirement> {
    if &id[0..4] != b"Rsrv" {
        return Err(EngineError::protocol("server did not identify as Rserve"));
    }
    if &id[8..12] != b"QAP1" {
        return Err(EngineError::protocol(format!(
            "unsupported protocol {}",
            String::from_utf8_lossy(&id[8..12])
        )));
    }

    let mut plain = false;
    let mut crypt = false;
    for attribute in id[12..].chunks(4) {
        match attribute {
            b"ARpt" => plain = true,
            b"ARuc" => crypt = true,
            _ => {}
        }
    }

    Ok(match (plain, crypt) {
        (true, _) => AuthRequirement::PlainText,
        (false, true) => AuthRequirement::Crypt,
        (false, false) => AuthRequirement::None,
    })
}

fn param_header(kind: u8, len: usize) -> Vec<u8> {
    if len > 0x00ff_fff0 {
        let mut header = Vec::with_capacity(8);
        header.push(kind | DT_LARGE);
        header.extend_from_slice(&(len as u64).to_le_bytes()[..7]);
        header
    } else {
        let mut header = Vec::with_capacity(4);
        header.push(kind);
        header.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
        header
    }
}

/// NUL-terminated string parameter padded to a 4-byte boundary
pub fn encode_string(value: &str) -> Vec<u8> {
    let mut data = value.as_bytes().to_vec();
    data.push(0);
    while data.len() % 4 != 0 {
        data.push(0);
    }
    let mut param = param_header(DT_STRING, data.len());
    param.extend_from_slice(&data);
    param
}

fn encode_int(value: i32) -> Vec<u8> {
    let mut param = param_header(DT_INT, 4);
    param.extend_from_slice(&value.to_le_bytes());
    param
}

fn read_u32(buf: &[u8], at: usize) -> EngineResult<u32> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| EngineError::protocol("truncated integer"))
}

/// Returns (type, header length, content length)
fn read_header(buf: &[u8], large_flag: u8) -> EngineResult<(u8, usize, usize)> {
    let first = read_u32(buf, 0)?;
    let kind = (first & 0xff) as u8;
    let mut len = u64::from(first >> 8);
    let mut header_len = 4;
    if kind & large_flag != 0 {
        len |= u64::from(read_u32(buf, 4)?) << 24;
        header_len = 8;
    }
    let len = usize::try_from(len).map_err(|_| EngineError::protocol("expression too large"))?;
    if buf.len() < header_len + len {
        return Err(EngineError::protocol("truncated expression"));
    }
    Ok((kind, header_len, len))
}

/// Decode the DT_SEXP parameter of an eval response
pub(crate) fn decode_sexp_param(payload: &[u8]) -> EngineResult<EngineValue> {
    let (kind, header_len, len) = read_header(payload, DT_LARGE)?;
    if kind & !DT_LARGE != DT_SEXP {
        return Err(EngineError::protocol(format!("expected SEXP parameter, got type {kind}")));
    }
    let (value, _) = decode_sexp(&payload[header_len..header_len + len])?;
    Ok(value)
}

/// Decode one expression, returning it with the number of bytes consumed
pub fn decode_sexp(buf: &[u8]) -> EngineResult<(EngineValue, usize)> {
    let (raw_kind, header_len, len) = read_header(buf, XT_LARGE)?;
    let mut content = &buf[header_len..header_len + len];

    if raw_kind & XT_HAS_ATTR != 0 {
        let (_, used) = decode_sexp(content)?;
        content = &content[used..];
    }

    let value = match raw_kind & 0x3f {
        XT_NULL => EngineValue::Null,
        XT_INT | XT_ARRAY_INT => EngineValue::Int(
            content
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        XT_DOUBLE | XT_ARRAY_DOUBLE => EngineValue::Double(
            content
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        XT_STR | XT_SYMNAME => EngineValue::Str(vec![read_c_string(content)]),
        XT_ARRAY_STR => EngineValue::Str(decode_string_array(content)),
        XT_BOOL => EngineValue::Bool(content.first().map(|b| decode_bool(*b)).into_iter().collect()),
        XT_ARRAY_BOOL => {
            let count = read_u32(content, 0)? as usize;
            let bytes = content
                .get(4..4 + count)
                .ok_or_else(|| EngineError::protocol("truncated logical array"))?;
            EngineValue::Bool(bytes.iter().map(|b| decode_bool(*b)).collect())
        }
        XT_RAW => {
            let count = read_u32(content, 0)? as usize;
            let bytes = content
                .get(4..4 + count)
                .ok_or_else(|| EngineError::protocol("truncated raw vector"))?;
            EngineValue::Raw(bytes.to_vec())
        }
        XT_VECTOR | XT_VECTOR_EXP | XT_LIST | XT_LIST_NOTAG | XT_LANG_NOTAG => {
            EngineValue::List(decode_sequence(content, false)?)
        }
        XT_LIST_TAG | XT_LANG_TAG => EngineValue::List(decode_sequence(content, true)?),
        other => EngineValue::Unsupported(other),
    };

    Ok((value, header_len + len))
}

fn decode_sequence(mut content: &[u8], tagged: bool) -> EngineResult<Vec<EngineValue>> {
    let mut items = Vec::new();
    while !content.is_empty() {
        let (value, used) = decode_sexp(content)?;
        content = &content[used..];
        if tagged {
            let (_, tag_used) = decode_sexp(content)?;
            content = &content[tag_used..];
        }
        items.push(value);
    }
    Ok(items)
}

fn decode_bool(byte: u8) -> Option<bool> {
    match byte {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn read_c_string(content: &[u8]) -> String {
    let end = content.iter().position(|b| *b == 0).unwrap_or(content.len());
    String::from_utf8_lossy(&content[..end]).into_owned()
}

/// NUL-separated strings followed by 0x01 padding; a lone 0xff is NA
fn decode_string_array(content: &[u8]) -> Vec<String> {
    let mut values = Vec::new();
    let mut start = 0;
    for (index, byte) in content.iter().enumerate() {
        if *byte == 0 {
            let element = &content[start..index];
            values.push(if element == [NA_STRING] {
                "NA".to_string()
            } else {
                String::from_utf8_lossy(element).into_owned()
            });
            start = index + 1;
        }
    }
    values
}
