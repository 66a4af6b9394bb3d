//! Current daemon wire codec.
//!
//! Commands are a magic-prefixed variable-length header
//! `magic:u32, payload_len:u32, opcode:u16, n_doubles:u16, n_longs:u16,
//! n_shorts:u16` followed by the typed parameter vectors (8-byte floats,
//! 4-byte signed ints, 2-byte signed ints) and an optional trailing
//! NUL-terminated string or raw buffer. Responses replace the magic with a
//! signed status and echo the counts.
//!
//! Decode is resumable in the same way as the legacy codec: incomplete
//! input consumes nothing.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::core::error::{ClientError, Result};

/// Fixed header size for both commands and responses.
pub const HEADER_LEN: usize = 16;

/// Magic constant opening every command header.
pub const MAGIC: u32 = u32::from_le_bytes(*b"RGD2");

/// Upper bound on a payload. Anything larger is treated as corruption.
pub const MAX_PAYLOAD: usize = 1 << 20;

// ============================================================================
// Opcodes, grouped by subsystem
// ============================================================================

/// Current opcode numbers.
#[allow(missing_docs)]
pub mod op {
    // Session
    pub const LOGIN_SALT: u16 = 1;
    pub const LOGIN_USER: u16 = 2;
    pub const LOGIN_PASS: u16 = 3;
    pub const VERSION: u16 = 4;
    pub const TICK: u16 = 5;
    pub const BYE: u16 = 6;
    pub const KEEPALIVE: u16 = 7;

    // Notifications
    pub const NOTIFY_OPEN: u16 = 10;
    pub const NOTIFY_CLOSE: u16 = 11;
    pub const NOTIFY_PAUSE: u16 = 12;
    pub const NOTIFY_RESUME: u16 = 13;
    pub const ALERT_CLAIM: u16 = 14;
    pub const ALERT_FREE: u16 = 15;
    pub const WATCHDOG: u16 = 16;
    pub const DEBOUNCE: u16 = 17;

    // GPIO chip / line
    pub const CHIP_OPEN: u16 = 20;
    pub const CHIP_CLOSE: u16 = 21;
    pub const CHIP_INFO: u16 = 22;
    pub const LINE_INFO: u16 = 23;
    pub const CLAIM_INPUT: u16 = 24;
    pub const CLAIM_OUTPUT: u16 = 25;
    pub const LINE_FREE: u16 = 26;
    pub const GPIO_READ: u16 = 27;
    pub const GPIO_WRITE: u16 = 28;
    pub const GROUP_CLAIM_INPUT: u16 = 29;
    pub const GROUP_CLAIM_OUTPUT: u16 = 30;
    pub const GROUP_READ: u16 = 31;
    pub const GROUP_WRITE: u16 = 32;
    pub const GROUP_FREE: u16 = 33;
    pub const TX_PULSE: u16 = 34;
    pub const TX_PWM: u16 = 35;
    pub const TX_SERVO: u16 = 36;

    // I2C
    pub const I2C_OPEN: u16 = 40;
    pub const I2C_CLOSE: u16 = 41;
    pub const I2C_READ_BYTE: u16 = 42;
    pub const I2C_WRITE_BYTE: u16 = 43;
    pub const I2C_READ_DEVICE: u16 = 44;
    pub const I2C_WRITE_DEVICE: u16 = 45;
    pub const I2C_READ_REG: u16 = 46;
    pub const I2C_WRITE_REG: u16 = 47;
    pub const I2C_ZIP: u16 = 48;

    // SPI
    pub const SPI_OPEN: u16 = 50;
    pub const SPI_CLOSE: u16 = 51;
    pub const SPI_READ: u16 = 52;
    pub const SPI_WRITE: u16 = 53;
    pub const SPI_XFER: u16 = 54;

    // Serial
    pub const SERIAL_OPEN: u16 = 60;
    pub const SERIAL_CLOSE: u16 = 61;
    pub const SERIAL_READ_BYTE: u16 = 62;
    pub const SERIAL_WRITE_BYTE: u16 = 63;
    pub const SERIAL_READ: u16 = 64;
    pub const SERIAL_WRITE: u16 = 65;
    pub const SERIAL_DATA_AVAILABLE: u16 = 66;

    // Files
    pub const FILE_OPEN: u16 = 70;
    pub const FILE_CLOSE: u16 = 71;
    pub const FILE_READ: u16 = 72;
    pub const FILE_WRITE: u16 = 73;
    pub const FILE_SEEK: u16 = 74;
    pub const FILE_LIST: u16 = 75;

    // Scripts
    pub const SCRIPT_STORE: u16 = 80;
    pub const SCRIPT_RUN: u16 = 81;
    pub const SCRIPT_STATUS: u16 = 82;
    pub const SCRIPT_STOP: u16 = 83;
    pub const SCRIPT_DELETE: u16 = 84;
    pub const SCRIPT_UPDATE: u16 = 85;

    // Shell
    pub const SHELL: u16 = 90;
}

/// Pull selection passed as a long to `CLAIM_INPUT`.
pub const PULL_NONE: i32 = 0;
/// Pull selection passed as a long to `CLAIM_INPUT`.
pub const PULL_UP: i32 = 1;
/// Pull selection passed as a long to `CLAIM_INPUT`.
pub const PULL_DOWN: i32 = 2;

/// File open mode bits for `FILE_OPEN`.
pub const FILE_READ_MODE: i32 = 1;
/// File open mode bits for `FILE_OPEN`.
pub const FILE_WRITE_MODE: i32 = 2;
/// File open mode bits for `FILE_OPEN`.
pub const FILE_CREATE_MODE: i32 = 4;
/// File open mode bits for `FILE_OPEN`.
pub const FILE_TRUNC_MODE: i32 = 8;

static OPCODE_NAMES: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    use op::*;
    let table: &[(u16, &'static str)] = &[
        (LOGIN_SALT, "LOGIN_SALT"),
        (LOGIN_USER, "LOGIN_USER"),
        (LOGIN_PASS, "LOGIN_PASS"),
        (VERSION, "VERSION"),
        (TICK, "TICK"),
        (BYE, "BYE"),
        (KEEPALIVE, "KEEPALIVE"),
        (NOTIFY_OPEN, "NOTIFY_OPEN"),
        (NOTIFY_CLOSE, "NOTIFY_CLOSE"),
        (NOTIFY_PAUSE, "NOTIFY_PAUSE"),
        (NOTIFY_RESUME, "NOTIFY_RESUME"),
        (ALERT_CLAIM, "ALERT_CLAIM"),
        (ALERT_FREE, "ALERT_FREE"),
        (WATCHDOG, "WATCHDOG"),
        (DEBOUNCE, "DEBOUNCE"),
        (CHIP_OPEN, "CHIP_OPEN"),
        (CHIP_CLOSE, "CHIP_CLOSE"),
        (CHIP_INFO, "CHIP_INFO"),
        (LINE_INFO, "LINE_INFO"),
        (CLAIM_INPUT, "CLAIM_INPUT"),
        (CLAIM_OUTPUT, "CLAIM_OUTPUT"),
        (LINE_FREE, "LINE_FREE"),
        (GPIO_READ, "GPIO_READ"),
        (GPIO_WRITE, "GPIO_WRITE"),
        (GROUP_CLAIM_INPUT, "GROUP_CLAIM_INPUT"),
        (GROUP_CLAIM_OUTPUT, "GROUP_CLAIM_OUTPUT"),
        (GROUP_READ, "GROUP_READ"),
        (GROUP_WRITE, "GROUP_WRITE"),
        (GROUP_FREE, "GROUP_FREE"),
        (TX_PULSE, "TX_PULSE"),
        (TX_PWM, "TX_PWM"),
        (TX_SERVO, "TX_SERVO"),
        (I2C_OPEN, "I2C_OPEN"),
        (I2C_CLOSE, "I2C_CLOSE"),
        (I2C_READ_BYTE, "I2C_READ_BYTE"),
        (I2C_WRITE_BYTE, "I2C_WRITE_BYTE"),
        (I2C_READ_DEVICE, "I2C_READ_DEVICE"),
        (I2C_WRITE_DEVICE, "I2C_WRITE_DEVICE"),
        (I2C_READ_REG, "I2C_READ_REG"),
        (I2C_WRITE_REG, "I2C_WRITE_REG"),
        (I2C_ZIP, "I2C_ZIP"),
        (SPI_OPEN, "SPI_OPEN"),
        (SPI_CLOSE, "SPI_CLOSE"),
        (SPI_READ, "SPI_READ"),
        (SPI_WRITE, "SPI_WRITE"),
        (SPI_XFER, "SPI_XFER"),
        (SERIAL_OPEN, "SERIAL_OPEN"),
        (SERIAL_CLOSE, "SERIAL_CLOSE"),
        (SERIAL_READ_BYTE, "SERIAL_READ_BYTE"),
        (SERIAL_WRITE_BYTE, "SERIAL_WRITE_BYTE"),
        (SERIAL_READ, "SERIAL_READ"),
        (SERIAL_WRITE, "SERIAL_WRITE"),
        (SERIAL_DATA_AVAILABLE, "SERIAL_DATA_AVAILABLE"),
        (FILE_OPEN, "FILE_OPEN"),
        (FILE_CLOSE, "FILE_CLOSE"),
        (FILE_READ, "FILE_READ"),
        (FILE_WRITE, "FILE_WRITE"),
        (FILE_SEEK, "FILE_SEEK"),
        (FILE_LIST, "FILE_LIST"),
        (SCRIPT_STORE, "SCRIPT_STORE"),
        (SCRIPT_RUN, "SCRIPT_RUN"),
        (SCRIPT_STATUS, "SCRIPT_STATUS"),
        (SCRIPT_STOP, "SCRIPT_STOP"),
        (SCRIPT_DELETE, "SCRIPT_DELETE"),
        (SCRIPT_UPDATE, "SCRIPT_UPDATE"),
        (SHELL, "SHELL"),
    ];
    table.iter().copied().collect()
});

/// Look up the mnemonic for an opcode.
pub fn opcode_name(opcode: u16) -> Option<&'static str> {
    OPCODE_NAMES.get(&opcode).copied()
}

/// Iterate all known opcodes as (number, mnemonic), sorted by number.
pub fn opcode_table() -> Vec<(u16, &'static str)> {
    let mut v: Vec<_> = OPCODE_NAMES.iter().map(|(k, v)| (*k, *v)).collect();
    v.sort_unstable_by_key(|(k, _)| *k);
    v
}

// ============================================================================
// Request / reply frames
// ============================================================================

/// One command, immutable once built (builder methods consume `self`).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Opcode from [`op`].
    pub opcode: u16,
    /// 8-byte float parameters.
    pub doubles: Vec<f64>,
    /// 4-byte signed int parameters.
    pub longs: Vec<i32>,
    /// 2-byte signed int parameters.
    pub shorts: Vec<i16>,
    /// Trailing NUL-terminated string or raw buffer.
    pub tail: Vec<u8>,
}

impl Request {
    /// Create a command with no parameters.
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            doubles: Vec::new(),
            longs: Vec::new(),
            shorts: Vec::new(),
            tail: Vec::new(),
        }
    }

    /// Append a float parameter.
    #[must_use]
    pub fn with_double(mut self, v: f64) -> Self {
        self.doubles.push(v);
        self
    }

    /// Append a long parameter.
    #[must_use]
    pub fn with_long(mut self, v: i32) -> Self {
        self.longs.push(v);
        self
    }

    /// Append a short parameter.
    #[must_use]
    pub fn with_short(mut self, v: i16) -> Self {
        self.shorts.push(v);
        self
    }

    /// Set the trailing string (NUL terminator appended on the wire).
    #[must_use]
    pub fn with_text(mut self, s: &str) -> Self {
        self.tail = s.as_bytes().to_vec();
        self.tail.push(0);
        self
    }

    /// Set the trailing raw buffer.
    #[must_use]
    pub fn with_buf(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.tail = bytes.into();
        self
    }

    fn payload_len(&self) -> usize {
        self.doubles.len() * 8 + self.longs.len() * 4 + self.shorts.len() * 2 + self.tail.len()
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload_len();
        let mut out = Vec::with_capacity(HEADER_LEN + payload);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&(payload as u32).to_le_bytes());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&(self.doubles.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.longs.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.shorts.len() as u16).to_le_bytes());
        for d in &self.doubles {
            out.extend_from_slice(&d.to_le_bytes());
        }
        for l in &self.longs {
            out.extend_from_slice(&l.to_le_bytes());
        }
        for s in &self.shorts {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out.extend_from_slice(&self.tail);
        out
    }
}

/// One decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Signed daemon status (negative = error).
    pub status: i32,
    /// Echoed opcode.
    pub opcode: u16,
    /// Float payload values.
    pub doubles: Vec<f64>,
    /// Long payload values.
    pub longs: Vec<i32>,
    /// Short payload values.
    pub shorts: Vec<i16>,
    /// Remaining payload (free-form per opcode: text, struct fields, or
    /// nothing).
    pub tail: Vec<u8>,
}

impl Reply {
    /// Build a response carrying only a status.
    pub fn status_only(opcode: u16, status: i32) -> Self {
        Self {
            status,
            opcode,
            doubles: Vec::new(),
            longs: Vec::new(),
            shorts: Vec::new(),
            tail: Vec::new(),
        }
    }

    /// Encode to wire bytes (server side of the wire, used by tests and
    /// tooling).
    pub fn encode(&self) -> Vec<u8> {
        let payload =
            self.doubles.len() * 8 + self.longs.len() * 4 + self.shorts.len() * 2 + self.tail.len();
        let mut out = Vec::with_capacity(HEADER_LEN + payload);
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&(payload as u32).to_le_bytes());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&(self.doubles.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.longs.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.shorts.len() as u16).to_le_bytes());
        for d in &self.doubles {
            out.extend_from_slice(&d.to_le_bytes());
        }
        for l in &self.longs {
            out.extend_from_slice(&l.to_le_bytes());
        }
        for s in &self.shorts {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out.extend_from_slice(&self.tail);
        out
    }

    /// Trailing payload as text, with the NUL terminator stripped.
    pub fn text(&self) -> String {
        let end = self
            .tail
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.tail.len());
        String::from_utf8_lossy(&self.tail[..end]).into_owned()
    }

    /// Long payload value by index.
    pub fn long(&self, idx: usize) -> Option<i32> {
        self.longs.get(idx).copied()
    }
}

fn parse_vectors(
    payload: &[u8],
    nd: usize,
    nl: usize,
    ns: usize,
) -> Result<(Vec<f64>, Vec<i32>, Vec<i16>, Vec<u8>)> {
    let fixed = nd * 8 + nl * 4 + ns * 2;
    if fixed > payload.len() {
        return Err(ClientError::protocol(format!(
            "declared parameter counts need {} bytes but payload is {}",
            fixed,
            payload.len()
        )));
    }

    let mut at = 0usize;
    let mut doubles = Vec::with_capacity(nd);
    for _ in 0..nd {
        let mut b = [0u8; 8];
        b.copy_from_slice(&payload[at..at + 8]);
        doubles.push(f64::from_le_bytes(b));
        at += 8;
    }
    let mut longs = Vec::with_capacity(nl);
    for _ in 0..nl {
        let mut b = [0u8; 4];
        b.copy_from_slice(&payload[at..at + 4]);
        longs.push(i32::from_le_bytes(b));
        at += 4;
    }
    let mut shorts = Vec::with_capacity(ns);
    for _ in 0..ns {
        let mut b = [0u8; 2];
        b.copy_from_slice(&payload[at..at + 2]);
        shorts.push(i16::from_le_bytes(b));
        at += 2;
    }
    Ok((doubles, longs, shorts, payload[at..].to_vec()))
}

/// Decode one response from the front of `buf`.
///
/// Returns `Ok(None)` when fewer bytes than the declared total are
/// buffered; otherwise the consumed byte count and the reply.
pub fn decode(buf: &[u8]) -> Result<Option<(usize, Reply)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let status = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let opcode = u16::from_le_bytes([buf[8], buf[9]]);
    let nd = u16::from_le_bytes([buf[10], buf[11]]) as usize;
    let nl = u16::from_le_bytes([buf[12], buf[13]]) as usize;
    let ns = u16::from_le_bytes([buf[14], buf[15]]) as usize;

    if payload_len > MAX_PAYLOAD {
        return Err(ClientError::protocol(format!(
            "response payload of {} bytes exceeds limit",
            payload_len
        )));
    }

    let total = HEADER_LEN + payload_len;
    if buf.len() < total {
        return Ok(None);
    }

    let (doubles, longs, shorts, tail) = parse_vectors(&buf[HEADER_LEN..total], nd, nl, ns)?;
    Ok(Some((
        total,
        Reply {
            status,
            opcode,
            doubles,
            longs,
            shorts,
            tail,
        },
    )))
}

/// Decode one command from the front of `buf` (server side of the wire,
/// used by tests and tooling).
pub fn decode_request(buf: &[u8]) -> Result<Option<(usize, Request)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(ClientError::protocol(format!(
            "bad magic {:#010x} in command header",
            magic
        )));
    }
    let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let opcode = u16::from_le_bytes([buf[8], buf[9]]);
    let nd = u16::from_le_bytes([buf[10], buf[11]]) as usize;
    let nl = u16::from_le_bytes([buf[12], buf[13]]) as usize;
    let ns = u16::from_le_bytes([buf[14], buf[15]]) as usize;

    if payload_len > MAX_PAYLOAD {
        return Err(ClientError::protocol(format!(
            "command payload of {} bytes exceeds limit",
            payload_len
        )));
    }

    let total = HEADER_LEN + payload_len;
    if buf.len() < total {
        return Ok(None);
    }

    let (doubles, longs, shorts, tail) = parse_vectors(&buf[HEADER_LEN..total], nd, nl, ns)?;
    Ok(Some((
        total,
        Request {
            opcode,
            doubles,
            longs,
            shorts,
            tail,
        },
    )))
}

// ============================================================================
// Error table
// ============================================================================

/// Dense status-to-message table, indexed by the negated status.
static ERROR_TEXT: &[&str] = &[
    "ok",
    "initialisation failed",
    "connection refused by daemon",
    "bad session handle",
    "not permitted for this user",
    "login required",
    "bad login salt exchange",
    "bad user name",
    "bad password proof",
    "session limit reached",
    "daemon is shutting down",
    "bad GPIO chip",
    "can't open GPIO chip",
    "bad chip handle",
    "bad chip info request",
    "bad line number",
    "line busy",
    "line not claimed",
    "line claimed by another user",
    "bad line flags",
    "bad pull selection",
    "bad claim request",
    "group claim failed",
    "bad group handle",
    "group line mismatch",
    "GPIO read failed",
    "GPIO write failed",
    "bad level value",
    "bad alert request",
    "no alert handle available",
    "bad alert handle",
    "bad watchdog timeout",
    "bad debounce interval",
    "notification open failed",
    "bad notification handle",
    "notification paused",
    "bad pulse timing",
    "bad PWM frequency",
    "bad PWM dutycycle",
    "bad servo pulsewidth",
    "transmit queue full",
    "bad I2C bus",
    "bad I2C address",
    "can't open I2C device",
    "bad I2C handle",
    "I2C read failed",
    "I2C write failed",
    "bad I2C register",
    "bad I2C segment list",
    "I2C transaction failed",
    "bad SPI channel",
    "bad SPI speed",
    "can't open SPI device",
    "bad SPI handle",
    "SPI transfer failed",
    "bad SPI count",
    "bad serial device name",
    "bad serial baud rate",
    "can't open serial device",
    "bad serial handle",
    "serial read failed",
    "serial write failed",
    "no serial data available",
    "bad file mode",
    "bad file flags",
    "can't open file",
    "bad file handle",
    "file read failed",
    "file write failed",
    "bad file seek",
    "file not open for read",
    "file not open for write",
    "no files match pattern",
    "no permission to access file",
    "file is a directory",
    "file name too long",
    "bad script name",
    "bad script text",
    "script has syntax errors",
    "unknown script id",
    "script is initialising",
    "script is halted",
    "script run failed",
    "no more room for scripts",
    "bad script parameter count",
    "bad script parameter",
    "shell spawn failed",
    "bad shell return status",
    "bad parameter count",
    "bad parameter value",
    "parameter out of range",
    "unknown command",
    "command not supported by daemon build",
    "payload too large",
    "text not NUL terminated",
    "out of memory",
    "internal daemon error",
    "socket read failed",
    "socket write failed",
    "peer closed connection",
    "operation timed out on daemon side",
    "resource limit reached",
];

/// Map a daemon status code to a human-readable message.
///
/// Unmapped codes fall back to the bare numeric string.
pub fn error_message(code: i32) -> String {
    if code < 0 {
        if let Some(msg) = ERROR_TEXT.get((-code) as usize) {
            return (*msg).to_string();
        }
    }
    code.to_string()
}
