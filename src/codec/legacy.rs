//! Legacy daemon wire codec.
//!
//! Commands are a fixed 16-byte little-endian header
//! `opcode:u32, p1:u32, p2:u32, ext_len:u32` followed by `ext_len` raw
//! bytes for commands carrying a string/buffer parameter. Responses reuse
//! the header shape with the fourth word carrying a signed status, except
//! for a small set of opcodes whose result is an unsigned value that
//! cannot fail. Opcodes in the extended-response set are followed by
//! `status` extra bytes (file reads, serial reads, script parameters, …).
//!
//! Decode is resumable: with fewer buffered bytes than the declared total
//! it consumes nothing, and the caller retries once more data arrives.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::core::error::{ClientError, Result};

/// Fixed header size for both commands and responses.
pub const HEADER_LEN: usize = 16;

/// Upper bound on an extended-response payload. Anything larger is
/// treated as stream corruption.
pub const MAX_EXT_LEN: usize = 1 << 20;

// ============================================================================
// Opcodes
// ============================================================================

/// Legacy opcode numbers.
#[allow(missing_docs)]
pub mod op {
    pub const MODES: u32 = 0;
    pub const MODEG: u32 = 1;
    pub const PUD: u32 = 2;
    pub const READ: u32 = 3;
    pub const WRITE: u32 = 4;
    pub const PWM: u32 = 5;
    pub const PRS: u32 = 6;
    pub const PFS: u32 = 7;
    pub const SERVO: u32 = 8;
    pub const WDOG: u32 = 9;
    pub const BR1: u32 = 10;
    pub const BR2: u32 = 11;
    pub const BW1: u32 = 12;
    pub const BW2: u32 = 13;
    pub const BC1: u32 = 14;
    pub const BC2: u32 = 15;
    pub const BS1: u32 = 16;
    pub const BS2: u32 = 17;
    pub const TICK: u32 = 18;
    pub const HWVER: u32 = 19;
    pub const NO: u32 = 20;
    pub const NB: u32 = 21;
    pub const NP: u32 = 22;
    pub const NC: u32 = 23;
    pub const PRG: u32 = 24;
    pub const PFG: u32 = 25;
    pub const PRRG: u32 = 26;
    pub const HELP: u32 = 27;
    pub const PIGPV: u32 = 28;
    pub const WVCLR: u32 = 29;
    pub const WVAG: u32 = 30;
    pub const WVAS: u32 = 31;
    pub const WVBSY: u32 = 32;
    pub const WVHLT: u32 = 33;
    pub const WVSM: u32 = 34;
    pub const WVSP: u32 = 35;
    pub const WVSC: u32 = 36;
    pub const TRIG: u32 = 37;
    pub const PROC: u32 = 38;
    pub const PROCD: u32 = 39;
    pub const PROCR: u32 = 40;
    pub const PROCS: u32 = 41;
    pub const SLRO: u32 = 42;
    pub const SLR: u32 = 43;
    pub const SLRC: u32 = 44;
    pub const PROCP: u32 = 45;
    pub const MICS: u32 = 46;
    pub const MILS: u32 = 47;
    pub const PARSE: u32 = 48;
    pub const WVCRE: u32 = 49;
    pub const WVDEL: u32 = 50;
    pub const WVTX: u32 = 51;
    pub const WVTXR: u32 = 52;
    pub const WVNEW: u32 = 53;
    pub const I2CO: u32 = 54;
    pub const I2CC: u32 = 55;
    pub const I2CRD: u32 = 56;
    pub const I2CWD: u32 = 57;
    pub const I2CWQ: u32 = 58;
    pub const I2CRS: u32 = 59;
    pub const I2CWS: u32 = 60;
    pub const I2CRB: u32 = 61;
    pub const I2CWB: u32 = 62;
    pub const I2CRW: u32 = 63;
    pub const I2CWW: u32 = 64;
    pub const I2CRK: u32 = 65;
    pub const I2CWK: u32 = 66;
    pub const I2CRI: u32 = 67;
    pub const I2CWI: u32 = 68;
    pub const I2CPC: u32 = 69;
    pub const I2CPK: u32 = 70;
    pub const SPIO: u32 = 71;
    pub const SPIC: u32 = 72;
    pub const SPIR: u32 = 73;
    pub const SPIW: u32 = 74;
    pub const SPIX: u32 = 75;
    pub const SERO: u32 = 76;
    pub const SERC: u32 = 77;
    pub const SERRB: u32 = 78;
    pub const SERWB: u32 = 79;
    pub const SERR: u32 = 80;
    pub const SERW: u32 = 81;
    pub const SERDA: u32 = 82;
    pub const GDC: u32 = 83;
    pub const GPW: u32 = 84;
    pub const HC: u32 = 85;
    pub const HP: u32 = 86;
    pub const CF1: u32 = 87;
    pub const CF2: u32 = 88;
    pub const BI2CC: u32 = 89;
    pub const BI2CO: u32 = 90;
    pub const BI2CZ: u32 = 91;
    pub const I2CZ: u32 = 92;
    pub const WVCHA: u32 = 93;
    pub const SLRI: u32 = 94;
    pub const CGI: u32 = 95;
    pub const CSI: u32 = 96;
    pub const FG: u32 = 97;
    pub const FN: u32 = 98;
    pub const NOIB: u32 = 99;
    pub const WVTXM: u32 = 100;
    pub const WVTAT: u32 = 101;
    pub const PADS: u32 = 102;
    pub const PADG: u32 = 103;
    pub const FO: u32 = 104;
    pub const FC: u32 = 105;
    pub const FR: u32 = 106;
    pub const FW: u32 = 107;
    pub const FS: u32 = 108;
    pub const FL: u32 = 109;
    pub const SHELL: u32 = 110;
    pub const BSPIC: u32 = 111;
    pub const BSPIO: u32 = 112;
    pub const BSPIX: u32 = 113;
    pub const BSCX: u32 = 114;
    pub const EVM: u32 = 115;
    pub const EVT: u32 = 116;
    pub const PROCU: u32 = 117;
}

/// GPIO mode values for `MODES`.
pub const MODE_INPUT: u32 = 0;
/// GPIO mode values for `MODES`.
pub const MODE_OUTPUT: u32 = 1;

/// Pull values for `PUD`.
pub const PUD_OFF: u32 = 0;
/// Pull values for `PUD`.
pub const PUD_DOWN: u32 = 1;
/// Pull values for `PUD`.
pub const PUD_UP: u32 = 2;

/// File open mode bits for `FO`.
pub const FILE_READ: u32 = 1;
/// File open mode bits for `FO`.
pub const FILE_WRITE: u32 = 2;
/// File open mode bits for `FO`.
pub const FILE_CREATE: u32 = 8;
/// File open mode bits for `FO`.
pub const FILE_TRUNC: u32 = 16;

static OPCODE_NAMES: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    use op::*;
    let table: &[(u32, &'static str)] = &[
        (MODES, "MODES"),
        (MODEG, "MODEG"),
        (PUD, "PUD"),
        (READ, "READ"),
        (WRITE, "WRITE"),
        (PWM, "PWM"),
        (PRS, "PRS"),
        (PFS, "PFS"),
        (SERVO, "SERVO"),
        (WDOG, "WDOG"),
        (BR1, "BR1"),
        (BR2, "BR2"),
        (BW1, "BW1"),
        (BW2, "BW2"),
        (BC1, "BC1"),
        (BC2, "BC2"),
        (BS1, "BS1"),
        (BS2, "BS2"),
        (TICK, "TICK"),
        (HWVER, "HWVER"),
        (NO, "NO"),
        (NB, "NB"),
        (NP, "NP"),
        (NC, "NC"),
        (PRG, "PRG"),
        (PFG, "PFG"),
        (PRRG, "PRRG"),
        (HELP, "HELP"),
        (PIGPV, "PIGPV"),
        (WVCLR, "WVCLR"),
        (WVAG, "WVAG"),
        (WVAS, "WVAS"),
        (WVBSY, "WVBSY"),
        (WVHLT, "WVHLT"),
        (WVSM, "WVSM"),
        (WVSP, "WVSP"),
        (WVSC, "WVSC"),
        (TRIG, "TRIG"),
        (PROC, "PROC"),
        (PROCD, "PROCD"),
        (PROCR, "PROCR"),
        (PROCS, "PROCS"),
        (SLRO, "SLRO"),
        (SLR, "SLR"),
        (SLRC, "SLRC"),
        (PROCP, "PROCP"),
        (MICS, "MICS"),
        (MILS, "MILS"),
        (PARSE, "PARSE"),
        (WVCRE, "WVCRE"),
        (WVDEL, "WVDEL"),
        (WVTX, "WVTX"),
        (WVTXR, "WVTXR"),
        (WVNEW, "WVNEW"),
        (I2CO, "I2CO"),
        (I2CC, "I2CC"),
        (I2CRD, "I2CRD"),
        (I2CWD, "I2CWD"),
        (I2CWQ, "I2CWQ"),
        (I2CRS, "I2CRS"),
        (I2CWS, "I2CWS"),
        (I2CRB, "I2CRB"),
        (I2CWB, "I2CWB"),
        (I2CRW, "I2CRW"),
        (I2CWW, "I2CWW"),
        (I2CRK, "I2CRK"),
        (I2CWK, "I2CWK"),
        (I2CRI, "I2CRI"),
        (I2CWI, "I2CWI"),
        (I2CPC, "I2CPC"),
        (I2CPK, "I2CPK"),
        (SPIO, "SPIO"),
        (SPIC, "SPIC"),
        (SPIR, "SPIR"),
        (SPIW, "SPIW"),
        (SPIX, "SPIX"),
        (SERO, "SERO"),
        (SERC, "SERC"),
        (SERRB, "SERRB"),
        (SERWB, "SERWB"),
        (SERR, "SERR"),
        (SERW, "SERW"),
        (SERDA, "SERDA"),
        (GDC, "GDC"),
        (GPW, "GPW"),
        (HC, "HC"),
        (HP, "HP"),
        (CF1, "CF1"),
        (CF2, "CF2"),
        (BI2CC, "BI2CC"),
        (BI2CO, "BI2CO"),
        (BI2CZ, "BI2CZ"),
        (I2CZ, "I2CZ"),
        (WVCHA, "WVCHA"),
        (SLRI, "SLRI"),
        (CGI, "CGI"),
        (CSI, "CSI"),
        (FG, "FG"),
        (FN, "FN"),
        (NOIB, "NOIB"),
        (WVTXM, "WVTXM"),
        (WVTAT, "WVTAT"),
        (PADS, "PADS"),
        (PADG, "PADG"),
        (FO, "FO"),
        (FC, "FC"),
        (FR, "FR"),
        (FW, "FW"),
        (FS, "FS"),
        (FL, "FL"),
        (SHELL, "SHELL"),
        (BSPIC, "BSPIC"),
        (BSPIO, "BSPIO"),
        (BSPIX, "BSPIX"),
        (BSCX, "BSCX"),
        (EVM, "EVM"),
        (EVT, "EVT"),
        (PROCU, "PROCU"),
    ];
    table.iter().copied().collect()
});

/// Look up the mnemonic for an opcode.
pub fn opcode_name(opcode: u32) -> Option<&'static str> {
    OPCODE_NAMES.get(&opcode).copied()
}

/// Iterate all known opcodes as (number, mnemonic), sorted by number.
pub fn opcode_table() -> Vec<(u32, &'static str)> {
    let mut v: Vec<_> = OPCODE_NAMES.iter().map(|(k, v)| (*k, *v)).collect();
    v.sort_unstable_by_key(|(k, _)| *k);
    v
}

/// Opcodes whose response word is an unsigned value that cannot fail.
pub fn is_unsigned_result(opcode: u32) -> bool {
    matches!(opcode, op::BR1 | op::BR2 | op::TICK | op::HWVER | op::PIGPV)
}

/// Opcodes whose response carries `status` extra bytes after the header.
pub fn is_extended_reply(opcode: u32) -> bool {
    matches!(
        opcode,
        op::SLR
            | op::PROCP
            | op::I2CRD
            | op::I2CRK
            | op::I2CRI
            | op::I2CPK
            | op::I2CZ
            | op::BI2CZ
            | op::BSPIX
            | op::BSCX
            | op::SPIR
            | op::SPIX
            | op::SERR
            | op::CF2
            | op::FR
            | op::FL
    )
}

// ============================================================================
// Request / reply frames
// ============================================================================

/// One command, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Opcode from [`op`].
    pub opcode: u32,
    /// First parameter.
    pub p1: u32,
    /// Second parameter.
    pub p2: u32,
    /// Variable-length byte string parameter (empty for most commands).
    pub ext: Vec<u8>,
}

impl Request {
    /// Create a command with two word parameters.
    pub fn new(opcode: u32, p1: u32, p2: u32) -> Self {
        Self {
            opcode,
            p1,
            p2,
            ext: Vec::new(),
        }
    }

    /// Attach a byte string parameter.
    #[must_use]
    pub fn with_ext(mut self, ext: impl Into<Vec<u8>>) -> Self {
        self.ext = ext.into();
        self
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ext.len());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&self.p1.to_le_bytes());
        out.extend_from_slice(&self.p2.to_le_bytes());
        out.extend_from_slice(&(self.ext.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.ext);
        out
    }
}

/// One decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Echoed opcode (the correlation key under the single in-flight
    /// invariant).
    pub opcode: u32,
    /// Echoed first parameter.
    pub p1: u32,
    /// Echoed second parameter.
    pub p2: u32,
    /// Raw fourth header word: signed status, or an unsigned value for
    /// the opcodes in [`is_unsigned_result`].
    pub result: u32,
    /// Extended payload (empty unless the opcode is in
    /// [`is_extended_reply`] and the status was positive).
    pub ext: Vec<u8>,
}

impl Reply {
    /// Signed status. Always zero for unsigned-result opcodes.
    pub fn status(&self) -> i32 {
        if is_unsigned_result(self.opcode) {
            0
        } else {
            self.result as i32
        }
    }

    /// Raw unsigned result word.
    pub fn value(&self) -> u32 {
        self.result
    }

    /// Extended payload interpreted as UTF-8 text (lossy).
    pub fn ext_text(&self) -> String {
        String::from_utf8_lossy(&self.ext).into_owned()
    }
}

/// Decode one response from the front of `buf`.
///
/// Returns `Ok(None)` when fewer bytes than the declared total are
/// buffered (consume nothing, retry after more data); otherwise the
/// consumed byte count and the reply.
pub fn decode(buf: &[u8]) -> Result<Option<(usize, Reply)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let opcode = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let p1 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let p2 = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let result = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

    if opcode_name(opcode).is_none() {
        return Err(ClientError::protocol(format!(
            "unknown opcode {} in response header",
            opcode
        )));
    }

    let ext_len = if is_extended_reply(opcode) && (result as i32) > 0 {
        result as usize
    } else {
        0
    };
    if ext_len > MAX_EXT_LEN {
        return Err(ClientError::protocol(format!(
            "extended response of {} bytes exceeds limit",
            ext_len
        )));
    }

    let total = HEADER_LEN + ext_len;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((
        total,
        Reply {
            opcode,
            p1,
            p2,
            result,
            ext: buf[HEADER_LEN..total].to_vec(),
        },
    )))
}

/// Decode one command from the front of `buf` (server side of the wire,
/// used by tests and tooling).
pub fn decode_request(buf: &[u8]) -> Result<Option<(usize, Request)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let opcode = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let p1 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let p2 = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let ext_len = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;

    if opcode_name(opcode).is_none() {
        return Err(ClientError::protocol(format!(
            "unknown opcode {} in command header",
            opcode
        )));
    }
    if ext_len > MAX_EXT_LEN {
        return Err(ClientError::protocol(format!(
            "command extension of {} bytes exceeds limit",
            ext_len
        )));
    }

    let total = HEADER_LEN + ext_len;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((
        total,
        Request {
            opcode,
            p1,
            p2,
            ext: buf[HEADER_LEN..total].to_vec(),
        },
    )))
}

// ============================================================================
// Error table
// ============================================================================

static ERROR_TEXT: Lazy<HashMap<i32, &'static str>> = Lazy::new(|| {
    let table: &[(i32, &'static str)] = &[
        (-1, "daemon initialisation failed"),
        (-2, "GPIO not 0-31"),
        (-3, "GPIO not 0-53"),
        (-4, "mode not 0-7"),
        (-5, "pulsewidth not 0 or 500-2500"),
        (-6, "dutycycle outside set range"),
        (-7, "timer not 0-9"),
        (-8, "ms not 10-60000"),
        (-9, "timetype not 0-1"),
        (-10, "seconds < 0"),
        (-11, "micros not 0-999999"),
        (-12, "timer failed to start"),
        (-13, "timer mode not 0-1"),
        (-14, "memory allocation failed"),
        (-15, "no notification handle available"),
        (-16, "bad notification handle"),
        (-17, "bad watchdog timeout"),
        (-19, "clock peripheral not 0-1"),
        (-21, "clock micros not 1, 2, 4, 5, 8 or 10"),
        (-22, "buf millis not 100-10000"),
        (-24, "dutycycle range not 25-40000"),
        (-25, "signum not 0-63"),
        (-26, "can't open pathname"),
        (-27, "no handle available"),
        (-28, "unknown handle"),
        (-29, "ifFlags > 4"),
        (-30, "DMA channel not 0-15"),
        (-31, "socket/pipe message too big"),
        (-32, "bad memory allocation mode"),
        (-33, "too many sub commands"),
        (-34, "too many pipes"),
        (-35, "pulse time not 1-100"),
        (-36, "script has unresolved tag"),
        (-37, "unknown script id"),
        (-38, "add serial data offset > 30 minutes"),
        (-39, "GPIO already in use"),
        (-40, "must read at least a byte at a time"),
        (-41, "script parameter id not 0-9"),
        (-42, "script has duplicate tag"),
        (-43, "script has too many tags"),
        (-44, "illegal script command"),
        (-45, "script variable id not 0-149"),
        (-46, "no more room for scripts"),
        (-47, "can't allocate temporary memory"),
        (-48, "socket read failed"),
        (-49, "socket write failed"),
        (-50, "too many script parameters (> 10)"),
        (-51, "script initialising"),
        (-52, "script has unresolved variable"),
        (-53, "script halted"),
        (-54, "bad tag"),
        (-55, "bad MICS delay (too large)"),
        (-56, "bad MILS delay (too large)"),
        (-57, "non existent wave id"),
        (-58, "no more CBs for waveform"),
        (-59, "no more OOL for waveform"),
        (-60, "attempt to create an empty waveform"),
        (-61, "no more waveforms"),
        (-62, "can't open I2C device"),
        (-63, "can't open serial device"),
        (-64, "can't open SPI device"),
        (-65, "bad I2C bus"),
        (-66, "bad I2C address"),
        (-67, "bad SPI channel"),
        (-68, "bad peripheral flags"),
        (-69, "bad SPI speed"),
        (-70, "bad serial device name"),
        (-71, "bad serial baud rate"),
        (-72, "bad parameter"),
        (-73, "i2c write failed"),
        (-74, "i2c read failed"),
        (-75, "bad SPI count"),
        (-76, "ser write failed"),
        (-77, "ser read failed"),
        (-78, "ser read no data available"),
        (-79, "unknown command"),
        (-80, "spi xfer/read/write failed"),
        (-81, "bad pointer"),
        (-82, "no auxiliary SPI on Pi A or B"),
        (-83, "GPIO is not in use for PWM"),
        (-84, "GPIO is not in use for servo pulses"),
        (-85, "GPIO has no hardware clock"),
        (-86, "GPIO has no hardware PWM"),
        (-87, "invalid hardware PWM frequency"),
        (-88, "hardware PWM dutycycle not 0-1M"),
        (-89, "invalid hardware clock frequency"),
        (-90, "need password to use hardware clock 1"),
        (-91, "illegal, PWM in use for main clock"),
        (-92, "serial data bits not 1-32"),
        (-93, "serial (half) stop bits not 2-8"),
        (-94, "socket/pipe message too big"),
        (-95, "bad memory allocation mode"),
        (-96, "too many I2C transaction segments"),
        (-97, "an I2C transaction segment failed"),
        (-98, "SMBus command not supported by driver"),
        (-99, "no bit bang I2C in progress on GPIO"),
        (-100, "bad I2C write length"),
        (-101, "bad I2C read length"),
        (-102, "bad I2C command"),
        (-103, "bad I2C baud rate, not 50-500k"),
        (-104, "bad chain loop count"),
        (-105, "empty chain loop"),
        (-106, "too many chain counters"),
        (-107, "bad chain command"),
        (-108, "bad chain delay micros"),
        (-109, "chain counters nested too deeply"),
        (-110, "chain is too long"),
        (-111, "deprecated function removed"),
        (-112, "bit bang serial invert not 0 or 1"),
        (-113, "bad ISR edge value, not 0-2"),
        (-114, "bad ISR initialisation"),
        (-115, "loop forever must be last command"),
        (-116, "bad filter parameter"),
        (-117, "bad pad number"),
        (-118, "bad pad drive strength"),
        (-119, "file open failed"),
        (-120, "bad file mode"),
        (-121, "bad file flag"),
        (-122, "bad file read"),
        (-123, "bad file write"),
        (-124, "file not open for read"),
        (-125, "file not open for write"),
        (-126, "bad file seek"),
        (-127, "no files match pattern"),
        (-128, "no permission to access file"),
        (-129, "file is a directory"),
        (-130, "bad shell return status"),
        (-131, "bad script name"),
        (-132, "bad SPI baud rate, not 50-500k"),
        (-133, "no bit bang SPI in progress on GPIO"),
        (-134, "bad event id"),
        (-135, "used by BSC"),
        (-136, "GPIO is a BSC slave GPIO"),
        (-137, "bad event request"),
        (-138, "bad GPIO timeout"),
        (-139, "bad notification pause"),
        (-140, "daemon is shutting down"),
        (-141, "bad sample rate"),
        (-142, "bad notification begin mask"),
        (-143, "command socket closed by peer"),
        (-144, "notification socket closed by peer"),
        (-145, "daemon resource limit reached"),
        (-146, "operation not permitted for remote client"),
    ];
    table.iter().copied().collect()
});

/// Map a daemon status code to a human-readable message.
///
/// Unmapped codes fall back to the bare numeric string.
pub fn error_message(code: i32) -> String {
    match ERROR_TEXT.get(&code) {
        Some(msg) => (*msg).to_string(),
        None => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let req = Request::new(op::WRITE, 17, 1);
        let bytes = req.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &17u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0u32.to_le_bytes());
    }

    #[test]
    fn test_encode_with_ext() {
        let req = Request::new(op::FO, FILE_READ, 0).with_ext(b"/tmp/data".to_vec());
        let bytes = req.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 9);
        assert_eq!(&bytes[12..16], &9u32.to_le_bytes());
        assert_eq!(&bytes[16..], b"/tmp/data");
    }

    #[test]
    fn test_request_roundtrip() {
        let req = Request::new(op::PROC, 0, 0).with_ext(b"tag 0 w 17 1".to_vec());
        let bytes = req.encode();
        let (consumed, decoded) = decode_request(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_decode_roundtrips_status() {
        // A WRITE response echoing parameters with status 0.
        let mut wire = Vec::new();
        wire.extend_from_slice(&op::WRITE.to_le_bytes());
        wire.extend_from_slice(&17u32.to_le_bytes());
        wire.extend_from_slice(&1u32.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());

        let (consumed, reply) = decode(&wire).unwrap().unwrap();
        assert_eq!(consumed, HEADER_LEN);
        assert_eq!(reply.opcode, op::WRITE);
        assert_eq!(reply.status(), 0);
    }

    #[test]
    fn test_decode_negative_status() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&op::WDOG.to_le_bytes());
        wire.extend_from_slice(&17u32.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&(-17i32).to_le_bytes());

        let (_, reply) = decode(&wire).unwrap().unwrap();
        assert_eq!(reply.status(), -17);
        assert_eq!(error_message(reply.status()), "bad watchdog timeout");
    }

    #[test]
    fn test_decode_unsigned_result() {
        // TICK returns a free-running counter above i32::MAX; it must not
        // be mistaken for an error.
        let mut wire = Vec::new();
        wire.extend_from_slice(&op::TICK.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&0xF000_0000u32.to_le_bytes());

        let (_, reply) = decode(&wire).unwrap().unwrap();
        assert_eq!(reply.status(), 0);
        assert_eq!(reply.value(), 0xF000_0000);
    }

    #[test]
    fn test_decode_extended_reply() {
        let payload = b"hello from file";
        let mut wire = Vec::new();
        wire.extend_from_slice(&op::FR.to_le_bytes());
        wire.extend_from_slice(&1u32.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        wire.extend_from_slice(payload);

        let (consumed, reply) = decode(&wire).unwrap().unwrap();
        assert_eq!(consumed, HEADER_LEN + payload.len());
        assert_eq!(reply.ext, payload);
        assert_eq!(reply.ext_text(), "hello from file");
    }

    #[test]
    fn test_decode_incomplete_consumes_nothing() {
        let payload = b"partial";
        let mut wire = Vec::new();
        wire.extend_from_slice(&op::FR.to_le_bytes());
        wire.extend_from_slice(&1u32.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        wire.extend_from_slice(payload);

        // Truncated header.
        assert!(decode(&wire[..10]).unwrap().is_none());
        // Header complete but extension missing.
        assert!(decode(&wire[..HEADER_LEN + 3]).unwrap().is_none());
        // Full frame decodes.
        assert!(decode(&wire).unwrap().is_some());
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&9999u32.to_le_bytes());
        wire.extend_from_slice(&[0u8; 12]);
        assert!(decode(&wire).is_err());
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(error_message(-2), "GPIO not 0-31");
        assert_eq!(error_message(-9999), "-9999");
    }

    #[test]
    fn test_opcode_table_size() {
        assert!(opcode_table().len() >= 110);
        assert_eq!(opcode_name(op::NOIB), Some("NOIB"));
        assert_eq!(opcode_name(4242), None);
    }
}
