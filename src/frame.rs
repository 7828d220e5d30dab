//! Inbound frames and byte-stream synchronization
//!
//! A reply is `[LEN][ADDR][CMD][STATUS?][DATA...][CRC_LO][CRC_HI]` with
//! `LEN + 1` bytes in total. The shortest frame the reader sends is five
//! bytes (no status byte); a plain status reply is six.
//!
//! The serial line regularly carries stray bytes between replies, so
//! [`FrameSync`] never assumes the first byte it sees is a length field. It
//! runs a small state machine over a bounded lookahead buffer:
//!
//! ```text
//! Seeking ──plausible LEN──▶ LengthKnown ──LEN+1 bytes──▶ Validating ──crc ok──▶ Done
//!    ▲                           │                            │
//!    └────────── Resync ◀────────┴── bad address ─────────────┴── crc mismatch
//! ```

use std::fmt;

use log::{debug, warn};

use crate::checksum;
use crate::error::UhfError;

/// Smallest legal frame: length, address, command and checksum
pub const MIN_FRAME_LEN: usize = 5;

/// Smallest legal value of the length byte
pub const MIN_LEN_FIELD: u8 = (MIN_FRAME_LEN - 1) as u8;

/// Address replies come from unless the reader was re-addressed
pub const DEFAULT_READER_ADDRESS: u8 = 0x00;

/// One complete, checksum-verified frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Validate a complete frame: length field, minimum size and checksum
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, UhfError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(UhfError::MalformedResponse(format!(
                "Frame of {} bytes is shorter than the {} byte minimum",
                bytes.len(),
                MIN_FRAME_LEN
            )));
        }
        if bytes[0] as usize + 1 != bytes.len() {
            return Err(UhfError::MalformedResponse(format!(
                "Length field 0x{:02X} does not match frame of {} bytes",
                bytes[0],
                bytes.len()
            )));
        }
        checksum::check(&bytes)?;
        Ok(Self { bytes })
    }

    pub fn len_field(&self) -> u8 {
        self.bytes[0]
    }

    pub fn address(&self) -> u8 {
        self.bytes[1]
    }

    pub fn command(&self) -> u8 {
        self.bytes[2]
    }

    /// Status byte; absent in five-byte frames
    pub fn status(&self) -> Option<u8> {
        if self.bytes.len() > MIN_FRAME_LEN {
            Some(self.bytes[3])
        } else {
            None
        }
    }

    /// Bytes between the status byte and the checksum
    pub fn data(&self) -> &[u8] {
        if self.bytes.len() > MIN_FRAME_LEN {
            &self.bytes[4..self.bytes.len() - 2]
        } else {
            &[]
        }
    }

    pub fn checksum(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_le_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:02X?})", self.bytes)
    }
}

/// Counters kept across the lifetime of a synchronizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames: u64,
    pub noise_bytes: u64,
    pub checksum_failures: u64,
    pub resyncs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Seeking,
    LengthKnown { total: usize },
    Validating { total: usize },
    Resync,
}

/// Noise-tolerant frame assembler
#[derive(Debug)]
pub struct FrameSync {
    buf: Vec<u8>,
    state: SyncState,
    address: u8,
    max_len_field: u8,
    lookahead: usize,
    stats: SyncStats,
}

impl FrameSync {
    /// Synchronizer for replies from `address`, accepting length fields up to `max_len_field`
    pub fn new(address: u8, max_len_field: u8) -> Self {
        let max_len_field = max_len_field.max(MIN_LEN_FIELD);
        Self {
            buf: Vec::with_capacity(64),
            state: SyncState::Seeking,
            address,
            max_len_field,
            lookahead: 2 * (max_len_field as usize + 1),
            stats: SyncStats::default(),
        }
    }

    /// Append received bytes; call [`FrameSync::next_frame`] afterwards
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);

        if self.buf.len() > self.lookahead {
            let excess = self.buf.len() - self.lookahead;
            warn!("Lookahead buffer full, dropping {} bytes", excess);
            self.discard(excess);
            self.state = SyncState::Seeking;
        }
    }

    /// Run the state machine until a frame is complete or more input is needed
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.state {
                SyncState::Seeking => {
                    let &head = self.buf.first()?;
                    if self.plausible_len(head) {
                        self.state = SyncState::LengthKnown {
                            total: head as usize + 1,
                        };
                    } else {
                        self.discard(1);
                    }
                }
                SyncState::LengthKnown { total } => {
                    if self.buf.len() >= 2 && self.buf[1] != self.address {
                        self.state = SyncState::Resync;
                    } else if self.buf.len() >= total {
                        self.state = SyncState::Validating { total };
                    } else if let Some(offset) = self.complete_frame_after_head() {
                        // A long bogus length is holding back a frame that is already here
                        self.stats.resyncs += 1;
                        self.discard(offset);
                        self.state = SyncState::Seeking;
                    } else {
                        return None;
                    }
                }
                SyncState::Validating { total } => {
                    if checksum::verify(&self.buf[..total]) {
                        let bytes: Vec<u8> = self.buf.drain(..total).collect();
                        self.state = SyncState::Seeking;
                        self.stats.frames += 1;
                        debug!("Received frame: {:02X?}", bytes);
                        return Some(Frame { bytes });
                    }
                    self.stats.checksum_failures += 1;
                    warn!("Checksum mismatch, resyncing: {:02X?}", &self.buf[..total]);
                    self.state = SyncState::Resync;
                }
                SyncState::Resync => {
                    self.stats.resyncs += 1;
                    self.discard(1);
                    self.state = SyncState::Seeking;
                }
            }
        }
    }

    /// Forget buffered bytes, e.g. before a new request
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = SyncState::Seeking;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    fn plausible_len(&self, byte: u8) -> bool {
        (MIN_LEN_FIELD..=self.max_len_field).contains(&byte)
    }

    /// Offset of the first complete, checksum-valid frame past the head byte
    fn complete_frame_after_head(&self) -> Option<usize> {
        (1..self.buf.len()).find(|&start| {
            let len = self.buf[start];
            if !self.plausible_len(len) {
                return false;
            }
            let end = start + len as usize + 1;
            end <= self.buf.len()
                && self.buf[start + 1] == self.address
                && checksum::verify(&self.buf[start..end])
        })
    }

    fn discard(&mut self, count: usize) {
        let count = count.min(self.buf.len());
        if count > 0 {
            debug!("Skipping {} noise bytes: {:02X?}", count, &self.buf[..count]);
        }
        self.stats.noise_bytes += count as u64;
        self.buf.drain(..count);
    }
}
