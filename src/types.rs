//! Types for RFID operations

use std::fmt;
use std::time::Duration;

use crate::error::UhfError;

/// One tag detected during an inventory round
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagRecord {
    /// Raw EPC bytes as reported by the reader
    pub epc: Vec<u8>,
}

impl TagRecord {
    pub fn new(epc: impl Into<Vec<u8>>) -> Self {
        Self { epc: epc.into() }
    }

    /// Parse an EPC written as hex, with or without separating spaces
    pub fn from_hex(hex: &str) -> Result<Self, UhfError> {
        hex_to_bytes(hex).map(Self::new)
    }

    /// EPC length in bytes
    pub fn len(&self) -> usize {
        self.epc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epc.is_empty()
    }

    /// EPC length in 16-bit words, as the reader counts it
    pub fn word_len(&self) -> usize {
        self.epc.len() / 2
    }

    /// Uppercase hex without separators
    pub fn epc_hex(&self) -> String {
        bytes_to_hex(&self.epc)
    }
}

impl fmt::Display for TagRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.epc_hex())
    }
}

/// How `write_epc` picks the tag to rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSelector {
    /// The tag currently reporting this EPC
    Epc(Vec<u8>),
    /// Whatever single tag is in range; rejected when there are several
    SoleTag,
}

/// Tag memory banks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryBank {
    /// Kill and access passwords
    Reserved = 0x00,
    Epc = 0x01,
    Tid = 0x02,
    User = 0x03,
}

impl TryFrom<u8> for MemoryBank {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MemoryBank::Reserved),
            0x01 => Ok(MemoryBank::Epc),
            0x02 => Ok(MemoryBank::Tid),
            0x03 => Ok(MemoryBank::User),
            other => Err(other),
        }
    }
}

/// Reader work mode: when it reports tag detections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkMode {
    /// Tags are reported only in answer to an inventory command
    Answer = 0x00,
    /// The reader scans on its own and pushes inventory frames
    Active = 0x01,
    /// Scans while the trigger input is low
    TriggerLow = 0x02,
    /// Scans while the trigger input is high
    TriggerHigh = 0x03,
}

impl TryFrom<u8> for WorkMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(WorkMode::Answer),
            0x01 => Ok(WorkMode::Active),
            0x02 => Ok(WorkMode::TriggerLow),
            0x03 => Ok(WorkMode::TriggerHigh),
            other => Err(other),
        }
    }
}

/// What the reader inventories while in active or trigger mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InventoryMemoryBank {
    Password = 0x00,
    Epc = 0x01,
    Tid = 0x02,
    User = 0x03,
    InventoryMultiple = 0x04,
    InventorySingle = 0x05,
    EasAlarm = 0x06,
}

impl TryFrom<u8> for InventoryMemoryBank {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(InventoryMemoryBank::Password),
            0x01 => Ok(InventoryMemoryBank::Epc),
            0x02 => Ok(InventoryMemoryBank::Tid),
            0x03 => Ok(InventoryMemoryBank::User),
            0x04 => Ok(InventoryMemoryBank::InventoryMultiple),
            0x05 => Ok(InventoryMemoryBank::InventorySingle),
            0x06 => Ok(InventoryMemoryBank::EasAlarm),
            other => Err(other),
        }
    }
}

/// Air protocol selected in the mode-state byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Iso18000_6C,
    Iso18000_6B,
}

/// Output interface selected in the mode-state byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputInterface {
    Wiegand,
    Rs232Rs485,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiegandFormat {
    Bits26,
    Bits34,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiegandBitOrder {
    HighBitFirst,
    LowBitFirst,
}

/// Wiegand output settings, reported by get-work-mode only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WiegandParams {
    pub format: WiegandFormat,
    pub bit_order: WiegandBitOrder,
    /// Interval between two outputs, in 10 ms units
    pub data_interval: u8,
    /// Pulse width, in 10 µs units
    pub pulse_width: u8,
    /// Pulse interval, in 10 µs units
    pub pulse_interval: u8,
}

impl WiegandParams {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            format: if bytes[0] & 0x01 == 0 {
                WiegandFormat::Bits26
            } else {
                WiegandFormat::Bits34
            },
            bit_order: if bytes[0] & 0x02 == 0 {
                WiegandBitOrder::HighBitFirst
            } else {
                WiegandBitOrder::LowBitFirst
            },
            data_interval: bytes[1],
            pulse_width: bytes[2],
            pulse_interval: bytes[3],
        }
    }
}

/// Work mode parameter block.
///
/// The six bytes from `mode` through `tag_time` are what set-work-mode sends;
/// get-work-mode additionally reports the Wiegand settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkModeParams {
    pub mode: WorkMode,
    /// Raw mode-state bits, see the accessors
    pub mode_state: u8,
    pub mem_bank: InventoryMemoryBank,
    /// First word to report in active mode
    pub first_word: u8,
    /// Words to report in active mode
    pub word_count: u8,
    /// Single-tag filter time, in seconds
    pub tag_time: u8,
    pub wiegand: Option<WiegandParams>,
}

impl WorkModeParams {
    const PROTOCOL_6B: u8 = 0x01;
    const OUTPUT_RS232: u8 = 0x02;
    const BEEP_OFF: u8 = 0x04;

    /// Defaults for `mode`: EPC inventory over RS232/485, beeper on
    pub fn for_mode(mode: WorkMode) -> Self {
        Self {
            mode,
            mode_state: Self::OUTPUT_RS232,
            mem_bank: InventoryMemoryBank::Epc,
            first_word: 0x00,
            word_count: 0x01,
            tag_time: 0x00,
            wiegand: None,
        }
    }

    /// Decode a get-work-mode payload: `[wg×4][mode][state][mem][first][count][time]...`
    pub fn from_response(data: &[u8]) -> Result<Self, UhfError> {
        if data.len() < 10 {
            return Err(UhfError::MalformedResponse(format!(
                "Work mode payload is {} bytes, expected at least 10",
                data.len()
            )));
        }

        let mode = WorkMode::try_from(data[4])
            .map_err(|code| UhfError::MalformedResponse(format!("Unknown work mode: 0x{:02X}", code)))?;
        let mem_bank = InventoryMemoryBank::try_from(data[6]).map_err(|code| {
            UhfError::MalformedResponse(format!("Unknown inventory memory bank: 0x{:02X}", code))
        })?;

        Ok(Self {
            mode,
            mode_state: data[5],
            mem_bank,
            first_word: data[7],
            word_count: data[8],
            tag_time: data[9],
            wiegand: Some(WiegandParams::from_bytes([data[0], data[1], data[2], data[3]])),
        })
    }

    /// Encode the set-work-mode payload
    pub fn to_bytes(&self) -> [u8; 6] {
        [
            self.mode as u8,
            self.mode_state,
            self.mem_bank as u8,
            self.first_word,
            self.word_count,
            self.tag_time,
        ]
    }

    pub fn protocol(&self) -> Protocol {
        if self.mode_state & Self::PROTOCOL_6B == 0 {
            Protocol::Iso18000_6C
        } else {
            Protocol::Iso18000_6B
        }
    }

    pub fn output(&self) -> OutputInterface {
        if self.mode_state & Self::OUTPUT_RS232 == 0 {
            OutputInterface::Wiegand
        } else {
            OutputInterface::Rs232Rs485
        }
    }

    pub fn beep_enabled(&self) -> bool {
        self.mode_state & Self::BEEP_OFF == 0
    }
}

/// Live connection state, owned by the reader that opened it
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSession {
    pub port: String,
    pub baud: u32,
    pub timeout: Duration,
    /// Address the reader answers from
    pub address: u8,
    /// Last power level the reader acknowledged
    pub power: Option<u8>,
    /// Last work mode read from or acknowledged by the reader
    pub work_mode: Option<WorkMode>,
}

/// Convert bytes to uppercase hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Parse hex digits, ignoring whitespace
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, UhfError> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(UhfError::InvalidArgument(format!(
            "Hex string has an odd number of digits: {}",
            hex
        )));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16);
            let lo = pair[1].to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => Err(UhfError::InvalidArgument(format!("Not a hex string: {}", hex))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_record_hex() {
        let tag = TagRecord::new(vec![0xE2, 0x00, 0x34, 0x12]);
        assert_eq!(tag.epc_hex(), "E2003412");
        assert_eq!(tag.to_string(), "E2003412");
        assert_eq!(tag.word_len(), 2);
    }

    #[test]
    fn test_tag_record_from_hex() {
        let tag = TagRecord::from_hex("e2 00 34 12").unwrap();
        assert_eq!(tag.epc, vec![0xE2, 0x00, 0x34, 0x12]);
        assert!(TagRecord::from_hex("E20").is_err());
        assert!(TagRecord::from_hex("ZZ").is_err());
    }

    #[test]
    fn test_work_mode_try_from() {
        assert_eq!(WorkMode::try_from(0x00), Ok(WorkMode::Answer));
        assert_eq!(WorkMode::try_from(0x03), Ok(WorkMode::TriggerHigh));
        assert_eq!(WorkMode::try_from(0x04), Err(0x04));
    }

    #[test]
    fn test_work_mode_params_from_response() {
        let data = [0x01, 0x0A, 0x0F, 0x1E, 0x01, 0x06, 0x01, 0x02, 0x06, 0x03];
        let params = WorkModeParams::from_response(&data).unwrap();

        assert_eq!(params.mode, WorkMode::Active);
        assert_eq!(params.mem_bank, InventoryMemoryBank::Epc);
        assert_eq!(params.first_word, 0x02);
        assert_eq!(params.word_count, 0x06);
        assert_eq!(params.tag_time, 0x03);
        assert_eq!(params.protocol(), Protocol::Iso18000_6C);
        assert_eq!(params.output(), OutputInterface::Rs232Rs485);
        assert!(!params.beep_enabled());

        let wiegand = params.wiegand.unwrap();
        assert_eq!(wiegand.format, WiegandFormat::Bits34);
        assert_eq!(wiegand.bit_order, WiegandBitOrder::HighBitFirst);
        assert_eq!(wiegand.pulse_interval, 0x1E);
    }

    #[test]
    fn test_work_mode_params_rejects_short_payload() {
        assert!(matches!(
            WorkModeParams::from_response(&[0x00, 0x01, 0x02]),
            Err(UhfError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_work_mode_params_to_bytes() {
        let params = WorkModeParams::for_mode(WorkMode::Answer);
        assert_eq!(params.to_bytes(), [0x00, 0x02, 0x01, 0x00, 0x01, 0x00]);
        assert!(params.beep_enabled());
    }
}
