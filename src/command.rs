//! Outbound command frames
//!
//! Every request is `[LEN][ADDR][CMD][DATA...][CRC_LO][CRC_HI]`, where `LEN`
//! counts the bytes that follow it, checksum included.

use crate::checksum;
use crate::error::UhfError;
use crate::types::{MemoryBank, WorkModeParams};

/// Address the host uses to reach whichever reader is on the line
pub const BROADCAST_ADDRESS: u8 = 0xFF;

// Command codes
pub const INVENTORY: u8 = 0x01;
pub const READ_MEMORY: u8 = 0x02;
pub const WRITE_MEMORY: u8 = 0x03;
pub const WRITE_EPC: u8 = 0x04;
pub const LOCK: u8 = 0x06;
pub const SET_POWER: u8 = 0x2F;
pub const SET_WORK_MODE: u8 = 0x35;
pub const GET_WORK_MODE: u8 = 0x36;

pub const MIN_POWER: i32 = 0;
pub const MAX_POWER: i32 = 30;

/// Largest payload that still fits the one-byte length field
pub const MAX_DATA_LEN: usize = 0xFF - 4;

/// EPCs longer than this do not fit the EPC bank's PC length bits
pub const MAX_EPC_LEN: usize = 62;

/// A request to the reader, built per call and serialized once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub address: u8,
    pub code: u8,
    pub data: Vec<u8>,
}

impl Command {
    /// Raw command to the broadcast address. Fails if `data` cannot fit the length byte.
    pub fn new(code: u8, data: Vec<u8>) -> Result<Self, UhfError> {
        if data.len() > MAX_DATA_LEN {
            return Err(UhfError::InvalidArgument(format!(
                "Command payload of {} bytes exceeds maximum of {}",
                data.len(),
                MAX_DATA_LEN
            )));
        }
        Ok(Self {
            address: BROADCAST_ADDRESS,
            code,
            data,
        })
    }

    /// Address a specific reader instead of broadcasting
    pub fn to_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn inventory() -> Self {
        Self {
            address: BROADCAST_ADDRESS,
            code: INVENTORY,
            data: Vec::new(),
        }
    }

    /// Inventory that also reports `word_count` TID words from `start_word`
    pub fn inventory_with_tid(start_word: u8, word_count: u8) -> Result<Self, UhfError> {
        if word_count == 0 || word_count > 15 {
            return Err(UhfError::InvalidArgument(format!(
                "TID word count must be 1-15, got {}",
                word_count
            )));
        }
        Self::new(INVENTORY, vec![start_word, word_count])
    }

    /// Set RF output power; `level` must be 0-30
    pub fn set_power(level: i32) -> Result<Self, UhfError> {
        if !(MIN_POWER..=MAX_POWER).contains(&level) {
            return Err(UhfError::InvalidArgument(format!(
                "Power level {} outside {}-{}",
                level, MIN_POWER, MAX_POWER
            )));
        }
        Self::new(SET_POWER, vec![level as u8])
    }

    pub fn get_work_mode() -> Self {
        Self {
            address: BROADCAST_ADDRESS,
            code: GET_WORK_MODE,
            data: Vec::new(),
        }
    }

    pub fn set_work_mode(params: &WorkModeParams) -> Self {
        Self {
            address: BROADCAST_ADDRESS,
            code: SET_WORK_MODE,
            data: params.to_bytes().to_vec(),
        }
    }

    /// Read `word_count` words from `bank` of the tag reporting `epc`
    pub fn read_memory(
        epc: &[u8],
        bank: MemoryBank,
        start_word: u8,
        word_count: u8,
        access_password: u32,
    ) -> Result<Self, UhfError> {
        check_words("EPC", epc)?;
        if word_count == 0 || word_count > 120 {
            return Err(UhfError::InvalidArgument(format!(
                "Read word count must be 1-120, got {}",
                word_count
            )));
        }

        let mut data = Vec::with_capacity(8 + epc.len());
        data.push((epc.len() / 2) as u8);
        data.extend_from_slice(epc);
        data.push(bank as u8);
        data.push(start_word);
        data.push(word_count);
        data.extend_from_slice(&access_password.to_be_bytes());
        Self::new(READ_MEMORY, data)
    }

    /// Write `words` to `bank` of the tag reporting `epc`, starting at `start_word`
    pub fn write_memory(
        epc: &[u8],
        bank: MemoryBank,
        start_word: u8,
        words: &[u8],
        access_password: u32,
    ) -> Result<Self, UhfError> {
        check_words("EPC", epc)?;
        check_words("Write data", words)?;

        let mut data = Vec::with_capacity(8 + epc.len() + words.len());
        data.push((words.len() / 2) as u8);
        data.push((epc.len() / 2) as u8);
        data.extend_from_slice(epc);
        data.push(bank as u8);
        data.push(start_word);
        data.extend_from_slice(words);
        data.extend_from_slice(&access_password.to_be_bytes());
        Self::new(WRITE_MEMORY, data)
    }

    /// Replace the EPC of the single tag in the field, PC word included
    pub fn write_epc(new_epc: &[u8], access_password: u32) -> Result<Self, UhfError> {
        check_epc(new_epc)?;

        let mut data = Vec::with_capacity(5 + new_epc.len());
        data.push((new_epc.len() / 2) as u8);
        data.extend_from_slice(&access_password.to_be_bytes());
        data.extend_from_slice(new_epc);
        Self::new(WRITE_EPC, data)
    }

    /// Set or clear protection on one area of the tag reporting `epc`
    ///
    /// `select` picks the area (0 kill password, 1 access password, 2 EPC,
    /// 3 TID, 4 user), `protect` the protection level (0-3).
    pub fn lock(epc: &[u8], select: u8, protect: u8, access_password: u32) -> Result<Self, UhfError> {
        check_words("EPC", epc)?;
        if select > 4 {
            return Err(UhfError::InvalidArgument(format!("Lock area must be 0-4, got {}", select)));
        }
        if protect > 3 {
            return Err(UhfError::InvalidArgument(format!(
                "Lock protection must be 0-3, got {}",
                protect
            )));
        }

        let mut data = Vec::with_capacity(7 + epc.len());
        data.push((epc.len() / 2) as u8);
        data.extend_from_slice(epc);
        data.push(select);
        data.push(protect);
        data.extend_from_slice(&access_password.to_be_bytes());
        Self::new(LOCK, data)
    }

    /// Complete wire frame, checksum appended
    pub fn serialize(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(5 + self.data.len());
        frame.push((4 + self.data.len()) as u8);
        frame.push(self.address);
        frame.push(self.code);
        frame.extend_from_slice(&self.data);
        checksum::append(&mut frame);
        frame
    }
}

/// Word-aligned, non-empty, and short enough for the EPC bank
pub(crate) fn check_epc(epc: &[u8]) -> Result<(), UhfError> {
    check_words("EPC", epc)?;
    if epc.len() > MAX_EPC_LEN {
        return Err(UhfError::InvalidArgument(format!(
            "EPC of {} bytes exceeds maximum of {}",
            epc.len(),
            MAX_EPC_LEN
        )));
    }
    Ok(())
}

fn check_words(what: &str, bytes: &[u8]) -> Result<(), UhfError> {
    if bytes.is_empty() {
        return Err(UhfError::InvalidArgument(format!("{} cannot be empty", what)));
    }
    if bytes.len() % 2 != 0 {
        return Err(UhfError::InvalidArgument(format!(
            "{} length must be even (word-aligned), got {} bytes",
            what,
            bytes.len()
        )));
    }
    Ok(())
}
