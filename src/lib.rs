//! Host-side driver for UHF RFID readers speaking the length-prefixed serial protocol.
//!
//! Frames look like `[LEN][ADDR][CMD][STATUS][DATA...][CRC_LO][CRC_HI]`, checked with
//! CRC-16/MCRF4XX. Replies may arrive split, late, or behind line noise; the
//! [`frame::FrameSync`] state machine finds them anyway.
//!
//! # Features
//!
//! - `serial` - Serial port transport for desktop using serialport crate (default)
//!
//! # Example
//!
//! ```ignore
//! use uhf_reader::{ReaderConfig, ScanConfig, Scanner, UhfReader};
//!
//! let config = ReaderConfig::load_from_file("reader.toml")?;
//! let mut reader = UhfReader::open(&config)?;
//! reader.set_power(20)?;
//!
//! for tag in reader.inventory()? {
//!     println!("Found tag: {}", tag);
//! }
//!
//! let mut scanner = Scanner::spawn(reader, ScanConfig::default())?;
//! let events = scanner.take_events().unwrap();
//! while let Ok(event) = events.recv() {
//!     println!("Round {}: {}", event.cycle, event.tag);
//! }
//! ```

pub mod checksum;
pub mod command;
pub mod frame;
pub mod response;

mod config;
mod error;
mod reader;
mod scanner;
mod transport;
mod types;

#[cfg(feature = "serial")]
mod serial;

#[cfg(test)]
mod mock;

// Re-exports
pub use config::{ReaderConfig, ScanConfig};
pub use error::UhfError;
pub use reader::{Diagnostics, ReaderState, UhfReader};
pub use scanner::{ScanSnapshot, ScanSummary, Scanner, ScannerHandle, TagEvent};
pub use transport::{FrameLink, RfidTransport};
pub use types::{
    InventoryMemoryBank, MemoryBank, OutputInterface, Protocol, ReaderSession, TagRecord,
    TagSelector, WiegandBitOrder, WiegandFormat, WiegandParams, WorkMode, WorkModeParams,
    bytes_to_hex, hex_to_bytes,
};

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
