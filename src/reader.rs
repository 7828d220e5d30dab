use log::{debug, error, info, warn};

use crate::command::{self, Command};
use crate::config::ReaderConfig;
use crate::error::UhfError;
use crate::frame::SyncStats;
use crate::response::{Response, ResponseBody, status_description};
use crate::transport::{FrameLink, RfidTransport};
use crate::types::{
    MemoryBank, ReaderSession, TagRecord, TagSelector, WorkMode, WorkModeParams, bytes_to_hex,
};

/// Connection state of a [`UhfReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Disconnected,
    Connected,
    /// Owned by a running scanner loop
    Scanning,
    /// A power, mode or write operation is in progress
    Configuring,
}

/// Recoverable failures seen by this reader, plus the link's framing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub timeouts: u64,
    pub checksum_failures: u64,
    pub malformed_responses: u64,
    /// Inventory rounds that ended in a recoverable error and reported no tags
    pub discarded_cycles: u64,
    pub link: SyncStats,
}

pub struct UhfReader<T: RfidTransport> {
    link: FrameLink<T>,
    session: ReaderSession,
    state: ReaderState,
    diagnostics: Diagnostics,
}

#[cfg(feature = "serial")]
impl UhfReader<crate::serial::SerialTransport> {
    /// Open the serial port named in `config` and connect to the reader on it
    pub fn open(config: &ReaderConfig) -> Result<Self, UhfError> {
        config.validate()?;
        let transport = crate::serial::SerialTransport::open(&config.port, config.baud, config.timeout())?;
        Self::connect(transport, config)
    }
}

impl<T: RfidTransport> UhfReader<T> {
    /// Take over `transport` and confirm a reader answers on it.
    ///
    /// Queries the work mode up to `config.connect_attempts` times; fails with
    /// [`UhfError::DeviceNotResponding`] if none of the attempts gets a valid reply.
    pub fn connect(transport: T, config: &ReaderConfig) -> Result<Self, UhfError> {
        config.validate()?;

        let mut reader = Self {
            link: FrameLink::new(
                transport,
                config.reader_address,
                config.max_frame_len,
                config.max_resync,
            ),
            session: ReaderSession {
                port: config.port.clone(),
                baud: config.baud,
                timeout: config.timeout(),
                address: config.reader_address,
                power: None,
                work_mode: None,
            },
            state: ReaderState::Connected,
            diagnostics: Diagnostics::default(),
        };

        for attempt in 1..=config.connect_attempts {
            match reader.get_work_mode() {
                Ok(params) => {
                    info!(
                        "Connected to reader on {} at {} baud, work mode {:?}",
                        config.port, config.baud, params.mode
                    );
                    return Ok(reader);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Connect attempt {}/{} failed: {}", attempt, config.connect_attempts, e),
            }
        }

        let _ = reader.disconnect();
        Err(UhfError::DeviceNotResponding {
            attempts: config.connect_attempts,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn session(&self) -> &ReaderSession {
        &self.session
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            link: self.link.stats(),
            ..self.diagnostics
        }
    }

    /// Run one inventory round.
    ///
    /// Timeouts, corrupted frames and undecodable replies count as a round
    /// with no tags; only a lost connection is reported as an error.
    pub fn inventory(&mut self) -> Result<Vec<TagRecord>, UhfError> {
        match self.try_inventory() {
            Err(e) if e.is_recoverable() => {
                self.diagnostics.discarded_cycles += 1;
                debug!("Inventory round discarded: {}", e);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Run one inventory round, reporting recoverable errors too
    pub fn try_inventory(&mut self) -> Result<Vec<TagRecord>, UhfError> {
        let response = self.exchange(&Command::inventory())?;
        Ok(response.into_tags())
    }

    /// Inventory that also reads `word_count` TID words starting at `start_word`
    pub fn inventory_with_tid(&mut self, start_word: u8, word_count: u8) -> Result<Vec<TagRecord>, UhfError> {
        let command = Command::inventory_with_tid(start_word, word_count)?;
        let response = self.exchange(&command)?;
        Ok(response.into_tags())
    }

    /// Set RF output power (0-30)
    pub fn set_power(&mut self, level: i32) -> Result<(), UhfError> {
        let command = Command::set_power(level)?;
        self.configure(|reader| {
            let response = reader.exchange(&command)?;
            expect_ack(&command, &response)?;
            reader.session.power = Some(level as u8);
            info!("Reader power set to {}", level);
            Ok(())
        })
    }

    pub fn get_work_mode(&mut self) -> Result<WorkModeParams, UhfError> {
        let command = Command::get_work_mode();
        let response = self.exchange(&command)?;
        match response.body {
            ResponseBody::WorkMode(params) => {
                self.session.work_mode = Some(params.mode);
                Ok(params)
            }
            _ => Err(rejected(&command, &response)),
        }
    }

    /// Switch work mode, keeping the default parameters for that mode
    pub fn set_work_mode(&mut self, mode: WorkMode) -> Result<(), UhfError> {
        self.set_work_mode_params(&WorkModeParams::for_mode(mode))
    }

    pub fn set_work_mode_params(&mut self, params: &WorkModeParams) -> Result<(), UhfError> {
        let command = Command::set_work_mode(params);
        self.configure(|reader| {
            let response = reader.exchange(&command)?;
            expect_ack(&command, &response)?;
            reader.session.work_mode = Some(params.mode);
            info!("Reader work mode set to {:?}", params.mode);
            Ok(())
        })
    }

    /// Read `word_count` words from `bank` of the tag reporting `epc`
    pub fn read_memory(
        &mut self,
        epc: &[u8],
        bank: MemoryBank,
        start_word: u8,
        word_count: u8,
        access_password: u32,
    ) -> Result<Vec<u8>, UhfError> {
        let command = Command::read_memory(epc, bank, start_word, word_count, access_password)?;
        let response = self.exchange(&command)?;
        match response.body {
            ResponseBody::MemoryData(data) if data.len() == word_count as usize * 2 => Ok(data),
            ResponseBody::MemoryData(data) => Err(UhfError::MalformedResponse(format!(
                "Asked for {} words, got {} bytes",
                word_count,
                data.len()
            ))),
            _ => Err(rejected(&command, &response)),
        }
    }

    /// Write `words` to `bank` of the tag reporting `epc`
    pub fn write_memory(
        &mut self,
        epc: &[u8],
        bank: MemoryBank,
        start_word: u8,
        words: &[u8],
        access_password: u32,
    ) -> Result<(), UhfError> {
        let command = Command::write_memory(epc, bank, start_word, words, access_password)?;
        self.configure(|reader| {
            let response = reader.exchange(&command)?;
            if response.is_success() {
                Ok(())
            } else {
                Err(write_rejected(&response))
            }
        })
    }

    /// Set protection on one area of the tag reporting `epc`
    pub fn lock(&mut self, epc: &[u8], select: u8, protect: u8, access_password: u32) -> Result<(), UhfError> {
        let command = Command::lock(epc, select, protect, access_password)?;
        self.configure(|reader| {
            let response = reader.exchange(&command)?;
            expect_ack(&command, &response)
        })
    }

    /// Give a tag a new EPC and confirm the reader sees it.
    ///
    /// The target is resolved with an inventory round first: an explicit EPC
    /// must be in range, and [`TagSelector::SoleTag`] refuses to pick one of
    /// several tags. After the write, another round must report `new_epc`.
    pub fn write_epc(
        &mut self,
        selector: &TagSelector,
        new_epc: &[u8],
        access_password: u32,
    ) -> Result<TagRecord, UhfError> {
        command::check_epc(new_epc)?;
        if let TagSelector::Epc(old) = selector {
            command::check_epc(old)?;
        }

        self.configure(|reader| {
            let in_range = reader
                .try_inventory()
                .map_err(|e| write_failed(e, "could not inventory the field"))?;

            let command = match selector {
                TagSelector::SoleTag => match in_range.len() {
                    0 => return Err(not_written("no tag in range")),
                    1 => Command::write_epc(new_epc, access_password)?,
                    n => return Err(not_written(&format!("{} tags in range, selection is ambiguous", n))),
                },
                TagSelector::Epc(old) => {
                    if !in_range.iter().any(|tag| &tag.epc == old) {
                        return Err(not_written(&format!("tag {} not in range", bytes_to_hex(old))));
                    }
                    if old.len() == new_epc.len() {
                        Command::write_memory(old, MemoryBank::Epc, EPC_WORD, new_epc, access_password)?
                    } else {
                        // The EPC length lives in the PC word, so rewrite it along with the
                        // EPC; the UMI, XI and NSI bits below the length are carried over
                        let current = reader
                            .read_memory(old, MemoryBank::Epc, PC_WORD, 1, access_password)
                            .map_err(|e| write_failed(e, "could not read the PC word"))?;
                        let flags = u16::from_be_bytes([current[0], current[1]]) & PC_FLAGS;
                        let pc = (((new_epc.len() / 2) as u16) << 11) | flags;
                        let mut words = pc.to_be_bytes().to_vec();
                        words.extend_from_slice(new_epc);
                        Command::write_memory(old, MemoryBank::Epc, PC_WORD, &words, access_password)?
                    }
                }
            };

            let response = reader
                .exchange(&command)
                .map_err(|e| write_failed(e, "no acknowledgement"))?;
            if !response.is_success() {
                return Err(write_rejected(&response));
            }

            let after = reader
                .try_inventory()
                .map_err(|e| write_failed(e, "could not verify"))?;
            if !after.iter().any(|tag| tag.epc == new_epc) {
                return Err(not_written(&format!(
                    "{} not observed after writing",
                    bytes_to_hex(new_epc)
                )));
            }

            info!("Tag rewritten to {}", bytes_to_hex(new_epc));
            Ok(TagRecord::new(new_epc))
        })
    }

    /// Close the transport. Further operations fail with [`UhfError::NotConnected`].
    pub fn disconnect(&mut self) -> Result<(), UhfError> {
        if self.state == ReaderState::Disconnected {
            return Ok(());
        }
        self.state = ReaderState::Disconnected;
        info!("Disconnecting from {}", self.session.port);
        self.link.close()
    }

    pub fn into_transport(self) -> T {
        self.link.into_transport()
    }

    pub(crate) fn set_scanning(&mut self, scanning: bool) {
        match (self.state, scanning) {
            (ReaderState::Connected, true) => self.state = ReaderState::Scanning,
            (ReaderState::Scanning, false) => self.state = ReaderState::Connected,
            _ => {}
        }
    }

    /// Run `op` in the Configuring state and return to the previous one
    fn configure<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R, UhfError>) -> Result<R, UhfError> {
        if self.state == ReaderState::Disconnected {
            return Err(UhfError::NotConnected);
        }
        let previous = self.state;
        self.state = ReaderState::Configuring;
        let result = op(self);
        if self.state == ReaderState::Configuring {
            self.state = previous;
        }
        result
    }

    /// Send one command and decode the reply to it
    fn exchange(&mut self, command: &Command) -> Result<Response, UhfError> {
        if self.state == ReaderState::Disconnected {
            return Err(UhfError::NotConnected);
        }

        let result = self.transact(command);
        if let Err(e) = &result {
            self.record(e);
        }
        result
    }

    fn transact(&mut self, command: &Command) -> Result<Response, UhfError> {
        self.link.clear()?;
        self.link.write_frame(&command.serialize())?;
        let frame = self.link.read_reply_to(command.code, self.session.timeout)?;
        Response::parse(&frame)
    }

    fn record(&mut self, e: &UhfError) {
        match e {
            UhfError::Timeout(_) => self.diagnostics.timeouts += 1,
            UhfError::ChecksumMismatch { .. } => self.diagnostics.checksum_failures += 1,
            UhfError::MalformedResponse(_) => {
                self.diagnostics.malformed_responses += 1;
                warn!("Discarding reply: {}", e);
            }
            e if e.is_fatal() => {
                error!("Connection to {} lost: {}", self.session.port, e);
                self.state = ReaderState::Disconnected;
                let _ = self.link.close();
            }
            _ => {}
        }
    }
}

/// First word of the EPC itself in the EPC bank
const EPC_WORD: u8 = 0x02;
/// Protocol-control word, just before the EPC
const PC_WORD: u8 = 0x01;
/// PC bits below the five-bit EPC length
const PC_FLAGS: u16 = 0x07FF;

fn expect_ack(command: &Command, response: &Response) -> Result<(), UhfError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(rejected(command, response))
    }
}

fn rejected(command: &Command, response: &Response) -> UhfError {
    let status = response.status.unwrap_or(crate::response::STATUS_ILLEGAL_COMMAND);
    warn!(
        "Command 0x{:02X} rejected: 0x{:02X} ({})",
        command.code,
        status,
        status_description(status)
    );
    UhfError::CommandRejected {
        command: command.code,
        status,
    }
}

fn write_rejected(response: &Response) -> UhfError {
    let reason = match response.status {
        Some(status) => status_description(status).to_string(),
        None => "reply carried no status".to_string(),
    };
    UhfError::WriteRejected {
        status: response.status,
        reason,
    }
}

fn not_written(reason: &str) -> UhfError {
    UhfError::WriteRejected {
        status: None,
        reason: reason.to_string(),
    }
}

/// Errors during a write become a rejection; a lost link passes through
fn write_failed(e: UhfError, stage: &str) -> UhfError {
    if e.is_fatal() {
        e
    } else {
        not_written(&format!("{}: {}", stage, e))
    }
}
