//! Byte-stream transports and the framed link built on top of them

use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::UhfError;
use crate::frame::{Frame, FrameSync, SyncStats};

/// Trait for RFID reader communication backends.
/// Implement this trait for different transports (serial port, TCP bridge, mocks, etc.)
pub trait RfidTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Write data to the transport
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read whatever arrives within `timeout_ms`.
    ///
    /// `Ok(0)` means nothing arrived in time; any `Err` is treated as the
    /// link being gone.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Clear the input buffer
    fn clear_input(&mut self) -> Result<(), Self::Error>;

    /// Release the underlying device
    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 32;

/// A transport plus the frame synchronizer that reads from it.
///
/// The link is the only thing that touches the transport; whoever owns the
/// link owns the serial line.
pub struct FrameLink<T: RfidTransport> {
    transport: T,
    sync: FrameSync,
    max_resync: u64,
}

impl<T: RfidTransport> FrameLink<T> {
    /// Link accepting replies from `address` with length fields up to `max_len_field`.
    /// A read gives up once it has resynchronized `max_resync` times (at least once).
    pub fn new(transport: T, address: u8, max_len_field: u8, max_resync: u32) -> Self {
        Self {
            transport,
            sync: FrameSync::new(address, max_len_field),
            max_resync: max_resync.max(1) as u64,
        }
    }

    /// Drop stale input, both in the device and in the synchronizer
    pub fn clear(&mut self) -> Result<(), UhfError> {
        self.sync.reset();
        self.transport.clear_input().map_err(lost)
    }

    pub fn write_frame(&mut self, bytes: &[u8]) -> Result<(), UhfError> {
        debug!("Sending frame: {:02X?}", bytes);
        let mut written = 0;
        while written < bytes.len() {
            match self.transport.write(&bytes[written..]) {
                Ok(0) => {
                    error!("Transport accepted no bytes");
                    return Err(UhfError::ConnectionLost("write returned zero bytes".into()));
                }
                Ok(n) => written += n,
                Err(e) => {
                    error!("Write error: {:?}", e);
                    return Err(lost(e));
                }
            }
        }
        Ok(())
    }

    /// Read until one complete frame is assembled.
    ///
    /// Returns [`UhfError::Timeout`] when `timeout` passes or the resync budget
    /// runs out first, [`UhfError::ConnectionLost`] when the transport fails.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Frame, UhfError> {
        let deadline = Instant::now() + timeout;
        let resyncs_at_start = self.sync.stats().resyncs;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(frame) = self.sync.next_frame() {
                return Ok(frame);
            }

            if self.sync.stats().resyncs - resyncs_at_start >= self.max_resync {
                warn!("Gave up after {} resync attempts", self.max_resync);
                return Err(UhfError::Timeout(timeout));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if self.sync.buffered() > 0 {
                    warn!("No valid frame in {} buffered bytes", self.sync.buffered());
                }
                return Err(UhfError::Timeout(timeout));
            }

            let timeout_ms = remaining.as_millis().clamp(1, u32::MAX as u128) as u32;
            match self.transport.read(&mut chunk, timeout_ms) {
                Ok(0) => {}
                Ok(n) => self.sync.push(&chunk[..n]),
                Err(e) => {
                    error!("Read error: {:?}", e);
                    return Err(lost(e));
                }
            }
        }
    }

    /// Read frames until one answers `command`; unrelated frames are dropped
    pub fn read_reply_to(&mut self, command: u8, timeout: Duration) -> Result<Frame, UhfError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(UhfError::Timeout(timeout));
            }
            let frame = self.read_frame(remaining)?;
            if frame.command() == command {
                return Ok(frame);
            }
            warn!(
                "Discarding reply to 0x{:02X} while waiting for 0x{:02X}",
                frame.command(),
                command
            );
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn close(&mut self) -> Result<(), UhfError> {
        self.sync.reset();
        self.transport.close().map_err(lost)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

fn lost<E: std::fmt::Debug>(e: E) -> UhfError {
    UhfError::ConnectionLost(format!("{:?}", e))
}
