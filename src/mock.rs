//! In-memory transports for exercising the protocol without hardware

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::checksum;
use crate::transport::RfidTransport;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    incoming: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    byte_delay: Option<Duration>,
    fail_reads: bool,
    fail_writes: bool,
    clears: usize,
    closed: bool,
}

/// Scripted transport. Clones share state, so a test can keep one clone to
/// feed bytes and inspect writes while the reader owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every written command with whatever `responder` returns
    pub fn responding<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mock = Self::new();
        mock.state.lock().unwrap().responder = Some(Box::new(responder));
        mock
    }

    /// Queue bytes to be read regardless of what gets written
    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().unwrap().incoming.extend(bytes);
    }

    /// Deliver one byte per read, each after `delay`
    pub fn with_byte_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().byte_delay = Some(delay);
        self
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Command codes of every frame written so far
    pub fn written_commands(&self) -> Vec<u8> {
        self.writes().iter().filter_map(|w| w.get(2).copied()).collect()
    }

    /// Number of times pending input was discarded
    pub fn clears(&self) -> usize {
        self.state.lock().unwrap().clears
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl RfidTransport for MockTransport {
    type Error = io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes || state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.writes.push(data.to_vec());
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(data);
            state.incoming.extend(reply);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        let (delay, pending) = {
            let state = self.state.lock().unwrap();
            if state.fail_reads || state.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
            }
            (state.byte_delay, !state.incoming.is_empty())
        };

        if !pending {
            std::thread::sleep(Duration::from_millis(1).min(Duration::from_millis(timeout_ms as u64)));
            return Ok(0);
        }
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock().unwrap();
        let limit = if delay.is_some() { 1 } else { buf.len() };
        let mut n = 0;
        while n < limit {
            match state.incoming.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock clear failure"));
        }
        state.incoming.clear();
        state.clears += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Reply frame from address 0x00
pub fn reply(command: u8, status: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![(data.len() + 5) as u8, 0x00, command, status];
    frame.extend_from_slice(data);
    checksum::append(&mut frame);
    frame
}

/// Work-mode reply reporting answer mode
pub fn work_mode_reply() -> Vec<u8> {
    reply(0x36, 0x00, &[0x00, 0x01, 0x0A, 0x0F, 0x00, 0x02, 0x01, 0x00, 0x08, 0x05])
}

/// Inventory reply in the count-prefixed layout
pub fn inventory_reply(tags: &[&[u8]]) -> Vec<u8> {
    if tags.is_empty() {
        return reply(0x01, 0xFB, &[]);
    }
    let mut data = vec![tags.len() as u8];
    for tag in tags {
        data.push(tag.len() as u8);
        data.extend_from_slice(tag);
    }
    reply(0x01, 0x00, &data)
}
