//! Continuous scanning loop
//!
//! The loop thread owns the reader, and with it the serial line. Other
//! threads see only what the loop publishes: a [`ScanSnapshot`] behind a
//! mutex and a stream of [`TagEvent`]s. Configuration and write operations
//! are sent to the loop as requests and run between two inventory rounds,
//! so the scan is paused for exactly as long as they take.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use log::{debug, error, info, warn};

use crate::command::Command;
use crate::config::ScanConfig;
use crate::error::UhfError;
use crate::reader::{Diagnostics, ReaderState, UhfReader};
use crate::transport::RfidTransport;
use crate::types::{TagRecord, TagSelector, WorkMode};

/// One tag seen in one inventory round
#[derive(Debug, Clone, PartialEq)]
pub struct TagEvent {
    pub tag: TagRecord,
    pub cycle: u64,
    pub seen_at: SystemTime,
}

/// Latest state published by the scanning loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSnapshot {
    /// Tags reported by the most recent round
    pub tags: Vec<TagRecord>,
    pub cycles: u64,
    pub empty_cycles: u64,
    pub detections: u64,
    /// Events not delivered because the consumer fell behind
    pub dropped_events: u64,
    pub running: bool,
    pub last_error: Option<String>,
    pub updated_at: Option<SystemTime>,
    pub diagnostics: Diagnostics,
}

/// What the loop reports once it has stopped
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub cycles: u64,
    pub detections: u64,
    pub diagnostics: Diagnostics,
    /// The fatal error that ended the loop, if it did not stop on request
    pub error: Option<UhfError>,
}

type Reply<R> = Sender<Result<R, UhfError>>;

enum ScanRequest {
    SetPower(i32, Reply<()>),
    SetWorkMode(WorkMode, Reply<()>),
    WriteEpc {
        selector: TagSelector,
        new_epc: Vec<u8>,
        access_password: u32,
        reply: Reply<TagRecord>,
    },
}

impl ScanRequest {
    fn run<T: RfidTransport>(self, reader: &mut UhfReader<T>) {
        // A dropped receiver only means the caller stopped waiting
        match self {
            ScanRequest::SetPower(level, reply) => {
                let _ = reply.send(reader.set_power(level));
            }
            ScanRequest::SetWorkMode(mode, reply) => {
                let _ = reply.send(reader.set_work_mode(mode));
            }
            ScanRequest::WriteEpc {
                selector,
                new_epc,
                access_password,
                reply,
            } => {
                let _ = reply.send(reader.write_epc(&selector, &new_epc, access_password));
            }
        }
    }
}

pub struct Scanner;

impl Scanner {
    /// Move `reader` into a new scanning thread
    pub fn spawn<T>(reader: UhfReader<T>, config: ScanConfig) -> Result<ScannerHandle, UhfError>
    where
        T: RfidTransport + Send + 'static,
    {
        if reader.state() != ReaderState::Connected {
            return Err(UhfError::NotConnected);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let snapshot = Arc::new(Mutex::new(ScanSnapshot {
            running: true,
            ..ScanSnapshot::default()
        }));
        let (request_tx, request_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::sync_channel(config.event_capacity.max(1));

        let scan_loop = ScanLoop {
            reader,
            config,
            stop: Arc::clone(&stop),
            snapshot: Arc::clone(&snapshot),
            requests: request_rx,
            events: event_tx,
        };
        let thread = thread::Builder::new()
            .name("uhf-scanner".into())
            .spawn(move || scan_loop.run())
            .map_err(|e| UhfError::Config(format!("Failed to spawn scanner thread: {}", e)))?;

        Ok(ScannerHandle {
            stop,
            snapshot,
            requests: request_tx,
            events: Some(event_rx),
            thread: Some(thread),
        })
    }
}

struct ScanLoop<T: RfidTransport> {
    reader: UhfReader<T>,
    config: ScanConfig,
    stop: Arc<AtomicBool>,
    snapshot: Arc<Mutex<ScanSnapshot>>,
    requests: Receiver<ScanRequest>,
    events: SyncSender<TagEvent>,
}

impl<T: RfidTransport> ScanLoop<T> {
    fn run(mut self) -> ScanSummary {
        info!("Scanner started, interval {:?}", self.config.interval());
        self.reader.set_scanning(true);

        let mut cycles = 0u64;
        let mut detections = 0u64;
        let mut fatal = None;

        while !self.stop.load(Ordering::SeqCst) {
            while let Ok(request) = self.requests.try_recv() {
                self.reader.set_scanning(false);
                request.run(&mut self.reader);
                self.reader.set_scanning(true);
            }
            if self.reader.state() == ReaderState::Disconnected {
                fatal = Some(UhfError::NotConnected);
                break;
            }

            match self.reader.inventory() {
                Ok(tags) => {
                    cycles += 1;
                    detections += tags.len() as u64;
                    self.publish(cycles, tags);
                }
                Err(e) => {
                    error!("Scanner stopping: {}", e);
                    lock(&self.snapshot).last_error = Some(e.to_string());
                    fatal = Some(e);
                    break;
                }
            }

            thread::sleep(self.config.interval());
        }

        self.reader.set_scanning(false);
        if let Err(e) = self.reader.disconnect() {
            warn!("Error closing transport: {}", e);
        }

        let diagnostics = self.reader.diagnostics();
        {
            let mut snapshot = lock(&self.snapshot);
            snapshot.running = false;
            snapshot.diagnostics = diagnostics;
        }
        info!("Scanner stopped after {} rounds, {} detections", cycles, detections);

        ScanSummary {
            cycles,
            detections,
            diagnostics,
            error: fatal,
        }
    }

    fn publish(&self, cycle: u64, tags: Vec<TagRecord>) {
        let now = SystemTime::now();
        let mut dropped = 0u64;

        if self.config.emit_events {
            for tag in &tags {
                debug!("Round {}: {}", cycle, tag);
                let event = TagEvent {
                    tag: tag.clone(),
                    cycle,
                    seen_at: now,
                };
                // A disconnected receiver means nobody is listening any more
                if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            debug!("Event queue full, dropped {} events from round {}", dropped, cycle);
        }

        let mut snapshot = lock(&self.snapshot);
        snapshot.cycles = cycle;
        snapshot.dropped_events += dropped;
        snapshot.detections += tags.len() as u64;
        if tags.is_empty() {
            snapshot.empty_cycles += 1;
        }
        snapshot.tags = tags;
        snapshot.updated_at = Some(now);
        snapshot.diagnostics = self.reader.diagnostics();
    }
}

/// Control side of a running scanner
pub struct ScannerHandle {
    stop: Arc<AtomicBool>,
    snapshot: Arc<Mutex<ScanSnapshot>>,
    requests: Sender<ScanRequest>,
    events: Option<Receiver<TagEvent>>,
    thread: Option<JoinHandle<ScanSummary>>,
}

impl ScannerHandle {
    pub fn snapshot(&self) -> ScanSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Tag events, once; later calls return `None`
    pub fn take_events(&mut self) -> Option<Receiver<TagEvent>> {
        self.events.take()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Pause the scan, set power, resume
    pub fn set_power(&self, level: i32) -> Result<(), UhfError> {
        Command::set_power(level)?;
        self.request(|reply| ScanRequest::SetPower(level, reply))
    }

    /// Pause the scan, switch work mode, resume
    pub fn set_work_mode(&self, mode: WorkMode) -> Result<(), UhfError> {
        self.request(|reply| ScanRequest::SetWorkMode(mode, reply))
    }

    /// Pause the scan, rewrite a tag's EPC, resume
    pub fn write_epc(&self, selector: TagSelector, new_epc: &[u8], access_password: u32) -> Result<TagRecord, UhfError> {
        crate::command::check_epc(new_epc)?;
        self.request(|reply| ScanRequest::WriteEpc {
            selector,
            new_epc: new_epc.to_vec(),
            access_password,
            reply,
        })
    }

    /// Signal the loop, wait for it to finish and close the port
    pub fn stop(mut self) -> ScanSummary {
        self.shutdown().unwrap_or_else(|| ScanSummary {
            cycles: 0,
            detections: 0,
            diagnostics: Diagnostics::default(),
            error: Some(UhfError::ConnectionLost("scanner thread panicked".into())),
        })
    }

    fn request<R>(&self, build: impl FnOnce(Reply<R>) -> ScanRequest) -> Result<R, UhfError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .send(build(reply_tx))
            .map_err(|_| UhfError::NotConnected)?;
        reply_rx.recv().map_err(|_| UhfError::NotConnected)?
    }

    fn shutdown(&mut self) -> Option<ScanSummary> {
        self.stop.store(true, Ordering::SeqCst);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                error!("Scanner thread panicked");
                None
            }
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(snapshot: &Mutex<ScanSnapshot>) -> MutexGuard<'_, ScanSnapshot> {
    snapshot.lock().unwrap_or_else(PoisonError::into_inner)
}
