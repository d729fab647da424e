//! request_log.rs
//! Audit trail of every dispatched request.
//!
//! The dispatcher pushes one record per response onto a bounded lock-free queue and never
//! blocks: when the queue is full the record is dropped and counted. A background consumer
//! drains the queue in batches and writes CSV rows, flushing every few batches.

use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use crate::dispatch::request::RequestKind;

const LOG_CAPACITY: usize = 8192;
const CONSUMER_POLL_MS: u64 = 5;
const DRAIN_BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub seq: u64,
    pub ts: Instant,
    pub kind: RequestKind,
    pub name: String,
    pub peer: String,
    pub correlation_id: String,
    pub failure: Option<&'static str>,
    pub latency_us: u64,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    seq: u64,
    ts_epoch_us: u64,
    age_us: u64,
    kind: &'a str,
    name: &'a str,
    peer: &'a str,
    request_key: &'a str,
    ok: bool,
    failure: &'a str,
    latency_us: u64,
}

pub struct RequestLog {
    queue: Arc<ArrayQueue<RequestRecord>>,
    dropped: Arc<AtomicU64>,
    seq: AtomicU64,
    consumer_handle: Mutex<Option<JoinHandle<()>>>,
    consumer_running: Arc<AtomicBool>,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLog {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(LOG_CAPACITY)),
            dropped: Arc::new(AtomicU64::new(0)),
            seq: AtomicU64::new(1),
            consumer_handle: Mutex::new(None),
            consumer_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Non-blocking push; drops and counts the record if the queue is full.
    pub fn record(
        &self,
        kind: RequestKind,
        name: &str,
        peer: &str,
        correlation_id: &str,
        failure: Option<&'static str>,
        latency_us: u64,
    ) {
        let raw = RequestRecord {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts: Instant::now(),
            kind,
            name: name.to_string(),
            peer: peer.to_string(),
            correlation_id: correlation_id.to_string(),
            failure,
            latency_us,
        };
        if self.queue.push(raw).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn start_consumer(&self, output_csv: PathBuf) -> Result<(), String> {
        let mut guard = self.consumer_handle.lock();
        if guard.is_some() {
            return Err("consumer already running".into());
        }

        let file = File::create(&output_csv)
            .map_err(|e| format!("failed to create {:?}: {}", output_csv, e))?;

        let q = self.queue.clone();
        let dropped = self.dropped.clone();
        let running = self.consumer_running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("request-log".to_string())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..DRAIN_BATCH {
                        match q.pop() {
                            Some(raw) => {
                                any = true;
                                write_row(&mut wtr, &raw);
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                // Final drain
                while let Some(raw) = q.pop() {
                    write_row(&mut wtr, &raw);
                }
                if let Err(e) = wtr.flush() {
                    error!("[RequestLog] final flush failed: {}", e);
                }
                debug!(
                    "[RequestLog::consumer] exiting. dropped={}",
                    dropped.load(Ordering::Relaxed)
                );
            })
            .map_err(|e| {
                self.consumer_running.store(false, Ordering::SeqCst);
                format!("failed to spawn consumer: {}", e)
            })?;

        *guard = Some(handle);
        Ok(())
    }

    /// Stops the consumer after it has drained everything queued so far.
    pub fn stop_consumer(&self) -> Result<(), String> {
        self.consumer_running.store(false, Ordering::SeqCst);
        let handle = self.consumer_handle.lock().take();
        if let Some(h) = handle {
            h.join().map_err(|_| "request log consumer panicked".to_string())?;
        }
        Ok(())
    }
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        let _ = self.stop_consumer();
    }
}

fn write_row<W: std::io::Write>(wtr: &mut Writer<W>, raw: &RequestRecord) {
    let ts_epoch_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    let row = CsvRow {
        seq: raw.seq,
        ts_epoch_us,
        age_us: raw.ts.elapsed().as_micros() as u64,
        kind: raw.kind.as_str(),
        name: &raw.name,
        peer: &raw.peer,
        request_key: &raw.correlation_id,
        ok: raw.failure.is_none(),
        failure: raw.failure.unwrap_or(""),
        latency_us: raw.latency_us,
    };
    wtr.serialize(&row).ok();
}
