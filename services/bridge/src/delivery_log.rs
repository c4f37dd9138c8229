//! Delivery log: the append-only operational record of the pipeline.
//!
//! Two record kinds, one line each:
//!
//! ```text
//! 2026-08-01 09:30:00 | INFO | Data sent | device_id=VM-A | object=GPS.LAT | value=37.5665
//! 2026-08-01 09:30:00 | INFO | Data processed | trace_id=t1 | object=GPS.LAT | target_devices=VM-A,VM-B
//! ```
//!
//! The sink is a dedicated task fed by a bounded channel, so producers never
//! block on file IO; an unclean shutdown loses at most one unflushed batch.
//! Rotation is size-based with numbered backups and best-effort: a failed
//! rename is logged and the sink keeps appending.

use crate::config::{LoggingConfig, LogTimestamps};
use bridge_protocol::DeliveryRecord;
use chrono::{DateTime, Local, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 10_000;

#[derive(Debug)]
enum LogRecord {
    Sent(DeliveryRecord),
    Processed { at: DateTime<Utc>, trace_id: String, object: String, devices: Vec<String> },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeliveryLogConfig {
    pub path: PathBuf,
    pub max_size: u64,
    pub backup_count: u32,
    pub timestamps: LogTimestamps,
    /// Flush cadence; records never wait longer than this.
    pub flush_interval: Duration,
    /// Flush immediately once this many records are buffered.
    pub batch_max: usize,
}

impl DeliveryLogConfig {
    pub fn from_logging(cfg: &LoggingConfig) -> Self {
        DeliveryLogConfig {
            path: cfg.file.clone(),
            max_size: cfg.max_size,
            backup_count: cfg.backup_count,
            timestamps: cfg.timestamps,
            flush_interval: Duration::from_secs(1),
            batch_max: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable producer side of the delivery log.
///
/// Sends never block; if the sink has fallen more than the channel capacity
/// behind, the record is dropped with a warning rather than stalling the
/// pipeline.
#[derive(Debug, Clone)]
pub struct DeliveryLogHandle {
    tx: mpsc::Sender<LogRecord>,
}

impl DeliveryLogHandle {
    pub fn sent(&self, record: DeliveryRecord) {
        self.push(LogRecord::Sent(record));
    }

    pub fn processed(&self, trace_id: &str, object: &str, devices: &[String]) {
        self.push(LogRecord::Processed {
            at: Utc::now(),
            trace_id: trace_id.to_owned(),
            object: object.to_owned(),
            devices: devices.to_vec(),
        });
    }

    fn push(&self, record: LogRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "delivery log backlogged, dropping record");
        }
    }
}

// ---------------------------------------------------------------------------
// Sink task
// ---------------------------------------------------------------------------

/// Start the sink task. It stops once shutdown is signalled or every handle
/// is dropped, flushing buffered records on the way out.
pub fn spawn(
    config: DeliveryLogConfig,
    mut shutdown: watch::Receiver<bool>,
) -> (DeliveryLogHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = DeliveryLogHandle { tx };

    let task = tokio::spawn(async move {
        let mut writer = LogWriter::new(&config);
        let mut buffer: Vec<String> = Vec::with_capacity(config.batch_max);
        let mut flush_tick = tokio::time::interval(config.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    // Drain whatever is already queued, then flush once.
                    while let Ok(record) = rx.try_recv() {
                        buffer.push(format_line(&record, config.timestamps));
                    }
                    writer.append(&mut buffer);
                    break;
                }
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            buffer.push(format_line(&record, config.timestamps));
                            if buffer.len() >= config.batch_max {
                                writer.append(&mut buffer);
                            }
                        }
                        None => {
                            writer.append(&mut buffer);
                            break;
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    writer.append(&mut buffer);
                }
            }
        }
    });

    (handle, task)
}

fn format_line(record: &LogRecord, timestamps: LogTimestamps) -> String {
    match record {
        LogRecord::Sent(r) => format!(
            "{} | INFO | Data sent | device_id={} | object={} | value={}",
            stamp(r.sent_at, timestamps),
            r.device_id,
            r.object,
            r.value
        ),
        LogRecord::Processed { at, trace_id, object, devices } => format!(
            "{} | INFO | Data processed | trace_id={} | object={} | target_devices={}",
            stamp(*at, timestamps),
            trace_id,
            object,
            devices.join(",")
        ),
    }
}

fn stamp(at: DateTime<Utc>, timestamps: LogTimestamps) -> String {
    match timestamps {
        LogTimestamps::Local => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        LogTimestamps::Utc => at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

// ---------------------------------------------------------------------------
// File writer with best-effort rotation
// ---------------------------------------------------------------------------

struct LogWriter {
    path: PathBuf,
    max_size: u64,
    backup_count: u32,
}

impl LogWriter {
    fn new(config: &DeliveryLogConfig) -> Self {
        if let Some(parent) = config.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, dir = %parent.display(), "cannot create log directory");
            }
        }
        LogWriter {
            path: config.path.clone(),
            max_size: config.max_size,
            backup_count: config.backup_count,
        }
    }

    /// Append and clear the buffered lines. File IO happens only here, on
    /// the sink task.
    fn append(&mut self, buffer: &mut Vec<String>) {
        if buffer.is_empty() {
            return;
        }
        let mut chunk = String::new();
        for line in buffer.iter() {
            chunk.push_str(line);
            chunk.push('\n');
        }

        self.rotate_if_needed(chunk.len() as u64);

        use std::io::Write;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(chunk.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, file = %self.path.display(), "delivery log write failed");
        }
        buffer.clear();
    }

    fn rotate_if_needed(&self, incoming: u64) {
        let current = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current == 0 || current + incoming <= self.max_size {
            return;
        }
        if self.backup_count == 0 {
            let _ = std::fs::remove_file(&self.path);
            return;
        }
        let backup = |n: u32| PathBuf::from(format!("{}.{}", self.path.display(), n));
        let _ = std::fs::remove_file(backup(self.backup_count));
        for i in (1..self.backup_count).rev() {
            let _ = std::fs::rename(backup(i), backup(i + 1));
        }
        if let Err(e) = std::fs::rename(&self.path, backup(1)) {
            warn!(error = %e, file = %self.path.display(), "delivery log rotation failed");
        }
    }
}
