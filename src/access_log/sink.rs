//! Destinations for access records.
//!
//! # Design Decisions
//! - A record is appended with a single `write_all` under a mutex, so lines
//!   from concurrent requests never interleave
//! - Sinks are shared across requests as `Arc<dyn LogSink>`
//! - No buffering or background delivery: the append happens on the request's task

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{AccessLogConfig, LogDestination};

/// Append-only byte sink for access records.
pub trait LogSink: Send + Sync {
    /// Append one complete record.
    fn append(&self, record: &[u8]) -> io::Result<()>;
}

/// Shared handle to a log sink.
pub type SharedLogSink = Arc<dyn LogSink>;

/// Log sink over any `Write`, serialized by a mutex.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, W> {
        // A panic mid-append leaves at worst a truncated line; keep logging.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl WriterSink<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl WriterSink<File> {
    /// Open `path` for appending, creating it if missing.
    pub fn append_to(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn append(&self, record: &[u8]) -> io::Result<()> {
        let mut writer = self.lock();
        writer.write_all(record)?;
        writer.flush()
    }
}

/// Open the sink an access log configuration points at.
pub fn open_sink(config: &AccessLogConfig) -> io::Result<SharedLogSink> {
    let sink: SharedLogSink = match config.destination {
        LogDestination::Stdout => Arc::new(WriterSink::stdout()),
        LogDestination::Stderr => Arc::new(WriterSink::stderr()),
        LogDestination::File => {
            let path = config.path.as_deref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "access log file path not set")
            })?;
            Arc::new(WriterSink::append_to(path)?)
        }
    };
    Ok(sink)
}

/// In-memory log sink; records can be read back as text.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Appended records, one entry per line.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl LogSink for MemorySink {
    fn append(&self, record: &[u8]) -> io::Result<()> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(record);
        Ok(())
    }
}
