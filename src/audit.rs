//! Audit trail of call decisions.
//!
//! Every decision produces one [`AuditRecord`]. The CSV sink appends blocked
//! and allowed decisions to two separate files, either of which may be
//! disabled. Writing is best effort: failures are logged and never reach the
//! call that produced the record.

use crate::error::AuditError;
use crate::loader::ListMatch;
use chrono::{DateTime, Local, SecondsFormat};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

const BLOCKED_HEADER: &[&str] = &[
    "timestamp",
    "number",
    "blocklist_file_name",
    "blocklist_file_line_number",
];
const ALLOWED_HEADER: &[&str] = &["timestamp", "number"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Blocked,
    Allowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp: DateTime<Local>,
    pub caller: String,
    pub disposition: Disposition,
    pub source: Option<String>,
    pub line: Option<usize>,
}

impl AuditRecord {
    pub fn allowed(caller: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            caller: caller.into(),
            disposition: Disposition::Allowed,
            source: None,
            line: None,
        }
    }

    pub fn blocked(caller: impl Into<String>, matched: &ListMatch) -> Self {
        Self {
            timestamp: Local::now(),
            caller: caller.into(),
            disposition: Disposition::Blocked,
            source: Some(matched.source.clone()),
            line: Some(matched.line),
        }
    }
}

pub trait AuditSink: Send + Sync {
    /// Append one record. Must not fail the caller.
    fn record(&self, record: &AuditRecord);

    /// Close and reopen the underlying targets, e.g. after log rotation.
    fn reopen(&self) -> Result<(), AuditError> {
        Ok(())
    }

    /// Flush and release the underlying targets.
    fn close(&self) {}
}

struct CsvStream {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl CsvStream {
    fn open(path: &Path, header: &[&str]) -> Result<Self, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AuditError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let fresh = file.metadata().map(|m| m.len() == 0).unwrap_or(false);

        let stream = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        };
        if fresh {
            if let Err(e) = stream.write_row(header) {
                log::error!("Audit log: Error writing header: {e}");
            }
        }
        Ok(stream)
    }

    fn write_row(&self, fields: &[&str]) -> Result<(), AuditError> {
        let mut row = fields
            .iter()
            .map(|field| escape_field(field))
            .collect::<Vec<_>>()
            .join(",");
        row.push('\n');

        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        writer
            .write_all(row.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|source| AuditError::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn flush(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writer.flush() {
            log::error!("Audit log: Error flushing {}: {e}", self.path.display());
        }
    }
}

#[derive(Default)]
struct CsvStreams {
    blocked: Option<CsvStream>,
    allowed: Option<CsvStream>,
}

impl CsvStreams {
    fn flush_all(&self) {
        for stream in [&self.blocked, &self.allowed].into_iter().flatten() {
            stream.flush();
        }
    }
}

/// Appends decisions to CSV files. Writers share the read lock on the open
/// handles; [`AuditSink::reopen`] takes the write lock to swap them.
pub struct CsvAuditSink {
    blocked_path: Option<PathBuf>,
    allowed_path: Option<PathBuf>,
    streams: RwLock<CsvStreams>,
}

impl CsvAuditSink {
    /// Open the configured files. A `None` path disables that stream.
    pub fn open(
        blocked_path: Option<PathBuf>,
        allowed_path: Option<PathBuf>,
    ) -> Result<Self, AuditError> {
        let sink = Self {
            blocked_path,
            allowed_path,
            streams: RwLock::new(CsvStreams::default()),
        };
        sink.reopen()?;
        Ok(sink)
    }

    /// A sink with both streams disabled.
    pub fn disabled() -> Self {
        Self {
            blocked_path: None,
            allowed_path: None,
            streams: RwLock::new(CsvStreams::default()),
        }
    }
}

impl AuditSink for CsvAuditSink {
    fn record(&self, record: &AuditRecord) {
        let streams = self.streams.read().unwrap_or_else(|p| p.into_inner());
        let timestamp = record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

        let result = match record.disposition {
            Disposition::Blocked => match &streams.blocked {
                Some(stream) => {
                    let line = record.line.map(|l| l.to_string()).unwrap_or_default();
                    stream.write_row(&[
                        timestamp.as_str(),
                        record.caller.as_str(),
                        record.source.as_deref().unwrap_or_default(),
                        line.as_str(),
                    ])
                }
                None => Ok(()),
            },
            Disposition::Allowed => match &streams.allowed {
                Some(stream) => stream.write_row(&[timestamp.as_str(), record.caller.as_str()]),
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            log::error!("Audit log: {e}");
        }
    }

    fn reopen(&self) -> Result<(), AuditError> {
        let mut streams = self.streams.write().unwrap_or_else(|p| p.into_inner());
        streams.flush_all();
        *streams = CsvStreams::default();

        let mut first_error = None;
        if let Some(path) = &self.blocked_path {
            match CsvStream::open(path, BLOCKED_HEADER) {
                Ok(stream) => streams.blocked = Some(stream),
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }
        if let Some(path) = &self.allowed_path {
            match CsvStream::open(path, ALLOWED_HEADER) {
                Ok(stream) => streams.allowed = Some(stream),
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&self) {
        let mut streams = self.streams.write().unwrap_or_else(|p| p.into_inner());
        streams.flush_all();
        *streams = CsvStreams::default();
    }
}

/// Quote a CSV field when it holds a delimiter, quote, line break or leading
/// space. Quotes inside are doubled.
fn escape_field(field: &str) -> String {
    let needs_quotes = field.contains([',', '"', '\r', '\n'])
        || field.starts_with([' ', '\t']);
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
