//! Diagnostic wire log
//!
//! When `XILOG` names a file, every byte written to or read from a device
//! is appended to it as a tab-separated row:
//!
//! ```text
//! TIME    DIR  TYPE  ID  COMMAND
//! 1718000000123456  W  com  1  gpos
//! 1718000000234567  R  com  1  gpos....
//! 1718000000345678  -  com  1  Flushing port...
//! ```
//!
//! `TIME` is microseconds since the Unix epoch. Spaces, control bytes and
//! anything past ASCII are written as `.`. The file is opened lazily on the first row and
//! a failure to write never affects the device operation being logged.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;
use ximc_types::{DeviceId, TransportKind};

const HEADER: &str = "TIME\tDIR\tTYPE\tID\tCOMMAND\n";

/// Row direction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogDirection {
    Write,
    Read,
    /// Free-text lifecycle note
    Note,
}

impl LogDirection {
    fn as_str(self) -> &'static str {
        match self {
            Self::Write => "W",
            Self::Read => "R",
            Self::Note => "-",
        }
    }
}

#[derive(Debug)]
enum Sink {
    Closed,
    Open(File),
    Failed,
}

/// Append-only diagnostic sink
#[derive(Debug)]
pub struct FileLog {
    path: Option<PathBuf>,
    sink: Mutex<Sink>,
}

impl FileLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            sink: Mutex::new(Sink::Closed),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Mirror raw bytes
    pub fn data(&self, dir: LogDirection, kind: TransportKind, id: DeviceId, data: &[u8]) {
        if !self.is_enabled() {
            return;
        }
        self.row(dir, kind, id, &render(data));
    }

    /// Record a lifecycle note
    pub fn text(&self, kind: TransportKind, id: DeviceId, text: &str) {
        if !self.is_enabled() {
            return;
        }
        self.row(LogDirection::Note, kind, id, text);
    }

    fn row(&self, dir: LogDirection, kind: TransportKind, id: DeviceId, body: &str) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        let mut sink = self.sink.lock();
        if let Sink::Closed = *sink {
            *sink = match open(path) {
                Ok(file) => Sink::Open(file),
                Err(e) => {
                    warn!("Cannot open wire log {}: {}", path.display(), e);
                    Sink::Failed
                }
            };
        }

        if let Sink::Open(file) = &mut *sink {
            let line = format!(
                "{}\t{}\t{}\t{}\t{}\n",
                chrono::Utc::now().timestamp_micros(),
                dir.as_str(),
                kind.log_tag(),
                id,
                body
            );
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!("Wire log write failed: {}", e);
            }
        }
    }
}

impl Default for FileLog {
    fn default() -> Self {
        Self::disabled()
    }
}

fn open(path: &Path) -> std::io::Result<File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(HEADER.as_bytes())?;
    }
    Ok(file)
}

fn render(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}
