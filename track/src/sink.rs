//! Best-effort destination for trace lines.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Errors opening or writing the trace sink. Never surfaced to traced code.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot open trace file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("trace write failed: {0}")]
    Write(#[from] io::Error),
}

/// Where trace lines and the final report go.
pub enum SinkConfig {
    /// Standard error of the process.
    Stderr,
    /// A pre-opened stream, owned by the sink from now on.
    Stream(Box<dyn Write + Send>),
    /// A file, created if missing and appended to.
    File(PathBuf),
    /// A shared in-memory buffer.
    Memory(MemorySink),
    /// Keep events in memory only.
    Disabled,
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkConfig::Stderr => f.write_str("Stderr"),
            SinkConfig::Stream(_) => f.write_str("Stream(..)"),
            SinkConfig::File(path) => f.debug_tuple("File").field(path).finish(),
            SinkConfig::Memory(_) => f.write_str("Memory(..)"),
            SinkConfig::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Cloneable in-memory text buffer. All clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes one line per event. A failed write drops the stream and the sink stays degraded.
pub struct TraceSink {
    writer: Option<Box<dyn Write + Send>>,
    degraded: bool,
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSink")
            .field("open", &self.writer.is_some())
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl TraceSink {
    /// A sink that writes nothing.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            degraded: false,
        }
    }

    /// Open the configured destination.
    pub fn try_open(config: SinkConfig) -> Result<Self, SinkError> {
        let writer: Box<dyn Write + Send> = match config {
            SinkConfig::Stderr => Box::new(io::stderr()),
            SinkConfig::Stream(stream) => stream,
            SinkConfig::File(path) => {
                let file: File = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|source| SinkError::Open { path, source })?;
                Box::new(LineWriter::new(file))
            }
            SinkConfig::Memory(memory) => Box::new(memory),
            SinkConfig::Disabled => return Ok(Self::disabled()),
        };
        Ok(Self {
            writer: Some(writer),
            degraded: false,
        })
    }

    /// Open the configured destination, falling back to a degraded sink on failure.
    pub fn open(config: SinkConfig) -> Self {
        match Self::try_open(config) {
            Ok(sink) => sink,
            Err(err) => {
                log::warn!("{}, continuing without trace output", err);
                Self {
                    writer: None,
                    degraded: true,
                }
            }
        }
    }

    /// `true` once opening or writing failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn degrade(&mut self, err: SinkError) {
        log::warn!("{}, continuing without trace output", err);
        self.writer = None;
        self.degraded = true;
    }

    /// Write a single line.
    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writeln!(writer, "{}", args) {
                self.degrade(err.into());
            }
        }
    }

    /// Write a pre-rendered block verbatim.
    pub fn block(&mut self, text: &str) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.write_all(text.as_bytes()) {
                self.degrade(err.into());
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                self.degrade(err.into());
            }
        }
    }

    /// Flush and release the stream. Later writes are dropped.
    pub fn close(&mut self) {
        self.flush();
        self.writer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn memory_sink_collects_lines() {
        let memory = MemorySink::new();
        let mut sink = TraceSink::open(SinkConfig::Memory(memory.clone()));
        sink.line(format_args!("new size={}", 4));
        sink.block("tail\n");
        assert_eq!(memory.contents(), "new size=4\ntail\n");
    }

    #[test]
    fn write_failure_degrades_silently() {
        let mut sink = TraceSink::open(SinkConfig::Stream(Box::new(BrokenPipe)));
        assert!(!sink.is_degraded());
        sink.line(format_args!("lost"));
        assert!(sink.is_degraded());
        sink.line(format_args!("also lost"));
        sink.close();
    }

    #[test]
    fn unopenable_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("trace.log");
        assert!(matches!(
            TraceSink::try_open(SinkConfig::File(path.clone())),
            Err(SinkError::Open { .. })
        ));
        assert!(TraceSink::open(SinkConfig::File(path)).is_degraded());
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        std::fs::write(&path, "existing\n").unwrap();
        let mut sink = TraceSink::open(SinkConfig::File(path.clone()));
        sink.line(format_args!("appended"));
        sink.close();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing\nappended\n");
    }
}
