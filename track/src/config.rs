use std::path::PathBuf;

use leak_track_types::{ENV_LEAK_TRACE_DUMP, ENV_LEAK_TRACE_FILE};

use crate::sink::SinkConfig;

/// Settings for a [`crate::Tracker`].
#[derive(Debug)]
pub struct TrackerConfig {
    /// Destination of trace lines and the final report.
    pub sink: SinkConfig,
    /// If set, the frozen event log is written here in bincode at shutdown.
    pub dump_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::Stderr,
            dump_path: None,
        }
    }
}

impl TrackerConfig {
    pub fn new(sink: SinkConfig) -> Self {
        Self {
            sink,
            dump_path: None,
        }
    }

    pub fn with_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(path.into());
        self
    }

    /// Read `LEAK_TRACE_FILE` and `LEAK_TRACE_DUMP`. Without a trace file, lines go to stderr.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var_os(name).map(PathBuf::from))
    }

    fn from_vars<F: Fn(&str) -> Option<PathBuf>>(var: F) -> Self {
        let sink = match var(ENV_LEAK_TRACE_FILE) {
            Some(path) if !path.as_os_str().is_empty() => SinkConfig::File(path),
            _ => SinkConfig::Stderr,
        };
        Self {
            sink,
            dump_path: var(ENV_LEAK_TRACE_DUMP).filter(|path| !path.as_os_str().is_empty()),
        }
    }
}
