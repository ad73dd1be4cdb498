//! Structured logging for onionserve.
//!
//! Log lines are the operator's only record of the onion address and the
//! generated file URLs, so normal verbosity prints them to stderr. An
//! optional log file receives everything at debug level.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// File name used when the configured log path names a directory.
const DEFAULT_LOG_FILE: &str = "onionserve.log";

/// How much goes to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    /// Address, URLs and warnings
    #[default]
    Normal,
    /// Control protocol steps
    Verbose,
    /// Everything
    Trace,
}

impl Verbosity {
    /// Pick a verbosity from `-v` count and `-q`; quiet wins.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Normal,
            (false, 1) => Verbosity::Verbose,
            (false, _) => Verbosity::Trace,
        }
    }

    pub fn as_level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

/// Logging settings resolved from flags and config.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub verbosity: Verbosity,
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    /// Most detailed level any output wants.
    ///
    /// `RUST_LOG` can still narrow this per target.
    fn global_level(&self) -> LevelFilter {
        let stderr = self.verbosity.as_level_filter();
        match self.log_file {
            Some(_) => stderr.max(LevelFilter::DEBUG),
            None => stderr,
        }
    }
}

/// Keeps the background log writer alive; pending lines are flushed on drop.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard(Option<WorkerGuard>);

/// Split a log path into the directory to write in and the file name.
fn split_log_path(path: &Path) -> (&Path, &OsStr) {
    match path.file_name() {
        Some(name) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            (dir, name)
        }
        None => (path, OsStr::new(DEFAULT_LOG_FILE)),
    }
}

/// Install the global subscriber.
///
/// Stderr gets human-oriented lines at the configured verbosity. When a log
/// file is configured it additionally gets debug-level lines with targets
/// and thread ids, written off the async runtime.
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.global_level().into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(config.verbosity.as_level_filter());

    let (file_layer, guard) = match config.log_file.as_deref() {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_timer(fmt::time::uptime())
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LogGuard(guard)
}

/// In-memory log sink for asserting on what operators would see.
#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Capture INFO and above on this thread until the guard drops.
        pub(crate) fn install() -> (Self, DefaultGuard) {
            let logs = Self::default();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_ansi(false)
                .with_writer(logs.clone())
                .finish();
            (logs, tracing::subscriber::set_default(subscriber))
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }
}
