//! Logging.
//!
//! Diagnostics and the request log both go through the `log` crate. Request
//! log lines use their own target, [`REQUEST_TARGET`], and are written
//! without a level tag so the output reads like an access log interleaved
//! with the occasional diagnostic.
//!
//! The process-wide logger starts out writing to stderr and is switched to
//! the configured target once the configuration is known.

use std::{fmt, fs, io, process};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use chrono::Local;
use log::{Level, LevelFilter, error};
use crate::config::{Config, LogTarget};
use crate::error::Failed;
use crate::utils::sync::Mutex;


/// The log target used for the per-request log lines.
pub const REQUEST_TARGET: &str = "fs_serve::request";


//------------ Logger --------------------------------------------------------

/// The configured logger.
pub struct Logger {
    backend: Mutex<Backend>,
    filter: Filter,
}

impl Logger {
    /// Installs the process-wide logger.
    ///
    /// Until [`switch_logging`](Self::switch_logging) is called, warnings
    /// and errors go to stderr.
    pub fn init() -> Result<(), Failed> {
        log::set_max_level(LevelFilter::Warn);
        if let Err(err) = log::set_logger(&GLOBAL_LOGGER) {
            eprintln!("Failed to initialize logger: {err}.\nAborting.");
            return Err(Failed)
        }
        Ok(())
    }

    /// Switches logging to the target given in the config.
    pub fn switch_logging(config: &Config) -> Result<(), Failed> {
        let backend = match config.log_target {
            #[cfg(unix)]
            LogTarget::Syslog(facility) => Backend::syslog(facility)?,
            LogTarget::File(ref path) => Backend::file(path.clone())?,
            LogTarget::Stderr => Backend::Stderr,
        };
        GLOBAL_LOGGER.switch(Logger {
            backend: Mutex::new(backend),
            filter: Filter::new(config.log_level),
        });
        log::set_max_level(config.log_level);
        Ok(())
    }

    /// Re-opens the log file.
    ///
    /// Does nothing unless logging goes to a file.
    pub fn rotate_log() -> Result<(), Failed> {
        match GLOBAL_LOGGER.inner.get() {
            Some(logger) => logger.backend.lock().reopen(),
            None => Ok(()),
        }
    }

    fn log(&self, record: &log::Record) {
        if !self.filter.accepts(record.metadata()) {
            return
        }
        let mut backend = self.backend.lock();
        if let Err(err) = backend.write(record) {
            // There is nowhere left to report to.
            eprintln!("{}: {}. Exiting.", backend.describe(), err);
            process::exit(1)
        }
    }
}


//------------ Filter --------------------------------------------------------

/// Decides which records are written.
#[derive(Clone, Copy, Debug)]
struct Filter {
    level: LevelFilter,
}

impl Filter {
    fn new(level: LevelFilter) -> Self {
        Filter { level }
    }

    fn accepts(&self, metadata: &log::Metadata) -> bool {
        if metadata.level() > self.level {
            return false
        }
        let target = metadata.target();
        if target.starts_with("rustls") {
            return metadata.level() == Level::Error
        }
        if self.level >= LevelFilter::Trace {
            return true
        }
        !(metadata.level() > Level::Info && (
               target.starts_with("hyper")
            || target.starts_with("reqwest")
            || target.starts_with("h2")
            || target.starts_with("tokio")
            || target.starts_with("mio")
        ))
    }
}


//------------ Line ----------------------------------------------------------

/// A record formatted as one line of output.
struct Line<'a> {
    record: &'a log::Record<'a>,
    timestamp: bool,
}

impl<'a> Line<'a> {
    fn new(record: &'a log::Record<'a>, timestamp: bool) -> Self {
        Line { record, timestamp }
    }
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.timestamp {
            write!(
                f, "[{}] ", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
            )?;
        }
        if self.record.target() != REQUEST_TARGET {
            write!(f, "[{}] ", self.record.level())?;
        }
        write!(f, "{}", self.record.args())
    }
}


//------------ Backend -------------------------------------------------------

/// Where log output goes.
enum Backend {
    Stderr,
    File {
        file: fs::File,
        path: PathBuf,
    },
    #[cfg(unix)]
    Syslog(SyslogLogger),
}

impl Backend {
    fn file(path: PathBuf) -> Result<Self, Failed> {
        match open_log_file(&path) {
            Ok(file) => Ok(Backend::File { file, path }),
            Err(err) => {
                error!("Failed to open log file '{}': {}", path.display(), err);
                Err(Failed)
            }
        }
    }

    #[cfg(unix)]
    fn syslog(facility: syslog::Facility) -> Result<Self, Failed> {
        SyslogLogger::new(facility).map(Backend::Syslog)
    }

    fn write(&mut self, record: &log::Record) -> Result<(), io::Error> {
        match self {
            Backend::Stderr => {
                // Nothing sensible to do if stderr is gone.
                let _ = writeln!(
                    io::stderr().lock(), "{}", Line::new(record, false)
                );
                Ok(())
            }
            Backend::File { file, .. } => {
                writeln!(file, "{}", Line::new(record, true))
            }
            #[cfg(unix)]
            Backend::Syslog(logger) => logger.write(record),
        }
    }

    fn flush(&mut self) {
        match self {
            Backend::Stderr => {
                let _ = io::stderr().lock().flush();
            }
            Backend::File { file, .. } => {
                let _ = file.flush();
            }
            #[cfg(unix)]
            Backend::Syslog(logger) => {
                let _ = logger.0.backend.flush();
            }
        }
    }

    fn reopen(&mut self) -> Result<(), Failed> {
        if let Backend::File { file, path } = self {
            match open_log_file(path) {
                Ok(new) => *file = new,
                Err(err) => {
                    eprintln!(
                        "Re-opening log file {} failed: {}.",
                        path.display(), err
                    );
                    return Err(Failed)
                }
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            Backend::Stderr => "Logging to stderr failed".into(),
            Backend::File { path, .. } => {
                format!("Logging to file {} failed", path.display())
            }
            #[cfg(unix)]
            Backend::Syslog(_) => "Logging to syslog failed".into(),
        }
    }
}

fn open_log_file(path: &Path) -> Result<fs::File, io::Error> {
    fs::OpenOptions::new().create(true).append(true).open(path)
}


//------------ SyslogLogger --------------------------------------------------

#[cfg(unix)]
struct SyslogLogger(
    syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>
);

#[cfg(unix)]
impl SyslogLogger {
    /// Connects to the local syslog daemon.
    ///
    /// Tries the local socket first, then TCP and UDP on localhost.
    fn new(facility: syslog::Facility) -> Result<Self, Failed> {
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process: String::from("fs-serve"),
            pid: process::id(),
        };
        let logger = syslog::unix(formatter.clone()).or_else(|_| {
            syslog::tcp(formatter.clone(), ("127.0.0.1", 601))
        }).or_else(|_| {
            syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
        });
        match logger {
            Ok(logger) => Ok(SyslogLogger(logger)),
            Err(err) => {
                error!("Cannot connect to syslog: {err}");
                Err(Failed)
            }
        }
    }

    /// Writes a record.
    ///
    /// Request lines are always sent with info severity.
    fn write(&mut self, record: &log::Record) -> Result<(), io::Error> {
        let args = record.args();
        let res = if record.target() == REQUEST_TARGET {
            self.0.info(args)
        }
        else {
            match record.level() {
                Level::Error => self.0.err(args),
                Level::Warn => self.0.warning(args),
                Level::Info => self.0.info(args),
                Level::Debug | Level::Trace => self.0.debug(args),
            }
        };
        res.map_err(|err| {
            io::Error::new(io::ErrorKind::Other, err.to_string())
        })
    }
}


//------------ GlobalLogger --------------------------------------------------

/// The logger handed to the `log` crate.
///
/// Writes warnings and errors to stderr until a [`Logger`] is installed.
struct GlobalLogger {
    inner: OnceLock<Logger>,
}

static GLOBAL_LOGGER: GlobalLogger = GlobalLogger { inner: OnceLock::new() };

impl GlobalLogger {
    fn switch(&self, logger: Logger) {
        if self.inner.set(logger).is_err() {
            panic!("Tried to switch logger more than once.")
        }
    }
}

impl log::Log for GlobalLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        match self.inner.get() {
            Some(logger) => logger.filter.accepts(metadata),
            None => true,
        }
    }

    fn log(&self, record: &log::Record<'_>) {
        match self.inner.get() {
            Some(logger) => logger.log(record),
            None => {
                let _ = writeln!(
                    io::stderr().lock(), "{}", Line::new(record, false)
                );
            }
        }
    }

    fn flush(&self) {
        if let Some(logger) = self.inner.get() {
            logger.backend.lock().flush()
        }
    }
}


//============ Tests =========================================================
