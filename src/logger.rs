// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Logging to the platform console.
//!
//! The suite's verbosity levels map onto `log` levels: INFO is `trace`, DBG is `debug`, TEST is
//! `info`, WARN is `warn` and ERROR is `error`. ALWAYS output, such as the per-test result lines,
//! goes through [`always!`] and is never filtered.

use crate::platform::LogSinkImpl;
#[cfg(test)]
use core::cell::Cell;
use core::fmt::{self, Arguments, Display, Formatter, Write};
#[cfg(target_os = "none")]
use core::panic::PanicInfo;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Once, mutex::SpinMutex};

static LOGGER: Once<Logger> = Once::new();

struct Logger {
    sink: LogSinkImpl,
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let prefix = endpoint_prefix();
        if let (Level::Error, Some(file), Some(line)) =
            (record.level(), record.file(), record.line())
        {
            writeln!(
                self.sink,
                "{prefix}{}: {} ({file}:{line})",
                record.level(),
                record.args()
            );
        } else {
            writeln!(self.sink, "{prefix}{}: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Initialises logger.
pub fn init(sink: LogSinkImpl) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink });
    log::set_logger(logger)?;
    log::set_max_level(build_time_log_level());
    Ok(())
}

/// Writes a line straight to the log sink, regardless of the log level.
pub fn write_always(args: Arguments) {
    if let Some(logger) = LOGGER.get() {
        writeln!(logger.sink, "{}", args);
    }
}

/// Logs a line which is always printed, whatever the verbosity.
macro_rules! always {
    ($($arg:tt)*) => {
        $crate::logger::write_always(format_args!($($arg)*))
    };
}
pub(crate) use always;

#[cfg(not(test))]
static ENDPOINT_NAME: Once<&'static str> = Once::new();

#[cfg(test)]
std::thread_local! {
    static ENDPOINT_NAME: Cell<&'static str> = const { Cell::new("") };
}

/// Sets the name of the endpoint this image runs as, used to prefix verbose logs.
#[cfg(not(test))]
pub fn set_endpoint_name(name: &'static str) {
    ENDPOINT_NAME.call_once(|| name);
}

/// Sets the name of the endpoint the current thread runs as, used to prefix verbose logs.
#[cfg(test)]
pub fn set_endpoint_name(name: &'static str) {
    ENDPOINT_NAME.with(|cell| cell.set(name));
}

#[cfg(not(test))]
fn endpoint_name() -> &'static str {
    ENDPOINT_NAME.get().copied().unwrap_or("")
}

#[cfg(test)]
fn endpoint_name() -> &'static str {
    ENDPOINT_NAME.with(Cell::get)
}

/// Returns the prefix for log lines: the endpoint name, when logging verbosely.
fn endpoint_prefix() -> EndpointPrefix {
    if log::max_level() >= LevelFilter::Debug {
        EndpointPrefix(endpoint_name())
    } else {
        EndpointPrefix("")
    }
}

struct EndpointPrefix(&'static str);

impl Display for EndpointPrefix {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.0.is_empty() {
            Ok(())
        } else {
            write!(f, "{}: ", self.0)
        }
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(logger) = LOGGER.get() {
        writeln!(logger.sink, "{}", info);
    }
    loop {}
}

/// Returns the logging [`LevelFilter`] set by the build-time environment variable `LOG_LEVEL`.
/// `LOG_LEVEL` can have the lower-case string values "off", "error", "warn", "info", "debug", or
/// "trace", corresponding to the named values of [`LevelFilter`]. If `LOG_LEVEL` is absent or has
/// some other value, this function returns `LevelFilter::Info`, which prints TEST level messages.
pub const fn build_time_log_level() -> LevelFilter {
    let level = match option_env!("LOG_LEVEL") {
        Some(level) => level,
        None => "",
    };
    match level.as_bytes() {
        b"off" => LevelFilter::Off,
        b"error" => LevelFilter::Error,
        b"warn" => LevelFilter::Warn,
        b"info" => LevelFilter::Info,
        b"debug" => LevelFilter::Debug,
        b"trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Something to which logs can be sent.
///
/// Note that unlike `core::fmt::Write`, the `write_fmt` method on this trait takes `&self` rather
/// than `&mut self`. This means that the implementation is responsible for handling locking if
/// necessary, or can be made lock-free.
pub trait LogSink: Send + Sync {
    /// Writes the given format arguments to the log sink.
    fn write_fmt(&self, args: Arguments);
}

/// An implementation of `LogSink` that wraps around any implementation of `core::fmt::Write`.
///
/// The spin mutex lets several cores share one console, and keeps each log line in one piece.
pub struct LockedWriter<W: Write> {
    writer: SpinMutex<W>,
}

impl<W: Write> LockedWriter<W> {
    /// Creates a new `LockedWriter` wrapping the given [`Write`] implementation.
    #[allow(unused)]
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }
}

impl<W: Write + Send> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        // Ignore errors.
        let _ = self.writer.lock().write_fmt(args);
    }
}
