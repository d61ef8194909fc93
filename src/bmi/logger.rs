//! Logger bridge
//!
//! The library gets one process-wide C callback. It translates the native
//! severity and forwards each record to whichever sink is attached.

use std::ffi::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{warn, Level};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::functions;
use crate::error::BmiResult;
use crate::ffi::{Arg, NativeHandle, MAXSTRLEN};

/// Target used when native records go to the `log` facade
pub const NATIVE_TARGET: &str = "bmi::native";

/// Host severity of a native log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    All,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Native levels run 0..=6; 5 and 6 are both fatal
    pub fn from_native(level: c_int) -> Self {
        match level {
            i32::MIN..=0 => Severity::All,
            1 => Severity::Debug,
            2 => Severity::Info,
            3 => Severity::Warning,
            4 => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    pub fn to_log_level(self) -> Level {
        match self {
            Severity::All => Level::Trace,
            Severity::Debug => Level::Debug,
            Severity::Info => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Error | Severity::Fatal => Level::Error,
        }
    }
}

/// A log record produced by the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
}

/// Receives native log records
pub trait LogSink: Send + Sync {
    fn log(&self, record: &LogRecord);
}

impl<F> LogSink for F
where
    F: Fn(&LogRecord) + Send + Sync,
{
    fn log(&self, record: &LogRecord) {
        self(record)
    }
}

/// Forwards native records to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn log(&self, record: &LogRecord) {
        log::log!(target: NATIVE_TARGET, record.severity.to_log_level(), "{}", record.message);
    }
}

static SINK: Lazy<RwLock<Option<Arc<dyn LogSink>>>> = Lazy::new(|| RwLock::new(None));

/// The callback handed to the library
extern "C" fn log_trampoline(level: c_int, message: *const c_char) {
    let message = if message.is_null() {
        String::new()
    } else {
        // Safety: the library passes a NUL-terminated buffer of at most
        // MAXSTRLEN bytes, valid for the duration of the callback.
        unsafe {
            let mut len = 0;
            while len < MAXSTRLEN && *message.add(len) != 0 {
                len += 1;
            }
            let bytes = std::slice::from_raw_parts(message as *const u8, len);
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    let record = LogRecord {
        severity: Severity::from_native(level),
        message,
    };

    let sink = SINK.read().clone();
    if let Some(sink) = sink {
        // Unwinding into native frames is undefined.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| sink.log(&record)));
    }
}

/// Register the callback with the library and route its records to `sink`.
///
/// Returns `false` when the library has no `set_logger`. That is not an
/// error; the records are simply never produced.
pub fn attach(handle: &NativeHandle, sink: Arc<dyn LogSink>) -> BmiResult<bool> {
    *SINK.write() = Some(sink);
    match handle.call_optional(&functions::SET_LOGGER, &mut [Arg::Callback(log_trampoline)]) {
        Ok(Some(_)) => Ok(true),
        Ok(None) => {
            detach();
            warn!(
                "{} does not export set_logger, native log messages are not forwarded",
                handle.describe()
            );
            Ok(false)
        }
        Err(e) => {
            detach();
            Err(e)
        }
    }
}

/// Drop the attached sink. Returns whether one was attached.
pub fn detach() -> bool {
    SINK.write().take().is_some()
}

pub fn is_attached() -> bool {
    SINK.read().is_some()
}
