use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Upper bound on a formatted log message. Anything longer is truncated
/// with a trailing marker rather than allocated without limit.
const MSGSIZE: usize = 1024;
const TRUNCATED: &str = " [truncated]";

type LogFn = Box<dyn Fn(LogLevel, &str, u32, &str, &str) + Send + Sync>;

struct ContextInner {
    loglevel: LogLevel,
    logfunc: Option<LogFn>,
}

/// Process-wide configuration shared by every device and parser: the log
/// threshold and the log sink.
///
/// Cloning is cheap and yields a handle onto the same configuration.
#[derive(Clone)]
pub struct Context {
    inner: Arc<RwLock<ContextInner>>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ContextInner {
                loglevel: LogLevel::Warning,
                logfunc: None,
            })),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("loglevel", &self.loglevel())
            .finish()
    }
}

impl Context {
    pub fn set_loglevel(&self, loglevel: LogLevel) {
        self.inner.write().expect("context lock poisoned").loglevel = loglevel;
    }

    pub fn loglevel(&self) -> LogLevel {
        self.inner.read().expect("context lock poisoned").loglevel
    }

    pub fn set_logfunc<F>(&self, callback: F)
    where
        F: Fn(LogLevel, &str, u32, &str, &str) + Send + Sync + 'static,
    {
        self.inner.write().expect("context lock poisoned").logfunc = Some(Box::new(callback));
    }

    /// Whether a message at `level` would be emitted. Checked by the
    /// logging macro before any formatting happens.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None && level as u32 <= self.loglevel() as u32
    }

    /// Deliver one message to the configured sink, or to the `log` facade
    /// when no sink was installed.
    pub fn log(&self, level: LogLevel, file: &str, line: u32, function: &str, message: &str) {
        if !self.enabled(level) {
            return;
        }

        let mut truncated;
        let message = if message.len() > MSGSIZE {
            truncated = String::with_capacity(MSGSIZE + TRUNCATED.len());
            let mut end = MSGSIZE;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            truncated.push_str(&message[..end]);
            truncated.push_str(TRUNCATED);
            truncated.as_str()
        } else {
            message
        };

        let inner = self.inner.read().expect("context lock poisoned");
        if let Some(logfunc) = &inner.logfunc {
            logfunc(level, file, line, function, message);
        } else {
            let target = format!("divecomputer::{function}");
            match level {
                LogLevel::Error => log::error!(target: &target, "{message}"),
                LogLevel::Warning => log::warn!(target: &target, "{message}"),
                LogLevel::Info => log::info!(target: &target, "{message}"),
                LogLevel::Debug | LogLevel::All => log::debug!(target: &target, "{message}"),
                LogLevel::None => {}
            }
        }
    }

    /// Log an operating system error together with its localized message.
    pub fn syserror(&self, err: &std::io::Error, file: &str, line: u32, function: &str) {
        let code = err.raw_os_error().unwrap_or(0);
        self.log(
            LogLevel::Error,
            file,
            line,
            function,
            &format!("system error: {err} (code {code})"),
        );
    }
}

/// Log through a [`Context`], formatting only when the level gate passes.
#[macro_export]
macro_rules! logmsg {
    ($ctx:expr, $level:expr, $($arg:tt)*) => {
        if $ctx.enabled($level) {
            $ctx.log($level, file!(), line!(), module_path!(), &format!($($arg)*));
        }
    };
}

// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    All = 5,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, ""),
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
            Self::Info => write!(f, "Info"),
            Self::Debug => write!(f, "Debug"),
            Self::All => write!(f, "All"),
        }
    }
}

/// Shared cancellation flag polled by long-running operations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_level_gate() {
        let context = Context::default();
        context.set_loglevel(LogLevel::Warning);
        assert!(context.enabled(LogLevel::Error));
        assert!(context.enabled(LogLevel::Warning));
        assert!(!context.enabled(LogLevel::Info));

        context.set_loglevel(LogLevel::None);
        assert!(!context.enabled(LogLevel::Error));
    }

    #[test]
    fn test_log_callback_and_truncation() {
        let context = Context::default();
        context.set_loglevel(LogLevel::Debug);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        context.set_logfunc(move |_level, _file, _line, _function, message| {
            sink.lock().unwrap().push(message.to_string());
        });

        logmsg!(context, LogLevel::Debug, "hello {}", 42);
        let long = "x".repeat(MSGSIZE + 100);
        logmsg!(context, LogLevel::Error, "{long}");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "hello 42");
        assert!(seen[1].ends_with(TRUNCATED));
        assert_eq!(seen[1].len(), MSGSIZE + TRUNCATED.len());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
