//! Logging Module
//!
//! Structured logging via the `tracing` crate, plus a byte-progress logger
//! used while streaming a weights download.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose config for debugging load problems
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Production config: plain output for log collectors
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Initialize logging with the given configuration
///
/// # Returns
/// * `Result<(), String>` - Ok if logging was initialized, Err with message otherwise
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Progress logger for a byte stream of (possibly) known length
///
/// Logs at every 10% step when the total is known, otherwise every 16 MiB.
pub struct ByteProgress {
    operation: String,
    total: Option<u64>,
    current: u64,
    next_log_at: u64,
    step: u64,
    start_time: Instant,
}

const UNKNOWN_TOTAL_STEP: u64 = 16 * 1024 * 1024;

impl ByteProgress {
    pub fn new(operation: &str, total: Option<u64>) -> Self {
        let step = match total {
            Some(t) if t > 0 => (t / 10).max(1),
            _ => UNKNOWN_TOTAL_STEP,
        };
        Self {
            operation: operation.to_string(),
            total,
            current: 0,
            next_log_at: step,
            step,
            start_time: Instant::now(),
        }
    }

    /// Record `bytes` more bytes; returns true when a progress line was emitted
    pub fn advance(&mut self, bytes: u64) -> bool {
        self.current += bytes;
        if self.current < self.next_log_at {
            return false;
        }
        while self.next_log_at <= self.current {
            self.next_log_at += self.step;
        }

        let mb = self.current / 1024 / 1024;
        match self.total {
            Some(total) if total > 0 => {
                let percent = (self.current.min(total) * 100) / total;
                tracing::info!(
                    "{}: {}% ({}MB / {}MB)",
                    self.operation,
                    percent,
                    mb,
                    total / 1024 / 1024
                );
            }
            _ => tracing::info!("{}: {}MB", self.operation, mb),
        }
        true
    }

    pub fn bytes(&self) -> u64 {
        self.current
    }

    /// Log completion
    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        tracing::info!(
            "{}: completed {:.2} MB in {:.1}s",
            self.operation,
            self.current as f64 / 1024.0 / 1024.0,
            elapsed
        );
    }
}
