use crate::sync::lock;
use log::{error, info, LevelFilter};
use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CRASH_LOG_FILE: &str = "crash.log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Environment variable holding the Sentry DSN.
pub const ENV_SENTRY_DSN: &str = "PIPE_BRIDGE_SENTRY_DSN";
pub const ENV_SENTRY_ENVIRONMENT: &str = "PIPE_BRIDGE_ENVIRONMENT";

static CRASH_LOG_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);
static SENTRY_GUARD: Mutex<Option<sentry::ClientInitGuard>> = Mutex::new(None);

/// Initialize Sentry when a DSN is given. An empty or missing DSN disables it.
pub fn init_sentry(dsn: Option<&str>, environment: Option<&str>) -> bool {
    let dsn = match dsn {
        Some(d) if !d.trim().is_empty() => d.trim(),
        _ => {
            info!("[SENTRY] No DSN provided - Sentry disabled");
            return false;
        }
    };

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: environment.map(|e| Cow::Owned(e.to_string())),
            attach_stacktrace: true,
            send_default_pii: false,
            auto_session_tracking: true,
            session_mode: sentry::SessionMode::Application,
            ..Default::default()
        },
    ));

    if !guard.is_enabled() {
        info!("[SENTRY] Failed to initialize");
        return false;
    }

    *lock(&SENTRY_GUARD) = Some(guard);
    info!("[SENTRY] Initialized - environment: {:?}", environment);
    true
}

/// Initialize Sentry from `PIPE_BRIDGE_SENTRY_DSN` / `PIPE_BRIDGE_ENVIRONMENT`.
pub fn init_sentry_from_env() -> bool {
    let dsn = std::env::var(ENV_SENTRY_DSN).ok();
    let environment = std::env::var(ENV_SENTRY_ENVIRONMENT).ok();
    init_sentry(dsn.as_deref(), environment.as_deref())
}

pub fn is_sentry_enabled() -> bool {
    lock(&SENTRY_GUARD)
        .as_ref()
        .is_some_and(|guard| guard.is_enabled())
}

/// End the Sentry session and flush pending events.
pub fn shutdown_sentry() {
    if let Some(guard) = lock(&SENTRY_GUARD).take() {
        info!("[SENTRY] Shutting down - flushing events");
        drop(guard);
    }
}

/// Report an error that stops the bridge from working at all.
pub fn capture_critical_error(context: &str, error: &str) {
    if !is_sentry_enabled() {
        return;
    }
    sentry::with_scope(
        |scope| {
            scope.set_tag("error_type", "critical");
            scope.set_tag("context", context);
            scope.set_level(Some(sentry::Level::Fatal));
        },
        || {
            sentry::capture_message(
                &format!("[CRITICAL] {}: {}", context, error),
                sentry::Level::Fatal,
            );
        },
    );
}

/// Initialize env_logger, defaulting to `warn` when `RUST_LOG` is unset.
pub fn init_logger() {
    let mut builder = env_logger::Builder::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Warn);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}: {}",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let _ = builder.try_init();
}

/// Install the panic hook writing to `crash.log` in the bridge data directory.
pub fn init_crash_logger() {
    init_crash_logger_in(&crate::config::data_dir());
}

/// Install the panic hook writing to `crash.log` in `log_dir`.
pub fn init_crash_logger_in(log_dir: &Path) {
    if let Err(e) = fs::create_dir_all(log_dir) {
        error!("[CRASH] Cannot create {:?}: {}", log_dir, e);
    }
    let log_path = log_dir.join(CRASH_LOG_FILE);
    *lock(&CRASH_LOG_PATH) = Some(log_path.clone());

    std::panic::set_hook(Box::new(|panic_info| {
        let report = format_panic_message(panic_info);

        if is_sentry_enabled() {
            sentry::capture_message(&report, sentry::Level::Fatal);
        }
        if let Err(e) = write_crash_log(&report) {
            error!("[CRASH] Failed to write crash log: {}", e);
        }
        error!("\n{}", report);
    }));

    info!("[CRASH] Crash logger installed - {:?}", log_path);
}

fn format_panic_message(panic_info: &std::panic::PanicHookInfo) -> String {
    let payload = panic_info
        .payload()
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unknown panic payload".to_string());

    let location = panic_info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "Unknown location".to_string());

    format!(
        r#"
===== RUST PANIC =====
Timestamp: {}
Location: {}
Message: {}
Thread: {:?}

Backtrace:
{:?}

"#,
        chrono::Local::now().format(TIMESTAMP_FORMAT),
        location,
        payload,
        current_thread_name(),
        std::backtrace::Backtrace::capture()
    )
}

/// Crash log entry for an error that did not panic.
pub fn format_critical_error(context: &str, error: &str) -> String {
    format!(
        r#"
===== CRITICAL ERROR =====
Timestamp: {}
Context: {}
Error: {}
Thread: {:?}

"#,
        chrono::Local::now().format(TIMESTAMP_FORMAT),
        context,
        error,
        current_thread_name()
    )
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

fn write_crash_log(message: &str) -> std::io::Result<()> {
    let path = lock(&CRASH_LOG_PATH).clone();
    if let Some(path) = path {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", message)?;
    }
    Ok(())
}

/// Record an error in the crash log (and Sentry) without panicking.
pub fn log_critical_error(context: &str, error: &str) {
    let message = format_critical_error(context, error);

    if is_sentry_enabled() {
        sentry::with_scope(
            |scope| {
                scope.set_tag("context", context);
                scope.set_level(Some(sentry::Level::Error));
            },
            || {
                sentry::capture_message(error, sentry::Level::Error);
            },
        );
    }

    if let Err(e) = write_crash_log(&message) {
        error!("[CRASH] Failed to write critical error: {}", e);
    }
    error!("{}", message);
}

pub fn crash_log_path() -> Option<PathBuf> {
    lock(&CRASH_LOG_PATH).clone()
}

pub fn clear_crash_log() -> std::io::Result<()> {
    if let Some(path) = crash_log_path() {
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
