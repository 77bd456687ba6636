// Headless bridge host: serves the pipe pair with an in-memory project until
// the peer sends QUIT.

use log::{error, info, warn};
use pipe_bridge::host::MemoryProject;
use pipe_bridge::{
    logging, Bridge, BridgeConfig, HostInterpreter, HostThread, LifecycleNotifier, MemoryHost,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const ENV_PROJECT: &str = "PIPE_BRIDGE_PROJECT";
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    logging::init_logger();
    logging::init_crash_logger();

    if logging::init_sentry_from_env() {
        info!("[HOST] Sentry monitoring enabled");
    } else {
        info!("[HOST] Sentry monitoring disabled (no {} configured)", logging::ENV_SENTRY_DSN);
    }

    let code = match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[HOST] {}", e);
            logging::capture_critical_error("bridge host", &e.to_string());
            logging::log_critical_error("bridge host", &e.to_string());
            ExitCode::FAILURE
        }
    };

    logging::shutdown_sentry();
    code
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::load()?;
    info!(
        "[HOST] pipe-bridge {} - pipe '{}'",
        pipe_bridge::get_version(),
        config.pipe_name
    );

    let project_path = std::env::var(ENV_PROJECT).ok().filter(|p| !p.is_empty());
    let host = match &project_path {
        Some(path) => MemoryHost::with_project(
            MemoryProject::new()
                .with_path(path.clone())
                .with_tracks(&["Audio 1"])
                .select_track(0),
        ),
        None => MemoryHost::new(),
    };

    let bridge = Arc::new(Bridge::start(config)?);
    let host_thread = Arc::new(HostThread::spawn(
        HostInterpreter::new(host),
        bridge.result_handle(),
    )?);
    bridge.set_dispatcher(host_thread.clone());

    let notifier = LifecycleNotifier::new(Arc::clone(&bridge));
    notifier.plugin_started();
    if let Some(path) = project_path.as_deref() {
        notifier.project_added(Some(path));
        notifier.project_activated(Some(path));
    }

    info!("[HOST] Serving until the peer sends QUIT");
    bridge.wait_for_receiver_exit(None);

    notifier.plugin_stopped();
    if !bridge.flush(FLUSH_TIMEOUT) {
        warn!("[HOST] Outbound queue not drained within {:?}", FLUSH_TIMEOUT);
    }

    bridge.shutdown();
    bridge.clear_dispatcher();
    host_thread.stop();
    info!("[HOST] Stopped");
    Ok(())
}
